use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Authentication failed for {destination}")]
    AuthFailed { destination: String },

    #[error("No listing item matches '{key}'")]
    ItemNotFound { key: String },

    #[error("Archive '{path}' sits directly in the files root and cannot be fetched as a directory")]
    ArchiveInRoot { path: String },

    #[error("Could not determine where '{archive}' was extracted to")]
    ExtractionUnresolved { archive: String },

    #[error("Refusing to remove '{path}': not under temp root '{temp_root}'")]
    UnsafeRemoval { path: String, temp_root: String },

    #[error("Remote command failed: {message}")]
    RemoteCommand { message: String },

    #[error("Transfer of '{remote}' failed: {message}")]
    Transfer { remote: String, message: String },
}

impl Error {
    pub fn remote_command<S: Into<String>>(message: S) -> Self {
        Error::RemoteCommand {
            message: message.into(),
        }
    }

    pub fn transfer<R: Into<String>, S: Into<String>>(remote: R, message: S) -> Self {
        Error::Transfer {
            remote: remote.into(),
            message: message.into(),
        }
    }
}
