use serde::{Deserialize, Serialize};
use std::fmt;

/// One remote download box as configured in `boxfetch.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub alias: String,
    pub host: String,
    pub user: String,
    pub port: Option<u16>,
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub prefer_key: bool,
    #[serde(default)]
    pub password_fallback: bool,
    pub files_root: String,
    pub temp_root: String,
}

fn default_true() -> bool {
    true
}

impl HostConfig {
    pub fn new(alias: &str, host: &str, user: &str, files_root: &str, temp_root: &str) -> Self {
        Self {
            alias: alias.to_string(),
            host: host.to_string(),
            user: user.to_string(),
            port: None,
            password: None,
            prefer_key: true,
            password_fallback: false,
            files_root: files_root.to_string(),
            temp_root: temp_root.to_string(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(22)
    }

    /// `user@host`, as used by ssh and scp
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Movie,
    Episode,
    Unknown,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MediaType::Movie => "movie",
            MediaType::Episode => "episode",
            MediaType::Unknown => "unknown",
        };
        f.write_str(label)
    }
}
