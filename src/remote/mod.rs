//! One download box: SSH session, remote commands, extraction and transfer.

pub mod transfer;

use ssh2::{Channel, Session};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::HostConfig;
use crate::unpack::UnpackProgressParser;
use transfer::Transfer;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEY_FILES: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];

/// Remote command producing the `"<mtime> | <size> | <path>"` lines a
/// `Listing` ingests, oldest first.
pub fn listing_command(files_root: &str) -> String {
    format!(
        r#"find {} \( -iname "*.mkv" -o -iname "*.rar" \) -printf "%T@ | %s | %p\n" | sort -n"#,
        quote(files_root)
    )
}

fn quote(arg: &str) -> String {
    shell_escape::unix::escape(arg.into()).into_owned()
}

/// `path` lies below `root`, is not `root` itself and has no `..` in it.
pub(crate) fn is_strictly_under(path: &str, root: &str) -> bool {
    let (path, root) = (Path::new(path), Path::new(root));
    path.is_absolute()
        && !path.components().any(|c| c == Component::ParentDir)
        && path != root
        && path.starts_with(root)
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Reads stdout and stderr in turns until the remote side is done, so a
/// chatty stderr can't stall stdout. Expects a non-blocking session.
fn drain_channel(
    channel: &mut Channel,
    stderr: &mut Vec<u8>,
    on_line: impl FnMut(String),
) -> io::Result<()> {
    let mut stdout = LineSplitter::new(on_line);
    let mut buf = [0u8; 8192];
    loop {
        let out = read_available(channel, &mut buf)?;
        stdout.push(&buf[..out]);
        let err = read_available(&mut channel.stderr(), &mut buf)?;
        stderr.extend_from_slice(&buf[..err]);

        if out == 0 && err == 0 {
            if channel.eof() {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
    stdout.finish();
    Ok(())
}

/// One `read`, treating "nothing yet" as zero bytes.
fn read_available<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    match reader.read(buf) {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

/// Cuts a byte stream into lines as chunks arrive.
struct LineSplitter<F: FnMut(String)> {
    pending: Vec<u8>,
    emit: F,
}

impl<F: FnMut(String)> LineSplitter<F> {
    fn new(emit: F) -> Self {
        Self {
            pending: Vec::new(),
            emit,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            (self.emit)(decode_line(&line));
        }
    }

    fn finish(mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            (self.emit)(decode_line(&line));
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Result of a remote unpack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Remote path of the extracted media file.
    pub remote_path: String,
    /// Directory unrar wrote into.
    pub directory: String,
    pub files: Vec<String>,
}

pub struct RemoteHost {
    config: HostConfig,
    transfer: Box<dyn Transfer>,
    session: Option<Session>,
    used_password: bool,
}

impl fmt::Debug for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHost")
            .field("alias", &self.config.alias)
            .field("host", &self.config.host)
            .field("transfer", &self.transfer.name())
            .field("connected", &self.is_connected())
            .field("used_password", &self.used_password)
            .finish()
    }
}

impl RemoteHost {
    pub fn new(config: HostConfig, transfer: Box<dyn Transfer>) -> Self {
        Self {
            config,
            transfer,
            session: None,
            used_password: false,
        }
    }

    pub fn alias(&self) -> &str {
        &self.config.alias
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn used_password(&self) -> bool {
        self.used_password
    }

    /// Opens and authenticates the session. Failures are logged and leave
    /// the host disconnected; the return value is the connected flag.
    pub fn connect(&mut self) -> bool {
        match self.open_session() {
            Ok((session, used_password)) => {
                tracing::info!(
                    "Connected to {} ({}, {} auth)",
                    self.config.alias,
                    self.config.destination(),
                    if used_password { "password" } else { "key" }
                );
                self.session = Some(session);
                self.used_password = used_password;
            }
            Err(e) => {
                tracing::error!("Connection to {} failed: {}", self.config.alias, e);
                self.session = None;
                self.used_password = false;
            }
        }
        self.is_connected()
    }

    fn open_session(&self) -> Result<(Session, bool)> {
        let addr = (self.config.host.as_str(), self.config.port())
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("could not resolve {}", self.config.host),
                )
            })?;
        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        let user = &self.config.user;
        if self.config.prefer_key {
            self.try_key_auth(&session);
        }

        let mut used_password = false;
        let password_allowed = !self.config.prefer_key || self.config.password_fallback;
        if !session.authenticated() && password_allowed {
            if let Some(password) = &self.config.password {
                session.userauth_password(user, password)?;
                used_password = true;
            }
        }

        if !session.authenticated() {
            return Err(Error::AuthFailed {
                destination: self.config.destination(),
            });
        }
        Ok((session, used_password))
    }

    /// Agent first, then the usual key files. Best effort.
    fn try_key_auth(&self, session: &Session) {
        let user = &self.config.user;
        if let Err(e) = session.userauth_agent(user) {
            tracing::debug!("[{}] agent auth: {}", self.config.alias, e);
        }
        if session.authenticated() {
            return;
        }

        let Some(home) = dirs::home_dir() else {
            return;
        };
        for name in KEY_FILES {
            let key = home.join(".ssh").join(name);
            if !key.exists() {
                continue;
            }
            match session.userauth_pubkey_file(user, None, &key, None) {
                Ok(()) => return,
                Err(e) => tracing::debug!("[{}] key {:?}: {}", self.config.alias, key, e),
            }
        }
    }

    /// Runs `cmd` remotely, handing each stdout line to `on_line` as it
    /// arrives. Without a session this does nothing.
    pub fn run_command(
        &self,
        cmd: &str,
        mut on_line: Option<&mut dyn FnMut(&str)>,
    ) -> Result<Vec<String>> {
        let Some(session) = &self.session else {
            tracing::debug!("[{}] not connected, skipping: {}", self.config.alias, cmd);
            return Ok(Vec::new());
        };

        tracing::debug!("[{}] $ {}", self.config.alias, cmd);
        let mut channel = session.channel_session()?;
        channel.exec(cmd)?;

        let mut lines = Vec::new();
        let mut stderr = Vec::new();
        session.set_blocking(false);
        let drained = drain_channel(&mut channel, &mut stderr, |line| {
            if let Some(callback) = on_line.as_deref_mut() {
                callback(&line);
            }
            lines.push(line);
        });
        session.set_blocking(true);
        drained?;

        channel.wait_close()?;
        let status = channel.exit_status()?;
        if status != 0 {
            tracing::warn!(
                "[{}] `{}` exited with {}: {}",
                self.config.alias,
                cmd,
                status,
                String::from_utf8_lossy(&stderr).trim()
            );
        }

        Ok(lines)
    }

    /// Raw listing lines for this host's files root.
    pub fn list_files(&self) -> Result<Vec<String>> {
        self.run_command(&listing_command(&self.config.files_root), None)
    }

    /// Copies `remote` into `local_dir` with the configured strategy.
    /// `Ok(None)` when not connected.
    pub fn transfer(&self, remote: &str, local_dir: &Path) -> Result<Option<PathBuf>> {
        let Some(session) = &self.session else {
            tracing::warn!("[{}] not connected, cannot fetch {}", self.config.alias, remote);
            return Ok(None);
        };
        if self.used_password && self.transfer.name() == "scp" {
            tracing::warn!(
                "[{}] password auth was used; scp will need key access",
                self.config.alias
            );
        }
        self.transfer
            .fetch(session, &self.config, remote, local_dir)
            .map(Some)
    }

    fn make_temp_dir(&self) -> Result<String> {
        let root = self.config.temp_root.trim_end_matches('/');
        let cmd = format!(
            "mkdir -p {} && mktemp -d {}",
            quote(root),
            quote(&format!("{}/boxfetch.XXXXXXXX", root))
        );
        let lines = self.run_command(&cmd, None)?;
        lines
            .into_iter()
            .map(|l| l.trim().to_string())
            .find(|l| !l.is_empty())
            .ok_or_else(|| Error::remote_command(format!("`{}` produced no directory", cmd)))
    }

    /// Unpacks `rar_path` on the host, into `dest` or a fresh temp directory,
    /// printing progress as unrar reports it.
    pub fn extract_remote(&self, rar_path: &str, dest: Option<&str>) -> Result<Extraction> {
        let dest_dir = match dest {
            Some(dir) => dir.trim_end_matches('/').to_string(),
            None => self.make_temp_dir()?,
        };
        let cmd = format!("unrar e {} {}", quote(rar_path), quote(&format!("{}/", dest_dir)));

        let mut parser = UnpackProgressParser::new();
        let on_line: &mut dyn FnMut(&str) = &mut |line: &str| {
            parser.feed(line);
            if let Some(status) = parser.status_string() {
                print!("{}", status);
                if let Err(e) = io::stdout().flush() {
                    tracing::debug!("stdout flush failed: {}", e);
                }
            }
        };
        self.run_command(&cmd, Some(on_line))?;

        let (Some(directory), Some(current)) = (parser.destination_dir(), parser.current_file())
        else {
            return Err(Error::ExtractionUnresolved {
                archive: rar_path.to_string(),
            });
        };

        let files = parser.extracted_files().to_vec();
        if files.len() > 1 {
            tracing::warn!(
                "[{}] {} extracted {} files, only using {}",
                self.config.alias,
                rar_path,
                files.len(),
                files[0]
            );
        }
        let file = files.first().map(String::as_str).unwrap_or(current);

        Ok(Extraction {
            remote_path: format!("{}/{}", directory.trim_end_matches('/'), file),
            directory: directory.to_string(),
            files,
        })
    }

    /// `rm -rf` on the host. With `restrict_to_temp` only directories below
    /// the temp root may go.
    pub fn remove_remote_dir(&self, path: &str, restrict_to_temp: bool) -> Result<()> {
        if restrict_to_temp && !is_strictly_under(path, &self.config.temp_root) {
            return Err(Error::UnsafeRemoval {
                path: path.to_string(),
                temp_root: self.config.temp_root.clone(),
            });
        }
        tracing::info!("[{}] removing {}", self.config.alias, path);
        self.run_command(&format!("rm -rf {}", quote(path)), None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::transfer::TransferKind;

    fn host() -> RemoteHost {
        RemoteHost::new(
            HostConfig::new("box1", "box1.invalid", "u", "/home/u/files", "/home/u/tmp"),
            TransferKind::Sftp.build("scp"),
        )
    }

    #[test]
    fn test_listing_command_is_exact() {
        assert_eq!(
            listing_command("/home/u/files"),
            r#"find /home/u/files \( -iname "*.mkv" -o -iname "*.rar" \) -printf "%T@ | %s | %p\n" | sort -n"#
        );
        assert!(listing_command("/home/u/my files").starts_with("find '/home/u/my files' "));
    }

    #[test]
    fn test_is_strictly_under() {
        assert!(is_strictly_under("/home/u/tmp/boxfetch.a1", "/home/u/tmp"));
        assert!(is_strictly_under("/home/u/tmp/boxfetch.a1/", "/home/u/tmp/"));
        assert!(!is_strictly_under("/home/u/tmp", "/home/u/tmp"));
        assert!(!is_strictly_under("/home/u/tmpfoo", "/home/u/tmp"));
        assert!(!is_strictly_under("/home/u/files/Movie", "/home/u/tmp"));
        assert!(!is_strictly_under("/home/u/tmp/../files", "/home/u/tmp"));
        assert!(!is_strictly_under("home/u/tmp/x", "/home/u/tmp"));
    }

    #[test]
    fn test_line_splitter_joins_partial_chunks() {
        let mut lines = Vec::new();
        let mut splitter = LineSplitter::new(|line| lines.push(line));
        splitter.push(b"1600000000 | 10 | /home/u/fi");
        splitter.push(b"les/a.mkv\r\n1600000001 | 20 ");
        splitter.push(b"| /home/u/files/b.mkv\n\nExtracting  /tmp/x/c.mkv  OK");
        splitter.finish();
        assert_eq!(
            lines,
            vec![
                "1600000000 | 10 | /home/u/files/a.mkv".to_string(),
                "1600000001 | 20 | /home/u/files/b.mkv".to_string(),
                String::new(),
                "Extracting  /tmp/x/c.mkv  OK".to_string(),
            ]
        );
    }

    struct NotYet;

    impl Read for NotYet {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"))
        }
    }

    #[test]
    fn test_read_available_treats_would_block_as_empty() {
        let mut buf = [0u8; 16];
        assert_eq!(read_available(&mut NotYet, &mut buf).unwrap(), 0);

        let mut data: &[u8] = b"abc";
        assert_eq!(read_available(&mut data, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");

        let mut empty = io::Cursor::new(Vec::<u8>::new());
        assert_eq!(read_available(&mut empty, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_remove_outside_temp_is_refused() {
        let host = host();
        let err = host.remove_remote_dir("/home/u/files/Movie.2019", true).unwrap_err();
        assert!(matches!(err, Error::UnsafeRemoval { .. }));
    }

    #[test]
    fn test_disconnected_host_is_a_no_op() {
        let host = host();
        assert!(!host.is_connected());
        assert!(!host.used_password());
        assert!(host.run_command("echo hi", None).unwrap().is_empty());
        assert!(host.list_files().unwrap().is_empty());
        assert_eq!(
            host.transfer("/home/u/files/a.mkv", Path::new("/tmp")).unwrap(),
            None
        );
        assert!(host.remove_remote_dir("/home/u/tmp/boxfetch.a1", true).is_ok());
        assert!(host.remove_remote_dir("/home/u/files", false).is_ok());
    }

    #[test]
    fn test_extract_without_output_is_unresolved() {
        let host = host();
        let err = host
            .extract_remote("/home/u/files/Movie/movie.rar", Some("/home/u/tmp/x"))
            .unwrap_err();
        assert!(matches!(err, Error::ExtractionUnresolved { .. }));
    }
}
