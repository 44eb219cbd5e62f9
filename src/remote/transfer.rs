use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use ssh2::{Session, Sftp};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Error, Result};
use crate::models::HostConfig;

/// Copies a remote file or directory into a local directory.
pub trait Transfer: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Fetches `remote` (recursively when it is a directory) into
    /// `local_dir`, returning the local path of the copy.
    fn fetch(
        &self,
        session: &Session,
        host: &HostConfig,
        remote: &str,
        local_dir: &Path,
    ) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    #[default]
    Sftp,
    Scp,
}

impl TransferKind {
    pub fn build(self, scp_program: &str) -> Box<dyn Transfer> {
        match self {
            TransferKind::Sftp => Box::new(SftpTransfer),
            TransferKind::Scp => Box::new(ScpTransfer::new(scp_program)),
        }
    }
}

fn local_target(remote: &str, local_dir: &Path) -> Result<PathBuf> {
    Path::new(remote)
        .file_name()
        .map(|name| local_dir.join(name))
        .ok_or_else(|| Error::transfer(remote, "remote path has no file name"))
}

/// Transfer over the already authenticated session's SFTP subsystem.
#[derive(Debug, Default)]
pub struct SftpTransfer;

impl SftpTransfer {
    fn fetch_dir(&self, sftp: &Sftp, remote: &Path, local: &Path) -> Result<()> {
        fs::create_dir_all(local)?;
        for (path, stat) in sftp.readdir(remote)? {
            let Some(name) = path.file_name() else {
                continue;
            };
            if name == "." || name == ".." {
                continue;
            }
            let target = local.join(name);
            if stat.is_dir() {
                self.fetch_dir(sftp, &path, &target)?;
            } else {
                self.fetch_file(sftp, &path, &target, stat.size.unwrap_or(0))?;
            }
        }
        Ok(())
    }

    fn fetch_file(&self, sftp: &Sftp, remote: &Path, local: &Path, size: u64) -> Result<()> {
        let style = ProgressStyle::with_template(
            "{msg:40!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

        let pb = ProgressBar::new(size);
        pb.set_style(style);
        pb.set_message(
            remote
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );

        let source = sftp.open(remote)?;
        let mut dest = File::create(local)?;
        let copied = io::copy(&mut pb.wrap_read(source), &mut dest)?;
        pb.finish();

        tracing::debug!("Copied {} bytes {:?} -> {:?}", copied, remote, local);
        Ok(())
    }
}

impl Transfer for SftpTransfer {
    fn name(&self) -> &'static str {
        "sftp"
    }

    fn fetch(
        &self,
        session: &Session,
        host: &HostConfig,
        remote: &str,
        local_dir: &Path,
    ) -> Result<PathBuf> {
        let target = local_target(remote, local_dir)?;
        let sftp = session.sftp()?;
        let remote_path = Path::new(remote);
        let stat = sftp.stat(remote_path)?;

        tracing::info!("[{}] sftp {} -> {:?}", host.alias, remote, target);
        if stat.is_dir() {
            self.fetch_dir(&sftp, remote_path, &target)?;
        } else {
            self.fetch_file(&sftp, remote_path, &target, stat.size.unwrap_or(0))?;
        }
        Ok(target)
    }
}

/// Transfer through an external `scp` executable. Needs key based auth,
/// scp cannot be handed the configured password.
#[derive(Debug, Clone)]
pub struct ScpTransfer {
    program: String,
}

impl ScpTransfer {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    /// `user@host:<path>` with the path quoted for the remote shell.
    pub fn source_arg(host: &HostConfig, remote: &str) -> String {
        format!(
            "{}:{}",
            host.destination(),
            shell_escape::unix::escape(remote.into())
        )
    }
}

impl Transfer for ScpTransfer {
    fn name(&self) -> &'static str {
        "scp"
    }

    fn fetch(
        &self,
        _session: &Session,
        host: &HostConfig,
        remote: &str,
        local_dir: &Path,
    ) -> Result<PathBuf> {
        let target = local_target(remote, local_dir)?;
        let source = Self::source_arg(host, remote);

        tracing::info!(
            "[{}] {} -r {} {:?}",
            host.alias,
            self.program,
            source,
            local_dir
        );

        // -O keeps the legacy protocol so the quoting above is honoured
        let status = Command::new(&self.program)
            .arg("-O")
            .arg("-r")
            .arg("-P")
            .arg(host.port().to_string())
            .arg("-o")
            .arg("ConnectTimeout=30")
            .arg("-o")
            .arg("LogLevel=ERROR")
            .arg(&source)
            .arg(local_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| Error::transfer(remote, format!("failed to run {}: {}", self.program, e)))?;

        if !status.success() {
            return Err(Error::transfer(
                remote,
                format!("{} finished with {}", self.program, status),
            ));
        }

        Ok(target)
    }
}
