use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::HostConfig;
use crate::remote::transfer::TransferKind;

#[derive(Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub download_dir: PathBuf,
    pub movies_dir: PathBuf,
    pub tv_dir: PathBuf,
    #[serde(default = "default_extract")]
    pub extract: bool,
    #[serde(default)]
    pub transfer: TransferKind,
    #[serde(default = "default_scp_program")]
    pub scp_program: String,
    #[serde(default)]
    pub catalogs: Vec<PathBuf>,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

fn default_extract() -> bool {
    true
}

fn default_scp_program() -> String {
    "scp".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let download_dir = dirs::download_dir().unwrap_or_else(|| home.join("Downloads"));
        let videos = dirs::video_dir().unwrap_or_else(|| home.join("Videos"));
        Self {
            download_dir,
            movies_dir: videos.join("Movies"),
            tv_dir: videos.join("TV"),
            extract: default_extract(),
            transfer: TransferKind::default(),
            scp_program: default_scp_program(),
            catalogs: Vec::new(),
            hosts: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            bail!("No hosts configured");
        }
        for host in &self.hosts {
            for (label, root) in [("files_root", &host.files_root), ("temp_root", &host.temp_root)] {
                if !root.starts_with('/') {
                    bail!("Host '{}': {} must be absolute, got '{}'", host.alias, label, root);
                }
            }
            if !host.prefer_key && host.password.is_none() {
                bail!("Host '{}': key auth disabled but no password set", host.alias);
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("boxfetch");

        // Create config directory if it doesn't exist
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        }

        let config_file = config_dir.join("boxfetch.toml");

        Ok(Self {
            config_dir,
            config_file,
        })
    }

    pub fn with_file(config_file: PathBuf) -> Self {
        let config_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config_dir,
            config_file,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_file
    }

    pub fn load_config(&self) -> Result<AppConfig> {
        // If config file doesn't exist, create it with default values
        if !self.config_file.exists() {
            tracing::info!("Writing default config to {:?}", self.config_file);
            self.save_config(&AppConfig::default())?;
        }

        let content = fs::read_to_string(&self.config_file)
            .with_context(|| format!("Failed to read config file {:?}", self.config_file))?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        tracing::debug!("Loaded {} hosts from {:?}", config.hosts.len(), self.config_file);

        Ok(config)
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(&self.config_file, toml).context("Failed to write config file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
download_dir = "/data/incoming"
movies_dir = "/data/movies"
tv_dir = "/data/tv"
transfer = "scp"
catalogs = ["/data/movies.json"]

[[hosts]]
alias = "box1"
host = "box1.example.net"
user = "u"
port = 2222
files_root = "/home/u/files"
temp_root = "/home/u/tmp"
"#;

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boxfetch.toml");
        fs::write(&path, SAMPLE).unwrap();

        let config = ConfigManager::with_file(path).load_config().unwrap();
        assert_eq!(config.download_dir, PathBuf::from("/data/incoming"));
        assert_eq!(config.transfer, TransferKind::Scp);
        assert!(config.extract);
        assert_eq!(config.scp_program, "scp");
        assert_eq!(config.hosts.len(), 1);
        let host = &config.hosts[0];
        assert_eq!(host.port(), 2222);
        assert!(host.prefer_key);
        assert!(!host.password_fallback);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_config_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boxfetch.toml");
        let manager = ConfigManager::with_file(path.clone());

        let config = manager.load_config().unwrap();
        assert!(path.exists());
        assert!(config.hosts.is_empty());
        assert_eq!(config.transfer, TransferKind::Sftp);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_relative_roots() {
        let mut config = AppConfig::default();
        config
            .hosts
            .push(HostConfig::new("box", "h", "u", "files", "/tmp/x"));
        assert!(config.validate().is_err());
    }
}
