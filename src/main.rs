use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, EnvFilter};

use boxfetch::catalog::{Catalog, JsonCatalog};
use boxfetch::config::{AppConfig, ConfigManager};
use boxfetch::media::ReleaseNameClassifier;
use boxfetch::{GroupOptions, HostGroup, ItemKey, RemoteHost};

#[derive(Debug, Parser)]
#[command(name = "boxfetch", version, about = "Fetch finished downloads from remote boxes")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show items on all hosts, oldest first
    List {
        /// Only items whose name contains every term
        terms: Vec<String>,
        #[arg(short, long)]
        case_sensitive: bool,
    },
    /// Count matching items
    Count {
        terms: Vec<String>,
        #[arg(short, long)]
        case_sensitive: bool,
    },
    /// Download items by index or exact name
    Get {
        #[arg(required = true)]
        keys: Vec<ItemKey>,
        /// Fetch archives as-is instead of unpacking them on the host
        #[arg(long)]
        no_extract: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_file(path.clone()),
        None => ConfigManager::new()?,
    };

    // Setup logging
    let log_dir = config_manager.config_dir().join("logs");
    if !log_dir.exists() {
        fs::create_dir_all(&log_dir)?;
    }
    let log_file = log_dir.join(format!(
        "boxfetch_{}.log",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    let file = File::create(&log_file)?;

    fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(EnvFilter::from_default_env().add_directive("boxfetch=debug".parse()?))
        .with_ansi(false)
        .with_writer(file)
        .init();

    debug!("Starting with config {:?}", config_manager.config_path());

    let mut config = config_manager.load_config()?;
    config
        .validate()
        .with_context(|| format!("Invalid config {:?}", config_manager.config_path()))?;

    if let Command::Get { no_extract: true, .. } = cli.command {
        config.extract = false;
    }

    let mut group = build_group(&config)?;
    if group.connect_all() == 0 || !group.is_usable() {
        bail!("No host could be reached, see {:?}", log_file);
    }

    match cli.command {
        Command::List {
            terms,
            case_sensitive,
        } => {
            let shown = group.print(terms.as_slice(), case_sensitive);
            if shown == 0 {
                println!("Nothing to show");
            }
        }
        Command::Count {
            terms,
            case_sensitive,
        } => {
            println!("{}", group.count(terms.as_slice(), case_sensitive));
        }
        Command::Get { keys, .. } => {
            let mut failed = 0;
            for key in &keys {
                match group.download(key) {
                    Ok(Some(path)) => println!("{} -> {}", key, path.display()),
                    Ok(None) => println!("{}: host unavailable, skipped", key),
                    Err(e) => {
                        tracing::error!("Download of {} failed: {}", key, e);
                        eprintln!("{}: {}", key, e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} downloads failed", failed, keys.len());
            }
        }
    }

    Ok(())
}

fn build_group(config: &AppConfig) -> Result<HostGroup> {
    let hosts = config
        .hosts
        .iter()
        .map(|host| RemoteHost::new(host.clone(), config.transfer.build(&config.scp_program)))
        .collect();

    let mut catalogs: Vec<Box<dyn Catalog>> = Vec::new();
    for path in &config.catalogs {
        let catalog = JsonCatalog::load(path)
            .with_context(|| format!("Failed to load catalog {:?}", path))?;
        catalogs.push(Box::new(catalog));
    }

    let classifier = ReleaseNameClassifier::new(config.movies_dir.clone(), config.tv_dir.clone());

    Ok(HostGroup::new(
        hosts,
        Box::new(classifier),
        catalogs,
        GroupOptions {
            download_dir: config.download_dir.clone(),
            extract: config.extract,
        },
    ))
}
