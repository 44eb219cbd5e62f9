use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::listing::{ItemKey, Listing, ListingItem};
use crate::media::MediaClassifier;
use crate::remote::{Extraction, RemoteHost};

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

#[derive(Debug, Clone)]
pub struct GroupOptions {
    /// Where items go when classification can't place them.
    pub download_dir: PathBuf,
    /// Unpack archives on the host before fetching.
    pub extract: bool,
}

/// Everything `download` needs to know about one item, worked out up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPlan {
    pub host: String,
    pub name: String,
    pub remote_source: String,
    pub extract: bool,
    pub destination: PathBuf,
}

impl DownloadPlan {
    pub fn for_item(
        item: &ListingItem,
        classifier: &dyn MediaClassifier,
        options: &GroupOptions,
    ) -> Result<Self> {
        let extract = options.extract && item.is_archive();
        let remote_source = if extract {
            item.path().to_string()
        } else {
            item.remote_download_path()?
        };
        let destination = item
            .local_destination(classifier)
            .unwrap_or_else(|| options.download_dir.clone());

        Ok(Self {
            host: item.host().to_string(),
            name: item.name().to_string(),
            remote_source,
            extract,
            destination,
        })
    }
}

pub struct HostGroup {
    hosts: Vec<RemoteHost>,
    listing: Option<Listing>,
    classifier: Box<dyn MediaClassifier>,
    catalogs: Vec<Box<dyn Catalog>>,
    options: GroupOptions,
}

impl fmt::Debug for HostGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostGroup")
            .field("hosts", &self.hosts)
            .field("listed", &self.listing.as_ref().map(Listing::len))
            .field("catalogs", &self.catalogs.len())
            .field("options", &self.options)
            .finish()
    }
}

impl HostGroup {
    pub fn new(
        hosts: Vec<RemoteHost>,
        classifier: Box<dyn MediaClassifier>,
        catalogs: Vec<Box<dyn Catalog>>,
        options: GroupOptions,
    ) -> Self {
        Self {
            hosts,
            listing: None,
            classifier,
            catalogs,
            options,
        }
    }

    /// Uses `listing` instead of asking the hosts.
    pub fn with_listing(mut self, mut listing: Listing) -> Self {
        listing.sort();
        listing.reconcile(&self.catalogs);
        self.listing = Some(listing);
        self
    }

    pub fn hosts(&self) -> &[RemoteHost] {
        &self.hosts
    }

    /// Connects every host; returns how many made it.
    pub fn connect_all(&mut self) -> usize {
        let mut connected = 0;
        for host in self.hosts.iter_mut() {
            if host.is_connected() || host.connect() {
                connected += 1;
            }
        }
        tracing::info!("{} of {} hosts connected", connected, self.hosts.len());
        connected
    }

    pub fn is_usable(&self) -> bool {
        self.hosts.iter().any(RemoteHost::is_connected)
    }

    /// Lists every connected host once and keeps the result.
    pub fn ensure_listing(&mut self) -> &Listing {
        let hosts = &self.hosts;
        let catalogs = &self.catalogs;
        self.listing.get_or_insert_with(|| {
            let mut listing = Listing::new();
            for host in hosts.iter().filter(|h| h.is_connected()) {
                match host.list_files() {
                    Ok(lines) => listing.ingest(&lines, host.alias(), &host.config().files_root),
                    Err(e) => tracing::error!("Listing {} failed: {}", host.alias(), e),
                }
            }
            listing.sort();
            listing.reconcile(catalogs);
            listing
        })
    }

    pub fn count<S: AsRef<str>>(&mut self, terms: &[S], case_sensitive: bool) -> usize {
        self.ensure_listing().filter(terms, case_sensitive).count()
    }

    /// Prints matching items to stdout; returns how many were printed.
    pub fn print<S: AsRef<str>>(&mut self, terms: &[S], case_sensitive: bool) -> usize {
        let mut printed = 0;
        for item in self.ensure_listing().filter(terms, case_sensitive) {
            println!("{}", Listing::render(item));
            printed += 1;
        }
        printed
    }

    pub fn plan(&mut self, key: &ItemKey) -> Result<DownloadPlan> {
        self.ensure_listing();
        let item = self
            .listing
            .as_ref()
            .and_then(|listing| listing.get(key))
            .ok_or_else(|| Error::ItemNotFound {
                key: key.to_string(),
            })?;
        DownloadPlan::for_item(item, self.classifier.as_ref(), &self.options)
    }

    /// Fetches one item into its local home. Returns the local path of what
    /// arrived, or `None` when the owning host is unavailable.
    pub fn download(&mut self, key: &ItemKey) -> Result<Option<PathBuf>> {
        let plan = self.plan(key)?;

        let Some(host) = self.hosts.iter().find(|h| h.alias() == plan.host) else {
            tracing::warn!("No host '{}' for {}", plan.host, plan.name);
            return Ok(None);
        };
        if !host.is_connected() {
            tracing::warn!("Host '{}' is not connected, skipping {}", plan.host, plan.name);
            return Ok(None);
        }

        tracing::info!(
            "Downloading {} from {} into {:?}{}",
            plan.name,
            plan.host,
            plan.destination,
            if plan.extract { " (extracting first)" } else { "" }
        );
        prepare_destination(&plan.destination)?;
        execute_plan(host, &plan)
    }
}

/// The host side of a download.
pub trait Fetcher {
    /// Unpacks `archive` into a fresh temp directory on the host.
    fn extract(&self, archive: &str) -> Result<Extraction>;
    fn fetch(&self, remote: &str, local_dir: &Path) -> Result<Option<PathBuf>>;
    fn remove_temp_dir(&self, dir: &str) -> Result<()>;
}

impl Fetcher for RemoteHost {
    fn extract(&self, archive: &str) -> Result<Extraction> {
        self.extract_remote(archive, None)
    }

    fn fetch(&self, remote: &str, local_dir: &Path) -> Result<Option<PathBuf>> {
        self.transfer(remote, local_dir)
    }

    fn remove_temp_dir(&self, dir: &str) -> Result<()> {
        self.remove_remote_dir(dir, true)
    }
}

/// Carries out `plan`: unpack, fetch and drop the temp dir, or fetch
/// directly. A failed cleanup only warns.
pub fn execute_plan(fetcher: &dyn Fetcher, plan: &DownloadPlan) -> Result<Option<PathBuf>> {
    let artifact = if plan.extract {
        let extraction = fetcher.extract(&plan.remote_source)?;
        let artifact = fetcher.fetch(&extraction.remote_path, &plan.destination)?;
        if let Err(e) = fetcher.remove_temp_dir(&extraction.directory) {
            tracing::warn!("Cleanup of {} failed: {}", extraction.directory, e);
        }
        artifact
    } else {
        fetcher.fetch(&plan.remote_source, &plan.destination)?
    };

    if let Some(path) = &artifact {
        finalize_artifact(path)?;
    }
    Ok(artifact)
}

/// Single files get mode 0644. Fetched directories keep theirs.
pub fn finalize_artifact(path: &Path) -> Result<()> {
    if path.is_file() {
        set_mode(path, FILE_MODE)?;
    }
    Ok(())
}

/// Creates `dir` with mode 0755, or puts an existing one back to 0755.
pub fn prepare_destination(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        set_mode(dir, DIR_MODE)?;
        return Ok(());
    }
    match mode_of(dir)? {
        Some(mode) if mode != DIR_MODE => {
            tracing::info!("Fixing mode of {:?}: {:o} -> {:o}", dir, mode, DIR_MODE);
            set_mode(dir, DIR_MODE)?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(unix)]
fn mode_of(path: &Path) -> io::Result<Option<u32>> {
    use std::os::unix::fs::PermissionsExt;
    Ok(Some(fs::metadata(path)?.permissions().mode() & 0o777))
}

#[cfg(not(unix))]
fn mode_of(_path: &Path) -> io::Result<Option<u32>> {
    Ok(None)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
