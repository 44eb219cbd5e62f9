//! Read-only views of the local movie/episode stores used for dedup.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub trait Catalog {
    /// Whether an entry with primary key `key` exists.
    fn contains(&self, key: &str) -> bool;
}

impl Catalog for HashSet<String> {
    fn contains(&self, key: &str) -> bool {
        HashSet::contains(self, key)
    }
}

/// A catalog stored as one JSON object keyed by primary key.
#[derive(Debug, Default)]
pub struct JsonCatalog {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl JsonCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Catalog {:?} not found, treating as empty", path);
            return Ok(Self {
                path: path.to_path_buf(),
                entries: Map::new(),
            });
        }

        let content = fs::read_to_string(path)?;
        let entries: Map<String, Value> = serde_json::from_str(&content)?;
        tracing::debug!("Loaded {} entries from catalog {:?}", entries.len(), path);

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Catalog for JsonCatalog {
    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_json_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movies.json");
        fs::write(
            &path,
            r#"{"Some.Movie.2019.1080p.mkv": {"title": "Some Movie"}, "other.mkv": {}}"#,
        )
        .unwrap();

        let catalog = JsonCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("Some.Movie.2019.1080p.mkv"));
        assert!(!catalog.contains("some.movie.2019.1080p.mkv"));
    }

    #[test]
    fn test_missing_catalog_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = JsonCatalog::load(&dir.path().join("nope.json")).unwrap();
        assert!(catalog.is_empty());
        assert!(!catalog.contains("anything"));
    }

    #[test]
    fn test_malformed_catalog_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "[1, 2").unwrap();
        assert!(JsonCatalog::load(&path).is_err());
    }
}
