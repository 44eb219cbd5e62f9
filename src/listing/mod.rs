//! Aggregated view of completed downloads across all hosts.

mod item;

pub use item::{LineError, ListingItem};

use chrono::{DateTime, Local};
use std::fmt;
use std::str::FromStr;

use crate::catalog::Catalog;

/// How a caller selects an item: by its assigned index or its exact name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKey {
    Index(usize),
    Name(String),
}

impl From<usize> for ItemKey {
    fn from(index: usize) -> Self {
        ItemKey::Index(index)
    }
}

impl From<&str> for ItemKey {
    fn from(name: &str) -> Self {
        ItemKey::Name(name.to_string())
    }
}

impl FromStr for ItemKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<usize>() {
            Ok(index) => ItemKey::Index(index),
            Err(_) => ItemKey::Name(s.to_string()),
        })
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Index(index) => write!(f, "#{}", index),
            ItemKey::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Default)]
pub struct Listing {
    items: Vec<ListingItem>,
    sorted: bool,
}

impl Listing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses raw listing output from `host`, keeping valid items only.
    pub fn ingest<I, S>(&mut self, lines: I, host: &str, files_root: &str)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.items.len();
        for line in lines {
            let line = line.as_ref();
            match ListingItem::parse(line, host, files_root) {
                Ok(item) if item.is_valid() => self.items.push(item),
                Ok(item) => tracing::trace!("Skipping ignored item {}", item.path()),
                Err(e) => tracing::trace!("Dropping listing line {:?}: {}", line, e),
            }
        }

        let added = self.items.len() - before;
        if added > 0 {
            // new items need indices
            self.sorted = false;
        }
        tracing::debug!("Ingested {} items from {}", added, host);
    }

    /// Orders by timestamp, oldest first, and numbers items from 1.
    /// Only the first call after ingesting does anything.
    pub fn sort(&mut self) {
        if self.sorted {
            return;
        }
        self.items.sort_by_key(|item| item.timestamp());
        for (i, item) in self.items.iter_mut().enumerate() {
            item.set_index(i + 1);
        }
        self.sorted = true;
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn get(&self, key: &ItemKey) -> Option<&ListingItem> {
        match key {
            ItemKey::Index(index) => self.items.iter().find(|i| i.index() == Some(*index)),
            ItemKey::Name(name) => self.items.iter().find(|i| i.name() == name),
        }
    }

    /// Marks items whose name already has an entry in one of `catalogs`.
    pub fn reconcile(&mut self, catalogs: &[Box<dyn Catalog>]) {
        let mut hits = 0;
        for item in self.items.iter_mut() {
            let keys = dedup_keys(item.name());
            let found = catalogs
                .iter()
                .any(|catalog| keys.iter().any(|key| catalog.contains(key)));
            if found {
                item.mark_downloaded();
                hits += 1;
            }
        }
        tracing::debug!("{} of {} items already downloaded", hits, self.items.len());
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ListingItem> {
        self.items.iter()
    }

    pub fn filter<'a, S: AsRef<str>>(
        &'a self,
        terms: &'a [S],
        case_sensitive: bool,
    ) -> impl Iterator<Item = &'a ListingItem> {
        self.items
            .iter()
            .filter(move |item| item.matches_filter(terms, case_sensitive))
    }

    /// One display line: index, downloaded marker, date, size, host, name.
    pub fn render(item: &ListingItem) -> String {
        let index = item
            .index()
            .map(|i| i.to_string())
            .unwrap_or_else(|| "-".to_string());
        let marker = if item.is_downloaded() { '*' } else { ' ' };
        let date = DateTime::from_timestamp(item.timestamp(), 0)
            .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "????-??-?? ??:??".to_string());
        format!(
            "{:>4} {} {} {:>9} {:<8} {}",
            index,
            marker,
            date,
            human_size(item.size()),
            item.host(),
            item.name()
        )
    }
}

/// Names a catalog might file the item under.
fn dedup_keys(name: &str) -> Vec<String> {
    let stem = match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    };
    let mut keys = vec![
        name.to_string(),
        stem.to_string(),
        name.to_lowercase(),
        stem.to_lowercase(),
    ];
    keys.dedup();
    keys
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
