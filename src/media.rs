//! Release-name classification.
//!
//! Listing items only need three answers from this layer: does a name look
//! like an episode, does it look like a movie, and where would such a file
//! live locally.

use regex::Regex;
use std::path::{Path, PathBuf};

use crate::models::MediaType;

pub trait MediaClassifier {
    fn is_episode(&self, name: &str) -> bool;

    fn is_movie(&self, name: &str) -> bool;

    /// Local directory a file of `kind` found at remote `path` belongs in.
    fn correct_location(&self, path: &Path, kind: MediaType) -> Option<PathBuf>;

    /// Episode is checked first: episode names frequently carry a year too.
    fn classify(&self, name: &str) -> Option<MediaType> {
        if self.is_episode(name) {
            Some(MediaType::Episode)
        } else if self.is_movie(name) {
            Some(MediaType::Movie)
        } else {
            None
        }
    }
}

/// Classifier for scene-style release names
/// (`Show.S01E02.1080p...`, `Movie.2019.1080p...`).
#[derive(Debug)]
pub struct ReleaseNameClassifier {
    movies_dir: PathBuf,
    tv_dir: PathBuf,
    episode_patterns: Vec<Regex>,
    movie_pattern: Regex,
    separators: Regex,
}

impl ReleaseNameClassifier {
    pub fn new(movies_dir: PathBuf, tv_dir: PathBuf) -> Self {
        Self {
            movies_dir,
            tv_dir,
            episode_patterns: vec![
                Regex::new(r"(?i)(?:^|[\s._\-])S(\d{1,2})E(\d{1,3})").expect("valid regex"),
                Regex::new(r"(?i)(?:^|[\s._\-])S(\d{1,2})(?:[\s._\-]|$)").expect("valid regex"),
                Regex::new(r"(?:^|[\s._\-])(\d{1,2})x(\d{2,3})(?:[\s._\-]|$)").expect("valid regex"),
            ],
            movie_pattern: Regex::new(r"(?:^|[\s._(\[\-])((?:19|20)\d{2})(?:[\s._)\]\-]|$)")
                .expect("valid regex"),
            separators: Regex::new(r"[._]+").expect("valid regex"),
        }
    }

    /// Human show title from a release name: everything before the season
    /// marker, separators turned into spaces.
    pub fn show_title(&self, name: &str) -> Option<String> {
        let start = self
            .episode_patterns
            .iter()
            .filter_map(|pattern| pattern.find(name))
            .map(|m| m.start())
            .min()?;
        let title = self.separators.replace_all(&name[..start], " ");
        let title = title.trim().trim_end_matches('-').trim();
        if title.is_empty() {
            None
        } else {
            Some(title.to_string())
        }
    }
}

impl MediaClassifier for ReleaseNameClassifier {
    fn is_episode(&self, name: &str) -> bool {
        self.episode_patterns.iter().any(|p| p.is_match(name))
    }

    fn is_movie(&self, name: &str) -> bool {
        self.movie_pattern.is_match(name)
    }

    fn correct_location(&self, path: &Path, kind: MediaType) -> Option<PathBuf> {
        match kind {
            MediaType::Movie => Some(self.movies_dir.clone()),
            MediaType::Episode => {
                let candidates = [path.file_name(), path.parent().and_then(Path::file_name)];
                candidates
                    .into_iter()
                    .flatten()
                    .filter_map(|name| name.to_str())
                    .find_map(|name| self.show_title(name))
                    .map(|title| self.tv_dir.join(title))
            }
            MediaType::Unknown => None,
        }
    }
}
