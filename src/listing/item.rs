use once_cell::sync::Lazy;
use regex::Regex;
use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::media::MediaClassifier;
use crate::models::MediaType;
use crate::remote::is_strictly_under;

static MULTI_VOLUME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.part(\d{2,3})\.rar$").expect("volume regex should compile"));

const IGNORE_MARKERS: [&str; 3] = ["sample", "subs", "subpack"];

/// Why a listing line was rejected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LineError {
    #[error("expected 3 fields, got {0}")]
    FieldCount(usize),
    #[error("'{path}' is not under '{root}'")]
    OutsideRoot { path: String, root: String },
    #[error("bad size '{0}'")]
    Size(String),
    #[error("bad timestamp '{0}'")]
    Timestamp(String),
}

/// One line of `find -printf "%T@ | %s | %p\n"` output.
#[derive(Debug, Clone)]
pub struct ListingItem {
    raw: String,
    path: String,
    size: u64,
    timestamp: i64,
    host: String,
    files_root: String,
    index: Option<usize>,
    media_type: OnceCell<MediaType>,
    downloaded: bool,
}

impl ListingItem {
    pub fn parse(line: &str, host: &str, files_root: &str) -> std::result::Result<Self, LineError> {
        let raw = line.trim_end_matches(['\r', '\n']);
        let parts: Vec<&str> = raw.split(" | ").collect();
        if parts.len() != 3 {
            return Err(LineError::FieldCount(parts.len()));
        }

        let (ts_field, size_field, path) = (parts[0], parts[1], parts[2]);

        if !is_strictly_under(path, files_root) {
            return Err(LineError::OutsideRoot {
                path: path.to_string(),
                root: files_root.to_string(),
            });
        }

        let size = size_field
            .parse::<u64>()
            .map_err(|_| LineError::Size(size_field.to_string()))?;

        let integral = ts_field.split('.').next().unwrap_or_default();
        let timestamp = integral
            .parse::<i64>()
            .map_err(|_| LineError::Timestamp(ts_field.to_string()))?;

        Ok(Self {
            raw: raw.to_string(),
            path: path.to_string(),
            size,
            timestamp,
            host: host.to_string(),
            files_root: files_root.to_string(),
            index: None,
            media_type: OnceCell::new(),
            downloaded: false,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = Some(index);
    }

    pub fn is_downloaded(&self) -> bool {
        self.downloaded
    }

    pub(crate) fn mark_downloaded(&mut self) {
        self.downloaded = true;
    }

    pub fn name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    pub fn parent_name(&self) -> &str {
        Path::new(&self.path)
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    fn has_extension(&self, ext: &str) -> bool {
        Path::new(&self.path)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext))
    }

    pub fn is_archive(&self) -> bool {
        self.has_extension("rar")
    }

    pub fn is_video(&self) -> bool {
        self.has_extension("mkv")
    }

    /// Whether the item should be offered at all. Samples, subtitle packs
    /// and the trailing volumes of split archives are hidden.
    pub fn is_valid(&self) -> bool {
        let name = self.name().to_lowercase();
        let parent = self.parent_name().to_lowercase();

        if IGNORE_MARKERS
            .iter()
            .any(|m| name.contains(m) || parent.contains(m))
        {
            return false;
        }

        if self.is_archive() {
            // later volumes come along with the release directory
            if let Some(caps) = MULTI_VOLUME.captures(&name) {
                if &caps[1] != "01" {
                    return false;
                }
            }
            if parent.contains("subpack") || parent.contains("subs") {
                return false;
            }
        }

        if self.is_video() && parent.contains("sample") {
            return false;
        }

        true
    }

    pub fn media_type(&self, classifier: &dyn MediaClassifier) -> MediaType {
        *self.media_type.get_or_init(|| {
            classifier
                .classify(self.name())
                .or_else(|| classifier.classify(self.parent_name()))
                .unwrap_or(MediaType::Unknown)
        })
    }

    /// Remote path to hand to the transfer. Archives are fetched as their
    /// whole release directory.
    pub fn remote_download_path(&self) -> Result<String> {
        if !self.is_archive() {
            return Ok(self.path.clone());
        }

        let parent = Path::new(&self.path)
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or_default();
        if Path::new(parent) == Path::new(&self.files_root) {
            return Err(Error::ArchiveInRoot {
                path: self.path.clone(),
            });
        }
        Ok(parent.to_string())
    }

    /// Existing local directory this item belongs in, if it can be worked out.
    pub fn local_destination(&self, classifier: &dyn MediaClassifier) -> Option<PathBuf> {
        let kind = self.media_type(classifier);
        if kind == MediaType::Unknown {
            return None;
        }
        classifier
            .correct_location(Path::new(&self.path), kind)
            .filter(|dir| dir.is_dir())
    }

    /// Every term must occur in the name.
    pub fn matches_filter<S: AsRef<str>>(&self, terms: &[S], case_sensitive: bool) -> bool {
        if case_sensitive {
            let name = self.name();
            terms.iter().all(|t| name.contains(t.as_ref()))
        } else {
            let name = self.name().to_lowercase();
            terms
                .iter()
                .all(|t| name.contains(&t.as_ref().to_lowercase()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ReleaseNameClassifier;
    use pretty_assertions::assert_eq;

    const ROOT: &str = "/home/u/files";

    fn item(line: &str) -> ListingItem {
        ListingItem::parse(line, "box1", ROOT).unwrap()
    }

    fn at(path: &str) -> ListingItem {
        item(&format!("1600000000.5 | 1024 | {}", path))
    }

    fn classifier(movies: &Path, tv: &Path) -> ReleaseNameClassifier {
        ReleaseNameClassifier::new(movies.to_path_buf(), tv.to_path_buf())
    }

    #[test]
    fn test_parse_well_formed_line() {
        let i = item("1623879181.75 | 4025725826 | /home/u/files/Show.S04.1080p.WEB.H264-GRP/Show.S04E02.iNTERNAL.1080p.WEB.H264-GRP.mkv");
        assert!(i.is_valid());
        assert_eq!(i.timestamp(), 1623879181);
        assert_eq!(i.size(), 4025725826);
        assert_eq!(
            i.path(),
            "/home/u/files/Show.S04.1080p.WEB.H264-GRP/Show.S04E02.iNTERNAL.1080p.WEB.H264-GRP.mkv"
        );
        assert_eq!(i.parent_name(), "Show.S04.1080p.WEB.H264-GRP");
        assert_eq!(i.host(), "box1");
        assert_eq!(i.index(), None);
        assert!(!i.is_downloaded());

        let c = classifier(Path::new("/nonexistent/m"), Path::new("/nonexistent/tv"));
        assert_eq!(i.media_type(&c), MediaType::Episode);
    }

    #[test]
    fn test_parse_integer_timestamp() {
        let i = item("1600000000 | 0 | /home/u/files/a.mkv");
        assert_eq!(i.timestamp(), 1600000000);
        assert_eq!(i.size(), 0);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        let parse = |l: &str| ListingItem::parse(l, "box1", ROOT).unwrap_err();
        assert_eq!(parse("1600000000 | 10"), LineError::FieldCount(2));
        assert_eq!(
            parse("1600000000 | 10 | /home/u/files/a | b.mkv"),
            LineError::FieldCount(4)
        );
        assert!(matches!(
            parse("1600000000 | 10 | /srv/other/a.mkv"),
            LineError::OutsideRoot { .. }
        ));
        assert!(matches!(
            parse("1600000000 | 10 | /home/u/files"),
            LineError::OutsideRoot { .. }
        ));
        assert!(matches!(
            parse("1600000000 | 10 | /home/u/filesystem/a.mkv"),
            LineError::OutsideRoot { .. }
        ));
        assert!(matches!(
            parse("1600000000 | 10 | /home/u/files/../etc/x.mkv"),
            LineError::OutsideRoot { .. }
        ));
        assert_eq!(
            parse("1600000000 | -5 | /home/u/files/a.mkv"),
            LineError::Size("-5".to_string())
        );
        assert_eq!(
            parse("abc.5 | 5 | /home/u/files/a.mkv"),
            LineError::Timestamp("abc.5".to_string())
        );
    }

    #[test]
    fn test_ignore_markers() {
        assert!(!at("/home/u/files/Movie.2019/Sample/movie-sample.mkv").is_valid());
        assert!(!at("/home/u/files/Movie.2019/movie.SAMPLE.mkv").is_valid());
        assert!(!at("/home/u/files/Movie.2019/Subs/movie.subs.rar").is_valid());
        assert!(!at("/home/u/files/Movie.2019.Subpack/movie.rar").is_valid());
        assert!(!at("/home/u/files/Movie.2019/sample/movie.mkv").is_valid());
        assert!(at("/home/u/files/Movie.2019/movie.mkv").is_valid());
        assert!(at("/home/u/files/Movie.2019/movie.rar").is_valid());
    }

    #[test]
    fn test_only_first_volume_is_valid() {
        let valid: Vec<String> = (1..=20)
            .map(|n| at(&format!("/home/u/files/Movie.2019/movie.part{:02}.rar", n)))
            .filter(|i| i.is_valid())
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(valid, vec!["movie.part01.rar".to_string()]);

        assert!(!at("/home/u/files/Movie.2019/movie.part001.rar").is_valid());
        assert!(!at("/home/u/files/Movie.2019/movie.part100.rar").is_valid());
    }

    #[test]
    fn test_remote_download_path() {
        let rar = at("/home/u/files/Movie.2019.1080p/movie.part01.rar");
        assert_eq!(
            rar.remote_download_path().unwrap(),
            "/home/u/files/Movie.2019.1080p"
        );

        let mkv = at("/home/u/files/Movie.2019.1080p/movie.mkv");
        assert_eq!(
            mkv.remote_download_path().unwrap(),
            "/home/u/files/Movie.2019.1080p/movie.mkv"
        );

        let bare = at("/home/u/files/movie.rar");
        assert!(matches!(
            bare.remote_download_path(),
            Err(Error::ArchiveInRoot { .. })
        ));
    }

    #[test]
    fn test_media_type_falls_back_to_parent() {
        let c = classifier(Path::new("/m"), Path::new("/tv"));
        assert_eq!(
            at("/home/u/files/Some.Movie.2019.1080p-GRP/grp-sm-1080p.rar").media_type(&c),
            MediaType::Movie
        );
        assert_eq!(
            at("/home/u/files/misc/clip.mkv").media_type(&c),
            MediaType::Unknown
        );
    }

    #[test]
    fn test_local_destination_requires_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let movies = dir.path().join("movies");
        let tv = dir.path().join("tv");
        std::fs::create_dir_all(tv.join("Show")).unwrap();
        let c = classifier(&movies, &tv);

        let episode = at("/home/u/files/Show.S04.1080p/Show.S04E02.1080p.mkv");
        assert_eq!(episode.local_destination(&c), Some(tv.join("Show")));

        let movie = at("/home/u/files/Movie.2019.1080p/Movie.2019.1080p.mkv");
        assert_eq!(movie.local_destination(&c), None);
        std::fs::create_dir_all(&movies).unwrap();
        assert_eq!(movie.local_destination(&c), Some(movies));

        assert_eq!(at("/home/u/files/misc/clip.mkv").local_destination(&c), None);
    }

    #[test]
    fn test_matches_filter() {
        let i = at("/home/u/files/x/Show.S04E02.1080p.mkv");
        let none: [&str; 0] = [];
        assert!(i.matches_filter(&none, true));
        assert!(i.matches_filter(&["show"], false));
        assert!(!i.matches_filter(&["show"], true));
        assert!(i.matches_filter(&["Show", "1080p"], true));
        assert!(!i.matches_filter(&["show", "720p"], false));
    }
}
