//! Progress tracking for `unrar e` output.
//!
//! unrar's exit code says nothing about where the output landed, so the
//! destination and file names are recovered from what it prints:
//!
//! ```text
//! Extracting from /home/u/files/Movie.2019/movie.part01.rar
//! Extracting  /home/u/tmp/boxfetch.a1/movie.mkv        3%
//! ...         movie.mkv                               45%
//! Extracting from /home/u/files/Movie.2019/movie.part02.rar
//! ...         movie.mkv                               OK
//! All OK
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,3})%").expect("percent regex should compile"));

/// A file name followed by unrar's progress column.
static NAME_BEFORE_PROGRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*?)\s+(?:\d{1,3}%|OK\b)").expect("progress regex should compile")
});

const BACKSPACE: char = '\u{8}';

#[derive(Debug, Default)]
pub struct UnpackProgressParser {
    percentage: u8,
    current_file: Option<String>,
    current_volume: Option<String>,
    source_dir: Option<String>,
    destination_dir: Option<String>,
    extracted_files: Vec<String>,
    header_emitted: bool,
    completion_reported: Option<String>,
    changed: bool,
}

impl UnpackProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one line of output. Returns whether anything changed.
    pub fn feed(&mut self, line: &str) -> bool {
        self.changed = false;

        let clean: String = line.chars().filter(|c| *c != BACKSPACE).collect();
        let line = clean.trim();
        if line.is_empty() {
            return false;
        }

        if let Some(rest) = line.strip_prefix("Extracting from") {
            let (dir, name) = split_path(rest.trim());
            self.update_source_dir(dir);
            self.update_volume(name);
        }

        if line.starts_with("Extracting") && !line.starts_with("Extracting from") {
            let rest = line.trim_start_matches("Extracting");
            if let Some(target) = name_before_progress(rest) {
                let (dir, name) = split_path(&target);
                self.update_destination_dir(dir);
                self.update_file(name);
            }
        }

        let all_ok = line.to_lowercase().contains("all ok");

        if let Some(rest) = line.strip_prefix("...") {
            if !all_ok {
                if let Some(name) = name_before_progress(rest) {
                    self.update_file(Some(name));
                }
            }
            let pct = PERCENT
                .captures_iter(rest)
                .last()
                .and_then(|caps| caps[1].parse::<u16>().ok());
            if let Some(pct) = pct {
                self.update_percentage(pct.min(100) as u8);
            }
        }

        if all_ok {
            if let Some(file) = self.current_file.clone() {
                self.record_extracted(file);
            }
            self.update_percentage(100);
        }

        self.changed
    }

    /// Human status for the last `feed`, if there is anything new to show.
    pub fn status_string(&mut self) -> Option<String> {
        if !self.header_emitted {
            if let Some(volume) = &self.current_volume {
                let source = join(self.source_dir.as_deref(), volume);
                self.header_emitted = true;
                return Some(format!("extracting from {}\n", source));
            }
        }

        if !self.changed {
            return None;
        }

        let file = self.current_file.clone()?;
        if self.percentage < 100 {
            return Some(format!("\r{}: {}%", file, self.percentage));
        }

        self.record_extracted(file.clone());
        if self.completion_reported.as_deref() == Some(file.as_str()) {
            return None;
        }
        self.completion_reported = Some(file.clone());
        let destination = join(self.destination_dir.as_deref(), &file);
        Some(format!("\r{}: 100% -> {}\n", file, destination))
    }

    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    pub fn current_file(&self) -> Option<&str> {
        self.current_file.as_deref()
    }

    pub fn current_volume(&self) -> Option<&str> {
        self.current_volume.as_deref()
    }

    pub fn source_dir(&self) -> Option<&str> {
        self.source_dir.as_deref()
    }

    pub fn destination_dir(&self) -> Option<&str> {
        self.destination_dir.as_deref()
    }

    pub fn extracted_files(&self) -> &[String] {
        &self.extracted_files
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    fn record_extracted(&mut self, file: String) {
        if !self.extracted_files.contains(&file) {
            self.extracted_files.push(file);
            self.changed = true;
        }
    }

    fn update_percentage(&mut self, value: u8) {
        if self.percentage != value {
            self.percentage = value;
            self.changed = true;
        }
    }

    fn update_file(&mut self, value: Option<String>) {
        update(&mut self.current_file, value, &mut self.changed);
    }

    fn update_volume(&mut self, value: Option<String>) {
        update(&mut self.current_volume, value, &mut self.changed);
    }

    fn update_source_dir(&mut self, value: Option<String>) {
        update(&mut self.source_dir, value, &mut self.changed);
    }

    fn update_destination_dir(&mut self, value: Option<String>) {
        update(&mut self.destination_dir, value, &mut self.changed);
    }
}

fn update(field: &mut Option<String>, value: Option<String>, changed: &mut bool) {
    if value.is_some() && *field != value {
        *field = value;
        *changed = true;
    }
}

/// Strips the trailing progress column (`45%`, `OK`) unrar prints after a name.
fn name_before_progress(text: &str) -> Option<String> {
    let text = text.trim();
    let name = match NAME_BEFORE_PROGRESS.captures(text) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => text,
    };
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn split_path(path: &str) -> (Option<String>, Option<String>) {
    let path = Path::new(path);
    let dir = path
        .parent()
        .and_then(|p| p.to_str())
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string);
    (dir, name)
}

fn join(dir: Option<&str>, name: &str) -> String {
    match dir {
        Some(dir) => format!("{}/{}", dir.trim_end_matches('/'), name),
        None => name.to_string(),
    }
}
