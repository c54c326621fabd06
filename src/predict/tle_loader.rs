use std::fs;
use std::path::{Path, PathBuf};

use crate::predict::error::PredictError;
use crate::predict::types::OrbitalElements;

/// Anything that can hand the planner the current set of orbital elements.
/// Called once per planning cycle, so implementations should re-read their
/// backing store rather than cache.
pub trait ElementSource {
    fn load(&self) -> Result<ElementSet, PredictError>;
}

/// Raw element blocks, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementSet {
    entries: Vec<OrbitalElements>,
}

impl ElementSet {
    pub fn new(entries: Vec<OrbitalElements>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a configured satellite. An exact title match wins; otherwise
    /// the first title that starts with `name` as a whole word, so `NOAA 19`
    /// finds `NOAA 19 [+]` but `NOAA 1` does not find `NOAA 15`.
    pub fn find(&self, name: &str) -> Option<&OrbitalElements> {
        let wanted = name.trim();
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(wanted))
            .or_else(|| self.entries.iter().find(|e| title_matches(&e.name, wanted)))
    }
}

impl ElementSource for ElementSet {
    fn load(&self) -> Result<ElementSet, PredictError> {
        Ok(self.clone())
    }
}

fn title_matches(title: &str, name: &str) -> bool {
    let title = title.to_ascii_uppercase();
    let name = name.to_ascii_uppercase();
    match title.strip_prefix(&name) {
        Some(rest) => rest.chars().next().map_or(true, |c| !c.is_ascii_alphanumeric()),
        None => false,
    }
}

/// Reads `*.tle` / `*.txt` files from a directory that is refreshed out of band.
pub struct TleLoader {
    tle_dir: PathBuf,
}

impl TleLoader {
    pub fn new(tle_dir: PathBuf) -> Self {
        Self { tle_dir }
    }

    /// Load all TLE files from the directory
    pub fn load_all(&self) -> Result<ElementSet, PredictError> {
        if !self.tle_dir.exists() {
            return Err(PredictError::DirectoryNotFound(
                self.tle_dir.display().to_string(),
            ));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.tle_dir)? {
            let path = entry?.path();
            let is_tle = path
                .extension()
                .is_some_and(|ext| ext == "tle" || ext == "txt");
            if path.is_file() && is_tle {
                paths.push(path);
            }
        }
        paths.sort();

        let mut entries = Vec::new();
        for path in paths {
            match Self::read_tle_file(&path) {
                Ok(mut found) => entries.append(&mut found),
                Err(e) => {
                    log::warn!("Failed to read TLE file {}: {}", path.display(), e);
                    // Continue with other files
                }
            }
        }

        log::debug!(
            "Loaded {} element sets from {}",
            entries.len(),
            self.tle_dir.display()
        );
        Ok(ElementSet::new(entries))
    }

    /// Read a single TLE file (may contain multiple satellites)
    fn read_tle_file(path: &Path) -> Result<Vec<OrbitalElements>, PredictError> {
        let content = fs::read_to_string(path)?;
        let filename = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        Ok(parse_multi_tle(&content)
            .into_iter()
            .map(|(name, line1, line2)| OrbitalElements {
                name: name.unwrap_or_else(|| format!("NORAD {}", catalog_number(&line1))),
                line1,
                line2,
                source: filename.clone(),
            })
            .collect())
    }
}

impl ElementSource for TleLoader {
    fn load(&self) -> Result<ElementSet, PredictError> {
        self.load_all()
    }
}

fn catalog_number(line1: &str) -> &str {
    line1.get(2..7).map(str::trim).unwrap_or("?")
}

/// Parse multi-satellite TLE content
fn parse_multi_tle(content: &str) -> Vec<(Option<String>, String, String)> {
    let lines: Vec<&str> = content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();

    let mut result = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if lines[i].starts_with("1 ") && i + 1 < lines.len() && lines[i + 1].starts_with("2 ") {
            // 2-line TLE (no name)
            result.push((None, lines[i].to_string(), lines[i + 1].to_string()));
            i += 2;
        } else if i + 2 < lines.len()
            && lines[i + 1].starts_with("1 ")
            && lines[i + 2].starts_with("2 ")
        {
            // 3-line TLE (with name)
            let name = lines[i].trim_start_matches("0 ").trim().to_string();
            result.push((Some(name), lines[i + 1].to_string(), lines[i + 2].to_string()));
            i += 3;
        } else {
            i += 1; // Skip unknown line
        }
    }

    result
}
