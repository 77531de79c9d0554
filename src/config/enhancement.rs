//! Side tables consulted during augmentation (§3 "Enhancement maps").
//!
//! Loaded once from plain-text files under `GlobalParams::enhancement_maps_directory`:
//! `author_blocklist.txt` (one blocklisted creator-name token per line),
//! `issn_to_license.txt` (`<issn>\t<license>` per line), and
//! `keyword_vocabulary.txt` (one recognized subject-vocabulary term per line,
//! used to pick the MARC field for keyword terms in §4.4 step 7).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::config::error::ConfigError;

#[derive(Debug, Clone, Default)]
pub struct EnhancementMaps {
    pub author_blocklist: HashSet<String>,
    pub issn_to_license: HashMap<String, String>,
    pub keyword_vocabulary: HashSet<String>,
}

impl EnhancementMaps {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(directory: &Path) -> Result<Self, ConfigError> {
        let author_blocklist = read_lines(&directory.join("author_blocklist.txt"))?
            .into_iter()
            .collect();
        let keyword_vocabulary = read_lines(&directory.join("keyword_vocabulary.txt"))?
            .into_iter()
            .collect();

        let mut issn_to_license = HashMap::new();
        for line in read_lines(&directory.join("issn_to_license.txt"))? {
            if let Some((issn, license)) = line.split_once('\t') {
                issn_to_license.insert(issn.to_string(), license.to_string());
            }
        }

        Ok(Self {
            author_blocklist,
            issn_to_license,
            keyword_vocabulary,
        })
    }

    pub fn is_blocklisted_token(&self, token: &str) -> bool {
        self.author_blocklist.contains(token)
    }

    pub fn license_for_issn(&self, issn: &str) -> Option<&str> {
        self.issn_to_license.get(issn).map(String::as_str)
    }

    pub fn is_vocabulary_term(&self, keyword: &str) -> bool {
        self.keyword_vocabulary.contains(keyword)
    }
}

/// Side files are optional; a missing file means an empty table rather than
/// a fatal error (only the directory itself, if configured, must exist).
fn read_lines(path: &Path) -> Result<Vec<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(ConfigError::EnhancementMaps {
            path: path.display().to_string(),
            source,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_yields_empty_maps() {
        let maps = EnhancementMaps::load(Path::new("/nonexistent/path/for/test")).unwrap();
        assert!(maps.author_blocklist.is_empty());
        assert!(maps.issn_to_license.is_empty());
    }

    #[test]
    fn load_parses_all_three_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("author_blocklist.txt"), "Jr.\nPhD\n").unwrap();
        std::fs::write(dir.path().join("issn_to_license.txt"), "1234-5678\tLF\n").unwrap();
        std::fs::write(dir.path().join("keyword_vocabulary.txt"), "Machine Learning\n").unwrap();

        let maps = EnhancementMaps::load(dir.path()).unwrap();
        assert!(maps.is_blocklisted_token("Jr."));
        assert_eq!(maps.license_for_issn("1234-5678"), Some("LF"));
        assert!(maps.is_vocabulary_term("Machine Learning"));
    }
}
