//! Per-group output writer cache (spec §4.6): one file per group seen
//! during a run, opened on demand, flushed after every record, closed at
//! shutdown.
//!
//! Grounded on the download manager's domain-keyed `DashMap` pattern
//! ([`crate::download::RateLimiter`]): one entry per group, each behind its
//! own `tokio::sync::Mutex` so writes to different groups never contend.

use std::io::Write;
use std::path::PathBuf;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::conversion::assemble::CatalogRecord;

use super::marc_xml::{self, COLLECTION_CLOSE, COLLECTION_OPEN};

#[derive(Debug, Error)]
pub enum WriterCacheError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir { path: String, source: std::io::Error },

    #[error("failed to open output file {path}: {source}")]
    OpenFile { path: String, source: std::io::Error },

    #[error("failed to write record to {path}: {source}")]
    Write { path: String, source: std::io::Error },
}

struct OpenWriter {
    file: std::fs::File,
    path: PathBuf,
}

/// Lazily-opened, per-group output files under `<output_dir>/<group_output_folder>/<output_filename>`.
pub struct WriterCache {
    output_dir: PathBuf,
    output_filename: String,
    writers: DashMap<String, Mutex<OpenWriter>>,
}

impl WriterCache {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, output_filename: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            output_filename: output_filename.into(),
            writers: DashMap::new(),
        }
    }

    fn path_for_group(&self, group_output_folder: &str) -> PathBuf {
        self.output_dir.join(group_output_folder).join(&self.output_filename)
    }

    #[instrument(skip(self))]
    async fn open_writer(&self, group_output_folder: &str) -> Result<(), WriterCacheError> {
        if self.writers.contains_key(group_output_folder) {
            return Ok(());
        }
        let dir = self.output_dir.join(group_output_folder);
        std::fs::create_dir_all(&dir).map_err(|source| WriterCacheError::CreateDir {
            path: dir.display().to_string(),
            source,
        })?;
        let path = self.path_for_group(group_output_folder);
        let is_new = !path.exists();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| WriterCacheError::OpenFile {
                path: path.display().to_string(),
                source,
            })?;
        if is_new {
            file.write_all(COLLECTION_OPEN.as_bytes()).map_err(|source| WriterCacheError::Write {
                path: path.display().to_string(),
                source,
            })?;
            file.flush().map_err(|source| WriterCacheError::Write {
                path: path.display().to_string(),
                source,
            })?;
        }
        self.writers.insert(group_output_folder.to_string(), Mutex::new(OpenWriter { file, path }));
        Ok(())
    }

    /// Appends `record`'s serialization and flushes immediately (spec §4.6:
    /// "all writers are flushed after every record").
    #[instrument(skip(self, record))]
    pub async fn write_record(&self, group_output_folder: &str, record: &CatalogRecord) -> Result<(), WriterCacheError> {
        self.open_writer(group_output_folder).await?;
        #[allow(clippy::expect_used)]
        let entry = self.writers.get(group_output_folder).expect("just opened above");
        let mut writer = entry.lock().await;
        let xml = marc_xml::serialize_record(record);
        writer.file.write_all(xml.as_bytes()).map_err(|source| WriterCacheError::Write {
            path: writer.path.display().to_string(),
            source,
        })?;
        writer.file.flush().map_err(|source| WriterCacheError::Write {
            path: writer.path.display().to_string(),
            source,
        })
    }

    /// Closes every open writer (spec §4.6: "on driver shutdown, all
    /// writers are closed"), appending the collection's closing tag.
    #[instrument(skip(self))]
    pub async fn close_all(&self) -> Result<(), WriterCacheError> {
        for entry in self.writers.iter() {
            let mut writer = entry.value().lock().await;
            writer.file.write_all(COLLECTION_CLOSE.as_bytes()).map_err(|source| WriterCacheError::Write {
                path: writer.path.display().to_string(),
                source,
            })?;
            writer.file.flush().map_err(|source| WriterCacheError::Write {
                path: writer.path.display().to_string(),
                source,
            })?;
            info!(path = %writer.path.display(), "closed output writer");
        }
        Ok(())
    }

    #[must_use]
    pub fn path_for(&self, group_output_folder: &str) -> PathBuf {
        self.path_for_group(group_output_folder)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::conversion::assemble::{DataField, Subfield};

    fn sample_record() -> CatalogRecord {
        CatalogRecord {
            leader: "00000nab a2200000uu4500".to_string(),
            control_fields: vec![("001".to_string(), "id".to_string())],
            data_fields: vec![DataField::new("245", vec![Subfield::new('a', "Hello")])],
            identifier: "id".to_string(),
            hash: "hash".to_string(),
            group: "TestGroup".to_string(),
        }
    }

    #[tokio::test]
    async fn write_record_creates_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WriterCache::new(dir.path(), "out.xml");
        cache.write_record("TestGroup", &sample_record()).await.unwrap();

        let path = cache.path_for("TestGroup");
        assert!(path.exists());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("<collection>"));
        assert!(contents.contains("<subfield code=\"a\">Hello</subfield>"));
    }

    #[tokio::test]
    async fn close_all_appends_collection_closing_tag() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WriterCache::new(dir.path(), "out.xml");
        cache.write_record("TestGroup", &sample_record()).await.unwrap();
        cache.close_all().await.unwrap();

        let contents = std::fs::read_to_string(cache.path_for("TestGroup")).unwrap();
        assert!(contents.trim_end().ends_with("</collection>"));
    }

    #[tokio::test]
    async fn separate_groups_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WriterCache::new(dir.path(), "out.xml");
        cache.write_record("GroupA", &sample_record()).await.unwrap();
        cache.write_record("GroupB", &sample_record()).await.unwrap();

        assert!(cache.path_for("GroupA").exists());
        assert!(cache.path_for("GroupB").exists());
        assert_ne!(cache.path_for("GroupA"), cache.path_for("GroupB"));
    }
}
