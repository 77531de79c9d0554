//! SQLite-backed delivery-history store (spec §4.5).
//!
//! Grounded on the teacher's `db.rs`: a `SqlitePool` wrapper that enables
//! WAL mode and a busy timeout, then runs the crate's embedded migrations.
//! Every public operation here is its own connection-scoped transaction,
//! matching the §4.5 concurrency note ("operations are independent
//! transactions").

use std::io::{Read, Write};
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::instrument;

use crate::conversion::DeliveryChecker;
use crate::model::{DeliveredRecordEntry, DeliveryState};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT_MS: u32 = 5000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("failed to compress record blob: {0}")]
    Compression(#[from] std::io::Error),
}

pub struct DeliveryStore {
    pool: SqlitePool,
}

impl DeliveryStore {
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;
        Self::init_pool(pool).await
    }

    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init_pool(pool).await
    }

    async fn init_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await.ok();
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Upserts the journal row, updating `journal_name` if it already
    /// exists (spec §4.5: "upsert on `(zeder_id, zeder_instance)`").
    #[instrument(skip(self))]
    pub async fn upsert_journal(&self, zeder_id: i64, zeder_instance: &str, journal_name: &str) -> Result<i64, StoreError> {
        sqlx::query(
            "INSERT INTO zeder_journals (zeder_id, zeder_instance, journal_name) VALUES (?1, ?2, ?3)
             ON CONFLICT (zeder_id, zeder_instance) DO UPDATE SET journal_name = excluded.journal_name",
        )
        .bind(zeder_id)
        .bind(zeder_instance)
        .bind(journal_name)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id FROM zeder_journals WHERE zeder_id = ?1 AND zeder_instance = ?2")
            .bind(zeder_id)
            .bind(zeder_instance)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    /// DOI-bearing URLs match by suffix (spec §4.5, §8 dedup asymmetry);
    /// everything else matches exactly.
    #[instrument(skip(self, ignored_states))]
    pub async fn url_already_delivered(&self, url: &str, ignored_states: &[DeliveryState]) -> Result<Vec<DeliveredRecordEntry>, StoreError> {
        let ignored: Vec<&str> = ignored_states.iter().map(|s| s.as_str()).collect();
        let rows = if let Some(doi_suffix) = doi_suffix_of(url) {
            let pattern = format!("%{doi_suffix}");
            self.query_by_url_pattern(&pattern, &ignored).await?
        } else {
            self.query_by_url_exact(url, &ignored).await?
        };
        Ok(rows)
    }

    async fn query_by_url_exact(&self, url: &str, ignored: &[&str]) -> Result<Vec<DeliveredRecordEntry>, StoreError> {
        let ids: Vec<i64> = sqlx::query("SELECT record_id FROM delivered_marc_records_urls WHERE url = ?1")
            .bind(url)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| r.get::<i64, _>("record_id"))
            .collect();
        self.load_entries(&ids, ignored).await
    }

    async fn query_by_url_pattern(&self, pattern: &str, ignored: &[&str]) -> Result<Vec<DeliveredRecordEntry>, StoreError> {
        let ids: Vec<i64> = sqlx::query("SELECT record_id FROM delivered_marc_records_urls WHERE url LIKE ?1")
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| r.get::<i64, _>("record_id"))
            .collect();
        self.load_entries(&ids, ignored).await
    }

    #[instrument(skip(self, ignored_states))]
    pub async fn hash_already_delivered(&self, hash: &str, ignored_states: &[DeliveryState]) -> Result<Vec<DeliveredRecordEntry>, StoreError> {
        let ignored: Vec<&str> = ignored_states.iter().map(|s| s.as_str()).collect();
        let ids: Vec<i64> = sqlx::query("SELECT id FROM delivered_marc_records WHERE hash = ?1")
            .bind(hash)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| r.get::<i64, _>("id"))
            .collect();
        self.load_entries(&ids, &ignored).await
    }

    #[instrument(skip(self, ignored_states))]
    pub async fn record_already_delivered(&self, url: &str, hash: &str, ignored_states: &[DeliveryState]) -> Result<Vec<DeliveredRecordEntry>, StoreError> {
        let mut by_url = self.url_already_delivered(url, ignored_states).await?;
        let by_hash = self.hash_already_delivered(hash, ignored_states).await?;
        for entry in by_hash {
            if !by_url.iter().any(|e| e.id == entry.id) {
                by_url.push(entry);
            }
        }
        Ok(by_url)
    }

    async fn load_entries(&self, ids: &[i64], ignored: &[&str]) -> Result<Vec<DeliveredRecordEntry>, StoreError> {
        let mut entries = Vec::new();
        for &id in ids {
            let Some(row) = sqlx::query("SELECT id, zeder_journal_id, hash, delivery_state, error_message, delivered_at, main_title FROM delivered_marc_records WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            else {
                continue;
            };
            let state_str: String = row.try_get("delivery_state")?;
            let Some(state) = DeliveryState::parse(&state_str) else {
                continue;
            };
            if ignored.contains(&state_str.as_str()) {
                continue;
            }
            let urls: Vec<String> = sqlx::query("SELECT url FROM delivered_marc_records_urls WHERE record_id = ?1")
                .bind(id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|r| r.get::<String, _>("url"))
                .collect();
            entries.push(DeliveredRecordEntry {
                id,
                urls,
                hash: row.try_get("hash")?,
                main_title: row.try_get("main_title")?,
                zeder_journal_id: row.try_get("zeder_journal_id")?,
                delivery_state: state,
                error_message: row.try_get("error_message")?,
                delivered_at: row.try_get::<NaiveDateTime, _>("delivered_at")?,
            });
        }
        Ok(entries)
    }

    /// Archives a record (spec §4.5): updates an existing row in a retryable
    /// state matching the hash, or inserts a new one, then (re)inserts the
    /// URL set.
    #[instrument(skip(self, record_blob))]
    pub async fn archive(
        &self,
        zeder_journal_id: i64,
        hash: &str,
        main_title: &str,
        urls: &[String],
        state: DeliveryState,
        error_message: Option<&str>,
        record_blob: &[u8],
    ) -> Result<i64, StoreError> {
        let compressed = compress(record_blob)?;

        let existing = self
            .hash_already_delivered(hash, &[])
            .await?
            .into_iter()
            .find(|e| e.delivery_state.is_retryable());

        let record_id = if let Some(existing) = existing {
            sqlx::query(
                "UPDATE delivered_marc_records SET hash = ?1, delivery_state = ?2, error_message = ?3,
                 delivered_at = CURRENT_TIMESTAMP, main_title = ?4, record_blob_compressed = ?5 WHERE id = ?6",
            )
            .bind(hash)
            .bind(state.as_str())
            .bind(error_message)
            .bind(main_title)
            .bind(&compressed)
            .bind(existing.id)
            .execute(&self.pool)
            .await?;
            sqlx::query("DELETE FROM delivered_marc_records_urls WHERE record_id = ?1")
                .bind(existing.id)
                .execute(&self.pool)
                .await?;
            existing.id
        } else {
            let result = sqlx::query(
                "INSERT INTO delivered_marc_records (zeder_journal_id, hash, delivery_state, error_message, main_title, record_blob_compressed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(zeder_journal_id)
            .bind(hash)
            .bind(state.as_str())
            .bind(error_message)
            .bind(main_title)
            .bind(&compressed)
            .execute(&self.pool)
            .await?;
            result.last_insert_rowid()
        };

        for url in urls {
            sqlx::query("INSERT OR IGNORE INTO delivered_marc_records_urls (record_id, url) VALUES (?1, ?2)")
                .bind(record_id)
                .bind(url)
                .execute(&self.pool)
                .await?;
        }

        Ok(record_id)
    }

    #[instrument(skip(self))]
    pub async fn record_blob(&self, record_id: i64) -> Result<Vec<u8>, StoreError> {
        let row = sqlx::query("SELECT record_blob_compressed FROM delivered_marc_records WHERE id = ?1")
            .bind(record_id)
            .fetch_one(&self.pool)
            .await?;
        let compressed: Vec<u8> = row.try_get("record_blob_compressed")?;
        Ok(decompress(&compressed)?)
    }

    #[instrument(skip(self))]
    pub async fn last_upload_time(&self, zeder_id: i64, zeder_instance: &str) -> Result<Option<NaiveDateTime>, StoreError> {
        let row = sqlx::query(
            "SELECT MAX(r.delivered_at) AS last FROM delivered_marc_records r
             JOIN zeder_journals j ON j.id = r.zeder_journal_id
             WHERE j.zeder_id = ?1 AND j.zeder_instance = ?2",
        )
        .bind(zeder_id)
        .bind(zeder_instance)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<Option<NaiveDateTime>, _>("last")?)
    }

    #[instrument(skip(self))]
    pub async fn delete_online_first_older_than(&self, zeder_id: i64, zeder_instance: &str, days: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM delivered_marc_records WHERE id IN (
                SELECT r.id FROM delivered_marc_records r
                JOIN zeder_journals j ON j.id = r.zeder_journal_id
                WHERE j.zeder_id = ?1 AND j.zeder_instance = ?2
                  AND r.delivery_state = 'ONLINE_FIRST'
                  AND r.delivered_at < datetime('now', ?3)
            )",
        )
        .bind(zeder_id)
        .bind(zeder_instance)
        .bind(format!("-{days} days"))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DeliveryChecker for DeliveryStore {
    async fn already_delivered(&self, url: &str, hash: &str) -> bool {
        match self.record_already_delivered(url, hash, &[DeliveryState::Error, DeliveryState::Reset]).await {
            Ok(entries) => !entries.is_empty(),
            Err(_) => false,
        }
    }
}

/// If `url` resolves through a DOI (`doi.org/<suffix>`), returns the suffix
/// used for the §8 "dedup asymmetry" LIKE match.
fn doi_suffix_of(url: &str) -> Option<&str> {
    url.split_once("doi.org/").map(|(_, suffix)| suffix)
}

fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn archive_then_dedup_checks_find_the_record() {
        let store = DeliveryStore::new_in_memory().await.unwrap();
        let journal_id = store.upsert_journal(42, "ixtheo", "Test Journal").await.unwrap();

        store
            .archive(
                journal_id,
                "abc123",
                "Hello",
                &["https://example.org/article/1".to_string()],
                DeliveryState::Automatic,
                None,
                b"<record/>",
            )
            .await
            .unwrap();

        assert!(store.already_delivered("https://example.org/article/1", "abc123").await);
        assert!(store.already_delivered("https://example.org/not-seen", "abc123").await);
        assert!(!store.already_delivered("https://example.org/not-seen", "zzz").await);
    }

    #[tokio::test]
    async fn doi_suffix_matches_stored_url_that_ends_with_it() {
        let store = DeliveryStore::new_in_memory().await.unwrap();
        let journal_id = store.upsert_journal(1, "ixtheo", "J").await.unwrap();
        store
            .archive(
                journal_id,
                "hash1",
                "Title",
                &["https://example.org/resolve?doi=10.1/x".to_string()],
                DeliveryState::Automatic,
                None,
                b"x",
            )
            .await
            .unwrap();

        let entries = store
            .url_already_delivered("https://doi.org/10.1/x", &[])
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);

        let miss = store
            .url_already_delivered("https://doi.org/10.1/other", &[])
            .await
            .unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn retryable_state_is_updated_in_place_on_re_archive() {
        let store = DeliveryStore::new_in_memory().await.unwrap();
        let journal_id = store.upsert_journal(1, "ixtheo", "J").await.unwrap();

        let first_id = store
            .archive(journal_id, "hash1", "Title", &["https://example.org/1".to_string()], DeliveryState::Error, None, b"x")
            .await
            .unwrap();
        let second_id = store
            .archive(journal_id, "hash1", "Title", &["https://example.org/1".to_string()], DeliveryState::Automatic, None, b"y")
            .await
            .unwrap();

        assert_eq!(first_id, second_id);
        let rows: i64 = sqlx::query("SELECT COUNT(*) AS c FROM delivered_marc_records")
            .fetch_one(&store.pool)
            .await
            .unwrap()
            .get("c");
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn record_blob_round_trips_through_compression() {
        let store = DeliveryStore::new_in_memory().await.unwrap();
        let journal_id = store.upsert_journal(1, "ixtheo", "J").await.unwrap();
        let id = store
            .archive(journal_id, "hash1", "Title", &[], DeliveryState::Automatic, None, b"hello world")
            .await
            .unwrap();

        let blob = store.record_blob(id).await.unwrap();
        assert_eq!(blob, b"hello world");
    }

    #[tokio::test]
    async fn delete_online_first_older_than_purges_matching_rows() {
        let store = DeliveryStore::new_in_memory().await.unwrap();
        let journal_id = store.upsert_journal(1, "ixtheo", "J").await.unwrap();
        let id = store
            .archive(journal_id, "hash1", "Title", &[], DeliveryState::OnlineFirst, None, b"x")
            .await
            .unwrap();
        sqlx::query("UPDATE delivered_marc_records SET delivered_at = datetime('now', '-30 days') WHERE id = ?1")
            .bind(id)
            .execute(&store.pool)
            .await
            .unwrap();

        let purged = store.delete_online_first_older_than(1, "ixtheo", 7).await.unwrap();
        assert_eq!(purged, 1);
    }
}
