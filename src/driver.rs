//! Top-level pipeline driver (spec §2, §6): loads configuration, resolves
//! which journals a run covers, runs each one bounded by the journal-level
//! concurrency pool, writes emitted records, and prints the final metrics
//! summary.
//!
//! Grounded on the teacher's `main.rs` orchestration (parse args, build
//! collaborators, run the engine, report stats) generalized from one flat
//! download queue to one [`crate::harvest::run_journal`] per configured
//! journal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::cli::{Args, RunMode};
use crate::config::{self, ConfigError, GlobalParams, GroupParams, HarvesterConfig, JournalParams};
use crate::conversion::language::UnavailableDetector;
use crate::conversion::UnavailableAuthorLookup;
use crate::delivery::store::{DeliveryStore, StoreError};
use crate::download::{DownloadManager, DEFAULT_CACHE_TTL};
use crate::harvest::dispatcher::{run_journal, JournalMetrics, JournalOutcome};
use crate::harvest::operators::OperatorRegistry;
use crate::output::{WriterCache, WriterCacheError};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("delivery-history store error: {0}")]
    Store(#[from] StoreError),

    #[error("output writer error: {0}")]
    Writer(#[from] WriterCacheError),

    #[error("no journal named {name:?} is configured")]
    UnknownJournal { name: String },
}

/// Process-wide totals, printed as the final summary (spec §7: "the driver
/// prints a final metrics summary... listing totals and per-group record
/// counts").
#[derive(Debug, Default)]
pub struct Metrics {
    pub totals: JournalMetrics,
    pub per_group_record_counts: std::collections::BTreeMap<String, usize>,
}

impl Metrics {
    fn fold_in(&mut self, outcome: &JournalOutcome) {
        let m = &outcome.metrics;
        self.totals.num_downloads_harvested_successful += m.num_downloads_harvested_successful;
        self.totals.num_downloads_harvested_unsuccessful += m.num_downloads_harvested_unsuccessful;
        self.totals.num_crawled_successful += m.num_crawled_successful;
        self.totals.num_crawled_failed += m.num_crawled_failed;
        self.totals.num_marc_conversions_successful += m.num_marc_conversions_successful;
        self.totals.num_marc_conversions_unsuccessful += m.num_marc_conversions_unsuccessful;
        self.totals.skipped_since_exclusion_filters += m.skipped_since_exclusion_filters;
        self.totals.skipped_since_undesired_item_type += m.skipped_since_undesired_item_type;
        self.totals.skipped_since_online_first += m.skipped_since_online_first;
        self.totals.skipped_since_early_view += m.skipped_since_early_view;
        self.totals.skipped_since_already_delivered += m.skipped_since_already_delivered;
        *self.per_group_record_counts.entry(outcome.group_output_folder.clone()).or_insert(0) += outcome.records.len();
    }

    fn log_summary(&self) {
        info!(
            downloads_ok = self.totals.num_downloads_harvested_successful,
            downloads_failed = self.totals.num_downloads_harvested_unsuccessful,
            crawled_ok = self.totals.num_crawled_successful,
            crawled_failed = self.totals.num_crawled_failed,
            conversions_ok = self.totals.num_marc_conversions_successful,
            conversions_failed = self.totals.num_marc_conversions_unsuccessful,
            skipped_exclusion = self.totals.skipped_since_exclusion_filters,
            skipped_undesired_type = self.totals.skipped_since_undesired_item_type,
            skipped_online_first = self.totals.skipped_since_online_first,
            skipped_early_view = self.totals.skipped_since_early_view,
            skipped_already_delivered = self.totals.skipped_since_already_delivered,
            "harvest run complete"
        );
        for (group, count) in &self.per_group_record_counts {
            info!(group = %group, records = count, "per-group record count");
        }
    }
}

fn default_output_filename() -> String {
    format!("zotero_harvester_{}.xml", Local::now().format("%Y-%m-%d %H:%M:%S"))
}

/// Resolves which journals this run covers, per spec §6's three positional
/// modes.
fn select_journals(config: &HarvesterConfig, mode: &RunMode) -> Result<Vec<Arc<JournalParams>>, DriverError> {
    match mode {
        RunMode::Upload => Ok(config
            .journals
            .iter()
            .filter(|j| j.upload_operation != config::UploadOperation::None)
            .cloned()
            .map(Arc::new)
            .collect()),
        RunMode::Journal { journal_name } => config
            .journals
            .iter()
            .find(|j| &j.name == journal_name)
            .cloned()
            .map(|j| vec![Arc::new(j)])
            .ok_or_else(|| DriverError::UnknownJournal { name: journal_name.clone() }),
        RunMode::Url { journal_name, url } => config
            .journals
            .iter()
            .find(|j| &j.name == journal_name)
            .cloned()
            .map(|mut j| {
                j.entry_point_url = url.clone();
                j.harvester_operation = config::HarvesterOperation::Direct;
                vec![Arc::new(j)]
            })
            .ok_or_else(|| DriverError::UnknownJournal { name: journal_name.clone() }),
    }
}

fn group_for<'a>(config: &'a HarvesterConfig, journal: &JournalParams) -> Result<&'a GroupParams, DriverError> {
    config.group_for_journal(journal).map_err(DriverError::from)
}

/// Runs the full pipeline (spec §2) and returns the process exit code: `0`
/// on success, including partial skips; non-zero only on [`DriverError`].
pub async fn run(args: &Args) -> Result<i32, DriverError> {
    let config = config::load_config(&args.config_path, args.config_overrides.as_deref())?;
    let journals = select_journals(&config, &args.mode)?;

    let db_path = args.output_directory.join("delivery_history.sqlite3");
    std::fs::create_dir_all(&args.output_directory).ok();
    let delivery = DeliveryStore::new(&db_path).await?;

    let cache_ttl = if args.force_downloads { Duration::ZERO } else { DEFAULT_CACHE_TTL };
    let download_manager = DownloadManager::new(&config.global, cache_ttl, args.ignore_robots_dot_txt);
    let registry = OperatorRegistry::default_registry();

    let concurrency = config.global.concurrency;
    let journal_limit = Semaphore::new(concurrency.max_concurrent_journals);
    let direct_download_limit = Semaphore::new(concurrency.max_concurrent_direct_downloads);
    let crawl_limit = Semaphore::new(concurrency.max_concurrent_crawls);
    let feed_limit = Semaphore::new(concurrency.max_concurrent_feeds);
    let conversion_limit = Semaphore::new(concurrency.max_concurrent_conversions);

    let output_filename = args.output_filename.clone().unwrap_or_else(default_output_filename);
    let writer = WriterCache::new(args.output_directory.clone(), output_filename);

    let today = Local::now().date_naive();
    let mut metrics = Metrics::default();

    let outcomes = futures_util::future::join_all(journals.into_iter().map(|journal| {
        let config = &config;
        let download_manager = &download_manager;
        let registry = &registry;
        let delivery = &delivery;
        let journal_limit = &journal_limit;
        let direct_download_limit = &direct_download_limit;
        let crawl_limit = &crawl_limit;
        let feed_limit = &feed_limit;
        let conversion_limit = &conversion_limit;
        async move {
            #[allow(clippy::expect_used)]
            let _permit = journal_limit.acquire().await.expect("semaphore is never closed");
            let group = match group_for(config, &journal) {
                Ok(g) => g,
                Err(e) => {
                    warn!(journal = %journal.name, error = %e, "skipping journal with unresolved group");
                    return None;
                }
            };
            Some(
                run_journal(
                    journal,
                    group,
                    &config.global,
                    &config.enhancement_maps,
                    download_manager,
                    registry,
                    &UnavailableDetector,
                    &UnavailableAuthorLookup,
                    delivery,
                    direct_download_limit,
                    crawl_limit,
                    feed_limit,
                    conversion_limit,
                    args.force_downloads,
                    today,
                )
                .await,
            )
        }
    }))
    .await;

    for outcome in outcomes.into_iter().flatten() {
        metrics.fold_in(&outcome);
        for record in &outcome.records {
            if let Err(e) = writer.write_record(&outcome.group_output_folder, record).await {
                error!(journal = %outcome.journal_name, error = %e, "failed to write record");
            }
        }
    }

    writer.close_all().await?;
    delivery.close().await;
    metrics.log_summary();

    Ok(0)
}
