//! Per-journal harvest scheduling (spec §4.2): resolves the journal's
//! configured operator, follows every item it spawns through to a direct
//! download, hands completed downloads to the conversion engine, and
//! emits results in increasing [`HarvestableItem`] id order (spec §4.4).
//!
//! Grounded on the teacher's queue-processing loop (`queue.rs`): a single
//! worker drains a FIFO of pending items, dispatches each concurrently, and
//! folds results back into a shared metrics struct. The teacher's queue was
//! flat (one kind of item, one kind of work); a journal here produces two
//! generations of work (spawn, then convert), so this dispatcher runs that
//! loop twice rather than introducing a generic multi-stage queue type.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::NaiveDate;
use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::config::{EnhancementMaps, GlobalParams, GroupParams, HarvesterOperation, JournalParams};
use crate::conversion::assemble::CatalogRecord;
use crate::conversion::language::LanguageDetector;
use crate::conversion::{AuthorLookupClient, ConversionContext, ConversionOutcome, SkipReason};
use crate::delivery::store::DeliveryStore;
use crate::download::{DownloadManager, RawZoteroItem};
use crate::model::{DeliveryState, HarvestableItem, HarvestableItemFactory};

use super::operators::{OperatorContext, OperatorOutcome, OperatorRegistry};

/// Per-journal tally, folded into the driver's process-wide totals once
/// `run_journal` returns (spec §7 "Metrics").
#[derive(Debug, Default, Clone, Copy)]
pub struct JournalMetrics {
    pub num_downloads_harvested_successful: usize,
    pub num_downloads_harvested_unsuccessful: usize,
    pub num_crawled_successful: usize,
    pub num_crawled_failed: usize,
    pub num_marc_conversions_successful: usize,
    pub num_marc_conversions_unsuccessful: usize,
    pub skipped_since_exclusion_filters: usize,
    pub skipped_since_undesired_item_type: usize,
    pub skipped_since_online_first: usize,
    pub skipped_since_early_view: usize,
    pub skipped_since_already_delivered: usize,
}

impl JournalMetrics {
    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::ExclusionFilters => self.skipped_since_exclusion_filters += 1,
            SkipReason::UndesiredItemType => self.skipped_since_undesired_item_type += 1,
            SkipReason::OnlineFirst => self.skipped_since_online_first += 1,
            SkipReason::EarlyView => self.skipped_since_early_view += 1,
            SkipReason::AlreadyDelivered => self.skipped_since_already_delivered += 1,
        }
        self.num_marc_conversions_unsuccessful += 1;
    }
}

/// A journal's final yield: the records it emitted, ready for the writer
/// cache, plus this journal's slice of the run's metrics.
#[derive(Debug)]
pub struct JournalOutcome {
    pub journal_name: String,
    pub group_output_folder: String,
    pub records: Vec<CatalogRecord>,
    pub metrics: JournalMetrics,
}

/// A fetched-but-not-yet-converted item, tagged with the id its
/// [`HarvestableItemFactory`] assigned so the final conversion pass can
/// restore enqueue order (spec §4.4: "emitted in increasing id order").
struct PendingConversion {
    item_id: u64,
    raw: RawZoteroItem,
}

/// Runs a single journal end to end: resolve its operator, follow every
/// spawned URL to a direct download, convert every successfully-downloaded
/// item, and archive what gets emitted.
///
/// `direct_download_limit` bounds how many of this journal's direct
/// downloads run concurrently (spec §5 worker pools); `conversion_limit`
/// does the same for the conversion stage.
#[allow(clippy::too_many_arguments)]
#[allow(clippy::expect_used)]
pub async fn run_journal(
    journal: Arc<JournalParams>,
    group: &GroupParams,
    global: &GlobalParams,
    enhancement: &EnhancementMaps,
    download_manager: &DownloadManager,
    registry: &OperatorRegistry,
    detector: &dyn LanguageDetector,
    author_lookup: &dyn AuthorLookupClient,
    delivery: &DeliveryStore,
    direct_download_limit: &Semaphore,
    crawl_limit: &Semaphore,
    feed_limit: &Semaphore,
    conversion_limit: &Semaphore,
    force_downloads: bool,
    today: NaiveDate,
) -> JournalOutcome {
    let mut metrics = JournalMetrics::default();
    let factory = HarvestableItemFactory::new();
    let seen_urls: StdMutex<HashSet<String>> = StdMutex::new(HashSet::new());
    let already_delivered = |url: &str| {
        if force_downloads {
            return false;
        }
        let mut seen = seen_urls.lock().expect("dedup set lock never poisoned");
        !seen.insert(url.to_string())
    };

    let ctx = OperatorContext {
        download_manager,
        user_agent: &group.user_agent,
        emailcrawl_mboxes: &global.emailcrawl_mboxes,
        api_query_base_url: &global.api_query_base_url,
        already_delivered: &already_delivered,
    };

    let Some(operator) = registry.get(journal.harvester_operation) else {
        return JournalOutcome {
            journal_name: journal.name.clone(),
            group_output_folder: group.output_folder.clone(),
            records: Vec::new(),
            metrics,
        };
    };

    let entry_item = factory.create(journal.entry_point_url.clone(), Arc::clone(&journal));
    // Direct/APIQUERY/EMAIL entry fetches are bounded only by the direct-
    // download pool below (they spawn further downloads rather than
    // themselves being a long-running fetch); CRAWL and RSS each get the
    // pool named for them in spec §5.
    let entry_permit = match journal.harvester_operation {
        HarvesterOperation::Crawl => Some(crawl_limit.acquire().await.expect("semaphore is never closed")),
        HarvesterOperation::Rss => Some(feed_limit.acquire().await.expect("semaphore is never closed")),
        _ => None,
    };
    let outcome = operator.execute(&entry_item, &ctx).await;
    drop(entry_permit);

    let mut pending: Vec<PendingConversion> = Vec::new();
    collect_converted(&outcome, entry_item.id, &mut pending);
    apply_crawl_counts(&outcome, &mut metrics);

    if outcome.error.is_some() {
        metrics.num_downloads_harvested_unsuccessful += 1;
    }

    // Every spawned item still needs its own direct download (DIRECT is the
    // only operator that already returns translated items outright).
    let spawned_downloads = join_all(outcome.spawned_items.into_iter().map(|spawned| {
        let item = factory.create(spawned.url.clone(), Arc::clone(&journal));
        let ctx = &ctx;
        let limit = direct_download_limit;
        async move {
            let _permit = limit.acquire().await.expect("semaphore is never closed");
            let result = download_manager
                .direct_download(&item, ctx.user_agent, crate::download::DownloadMode::Translated)
                .await;
            (item.id, result)
        }
    }))
    .await;

    for (item_id, result) in spawned_downloads {
        if result.is_success() {
            metrics.num_downloads_harvested_successful += 1;
            for raw in result.items {
                pending.push(PendingConversion { item_id, raw });
            }
        } else {
            metrics.num_downloads_harvested_unsuccessful += 1;
        }
    }

    // Ids are assigned in increasing order by `factory`, so sorting here is
    // what makes the final emission pass below come out in id order even
    // though the downloads above completed in arbitrary order.
    pending.sort_by_key(|p| p.item_id);

    let conversion_ctx = ConversionContext::new(&journal, group, global, enhancement);
    let conversions = join_all(pending.into_iter().map(|p| {
        let conversion_ctx = &conversion_ctx;
        let limit = conversion_limit;
        async move {
            let _permit = limit.acquire().await.expect("semaphore is never closed");
            crate::conversion::convert_item(&p.raw, conversion_ctx, detector, author_lookup, delivery, today).await
        }
    }))
    .await;

    let mut records = Vec::new();
    for result in conversions {
        match result {
            Ok(ConversionOutcome::Emitted(catalog)) => {
                metrics.num_marc_conversions_successful += 1;
                archive(&journal, delivery, &catalog).await;
                records.push(catalog);
            }
            Ok(ConversionOutcome::Skipped(reason)) => metrics.record_skip(reason),
            Err(_) => metrics.num_marc_conversions_unsuccessful += 1,
        }
    }

    JournalOutcome {
        journal_name: journal.name.clone(),
        group_output_folder: group.output_folder.clone(),
        records,
        metrics,
    }
}

fn collect_converted(outcome: &OperatorOutcome, item_id: u64, pending: &mut Vec<PendingConversion>) {
    for raw in &outcome.converted_items {
        pending.push(PendingConversion {
            item_id,
            raw: raw.clone(),
        });
    }
}

fn apply_crawl_counts(outcome: &OperatorOutcome, metrics: &mut JournalMetrics) {
    metrics.num_crawled_successful += outcome.num_crawled_successful;
    metrics.num_crawled_failed += outcome.num_crawled_failed;
}

/// Registers an emitted record in the delivery-history store (spec §4.5),
/// upserting the journal's row first since `archive` keys off the store's
/// own row id rather than the Zeder id.
async fn archive(journal: &JournalParams, delivery: &DeliveryStore, catalog: &CatalogRecord) {
    let Ok(journal_row_id) = delivery
        .upsert_journal(journal.zeder_id as i64, &journal.zeder_instance, &journal.name)
        .await
    else {
        return;
    };
    let main_title = catalog
        .data_fields_with_tag("245")
        .first()
        .and_then(|field| field.subfields.first())
        .map(|sub| sub.value.as_str())
        .unwrap_or_default();
    let url = catalog.control_field("URL").unwrap_or_default().to_string();
    let blob = crate::output::marc_xml::serialize_record(catalog).into_bytes();
    let _ = delivery
        .archive(journal_row_id, &catalog.hash, main_title, &[url], DeliveryState::Automatic, None, &blob)
        .await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{
        CrawlParams, DownloadDelayParams, HarvesterOperation, IssnPpnPair, LanguageMode, LanguageParams,
        MarcMetadataParams, PagedFeedParams, SourceTextFields, UploadOperation, ZoteroMetadataParams,
    };
    use crate::conversion::UnavailableAuthorLookup;
    use crate::conversion::language::UnavailableDetector;
    use std::time::Duration;

    fn journal(entry_point_url: &str, op: HarvesterOperation) -> Arc<JournalParams> {
        Arc::new(JournalParams {
            zeder_id: 7,
            zeder_instance: "ixtheo".to_string(),
            name: "Test Journal".to_string(),
            group: "TestGroup".to_string(),
            subgroup: None,
            entry_point_url: entry_point_url.to_string(),
            harvester_operation: op,
            upload_operation: UploadOperation::Live,
            identifiers: IssnPpnPair {
                online_issn: Some("1234-5678".to_string()),
                online_ppn: Some("100000001".to_string()),
                print_issn: None,
                print_ppn: None,
            },
            strptime_format_string: None,
            update_window_days: 0,
            review_regex: None,
            notes_regex: None,
            language_params: LanguageParams {
                expected_languages: std::collections::HashSet::new(),
                source_text_fields: SourceTextFields::Title,
                mode: LanguageMode::Default,
            },
            crawl_params: CrawlParams::default(),
            personalized_authors: false,
            zotero_metadata_params: ZoteroMetadataParams::default(),
            marc_metadata_params: MarcMetadataParams::default(),
            selective_evaluation: false,
            emailcrawl_subject_regex: None,
            ssg: None,
            license: None,
            paged_feed: PagedFeedParams::default(),
        })
    }

    fn group() -> GroupParams {
        GroupParams {
            name: "TestGroup".to_string(),
            user_agent: "catalog-harvester/1.0".to_string(),
            isil: "DE-Test".to_string(),
            output_folder: "TestGroup".to_string(),
            author_lookup_url: None,
            marc_metadata_params: MarcMetadataParams::default(),
        }
    }

    fn global() -> GlobalParams {
        GlobalParams {
            translation_server_url: "http://localhost:1969".to_string(),
            api_query_base_url: String::new(),
            emailcrawl_mboxes: Vec::new(),
            enhancement_maps_directory: None,
            skip_online_first_articles_unconditionally: false,
            download_delay: DownloadDelayParams::default(),
            timeout_crawl_operation_secs: 5,
            timeout_download_request_secs: 5,
            review_regex: None,
            notes_regex: None,
            zotero_metadata_params: ZoteroMetadataParams::default(),
            marc_metadata_params: MarcMetadataParams::default(),
            concurrency: crate::config::ConcurrencyParams::default(),
        }
    }

    #[tokio::test]
    async fn direct_operation_against_an_unreachable_host_reports_a_failed_download() {
        let journal = journal("https://example.invalid/a", HarvesterOperation::Direct);
        let group = group();
        let global = global();
        let enhancement = EnhancementMaps::empty();
        let download_manager = DownloadManager::new(&global, Duration::from_secs(60), true);
        let registry = OperatorRegistry::default_registry();
        let delivery = DeliveryStore::new_in_memory().await.unwrap();
        let direct_limit = Semaphore::new(4);
        let crawl_limit = Semaphore::new(4);
        let feed_limit = Semaphore::new(4);
        let conversion_limit = Semaphore::new(4);
        let today = NaiveDate::from_ymd_opt(2026, 7, 29).unwrap();

        let outcome = run_journal(
            journal,
            &group,
            &global,
            &enhancement,
            &download_manager,
            &registry,
            &UnavailableDetector,
            &UnavailableAuthorLookup,
            &delivery,
            &direct_limit,
            &crawl_limit,
            &feed_limit,
            &conversion_limit,
            false,
            today,
        )
        .await;

        assert_eq!(outcome.journal_name, "Test Journal");
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.metrics.num_downloads_harvested_successful, 0);
    }
}
