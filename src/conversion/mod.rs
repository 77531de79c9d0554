//! Conversion/augmentation engine (spec §4.4): turns one translation-service
//! item into zero or one [`assemble::CatalogRecord`], applying field
//! extraction, augmentation, and dedup in the order spec.md lists.

pub mod assemble;
pub mod augment;
pub mod error;
pub mod language;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::enhancement::EnhancementMaps;
use crate::config::{GlobalParams, GroupParams, JournalParams, MarcMetadataParams, ZoteroMetadataParams};
use crate::download::{to_metadata_record, RawZoteroItem};
use crate::model::MetadataRecord;

use self::assemble::CatalogRecord;
use self::error::ConversionError;
use self::language::LanguageDetector;

/// Why an item produced no record. Not an error; the dispatcher counts
/// these (spec §7 "DuplicateSkip") rather than logging them as failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ExclusionFilters,
    UndesiredItemType,
    OnlineFirst,
    EarlyView,
    AlreadyDelivered,
}

#[derive(Debug)]
pub enum ConversionOutcome {
    Emitted(CatalogRecord),
    Skipped(SkipReason),
}

/// Item types dropped outright at spec step 4 ("e.g. `webpage`").
const UNDESIRED_ITEM_TYPES: &[&str] = &["webpage", "attachment"];

/// Item types subject to the early-view/online-first filter at step 6.
const ARTICLE_LIKE_ITEM_TYPES: &[&str] = &["journalArticle", "magazineArticle", "newspaperArticle"];

/// Collaborator interface for the group's author-lookup service (spec §4.4
/// step 5: "look up GND identifier by name via the group's author-lookup
/// URL"). Out of scope to implement; this crate depends only on the
/// contract.
#[async_trait]
pub trait AuthorLookupClient: Send + Sync {
    async fn lookup(&self, lookup_url: &str, first_name: &str, last_name: &str) -> Option<(Option<String>, Option<String>)>;
}

pub struct UnavailableAuthorLookup;

#[async_trait]
impl AuthorLookupClient for UnavailableAuthorLookup {
    async fn lookup(&self, _lookup_url: &str, _first_name: &str, _last_name: &str) -> Option<(Option<String>, Option<String>)> {
        None
    }
}

/// Collaborator interface for the delivery-history dedup check (spec step
/// 10). Implemented by [`crate::delivery::store::DeliveryStore`] in
/// production; a trait here lets the conversion engine be tested without a
/// database.
#[async_trait]
pub trait DeliveryChecker: Send + Sync {
    async fn already_delivered(&self, url: &str, hash: &str) -> bool;
}

/// The merged configuration consulted at every stage, resolved once per
/// journal by the dispatcher and reused for every item it produces.
pub struct ConversionContext<'a> {
    pub journal: &'a JournalParams,
    pub group: &'a GroupParams,
    pub global: &'a GlobalParams,
    pub enhancement: &'a EnhancementMaps,
    pub zotero_filters: ZoteroMetadataParams,
    pub marc_filters: MarcMetadataParams,
}

impl<'a> ConversionContext<'a> {
    #[must_use]
    pub fn new(journal: &'a JournalParams, group: &'a GroupParams, global: &'a GlobalParams, enhancement: &'a EnhancementMaps) -> Self {
        let zotero_filters = ZoteroMetadataParams::merged(
            &global.zotero_metadata_params,
            &group_zotero_params(),
            &journal.zotero_metadata_params,
        );
        let marc_filters = MarcMetadataParams::merged(&global.marc_metadata_params, &group.marc_metadata_params, &journal.marc_metadata_params);
        Self {
            journal,
            group,
            global,
            enhancement,
            zotero_filters,
            marc_filters,
        }
    }
}

/// `GroupParams` carries no zotero-layer filters (spec §3: group params are
/// MARC-layer/catalog-layer only); this returns the implicit empty map so
/// the three-way merge in [`ConversionContext::new`] stays uniform with the
/// MARC-layer merge.
fn group_zotero_params() -> ZoteroMetadataParams {
    ZoteroMetadataParams::default()
}

fn select_identifier_pair(record: &mut MetadataRecord, journal: &JournalParams) -> Result<(), ConversionError> {
    use crate::model::SuperiorType;

    if journal.identifiers.online_complete() {
        record.issn = journal.identifiers.online_issn.clone();
        record.superior_ppn = journal.identifiers.online_ppn.clone();
        record.superior_type = Some(SuperiorType::Online);
        Ok(())
    } else if journal.identifiers.print_complete() {
        record.issn = journal.identifiers.print_issn.clone();
        record.superior_ppn = journal.identifiers.print_ppn.clone();
        record.superior_type = Some(SuperiorType::Print);
        Ok(())
    } else {
        Err(ConversionError::NoUsableIdentifierPair)
    }
}

fn strip_html_from_record(record: &mut MetadataRecord) {
    record.title = augment::strip_html_tags(&record.title);
    record.short_title = augment::strip_html_tags(&record.short_title);
    record.abstract_note = augment::strip_html_tags(&record.abstract_note);
    record.publication_title = augment::strip_html_tags(&record.publication_title);
}

fn is_early_view_marker(value: &str) -> bool {
    value.eq_ignore_ascii_case("n/a")
}

/// Runs steps 5-6 of spec §4.4 (augmentation, early-view/online-first
/// filter) in place. Returns `Some(reason)` if the item should be skipped
/// rather than assembled.
async fn augment_and_filter(
    record: &mut MetadataRecord,
    ctx: &ConversionContext<'_>,
    detector: &dyn LanguageDetector,
    author_lookup: &dyn AuthorLookupClient,
) -> Result<Option<SkipReason>, ConversionError> {
    record.date = augment::normalize_date(&record.date, ctx.journal.strptime_format_string.as_deref());
    record.issue = augment::strip_leading_zeros(&record.issue);
    record.volume = augment::strip_leading_zeros(&record.volume);
    record.pages = augment::normalize_pages(&record.pages);

    if !ctx.journal.name.is_empty() {
        record.publication_title = ctx.journal.name.clone();
    }

    select_identifier_pair(record, ctx.journal)?;

    language::resolve(record, ctx.journal, detector).await;

    for creator in &mut record.creators {
        augment::normalize_creator(creator, &record.languages, ctx.enhancement);
        if ctx.group.author_lookup_url.is_some() && augment::is_proper_last_name(&creator.last) {
            if let Some(url) = &ctx.group.author_lookup_url {
                if let Some((ppn, gnd)) = author_lookup.lookup(url, &creator.first, &creator.last).await {
                    creator.ppn = ppn;
                    creator.gnd = gnd;
                }
            }
        }
    }

    record.license = augment::resolve_license(
        ctx.journal.license.as_deref(),
        augment::has_custom_lf_note(&record.notes),
    );

    if ctx.journal.selective_evaluation {
        record.ssg = None;
    } else {
        record.ssg = ctx.journal.ssg.clone();
    }

    if augment::matches_review(&record.title, &record.short_title, &record.keywords, ctx.global.review_regex.as_ref(), ctx.journal.review_regex.as_ref()) {
        record.item_type = "review".to_string();
    }
    if augment::matches_notes(&record.title, ctx.global.notes_regex.as_ref(), ctx.journal.notes_regex.as_ref()) {
        record.item_type = "note".to_string();
    }

    if ARTICLE_LIKE_ITEM_TYPES.contains(&record.item_type.as_str()) {
        if is_early_view_marker(&record.issue) || is_early_view_marker(&record.volume) {
            return Ok(Some(SkipReason::EarlyView));
        }
        if record.issue.is_empty() && record.volume.is_empty() {
            let force_skip = ctx.global.skip_online_first_articles_unconditionally || record.doi.is_none();
            if force_skip {
                return Ok(Some(SkipReason::OnlineFirst));
            }
        }
    }

    Ok(None)
}

/// Runs the full pipeline (spec §4.4 steps 2-10) for one already-folded
/// [`RawZoteroItem`]. Step 1 (parsing the translation-service response into
/// an item array) happens upstream in [`crate::download::TranslationClient`].
pub async fn convert_item(
    item: &RawZoteroItem,
    ctx: &ConversionContext<'_>,
    detector: &dyn LanguageDetector,
    author_lookup: &dyn AuthorLookupClient,
    delivery: &dyn DeliveryChecker,
    today: NaiveDate,
) -> Result<ConversionOutcome, ConversionError> {
    let Some(mut record) = to_metadata_record(item, &ctx.zotero_filters) else {
        return Ok(ConversionOutcome::Skipped(SkipReason::ExclusionFilters));
    };

    strip_html_from_record(&mut record);

    if UNDESIRED_ITEM_TYPES.contains(&record.item_type.as_str()) {
        return Ok(ConversionOutcome::Skipped(SkipReason::UndesiredItemType));
    }

    if let Some(reason) = augment_and_filter(&mut record, ctx, detector, author_lookup).await? {
        return Ok(ConversionOutcome::Skipped(reason));
    }

    let catalog = assemble::assemble(&record, ctx.journal, ctx.group, ctx.global, ctx.enhancement, today)?;

    if assemble::matches_catalog_exclusion(&catalog.data_fields, &ctx.marc_filters) {
        return Ok(ConversionOutcome::Skipped(SkipReason::ExclusionFilters));
    }

    if delivery.already_delivered(&record.url, &catalog.hash).await {
        return Ok(ConversionOutcome::Skipped(SkipReason::AlreadyDelivered));
    }

    Ok(ConversionOutcome::Emitted(catalog))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{
        CrawlParams, DownloadDelayParams, GroupParams, HarvesterOperation, IssnPpnPair, LanguageMode, LanguageParams,
        MarcMetadataParams, PagedFeedParams, UploadOperation, ZoteroMetadataParams,
    };
    use crate::download::{RawCreator, RawTag};

    struct NoopDetector;
    #[async_trait]
    impl LanguageDetector for NoopDetector {
        async fn detect(&self, _text: &str, _candidates: &std::collections::HashSet<String>) -> Option<String> {
            None
        }
    }

    struct NeverDelivered;
    #[async_trait]
    impl DeliveryChecker for NeverDelivered {
        async fn already_delivered(&self, _url: &str, _hash: &str) -> bool {
            false
        }
    }

    struct AlwaysDelivered;
    #[async_trait]
    impl DeliveryChecker for AlwaysDelivered {
        async fn already_delivered(&self, _url: &str, _hash: &str) -> bool {
            true
        }
    }

    fn journal() -> JournalParams {
        JournalParams {
            zeder_id: 1,
            zeder_instance: "ixtheo".to_string(),
            name: "Test Journal".to_string(),
            group: "TestGroup".to_string(),
            subgroup: None,
            entry_point_url: "https://example.org".to_string(),
            harvester_operation: HarvesterOperation::Direct,
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
                source_text_fields: crate::config::SourceTextFields::Title,
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
        }
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
            timeout_crawl_operation_secs: 300,
            timeout_download_request_secs: 20,
            review_regex: None,
            notes_regex: None,
            zotero_metadata_params: ZoteroMetadataParams::default(),
            marc_metadata_params: MarcMetadataParams::default(),
            concurrency: crate::config::ConcurrencyParams::default(),
        }
    }

    fn complete_item() -> RawZoteroItem {
        RawZoteroItem {
            item_type: "journalArticle".to_string(),
            title: "Hello".to_string(),
            short_title: String::new(),
            creators: vec![RawCreator {
                first_name: "A".to_string(),
                last_name: "B".to_string(),
                creator_type: "author".to_string(),
            }],
            abstract_note: String::new(),
            publication_title: String::new(),
            volume: "1".to_string(),
            issue: "2".to_string(),
            pages: "3-4".to_string(),
            date: "2021-01-01".to_string(),
            doi: Some("10.1/x".to_string()),
            language: Some("en".to_string()),
            url: "https://example.org/article/1".to_string(),
            issn: Some("1234-5678".to_string()),
            rights: String::new(),
            tags: vec![RawTag { tag: "economics".to_string() }],
            note: None,
        }
    }

    #[tokio::test]
    async fn emits_a_record_for_a_complete_item() {
        let journal = journal();
        let group = group();
        let global = global();
        let enhancement = EnhancementMaps::empty();
        let ctx = ConversionContext::new(&journal, &group, &global, &enhancement);
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();

        let outcome = convert_item(&complete_item(), &ctx, &NoopDetector, &UnavailableAuthorLookup, &NeverDelivered, today)
            .await
            .unwrap();

        match outcome {
            ConversionOutcome::Emitted(catalog) => {
                assert_eq!(catalog.control_field("URL"), Some("https://example.org/article/1"));
            }
            ConversionOutcome::Skipped(reason) => panic!("expected emission, got skip: {reason:?}"),
        }
    }

    #[tokio::test]
    async fn skips_online_first_without_doi() {
        let journal = journal();
        let group = group();
        let global = global();
        let enhancement = EnhancementMaps::empty();
        let ctx = ConversionContext::new(&journal, &group, &global, &enhancement);
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();

        let mut item = complete_item();
        item.volume = String::new();
        item.issue = String::new();
        item.doi = None;

        let outcome = convert_item(&item, &ctx, &NoopDetector, &UnavailableAuthorLookup, &NeverDelivered, today)
            .await
            .unwrap();
        assert!(matches!(outcome, ConversionOutcome::Skipped(SkipReason::OnlineFirst)));
    }

    #[tokio::test]
    async fn skips_early_view_marker() {
        let journal = journal();
        let group = group();
        let global = global();
        let enhancement = EnhancementMaps::empty();
        let ctx = ConversionContext::new(&journal, &group, &global, &enhancement);
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();

        let mut item = complete_item();
        item.volume = "n/a".to_string();

        let outcome = convert_item(&item, &ctx, &NoopDetector, &UnavailableAuthorLookup, &NeverDelivered, today)
            .await
            .unwrap();
        assert!(matches!(outcome, ConversionOutcome::Skipped(SkipReason::EarlyView)));
    }

    #[tokio::test]
    async fn skips_already_delivered() {
        let journal = journal();
        let group = group();
        let global = global();
        let enhancement = EnhancementMaps::empty();
        let ctx = ConversionContext::new(&journal, &group, &global, &enhancement);
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();

        let outcome = convert_item(&complete_item(), &ctx, &NoopDetector, &UnavailableAuthorLookup, &AlwaysDelivered, today)
            .await
            .unwrap();
        assert!(matches!(outcome, ConversionOutcome::Skipped(SkipReason::AlreadyDelivered)));
    }

    #[tokio::test]
    async fn skips_undesired_item_type() {
        let journal = journal();
        let group = group();
        let global = global();
        let enhancement = EnhancementMaps::empty();
        let ctx = ConversionContext::new(&journal, &group, &global, &enhancement);
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();

        let mut item = complete_item();
        item.item_type = "webpage".to_string();

        let outcome = convert_item(&item, &ctx, &NoopDetector, &UnavailableAuthorLookup, &NeverDelivered, today)
            .await
            .unwrap();
        assert!(matches!(outcome, ConversionOutcome::Skipped(SkipReason::UndesiredItemType)));
    }

    #[tokio::test]
    async fn skips_on_title_exclusion_filter() {
        let mut journal = journal();
        journal.zotero_metadata_params.filters.insert(
            "title".to_string(),
            vec![crate::config::FieldFilter::Exclude(regex::Regex::new("^DRAFT").unwrap())],
        );
        let group = group();
        let global = global();
        let enhancement = EnhancementMaps::empty();
        let ctx = ConversionContext::new(&journal, &group, &global, &enhancement);
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();

        let mut item = complete_item();
        item.title = "DRAFT Hello".to_string();

        let outcome = convert_item(&item, &ctx, &NoopDetector, &UnavailableAuthorLookup, &NeverDelivered, today)
            .await
            .unwrap();
        assert!(matches!(outcome, ConversionOutcome::Skipped(SkipReason::ExclusionFilters)));
    }
}
