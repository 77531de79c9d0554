//! Tasklet-context logger (spec §4.7).
//!
//! Each concurrently-running harvest/conversion tasklet registers a context
//! keyed by its [`HarvestableItem`] on entry and deregisters on exit; log
//! lines emitted while a context is registered are buffered under that
//! context's key rather than written inline, so concurrent tasklets never
//! interleave log output line-by-line. On deregistration the buffer flushes
//! into a process-wide queue the driver drains; on a fatal error every still
//! -registered context is dumped so in-flight work isn't silently lost.
//!
//! The original's `(thread_id, item)` key doesn't translate: many tasklets
//! share one OS thread under tokio's scheduler. `tokio::task_local!` gives
//! the same "what is this piece of code working on" answer per async task
//! instead, which is the substitution spec.md §9 anticipates.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

use dashmap::DashMap;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::model::HarvestableItem;

tokio::task_local! {
    static CURRENT_ITEM: String;
}

static CONTEXT_BUFFERS: std::sync::OnceLock<DashMap<String, Vec<String>>> = std::sync::OnceLock::new();
static GLOBAL_QUEUE: std::sync::OnceLock<StdMutex<VecDeque<String>>> = std::sync::OnceLock::new();

fn context_buffers() -> &'static DashMap<String, Vec<String>> {
    CONTEXT_BUFFERS.get_or_init(DashMap::new)
}

fn global_queue() -> &'static StdMutex<VecDeque<String>> {
    GLOBAL_QUEUE.get_or_init(|| StdMutex::new(VecDeque::new()))
}

fn correlation_key(item: &HarvestableItem) -> String {
    format!("{}#{}", item.journal_name(), item.id)
}

/// Runs `fut` with `item`'s correlation key set as the active tasklet
/// context. Flushes whatever was buffered for this key into the global
/// queue when `fut` completes, regardless of outcome.
pub async fn with_item_context<F: std::future::Future>(item: &HarvestableItem, fut: F) -> F::Output {
    let key = correlation_key(item);
    context_buffers().entry(key.clone()).or_default();
    let result = CURRENT_ITEM.scope(key.clone(), fut).await;
    flush(&key);
    result
}

#[allow(clippy::expect_used)]
fn flush(key: &str) {
    if let Some((_, lines)) = context_buffers().remove(key) {
        if !lines.is_empty() {
            let mut queue = global_queue().lock().expect("global queue lock never poisoned");
            queue.extend(lines);
        }
    }
}

/// Dumps every still-registered context (spec §4.7: "on fatal error, all
/// active contexts are dumped before process termination").
#[must_use]
pub fn dump_active_contexts() -> Vec<(String, Vec<String>)> {
    context_buffers()
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect()
}

/// Drains the global queue (spec §4.7: "the main thread periodically drains
/// the global queue to the underlying log sink").
#[must_use]
#[allow(clippy::expect_used)]
pub fn drain_global_queue() -> Vec<String> {
    let mut queue = global_queue().lock().expect("global queue lock never poisoned");
    queue.drain(..).collect()
}

/// Single-line terminal progress indicator (spec §4.7: "active and queued
/// task counts").
#[must_use]
pub fn progress_line(active: usize, queued: usize) -> String {
    format!("\ractive={active} queued={queued}")
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Buffers log lines under the active tasklet context instead of writing
/// them inline; lines emitted with no active context (the driver's own
/// top-level logs) go straight to the global queue.
pub struct TaskletLayer;

impl TaskletLayer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for TaskletLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Subscriber> Layer<S> for TaskletLayer {
    #[allow(clippy::expect_used)]
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        if visitor.0.is_empty() {
            return;
        }
        let line = format!("[{}] {}", event.metadata().level(), visitor.0);

        let registered_key = CURRENT_ITEM.try_with(|key| key.clone()).ok();
        match registered_key {
            Some(key) => {
                if let Some(mut buffer) = context_buffers().get_mut(&key) {
                    buffer.push(line);
                    return;
                }
                global_queue().lock().expect("global queue lock never poisoned").push_back(line);
            }
            None => {
                global_queue().lock().expect("global queue lock never poisoned").push_back(line);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{
        CrawlParams, HarvesterOperation, IssnPpnPair, LanguageMode, LanguageParams, MarcMetadataParams, PagedFeedParams, SourceTextFields, UploadOperation,
    };
    use crate::config::{JournalParams, ZoteroMetadataParams};
    use std::sync::Arc;

    fn item(id: u64) -> HarvestableItem {
        let journal = Arc::new(JournalParams {
            zeder_id: 1,
            zeder_instance: "ixtheo".to_string(),
            name: "J".to_string(),
            group: "G".to_string(),
            subgroup: None,
            entry_point_url: "https://example.org".to_string(),
            harvester_operation: HarvesterOperation::Direct,
            upload_operation: UploadOperation::None,
            identifiers: IssnPpnPair::default(),
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
        });
        HarvestableItem { id, url: "https://example.org/1".to_string(), journal }
    }

    #[tokio::test]
    async fn context_is_deregistered_once_the_tasklet_completes() {
        let key = correlation_key(&item(1));
        with_item_context(&item(1), async {
            assert!(context_buffers().contains_key(&key));
        })
        .await;
        // the context is flushed and removed once the tasklet's future resolves
        assert!(!context_buffers().contains_key(&key));
        assert!(dump_active_contexts().iter().all(|(k, _)| k != &key));
    }

    #[test]
    fn progress_line_reports_both_counts() {
        assert_eq!(progress_line(2, 5), "\ractive=2 queued=5");
    }
}
