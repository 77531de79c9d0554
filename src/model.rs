//! Core data model shared across the harvesting pipeline.
//!
//! These types are the currency passed between the download manager, the
//! harvest operators, the conversion engine, and the delivery-history store.
//! They carry no behavior beyond small constructors and accessors; the
//! modules that own a stage of the pipeline do the work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use crate::config::{GlobalParams, GroupParams, JournalParams};

/// The unit of scheduling and the correlation key joining downloads,
/// conversions, and log output.
///
/// IDs are unique within a journal and assigned in enqueue order by
/// [`HarvestableItemFactory`]; ordering across journals is not defined.
#[derive(Debug, Clone)]
pub struct HarvestableItem {
    pub id: u64,
    pub url: String,
    pub journal: Arc<JournalParams>,
}

impl HarvestableItem {
    pub fn journal_name(&self) -> &str {
        &self.journal.name
    }
}

/// Assigns strictly increasing, dense ids (starting at 1) to items enqueued
/// for a single journal. One factory is kept per journal by the dispatcher.
#[derive(Debug, Default)]
pub struct HarvestableItemFactory {
    next_id: AtomicU64,
}

impl HarvestableItemFactory {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub fn create(&self, url: impl Into<String>, journal: Arc<JournalParams>) -> HarvestableItem {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        HarvestableItem {
            id,
            url: url.into(),
            journal,
        }
    }
}

/// One creator (author/editor/translator/...) as reported by the
/// translation service, then normalized by the conversion engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Creator {
    pub first: String,
    pub last: String,
    pub affix: String,
    pub title: String,
    pub creator_type: String,
    pub ppn: Option<String>,
    pub gnd: Option<String>,
}

/// Whether a journal's superior work is tracked under its online or print
/// ISSN/PPN pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuperiorType {
    Online,
    Print,
}

/// A free-form note attached to a record, distinct from the bibliographic
/// fields proper (e.g. a configured custom note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteEntry {
    pub text: String,
}

/// Intermediate structure between translation-service JSON and a
/// [`crate::conversion::CatalogRecord`][CatalogRecord]. Populated by field
/// extraction, then mutated in place by each augmentation step.
///
/// [CatalogRecord]: crate::conversion::assemble::CatalogRecord
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub item_type: String,
    pub title: String,
    pub short_title: String,
    pub creators: Vec<Creator>,
    pub abstract_note: String,
    pub publication_title: String,
    pub volume: String,
    pub issue: String,
    pub pages: String,
    pub date: String,
    pub doi: Option<String>,
    pub languages: Vec<String>,
    pub url: String,
    pub issn: Option<String>,
    pub license: String,
    pub ssg: Option<String>,
    pub superior_ppn: Option<String>,
    pub superior_type: Option<SuperiorType>,
    pub keywords: Vec<String>,
    pub notes: Vec<NoteEntry>,
}

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The delivery lifecycle of a record once archived in the delivery-history
/// store. `Error` and `Reset` are the only states eligible for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    Automatic,
    Manual,
    Error,
    Ignore,
    Reset,
    OnlineFirst,
}

impl DeliveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "AUTOMATIC",
            Self::Manual => "MANUAL",
            Self::Error => "ERROR",
            Self::Ignore => "IGNORE",
            Self::Reset => "RESET",
            Self::OnlineFirst => "ONLINE_FIRST",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AUTOMATIC" => Some(Self::Automatic),
            "MANUAL" => Some(Self::Manual),
            "ERROR" => Some(Self::Error),
            "IGNORE" => Some(Self::Ignore),
            "RESET" => Some(Self::Reset),
            "ONLINE_FIRST" => Some(Self::OnlineFirst),
            _ => None,
        }
    }

    /// States eligible for retry: a record in one of these states does not
    /// block re-delivery of the same hash/URL.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Error | Self::Reset)
    }
}

/// Identity row in the delivery-history store, as returned by its lookup
/// operations. See [`crate::delivery::store::DeliveryStore`].
#[derive(Debug, Clone)]
pub struct DeliveredRecordEntry {
    pub id: i64,
    pub urls: Vec<String>,
    pub hash: String,
    pub main_title: String,
    pub zeder_journal_id: i64,
    pub delivery_state: DeliveryState,
    pub error_message: Option<String>,
    pub delivered_at: chrono::NaiveDateTime,
}
