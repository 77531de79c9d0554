//! Catalog Harvester Core Library
//!
//! Harvests bibliographic metadata from journal sites and feeds (direct
//! download, RSS/paged-feed, link crawling, bibliographic API query, and
//! mailbox scanning), converts it into catalog-format records, and
//! deduplicates them against a delivery-history store before handing them
//! to the per-group output writer.
//!
//! # Architecture
//!
//! - [`config`] - INI-backed configuration tree (global/group/journal params)
//! - [`model`] - core data types shared across every pipeline stage
//! - [`download`] - rate-limited, robots-aware download manager and the five fetch operations
//! - [`harvest`] - per-journal scheduling and the harvest operators
//! - [`conversion`] - the augmentation/assembly pipeline from translated item to catalog record
//! - [`delivery`] - the SQLite-backed delivery-history store
//! - [`output`] - per-group output writer cache and catalog-format serialization
//! - [`logging`] - tasklet-context log buffering
//! - [`cli`] - command-line argument definitions
//! - [`driver`] - the top-level pipeline orchestrator

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod conversion;
pub mod delivery;
pub mod download;
pub mod driver;
pub mod harvest;
pub mod logging;
pub mod model;
pub mod output;

pub use config::{ConfigError, HarvesterConfig};
pub use delivery::store::{DeliveryStore, StoreError};
pub use download::DownloadManager;
pub use driver::{DriverError, Metrics};
pub use harvest::{run_journal, JournalMetrics, JournalOutcome};
pub use model::{HarvestableItem, HarvestableItemFactory, MetadataRecord};
