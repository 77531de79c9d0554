//! Configuration loader: the INI-backed immutable parameter tree described
//! in spec §3 (data model) and §6 (file format).

pub mod enhancement;
pub mod error;
pub mod global;
pub mod group;
pub mod ini_format;
pub mod journal;
pub mod metadata;

pub use enhancement::EnhancementMaps;
pub use error::ConfigError;
pub use global::{ConcurrencyParams, DownloadDelayParams, GlobalParams};
pub use group::{GroupParams, SubgroupParams};
pub use ini_format::{load_config, HarvesterConfig};
pub use journal::{
    CrawlParams, HarvesterOperation, IssnPpnPair, JournalParams, LanguageMode, LanguageParams,
    PagedFeedParams, SourceTextFields, UploadOperation,
};
pub use metadata::{FieldFilter, MarcMetadataParams, ZoteroMetadataParams};
