//! Per-group output writer cache (spec §4.6) and the minimal catalog-format
//! serialization (spec §4.4 step 7, glossary "Catalog format").

pub mod marc_xml;
pub mod writer_cache;

pub use writer_cache::{WriterCache, WriterCacheError};
