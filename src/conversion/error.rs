//! Errors raised by the conversion engine (spec §4.4, §7).
//!
//! `ConversionError` covers the cases that abort conversion of a single
//! item outright (bad JSON, a required augmentation step with no usable
//! value). The many `skipped_since_*` outcomes are not errors — they are
//! [`super::SkipReason`] values the dispatcher counts but never logs as a
//! failure.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ConversionError {
    #[error("bad json: {0}")]
    BadJson(String),

    #[error("journal has neither a complete online nor print ISSN+PPN pair")]
    NoUsableIdentifierPair,

    #[error("record has an empty title after extraction")]
    EmptyTitle,

    #[error("record has no usable URL")]
    MissingUrl,
}
