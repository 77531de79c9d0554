//! Errors raised while loading and resolving the INI configuration tree.

use thiserror::Error;

/// Configuration is fatal: any error here aborts the process before any
/// harvesting work starts (spec'd as `ConfigError`).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed INI in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ini::Error,
    },

    #[error("unknown key \"{key}\" in section [{section}]")]
    UnknownKey { section: String, key: String },

    #[error("section [{section}] is missing required key \"{key}\"")]
    MissingKey { section: String, key: String },

    #[error("journal \"{journal}\" references unknown group \"{group}\"")]
    UnresolvedGroup { journal: String, group: String },

    #[error("journal \"{journal}\" references unknown subgroup \"{subgroup}\"")]
    UnresolvedSubgroup { journal: String, subgroup: String },

    #[error(
        "journal \"{journal}\" has neither a complete online ISSN+PPN pair nor a complete print ISSN+PPN pair"
    )]
    IncompleteIssnPpnPair { journal: String },

    #[error("journal \"{journal}\" has invalid value \"{value}\" for key \"{key}\"")]
    InvalidValue {
        journal: String,
        key: String,
        value: String,
    },

    #[error("invalid regex in [{section}] key \"{key}\": {source}")]
    InvalidRegex {
        section: String,
        key: String,
        #[source]
        source: regex::Error,
    },

    #[error("enhancement maps directory {path} could not be read: {source}")]
    EnhancementMaps {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
