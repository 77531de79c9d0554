//! CLI argument definitions using clap derive macros (spec §6).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Harvest bibliographic metadata from journal sites and feeds, convert it
/// to catalog records, and deliver them to a union catalog.
#[derive(Parser, Debug)]
#[command(name = "catalog-harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Path to the INI configuration file.
    pub config_path: PathBuf,

    #[command(subcommand)]
    pub mode: RunMode,

    /// Disable the response cache and delivery-dedup short-circuit for URL
    /// lookups; results are still archived.
    #[arg(long)]
    pub force_downloads: bool,

    /// Do not enforce robots.txt rules.
    #[arg(long)]
    pub ignore_robots_dot_txt: bool,

    /// Output directory for catalog-format files.
    #[arg(long, default_value = "/tmp/zotero_harvester/")]
    pub output_directory: PathBuf,

    /// Output filename; defaults to `zotero_harvester_<YYYY-MM-DD HH:MM:SS>.xml`.
    #[arg(long)]
    pub output_filename: Option<String>,

    /// INI snippet whose global section overrides keys in every journal
    /// section.
    #[arg(long)]
    pub config_overrides: Option<String>,
}

/// Which journals a run processes.
#[derive(Subcommand, Debug, Clone)]
pub enum RunMode {
    /// Run every configured journal whose `upload_operation_` is not NONE.
    Upload,
    /// Run a single journal named in the configuration.
    Journal { journal_name: String },
    /// Run a single ad hoc URL as a direct download against a named
    /// journal's configuration, bypassing its configured entry point.
    Url { journal_name: String, url: String },
}
