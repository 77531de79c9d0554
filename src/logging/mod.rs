//! Logging setup (spec §4.7): a `tracing_subscriber` layer stack with the
//! tasklet-context buffering layer alongside the teacher's usual `fmt()`
//! output.

pub mod tasklet;

pub use tasklet::{dump_active_contexts, with_item_context, TaskletLayer};

use tracing_subscriber::prelude::*;

/// Installs the global subscriber: an `EnvFilter`-gated `fmt` layer (as the
/// teacher's `main.rs` did) plus [`TaskletLayer`] for per-item log buffering.
pub fn init(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(TaskletLayer::new())
        .init();
}
