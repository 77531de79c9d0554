//! CLI entry point for the catalog harvester.

use clap::Parser;

use catalog_harvester_core::cli::Args;
use catalog_harvester_core::driver;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Parse CLI arguments first (before logging, so --help works without logs).
    let args = Args::parse();

    catalog_harvester_core::logging::init("info");

    tracing::info!(config_path = %args.config_path.display(), "catalog harvester starting");

    match driver::run(&args).await {
        Ok(code) => std::process::ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!(error = %e, "harvest run failed");
            std::process::ExitCode::FAILURE
        }
    }
}
