use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{RunConfig, XbbArgs};
use crate::driver::{run_query, BenchmarkQuery};

/// Install the `fmt` subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed when drivers run inside tests
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Entry point shared by the query binaries.
///
/// Exits non-zero when any stage of the run fails. A verification mismatch
/// is logged but does not change the exit code, since the result has
/// already been written.
pub async fn run_cli(query: &dyn BenchmarkQuery) -> ExitCode {
    init_tracing();

    let args = XbbArgs::parse();
    let config = match RunConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(query = query.name(), error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match run_query(query, &config).await {
        Ok(report) => {
            match report.verified() {
                Some(false) => warn!(query = %report.query, "result does not match reference"),
                Some(true) => info!(query = %report.query, "result verified"),
                None => {}
            }
            info!(
                query = %report.query,
                rows = report.rows_written(),
                state = %report.final_state,
                "query finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(query = query.name(), error = %e, "query failed");
            ExitCode::FAILURE
        }
    }
}
