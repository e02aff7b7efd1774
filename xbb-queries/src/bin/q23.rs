use std::process::ExitCode;
use xbb_queries::Q23;
use xbb_tools::cli::run_cli;

#[tokio::main]
async fn main() -> ExitCode {
    run_cli(&Q23::default()).await
}
