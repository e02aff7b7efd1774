use std::process::ExitCode;
use xbb_queries::Q26;
use xbb_tools::cli::run_cli;

#[tokio::main]
async fn main() -> ExitCode {
    run_cli(&Q26::default()).await
}
