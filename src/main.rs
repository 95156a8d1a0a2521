use clap::Parser;
use std::process::ExitCode;
use tidywatch::cli::{Cli, run_cli};
use tidywatch::output::OutputFormatter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Usage errors exit with status 2 from inside clap.
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run_cli(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            OutputFormatter::error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

/// Diagnostics go to stderr; `RUST_LOG` overrides the level chosen by `-v`.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
