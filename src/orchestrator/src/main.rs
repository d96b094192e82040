//! A3S Orchestrator entry point.

use clap::Parser;

use a3s_orchestrator::cli::{dispatch, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
