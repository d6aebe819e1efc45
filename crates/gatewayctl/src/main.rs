//! gatewayctl - command line client for broadband gateway diagnostics
//!
//! Exit codes: 0 passed, 1 error, 2 diagnostics failed, 130 cancelled.

use clap::Parser;
use gatewayctl::cli::Cli;
use gatewayctl::commands::{self, Exit};
use gatewayctl::logging;
use owo_colors::OwoColorize;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let exit = match commands::execute(cli).await {
        Ok(exit) => exit,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red(), e);
            Exit::Error
        }
    };
    std::process::exit(exit.code());
}
