//! restify - run sequenced HTTP API test scenarios
//!
//! Cases run in order, can reuse values from earlier responses and check
//! each response's status code and body.

use clap::Parser;
use commands::Commands;
use restify::common::logging;
use restify::{cli, commands};

#[derive(Parser)]
#[command(name = "restify", about = "Sequenced HTTP API test scenarios")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    logging::init_cli();

    let cli = Cli::parse();

    match cli::dispatch(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
