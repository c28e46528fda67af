//! Offline outbox - queue SMS/MMS while offline and deliver them later.

use clap::Parser;
use std::process::ExitCode;

use offline_outbox::cli::Commands;
use offline_outbox::{config, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let home = match config::get_home_dir() {
        Ok(home) => home,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let _guard = match logging::init(&home) {
        Ok((guard, _)) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Parse command line arguments
    let args = Commands::parse();

    // Run the command
    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
