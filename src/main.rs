use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use ppm_fetch::cli::{Cli, Command};
use ppm_fetch::{info_time, process};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let start_time = Local::now();

    let outcome = match cli.command {
        Command::Crops(opts) => process::run_crops(&opts).await,
        Command::Pesticides(opts) => process::run_pesticides(&opts).await,
    };

    match outcome {
        Ok(summary) => {
            info_time!(start_time, "Full program time:");
            if summary.is_clean() {
                ExitCode::SUCCESS
            } else {
                // Partial results are kept; the non-zero exit flags that some
                // entities still need a re-run.
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            eprintln!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}
