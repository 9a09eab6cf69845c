//! webchat CLI - manage the offline transcript store and asset cache.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::env;
use std::path::PathBuf;

use webchat_offline::AppConfig;
use webchat_offline::cli::{self, Command};

fn print_usage() {
    eprintln!("Usage: webchat [OPTIONS] <COMMAND>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  history show            Print the saved transcript");
    eprintln!("  history import <file>   Replace the transcript with a JSON message array");
    eprintln!("  assets install          Fetch the manifest into cache-<version> and activate it");
    eprintln!("  assets get <path>       Show the cached entry for a path");
    eprintln!("  serve                   Run the HTTP server");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <PATH>         Config file (default: $WEBCHAT_CONFIG or the user config dir)");
    eprintln!("  -h, --help              Show this help");
    eprintln!();
    eprintln!("Set RUST_LOG to change log verbosity (default: info).");
}

#[tokio::main]
async fn main() -> webchat_offline::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config_path: Option<PathBuf> = None;
    let mut rest = Vec::new();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "--config" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                } else {
                    eprintln!("Error: --config requires a value");
                    std::process::exit(1);
                }
            }
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    let command = match Command::parse(&rest) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("Error: {message}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    let config_path = config_path.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_create(&config_path)?;
    log::debug!("Using config {}", config_path.display());

    cli::run(command, &config).await
}
