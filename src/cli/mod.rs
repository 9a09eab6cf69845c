//! CLI mode for webchat - inspect and seed the transcript store and the
//! asset cache without a browser.

mod progress;

use std::path::PathBuf;

use crate::assets::{
    AssetManifest, CachePolicy, CacheStorage, DiskCacheStorage, Registration, Request, Route,
    UpdateOutcome, controller_from_config, generation_name, load_manifest, origin_url, parse_url,
};
use crate::config::AppConfig;
use crate::error::Result;
use crate::transcript::{Message, TranscriptStore};

pub use progress::{BarProgress, format_bytes};
use progress::{print_activation, print_entry, print_transcript};

/// A parsed CLI subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    HistoryShow,
    HistoryImport(PathBuf),
    AssetsInstall,
    AssetsGet(String),
    Serve,
}

impl Command {
    /// Parses the subcommand words following the global options.
    ///
    /// # Errors
    ///
    /// Returns a usage message for unknown or incomplete commands.
    pub fn parse(args: &[String]) -> std::result::Result<Self, String> {
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["history"] | ["history", "show"] => Ok(Self::HistoryShow),
            ["history", "import", file] => Ok(Self::HistoryImport(PathBuf::from(*file))),
            ["history", "import"] => Err("history import requires a file".to_string()),
            ["assets", "install"] => Ok(Self::AssetsInstall),
            ["assets", "get", path] => Ok(Self::AssetsGet((*path).to_string())),
            ["assets", "get"] => Err("assets get requires a path".to_string()),
            ["serve"] => Ok(Self::Serve),
            [] => Err("no command given".to_string()),
            other => Err(format!("unknown command: {}", other.join(" "))),
        }
    }
}

/// Runs one command against the configured stores.
///
/// # Errors
///
/// Returns the underlying storage, network or configuration error.
pub async fn run(command: Command, config: &AppConfig) -> Result<()> {
    match command {
        Command::HistoryShow => history_show(config).await,
        Command::HistoryImport(file) => history_import(config, &file).await,
        Command::AssetsInstall => assets_install(config).await,
        Command::AssetsGet(path) => assets_get(config, &path).await,
        #[cfg(feature = "server")]
        Command::Serve => crate::server::run_server(config).await,
        #[cfg(not(feature = "server"))]
        Command::Serve => Err(crate::Error::Config(
            "server support not compiled in".to_string(),
        )),
    }
}

async fn history_show(config: &AppConfig) -> Result<()> {
    let store = TranscriptStore::from_config(&config.storage);
    match store.load().await? {
        Some(messages) => print_transcript(&messages),
        None => println!("No saved transcript."),
    }
    Ok(())
}

async fn history_import(config: &AppConfig, file: &std::path::Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(file).await?;
    let messages: Vec<Message> = serde_json::from_str(&contents)?;
    let store = TranscriptStore::from_config(&config.storage);
    store.save(&messages).await?;
    log::info!(
        "Imported {} message(s) from {}",
        messages.len(),
        file.display()
    );
    println!("Saved {} message(s).", messages.len());
    Ok(())
}

async fn assets_install(config: &AppConfig) -> Result<()> {
    let controller = controller_from_config(&config.cache)?;
    let registration = Registration::new();
    match registration.update(controller, &BarProgress::new()).await? {
        UpdateOutcome::Activated(activation) => print_activation(&activation),
        UpdateOutcome::Waiting { cache } => println!("{cache} installed and waiting."),
        UpdateOutcome::Unchanged => println!("Already up to date."),
    }
    Ok(())
}

/// Looks a path up in the current generation, reporting why it would pass
/// through instead when the controller does not handle it.
async fn assets_get(config: &AppConfig, path: &str) -> Result<()> {
    let origin = parse_url(&config.cache.origin)?;
    let request = Request::new(reqwest::Method::GET, origin_url(&origin, path));
    let manifest: AssetManifest = load_manifest(&config.cache)?;

    if let Route::Pass(reason) =
        CachePolicy::from_config(&config.cache).route(&request, &origin, &manifest)
    {
        println!("{} is not cached: {reason:?}", request.path());
        return Ok(());
    }

    let storage = DiskCacheStorage::new(&config.cache.cache_dir);
    let cache = generation_name(&config.cache.version);
    match storage.lookup(&cache, request.path()).await? {
        Some(response) => print_entry(&cache, request.path(), &response),
        None => println!("{} is not in {cache}", request.path()),
    }
    Ok(())
}
