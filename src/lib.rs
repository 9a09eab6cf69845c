//! webchat-offline - offline support for a browser chat front-end.
//!
//! Two independent pieces: a [`TranscriptStore`] that persists the single
//! active chat transcript, and an [`AssetCacheController`] that serves the
//! app's static assets from a versioned cache while leaving the inference
//! engine's own traffic alone.
//!
//! A [`MessageRelay`] sits between the page and the inference engine,
//! forwarding each raw message to an [`EngineHandler`] in arrival order.
//!
//! # Example
//!
//! ```no_run
//! use webchat_offline::{AppConfig, Message, NoProgress, Registration, TranscriptStore};
//! use webchat_offline::assets::controller_from_config;
//!
//! # async fn example() -> webchat_offline::Result<()> {
//! let config = AppConfig::load_or_create(&AppConfig::default_path())?;
//!
//! // Persist and restore the transcript
//! let store = TranscriptStore::from_config(&config.storage);
//! store.save(&[Message::user("hello")]).await?;
//! let restored = store.load().await?;
//!
//! // Install and activate the current cache generation
//! let registration = Registration::new();
//! registration
//!     .update(controller_from_config(&config.cache)?, &NoProgress)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod assets;
pub mod config;
pub mod error;
pub mod relay;
pub mod transcript;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "server")]
pub mod server;

// Re-export main types for convenience
pub use assets::{
    AssetCacheController, AssetManifest, CachePolicy, FetchOutcome, InstallProgress,
    NetworkFailurePolicy, NoProgress, Registration, Request, Response,
};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use relay::{EngineHandler, MessageRelay};
pub use transcript::{Message, Role, TranscriptStore};
