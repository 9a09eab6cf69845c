//! Versioned asset cache controller.
//!
//! One controller owns one cache generation (`cache-<version>`) and moves
//! through `New -> Installing -> Installed -> Activating -> Active`. A failed
//! install or a later replacement leaves it `Redundant`.

use std::sync::{Arc, Mutex, PoisonError};

use futures::{StreamExt, TryStreamExt, stream};
use reqwest::{Method, Url};

use super::fetch::Fetcher;
use super::http::{Request, Response, origin_url, parse_url};
use super::manifest::AssetManifest;
use super::policy::{CachePolicy, NetworkFailurePolicy, PassReason, Route};
use super::storage::CacheStorage;
use crate::config::CacheConfig;
use crate::error::{Error, Result};

/// Prefix shared by every cache generation this crate creates.
pub const CACHE_PREFIX: &str = "cache-";

/// Returns the cache name for a deploy version.
#[must_use]
pub fn generation_name(version: &str) -> String {
    format!("{CACHE_PREFIX}{version}")
}

/// Lifecycle state of one cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    New,
    Installing,
    Installed,
    Activating,
    Active,
    Redundant,
}

/// Trait for receiving install progress updates.
///
/// All methods have default no-op implementations.
pub trait InstallProgress: Send + Sync {
    /// Called before fetching the manifest.
    fn on_install_start(&self, _cache: &str, _total: usize) {}

    /// Called after each manifest asset is fetched.
    fn on_asset_fetched(&self, _path: &str, _bytes: usize) {}

    /// Called once the cache is fully populated.
    fn on_install_complete(&self, _cache: &str, _count: usize) {}

    /// Called when install fails.
    fn on_install_failed(&self, _cache: &str, _error: &str) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl InstallProgress for NoProgress {}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Current generation, no network round-trip.
    Cache,
    /// Network; a copy may have been written to the cache.
    Network,
    /// Network failed; an earlier cached copy stood in.
    Fallback,
}

/// Result of intercepting one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not handled; the caller should go to the network itself.
    Passthrough(PassReason),
    Respond {
        response: Response,
        source: ResponseSource,
    },
}

/// Summary of a completed activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Name of the now-current generation.
    pub cache: String,
    /// Stale generations deleted.
    pub purged: Vec<String>,
}

/// Per-generation settings.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub origin: Url,
    pub version: String,
    pub manifest: Arc<AssetManifest>,
    pub policy: CachePolicy,
    pub skip_waiting: bool,
    pub concurrent_fetches: usize,
}

impl ControllerSettings {
    /// Builds settings from configuration and a loaded manifest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the configured origin does not parse.
    pub fn from_config(config: &CacheConfig, manifest: AssetManifest) -> Result<Self> {
        Ok(Self {
            origin: parse_url(&config.origin)?,
            version: config.version.clone(),
            manifest: Arc::new(manifest),
            policy: CachePolicy::from_config(config),
            skip_waiting: config.skip_waiting,
            concurrent_fetches: config.concurrent_fetches,
        })
    }
}

/// Intercepts fetches for one cache generation.
pub struct AssetCacheController<S: CacheStorage, F: Fetcher> {
    storage: Arc<S>,
    fetcher: Arc<F>,
    settings: ControllerSettings,
    cache_name: String,
    state: Mutex<LifecycleState>,
    /// Held shared around runtime cache writes and exclusively by
    /// [`retire`](Self::retire), so no write lands after retirement.
    writes: tokio::sync::RwLock<()>,
}

impl<S: CacheStorage, F: Fetcher> AssetCacheController<S, F> {
    /// Creates a controller in the `New` state. Nothing is fetched or stored
    /// until [`install`](Self::install).
    #[must_use]
    pub fn new(storage: Arc<S>, fetcher: Arc<F>, settings: ControllerSettings) -> Self {
        let cache_name = generation_name(&settings.version);
        Self {
            storage,
            fetcher,
            settings,
            cache_name,
            state: Mutex::new(LifecycleState::New),
            writes: tokio::sync::RwLock::new(()),
        }
    }

    #[must_use]
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn skip_waiting(&self) -> bool {
        self.settings.skip_waiting
    }

    #[must_use]
    pub const fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        log::debug!("{}: {:?} -> {next:?}", self.cache_name, *state);
        *state = next;
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(Error::Lifecycle(format!(
                "{} cannot move to {to:?} from {:?}",
                self.cache_name, *state
            )));
        }
        *state = to;
        Ok(())
    }

    /// Marks this generation as superseded.
    ///
    /// Waits for runtime cache writes already under way; once this returns
    /// the generation never writes to storage again.
    pub async fn retire(&self) {
        let _fence = self.writes.write().await;
        self.set_state(LifecycleState::Redundant);
    }

    /// Returns a retired generation to service after its successor failed
    /// to activate.
    pub(crate) fn reinstate(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == LifecycleState::Redundant {
            log::info!("Reinstating {}", self.cache_name);
            *state = LifecycleState::Active;
        }
    }

    fn asset_request(&self, path: &str) -> Request {
        Request::new(Method::GET, origin_url(&self.settings.origin, path))
    }

    async fn fetch_asset(
        &self,
        path: String,
        progress: &dyn InstallProgress,
    ) -> Result<(String, Response)> {
        let install_err = |reason: String| Error::Install {
            path: path.clone(),
            reason,
        };
        let request = self.asset_request(&path);
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|e| install_err(e.to_string()))?;
        if !response.is_ok() {
            return Err(install_err(format!("HTTP {}", response.status)));
        }
        progress.on_asset_fetched(&path, response.body.len());
        Ok((path, response))
    }

    /// Fetches every manifest asset and stores them in a new cache.
    ///
    /// All fetches must succeed before anything is written; on any failure
    /// the generation becomes `Redundant` and no cache is created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Install`] for a failed fetch, a storage error if the
    /// cache cannot be written, or [`Error::Lifecycle`] if already installed.
    pub async fn install(&self, progress: &dyn InstallProgress) -> Result<usize> {
        self.transition(LifecycleState::New, LifecycleState::Installing)?;
        let total = self.settings.manifest.len();
        progress.on_install_start(&self.cache_name, total);
        log::info!("Installing {} ({total} assets)", self.cache_name);

        let paths: Vec<String> = self.settings.manifest.iter().map(str::to_string).collect();
        let populated = async {
            let entries: Vec<(String, Response)> = stream::iter(paths)
                .map(|path| self.fetch_asset(path, progress))
                .buffer_unordered(self.settings.concurrent_fetches.max(1))
                .try_collect()
                .await?;
            let count = entries.len();
            self.storage.put_all(&self.cache_name, entries).await?;
            Ok::<_, Error>(count)
        }
        .await;

        match populated {
            Ok(count) => {
                self.set_state(LifecycleState::Installed);
                progress.on_install_complete(&self.cache_name, count);
                log::info!("Installed {} with {count} assets", self.cache_name);
                Ok(count)
            }
            Err(e) => {
                self.set_state(LifecycleState::Redundant);
                progress.on_install_failed(&self.cache_name, &e.to_string());
                log::error!("Install of {} failed: {e}", self.cache_name);
                Err(e)
            }
        }
    }

    /// Promotes this generation to current and deletes every other
    /// `cache-*` generation. Caches outside the naming scheme are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Lifecycle`] unless installed, or a storage error if
    /// a stale cache cannot be listed or deleted. A failed activation leaves
    /// the generation `Installed`, so it can be activated again.
    pub async fn activate(&self) -> Result<Activation> {
        self.transition(LifecycleState::Installed, LifecycleState::Activating)?;

        match self.purge_stale().await {
            Ok(purged) => {
                self.set_state(LifecycleState::Active);
                log::info!("Activated {}", self.cache_name);
                Ok(Activation {
                    cache: self.cache_name.clone(),
                    purged,
                })
            }
            Err(e) => {
                self.set_state(LifecycleState::Installed);
                log::error!("Activation of {} failed: {e}", self.cache_name);
                Err(e)
            }
        }
    }

    async fn purge_stale(&self) -> Result<Vec<String>> {
        let mut purged = Vec::new();
        for name in self.storage.keys().await? {
            if name.starts_with(CACHE_PREFIX) && name != self.cache_name {
                if self.storage.delete(&name).await? {
                    log::info!("Deleted stale cache {name}");
                }
                purged.push(name);
            }
        }
        Ok(purged)
    }

    /// Writes a network copy into the current generation, unless the
    /// generation was retired while the fetch was in flight.
    async fn store_copy(&self, key: &str, response: &Response) {
        let _fence = self.writes.read().await;
        if self.state() != LifecycleState::Active {
            log::debug!("{} is no longer active; not caching {key}", self.cache_name);
            return;
        }
        if let Err(e) = self
            .storage
            .put(&self.cache_name, key, response.clone())
            .await
        {
            log::warn!("Failed to cache {key}: {e}");
        }
    }

    /// Handles one outgoing request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] when the network fails and no cached copy
    /// can stand in. Cache read and write failures are never returned.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
        if self.state() != LifecycleState::Active {
            return Ok(FetchOutcome::Passthrough(PassReason::NoController));
        }
        let route =
            self.settings
                .policy
                .route(request, &self.settings.origin, &self.settings.manifest);
        if let Route::Pass(reason) = route {
            log::trace!("Passing {} through: {reason:?}", request.url);
            return Ok(FetchOutcome::Passthrough(reason));
        }

        let key = request.path();
        match self.storage.lookup(&self.cache_name, key).await {
            Ok(Some(response)) => {
                return Ok(FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Cache,
                });
            }
            Ok(None) => {}
            Err(e) => log::warn!("Cache lookup for {key} failed: {e}"),
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if self.settings.policy.is_cacheable(&response) {
                    self.store_copy(key, &response).await;
                }
                Ok(FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => match self.settings.policy.network_failure {
                NetworkFailurePolicy::Propagate => Err(e),
                NetworkFailurePolicy::FallbackToCache => match self.find_any(key).await {
                    Some(response) => {
                        log::info!("Network failed for {key}, serving cached copy");
                        Ok(FetchOutcome::Respond {
                            response,
                            source: ResponseSource::Fallback,
                        })
                    }
                    None => Err(e),
                },
            },
        }
    }

    /// Searches the current generation, then any other app generation still
    /// present, for `key`.
    async fn find_any(&self, key: &str) -> Option<Response> {
        let mut names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                log::warn!("Cannot list caches for fallback: {e}");
                return None;
            }
        };
        names.retain(|n| n.starts_with(CACHE_PREFIX));
        // Current generation first
        names.sort_by_key(|n| n != &self.cache_name);

        for name in names {
            match self.storage.lookup(&name, key).await {
                Ok(Some(response)) => return Some(response),
                Ok(None) => {}
                Err(e) => log::warn!("Fallback lookup in {name} failed: {e}"),
            }
        }
        None
    }
}
