//! Registration: the active cache generation plus at most one waiting one.
//!
//! A new generation installs while the current one keeps serving. Once it
//! activates, every subsequent fetch is routed to it immediately; clients do
//! not need to reload.

use std::sync::{Arc, PoisonError, RwLock};

use super::controller::{
    Activation, AssetCacheController, FetchOutcome, InstallProgress, LifecycleState,
};
use super::fetch::Fetcher;
use super::http::Request;
use super::policy::PassReason;
use super::storage::CacheStorage;
use crate::error::Result;

/// Outcome of [`Registration::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The generation is already active.
    Unchanged,
    /// Installed and activated.
    Activated(Activation),
    /// Installed; waiting for [`Registration::promote_waiting`].
    Waiting { cache: String },
}

type Shared<S, F> = Arc<AssetCacheController<S, F>>;

/// Holds the controller currently serving fetches.
pub struct Registration<S: CacheStorage, F: Fetcher> {
    active: RwLock<Option<Shared<S, F>>>,
    waiting: RwLock<Option<Shared<S, F>>>,
}

impl<S: CacheStorage, F: Fetcher> Default for Registration<S, F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: CacheStorage, F: Fetcher> Registration<S, F> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: RwLock::new(None),
            waiting: RwLock::new(None),
        }
    }

    /// Returns the active controller, if any.
    #[must_use]
    pub fn active(&self) -> Option<Shared<S, F>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the installed-but-waiting controller, if any.
    #[must_use]
    pub fn waiting(&self) -> Option<Shared<S, F>> {
        self.waiting
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs a new generation next to the active one.
    ///
    /// The new generation activates immediately if it asks to skip waiting
    /// or nothing is active yet; otherwise it waits. A failed install leaves
    /// the active generation serving.
    ///
    /// # Errors
    ///
    /// Returns the install or activation error.
    pub async fn update(
        &self,
        controller: AssetCacheController<S, F>,
        progress: &dyn InstallProgress,
    ) -> Result<UpdateOutcome> {
        if self
            .active()
            .is_some_and(|a| a.cache_name() == controller.cache_name())
        {
            log::info!("{} is already active", controller.cache_name());
            return Ok(UpdateOutcome::Unchanged);
        }

        let controller = Arc::new(controller);
        if let Err(e) = controller.install(progress).await {
            if let Some(active) = self.active() {
                log::warn!("Keeping {} in service", active.cache_name());
            }
            return Err(e);
        }

        if controller.skip_waiting() || self.active().is_none() {
            return self.promote(controller).await.map(UpdateOutcome::Activated);
        }

        let cache = controller.cache_name().to_string();
        let previous = self
            .waiting
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(controller);
        if let Some(previous) = previous {
            previous.retire().await;
        }
        log::info!("{cache} installed and waiting");
        Ok(UpdateOutcome::Waiting { cache })
    }

    /// Activates the waiting generation, if any.
    ///
    /// # Errors
    ///
    /// Returns the activation error; the previous generation stays active
    /// and the new one keeps waiting.
    pub async fn promote_waiting(&self) -> Result<Option<Activation>> {
        let waiting = self
            .waiting
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(controller) = waiting else {
            return Ok(None);
        };
        match self.promote(Arc::clone(&controller)).await {
            Ok(activation) => Ok(Some(activation)),
            Err(e) => {
                self.waiting
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_or_insert(controller);
                Err(e)
            }
        }
    }

    /// Retires the active generation, then activates `controller`.
    ///
    /// Retiring first means no fetch still running on the old generation
    /// can write into a cache the activation is about to purge. Requests
    /// arriving in between pass through.
    async fn promote(&self, controller: Shared<S, F>) -> Result<Activation> {
        let previous = self.active();
        if let Some(previous) = &previous {
            previous.retire().await;
        }

        match controller.activate().await {
            Ok(activation) => {
                *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(controller);
                Ok(activation)
            }
            Err(e) => {
                if let Some(previous) = previous {
                    previous.reinstate();
                }
                Err(e)
            }
        }
    }

    /// Routes a fetch to the active controller.
    ///
    /// # Errors
    ///
    /// Propagates the controller's network error.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
        match self.active() {
            Some(controller) if controller.state() == LifecycleState::Active => {
                controller.handle_fetch(request).await
            }
            _ => Ok(FetchOutcome::Passthrough(PassReason::NoController)),
        }
    }
}
