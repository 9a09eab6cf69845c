//! Offline cache for the app's static assets.
//!
//! The controller serves manifest assets from a versioned cache and leaves
//! everything else alone: cross-origin traffic and anything that looks like
//! the inference engine's model files go straight to the network, so the
//! engine's own, much larger cache is never duplicated or evicted.

mod controller;
mod disk;
mod fetch;
mod http;
mod manifest;
mod policy;
mod registration;
mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{
    Activation, AssetCacheController, CACHE_PREFIX, ControllerSettings, FetchOutcome,
    InstallProgress, LifecycleState, NoProgress, ResponseSource, generation_name,
};
pub use disk::DiskCacheStorage;
pub use fetch::{Fetcher, HttpFetcher};
pub use http::{
    BodyStream, Request, Response, ResponseKind, StreamingResponse, origin_url, parse_url,
    same_origin,
};
pub use manifest::AssetManifest;
pub use policy::{
    CachePolicy, DEFAULT_EXCLUSION_MARKERS, ExclusionMarkers, NetworkFailurePolicy, PassReason,
    Route,
};
pub use registration::{Registration, UpdateOutcome};
pub use storage::{CacheStorage, MemoryCacheStorage};

use crate::config::CacheConfig;
use crate::error::Result;

/// Loads the manifest named by configuration: the JSON file if set, else a
/// scan of the build directory, else an empty manifest.
///
/// # Errors
///
/// Returns an error if the configured file or directory cannot be read.
pub fn load_manifest(config: &CacheConfig) -> Result<AssetManifest> {
    if let Some(path) = &config.manifest {
        return AssetManifest::from_json_file(path);
    }
    if let Some(dir) = &config.build_dir {
        return AssetManifest::scan_dir(dir, &config.base_path);
    }
    log::warn!("No manifest or build_dir configured; nothing will be cached");
    Ok(AssetManifest::default())
}

/// Disk-backed controller over the real network, as used by the binary.
pub type HttpController = AssetCacheController<DiskCacheStorage, HttpFetcher>;

/// Builds a disk-backed, network-backed controller from configuration.
///
/// # Errors
///
/// Returns an error if the manifest cannot be loaded, the origin does not
/// parse, or the HTTP client cannot be built.
pub fn controller_from_config(config: &CacheConfig) -> Result<HttpController> {
    let settings = ControllerSettings::from_config(config, load_manifest(config)?)?;
    let fetcher = HttpFetcher::new(settings.origin.clone())?;
    Ok(AssetCacheController::new(
        std::sync::Arc::new(DiskCacheStorage::new(&config.cache_dir)),
        std::sync::Arc::new(fetcher),
        settings,
    ))
}
