//! Routing policy: which requests the controller may touch.

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

use super::http::{Request, Response, ResponseKind, same_origin};
use super::manifest::AssetManifest;
use crate::config::CacheConfig;

/// Path fragments belonging to the inference engine's own assets (weights,
/// tokenizers, WASM, model manifests).
///
/// Excluding a legitimate static asset by accident costs an offline hit;
/// caching a model shard by accident costs hundreds of megabytes.
pub const DEFAULT_EXCLUSION_MARKERS: &[&str] = &[
    ".wasm",
    "ndarray",
    "params",
    "tokenizer",
    "mlc",
    "model",
    ".bin",
    ".json",
];

/// Case-insensitive set of path substrings that are never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionMarkers {
    markers: Vec<String>,
}

impl Default for ExclusionMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUSION_MARKERS)
    }
}

impl ExclusionMarkers {
    /// Builds a marker set; empty markers are dropped since they would match everything.
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// Returns the first marker contained in `path`, if any.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&str> {
        let lowered = path.to_lowercase();
        self.markers
            .iter()
            .find(|m| lowered.contains(m.as_str()))
            .map(String::as_str)
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// What happens when the network fails for a manifest asset missing from
/// the current cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkFailurePolicy {
    /// Serve any copy still held by one of the app's cache generations.
    #[default]
    FallbackToCache,
    /// Surface the network error.
    Propagate,
}

/// Why a request was left to the network untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassReason {
    NonGet,
    CrossOrigin,
    /// Path contains the given exclusion marker.
    Excluded(String),
    NotInManifest,
    /// No active controller to handle the request.
    NoController,
}

/// Routing decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Pass(PassReason),
    /// Same-origin, non-excluded manifest asset: serve through the cache.
    Serve,
}

/// Controller policy, selected once per generation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CachePolicy {
    pub markers: ExclusionMarkers,
    pub network_failure: NetworkFailurePolicy,
    /// Allow caching successful CORS responses. Opaque responses are never cached.
    pub cache_non_basic: bool,
}

impl CachePolicy {
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            markers: ExclusionMarkers::new(&config.exclusion_markers),
            network_failure: config.network_failure,
            cache_non_basic: config.cache_non_basic,
        }
    }

    /// Decides whether the controller handles `request` at all.
    ///
    /// Checks run in order: method, origin, exclusion markers, manifest.
    #[must_use]
    pub fn route(&self, request: &Request, origin: &Url, manifest: &AssetManifest) -> Route {
        if request.method != Method::GET {
            return Route::Pass(PassReason::NonGet);
        }
        if !same_origin(&request.url, origin) {
            return Route::Pass(PassReason::CrossOrigin);
        }
        if let Some(marker) = self.markers.find(request.path()) {
            return Route::Pass(PassReason::Excluded(marker.to_string()));
        }
        if !manifest.contains(request.path()) {
            return Route::Pass(PassReason::NotInManifest);
        }
        Route::Serve
    }

    /// True if a network response may be written to the cache.
    #[must_use]
    pub const fn is_cacheable(&self, response: &Response) -> bool {
        if !response.is_ok() {
            return false;
        }
        match response.kind {
            ResponseKind::Basic => true,
            ResponseKind::Cors => self.cache_non_basic,
            ResponseKind::Opaque | ResponseKind::OpaqueRedirect => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::http::parse_url;

    fn origin() -> Url {
        parse_url("https://chat.example").unwrap()
    }

    fn manifest() -> AssetManifest {
        AssetManifest::new([
            "/",
            "/_app/immutable/start.js",
            "/models/tokenizer.json",
            "/favicon.png",
        ])
    }

    fn route(url: &str) -> Route {
        CachePolicy::default().route(&Request::get(url).unwrap(), &origin(), &manifest())
    }

    #[test]
    fn manifest_asset_is_served() {
        assert_eq!(route("https://chat.example/_app/immutable/start.js"), Route::Serve);
        assert_eq!(route("https://chat.example/"), Route::Serve);
    }

    #[test]
    fn non_get_passes() {
        let request = Request::new(
            Method::POST,
            parse_url("https://chat.example/favicon.png").unwrap(),
        );
        assert_eq!(
            CachePolicy::default().route(&request, &origin(), &manifest()),
            Route::Pass(PassReason::NonGet)
        );
    }

    #[test]
    fn cross_origin_passes_regardless_of_path() {
        assert_eq!(
            route("https://huggingface.co/_app/immutable/start.js"),
            Route::Pass(PassReason::CrossOrigin)
        );
    }

    #[test]
    fn exclusion_beats_manifest_membership() {
        assert_eq!(
            route("https://chat.example/models/tokenizer.json"),
            Route::Pass(PassReason::Excluded("tokenizer".to_string()))
        );
    }

    #[test]
    fn exclusion_is_case_insensitive() {
        assert!(matches!(
            route("https://chat.example/weights/Llama-Q4.WASM"),
            Route::Pass(PassReason::Excluded(_))
        ));
    }

    #[test]
    fn unknown_same_origin_path_passes() {
        assert_eq!(
            route("https://chat.example/api/other"),
            Route::Pass(PassReason::NotInManifest)
        );
    }

    #[test]
    fn query_string_is_ignored_for_routing() {
        assert_eq!(route("https://chat.example/favicon.png?v=3"), Route::Serve);
    }

    #[test]
    fn empty_markers_are_dropped() {
        let markers = ExclusionMarkers::new(["", "MLC-"]);
        assert_eq!(markers.len(), 1);
        assert!(markers.matches("/mlc-chat/config"));
        assert!(!markers.matches("/index.html"));
    }

    #[test]
    fn cacheability_by_kind() {
        let strict = CachePolicy::default();
        let relaxed = CachePolicy {
            cache_non_basic: true,
            ..CachePolicy::default()
        };
        let ok = Response::new(200, "x");

        assert!(strict.is_cacheable(&ok));
        assert!(!strict.is_cacheable(&Response::new(500, "x")));
        assert!(!strict.is_cacheable(&ok.clone().with_kind(ResponseKind::Cors)));
        assert!(relaxed.is_cacheable(&ok.clone().with_kind(ResponseKind::Cors)));
        assert!(!relaxed.is_cacheable(&ok.with_kind(ResponseKind::Opaque)));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn any_path_with_a_marker_is_excluded(
                prefix in "[a-z/]{0,12}",
                marker in prop::sample::select(DEFAULT_EXCLUSION_MARKERS),
                suffix in "[a-z/]{0,12}",
                upper in any::<bool>(),
            ) {
                let marker = if upper { marker.to_uppercase() } else { marker.to_string() };
                let path = format!("/{prefix}{marker}{suffix}");
                prop_assert!(ExclusionMarkers::default().matches(&path));
            }
        }
    }
}
