//! HTTP server for the chat front-end.
//!
//! Exposes the transcript store under `/api/transcript` and answers every
//! other GET through the asset cache, proxying to the app origin whatever
//! the cache does not handle.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::get;
use reqwest::Url;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::assets::{
    CacheStorage, FetchOutcome, Fetcher, NoProgress, PassReason, Registration, Request,
    ResponseSource, StreamingResponse, controller_from_config, origin_url,
};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::transcript::{Message, RecordDatabase, TranscriptStore};

/// Response header naming where an asset came from.
pub const CACHE_HEADER: &str = "x-webchat-cache";

const HOP_BY_HOP: &[&str] = &["connection", "content-length", "keep-alive", "transfer-encoding"];

/// Shared server state.
pub struct AppState<D: RecordDatabase, S: CacheStorage, F: Fetcher> {
    pub store: TranscriptStore<D>,
    pub registration: Arc<Registration<S, F>>,
    pub fetcher: Arc<F>,
    pub origin: Url,
}

impl<D: RecordDatabase, S: CacheStorage, F: Fetcher> Clone for AppState<D, S, F> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registration: Arc::clone(&self.registration),
            fetcher: Arc::clone(&self.fetcher),
            origin: self.origin.clone(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    cache: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(e: &Error) -> HttpResponse {
    let status = match e {
        Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Network(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        axum::Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

const fn source_name(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
        ResponseSource::Fallback => "fallback",
    }
}

fn to_http(
    status: u16,
    headers: &[(String, String)],
    body: Body,
    source: Option<ResponseSource>,
) -> HttpResponse {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in headers {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(source) = source {
        builder = builder.header(CACHE_HEADER, source_name(source));
    }
    builder
        .body(body)
        .unwrap_or_else(|e| (StatusCode::BAD_GATEWAY, e.to_string()).into_response())
}

async fn api_health<D, S, F>(State(state): State<AppState<D, S, F>>) -> impl IntoResponse
where
    D: RecordDatabase + 'static,
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        cache: state
            .registration
            .active()
            .map(|c| c.cache_name().to_string()),
    })
}

async fn api_get_transcript<D, S, F>(State(state): State<AppState<D, S, F>>) -> HttpResponse
where
    D: RecordDatabase + 'static,
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    match state.store.load().await {
        Ok(Some(messages)) => axum::Json(messages).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            log::error!("Loading transcript failed: {e}");
            error_response(&e)
        }
    }
}

async fn api_put_transcript<D, S, F>(
    State(state): State<AppState<D, S, F>>,
    axum::Json(messages): axum::Json<Vec<Message>>,
) -> HttpResponse
where
    D: RecordDatabase + 'static,
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    match state.store.save(&messages).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            log::error!("Saving transcript failed: {e}");
            error_response(&e)
        }
    }
}

async fn serve_asset<D, S, F>(
    State(state): State<AppState<D, S, F>>,
    method: Method,
    uri: Uri,
) -> HttpResponse
where
    D: RecordDatabase + 'static,
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    // Only path and query come from the client, so the proxy stays on origin
    let request = Request::new(reqwest::Method::GET, origin_url(&state.origin, target));

    match state.registration.handle_fetch(&request).await {
        Ok(FetchOutcome::Respond { response, source }) => to_http(
            response.status,
            &response.headers,
            Body::from(response.body),
            Some(source),
        ),
        Ok(FetchOutcome::Passthrough(PassReason::CrossOrigin)) => {
            log::warn!("Refusing to proxy {} off origin", request.url);
            StatusCode::FORBIDDEN.into_response()
        }
        Ok(FetchOutcome::Passthrough(reason)) => {
            log::debug!("Proxying {target}: {reason:?}");
            match state.fetcher.fetch_stream(&request).await {
                Ok(StreamingResponse {
                    status,
                    headers,
                    body,
                    ..
                }) => to_http(status, &headers, Body::from_stream(body), None),
                Err(e) => error_response(&e),
            }
        }
        Err(e) => {
            log::warn!("Serving {target} failed: {e}");
            error_response(&e)
        }
    }
}

/// Builds the router over the given state.
pub fn router<D, S, F>(state: AppState<D, S, F>) -> Router
where
    D: RecordDatabase + 'static,
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(api_health::<D, S, F>))
        .route(
            "/api/transcript",
            get(api_get_transcript::<D, S, F>).put(api_put_transcript::<D, S, F>),
        )
        .fallback(serve_asset::<D, S, F>)
        .layer(cors)
        .with_state(state)
}

/// Runs the server until Ctrl-C.
///
/// A failed asset install is logged and the server keeps running without
/// offline support.
///
/// # Errors
///
/// Returns an error if the controller cannot be built or the listener
/// cannot bind.
pub async fn run_server(config: &AppConfig) -> Result<()> {
    let controller = controller_from_config(&config.cache)?;
    let origin = controller.settings().origin.clone();
    let fetcher = Arc::new(crate::assets::HttpFetcher::new(origin.clone())?);

    let registration = Arc::new(Registration::new());
    if let Err(e) = registration.update(controller, &NoProgress).await {
        log::error!("Asset cache unavailable, serving from network only: {e}");
    }

    let state = AppState {
        store: TranscriptStore::from_config(&config.storage),
        registration,
        fetcher,
        origin,
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Received SIGINT");
        })
        .await?;
    log::info!("Shutdown complete");
    Ok(())
}
