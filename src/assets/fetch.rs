//! Network access for the cache controller.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;

use super::http::{Request, Response, ResponseKind, StreamingResponse, same_origin};
use crate::error::{Error, Result};

/// Abstraction over the network for testability.
///
/// A non-2xx status is still `Ok`; only transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;

    /// Fetches without holding the whole body in memory.
    ///
    /// The default buffers through [`fetch`](Self::fetch).
    async fn fetch_stream(&self, request: &Request) -> Result<StreamingResponse> {
        self.fetch(request).await.map(StreamingResponse::from)
    }
}

/// Builds the HTTP client used for asset fetches.
fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

type Head = (u16, ResponseKind, Vec<(String, String)>);

/// Fetcher backed by `reqwest`.
///
/// Responses whose final URL (after redirects) shares the page origin are
/// `basic`; everything else is reported as `cors`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    origin: Url,
}

impl HttpFetcher {
    /// Creates a fetcher for pages served from `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(origin: Url) -> Result<Self> {
        Ok(Self::with_client(build_http_client()?, origin))
    }

    #[must_use]
    pub const fn with_client(client: reqwest::Client, origin: Url) -> Self {
        Self { client, origin }
    }

    #[must_use]
    pub const fn origin(&self) -> &Url {
        &self.origin
    }

    async fn send(&self, request: &Request) -> Result<reqwest::Response> {
        self.client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await
            .map_err(|e| Error::Network(format!("{}: {e}", request.url)))
    }

    fn head(&self, response: &reqwest::Response) -> Head {
        let kind = if same_origin(response.url(), &self.origin) {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        };
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        (response.status().as_u16(), kind, headers)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let response = self.send(request).await?;
        let (status, kind, headers) = self.head(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("{}: {e}", request.url)))?;

        log::debug!("Fetched {} -> {status} ({} bytes)", request.url, body.len());
        Ok(Response {
            status,
            kind,
            headers,
            body,
        })
    }

    async fn fetch_stream(&self, request: &Request) -> Result<StreamingResponse> {
        let response = self.send(request).await?;
        let (status, kind, headers) = self.head(&response);
        log::debug!("Streaming {} -> {status}", request.url);

        let url = request.url.clone();
        let body = futures::stream::try_unfold(response, move |mut response| {
            let url = url.clone();
            async move {
                let chunk = response
                    .chunk()
                    .await
                    .map_err(|e| Error::Network(format!("{url}: {e}")))?;
                Ok::<_, Error>(chunk.map(|chunk| (chunk, response)))
            }
        })
        .boxed();

        Ok(StreamingResponse {
            status,
            kind,
            headers,
            body,
        })
    }
}
