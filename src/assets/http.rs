//! Request and response values flowing through the cache controller.

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a response relates to the page origin, mirroring the fetch API's
/// response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Same-origin response with readable status and body.
    Basic,
    /// Cross-origin response readable through CORS.
    Cors,
    /// Cross-origin response whose status and body are hidden.
    Opaque,
    /// Redirect captured with `redirect: manual`; unreadable.
    OpaqueRedirect,
}

/// An outgoing request as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
}

impl Request {
    #[must_use]
    pub const fn new(method: Method, url: Url) -> Self {
        Self { method, url }
    }

    /// Builds a GET request from a URL string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `url` does not parse.
    pub fn get(url: &str) -> Result<Self> {
        Ok(Self::new(Method::GET, parse_url(url)?))
    }

    /// Path component used for manifest lookup and as the cache key.
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }
}

/// A response body with its status, type and headers.
///
/// Cloning is cheap; the body is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub kind: ResponseKind,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    /// Creates a basic (same-origin) response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            kind: ResponseKind::Basic,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Sets the response type.
    #[must_use]
    pub const fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// True for 2xx statuses.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status >= 200 && self.status <= 299
    }

    /// Returns the first header with the given name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response body delivered chunk by chunk.
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// A response whose body is streamed to the caller instead of buffered.
///
/// Used for traffic the cache never stores, such as model weights.
pub struct StreamingResponse {
    pub status: u16,
    pub kind: ResponseKind,
    pub headers: Vec<(String, String)>,
    pub body: BodyStream,
}

impl From<Response> for StreamingResponse {
    fn from(response: Response) -> Self {
        let Response {
            status,
            kind,
            headers,
            body,
        } = response;
        Self {
            status,
            kind,
            headers,
            body: futures::stream::once(async move { Ok(body) }).boxed(),
        }
    }
}

/// Resolves an origin-relative request target (`/path?query`) on `origin`.
///
/// The result always stays on `origin`: a target such as `//other.host/x`
/// is taken as a path, never as a network-path reference.
#[must_use]
pub fn origin_url(origin: &Url, target: &str) -> Url {
    let (path, query) = target
        .split_once('?')
        .map_or((target, None), |(path, query)| (path, Some(query)));
    let mut url = origin.clone();
    url.set_path(path);
    url.set_query(query);
    url.set_fragment(None);
    url
}

/// Parses a URL, mapping failures to [`Error::InvalidUrl`].
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] if `url` does not parse.
pub fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))
}

/// True when both URLs share scheme, host and port.
#[must_use]
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}
