//! In-memory network and storage doubles used by the cache tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::Notify;

use super::fetch::Fetcher;
use super::http::{Request, Response, StreamingResponse};
use super::storage::{CacheStorage, MemoryCacheStorage};
use crate::error::{Error, Result};

/// Serves canned responses by URL; unknown URLs get a 404. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    routes: Arc<Mutex<HashMap<String, Response>>>,
    gates: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
    offline: Arc<AtomicBool>,
    requests: Arc<AtomicUsize>,
    chunk_size: Arc<AtomicUsize>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, response: Response) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), response);
    }

    /// Holds every fetch of `url` at the network until the returned gate
    /// is notified. The request counts as made while it is held.
    pub fn hold(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes `fetch_stream` deliver bodies in chunks of at most `bytes`.
    pub fn set_chunk_size(&self, bytes: usize) {
        self.chunk_size.store(bytes, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let gate = self
            .gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request.url.as_str())
            .cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network(format!("{}: offline", request.url)));
        }
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(routes
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| Response::new(404, "not found")))
    }

    async fn fetch_stream(&self, request: &Request) -> Result<StreamingResponse> {
        let response = self.fetch(request).await?;
        let size = self.chunk_size.load(Ordering::SeqCst);
        if size == 0 {
            return Ok(response.into());
        }
        let chunks: Vec<Result<Bytes>> = response
            .body
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(StreamingResponse {
            status: response.status,
            kind: response.kind,
            headers: response.headers,
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// Memory storage whose deletes can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct FlakyStorage {
    pub inner: MemoryCacheStorage,
    fail_deletes: Arc<AtomicBool>,
}

impl FlakyStorage {
    pub fn new(inner: MemoryCacheStorage) -> Self {
        Self {
            inner,
            fail_deletes: Arc::default(),
        }
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStorage for FlakyStorage {
    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn has(&self, cache: &str) -> Result<bool> {
        self.inner.has(cache).await
    }

    async fn delete(&self, cache: &str) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::Cache(format!("cannot delete {cache}")));
        }
        self.inner.delete(cache).await
    }

    async fn lookup(&self, cache: &str, key: &str) -> Result<Option<Response>> {
        self.inner.lookup(cache, key).await
    }

    async fn put(&self, cache: &str, key: &str, response: Response) -> Result<()> {
        self.inner.put(cache, key, response).await
    }

    async fn put_all(&self, cache: &str, entries: Vec<(String, Response)>) -> Result<()> {
        self.inner.put_all(cache, entries).await
    }

    async fn entries(&self, cache: &str) -> Result<Vec<String>> {
        self.inner.entries(cache).await
    }
}
