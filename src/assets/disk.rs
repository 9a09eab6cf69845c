//! Cache storage on the local file system.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<base64url(cache name)>/<sha256(key)>.json
//! ```
//!
//! Each entry file holds the key, status, type, headers and base64 body.
//! Directories starting with `.` are staging areas and never listed as caches.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::http::{Response, ResponseKind};
use super::storage::CacheStorage;
use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    status: u16,
    kind: ResponseKind,
    headers: Vec<(String, String)>,
    body: String,
    stored_at: DateTime<Utc>,
}

impl StoredEntry {
    fn new(key: &str, response: &Response) -> Self {
        Self {
            key: key.to_string(),
            status: response.status,
            kind: response.kind,
            headers: response.headers.clone(),
            body: BASE64.encode(&response.body),
            stored_at: Utc::now(),
        }
    }

    fn into_response(self) -> Result<Response> {
        let body = BASE64
            .decode(self.body)
            .map_err(|e| Error::Cache(format!("corrupted body for {}: {e}", self.key)))?;
        Ok(Response {
            status: self.status,
            kind: self.kind,
            headers: self.headers,
            body: body.into(),
        })
    }
}

fn entry_file_name(key: &str) -> String {
    format!("{:x}.json", Sha256::digest(key.as_bytes()))
}

fn cache_err(action: &str, path: &Path, e: &std::io::Error) -> Error {
    Error::Cache(format!("failed to {action} {}: {e}", path.display()))
}

/// Durable cache storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, cache: &str) -> PathBuf {
        self.root.join(URL_SAFE_NO_PAD.encode(cache))
    }

    async fn write_entry(dir: &Path, key: &str, response: &Response) -> Result<()> {
        let path = dir.join(entry_file_name(key));
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&StoredEntry::new(key, response))?;

        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| cache_err("write", &tmp_path, &e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| cache_err("rename", &tmp_path, &e))
    }

    async fn read_entry(path: &Path) -> Result<Option<StoredEntry>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::Cache(format!("corrupted entry {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(cache_err("read", path, &e)),
        }
    }

    async fn stage_entries(staging: &Path, entries: &[(String, Response)]) -> Result<()> {
        tokio::fs::create_dir_all(staging)
            .await
            .map_err(|e| cache_err("create", staging, &e))?;
        for (key, response) in entries {
            Self::write_entry(staging, key, response).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn keys(&self) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(cache_err("list", &self.root, &e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| cache_err("list", &self.root, &e))?
        {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with('.') {
                continue;
            }
            match URL_SAFE_NO_PAD
                .decode(file_name.as_bytes())
                .ok()
                .and_then(|raw| String::from_utf8(raw).ok())
            {
                Some(name) => names.push(name),
                None => log::debug!("Ignoring foreign directory {file_name} in cache root"),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn has(&self, cache: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(self.cache_dir(cache))
            .await
            .is_ok_and(|m| m.is_dir()))
    }

    async fn delete(&self, cache: &str) -> Result<bool> {
        let dir = self.cache_dir(cache);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(cache_err("delete", &dir, &e)),
        }
    }

    async fn lookup(&self, cache: &str, key: &str) -> Result<Option<Response>> {
        let path = self.cache_dir(cache).join(entry_file_name(key));
        match Self::read_entry(&path).await? {
            Some(entry) if entry.key == key => entry.into_response().map(Some),
            _ => Ok(None),
        }
    }

    async fn put(&self, cache: &str, key: &str, response: Response) -> Result<()> {
        let dir = self.cache_dir(cache);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| cache_err("create", &dir, &e))?;
        Self::write_entry(&dir, key, &response).await
    }

    async fn put_all(&self, cache: &str, entries: Vec<(String, Response)>) -> Result<()> {
        let dir = self.cache_dir(cache);
        let encoded = URL_SAFE_NO_PAD.encode(cache);
        let staging = self.root.join(format!(".staging-{encoded}"));
        let retired = self.root.join(format!(".retired-{encoded}"));

        // Leftovers of an interrupted attempt
        let _ = tokio::fs::remove_dir_all(&staging).await;
        if let Err(e) = Self::stage_entries(&staging, &entries).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        // The live directory is swapped whole, never filled entry by entry.
        let had_previous = tokio::fs::metadata(&dir).await.is_ok();
        if had_previous {
            let _ = tokio::fs::remove_dir_all(&retired).await;
            if let Err(e) = tokio::fs::rename(&dir, &retired).await {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(cache_err("retire", &dir, &e));
            }
        }
        if let Err(e) = tokio::fs::rename(&staging, &dir).await {
            if had_previous {
                let _ = tokio::fs::rename(&retired, &dir).await;
            }
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(cache_err("move", &staging, &e));
        }
        if had_previous {
            let _ = tokio::fs::remove_dir_all(&retired).await;
        }
        Ok(())
    }

    async fn entries(&self, cache: &str) -> Result<Vec<String>> {
        let dir_path = self.cache_dir(cache);
        let mut dir = match tokio::fs::read_dir(&dir_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(cache_err("list", &dir_path, &e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| cache_err("list", &dir_path, &e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stored) = Self::read_entry(&path).await? {
                    keys.push(stored.key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
