//! File-backed record database.
//!
//! Layout: `<root>/<container>.json`, one JSON document per container. A
//! commit writes `<container>.json.tmp` and renames it over the old file, so
//! readers see either the old or the new container, never a mix.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::database::{Container, RecordDatabase, WriteOp};
use crate::error::{Error, Result};

/// Durable database storing each container as a JSON file under a directory.
#[derive(Debug)]
pub struct FileDatabase {
    root: PathBuf,
    // Serializes transactions so their read-apply-write steps never interleave.
    write_lock: Mutex<()>,
}

impl FileDatabase {
    /// Creates a database rooted at `root`. Nothing is touched on disk until
    /// the first [`RecordDatabase::open`].
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the directory holding the container files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, container: &str) -> PathBuf {
        self.root.join(format!("{container}.json"))
    }

    /// Reads a container, treating a missing file as an empty container.
    async fn read_container(&self, container: &str) -> Result<Container> {
        let path = self.container_path(container);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::StorageUnavailable(format!("corrupted {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Container::default()),
            Err(e) => Err(Error::StorageUnavailable(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn write_container(&self, container: &str, contents: &Container) -> Result<()> {
        let path = self.container_path(container);
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(contents)?;

        let written = async {
            tokio::fs::write(&tmp_path, bytes).await?;
            tokio::fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(Error::Transaction(format!(
                "failed to write {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordDatabase for FileDatabase {
    async fn open(&self, container: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::StorageUnavailable(format!(
                "cannot create database directory {}: {e}",
                self.root.display()
            ))
        })?;
        // Validates an existing container file; a missing one is created on first commit.
        self.read_container(container).await.map(|_| ())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Option<Value>> {
        let contents = self.read_container(container).await?;
        Ok(contents.records.get(key).cloned())
    }

    async fn commit(&self, container: &str, ops: Vec<WriteOp>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let current = self.read_container(container).await?;
        let next = current.staged(ops)?;
        self.write_container(container, &next).await?;
        log::debug!(
            "Committed {} record(s) to {}",
            next.records.len(),
            self.container_path(container).display()
        );
        Ok(())
    }
}
