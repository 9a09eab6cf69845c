//! Static asset manifest: the build-time list of paths eligible for caching.

use std::collections::BTreeSet;
use std::path::Path;

use reqwest::Url;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Set of `/`-rooted, percent-encoded asset paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetManifest {
    paths: BTreeSet<String>,
}

/// Normalizes a manifest entry to the form `Url::path` produces.
fn normalize(path: &str) -> String {
    let rooted = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Url::parse("http://manifest.invalid")
        .and_then(|base| base.join(&rooted))
        .map_or(rooted, |url| url.path().to_string())
}

impl AssetManifest {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            paths: paths.into_iter().map(|p| normalize(p.as_ref())).collect(),
        }
    }

    /// Loads a manifest from a JSON array of paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a string array.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let paths: Vec<String> = serde_json::from_slice(&bytes)?;
        Ok(Self::new(paths))
    }

    /// Builds a manifest from every file under a build output directory.
    ///
    /// Paths are relative to `dir`, `/`-separated, and prefixed with
    /// `base_path` (which may be empty).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be walked.
    pub fn scan_dir(dir: &Path, base_path: &str) -> Result<Self> {
        let base = base_path.trim_end_matches('/');
        let mut paths = Vec::new();

        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let segments: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect();
            paths.push(format!("{base}/{}", segments.join("/")));
        }

        log::debug!("Scanned {} asset(s) under {}", paths.len(), dir.display());
        Ok(Self::new(paths))
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
