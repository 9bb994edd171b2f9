//! Revision manifests: original path → hashed path, one per asset class.
//!
//! A manifest is written as `rev-manifest.json` inside its class's output
//! directory, as a flat JSON object with sorted keys:
//!
//! ```json
//! {
//!   "img/icons/menu.svg": "img/icons/menu.3f2a9c01be.svg",
//!   "img/logo.png": "img/logo.0a1b2c3d4e.png"
//! }
//! ```
//!
//! Paths are relative to the output root, so a key is exactly the string a
//! page would use to reference the unhashed asset from the site root.
//!
//! # Lifecycle
//!
//! A [`ManifestRecorder`] accumulates entries while a class is processed and
//! is consumed by [`ManifestRecorder::finish`], producing an immutable
//! [`RevManifest`]. Nothing mutates a manifest after that; the rewrite stage
//! only reads it. Ordering (every asset hashed before emission) is the
//! pipeline's responsibility, not the recorder's.
//!
//! # Duplicate keys
//!
//! The last recorded entry for a key wins. The asset stage records in sorted
//! source order, so the outcome is deterministic; every overwrite is logged
//! and counted so a report can surface it.

use crate::fsutil;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of an emitted manifest within its class's output directory.
pub const MANIFEST_FILENAME: &str = "rev-manifest.json";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Immutable mapping of one asset class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevManifest {
    entries: BTreeMap<String, String>,
}

impl RevManifest {
    pub fn get(&self, original: &str) -> Option<&str> {
        self.entries.get(original).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether `path` is one of this manifest's hashed paths.
    pub fn is_hashed_value(&self, path: &str) -> bool {
        self.entries.values().any(|v| v == path)
    }

    /// Path of the manifest file inside a class output directory.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILENAME)
    }

    /// Write the manifest into `dir` atomically.
    pub fn emit(&self, dir: &Path) -> Result<PathBuf, ManifestError> {
        let path = Self::path_in(dir);
        let json = serde_json::to_string_pretty(self).map_err(|e| ManifestError::Write {
            path: path.clone(),
            source: e.into(),
        })?;
        fsutil::write_atomic(&path, json.as_bytes()).map_err(|source| ManifestError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Read a previously emitted manifest from `dir`.
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let path = Self::path_in(dir);
        let content = fs::read_to_string(&path).map_err(|source| ManifestError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ManifestError::Parse { path, source })
    }
}

impl FromIterator<(String, String)> for RevManifest {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Accumulates the entries of one asset class.
#[derive(Debug)]
pub struct ManifestRecorder {
    class: String,
    entries: BTreeMap<String, String>,
    duplicates: Vec<String>,
}

impl ManifestRecorder {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            entries: BTreeMap::new(),
            duplicates: Vec::new(),
        }
    }

    /// Record one asset. A repeated original path replaces the earlier entry.
    pub fn record(&mut self, original: impl Into<String>, hashed: impl Into<String>) {
        let original = original.into();
        let hashed = hashed.into();
        if let Some(previous) = self.entries.insert(original.clone(), hashed.clone()) {
            tracing::warn!(
                class = %self.class,
                original = %original,
                previous = %previous,
                hashed = %hashed,
                "duplicate manifest key, last entry wins"
            );
            self.duplicates.push(original);
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Original paths recorded more than once, in recording order.
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    pub fn finish(self) -> RevManifest {
        RevManifest {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{content_token, hashed_path};
    use tempfile::TempDir;

    #[test]
    fn records_n_distinct_paths() {
        let mut recorder = ManifestRecorder::new("images");
        let originals: Vec<String> = (0..25).map(|i| format!("img/photo-{i}.png")).collect();
        let mut tokens = Vec::new();
        for original in &originals {
            let token = content_token(original.as_bytes(), 10);
            recorder.record(original.clone(), hashed_path(original, &token));
            tokens.push(token);
        }
        assert!(recorder.duplicates().is_empty());

        let manifest = recorder.finish();
        assert_eq!(manifest.len(), originals.len());
        for (original, token) in originals.iter().zip(&tokens) {
            assert!(manifest.get(original).unwrap().contains(token.as_str()));
        }
    }

    #[test]
    fn duplicate_key_last_wins_and_is_counted() {
        let mut recorder = ManifestRecorder::new("styles");
        recorder.record("css/main.css", "css/main.aaaaaa.css");
        recorder.record("css/main.css", "css/main.bbbbbb.css");

        assert_eq!(recorder.duplicates(), ["css/main.css".to_string()]);
        let manifest = recorder.finish();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.get("css/main.css"), Some("css/main.bbbbbb.css"));
    }

    #[test]
    fn emit_writes_flat_sorted_json() {
        let tmp = TempDir::new().unwrap();
        let mut recorder = ManifestRecorder::new("images");
        recorder.record("img/z.png", "img/z.111111.png");
        recorder.record("img/a.png", "img/a.222222.png");
        let manifest = recorder.finish();

        let path = manifest.emit(tmp.path()).unwrap();
        assert_eq!(path, tmp.path().join(MANIFEST_FILENAME));

        let json = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["img/a.png"], "img/a.222222.png");
        assert!(json.find("img/a.png").unwrap() < json.find("img/z.png").unwrap());
    }

    #[test]
    fn load_reads_emitted_manifest() {
        let tmp = TempDir::new().unwrap();
        let manifest: RevManifest = [("img/logo.png".to_string(), "img/logo.abc123.png".to_string())]
            .into_iter()
            .collect();
        manifest.emit(tmp.path()).unwrap();
        assert_eq!(RevManifest::load(tmp.path()).unwrap(), manifest);
    }

    #[test]
    fn load_missing_is_read_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            RevManifest::load(tmp.path()),
            Err(ManifestError::Read { .. })
        ));
    }

    #[test]
    fn load_non_object_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(MANIFEST_FILENAME), "[1, 2]").unwrap();
        assert!(matches!(
            RevManifest::load(tmp.path()),
            Err(ManifestError::Parse { .. })
        ));
    }

    #[test]
    fn emit_into_unwritable_location_fails() {
        let tmp = TempDir::new().unwrap();
        // A regular file where the directory should be.
        let blocker = tmp.path().join("img");
        fs::write(&blocker, "").unwrap();
        let manifest = RevManifest::default();
        assert!(matches!(
            manifest.emit(&blocker),
            Err(ManifestError::Write { .. })
        ));
    }

    #[test]
    fn is_hashed_value() {
        let manifest: RevManifest = [("js/app.js".to_string(), "js/app.abcdef.js".to_string())]
            .into_iter()
            .collect();
        assert!(manifest.is_hashed_value("js/app.abcdef.js"));
        assert!(!manifest.is_hashed_value("js/app.js"));
    }
}
