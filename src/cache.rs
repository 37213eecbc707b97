// src/cache.rs
//! Last-seen snapshot per source, persisted as a JSON object.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::snapshot::Snapshot;

/// File name used for a source's cache inside the cache directory.
pub fn cache_file_name(source: &str) -> String {
    format!("cache-{source}.json")
}

#[derive(Debug)]
pub struct CacheStore {
    path: Option<PathBuf>,
    entry: Option<Snapshot>,
}

impl CacheStore {
    /// Cache backed by `path`. Nothing is read until the first [`get`](Self::get).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            entry: None,
        }
    }

    /// Cache for `source` under `dir`.
    pub fn in_dir(dir: &Path, source: &str) -> Self {
        Self::new(dir.join(cache_file_name(source)))
    }

    /// In-memory only cache; starts empty on every run.
    pub fn disabled() -> Self {
        Self {
            path: None,
            entry: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current entry. Loads the backing file on first use; a missing or
    /// unreadable file yields an empty entry.
    pub async fn get(&mut self) -> &Snapshot {
        if self.entry.is_none() {
            let loaded = match self.path.as_deref() {
                Some(p) => load(p).await,
                None => Snapshot::new(),
            };
            self.entry = Some(loaded);
        }
        self.entry.get_or_insert_with(Snapshot::new)
    }

    /// Replace the entry with `snapshot` and write it out. Returns the JSON text
    /// that was persisted.
    ///
    /// The in-memory entry is advanced before the write, so a write failure
    /// never causes the same snapshot to be handled twice in this process.
    pub async fn set(&mut self, snapshot: &Snapshot) -> Result<String> {
        let content = serde_json::to_string_pretty(&Value::Object(snapshot.to_persisted()))
            .context("serialize cache entry")?;
        let reparsed: Map<String, Value> =
            serde_json::from_str(&content).context("re-read cache entry")?;
        self.entry = Some(Snapshot::from_map(reparsed));

        if let Some(path) = &self.path {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating cache dir {}", dir.display()))?;
            }
            tokio::fs::write(path, &content)
                .await
                .with_context(|| format!("writing cache {}", path.display()))?;
        }
        Ok(content)
    }
}

async fn load(path: &Path) -> Snapshot {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "no cache file, starting empty");
            return Snapshot::new();
        }
    };
    match serde_json::from_str::<Map<String, Value>>(&text) {
        Ok(map) => Snapshot::from_map(map),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "corrupt cache file, starting empty");
            Snapshot::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Field;
    use serde_json::json;

    fn snap(v: Value) -> Snapshot {
        Snapshot::from_map(v.as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn round_trip_strips_internal_and_marks_opaque() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::in_dir(dir.path(), "twitch-demo");

        let mut s = snap(json!({"id": "A", "viewers": 3, "_token": "x", "tags": ["en"]}));
        s.derive("fetched", Field::opaque("Instant", "now"));
        store.set(&s).await.unwrap();

        let mut reloaded = CacheStore::in_dir(dir.path(), "twitch-demo");
        let got = reloaded.get().await.to_persisted();
        assert_eq!(
            Value::Object(got),
            json!({"id": "A", "viewers": 3, "tags": ["en"], "fetched": "<<Instant>>"})
        );
    }

    #[tokio::test]
    async fn in_memory_entry_matches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::in_dir(dir.path(), "s");
        let mut s = snap(json!({"id": 7}));
        s.derive("when", Field::opaque("DateTime", "x"));
        store.set(&s).await.unwrap();
        assert_eq!(store.get().await.get_str("when"), Some("<<DateTime>>"));
    }

    #[tokio::test]
    async fn corrupt_or_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache-bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(CacheStore::new(&path).get().await.is_empty());
        assert!(CacheStore::in_dir(dir.path(), "absent").get().await.is_empty());
    }

    #[tokio::test]
    async fn disabled_cache_keeps_memory_only() {
        let mut store = CacheStore::disabled();
        assert!(store.get().await.is_empty());
        store.set(&snap(json!({"id": 1}))).await.unwrap();
        assert_eq!(store.get().await.get_json("id"), Some(&json!(1)));
        assert!(store.path().is_none());
    }

    #[tokio::test]
    async fn creates_missing_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let mut store = CacheStore::in_dir(&nested, "x");
        store.set(&snap(json!({"id": 1}))).await.unwrap();
        assert!(nested.join("cache-x.json").exists());
    }
}
