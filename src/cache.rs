use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One cached artifact: where it lives on disk and what we recorded about
/// it when it was committed. An entry starts out stale and only becomes
/// fresh once a transfer has written and validated it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaEntry {
    pub namespace: String,
    pub key: String,
    pub path: PathBuf,
    #[serde(default)]
    pub md5sum: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default = "default_stale")]
    pub stale: bool,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

fn default_stale() -> bool {
    true
}

impl MetaEntry {
    /// A fresh entry can satisfy a transfer without any network I/O.
    pub fn is_fresh(&self) -> bool {
        !self.stale && self.path.exists()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    entries: HashMap<String, MetaEntry>,
}

fn index_key(namespace: &str, key: &str) -> String {
    format!("{namespace}/{key}")
}

/// Metadata cache shared across transfers. Maps a logical namespace/key
/// pair to a file under the cache root plus the bookkeeping recorded at
/// commit time. All index access goes through one async mutex, so
/// concurrent transfers committing different entries never interleave
/// index updates.
pub struct MetaCache {
    root: PathBuf,
    index_path: PathBuf,
    index: Mutex<CacheIndex>,
}

impl MetaCache {
    /// Open (or create) a cache rooted at the given directory, loading the
    /// persisted index when one exists. A corrupt index is discarded and
    /// rebuilt rather than failing every future transfer.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create cache root {root:?}"))?;

        let index_path = root.join("index.json");
        let index = match tokio::fs::read_to_string(&index_path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(index) => index,
                Err(e) => {
                    warn!("Discarding corrupt cache index {index_path:?}: {e}");
                    CacheIndex::default()
                }
            },
            Err(_) => CacheIndex::default(),
        };

        Ok(Arc::new(Self {
            root,
            index_path,
            index: Mutex::new(index),
        }))
    }

    /// Resolve the entry for a namespace/key pair. Unknown pairs get a
    /// stale placeholder pointing into the cache tree, so the caller always
    /// has a concrete target path to download to.
    pub async fn resolve_entry(&self, namespace: &str, key: &str) -> MetaEntry {
        let mut index = self.index.lock().await;
        index
            .entries
            .entry(index_key(namespace, key))
            .or_insert_with(|| MetaEntry {
                namespace: namespace.to_string(),
                key: key.to_string(),
                path: self.root.join(namespace).join(key),
                md5sum: None,
                etag: None,
                last_modified: None,
                stale: true,
                last_checked: None,
            })
            .clone()
    }

    /// Record a committed entry and persist the index. Called by the cache
    /// sink after the artifact file itself has been moved into place.
    pub async fn commit_entry(&self, entry: MetaEntry) -> Result<()> {
        let mut index = self.index.lock().await;
        debug!("Recording cache entry {}/{}", entry.namespace, entry.key);
        index
            .entries
            .insert(index_key(&entry.namespace, &entry.key), entry);

        let raw = serde_json::to_string_pretty(&*index).context("Failed to encode cache index")?;
        tokio::fs::write(&self.index_path, raw)
            .await
            .with_context(|| format!("Failed to write cache index {:?}", self.index_path))?;
        Ok(())
    }

    /// Mark an entry stale so the next transfer refreshes it.
    pub async fn invalidate(&self, namespace: &str, key: &str) -> Result<()> {
        let mut index = self.index.lock().await;
        if let Some(entry) = index.entries.get_mut(&index_key(namespace, key)) {
            entry.stale = true;
        }
        let raw = serde_json::to_string_pretty(&*index).context("Failed to encode cache index")?;
        tokio::fs::write(&self.index_path, raw)
            .await
            .with_context(|| format!("Failed to write cache index {:?}", self.index_path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_resolve_creates_stale_placeholder() -> Result<()> {
        let dir = TempDir::new()?;
        let cache = MetaCache::open(dir.path()).await?;

        let entry = cache.resolve_entry("libraries", "foo/bar.jar").await;
        assert!(entry.stale);
        assert!(!entry.is_fresh());
        assert!(entry.path.starts_with(dir.path()));
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_survives_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let cache = MetaCache::open(dir.path()).await?;
            let mut entry = cache.resolve_entry("assets", "abcd").await;
            tokio::fs::create_dir_all(entry.path.parent().unwrap()).await?;
            tokio::fs::write(&entry.path, b"data").await?;
            entry.stale = false;
            entry.md5sum = Some("8d777f385d3dfec8815d20f7496026dc".to_string());
            cache.commit_entry(entry).await?;
        }

        let cache = MetaCache::open(dir.path()).await?;
        let entry = cache.resolve_entry("assets", "abcd").await;
        assert!(entry.is_fresh());
        assert_eq!(
            entry.md5sum.as_deref(),
            Some("8d777f385d3dfec8815d20f7496026dc")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_invalidate_marks_entry_stale() -> Result<()> {
        let dir = TempDir::new()?;
        let cache = MetaCache::open(dir.path()).await?;

        let mut entry = cache.resolve_entry("meta", "version.json").await;
        tokio::fs::create_dir_all(entry.path.parent().unwrap()).await?;
        tokio::fs::write(&entry.path, b"{}").await?;
        entry.stale = false;
        cache.commit_entry(entry).await?;

        cache.invalidate("meta", "version.json").await?;
        let entry = cache.resolve_entry("meta", "version.json").await;
        assert!(!entry.is_fresh());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_index_is_discarded() -> Result<()> {
        let dir = TempDir::new()?;
        tokio::fs::write(dir.path().join("index.json"), b"not json").await?;

        let cache = MetaCache::open(dir.path()).await?;
        let entry = cache.resolve_entry("libraries", "x.jar").await;
        assert!(entry.stale);
        Ok(())
    }
}
