use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error};

use super::{FileSink, RequestContext, ResponseContext, Sink};
use crate::cache::{MetaCache, MetaEntry};
use crate::status::Status;

/// Cache-aware file sink. Wraps a `FileSink` targeting the cache entry's
/// path and adds the metadata bookkeeping: a fresh entry short-circuits the
/// whole transfer at init, and a completed transfer records the body's md5
/// plus the response's etag/last-modified into the cache index.
pub struct MetaCacheSink {
    cache: Arc<MetaCache>,
    entry: MetaEntry,
    inner: FileSink,
    hasher: Option<md5::Context>,
    status: Status,
}

impl MetaCacheSink {
    pub fn new(cache: Arc<MetaCache>, entry: MetaEntry) -> Self {
        let inner = FileSink::new(entry.path.clone());
        Self {
            cache,
            entry,
            inner,
            hasher: None,
            status: Status::NotStarted,
        }
    }

    pub fn entry(&self) -> &MetaEntry {
        &self.entry
    }
}

#[async_trait]
impl Sink for MetaCacheSink {
    async fn init(&mut self, request: &mut RequestContext) -> Status {
        if self.entry.is_fresh() {
            debug!("Cache hit for {}", request.url);
            self.status = Status::Finished;
            return self.status;
        }
        self.hasher = Some(md5::Context::new());
        self.status = self.inner.init(request).await;
        self.status
    }

    async fn write(&mut self, data: &[u8]) -> Status {
        if self.status != Status::InProgress {
            error!("Cache sink for {:?} written to while {}", self.entry.path, self.status);
            return Status::Failed;
        }
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.consume(data);
        }
        self.status = self.inner.write(data).await;
        self.status
    }

    async fn finalize(&mut self, response: &ResponseContext) -> Status {
        if self.status != Status::InProgress {
            return Status::Failed;
        }
        self.status = self.inner.finalize(response).await;
        if self.status != Status::Finished {
            return self.status;
        }

        self.entry.md5sum = self
            .hasher
            .take()
            .map(|hasher| format!("{:x}", hasher.finalize()));
        self.entry.etag = response.etag.clone();
        self.entry.last_modified = response.last_modified.clone();
        self.entry.stale = false;
        self.entry.last_checked = Some(Utc::now());

        if let Err(e) = self.cache.commit_entry(self.entry.clone()).await {
            error!("Failed to record cache entry for {:?}: {e}", self.entry.path);
            self.status = Status::Failed;
        }
        self.status
    }

    async fn abort(&mut self) -> Status {
        self.hasher = None;
        self.status = self.inner.abort().await;
        self.status
    }

    fn has_local_data(&self) -> bool {
        self.entry.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use url::Url;

    fn request() -> RequestContext {
        RequestContext::new(Url::parse("https://libraries.minecraft.net/x.jar").unwrap())
    }

    fn response(etag: Option<&str>) -> ResponseContext {
        ResponseContext {
            final_url: Url::parse("https://libraries.minecraft.net/x.jar").unwrap(),
            status: 200,
            etag: etag.map(|s| s.to_string()),
            last_modified: None,
        }
    }

    #[tokio::test]
    async fn test_fresh_entry_short_circuits_init() {
        let dir = TempDir::new().unwrap();
        let cache = MetaCache::open(dir.path()).await.unwrap();

        let mut entry = cache.resolve_entry("libraries", "x.jar").await;
        tokio::fs::create_dir_all(entry.path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&entry.path, b"jar bytes").await.unwrap();
        entry.stale = false;
        cache.commit_entry(entry.clone()).await.unwrap();

        let mut sink = MetaCacheSink::new(cache, entry);
        assert_eq!(sink.init(&mut request()).await, Status::Finished);
    }

    #[tokio::test]
    async fn test_finalize_records_digest_and_freshness() {
        let dir = TempDir::new().unwrap();
        let cache = MetaCache::open(dir.path()).await.unwrap();
        let entry = cache.resolve_entry("libraries", "x.jar").await;

        let mut sink = MetaCacheSink::new(Arc::clone(&cache), entry);
        assert_eq!(sink.init(&mut request()).await, Status::InProgress);
        sink.write(b"hello").await;
        assert_eq!(
            sink.finalize(&response(Some("\"abc123\""))).await,
            Status::Finished
        );

        let entry = cache.resolve_entry("libraries", "x.jar").await;
        assert!(entry.is_fresh());
        assert_eq!(
            entry.md5sum.as_deref(),
            Some("5d41402abc4b2a76b9719d911017c592")
        );
        assert_eq!(entry.etag.as_deref(), Some("\"abc123\""));
        assert!(entry.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_abort_leaves_entry_stale_and_target_absent() {
        let dir = TempDir::new().unwrap();
        let cache = MetaCache::open(dir.path()).await.unwrap();
        let entry = cache.resolve_entry("assets", "abcd").await;
        let target = entry.path.clone();

        let mut sink = MetaCacheSink::new(Arc::clone(&cache), entry);
        sink.init(&mut request()).await;
        sink.write(b"partial").await;
        assert_eq!(sink.abort().await, Status::Aborted);

        assert!(!target.exists());
        let entry = cache.resolve_entry("assets", "abcd").await;
        assert!(entry.stale);
    }

    #[tokio::test]
    async fn test_stale_entry_with_local_file_reports_local_data() {
        let dir = TempDir::new().unwrap();
        let cache = MetaCache::open(dir.path()).await.unwrap();

        let entry = cache.resolve_entry("libraries", "y.jar").await;
        tokio::fs::create_dir_all(entry.path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&entry.path, b"older jar").await.unwrap();

        let sink = MetaCacheSink::new(cache, entry);
        // stale, so a transfer is attempted, but local fallback is possible
        assert!(sink.has_local_data());
    }
}
