pub mod buffer;
pub mod file;
pub mod meta_cache;
pub mod validator;

pub use buffer::ByteArraySink;
pub use file::FileSink;
pub use meta_cache::MetaCacheSink;
pub use validator::{ChecksumType, ChecksumValidator, ValidatedSink};

use async_trait::async_trait;
use url::Url;

use crate::status::Status;

/// Request being prepared on behalf of a sink. `init` may contribute
/// headers to it (cache revalidation and the like).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl RequestContext {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }
}

/// What the completed response looked like, for finalize-time bookkeeping.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub final_url: Url,
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// A pluggable destination for a stream of downloaded bytes.
///
/// Lifecycle: `init` once per attempt (it may short-circuit to `Finished`
/// on a cache hit, meaning no network transfer is needed at all), then any
/// number of `write` calls while the sink is in progress, then exactly one
/// `finalize` after the response body has been fully drained, or `abort`
/// to discard partial output. A redirect restarts the attempt, and `init`
/// resets the sink for the new one.
///
/// Every call returns the sink's new status; `write` outside of
/// `InProgress` is a contract violation and yields `Failed`.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn init(&mut self, request: &mut RequestContext) -> Status;

    async fn write(&mut self, data: &[u8]) -> Status;

    async fn finalize(&mut self, response: &ResponseContext) -> Status;

    async fn abort(&mut self) -> Status;

    /// True if the sink can substitute a previously cached/local copy when
    /// the network step fails.
    fn has_local_data(&self) -> bool;
}
