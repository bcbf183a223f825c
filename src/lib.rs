pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod mirror;
pub mod sink;
pub mod status;

// Re-export the public surface for easier access in consumers and tests
pub use cache::{MetaCache, MetaEntry};
pub use config::DownloadConfig;
pub use download::{AbortHandle, Download, DownloadEvent, DownloadOptions};
pub use error::DownloadError;
pub use sink::{
    ByteArraySink, ChecksumType, ChecksumValidator, FileSink, MetaCacheSink, RequestContext,
    ResponseContext, Sink, ValidatedSink,
};
pub use status::Status;
