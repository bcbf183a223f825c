use async_trait::async_trait;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tracing::{error, warn};

use super::{RequestContext, ResponseContext, Sink};
use crate::error::DownloadError;
use crate::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha256,
}

enum HasherState {
    Md5(md5::Context),
    Sha1(Sha1),
    Sha256(Sha256),
}

/// Streaming digest compared against an expected lowercase hex value.
pub struct ChecksumValidator {
    expected: String,
    state: HasherState,
}

impl ChecksumValidator {
    pub fn new(kind: ChecksumType, expected: &str) -> Self {
        let state = match kind {
            ChecksumType::Md5 => HasherState::Md5(md5::Context::new()),
            ChecksumType::Sha1 => HasherState::Sha1(Sha1::new()),
            ChecksumType::Sha256 => HasherState::Sha256(Sha256::new()),
        };
        Self {
            expected: expected.to_lowercase(),
            state,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(ctx) => ctx.consume(data),
            HasherState::Sha1(hasher) => hasher.update(data),
            HasherState::Sha256(hasher) => hasher.update(data),
        }
    }

    /// Consumes the validator: a digest can only be read out once.
    pub fn verify(self) -> Result<(), DownloadError> {
        let actual = match self.state {
            HasherState::Md5(ctx) => format!("{:x}", ctx.finalize()),
            HasherState::Sha1(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        };
        if actual == self.expected {
            Ok(())
        } else {
            Err(DownloadError::ChecksumMismatch {
                expected: self.expected,
                actual,
            })
        }
    }
}

/// Decorates an inner sink with checksum validation.
///
/// Every write feeds the validator before being forwarded. At finalize the
/// digest is checked first: only a matching body lets the inner sink
/// commit. On a mismatch the inner sink is aborted instead, so a corrupted
/// download is never left behind as valid data.
pub struct ValidatedSink {
    inner: Box<dyn Sink>,
    kind: ChecksumType,
    expected: String,
    validator: Option<ChecksumValidator>,
    status: Status,
}

impl ValidatedSink {
    pub fn new(inner: Box<dyn Sink>, kind: ChecksumType, expected: &str) -> Self {
        Self {
            inner,
            kind,
            expected: expected.to_lowercase(),
            validator: None,
            status: Status::NotStarted,
        }
    }
}

#[async_trait]
impl Sink for ValidatedSink {
    async fn init(&mut self, request: &mut RequestContext) -> Status {
        self.status = self.inner.init(request).await;
        // a fresh validator per attempt; redirects restart from init
        self.validator = if self.status == Status::InProgress {
            Some(ChecksumValidator::new(self.kind, &self.expected))
        } else {
            None
        };
        self.status
    }

    async fn write(&mut self, data: &[u8]) -> Status {
        if self.status != Status::InProgress {
            error!("Validated sink written to while {}", self.status);
            return Status::Failed;
        }
        if let Some(validator) = self.validator.as_mut() {
            validator.update(data);
        }
        self.status = self.inner.write(data).await;
        self.status
    }

    async fn finalize(&mut self, response: &ResponseContext) -> Status {
        if self.status != Status::InProgress {
            return Status::Failed;
        }
        let Some(validator) = self.validator.take() else {
            self.status = Status::Failed;
            return self.status;
        };
        if let Err(e) = validator.verify() {
            warn!("Rejecting {}: {e}", response.final_url);
            self.inner.abort().await;
            self.status = Status::Failed;
            return self.status;
        }
        self.status = self.inner.finalize(response).await;
        self.status
    }

    async fn abort(&mut self) -> Status {
        self.validator = None;
        self.status = self.inner.abort().await;
        self.status
    }

    fn has_local_data(&self) -> bool {
        self.inner.has_local_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ByteArraySink;
    use std::sync::{Arc, Mutex};
    use url::Url;

    // digests of b"hello"
    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";
    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn request() -> RequestContext {
        RequestContext::new(Url::parse("https://example.com/hello").unwrap())
    }

    fn response() -> ResponseContext {
        ResponseContext {
            final_url: Url::parse("https://example.com/hello").unwrap(),
            status: 200,
            etag: None,
            last_modified: None,
        }
    }

    #[test]
    fn test_validator_accepts_matching_digest() {
        for (kind, expected) in [
            (ChecksumType::Md5, HELLO_MD5),
            (ChecksumType::Sha1, HELLO_SHA1),
            (ChecksumType::Sha256, HELLO_SHA256),
        ] {
            let mut validator = ChecksumValidator::new(kind, expected);
            validator.update(b"hel");
            validator.update(b"lo");
            assert!(validator.verify().is_ok());
        }
    }

    #[test]
    fn test_validator_is_case_insensitive_on_expected() {
        let mut validator =
            ChecksumValidator::new(ChecksumType::Md5, &HELLO_MD5.to_uppercase());
        validator.update(b"hello");
        assert!(validator.verify().is_ok());
    }

    #[test]
    fn test_validator_rejects_mismatch() {
        let mut validator = ChecksumValidator::new(ChecksumType::Sha256, HELLO_SHA256);
        validator.update(b"goodbye");
        let err = validator.verify().unwrap_err();
        assert!(matches!(err, DownloadError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_matching_body_commits_inner_sink() {
        let output = Arc::new(Mutex::new(Vec::new()));
        let inner = ByteArraySink::new(Arc::clone(&output));
        let mut sink = ValidatedSink::new(Box::new(inner), ChecksumType::Sha1, HELLO_SHA1);

        assert_eq!(sink.init(&mut request()).await, Status::InProgress);
        assert_eq!(sink.write(b"hello").await, Status::InProgress);
        assert_eq!(sink.finalize(&response()).await, Status::Finished);
        assert_eq!(output.lock().unwrap().as_slice(), b"hello");
    }

    #[tokio::test]
    async fn test_mismatch_aborts_inner_sink_without_commit() {
        let output = Arc::new(Mutex::new(Vec::new()));
        let inner = ByteArraySink::new(Arc::clone(&output));
        let mut sink = ValidatedSink::new(Box::new(inner), ChecksumType::Md5, HELLO_MD5);

        sink.init(&mut request()).await;
        sink.write(b"corrupted body").await;
        assert_eq!(sink.finalize(&response()).await, Status::Failed);
        // the inner sink never committed
        assert!(output.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redirect_restart_resets_digest() {
        let output = Arc::new(Mutex::new(Vec::new()));
        let inner = ByteArraySink::new(Arc::clone(&output));
        let mut sink = ValidatedSink::new(Box::new(inner), ChecksumType::Md5, HELLO_MD5);

        sink.init(&mut request()).await;
        sink.write(b"302 page body").await;
        // redirect: new attempt, same sink
        sink.init(&mut request()).await;
        sink.write(b"hello").await;
        assert_eq!(sink.finalize(&response()).await, Status::Finished);
        assert_eq!(output.lock().unwrap().as_slice(), b"hello");
    }
}
