pub mod events;
mod redirect;

pub use events::DownloadEvent;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ETAG, HeaderMap, HeaderName, LAST_MODIFIED, USER_AGENT};
use reqwest::{Client, Response};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use crate::cache::MetaCache;
use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::mirror;
use crate::sink::{
    ByteArraySink, ChecksumType, FileSink, MetaCacheSink, RequestContext, ResponseContext, Sink,
    ValidatedSink,
};
use crate::status::Status;

/// Behavioral flags for one transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadOptions {
    /// On a network failure, substitute previously cached local data and
    /// report the transfer as successful instead of failed.
    pub accept_local_files: bool,
}

/// Cancels a transfer from outside. Cancellation is cooperative: `abort`
/// only requests it, and the `Aborted` report is emitted once the in-flight
/// operation actually unwinds. Callers must not assume synchronous
/// teardown.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Every transfer may be cancelled at any point in its lifecycle.
    pub fn can_abort(&self) -> bool {
        true
    }
}

/// One in-flight or completed transfer: a URL, the sink chain receiving its
/// bytes, and the state machine driving one HTTP request/response cycle
/// (including any redirects, which reuse the same instance).
pub struct Download {
    url: Url,
    sink: Box<dyn Sink>,
    options: DownloadOptions,
    extra_headers: Vec<(String, String)>,
    status: Status,
    progress: u64,
    total_progress: u64,
    index_within_job: usize,
    config: DownloadConfig,
    events: mpsc::UnboundedSender<DownloadEvent>,
    cancel: CancellationToken,
    client: Client,
}

impl Download {
    /// Transfer into a caller-supplied sink. The named constructors below
    /// cover the common chains; this is the escape hatch for composing
    /// your own.
    pub fn with_sink(
        url: Url,
        sink: Box<dyn Sink>,
        config: DownloadConfig,
        events: mpsc::UnboundedSender<DownloadEvent>,
    ) -> Result<Self, DownloadError> {
        // redirects are handled by this state machine, not by the client
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .use_rustls_tls()
            .build()?;

        Ok(Self {
            url,
            sink,
            options: DownloadOptions::default(),
            extra_headers: Vec::new(),
            status: Status::NotStarted,
            progress: 0,
            total_progress: 0,
            index_within_job: 0,
            config,
            events,
            cancel: CancellationToken::new(),
            client,
        })
    }

    /// Transfer into the metadata cache under `namespace`/`key`. A fresh
    /// cache entry short-circuits the transfer entirely.
    pub async fn cached(
        url: Url,
        cache: &Arc<MetaCache>,
        namespace: &str,
        key: &str,
        config: DownloadConfig,
        events: mpsc::UnboundedSender<DownloadEvent>,
    ) -> Result<Self, DownloadError> {
        let entry = cache.resolve_entry(namespace, key).await;
        let sink = MetaCacheSink::new(Arc::clone(cache), entry);
        Self::with_sink(url, Box::new(sink), config, events)
    }

    /// Like [`Download::cached`], with the body additionally validated
    /// against an expected digest before the cache entry may commit.
    pub async fn cached_with_checksum(
        url: Url,
        cache: &Arc<MetaCache>,
        namespace: &str,
        key: &str,
        kind: ChecksumType,
        expected: &str,
        config: DownloadConfig,
        events: mpsc::UnboundedSender<DownloadEvent>,
    ) -> Result<Self, DownloadError> {
        let entry = cache.resolve_entry(namespace, key).await;
        let inner = MetaCacheSink::new(Arc::clone(cache), entry);
        let sink = ValidatedSink::new(Box::new(inner), kind, expected);
        Self::with_sink(url, Box::new(sink), config, events)
    }

    /// Transfer into a plain file.
    pub fn file(
        url: Url,
        path: impl Into<PathBuf>,
        config: DownloadConfig,
        events: mpsc::UnboundedSender<DownloadEvent>,
    ) -> Result<Self, DownloadError> {
        Self::with_sink(url, Box::new(FileSink::new(path)), config, events)
    }

    /// Transfer into a plain file, validated against an expected digest.
    pub fn file_with_checksum(
        url: Url,
        path: impl Into<PathBuf>,
        kind: ChecksumType,
        expected: &str,
        config: DownloadConfig,
        events: mpsc::UnboundedSender<DownloadEvent>,
    ) -> Result<Self, DownloadError> {
        let sink = ValidatedSink::new(Box::new(FileSink::new(path)), kind, expected);
        Self::with_sink(url, Box::new(sink), config, events)
    }

    /// Transfer into memory; the caller keeps the shared handle.
    pub fn byte_array(
        url: Url,
        output: Arc<Mutex<Vec<u8>>>,
        config: DownloadConfig,
        events: mpsc::UnboundedSender<DownloadEvent>,
    ) -> Result<Self, DownloadError> {
        Self::with_sink(url, Box::new(ByteArraySink::new(output)), config, events)
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    /// Add a header applied to every request this transfer issues,
    /// including after redirects.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Attach the aggregator's correlation token; it is passed through
    /// unchanged in every emitted event.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index_within_job = index;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.cancel.clone(),
        }
    }

    pub fn can_abort(&self) -> bool {
        true
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Advisory byte counters for UI reporting.
    pub fn progress(&self) -> (u64, u64) {
        (self.progress, self.total_progress)
    }

    /// Drive the transfer to a terminal status, emitting exactly one
    /// terminal event. Redirects restart the attempt on the same instance;
    /// everything else resolves here.
    pub async fn perform(&mut self) -> Status {
        let mut hops = 0usize;
        loop {
            if self.cancel.is_cancelled() || self.status == Status::Aborted {
                warn!("Attempt to start an aborted download: {}", self.url);
                self.status = Status::Aborted;
                self.emit(DownloadEvent::Aborted {
                    index: self.index_within_job,
                });
                return self.status;
            }

            self.apply_mirror_rewrite();

            let mut request = RequestContext::new(self.url.clone());
            self.status = self.sink.init(&mut request).await;
            match self.status {
                Status::Finished => {
                    debug!("Download cache hit {}", self.url);
                    self.emit(DownloadEvent::Succeeded {
                        index: self.index_within_job,
                    });
                    return self.status;
                }
                Status::InProgress => debug!("Downloading {}", self.url),
                other => {
                    // never issue a request the sink cannot accept
                    warn!("Sink refused download of {} ({other})", self.url);
                    self.status = Status::Failed;
                    self.emit(DownloadEvent::Failed {
                        index: self.index_within_job,
                    });
                    return self.status;
                }
            }

            self.progress = 0;
            self.total_progress = 0;

            let response = match self.send_request(&request).await {
                Ok(response) => Some(response),
                Err(err) => {
                    self.map_transport_error(err);
                    None
                }
            };

            let mut redirect_target = None;
            let mut response_ctx = None;

            if let Some(response) = response {
                let http_status = response.status().as_u16();
                response_ctx = Some(ResponseContext {
                    final_url: self.url.clone(),
                    status: http_status,
                    etag: header_string(response.headers(), &ETAG),
                    last_modified: header_string(response.headers(), &LAST_MODIFIED),
                });

                match redirect::resolve_redirect(&self.url, http_status, response.headers()) {
                    Ok(target) => redirect_target = target,
                    Err(err) => self.map_transport_error(err),
                }

                // non-success, non-redirect statuses travel the same path
                // as transport errors; a 3xx without a usable Location is
                // not a redirect and finalizes normally
                if redirect_target.is_none()
                    && self.status == Status::InProgress
                    && !response.status().is_success()
                    && !response.status().is_redirection()
                {
                    self.map_transport_error(DownloadError::HttpStatus(http_status));
                }

                self.drain_body(response).await;
            }

            if let Some(target) = redirect_target {
                hops += 1;
                if hops > self.config.max_redirects {
                    warn!("Too many redirects for {}", self.url);
                    self.status = Status::Failed;
                } else {
                    debug!("Following redirect to {target}");
                    self.url = target;
                    self.status = Status::NotStarted;
                    continue;
                }
            }

            return self.finish(response_ctx).await;
        }
    }

    /// Re-point the URL at the configured mirror before the request goes
    /// out. A rewrite that does not parse is ignored rather than killing
    /// the transfer.
    fn apply_mirror_rewrite(&mut self) {
        let rewritten = mirror::rewrite_url(self.url.as_str(), &self.config);
        if rewritten == self.url.as_str() {
            return;
        }
        match Url::parse(&rewritten) {
            Ok(url) => self.url = url,
            Err(e) => warn!("Ignoring unusable mirror rewrite {rewritten}: {e}"),
        }
    }

    async fn send_request(&self, request: &RequestContext) -> Result<Response, DownloadError> {
        let mut builder = self
            .client
            .get(request.url.clone())
            .header(USER_AGENT, self.config.user_agent.as_str());
        for (name, value) in request.headers.iter().chain(self.extra_headers.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
            result = builder.send() => result.map_err(DownloadError::from),
        }
    }

    /// Read the body to its end, forwarding chunks to the sink while the
    /// transfer is healthy. Once the status leaves `InProgress` (a write
    /// failure, say) remaining bytes are still read so the connection is
    /// not left in an undefined state, they are just not written.
    async fn drain_body(&mut self, response: Response) {
        self.total_progress = response.content_length().unwrap_or(0);
        let mut stream = response.bytes_stream();
        let cancel = self.cancel.clone();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    error!("Aborted {}", self.url);
                    self.status = Status::Aborted;
                    return;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    self.progress += chunk.len() as u64;
                    if self.status == Status::InProgress {
                        self.status = self.sink.write(&chunk).await;
                        if self.status == Status::Failed {
                            error!("Failed to process response chunk for {}", self.url);
                        }
                    } else {
                        error!(
                            "Cannot write chunk for {}: {}",
                            self.url,
                            DownloadError::IllegalState(self.status)
                        );
                    }
                    self.emit(DownloadEvent::Progress {
                        index: self.index_within_job,
                        received: self.progress,
                        total: self.total_progress,
                    });
                }
                Some(Err(err)) => {
                    self.map_transport_error(err.into());
                    return;
                }
                None => return,
            }
        }
    }

    /// Map a transport-level failure onto the state machine: cancellation
    /// aborts, anything else fails. The failure is soft when the caller
    /// opted into local fallback and the sink has data to substitute.
    fn map_transport_error(&mut self, err: DownloadError) {
        if err.is_cancellation() || self.cancel.is_cancelled() {
            error!("Aborted {}", self.url);
            self.status = Status::Aborted;
            return;
        }
        if let Some(message) = tls_error_message(&err) {
            self.emit(DownloadEvent::SslErrors {
                index: self.index_within_job,
                errors: vec![message],
            });
        }
        if self.options.accept_local_files && self.sink.has_local_data() {
            self.status = Status::FailedProceed;
            return;
        }
        error!("Failed {} with reason {err}", self.url);
        self.status = Status::Failed;
    }

    /// Resolve the completed attempt to one terminal outcome and report it.
    async fn finish(&mut self, response: Option<ResponseContext>) -> Status {
        match self.status {
            Status::FailedProceed => {
                debug!("Download failed but is allowed to proceed: {}", self.url);
                self.sink.abort().await;
                // the local substitute must still be there now that we
                // actually resolve the fallback
                if self.sink.has_local_data() {
                    self.status = Status::Finished;
                    self.emit(DownloadEvent::Succeeded {
                        index: self.index_within_job,
                    });
                } else {
                    self.status = Status::Failed;
                    self.emit(DownloadEvent::Failed {
                        index: self.index_within_job,
                    });
                }
                self.status
            }
            Status::Failed => {
                debug!("Download failed in a previous step: {}", self.url);
                self.sink.abort().await;
                self.status = Status::Failed;
                self.emit(DownloadEvent::Failed {
                    index: self.index_within_job,
                });
                self.status
            }
            Status::Aborted => {
                debug!("Download aborted: {}", self.url);
                self.sink.abort().await;
                self.emit(DownloadEvent::Aborted {
                    index: self.index_within_job,
                });
                self.status
            }
            _ => {
                let Some(response) = response else {
                    // unreachable in practice: a missing response always
                    // comes with a failure status handled above
                    self.status = Status::Failed;
                    self.emit(DownloadEvent::Failed {
                        index: self.index_within_job,
                    });
                    return self.status;
                };
                self.status = self.sink.finalize(&response).await;
                if self.status != Status::Finished {
                    debug!("Download failed to finalize: {}", self.url);
                    self.sink.abort().await;
                    self.status = Status::Failed;
                    self.emit(DownloadEvent::Failed {
                        index: self.index_within_job,
                    });
                } else {
                    debug!("Download succeeded: {}", self.url);
                    self.emit(DownloadEvent::Succeeded {
                        index: self.index_within_job,
                    });
                }
                self.status
            }
        }
    }

    fn emit(&self, event: DownloadEvent) {
        // a dropped receiver only means nobody is listening anymore
        let _ = self.events.send(event);
    }
}

fn header_string(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// Best-effort detection of TLS-class transport failures, so certificate
/// trouble surfaces as its own event before the generic failure mapping.
fn tls_error_message(err: &DownloadError) -> Option<String> {
    let DownloadError::Transport(err) = err else {
        return None;
    };
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        let text = current.to_string();
        let lowered = text.to_lowercase();
        if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("ssl") {
            return Some(text);
        }
        source = current.source();
    }
    None
}
