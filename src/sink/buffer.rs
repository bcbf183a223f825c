use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::error;

use super::{RequestContext, ResponseContext, Sink};
use crate::status::Status;

/// Captures the response body in memory. The caller keeps the shared
/// handle and reads the bytes out of it once the transfer has finished;
/// until finalize, partial data stays private to the sink.
pub struct ByteArraySink {
    output: Arc<Mutex<Vec<u8>>>,
    buffer: Vec<u8>,
    status: Status,
}

impl ByteArraySink {
    pub fn new(output: Arc<Mutex<Vec<u8>>>) -> Self {
        Self {
            output,
            buffer: Vec::new(),
            status: Status::NotStarted,
        }
    }
}

#[async_trait]
impl Sink for ByteArraySink {
    async fn init(&mut self, _request: &mut RequestContext) -> Status {
        self.buffer.clear();
        self.status = Status::InProgress;
        self.status
    }

    async fn write(&mut self, data: &[u8]) -> Status {
        if self.status != Status::InProgress {
            error!("Byte array sink written to while {}", self.status);
            return Status::Failed;
        }
        self.buffer.extend_from_slice(data);
        self.status
    }

    async fn finalize(&mut self, _response: &ResponseContext) -> Status {
        if self.status != Status::InProgress {
            return Status::Failed;
        }
        match self.output.lock() {
            Ok(mut out) => {
                *out = std::mem::take(&mut self.buffer);
                self.status = Status::Finished;
            }
            Err(_) => {
                error!("Byte array sink output handle is poisoned");
                self.status = Status::Failed;
            }
        }
        self.status
    }

    async fn abort(&mut self) -> Status {
        self.buffer.clear();
        self.status = Status::Aborted;
        self.status
    }

    fn has_local_data(&self) -> bool {
        false
    }
}
