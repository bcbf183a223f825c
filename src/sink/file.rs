use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use super::{RequestContext, ResponseContext, Sink};
use crate::status::Status;

/// Plain file writer. The body is staged into `<path>.part` and renamed
/// over the target at finalize, so a failed or aborted transfer never
/// clobbers an existing file at the final path.
pub struct FileSink {
    path: PathBuf,
    part_path: PathBuf,
    file: Option<File>,
    status: Status,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let part_path = part_path_for(&path);
        Self {
            path,
            part_path,
            file: None,
            status: Status::NotStarted,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn part_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

#[async_trait]
impl Sink for FileSink {
    async fn init(&mut self, _request: &mut RequestContext) -> Status {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!("Failed to create directory {parent:?}: {e}");
                self.status = Status::Failed;
                return self.status;
            }
        }
        match File::create(&self.part_path).await {
            Ok(file) => {
                self.file = Some(file);
                self.status = Status::InProgress;
            }
            Err(e) => {
                error!("Failed to create staging file {:?}: {e}", self.part_path);
                self.status = Status::Failed;
            }
        }
        self.status
    }

    async fn write(&mut self, data: &[u8]) -> Status {
        if self.status != Status::InProgress {
            error!("File sink for {:?} written to while {}", self.path, self.status);
            return Status::Failed;
        }
        let Some(file) = self.file.as_mut() else {
            self.status = Status::Failed;
            return self.status;
        };
        if let Err(e) = file.write_all(data).await {
            error!("Failed to write chunk to {:?}: {e}", self.part_path);
            self.status = Status::Failed;
        }
        self.status
    }

    async fn finalize(&mut self, _response: &ResponseContext) -> Status {
        if self.status != Status::InProgress {
            return Status::Failed;
        }
        let Some(mut file) = self.file.take() else {
            self.status = Status::Failed;
            return self.status;
        };
        if let Err(e) = file.flush().await {
            error!("Failed to flush {:?}: {e}", self.part_path);
            self.status = Status::Failed;
            return self.status;
        }
        drop(file);

        match fs::rename(&self.part_path, &self.path).await {
            Ok(()) => {
                debug!("Committed {:?}", self.path);
                self.status = Status::Finished;
            }
            Err(e) => {
                error!("Failed to move {:?} into place: {e}", self.part_path);
                self.status = Status::Failed;
            }
        }
        self.status
    }

    async fn abort(&mut self) -> Status {
        self.file.take();
        if self.part_path.exists() {
            if let Err(e) = fs::remove_file(&self.part_path).await {
                warn!("Failed to remove partial file {:?}: {e}", self.part_path);
            }
        }
        self.status = Status::Aborted;
        self.status
    }

    fn has_local_data(&self) -> bool {
        self.path.exists()
    }
}
