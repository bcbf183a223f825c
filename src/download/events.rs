/// The only signals a transfer emits outward, delivered over an unbounded
/// channel to whatever aggregates downloads into jobs. `index` is the
/// opaque correlation token supplied by that aggregator and is passed
/// through unchanged.
///
/// Exactly one of `Succeeded`, `Failed` or `Aborted` is emitted per
/// transfer; `Progress` counters are advisory and never used for
/// correctness decisions.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Progress {
        index: usize,
        received: u64,
        total: u64,
    },
    Succeeded {
        index: usize,
    },
    Failed {
        index: usize,
    },
    Aborted {
        index: usize,
    },
    SslErrors {
        index: usize,
        errors: Vec<String>,
    },
}

impl DownloadEvent {
    /// True for the events that end a transfer.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadEvent::Succeeded { .. }
                | DownloadEvent::Failed { .. }
                | DownloadEvent::Aborted { .. }
        )
    }

    pub fn index(&self) -> usize {
        match self {
            DownloadEvent::Progress { index, .. }
            | DownloadEvent::Succeeded { index }
            | DownloadEvent::Failed { index }
            | DownloadEvent::Aborted { index }
            | DownloadEvent::SslErrors { index, .. } => *index,
        }
    }
}
