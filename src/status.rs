use std::fmt;

/// Outcome of a transfer at any instant. This is the single source of truth
/// for what a download (and its sink) is currently doing.
///
/// `FailedProceed` is a soft failure: the network step failed but previously
/// cached local data may be substituted. It is never reported outward; it
/// resolves to `Finished` or `Failed` when the transfer completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotStarted,
    InProgress,
    FailedProceed,
    Failed,
    Aborted,
    Finished,
}

impl Status {
    /// Terminal statuses are absorbing: once reached, no further state
    /// transitions occur for that transfer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Finished | Status::Failed | Status::Aborted)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NotStarted => write!(f, "not started"),
            Status::InProgress => write!(f, "in progress"),
            Status::FailedProceed => write!(f, "failed (proceeding)"),
            Status::Failed => write!(f, "failed"),
            Status::Aborted => write!(f, "aborted"),
            Status::Finished => write!(f, "finished"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(Status::Finished.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(Status::Aborted.is_terminal());
    }

    #[test]
    fn test_non_terminal_statuses() {
        assert!(!Status::NotStarted.is_terminal());
        assert!(!Status::InProgress.is_terminal());
        // soft failure must resolve before it can be reported
        assert!(!Status::FailedProceed.is_terminal());
    }
}
