/// Error taxonomy shared by every component of the sync engine.
///
/// No variant other than [`SyncError::Fatal`] is meant to surface past a
/// strategy's run loop; see spec §7.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Transient cloud/network/local-contention failure. Retried with
    /// back-off by the active strategy.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Permanent logical failure (authorization, malformed document). The
    /// request is dropped after logging; sync information is unchanged.
    #[error("skip: {0}")]
    Skip(String),

    /// Cloud version mismatch, absorbed by promoting a `FullShadow` enqueue.
    #[error("conflict")]
    Conflict,

    /// Cooperative cancellation observed mid-execute.
    #[error("interrupted")]
    Interrupted,

    /// Invariant violation. Logged; the owning strategy stops.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Retryable(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Fatal(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Skip(format!("malformed shadow document: {err}"))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
