use thiserror::Error;

/// Errors raised by an [`crate::inventory::InventorySource`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("inventory source unreachable: {0}")]
    Unreachable(String),

    #[error("volume {0} not found")]
    UnknownVolume(String),

    #[error("folder {folder} not found on volume {volume}")]
    UnknownFolder { volume: String, folder: String },

    #[error("operation not supported by this source: {0}")]
    Unsupported(&'static str),

    #[error("{0}")]
    Other(String),
}

/// Hard failures of a whole audit run.
///
/// Everything narrower than a phase (one VM, one volume, one folder) is
/// recorded as a [`crate::types::Failure`] instead and never surfaces here.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("inventory source unavailable during {phase}: {source}")]
    SourceUnavailable {
        phase: &'static str,
        #[source]
        source: InventoryError,
    },

    #[error("audit cancelled")]
    Cancelled,

    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("baseline error: {0:#}")]
    Baseline(anyhow::Error),
}
