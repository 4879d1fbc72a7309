use thiserror::Error;

/// Why a single record was excluded from pipeline output. Rejections are
/// terminal for that record: logged, counted, never retried, and never
/// escalated to run-level failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("amount is not a valid decimal: {0:?}")]
    InvalidAmount(String),
    #[error("transaction date does not match expected format: {0:?}")]
    InvalidTimestamp(String),
    #[error("record carries no bank-local account id")]
    MissingAccountId,
    #[error("no identity mapping for account {0}")]
    UnresolvedIdentity(String),
}

/// Run-fatal errors. These surface as `RunStatus::Failed` with the error
/// string as exit detail; they never propagate beyond the run's task.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to read from source: {0}")]
    Source(#[source] anyhow::Error),
    #[error("failed to commit chunk {chunk}: {source}")]
    ChunkCommit {
        chunk: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("identity store lookup failed: {0}")]
    Identity(#[source] anyhow::Error),
    #[error("run cancelled by shutdown")]
    Shutdown,
}

/// Trigger validation errors, surfaced synchronously to the launch caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("trigger carries an empty bank id")]
    EmptyBankId,
    #[error("event trigger carries an empty batch id")]
    EmptyBatchId,
}
