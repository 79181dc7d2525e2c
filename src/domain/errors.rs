//! Error types for the sync engine and its collaborators

use thiserror::Error;

/// Whole-call failure of a remote batch request.
///
/// `RateLimited` marks every item of the batch as rate limited; every other
/// variant marks every item as failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteCallError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote call timed out")]
    Timeout,

    #[error("Remote call throttled (code {code})")]
    RateLimited { code: String },

    #[error("Remote call rejected (code {code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("No credentials configured for account {account}")]
    MissingCredentials { account: String },

    #[error("Batch of {size} items exceeds the remote limit of {max}")]
    BatchTooLarge { size: usize, max: usize },
}

/// Engine level errors. Partition level variants are caught by the scheduler.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Local store error: {0}")]
    LocalStore(String),

    #[error("Candidate selection failed: {0}")]
    CandidateSelection(String),

    #[error("Worker for partition {partition} panicked: {message}")]
    PartitionPanicked { partition: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}
