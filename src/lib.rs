//! Listing Reaper - rate-adaptive bulk termination of aged listings
//!
//! Ends aged marketplace listings in per-account batches and removes the
//! local rows of the listings the marketplace confirmed as ended.

pub mod domain;
pub mod infrastructure;
pub mod sync_engine;

pub use domain::{CandidateItem, PartitionResult, RemoteCallError, SyncError};
pub use sync_engine::{EngineConfig, RunSummary, SyncContext, SyncEngine};
