//! Domain module - Core entities and collaborator contracts
//!
//! This module contains the listing entities the sync engine moves around
//! and the traits behind which the marketplace API and the local store live.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod errors;
pub mod listing;
pub mod services;

pub use errors::{RemoteCallError, SyncError};
pub use listing::{
    CandidateItem, Classification, Outcome, PartitionResult, RemoteItemResult, group_by_partition,
};
pub use services::{CandidateSelector, LocalListingStore, RemoteBatchClient};
