//! Upkeep storage abstractions.
//!
//! This crate defines the storage contract for the request lifecycle:
//! - requests and status-change requests (system of record)
//! - the principal directory the targeting rules query
//! - append-only history entries
//! - an atomic commit surface for "state mutation + audit write together"
//!
//! Design stance:
//! - A transactional relational backend remains the production source of
//!   truth; the in-memory adapter here is the deterministic, test-friendly
//!   reference implementation.
//! - Transition commits are version-guarded: a stale version fails with a
//!   conflict and writes nothing.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod traits;

pub use error::{StorageError, StorageResult};
pub use traits::{
    HistoryStore, PrincipalDirectory, RequestStore, StatusChangeStore, TransitionStore,
    UpkeepStore,
};
