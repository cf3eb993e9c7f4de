//! Presence tracking: which log scopes currently have a live viewer.

pub mod cache;
pub mod store;

pub use cache::{Backoff, PresenceCache, spawn_poller};
pub use store::{PresenceRecord, PresenceStore, SledPresenceStore, StoreError};
