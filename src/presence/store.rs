//! Presence store backed by `sled`
//!
//! Presence records live in the `log-connection` tree, keyed by presence key
//! with the TTL (epoch seconds, big-endian `i64`) as the value. Nothing is
//! ever deleted: readers filter on `ttl >= now` and expired rows are simply
//! ignored until a later attach overwrites them.

use sled::{Db, Tree};
use thiserror::Error;
use tracing::debug;

use crate::broker::topic::PresenceKey;

const TREE: &str = "log-connection";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub key: PresenceKey,
    pub ttl_epoch_seconds: i64,
}

impl PresenceRecord {
    pub fn new(key: PresenceKey, ttl_epoch_seconds: i64) -> Self {
        Self {
            key,
            ttl_epoch_seconds,
        }
    }

    pub fn is_live(&self, now_epoch: i64) -> bool {
        self.ttl_epoch_seconds >= now_epoch
    }
}

/// Shared key-value store holding presence records. Writers are the
/// subscriber-attach paths, the reader is the presence cache poller.
pub trait PresenceStore: Send + Sync {
    fn put(&self, record: &PresenceRecord) -> Result<(), StoreError>;

    /// Every record whose TTL is at or after `now_epoch`.
    fn live_records(&self, now_epoch: i64) -> Result<Vec<PresenceRecord>, StoreError>;
}

#[derive(Clone)]
pub struct SledPresenceStore {
    db: Db,
    tree: Tree,
}

impl SledPresenceStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    pub fn from_db(db: Db) -> Result<Self, StoreError> {
        let tree = db.open_tree(TREE)?;
        Ok(Self { db, tree })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl PresenceStore for SledPresenceStore {
    fn put(&self, record: &PresenceRecord) -> Result<(), StoreError> {
        let ttl = record.ttl_epoch_seconds;
        // several viewers may share a key; keep the latest expiry
        self.tree
            .update_and_fetch(record.key.as_str(), |old| {
                let current = old.and_then(decode_ttl).unwrap_or(i64::MIN);
                Some(current.max(ttl).to_be_bytes().to_vec())
            })?;
        Ok(())
    }

    fn live_records(&self, now_epoch: i64) -> Result<Vec<PresenceRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let (Ok(key), Some(ttl)) = (std::str::from_utf8(&key), decode_ttl(&value)) else {
                debug!("skipping undecodable presence row");
                continue;
            };
            let record = PresenceRecord::new(PresenceKey::from_raw(key), ttl);
            if record.is_live(now_epoch) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl std::fmt::Debug for SledPresenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledPresenceStore")
            .field("tree", &TREE)
            .finish()
    }
}

fn decode_ttl(value: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}
