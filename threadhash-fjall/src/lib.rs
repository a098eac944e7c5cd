//! Fjall-backed content store for Threadhash.

use std::path::Path;

use cid::Cid;
use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use thiserror::Error;
use threadhash_core::{compute_cid, ContentStore};
use tracing::debug;

pub const BLOBS_KEYSPACE: &str = "blobs";
pub const PINS_KEYSPACE: &str = "pins";

#[derive(Debug, Error)]
#[error("Fjall error: {0}")]
pub struct FjallError(#[from] fjall::Error);

/// A persistent content-addressable store backed by Fjall.
///
/// Blobs are keyed by CID bytes. Pins live in their own keyspace; unpinning
/// a pinned blob removes it, since nothing else holds it.
pub struct FjallContentStore {
    blobs: Keyspace,
    pins: Keyspace,
    _database: Database, // Keep keyspaces alive
}

impl FjallContentStore {
    /// Opens a content store at the given path.
    ///
    /// Creates the database and keyspaces if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FjallError> {
        let database = Database::builder(path).open()?;
        let blobs = database.keyspace(BLOBS_KEYSPACE, || KeyspaceCreateOptions::default())?;
        let pins = database.keyspace(PINS_KEYSPACE, || KeyspaceCreateOptions::default())?;
        Ok(Self {
            blobs,
            pins,
            _database: database,
        })
    }

    pub fn is_pinned(&self, cid: &Cid) -> Result<bool, FjallError> {
        Ok(self.pins.contains_key(cid.to_bytes())?)
    }
}

impl ContentStore for FjallContentStore {
    type Error = FjallError;

    async fn put(&self, value: &[u8]) -> Result<Cid, Self::Error> {
        let cid = compute_cid(value);
        self.blobs.insert(cid.to_bytes(), value)?;
        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.blobs.get(cid.to_bytes())?.map(|v| v.to_vec()))
    }

    async fn pin(&self, cid: &Cid) -> Result<(), Self::Error> {
        self.pins.insert(cid.to_bytes(), b"".as_slice())?;
        Ok(())
    }

    async fn unpin(&self, cid: &Cid) -> Result<(), Self::Error> {
        let key = cid.to_bytes();
        if !self.pins.contains_key(&key)? {
            debug!(%cid, "unpin of unpinned blob");
            return Ok(());
        }
        self.pins.remove(key.as_slice())?;
        self.blobs.remove(key)?;
        Ok(())
    }
}
