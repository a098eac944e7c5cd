use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use cid::Cid;
use tokio::sync::RwLock;

use crate::error::Error;
use crate::reference::compute_cid;

/// Content-addressable blob store, the durable mirror of the message table.
///
/// Stores operate on raw bytes; `put` derives the CID from the bytes.
/// Pinned blobs survive garbage collection; unpinning releases the blob.
/// Nothing is read-after-write consistent by contract: callers bound every
/// call with a timeout.
pub trait ContentStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn put(&self, value: &[u8]) -> impl Future<Output = Result<Cid, Self::Error>> + Send;

    /// Retrieves the bytes associated with a CID, or None if not present.
    fn get(&self, cid: &Cid) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    fn pin(&self, cid: &Cid) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn unpin(&self, cid: &Cid) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Runs an external-store call under `limit`, mapping both timeout and
/// failure to `ExternalStoreUnavailable`.
pub(crate) async fn bounded<T, E: Display>(
    limit: Duration,
    what: &str,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, Error> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::ExternalStoreUnavailable(format!("{what}: {e}"))),
        Err(_) => Err(Error::ExternalStoreUnavailable(format!(
            "{what}: timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

/// An in-memory content store backed by a HashMap.
///
/// Useful for testing and as a reference implementation.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<Cid, Vec<u8>>>,
    pins: RwLock<HashSet<Cid>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_pinned(&self, cid: &Cid) -> bool {
        self.pins.read().await.contains(cid)
    }
}

impl ContentStore for MemoryContentStore {
    type Error = Infallible;

    async fn put(&self, value: &[u8]) -> Result<Cid, Self::Error> {
        let cid = compute_cid(value);
        self.blobs.write().await.insert(cid, value.to_vec());
        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.blobs.read().await.get(cid).cloned())
    }

    async fn pin(&self, cid: &Cid) -> Result<(), Self::Error> {
        self.pins.write().await.insert(*cid);
        Ok(())
    }

    async fn unpin(&self, cid: &Cid) -> Result<(), Self::Error> {
        if self.pins.write().await.remove(cid) {
            self.blobs.write().await.remove(cid);
        }
        Ok(())
    }
}
