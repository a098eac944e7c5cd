//! Materialization of legacy chain nodes.
//!
//! Before references existed, each message was stored externally under an
//! opaque identifier and linked to its predecessor by that identifier. Nodes
//! are looked up in the local file cache first (JSON), then in the content
//! store (DAG-CBOR); a content-store hit is written back to the cache.

use std::str::FromStr;
use std::time::Duration;

use cid::Cid;
use tracing::{debug, warn};

use crate::cache::LegacyCache;
use crate::content::{bounded, ContentStore};
use crate::error::Error;
use crate::payload::Payload;
use crate::reference::{compute_reference, Reference};

/// A node of a legacy chain, as materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyNode {
    pub identifier: String,
    pub payload: Payload,
}

impl LegacyNode {
    /// Identifier of the next older node, or `None` at the root.
    pub fn link(&self) -> Option<&str> {
        self.payload.link.as_deref()
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.payload.timestamp
    }

    /// The reference this node has in the current scheme.
    pub fn reference(&self) -> Result<Reference, Error> {
        Ok(compute_reference(&self.payload)?)
    }
}

/// Cache-then-content-store lookup of legacy nodes, with a bounded timeout
/// on every external call.
pub struct LegacySource<C, K> {
    content: C,
    cache: K,
    timeout: Duration,
}

impl<C: ContentStore, K: LegacyCache> LegacySource<C, K> {
    pub fn new(content: C, cache: K, timeout: Duration) -> Self {
        Self {
            content,
            cache,
            timeout,
        }
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    pub fn cache(&self) -> &K {
        &self.cache
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Materializes the node stored under `identifier`.
    ///
    /// Returns `Ok(None)` if neither the cache nor the content store has it,
    /// and `ExternalStoreUnavailable` if the content store could not answer
    /// in time. A cache failure only logs and falls through to the store.
    pub async fn fetch(&self, identifier: &str) -> Result<Option<LegacyNode>, Error> {
        match bounded(self.timeout, "cache read", self.cache.read(identifier)).await {
            Ok(Some(bytes)) => match Payload::from_json(&bytes) {
                Ok(payload) => {
                    return Ok(Some(LegacyNode {
                        identifier: identifier.to_string(),
                        payload,
                    }));
                }
                Err(e) => warn!(identifier, error = %e, "undecodable cache entry, trying content store"),
            },
            Ok(None) => {}
            Err(e) => warn!(identifier, error = %e, "cache lookup failed, trying content store"),
        }

        let Ok(cid) = Cid::from_str(identifier) else {
            debug!(identifier, "not a content identifier, skipping content store");
            return Ok(None);
        };
        let Some(bytes) = bounded(self.timeout, "content get", self.content.get(&cid)).await? else {
            return Ok(None);
        };
        let payload = Payload::from_cbor(&bytes)?;

        match payload.to_json() {
            Ok(json) => {
                if let Err(e) = bounded(self.timeout, "cache write", self.cache.write(identifier, &json)).await {
                    warn!(identifier, error = %e, "failed to populate cache");
                }
            }
            Err(e) => warn!(identifier, error = %e, "failed to encode cache entry"),
        }

        Ok(Some(LegacyNode {
            identifier: identifier.to_string(),
            payload,
        }))
    }
}
