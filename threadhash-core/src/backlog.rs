//! Mirroring of stored messages into the content store.
//!
//! Appends never wait on the content store. Instead, unarchived rows form a
//! backlog that a separate consumer drains: upload, pin, cache, then ack.
//! Delivery is at-least-once; acking an already archived reference is a no-op.

use tracing::{debug, info, warn};

use crate::cache::LegacyCache;
use crate::content::{bounded, ContentStore};
use crate::error::Error;
use crate::legacy::LegacySource;
use crate::reference::Reference;
use crate::store::{Message, MessageStore};

/// Unarchived messages, oldest first.
pub struct Backlog<'a, M> {
    store: &'a M,
}

impl<'a, M: MessageStore> Backlog<'a, M> {
    pub fn new(store: &'a M) -> Self {
        Self { store }
    }

    pub async fn next_batch(&self, limit: usize) -> Result<Vec<Message>, Error> {
        Ok(self.store.list_unarchived(limit).await?)
    }

    /// Marks a message archived after a confirmed content-store write.
    pub async fn ack(&self, reference: &Reference) -> Result<(), Error> {
        if !self.store.mark_archived(reference).await? {
            debug!(%reference, "ack for archived or unknown reference");
        }
        Ok(())
    }
}

/// Outcome of one archival pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub uploaded: usize,
    pub failed: usize,
}

/// Drains the backlog into the content store.
pub struct Archiver<'a, M, C, K> {
    backlog: Backlog<'a, M>,
    mirror: &'a LegacySource<C, K>,
}

impl<'a, M, C, K> Archiver<'a, M, C, K>
where
    M: MessageStore,
    C: ContentStore,
    K: LegacyCache,
{
    pub fn new(store: &'a M, mirror: &'a LegacySource<C, K>) -> Self {
        Self {
            backlog: Backlog::new(store),
            mirror,
        }
    }

    /// Archives up to `limit` backlog messages. Individual failures are
    /// logged and left in the backlog for the next pass.
    pub async fn run_once(&self, limit: usize) -> Result<ArchiveReport, Error> {
        let batch = self.backlog.next_batch(limit).await?;
        let mut report = ArchiveReport::default();
        for message in &batch {
            match self.archive(message).await {
                Ok(()) => report.uploaded += 1,
                Err(e) => {
                    warn!(
                        reference = %message.reference,
                        conversation_id = %message.conversation_id,
                        error = %e,
                        "failed to archive message"
                    );
                    report.failed += 1;
                }
            }
        }
        info!(uploaded = report.uploaded, failed = report.failed, "archival pass complete");
        Ok(report)
    }

    async fn archive(&self, message: &Message) -> Result<(), Error> {
        let limit = self.mirror.timeout();
        let content = self.mirror.content();
        let bytes = message.payload.to_cbor()?;
        let cid = bounded(limit, "content put", content.put(&bytes)).await?;
        bounded(limit, "content pin", content.pin(&cid)).await?;
        let id = cid.to_string();
        self.backlog.store.set_content_id(&message.reference, &id).await?;

        // The cache is a convenience copy; the content store is authoritative.
        match message.payload.to_json() {
            Ok(json) => {
                if let Err(e) = bounded(limit, "cache write", self.mirror.cache().write(&id, &json)).await {
                    warn!(reference = %message.reference, error = %e, "failed to cache archived message");
                }
            }
            Err(e) => warn!(reference = %message.reference, error = %e, "failed to encode cache entry"),
        }

        self.backlog.ack(&message.reference).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use crate::content::MemoryContentStore;
    use crate::memory::MemoryMessageStore;
    use crate::payload::Payload;
    use crate::reference::{compute_reference, content_id};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn append(store: &MemoryMessageStore, content: &str, timestamp: i64) -> (Reference, Payload) {
        let payload = Payload {
            message_content: content.to_string(),
            timestamp: Some(timestamp),
            ..Payload::default()
        };
        let reference = compute_reference(&payload).unwrap();
        store.append(&reference, "c1", &payload, timestamp).await.unwrap();
        (reference, payload)
    }

    #[tokio::test]
    async fn next_batch_is_oldest_first() {
        let store = MemoryMessageStore::new();
        append(&store, "late", 300).await;
        append(&store, "early", 100).await;

        let batch = Backlog::new(&store).next_batch(10).await.unwrap();

        let order: Vec<_> = batch.iter().map(|m| m.payload.message_content.as_str()).collect();
        assert_eq!(order, ["early", "late"]);
    }

    #[tokio::test]
    async fn ack_twice_is_a_noop() {
        let store = MemoryMessageStore::new();
        let (reference, _) = append(&store, "a", 1).await;
        let backlog = Backlog::new(&store);

        backlog.ack(&reference).await.unwrap();
        backlog.ack(&reference).await.unwrap();

        assert!(store.get_by_reference(&reference).await.unwrap().unwrap().archived);
    }

    #[tokio::test]
    async fn run_once_uploads_pins_caches_and_acks() {
        let dir = TempDir::new().unwrap();
        let store = MemoryMessageStore::new();
        let mirror = LegacySource::new(MemoryContentStore::new(), FileCache::new(dir.path()), Duration::from_secs(1));
        let (first, payload) = append(&store, "a", 1).await;
        append(&store, "b", 2).await;
        let archiver = Archiver::new(&store, &mirror);

        let report = archiver.run_once(10).await.unwrap();

        assert_eq!(report, ArchiveReport { uploaded: 2, failed: 0 });
        assert!(Backlog::new(&store).next_batch(10).await.unwrap().is_empty());
        let cid = content_id(&payload).unwrap();
        assert!(mirror.content().is_pinned(&cid).await);
        assert!(mirror.cache().read(&cid.to_string()).await.unwrap().is_some());
        assert!(store.get_by_reference(&first).await.unwrap().unwrap().archived);

        let again = archiver.run_once(10).await.unwrap();
        assert_eq!(again, ArchiveReport::default());
    }
}
