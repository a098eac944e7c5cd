use tracing::debug;

use crate::cache::LegacyCache;
use crate::content::ContentStore;
use crate::error::Error;
use crate::handle::Handle;
use crate::legacy::LegacySource;
use crate::reference::Reference;
use crate::store::{Message, MessageStore};

/// Rows fetched per step while looking for a `previous:` predecessor.
const PREDECESSOR_SCAN: usize = 16;

/// Turns handles into references and messages.
pub struct Resolver<'a, M, C, K> {
    store: &'a M,
    legacy: &'a LegacySource<C, K>,
}

impl<'a, M, C, K> Resolver<'a, M, C, K>
where
    M: MessageStore,
    C: ContentStore,
    K: LegacyCache,
{
    pub fn new(store: &'a M, legacy: &'a LegacySource<C, K>) -> Self {
        Self { store, legacy }
    }

    /// Resolves a handle to a reference.
    ///
    /// Direct handles are returned as-is without a store lookup.
    pub async fn resolve(&self, handle: &Handle) -> Result<Reference, Error> {
        match handle {
            Handle::Direct(reference) => Ok(reference.clone()),
            Handle::Previous(reference) => self.predecessor(reference).await,
            Handle::Legacy(identifier) => self.resolve_legacy(identifier).await,
        }
    }

    /// Resolves a handle and loads the message it names.
    pub async fn materialize(&self, handle: &Handle) -> Result<Message, Error> {
        let reference = self.resolve(handle).await?;
        self.store
            .get_by_reference(&reference)
            .await?
            .ok_or_else(|| Error::NotFound(reference.to_string()))
    }

    /// The message immediately before `reference` in its conversation: the
    /// newest row at or before its `(timestamp, sequence)` position that was
    /// also appended before it. Rows appended later under a skewed clock are
    /// passed over.
    async fn predecessor(&self, reference: &Reference) -> Result<Reference, Error> {
        let ctx = self
            .store
            .get_sequence_context(reference)
            .await?
            .ok_or_else(|| Error::NotFound(reference.to_string()))?;

        let mut cursor = (ctx.timestamp, ctx.sequence);
        loop {
            let window = self
                .store
                .list_before(&ctx.conversation_id, cursor.1, cursor.0, PREDECESSOR_SCAN)
                .await?;
            if let Some(found) = window.iter().find(|m| m.sequence < ctx.sequence) {
                return Ok(found.reference.clone());
            }
            // Listings include the cursor row, so a short window or one that
            // did not move past the cursor is the end of the conversation.
            let next = window.last().map(|m| (m.timestamp, m.sequence));
            match next {
                Some(next) if window.len() == PREDECESSOR_SCAN && next != cursor => cursor = next,
                _ => {
                    return Err(Error::InvalidHandle(format!(
                        "previous:{reference}: conversation root"
                    )));
                }
            }
        }
    }

    /// Deprecated path for identifiers issued before references existed.
    ///
    /// Identifiers recorded by the archiver map straight to their row. Any
    /// other identifier is materialized from the legacy source and its
    /// reference recomputed.
    async fn resolve_legacy(&self, identifier: &str) -> Result<Reference, Error> {
        if let Some(reference) = self.store.find_by_content_id(identifier).await? {
            debug!(identifier, %reference, "legacy handle names an archived copy");
            return Ok(reference);
        }
        debug!(identifier, "resolving legacy handle");
        let node = self
            .legacy
            .fetch(identifier)
            .await?
            .ok_or_else(|| Error::InvalidHandle(identifier.to_string()))?;
        node.reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use crate::content::MemoryContentStore;
    use crate::memory::MemoryMessageStore;
    use crate::payload::Payload;
    use crate::reference::compute_reference;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        store: MemoryMessageStore,
        legacy: LegacySource<MemoryContentStore, FileCache>,
        _dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            Self {
                store: MemoryMessageStore::new(),
                legacy: LegacySource::new(
                    MemoryContentStore::new(),
                    FileCache::new(dir.path()),
                    Duration::from_secs(1),
                ),
                _dir: dir,
            }
        }

        fn resolver(&self) -> Resolver<'_, MemoryMessageStore, MemoryContentStore, FileCache> {
            Resolver::new(&self.store, &self.legacy)
        }

        async fn append(&self, content: &str, timestamp: i64) -> Reference {
            let payload = Payload {
                message_content: content.to_string(),
                timestamp: Some(timestamp),
                ..Payload::default()
            };
            let reference = compute_reference(&payload).unwrap();
            self.store.append(&reference, "c1", &payload, timestamp).await.unwrap();
            reference
        }
    }

    #[tokio::test]
    async fn direct_handle_is_identity() {
        let fx = Fixture::new();
        let reference = fx.append("a", 1).await;

        let resolved = fx.resolver().resolve(&Handle::Direct(reference.clone())).await.unwrap();

        assert_eq!(resolved, reference);
    }

    #[tokio::test]
    async fn previous_handle_yields_predecessor() {
        let fx = Fixture::new();
        let a = fx.append("a", 100).await;
        let b = fx.append("b", 100).await;
        let c = fx.append("c", 200).await;
        let resolver = fx.resolver();

        assert_eq!(resolver.resolve(&Handle::previous(&c)).await.unwrap(), b);
        assert_eq!(resolver.resolve(&Handle::previous(&b)).await.unwrap(), a);
    }

    #[tokio::test]
    async fn previous_of_root_is_invalid() {
        let fx = Fixture::new();
        let root = fx.append("root", 1).await;
        fx.append("next", 2).await;

        let err = fx.resolver().resolve(&Handle::previous(&root)).await.unwrap_err();

        assert!(matches!(err, Error::InvalidHandle(_)));
    }

    #[tokio::test]
    async fn previous_skips_rows_appended_later() {
        let fx = Fixture::new();
        let root = fx.append("root", 200).await;
        let skewed = fx.append("skewed", 100).await;
        let resolver = fx.resolver();

        let err = resolver.resolve(&Handle::previous(&root)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidHandle(_)));
        let err = resolver.resolve(&Handle::previous(&skewed)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidHandle(_)));
    }

    #[tokio::test]
    async fn previous_scans_past_a_full_window_of_later_rows() {
        let fx = Fixture::new();
        let older = fx.append("older", 10).await;
        let cursor = fx.append("cursor", 500).await;
        // Appended after the cursor but sorted below it by timestamp.
        for i in 0..PREDECESSOR_SCAN * 2 {
            fx.append(&format!("skew{i}"), 400).await;
        }

        let resolved = fx.resolver().resolve(&Handle::previous(&cursor)).await.unwrap();

        assert_eq!(resolved, older);
    }

    #[tokio::test]
    async fn previous_of_unknown_reference_is_not_found() {
        let fx = Fixture::new();
        let unknown = compute_reference(&Payload::default()).unwrap();

        let err = fx.resolver().resolve(&Handle::previous(&unknown)).await.unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn legacy_handle_resolves_through_cache() {
        let fx = Fixture::new();
        let payload = Payload {
            message_content: "old".to_string(),
            link: Some("olderid".to_string()),
            ..Payload::default()
        };
        fx.legacy.cache().write("legacyid", &payload.to_json().unwrap()).await.unwrap();

        let resolved = fx.resolver().resolve(&Handle::Legacy("legacyid".to_string())).await.unwrap();

        assert_eq!(resolved, compute_reference(&payload).unwrap());
    }

    #[tokio::test]
    async fn unknown_legacy_handle_is_invalid() {
        let fx = Fixture::new();

        let err = fx.resolver().resolve(&Handle::Legacy("nothing".to_string())).await.unwrap_err();

        assert!(matches!(err, Error::InvalidHandle(_)));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn materialize_loads_message() {
        let fx = Fixture::new();
        let a = fx.append("a", 1).await;
        let b = fx.append("b", 2).await;
        let resolver = fx.resolver();

        let message = resolver.materialize(&Handle::previous(&b)).await.unwrap();
        assert_eq!(message.reference, a);
        assert_eq!(message.payload.message_content, "a");

        let missing = compute_reference(&Payload::default()).unwrap();
        let err = resolver.materialize(&Handle::Direct(missing)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
