use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cid::Cid;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backlog::{ArchiveReport, Archiver};
use crate::cache::LegacyCache;
use crate::content::{bounded, ContentStore};
use crate::error::Error;
use crate::handle::Handle;
use crate::history::Paginator;
use crate::legacy::LegacySource;
use crate::migration::{ConversationDirectory, MigrationConfig, Migrator, StatusStore};
use crate::payload::Payload;
use crate::reference::{compute_reference, content_id, Reference};
use crate::resolver::Resolver;
use crate::store::{ConversationPointer, Message, MessageStore, PointerTable};

/// Runtime knobs of a [`Chatlog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatlogConfig {
    /// Bound on every content-store and cache call.
    pub fetch_timeout: Duration,
    pub max_page_limit: usize,
    /// Messages archived per [`Chatlog::archive_pending`] call by default.
    pub archive_batch: usize,
    pub migration: MigrationConfig,
}

impl Default for ChatlogConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_millis(5000),
            max_page_limit: 30,
            archive_batch: 5000,
            migration: MigrationConfig::default(),
        }
    }
}

/// The message log of every conversation: append, resolve, page, archive
/// and expire, over one message store and one content store.
pub struct Chatlog<M, C, K> {
    store: M,
    legacy: LegacySource<C, K>,
    config: ChatlogConfig,
    /// Serializes the read-append-advance of conversation pointers.
    append_lock: Mutex<()>,
}

impl<M, C, K> Chatlog<M, C, K>
where
    M: MessageStore + PointerTable,
    C: ContentStore,
    K: LegacyCache,
{
    pub fn new(store: M, content: C, cache: K, config: ChatlogConfig) -> Self {
        let legacy = LegacySource::new(content, cache, config.fetch_timeout);
        Self {
            store,
            legacy,
            config,
            append_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &M {
        &self.store
    }

    pub fn legacy(&self) -> &LegacySource<C, K> {
        &self.legacy
    }

    pub fn config(&self) -> &ChatlogConfig {
        &self.config
    }

    /// Appends a message to a conversation and makes it the head.
    ///
    /// A missing timestamp is filled with the current time before the
    /// reference is computed. The stored link is the `previous:` handle of
    /// the new message, or null for the first message of a conversation.
    pub async fn append(&self, conversation_id: &str, mut payload: Payload) -> Result<Message, Error> {
        let timestamp = match payload.timestamp {
            Some(ts) => ts,
            None => {
                let now = now_ms();
                payload.timestamp = Some(now);
                now
            }
        };
        let reference = compute_reference(&payload)?;

        let _guard = self.append_lock.lock().await;
        let head = self.store.head(conversation_id).await?;
        payload.link = head
            .and_then(|p| p.head_reference)
            .map(|_| Handle::previous(&reference).to_string());

        let sequence = self
            .store
            .append(&reference, conversation_id, &payload, timestamp)
            .await?;
        self.store
            .set_head(&ConversationPointer {
                conversation_id: conversation_id.to_string(),
                head_reference: Some(reference.clone()),
                head_timestamp: timestamp,
            })
            .await?;
        debug!(conversation_id, %reference, sequence, "appended message");

        Ok(Message {
            reference,
            conversation_id: conversation_id.to_string(),
            sequence,
            timestamp,
            payload,
            archived: false,
            content_id: None,
        })
    }

    pub fn resolver(&self) -> Resolver<'_, M, C, K> {
        Resolver::new(&self.store, &self.legacy)
    }

    pub fn paginator(&self) -> Paginator<'_, M> {
        Paginator::new(&self.store, self.config.max_page_limit)
    }

    pub async fn resolve(&self, handle: &str) -> Result<Reference, Error> {
        self.resolver().resolve(&handle.parse()?).await
    }

    pub async fn materialize(&self, handle: &str) -> Result<Message, Error> {
        self.resolver().materialize(&handle.parse()?).await
    }

    /// Up to `limit` messages, newest first, starting at the message the
    /// handle resolves to.
    pub async fn page(&self, handle: &str, limit: usize) -> Result<Vec<Message>, Error> {
        let reference = self.resolve(handle).await?;
        self.paginator().page(&reference, limit).await
    }

    /// The whole history ending at the handle, newest first.
    pub async fn history(&self, handle: &str) -> Result<Vec<Message>, Error> {
        let reference = self.resolve(handle).await?;
        self.paginator().walk(&reference, self.config.max_page_limit).await
    }

    pub async fn head(&self, conversation_id: &str) -> Result<Option<ConversationPointer>, Error> {
        Ok(self.store.head(conversation_id).await?)
    }

    /// Mirrors up to `limit` backlog messages, or `archive_batch` if `None`.
    pub async fn archive_pending(&self, limit: Option<usize>) -> Result<ArchiveReport, Error> {
        let limit = limit.unwrap_or(self.config.archive_batch);
        Archiver::new(&self.store, &self.legacy).run_once(limit).await
    }

    /// Deletes a conversation everywhere. Returns the number of messages
    /// removed from the message table.
    ///
    /// Cache and content-store cleanup is best effort: failures are logged
    /// and leave orphaned blobs, never rows.
    pub async fn expire_conversation(&self, conversation_id: &str) -> Result<usize, Error> {
        let _guard = self.append_lock.lock().await;
        let removed = self.store.delete_conversation(conversation_id).await?;
        self.store.clear_head(conversation_id).await?;
        drop(_guard);

        let limit = self.legacy.timeout();
        for message in &removed {
            let recorded = message.content_id.as_deref().map(Cid::from_str);
            let cid = match recorded {
                Some(Ok(cid)) => cid,
                Some(Err(e)) => {
                    warn!(conversation_id, reference = %message.reference, error = %e, "unparsable content id");
                    continue;
                }
                None => match content_id(&message.payload) {
                    Ok(cid) => cid,
                    Err(e) => {
                        warn!(conversation_id, reference = %message.reference, error = %e, "no content id");
                        continue;
                    }
                },
            };
            let id = cid.to_string();
            if let Err(e) = bounded(limit, "cache delete", self.legacy.cache().delete(&id)).await {
                warn!(conversation_id, reference = %message.reference, error = %e, "failed to delete cache entry");
            }
            if message.archived {
                if let Err(e) = bounded(limit, "content unpin", self.legacy.content().unpin(&cid)).await {
                    warn!(conversation_id, reference = %message.reference, error = %e, "failed to unpin");
                }
            }
        }
        info!(conversation_id, removed = removed.len(), "expired conversation");
        Ok(removed.len())
    }

    pub fn migrator<'a, D, S>(&'a self, directory: &'a D, status: &'a S) -> Migrator<'a, M, D, S, C, K>
    where
        D: ConversationDirectory,
        S: StatusStore,
    {
        Migrator::new(
            &self.store,
            directory,
            status,
            &self.legacy,
            self.config.migration.clone(),
        )
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
