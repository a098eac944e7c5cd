//! RocksDB-backed message table for Threadhash.
//!
//! One column family per table: `messages` (rows by reference), `timeline`
//! (per-conversation order), `unarchived` (archival backlog), `content_ids`
//! (archived copy to reference), `pointers`, `directory` (legacy conversation
//! directory) and `meta` (sequence counter and migration status records).

mod keys;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rocksdb::{ColumnFamily, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use threadhash_core::{
    ConversationDirectory, ConversationPointer, DirectoryEntry, Message, MessageStore,
    MigrationStatus, Payload, PointerTable, Reference, SequenceContext, StatusStore, StoreError,
};
use tracing::debug;

const MESSAGES: &str = "messages";
const TIMELINE: &str = "timeline";
const BACKLOG: &str = "unarchived";
const CONTENT_IDS: &str = "content_ids";
const POINTERS: &str = "pointers";
const DIRECTORY: &str = "directory";
const META: &str = "meta";

const COLUMN_FAMILIES: [&str; 7] = [MESSAGES, TIMELINE, BACKLOG, CONTENT_IDS, POINTERS, DIRECTORY, META];

#[derive(Debug, Error)]
pub enum RocksError {
    #[error("RocksDB error: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("missing column family: {0}")]
    MissingColumnFamily(&'static str),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("write lock poisoned")]
    Poisoned,
}

impl From<RocksError> for StoreError {
    fn from(e: RocksError) -> Self {
        StoreError::backend(e)
    }
}

fn backend(e: rocksdb::Error) -> StoreError {
    RocksError::from(e).into()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_ipld_dagcbor::to_vec(value).map_err(|e| RocksError::Encoding(e.to_string()).into())
}

fn decode<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_ipld_dagcbor::from_slice(bytes).map_err(|e| StoreError::Corrupt(format!("{what}: {e}")))
}

/// A persistent message table, pointer table, conversation directory and
/// status store in one RocksDB database.
pub struct RocksMessageStore {
    db: DB,
    /// Next sequence to assign. The lock also serializes every
    /// read-modify-write so that appends, archive flags and status
    /// transitions are atomic.
    next_sequence: Mutex<u64>,
}

impl RocksMessageStore {
    /// Opens a store at the given path.
    ///
    /// Creates the database and its column families if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RocksError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = DB::open_cf(&opts, path.as_ref(), COLUMN_FAMILIES)?;

        let meta = db.cf_handle(META).ok_or(RocksError::MissingColumnFamily(META))?;
        let next_sequence = match db.get_cf(meta, keys::NEXT_SEQUENCE)? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| RocksError::Encoding("next sequence is not 8 bytes".to_string()))?;
                u64::from_be_bytes(bytes)
            }
            None => 1,
        };
        debug!(path = %path.as_ref().display(), next_sequence, "opened message store");

        Ok(Self {
            db,
            next_sequence: Mutex::new(next_sequence),
        })
    }

    /// Adds or replaces a legacy directory entry.
    pub fn register(&self, entry: &DirectoryEntry) -> Result<(), StoreError> {
        let directory = self.cf(DIRECTORY)?;
        self.db
            .put_cf(directory, entry.conversation_id.as_bytes(), encode(entry)?)
            .map_err(backend)
    }

    pub fn directory_entry(&self, conversation_id: &str) -> Result<Option<DirectoryEntry>, StoreError> {
        let directory = self.cf(DIRECTORY)?;
        self.db
            .get_cf(directory, conversation_id.as_bytes())
            .map_err(backend)?
            .map(|bytes| decode("directory entry", &bytes))
            .transpose()
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| RocksError::MissingColumnFamily(name).into())
    }

    fn lock(&self) -> Result<MutexGuard<'_, u64>, StoreError> {
        self.next_sequence.lock().map_err(|_| RocksError::Poisoned.into())
    }

    fn message(&self, key: &[u8]) -> Result<Option<Message>, StoreError> {
        let messages = self.cf(MESSAGES)?;
        self.db
            .get_cf(messages, key)
            .map_err(backend)?
            .map(|bytes| decode("message", &bytes))
            .transpose()
    }

    /// Loads the row an index entry points at.
    fn indexed(&self, index: &str, key: &[u8]) -> Result<Message, StoreError> {
        self.message(key)?.ok_or_else(|| {
            StoreError::Corrupt(format!("{index} entry without row: {}", String::from_utf8_lossy(key)))
        })
    }

    fn append_row(
        &self,
        reference: &Reference,
        conversation_id: &str,
        payload: &Payload,
        timestamp: i64,
    ) -> Result<u64, StoreError> {
        let mut next = self.lock()?;
        let key = reference.to_string();
        let messages = self.cf(MESSAGES)?;
        if self.db.get_pinned_cf(messages, key.as_bytes()).map_err(backend)?.is_some() {
            return Err(StoreError::DuplicateReference(reference.clone()));
        }

        let sequence = *next;
        let message = Message {
            reference: reference.clone(),
            conversation_id: conversation_id.to_string(),
            sequence,
            timestamp,
            payload: payload.clone(),
            archived: false,
            content_id: None,
        };
        let mut batch = WriteBatch::default();
        batch.put_cf(messages, key.as_bytes(), encode(&message)?);
        batch.put_cf(
            self.cf(TIMELINE)?,
            keys::timeline(conversation_id, timestamp, sequence),
            key.as_bytes(),
        );
        batch.put_cf(self.cf(BACKLOG)?, keys::backlog(timestamp, sequence), key.as_bytes());
        batch.put_cf(self.cf(META)?, keys::NEXT_SEQUENCE, (sequence + 1).to_be_bytes());
        self.db.write(batch).map_err(backend)?;

        *next = sequence + 1;
        Ok(sequence)
    }

    fn timeline_before(
        &self,
        conversation_id: &str,
        sequence: u64,
        timestamp: i64,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let mut messages = Vec::new();
        if limit == 0 {
            return Ok(messages);
        }
        let prefix = keys::conversation_prefix(conversation_id);
        let start = keys::timeline(conversation_id, timestamp, sequence);
        let iter = self
            .db
            .iterator_cf(self.cf(TIMELINE)?, IteratorMode::From(&start, Direction::Reverse));
        for item in iter {
            let (key, reference) = item.map_err(backend)?;
            if !key.starts_with(&prefix) {
                break;
            }
            messages.push(self.indexed(TIMELINE, &reference)?);
            if messages.len() == limit {
                break;
            }
        }
        Ok(messages)
    }

    fn backlog(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let mut messages = Vec::new();
        for item in self.db.iterator_cf(self.cf(BACKLOG)?, IteratorMode::Start).take(limit) {
            let (_, reference) = item.map_err(backend)?;
            messages.push(self.indexed(BACKLOG, &reference)?);
        }
        Ok(messages)
    }

    fn set_archived(&self, reference: &Reference) -> Result<bool, StoreError> {
        let _guard = self.lock()?;
        let key = reference.to_string();
        let Some(mut message) = self.message(key.as_bytes())? else {
            return Ok(false);
        };
        if message.archived {
            return Ok(false);
        }
        message.archived = true;

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(MESSAGES)?, key.as_bytes(), encode(&message)?);
        batch.delete_cf(self.cf(BACKLOG)?, keys::backlog(message.timestamp, message.sequence));
        self.db.write(batch).map_err(backend)?;
        Ok(true)
    }

    fn record_content_id(&self, reference: &Reference, content_id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock()?;
        let key = reference.to_string();
        let Some(mut message) = self.message(key.as_bytes())? else {
            return Ok(false);
        };
        message.content_id = Some(content_id.to_string());

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(MESSAGES)?, key.as_bytes(), encode(&message)?);
        batch.put_cf(self.cf(CONTENT_IDS)?, content_id.as_bytes(), key.as_bytes());
        self.db.write(batch).map_err(backend)?;
        Ok(true)
    }

    fn by_content_id(&self, content_id: &str) -> Result<Option<Reference>, StoreError> {
        let Some(bytes) = self.db.get_cf(self.cf(CONTENT_IDS)?, content_id.as_bytes()).map_err(backend)? else {
            return Ok(None);
        };
        let reference = std::str::from_utf8(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("content id {content_id}: {e}")))?;
        reference
            .parse::<Reference>()
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("content id {content_id}: {e}")))
    }

    fn delete_rows(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let _guard = self.lock()?;
        let prefix = keys::conversation_prefix(conversation_id);
        let timeline = self.cf(TIMELINE)?;

        let mut removed = Vec::new();
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(timeline, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, reference) = item.map_err(backend)?;
            if !key.starts_with(&prefix) {
                break;
            }
            batch.delete_cf(timeline, &key);
            if let Some(message) = self.message(&reference)? {
                batch.delete_cf(self.cf(MESSAGES)?, &reference);
                batch.delete_cf(self.cf(BACKLOG)?, keys::backlog(message.timestamp, message.sequence));
                if let Some(id) = &message.content_id {
                    batch.delete_cf(self.cf(CONTENT_IDS)?, id.as_bytes());
                }
                removed.push(message);
            }
        }
        self.db.write(batch).map_err(backend)?;
        debug!(conversation_id, removed = removed.len(), "deleted conversation rows");
        Ok(removed)
    }

    fn pointer(&self, conversation_id: &str) -> Result<Option<ConversationPointer>, StoreError> {
        self.db
            .get_cf(self.cf(POINTERS)?, conversation_id.as_bytes())
            .map_err(backend)?
            .map(|bytes| decode("pointer", &bytes))
            .transpose()
    }

    fn directory_page(&self, offset: usize, limit: usize) -> Result<Vec<DirectoryEntry>, StoreError> {
        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(self.cf(DIRECTORY)?, IteratorMode::Start)
            .skip(offset)
            .take(limit);
        for item in iter {
            let (_, bytes) = item.map_err(backend)?;
            entries.push(decode("directory entry", &bytes)?);
        }
        Ok(entries)
    }

    fn set_threadhash(&self, conversation_id: &str, threadhash: &str) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let Some(mut entry) = self.directory_entry(conversation_id)? else {
            debug!(conversation_id, "no directory entry to update");
            return Ok(());
        };
        entry.threadhash = Some(threadhash.to_string());
        self.register(&entry)
    }

    fn status(&self, name: &str) -> Result<Option<MigrationStatus>, StoreError> {
        self.db
            .get_cf(self.cf(META)?, keys::status(name))
            .map_err(backend)?
            .map(|bytes| {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(format!("status {name}: {e}")))
            })
            .transpose()
    }

    fn put_status(&self, name: &str, status: MigrationStatus) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&status).map_err(|e| RocksError::Encoding(e.to_string()))?;
        self.db
            .put_cf(self.cf(META)?, keys::status(name), bytes)
            .map_err(backend)
    }

    fn begin(&self, name: &str) -> Result<bool, StoreError> {
        let _guard = self.lock()?;
        let current = self.status(name)?.unwrap_or_default();
        if current.started || current.completed {
            return Ok(false);
        }
        self.put_status(name, MigrationStatus::RUNNING)?;
        Ok(true)
    }
}

impl MessageStore for RocksMessageStore {
    async fn append(
        &self,
        reference: &Reference,
        conversation_id: &str,
        payload: &Payload,
        timestamp: i64,
    ) -> Result<u64, StoreError> {
        self.append_row(reference, conversation_id, payload, timestamp)
    }

    async fn get_by_reference(&self, reference: &Reference) -> Result<Option<Message>, StoreError> {
        self.message(reference.to_string().as_bytes())
    }

    async fn get_sequence_context(
        &self,
        reference: &Reference,
    ) -> Result<Option<SequenceContext>, StoreError> {
        let message = self.message(reference.to_string().as_bytes())?;
        Ok(message.as_ref().map(SequenceContext::from))
    }

    async fn list_before(
        &self,
        conversation_id: &str,
        sequence: u64,
        timestamp: i64,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.timeline_before(conversation_id, sequence, timestamp, limit)
    }

    async fn list_unarchived(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.backlog(limit)
    }

    async fn mark_archived(&self, reference: &Reference) -> Result<bool, StoreError> {
        self.set_archived(reference)
    }

    async fn set_content_id(&self, reference: &Reference, content_id: &str) -> Result<bool, StoreError> {
        self.record_content_id(reference, content_id)
    }

    async fn find_by_content_id(&self, content_id: &str) -> Result<Option<Reference>, StoreError> {
        self.by_content_id(content_id)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        self.delete_rows(conversation_id)
    }
}

impl PointerTable for RocksMessageStore {
    async fn head(&self, conversation_id: &str) -> Result<Option<ConversationPointer>, StoreError> {
        self.pointer(conversation_id)
    }

    async fn set_head(&self, pointer: &ConversationPointer) -> Result<(), StoreError> {
        self.db
            .put_cf(self.cf(POINTERS)?, pointer.conversation_id.as_bytes(), encode(pointer)?)
            .map_err(backend)
    }

    async fn clear_head(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.db
            .delete_cf(self.cf(POINTERS)?, conversation_id.as_bytes())
            .map_err(backend)
    }
}

impl ConversationDirectory for RocksMessageStore {
    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<DirectoryEntry>, StoreError> {
        self.directory_page(offset, limit)
    }

    async fn update_threadhash(&self, conversation_id: &str, threadhash: &str) -> Result<(), StoreError> {
        self.set_threadhash(conversation_id, threadhash)
    }
}

impl StatusStore for RocksMessageStore {
    async fn read_status(&self, name: &str) -> Result<Option<MigrationStatus>, StoreError> {
        self.status(name)
    }

    async fn write_status(&self, name: &str, status: MigrationStatus) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        self.put_status(name, status)
    }

    async fn try_begin(&self, name: &str) -> Result<bool, StoreError> {
        self.begin(name)
    }
}
