//! In-memory backends. Useful for tests and as reference implementations of
//! the ordering rules the persistent backends must match.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use tokio::sync::{Mutex, RwLock};

use crate::migration::{ConversationDirectory, DirectoryEntry, MigrationStatus, StatusStore};
use crate::payload::Payload;
use crate::reference::Reference;
use crate::store::{ConversationPointer, Message, MessageStore, PointerTable, SequenceContext, StoreError};

#[derive(Debug)]
struct Row {
    conversation_id: String,
    sequence: u64,
    timestamp: i64,
    payload: Payload,
    archived: bool,
    content_id: Option<String>,
}

impl Row {
    fn to_message(&self, reference: &Reference) -> Message {
        Message {
            reference: reference.clone(),
            conversation_id: self.conversation_id.clone(),
            sequence: self.sequence,
            timestamp: self.timestamp,
            payload: self.payload.clone(),
            archived: self.archived,
            content_id: self.content_id.clone(),
        }
    }
}

#[derive(Debug)]
struct Tables {
    next_sequence: u64,
    rows: HashMap<Reference, Row>,
    /// (conversation, timestamp, sequence) -> reference
    timeline: BTreeMap<(String, i64, u64), Reference>,
    /// (timestamp, sequence) -> reference, unarchived rows only
    unarchived: BTreeMap<(i64, u64), Reference>,
    /// content id -> reference, archived rows only
    content_ids: HashMap<String, Reference>,
    pointers: HashMap<String, ConversationPointer>,
}

impl Default for Tables {
    fn default() -> Self {
        Tables {
            next_sequence: 1,
            rows: HashMap::new(),
            timeline: BTreeMap::new(),
            unarchived: BTreeMap::new(),
            content_ids: HashMap::new(),
            pointers: HashMap::new(),
        }
    }
}

/// An in-memory message table and pointer table.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    tables: RwLock<Tables>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.rows.is_empty()
    }
}

impl MessageStore for MemoryMessageStore {
    async fn append(
        &self,
        reference: &Reference,
        conversation_id: &str,
        payload: &Payload,
        timestamp: i64,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.rows.contains_key(reference) {
            return Err(StoreError::DuplicateReference(reference.clone()));
        }
        let sequence = tables.next_sequence;
        tables.next_sequence += 1;
        tables.rows.insert(
            reference.clone(),
            Row {
                conversation_id: conversation_id.to_string(),
                sequence,
                timestamp,
                payload: payload.clone(),
                archived: false,
                content_id: None,
            },
        );
        tables
            .timeline
            .insert((conversation_id.to_string(), timestamp, sequence), reference.clone());
        tables.unarchived.insert((timestamp, sequence), reference.clone());
        Ok(sequence)
    }

    async fn get_by_reference(&self, reference: &Reference) -> Result<Option<Message>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.rows.get(reference).map(|row| row.to_message(reference)))
    }

    async fn get_sequence_context(
        &self,
        reference: &Reference,
    ) -> Result<Option<SequenceContext>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.rows.get(reference).map(|row| SequenceContext {
            sequence: row.sequence,
            timestamp: row.timestamp,
            conversation_id: row.conversation_id.clone(),
        }))
    }

    async fn list_before(
        &self,
        conversation_id: &str,
        sequence: u64,
        timestamp: i64,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        let low = (conversation_id.to_string(), i64::MIN, 0);
        let high = (conversation_id.to_string(), timestamp, sequence);
        let mut messages = Vec::new();
        for reference in tables
            .timeline
            .range((Bound::Included(low), Bound::Included(high)))
            .rev()
            .take(limit)
            .map(|(_, r)| r)
        {
            let row = tables
                .rows
                .get(reference)
                .ok_or_else(|| StoreError::Corrupt(format!("timeline entry without row: {reference}")))?;
            messages.push(row.to_message(reference));
        }
        Ok(messages)
    }

    async fn list_unarchived(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        let mut messages = Vec::new();
        for reference in tables.unarchived.values().take(limit) {
            let row = tables
                .rows
                .get(reference)
                .ok_or_else(|| StoreError::Corrupt(format!("backlog entry without row: {reference}")))?;
            messages.push(row.to_message(reference));
        }
        Ok(messages)
    }

    async fn mark_archived(&self, reference: &Reference) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(row) = tables.rows.get_mut(reference) else {
            return Ok(false);
        };
        if row.archived {
            return Ok(false);
        }
        row.archived = true;
        let key = (row.timestamp, row.sequence);
        tables.unarchived.remove(&key);
        Ok(true)
    }

    async fn set_content_id(&self, reference: &Reference, content_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(row) = tables.rows.get_mut(reference) else {
            return Ok(false);
        };
        row.content_id = Some(content_id.to_string());
        tables.content_ids.insert(content_id.to_string(), reference.clone());
        Ok(true)
    }

    async fn find_by_content_id(&self, content_id: &str) -> Result<Option<Reference>, StoreError> {
        Ok(self.tables.read().await.content_ids.get(content_id).cloned())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let mut tables = self.tables.write().await;
        let keys: Vec<(String, i64, u64)> = tables
            .timeline
            .range((
                Bound::Included((conversation_id.to_string(), i64::MIN, 0)),
                Bound::Included((conversation_id.to_string(), i64::MAX, u64::MAX)),
            ))
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(reference) = tables.timeline.remove(&key) else {
                continue;
            };
            tables.unarchived.remove(&(key.1, key.2));
            if let Some(row) = tables.rows.remove(&reference) {
                if let Some(id) = &row.content_id {
                    tables.content_ids.remove(id);
                }
                removed.push(row.to_message(&reference));
            }
        }
        Ok(removed)
    }
}

impl PointerTable for MemoryMessageStore {
    async fn head(&self, conversation_id: &str) -> Result<Option<ConversationPointer>, StoreError> {
        Ok(self.tables.read().await.pointers.get(conversation_id).cloned())
    }

    async fn set_head(&self, pointer: &ConversationPointer) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .pointers
            .insert(pointer.conversation_id.clone(), pointer.clone());
        Ok(())
    }

    async fn clear_head(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.tables.write().await.pointers.remove(conversation_id);
        Ok(())
    }
}

/// An in-memory legacy conversation directory, listed in insertion order.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<Vec<DirectoryEntry>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, entry: DirectoryEntry) {
        self.entries.write().await.push(entry);
    }

    pub async fn get(&self, conversation_id: &str) -> Option<DirectoryEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.conversation_id == conversation_id)
            .cloned()
    }
}

impl ConversationDirectory for MemoryDirectory {
    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<DirectoryEntry>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_threadhash(&self, conversation_id: &str, threadhash: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        for entry in entries.iter_mut().filter(|e| e.conversation_id == conversation_id) {
            entry.threadhash = Some(threadhash.to_string());
        }
        Ok(())
    }
}

/// In-memory migration status records.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<String, MigrationStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStatusStore {
    async fn read_status(&self, name: &str) -> Result<Option<MigrationStatus>, StoreError> {
        Ok(self.records.lock().await.get(name).copied())
    }

    async fn write_status(&self, name: &str, status: MigrationStatus) -> Result<(), StoreError> {
        self.records.lock().await.insert(name.to_string(), status);
        Ok(())
    }

    async fn try_begin(&self, name: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let current = records.get(name).copied().unwrap_or_default();
        if current.started || current.completed {
            return Ok(false);
        }
        records.insert(name.to_string(), MigrationStatus::RUNNING);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::compute_reference;

    fn message(content: &str, timestamp: i64) -> (Reference, Payload) {
        let payload = Payload {
            message_content: content.to_string(),
            timestamp: Some(timestamp),
            ..Payload::default()
        };
        (compute_reference(&payload).unwrap(), payload)
    }

    #[tokio::test]
    async fn sequences_strictly_increase() {
        let store = MemoryMessageStore::new();
        let mut last = 0;
        for i in 0..10 {
            let (reference, payload) = message(&format!("m{i}"), 100);
            let sequence = store.append(&reference, "c1", &payload, 100).await.unwrap();
            assert!(sequence > last);
            last = sequence;
        }
    }

    #[tokio::test]
    async fn duplicate_reference_is_rejected() {
        let store = MemoryMessageStore::new();
        let (reference, payload) = message("a", 1);
        store.append(&reference, "c1", &payload, 1).await.unwrap();

        let err = store.append(&reference, "c1", &payload, 1).await.unwrap_err();

        assert!(matches!(err, StoreError::DuplicateReference(r) if r == reference));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn list_before_orders_by_timestamp_then_sequence() {
        let store = MemoryMessageStore::new();
        let mut refs = Vec::new();
        // Timestamps out of insertion order, with a tie.
        for (content, ts) in [("a", 300), ("b", 100), ("c", 200), ("d", 200)] {
            let (reference, payload) = message(content, ts);
            store.append(&reference, "c1", &payload, ts).await.unwrap();
            refs.push(reference);
        }
        let (other, payload) = message("other", 250);
        store.append(&other, "c2", &payload, 250).await.unwrap();

        let all = store.list_before("c1", u64::MAX, i64::MAX, 10).await.unwrap();
        let order: Vec<_> = all.iter().map(|m| m.payload.message_content.as_str()).collect();
        assert_eq!(order, ["a", "d", "c", "b"]);

        let ctx = store.get_sequence_context(&refs[2]).await.unwrap().unwrap();
        let before = store.list_before("c1", ctx.sequence, ctx.timestamp, 10).await.unwrap();
        let order: Vec<_> = before.iter().map(|m| m.payload.message_content.as_str()).collect();
        assert_eq!(order, ["c", "b"]);
    }

    #[tokio::test]
    async fn archive_flag_is_idempotent() {
        let store = MemoryMessageStore::new();
        let (reference, payload) = message("a", 1);
        store.append(&reference, "c1", &payload, 1).await.unwrap();
        assert_eq!(store.list_unarchived(10).await.unwrap().len(), 1);

        assert!(store.mark_archived(&reference).await.unwrap());
        assert!(!store.mark_archived(&reference).await.unwrap());

        let message = store.get_by_reference(&reference).await.unwrap().unwrap();
        assert!(message.archived);
        assert!(store.list_unarchived(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_conversation_leaves_others() {
        let store = MemoryMessageStore::new();
        let (a, pa) = message("a", 1);
        let (b, pb) = message("b", 2);
        store.append(&a, "c1", &pa, 1).await.unwrap();
        store.append(&b, "c2", &pb, 2).await.unwrap();

        let removed = store.delete_conversation("c1").await.unwrap();

        assert_eq!(removed.len(), 1);
        assert!(store.get_by_reference(&a).await.unwrap().is_none());
        assert!(store.get_by_reference(&b).await.unwrap().is_some());
        assert_eq!(store.list_unarchived(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn content_id_index_is_dropped_with_the_row() {
        let store = MemoryMessageStore::new();
        let (a, pa) = message("a", 1);
        store.append(&a, "c1", &pa, 1).await.unwrap();

        assert!(store.set_content_id(&a, "bafyarchived").await.unwrap());
        assert_eq!(store.find_by_content_id("bafyarchived").await.unwrap(), Some(a.clone()));

        store.delete_conversation("c1").await.unwrap();
        assert_eq!(store.find_by_content_id("bafyarchived").await.unwrap(), None);
    }

    #[tokio::test]
    async fn try_begin_only_once() {
        let status = MemoryStatusStore::new();

        assert!(status.try_begin("m").await.unwrap());
        assert!(!status.try_begin("m").await.unwrap());
        assert_eq!(status.read_status("m").await.unwrap(), Some(MigrationStatus::RUNNING));
    }
}
