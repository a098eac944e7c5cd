use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::payload::Payload;
use crate::reference::Reference;

/// Error returned by message table backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate reference: {0}")]
    DuplicateReference(Reference),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StoreError::Backend(e.into())
    }
}

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub reference: Reference,
    pub conversation_id: String,
    /// Store-assigned, strictly increasing in insertion order.
    pub sequence: u64,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub payload: Payload,
    /// Whether a durable copy exists in the content store.
    pub archived: bool,
    /// Content-store identifier of the archived copy, once recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

/// Ordering metadata of a message, without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceContext {
    pub sequence: u64,
    pub timestamp: i64,
    pub conversation_id: String,
}

impl From<&Message> for SequenceContext {
    fn from(m: &Message) -> Self {
        SequenceContext {
            sequence: m.sequence,
            timestamp: m.timestamp,
            conversation_id: m.conversation_id.clone(),
        }
    }
}

/// Current head of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationPointer {
    pub conversation_id: String,
    pub head_reference: Option<Reference>,
    pub head_timestamp: i64,
}

/// Append-only message table keyed by reference.
///
/// Implementations must assign `sequence` atomically with insertion: no two
/// appends observe the same next value, and a later append never receives a
/// smaller one. Reads are consistent per call.
///
/// Range reads order by `(timestamp, sequence)` lexicographically.
pub trait MessageStore: Send + Sync {
    /// Inserts a message and returns its sequence.
    ///
    /// Fails with `DuplicateReference` if the reference is already present.
    fn append(
        &self,
        reference: &Reference,
        conversation_id: &str,
        payload: &Payload,
        timestamp: i64,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn get_by_reference(
        &self,
        reference: &Reference,
    ) -> impl Future<Output = Result<Option<Message>, StoreError>> + Send;

    fn get_sequence_context(
        &self,
        reference: &Reference,
    ) -> impl Future<Output = Result<Option<SequenceContext>, StoreError>> + Send;

    /// Messages of a conversation at or before the `(timestamp, sequence)`
    /// cursor, newest first, at most `limit`.
    fn list_before(
        &self,
        conversation_id: &str,
        sequence: u64,
        timestamp: i64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Messages without a content-store copy, oldest first.
    fn list_unarchived(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Flags a message as archived. Returns whether the flag changed; already
    /// archived and unknown references are no-ops.
    fn mark_archived(
        &self,
        reference: &Reference,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Records the content-store identifier of a message's archived copy and
    /// indexes it for `find_by_content_id`. Returns `false` for unknown
    /// references.
    fn set_content_id(
        &self,
        reference: &Reference,
        content_id: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// The message whose archived copy was recorded under `content_id`.
    fn find_by_content_id(
        &self,
        content_id: &str,
    ) -> impl Future<Output = Result<Option<Reference>, StoreError>> + Send;

    /// Deletes every message of a conversation and returns them.
    fn delete_conversation(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;
}

/// Per-conversation head pointers.
pub trait PointerTable: Send + Sync {
    fn head(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Option<ConversationPointer>, StoreError>> + Send;

    fn set_head(
        &self,
        pointer: &ConversationPointer,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn clear_head(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
