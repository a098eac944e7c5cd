//! Threadhash is the message referencing, storage, and migration engine behind
//! a decentralized chat history.
//!
//! Core concepts:
//! - **Payload**: the structured body of a chat message (sender, recipient, content, proofs)
//! - **Reference**: a content-derived identifier, `v2:` + a CID over the canonical payload bytes
//! - **Handle**: what clients present: a direct reference, a `previous:` reference,
//!   or a bare legacy identifier from before references existed
//! - **MessageStore**: the append-only, reference-keyed message table
//! - **ContentStore**: the content-addressable mirror (`put/get/pin/unpin`)
//! - **Migrator**: replays legacy linked chains into the message store, once
//!
//! # Example
//!
//! ```
//! use threadhash_core::{compute_reference, Payload};
//!
//! let payload = Payload {
//!     from_did: "eip155:0xabc".to_string(),
//!     message_content: "gm".to_string(),
//!     timestamp: Some(1_700_000_000_000),
//!     ..Payload::default()
//! };
//!
//! let reference = compute_reference(&payload).unwrap();
//! assert!(reference.to_string().starts_with("v2:"));
//! ```
//!
//! # Ordering
//!
//! History is read in `(timestamp desc, sequence desc)` order. Timestamps are
//! author-supplied and may collide or skew; the store-assigned sequence breaks
//! ties and never regresses.

mod backlog;
mod cache;
pub mod canonical;
mod chatlog;
mod content;
mod error;
mod handle;
mod history;
mod legacy;
mod memory;
mod migration;
mod payload;
mod reference;
mod resolver;
mod store;

pub use backlog::{ArchiveReport, Archiver, Backlog};
pub use cache::{CacheError, FileCache, LegacyCache};
pub use chatlog::{Chatlog, ChatlogConfig};
pub use cid::Cid;
pub use content::{ContentStore, MemoryContentStore};
pub use error::Error;
pub use handle::Handle;
pub use history::Paginator;
pub use legacy::{LegacyNode, LegacySource};
pub use memory::{MemoryDirectory, MemoryMessageStore, MemoryStatusStore};
pub use migration::{
    ConversationDirectory, DirectoryEntry, Gap, MigrationConfig, MigrationReport,
    MigrationState, MigrationStatus, Migrator, RunOutcome, StatusStore, MIGRATION_STATUS,
};
pub use payload::{CodecError, Payload};
pub use reference::{compute_cid, compute_reference, content_id, Reference, DAG_CBOR_CODEC};
pub use resolver::Resolver;
pub use store::{ConversationPointer, Message, MessageStore, PointerTable, SequenceContext, StoreError};
