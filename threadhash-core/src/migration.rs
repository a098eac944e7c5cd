//! One-time replay of legacy chains into the message table.
//!
//! Pass 1 walks every conversation listed in the directory from its legacy
//! head back to the root, then appends the nodes oldest first so that
//! sequence order matches chain order. Pass 2 rewrites each directory entry's
//! legacy head identifier to the migrated reference. The run is guarded by a
//! persisted status record so that it happens once per deployment.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cache::LegacyCache;
use crate::content::ContentStore;
use crate::error::Error;
use crate::handle::Handle;
use crate::legacy::LegacySource;
use crate::payload::Payload;
use crate::reference::{Reference, REFERENCE_PREFIX};
use crate::store::{ConversationPointer, MessageStore, PointerTable, StoreError};

/// Name of the status record guarding the message migration.
pub const MIGRATION_STATUS: &str = "migrationStatus";

/// Persisted migration status record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub started: bool,
    pub completed: bool,
}

impl MigrationStatus {
    pub const RUNNING: MigrationStatus = MigrationStatus {
        started: true,
        completed: false,
    };

    pub const COMPLETED: MigrationStatus = MigrationStatus {
        started: false,
        completed: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    NotStarted,
    Running,
    Completed,
}

impl From<MigrationStatus> for MigrationState {
    fn from(status: MigrationStatus) -> Self {
        if status.completed {
            MigrationState::Completed
        } else if status.started {
            MigrationState::Running
        } else {
            MigrationState::NotStarted
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationState::NotStarted => write!(f, "not started"),
            MigrationState::Running => write!(f, "running"),
            MigrationState::Completed => write!(f, "completed"),
        }
    }
}

/// Named migration status records.
pub trait StatusStore: Send + Sync {
    fn read_status(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<MigrationStatus>, StoreError>> + Send;

    fn write_status(
        &self,
        name: &str,
        status: MigrationStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically moves `name` from not started to running. Returns false if
    /// the record was already running or completed.
    fn try_begin(&self, name: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// A conversation as listed in the legacy directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub conversation_id: String,
    /// Legacy head identifier, or a `v2:` reference once migrated.
    pub threadhash: Option<String>,
    /// Conversation creation time, used as the first fallback timestamp.
    pub epoch_ms: i64,
}

/// The legacy side table of conversations and their head identifiers.
pub trait ConversationDirectory: Send + Sync {
    /// Entries in a stable order, paginated.
    fn list(
        &self,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<DirectoryEntry>, StoreError>> + Send;

    fn update_threadhash(
        &self,
        conversation_id: &str,
        threadhash: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Directory entries read per page.
    pub page_size: usize,
    /// Spacing of synthetic timestamps for nodes without one.
    pub fallback_step_ms: i64,
    /// Longest chain walked before it is treated as corrupt.
    pub max_chain_depth: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            page_size: 5000,
            fallback_step_ms: 1000,
            max_chain_depth: 100_000,
        }
    }
}

/// A legacy node that could not be materialized. The walk of its
/// conversation stopped there; everything newer was still migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    pub conversation_id: String,
    pub identifier: String,
    pub reason: String,
}

impl From<Gap> for Error {
    fn from(gap: Gap) -> Self {
        Error::MigrationGap {
            conversation_id: gap.conversation_id,
            identifier: gap.identifier,
            reason: gap.reason,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Conversations whose chain was walked.
    pub conversations: usize,
    /// Nodes appended to the message table.
    pub migrated: usize,
    /// Nodes whose append was rejected.
    pub skipped: usize,
    pub gaps: Vec<Gap>,
    /// Directory entries rewritten to a reference.
    pub rewritten_heads: usize,
    /// Directory entries whose legacy head could not be materialized.
    pub skipped_heads: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    AlreadyRunning,
    AlreadyCompleted,
    Completed(MigrationReport),
}

/// A node collected during the walk, ready to append.
struct Replay {
    identifier: String,
    reference: Reference,
    payload: Payload,
    timestamp: i64,
}

pub struct Migrator<'a, M, D, S, C, K> {
    store: &'a M,
    directory: &'a D,
    status: &'a S,
    legacy: &'a LegacySource<C, K>,
    config: MigrationConfig,
}

impl<'a, M, D, S, C, K> Migrator<'a, M, D, S, C, K>
where
    M: MessageStore + PointerTable,
    D: ConversationDirectory,
    S: StatusStore,
    C: ContentStore,
    K: LegacyCache,
{
    pub fn new(
        store: &'a M,
        directory: &'a D,
        status: &'a S,
        legacy: &'a LegacySource<C, K>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            store,
            directory,
            status,
            legacy,
            config,
        }
    }

    pub async fn state(&self) -> Result<MigrationState, Error> {
        let status = self.status.read_status(MIGRATION_STATUS).await?.unwrap_or_default();
        Ok(status.into())
    }

    /// Runs both passes unless a run is in progress or already finished.
    ///
    /// Returns an error only on backend failure; the status record is then
    /// left as running and needs operator attention.
    pub async fn run(&self) -> Result<RunOutcome, Error> {
        if !self.status.try_begin(MIGRATION_STATUS).await? {
            let state = self.state().await?;
            info!(%state, "migration not started");
            return Ok(match state {
                MigrationState::Completed => RunOutcome::AlreadyCompleted,
                _ => RunOutcome::AlreadyRunning,
            });
        }
        info!("migration started");

        let mut report = MigrationReport::default();
        if let Err(e) = self.migrate_messages(&mut report).await {
            error!(error = %e, "migration aborted");
            return Err(e);
        }
        if let Err(e) = self.rewrite_directory(&mut report).await {
            error!(error = %e, "migration aborted");
            return Err(e);
        }

        self.status
            .write_status(MIGRATION_STATUS, MigrationStatus::COMPLETED)
            .await?;
        info!(
            conversations = report.conversations,
            migrated = report.migrated,
            skipped = report.skipped,
            gaps = report.gaps.len(),
            rewritten_heads = report.rewritten_heads,
            skipped_heads = report.skipped_heads,
            "migration completed"
        );
        Ok(RunOutcome::Completed(report))
    }

    async fn migrate_messages(&self, report: &mut MigrationReport) -> Result<(), Error> {
        let mut offset = 0;
        loop {
            info!(offset, "fetching directory page");
            let entries = self.directory.list(offset, self.config.page_size).await?;
            for entry in &entries {
                let Some(head) = entry.threadhash.as_deref() else {
                    continue;
                };
                if head.starts_with(REFERENCE_PREFIX) {
                    debug!(conversation_id = %entry.conversation_id, "already migrated");
                    continue;
                }
                report.conversations += 1;
                self.migrate_conversation(entry, head, report).await?;
            }
            if entries.len() < self.config.page_size || self.config.page_size == 0 {
                return Ok(());
            }
            offset += entries.len();
        }
    }

    async fn migrate_conversation(
        &self,
        entry: &DirectoryEntry,
        head: &str,
        report: &mut MigrationReport,
    ) -> Result<(), Error> {
        let conversation_id = entry.conversation_id.as_str();
        let (chain, gap) = self.walk_chain(conversation_id, head, entry.epoch_ms).await;
        if let Some(gap) = gap {
            let err = Error::from(gap.clone());
            warn!(error = %err, "stopping chain walk");
            report.gaps.push(gap);
        }

        for node in chain.iter().rev() {
            match self
                .store
                .append(&node.reference, conversation_id, &node.payload, node.timestamp)
                .await
            {
                Ok(sequence) => {
                    debug!(conversation_id, reference = %node.reference, sequence, "migrated node");
                    report.migrated += 1;
                }
                Err(e @ StoreError::Backend(_)) => return Err(e.into()),
                Err(e) => {
                    warn!(
                        conversation_id,
                        identifier = %node.identifier,
                        reference = %node.reference,
                        error = %e,
                        "skipping node"
                    );
                    report.skipped += 1;
                }
            }
        }

        if let Some(newest) = chain.first() {
            self.store
                .set_head(&ConversationPointer {
                    conversation_id: conversation_id.to_string(),
                    head_reference: Some(newest.reference.clone()),
                    head_timestamp: newest.timestamp,
                })
                .await?;
        }
        Ok(())
    }

    /// Collects the chain newest first, stopping at the root or at the first
    /// node that cannot be materialized.
    async fn walk_chain(&self, conversation_id: &str, head: &str, epoch_ms: i64) -> (Vec<Replay>, Option<Gap>) {
        let gap = |identifier: &str, reason: String| Gap {
            conversation_id: conversation_id.to_string(),
            identifier: identifier.to_string(),
            reason,
        };

        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut fallback = Some(epoch_ms);
        let mut next = Some(head.to_string());

        while let Some(identifier) = next.take() {
            if !visited.insert(identifier.clone()) {
                return (chain, Some(gap(&identifier, "cycle in chain".to_string())));
            }
            if chain.len() >= self.config.max_chain_depth {
                let reason = format!("chain longer than {} nodes", self.config.max_chain_depth);
                return (chain, Some(gap(&identifier, reason)));
            }

            let node = match self.legacy.fetch(&identifier).await {
                Ok(Some(node)) => node,
                Ok(None) => return (chain, Some(gap(&identifier, "node not found".to_string()))),
                Err(e) => return (chain, Some(gap(&identifier, e.to_string()))),
            };
            let reference = match node.reference() {
                Ok(reference) => reference,
                Err(e) => return (chain, Some(gap(&identifier, e.to_string()))),
            };

            let mut payload = node.payload;
            next = payload.link.take();
            if next.is_some() {
                payload.link = Some(Handle::previous(&reference).to_string());
            }
            let timestamp = match (payload.timestamp, fallback) {
                (Some(ts), _) => ts,
                (None, Some(fallback)) => {
                    debug!(conversation_id, %identifier, fallback, "using fallback timestamp");
                    payload.timestamp = Some(fallback);
                    fallback
                }
                (None, None) => {
                    let reason = "no fallback timestamp below the newer node".to_string();
                    return (chain, Some(gap(&identifier, reason)));
                }
            };
            fallback = timestamp.checked_sub(self.config.fallback_step_ms);

            chain.push(Replay {
                identifier,
                reference,
                payload,
                timestamp,
            });
        }
        (chain, None)
    }

    async fn rewrite_directory(&self, report: &mut MigrationReport) -> Result<(), Error> {
        let mut offset = 0;
        loop {
            let entries = self.directory.list(offset, self.config.page_size).await?;
            for entry in &entries {
                let Some(head) = entry.threadhash.as_deref() else {
                    continue;
                };
                if head.starts_with(REFERENCE_PREFIX) {
                    continue;
                }
                let conversation_id = entry.conversation_id.as_str();
                let node = match self.legacy.fetch(head).await {
                    Ok(Some(node)) => node,
                    Ok(None) => {
                        warn!(conversation_id, identifier = head, "legacy head not found");
                        report.skipped_heads += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(conversation_id, identifier = head, error = %e, "legacy head unavailable");
                        report.skipped_heads += 1;
                        continue;
                    }
                };
                let reference = node.reference()?;
                self.directory
                    .update_threadhash(conversation_id, &reference.to_string())
                    .await?;
                debug!(conversation_id, identifier = head, %reference, "rewrote directory head");
                report.rewritten_heads += 1;
            }
            if entries.len() < self.config.page_size || self.config.page_size == 0 {
                return Ok(());
            }
            offset += entries.len();
        }
    }
}
