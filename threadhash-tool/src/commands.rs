use std::io::Read;
use std::path::PathBuf;

use clap::Args;
use serde_json::json;
use threadhash_core::{DirectoryEntry, Payload, RunOutcome};
use tracing::warn;

use crate::error::ThhError;
use crate::store::AppContext;

#[derive(Args)]
pub struct PayloadArgs {
    /// Read the payload as JSON from a file, or `-` for stdin
    #[arg(long, conflicts_with_all = ["from", "to", "content"])]
    pub payload: Option<PathBuf>,

    /// Sender DID
    #[arg(long)]
    pub from: Option<String>,

    /// Recipient DID
    #[arg(long)]
    pub to: Option<String>,

    /// Message text
    #[arg(long)]
    pub content: Option<String>,

    #[arg(long, default_value = "Text")]
    pub message_type: String,

    /// Epoch milliseconds (default: now)
    #[arg(long)]
    pub timestamp: Option<i64>,
}

impl PayloadArgs {
    fn into_payload(self) -> Result<Payload, ThhError> {
        let mut payload = match self.payload {
            Some(path) => {
                let mut bytes = Vec::new();
                if path.as_os_str() == "-" {
                    std::io::stdin().read_to_end(&mut bytes)?;
                } else {
                    bytes = std::fs::read(path)?;
                }
                Payload::from_json(&bytes)?
            }
            None => Payload {
                from_did: self.from.unwrap_or_default(),
                to_did: self.to.unwrap_or_default(),
                message_content: self.content.unwrap_or_default(),
                message_type: self.message_type,
                ..Payload::default()
            },
        };
        if self.timestamp.is_some() {
            payload.timestamp = self.timestamp;
        }
        Ok(payload)
    }
}

pub async fn append(ctx: &AppContext, conversation: &str, args: PayloadArgs) -> Result<(), ThhError> {
    let message = ctx.chatlog.append(conversation, args.into_payload()?).await?;
    let summary = json!({
        "reference": message.reference.to_string(),
        "sequence": message.sequence,
        "timestamp": message.timestamp,
        "link": message.payload.link,
    });
    println!("{summary}");
    Ok(())
}

pub async fn resolve(ctx: &AppContext, handle: &str) -> Result<(), ThhError> {
    println!("{}", ctx.chatlog.resolve(handle).await?);
    Ok(())
}

pub async fn show(ctx: &AppContext, handle: &str) -> Result<(), ThhError> {
    let message = ctx.chatlog.materialize(handle).await?;
    println!("{}", serde_json::to_string_pretty(&message)?);
    Ok(())
}

pub async fn history(ctx: &AppContext, handle: &str, limit: Option<usize>, all: bool) -> Result<(), ThhError> {
    let messages = if all {
        ctx.chatlog.history(handle).await?
    } else {
        let limit = limit.unwrap_or(ctx.chatlog.config().max_page_limit);
        ctx.chatlog.page(handle, limit).await?
    };
    for message in &messages {
        println!("{}", serde_json::to_string(message)?);
    }
    Ok(())
}

pub async fn archive(ctx: &AppContext, limit: Option<usize>) -> Result<(), ThhError> {
    let report = ctx.chatlog.archive_pending(limit).await?;
    println!("uploaded {}, failed {}", report.uploaded, report.failed);
    Ok(())
}

pub async fn expire(ctx: &AppContext, conversation: &str) -> Result<(), ThhError> {
    let removed = ctx.chatlog.expire_conversation(conversation).await?;
    println!("removed {removed} messages from {conversation}");
    Ok(())
}

pub fn register(ctx: &AppContext, conversation: String, threadhash: String, epoch_ms: i64) -> Result<(), ThhError> {
    ctx.store().register(&DirectoryEntry {
        conversation_id: conversation,
        threadhash: Some(threadhash),
        epoch_ms,
    })?;
    Ok(())
}

pub async fn migrate(ctx: &AppContext) -> Result<(), ThhError> {
    let store = ctx.store();
    let report = match ctx.chatlog.migrator(store, store).run().await? {
        RunOutcome::AlreadyRunning => return Err(ThhError::MigrationRunning),
        RunOutcome::AlreadyCompleted => {
            println!("migration already completed");
            return Ok(());
        }
        RunOutcome::Completed(report) => report,
    };

    for gap in &report.gaps {
        warn!(
            conversation_id = %gap.conversation_id,
            identifier = %gap.identifier,
            reason = %gap.reason,
            "gap left in migrated history"
        );
    }
    println!(
        "conversations {}, migrated {}, skipped {}, gaps {}, heads rewritten {}, heads skipped {}",
        report.conversations,
        report.migrated,
        report.skipped,
        report.gaps.len(),
        report.rewritten_heads,
        report.skipped_heads,
    );
    Ok(())
}

pub async fn status(ctx: &AppContext, conversation: Option<&str>) -> Result<(), ThhError> {
    let store = ctx.store();
    let state = ctx.chatlog.migrator(store, store).state().await?;
    println!("migration: {state}");

    if let Some(conversation) = conversation {
        let pointer = ctx
            .chatlog
            .head(conversation)
            .await?
            .ok_or_else(|| ThhError::NoHead(conversation.to_string()))?;
        println!("{}", serde_json::to_string(&pointer)?);
    }
    Ok(())
}
