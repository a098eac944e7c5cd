mod commands;
mod config;
mod error;
mod store;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::commands::PayloadArgs;
use crate::config::{load_config, resolve_data_dir};
use crate::store::AppContext;

#[derive(Parser)]
#[command(name = "thh")]
#[command(about = "Threadhash chat history tools", long_about = None)]
struct Cli {
    /// Path to the config file (default: ~/.config/threadhash/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the message store, content store and cache
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Timeout for content store and cache calls, in milliseconds
    #[arg(long, global = true)]
    fetch_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append a message to a conversation
    Append {
        conversation: String,

        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// Resolve a handle to a reference
    Resolve { handle: String },

    /// Print the message a handle names
    Show { handle: String },

    /// Print history backward from a handle, one message per line
    History {
        handle: String,

        /// Maximum number of messages (clamped to the page limit)
        #[arg(short, long, conflicts_with = "all")]
        limit: Option<usize>,

        /// Walk the whole history
        #[arg(long)]
        all: bool,
    },

    /// Mirror unarchived messages into the content store
    Archive {
        /// Messages per pass (default: archive_batch)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Delete a conversation and its archived copies
    Expire { conversation: String },

    /// Add a conversation to the legacy directory
    Register {
        conversation: String,

        /// Legacy head identifier
        threadhash: String,

        /// Conversation creation time in epoch milliseconds
        #[arg(long, default_value_t = 0)]
        epoch_ms: i64,
    },

    /// Replay legacy chains into the message store
    Migrate,

    /// Show migration status, and a conversation's head if given
    Status {
        #[arg(long)]
        conversation: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = load_config(cli.config.as_deref())?;
    let data_dir = resolve_data_dir(cli.data_dir, &config);
    let ctx = AppContext::open(&data_dir, config.chatlog_config(cli.fetch_timeout_ms))?;

    match cli.command {
        Command::Append {
            conversation,
            payload,
        } => commands::append(&ctx, &conversation, payload).await?,
        Command::Resolve { handle } => commands::resolve(&ctx, &handle).await?,
        Command::Show { handle } => commands::show(&ctx, &handle).await?,
        Command::History { handle, limit, all } => commands::history(&ctx, &handle, limit, all).await?,
        Command::Archive { limit } => commands::archive(&ctx, limit).await?,
        Command::Expire { conversation } => commands::expire(&ctx, &conversation).await?,
        Command::Register {
            conversation,
            threadhash,
            epoch_ms,
        } => commands::register(&ctx, conversation, threadhash, epoch_ms)?,
        Command::Migrate => commands::migrate(&ctx).await?,
        Command::Status { conversation } => commands::status(&ctx, conversation.as_deref()).await?,
    }

    Ok(())
}
