use std::path::Path;

use threadhash_core::{Chatlog, ChatlogConfig, FileCache};
use threadhash_fjall::FjallContentStore;
use threadhash_rocks::RocksMessageStore;
use tracing::debug;

use crate::error::ThhError;

pub type Log = Chatlog<RocksMessageStore, FjallContentStore, FileCache>;

pub struct AppContext {
    pub chatlog: Log,
}

impl AppContext {
    /// Opens the message store, content store and cache under `data_dir`.
    pub fn open(data_dir: &Path, config: ChatlogConfig) -> Result<Self, ThhError> {
        std::fs::create_dir_all(data_dir)?;
        debug!(data_dir = %data_dir.display(), "opening stores");
        let store = RocksMessageStore::open(data_dir.join("store"))?;
        let content = FjallContentStore::open(data_dir.join("content"))?;
        let cache = FileCache::new(data_dir.join("cache"));
        Ok(Self {
            chatlog: Chatlog::new(store, content, cache, config),
        })
    }

    /// The message store, which also holds the conversation directory and
    /// migration status records.
    pub fn store(&self) -> &RocksMessageStore {
        self.chatlog.store()
    }
}
