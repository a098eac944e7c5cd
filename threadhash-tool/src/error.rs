use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThhError {
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message store error: {0}")]
    Rocks(#[from] threadhash_rocks::RocksError),

    #[error("Content store error: {0}")]
    Fjall(#[from] threadhash_fjall::FjallError),

    #[error("Directory error: {0}")]
    Directory(#[from] threadhash_core::StoreError),

    #[error(transparent)]
    Chatlog(#[from] threadhash_core::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] threadhash_core::CodecError),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Conversation has no head: {0}")]
    NoHead(String),

    #[error("Migration is already running")]
    MigrationRunning,
}
