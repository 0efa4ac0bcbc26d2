pub mod alert;
pub mod audit;
pub mod chat;
pub mod clock;
pub mod config;
pub mod escalation;
pub mod metrics;
pub mod processor;
pub mod reconciler;
pub mod rules;
pub mod server;
pub mod sources;
pub mod store;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("chat error: {0}")]
    Chat(String),
    #[error("chat target gone: {0}")]
    ChatGone(String),
    #[error("queue error: {0}")]
    Queue(String),
    #[error("persistence error: {0}")]
    Persist(String),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("database migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the chat API reported the target channel or message as
    /// permanently gone, as opposed to a transient failure.
    pub fn is_gone(&self) -> bool {
        matches!(self, Error::ChatGone(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
