//! Lock store error types.

use thiserror::Error;

/// Lock store operation errors.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to acquire lock {key} after {attempts} attempts")]
    LockTimeout { key: String, attempts: u32 },

    #[error("invalid stored value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for lock store operations.
pub type KvResult<T> = std::result::Result<T, KvError>;
