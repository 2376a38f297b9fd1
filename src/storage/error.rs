//! Error types for storage backends

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The remote store could not be reached or the connection dropped
    #[error("Storage connection failed: {0}")]
    ConnectionFailed(String),

    /// A command was rejected by a connected backend
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shared segment is full ({capacity} slots)")]
    SegmentFull { capacity: usize },

    #[error("Entry of {len} bytes does not fit a {max}-byte slot")]
    EntryTooLarge { len: usize, max: usize },

    /// A histogram was written with boundaries that differ from the stored ones
    #[error("Histogram '{metric}' was already written with different buckets")]
    BucketMismatch { metric: String },

    #[error("Corrupt storage key: {0}")]
    CorruptKey(String),
}

impl From<::redis::RedisError> for StorageError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_io_error()
            || err.is_timeout()
        {
            StorageError::ConnectionFailed(err.to_string())
        } else {
            StorageError::Backend(err.to_string())
        }
    }
}
