use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure raised by the storage layer. Never crosses the RPC boundary as-is.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool is closed")]
    PoolClosed,
    #[error("deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),
    #[error("storage task for {op} did not complete: {reason}")]
    Task { op: &'static str, reason: String },
    #[error("stored value out of range: {0}")]
    OutOfRange(String),
}

/// Coarse outcome categories reported to RPC callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    InvalidArgument,
    DeadlineExceeded,
    Unavailable,
    Internal,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::Unavailable => "UNAVAILABLE",
            Code::Internal => "INTERNAL",
        };
        f.write_str(name)
    }
}

/// Error status returned from an RPC operation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Internal failures carry a fixed message; details belong in the log.
    pub fn internal() -> Self {
        Self::new(Code::Internal, "internal error")
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(Code::DeadlineExceeded, "deadline exceeded")
    }

    pub fn unavailable() -> Self {
        Self::new(Code::Unavailable, "service unavailable")
    }
}

impl From<&StorageError> for Status {
    fn from(error: &StorageError) -> Self {
        match error {
            StorageError::DeadlineExceeded(_) => Status::deadline_exceeded(),
            StorageError::PoolClosed => Status::unavailable(),
            StorageError::Sqlite(_) | StorageError::Task { .. } | StorageError::OutOfRange(_) => {
                Status::internal()
            }
        }
    }
}
