//! Error taxonomy for ProtoBase, grouped the way spec §7 describes it:
//! Validation, Corruption, Locking, NotSupported and Unexpected failures.

use std::io;

/// Crate-wide result alias, mirroring `rdms::core::Result`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("locking conflict on mutable slot {slot}: {reason}")]
    Locking { slot: u128, reason: String },

    #[error("root lock timed out after {0:?}")]
    LockTimeout(std::time::Duration),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("unexpected: {0}")]
    Unexpected(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn validation<S: Into<String>>(msg: S) -> Error {
        Error::Validation(msg.into())
    }

    pub fn corruption<S: Into<String>>(msg: S) -> Error {
        Error::Corruption(msg.into())
    }

    pub fn locking(slot: u128, reason: impl Into<String>) -> Error {
        Error::Locking {
            slot,
            reason: reason.into(),
        }
    }

    pub fn not_supported<S: Into<String>>(msg: S) -> Error {
        Error::NotSupported(msg.into())
    }

    pub fn unexpected<S: Into<String>>(msg: S) -> Error {
        Error::Unexpected(msg.into())
    }

    /// True for the one error variant callers are expected to retry on,
    /// per spec §7 ("callers implement retry loops").
    pub fn is_locking_conflict(&self) -> bool {
        matches!(self, Error::Locking { .. })
    }
}
