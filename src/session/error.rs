//! Session-store failure modes.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session decode error: {0}")]
    Decode(String),

    /// Compaction could not find a non-zero cut point.
    #[error("cannot compact: {0}")]
    CannotCompact(String),

    #[error("session entry not found: {0}")]
    NotFound(String),
}
