//! Error types for mvscan

use thiserror::Error;

/// Main error type for mvscan operations
#[derive(Error, Debug)]
pub enum MvscanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("malformed bitstream: {0}")]
    MalformedBitstream(String),

    #[error("unsupported syntax: {0}")]
    UnsupportedSyntax(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl MvscanError {
    /// Unsupported-but-well-formed inputs are distinguishable from corrupt
    /// ones; callers may skip the affected frame and continue.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            MvscanError::UnsupportedSyntax(_) | MvscanError::NotImplemented(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MvscanError>;
