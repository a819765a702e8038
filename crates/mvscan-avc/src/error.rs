//! Error types for H.264/AVC parsing.

use mvscan_core::MvscanError;
use thiserror::Error;

/// AVC parsing error types.
#[derive(Debug, Error)]
pub enum AvcError {
    /// A read would extend past the end of the span.
    #[error("unexpected end of stream: needed {needed} bits, {available} available")]
    UnexpectedEndOfStream { needed: usize, available: usize },

    /// Exp-Golomb prefix exceeded 63 leading zeros.
    #[error("Exp-Golomb integer overflow")]
    IntegerOverflow,

    /// forbidden_zero_bit of a NAL header is set.
    #[error("forbidden_zero_bit is set")]
    ForbiddenBitSet,

    /// Emulation-prevention violation in the escaped payload.
    #[error("malformed RBSP: {0}")]
    MalformedRbsp(String),

    /// Invalid SPS.
    #[error("invalid SPS: {0}")]
    InvalidSps(String),

    /// Invalid PPS.
    #[error("invalid PPS: {0}")]
    InvalidPps(String),

    /// Invalid slice header.
    #[error("invalid slice header: {0}")]
    InvalidSliceHeader(String),

    /// Invalid slice data (macroblock layout, CBP, CAVLC codes).
    #[error("invalid slice data: {0}")]
    InvalidSliceData(String),

    /// Missing required parameter set.
    #[error("missing parameter set: {0}")]
    MissingParameterSet(String),

    /// Well-formed but outside the supported subset.
    #[error("unsupported syntax: {0}")]
    Unsupported(String),

    /// Well-formed but not implemented.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// Result type alias for AVC operations.
pub type Result<T> = std::result::Result<T, AvcError>;

impl From<AvcError> for MvscanError {
    fn from(err: AvcError) -> Self {
        match err {
            AvcError::Unsupported(msg) => MvscanError::UnsupportedSyntax(msg),
            AvcError::NotImplemented(msg) => MvscanError::NotImplemented(msg),
            other => MvscanError::MalformedBitstream(other.to_string()),
        }
    }
}
