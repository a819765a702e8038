//! Core types for mvscan.
//!
//! Shared between the container and codec crates: the error taxonomy, the
//! per-macroblock motion-vector grid, and the persisted grid artefact.

pub mod artifact;
pub mod error;
pub mod grid;

pub use error::{MvscanError, Result};
pub use grid::{MotionVector, MvGrid};
