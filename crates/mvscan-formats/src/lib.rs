//! Container format parsing for mvscan.
//!
//! Currently ISO-BMFF (MP4) only: box-tree walking, AVC sample entry and
//! avcC configuration extraction, and per-sample byte indexing. Raw
//! Annex-B input needs no container layer and is framed directly by the
//! codec crate.

pub mod mp4;

pub use mp4::{looks_like_mp4, parse_mp4, Mp4Box, Mp4Index};
