//! Per-macroblock motion-vector extraction from H.264/AVC video.
//!
//! mvscan indexes the coded pictures of an MP4 or raw Annex-B file,
//! parses the slice syntax of each P picture, and derives one motion
//! vector per 16x16 macroblock without reconstructing pixels. The grids
//! feed motion segmentation, camera-motion categorisation, scene-cut
//! detection, and temporal tracking.
//!
//! # Example
//!
//! ```no_run
//! use mvscan::Decoder;
//!
//! # fn main() -> mvscan::Result<()> {
//! let decoder = Decoder::open("clip.mp4")?;
//! for frame in 0..decoder.sample_count() {
//!     let (grid, is_p_slice) = decoder.load_frame(frame)?;
//!     if is_p_slice {
//!         let mv = grid.get(0, 0).unwrap();
//!         println!("frame {}: top-left motion {:?}", frame, mv.mvl0);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod decoder;

pub use decoder::Decoder;
pub use mvscan_core::{artifact, MotionVector, MvGrid, MvscanError, Result};
