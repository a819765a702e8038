//! H.264/AVC slice parsing and motion-vector derivation for mvscan.
//!
//! This crate parses just enough of an AVC bitstream to recover the
//! per-macroblock List 0 motion field of P pictures: NAL framing,
//! parameter sets, slice headers, the CAVLC macroblock layer, and the
//! clause 8.4.1 motion-vector prediction. Samples are never
//! reconstructed.
//!
//! # Example
//!
//! ```ignore
//! use mvscan_avc::{nal, slice, macroblock, mv};
//!
//! let unit = nal::parse_nal_unit(chunk)?;
//! let mut reader = mvscan_avc::BitReader::new(&unit.payload);
//! let (header, sps, pps) =
//!     slice::parse_slice_header(&mut reader, &sps_map, &pps_map, &unit.header)?;
//! let mut ctx = macroblock::SliceContext::new(sps, pps, header);
//! macroblock::parse_slice_data(&mut ctx, &mut reader)?;
//! mv::derive_motion_vectors(&mut ctx)?;
//! let grid = mv::build_grid(&ctx);
//! ```

pub mod bitreader;
mod cavlc;
pub mod error;
pub mod macroblock;
pub mod mv;
pub mod nal;
pub mod pps;
pub mod slice;
pub mod sps;

pub use bitreader::BitReader;
pub use error::{AvcError, Result};
pub use macroblock::{parse_slice_data, Macroblock, SliceContext};
pub use mv::{build_grid, derive_motion_vectors};
pub use nal::{find_nal_units, parse_nal_header, parse_nal_unit, NalUnit, NalUnitHeader, NalUnitType};
pub use pps::{parse_pps, Pps};
pub use slice::{parse_slice_header, SliceHeader, SliceType};
pub use sps::{parse_sps, ChromaFormat, ProfileIdc, Sps};
