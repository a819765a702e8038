//! Persisted motion-vector grid artefact.
//!
//! Compact per-frame binary layout consumed by downstream analytics:
//!
//! ```text
//! 0-3:   mb_width  (little-endian u32)
//! 4-7:   mb_height (little-endian u32)
//! 8-11:  label     (little-endian u32, caller-defined)
//! 12+:   mb_width * mb_height fixed 20-byte records in raster order:
//!        mvl0.x (i16), mvl0.y (i16), mvl1.x (i16), mvl1.y (i16),
//!        x_pixels (u32), y_pixels (u32), energy (u32)
//! ```

use crate::error::{MvscanError, Result};
use crate::grid::{MotionVector, MvGrid};
use std::io::{Read, Write};

/// Bytes per serialized `MotionVector` record.
const RECORD_SIZE: usize = 20;

/// Dimension cap mirroring the SPS guard; rejects absurd headers before
/// allocation.
const MAX_GRID_DIMENSION: u32 = 16384;

/// Write one frame's grid with a caller-defined label.
pub fn write_frame<W: Write>(mut writer: W, grid: &MvGrid, label: u32) -> Result<()> {
    writer.write_all(&grid.mb_width().to_le_bytes())?;
    writer.write_all(&grid.mb_height().to_le_bytes())?;
    writer.write_all(&label.to_le_bytes())?;

    let mut record = [0u8; RECORD_SIZE];
    for mv in grid.vectors() {
        record[0..2].copy_from_slice(&mv.mvl0.0.to_le_bytes());
        record[2..4].copy_from_slice(&mv.mvl0.1.to_le_bytes());
        record[4..6].copy_from_slice(&mv.mvl1.0.to_le_bytes());
        record[6..8].copy_from_slice(&mv.mvl1.1.to_le_bytes());
        record[8..12].copy_from_slice(&mv.x_pixels.to_le_bytes());
        record[12..16].copy_from_slice(&mv.y_pixels.to_le_bytes());
        record[16..20].copy_from_slice(&mv.energy.to_le_bytes());
        writer.write_all(&record)?;
    }
    Ok(())
}

/// Read one frame's grid back. Returns the grid and its label.
pub fn read_frame<R: Read>(mut reader: R) -> Result<(MvGrid, u32)> {
    let mut header = [0u8; 12];
    reader.read_exact(&mut header)?;
    let mb_width = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let mb_height = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let label = u32::from_le_bytes(header[8..12].try_into().unwrap());

    if mb_width == 0
        || mb_height == 0
        || mb_width > MAX_GRID_DIMENSION
        || mb_height > MAX_GRID_DIMENSION
    {
        return Err(MvscanError::MalformedContainer(format!(
            "mv artefact grid dimensions {}x{} out of range",
            mb_width, mb_height
        )));
    }

    let mut grid = MvGrid::new(mb_width * 16, mb_height * 16, mb_width, mb_height, true);
    let mut record = [0u8; RECORD_SIZE];
    for mb_y in 0..mb_height {
        for mb_x in 0..mb_width {
            reader.read_exact(&mut record)?;
            let mv = MotionVector {
                mvl0: (
                    i16::from_le_bytes(record[0..2].try_into().unwrap()),
                    i16::from_le_bytes(record[2..4].try_into().unwrap()),
                ),
                mvl1: (
                    i16::from_le_bytes(record[4..6].try_into().unwrap()),
                    i16::from_le_bytes(record[6..8].try_into().unwrap()),
                ),
                x_pixels: u32::from_le_bytes(record[8..12].try_into().unwrap()),
                y_pixels: u32::from_le_bytes(record[12..16].try_into().unwrap()),
                energy: u32::from_le_bytes(record[16..20].try_into().unwrap()),
            };
            grid.set(mb_x, mb_y, mv);
        }
    }

    Ok((grid, label))
}
