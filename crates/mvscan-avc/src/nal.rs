//! H.264/AVC NAL (Network Abstraction Layer) unit framing.

use crate::error::{AvcError, Result};
use serde::{Deserialize, Serialize};

/// H.264/AVC NAL unit types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NalUnitType {
    /// Unspecified
    Unspecified = 0,
    /// Coded slice of a non-IDR picture
    NonIdrSlice = 1,
    /// Coded slice data partition A
    SliceDataA = 2,
    /// Coded slice data partition B
    SliceDataB = 3,
    /// Coded slice data partition C
    SliceDataC = 4,
    /// Coded slice of an IDR picture
    IdrSlice = 5,
    /// Supplemental enhancement information (SEI)
    Sei = 6,
    /// Sequence parameter set (SPS)
    Sps = 7,
    /// Picture parameter set (PPS)
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndOfSequence = 10,
    /// End of stream
    EndOfStream = 11,
    /// Filler data
    FillerData = 12,
    /// Other reserved or unspecified types (13-31)
    Other = 13,
}

impl NalUnitType {
    /// Create from raw value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => NalUnitType::Unspecified,
            1 => NalUnitType::NonIdrSlice,
            2 => NalUnitType::SliceDataA,
            3 => NalUnitType::SliceDataB,
            4 => NalUnitType::SliceDataC,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::Aud,
            10 => NalUnitType::EndOfSequence,
            11 => NalUnitType::EndOfStream,
            12 => NalUnitType::FillerData,
            _ => NalUnitType::Other,
        }
    }

    /// Check if this is a coded-picture slice the decoder indexes.
    pub fn is_coded_slice(&self) -> bool {
        matches!(self, NalUnitType::NonIdrSlice | NalUnitType::IdrSlice)
    }

    /// Check if this is a VCL (Video Coding Layer) NAL unit.
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            NalUnitType::NonIdrSlice
                | NalUnitType::SliceDataA
                | NalUnitType::SliceDataB
                | NalUnitType::SliceDataC
                | NalUnitType::IdrSlice
        )
    }
}

/// NAL unit header.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NalUnitHeader {
    /// nal_ref_idc (0-3)
    pub nal_ref_idc: u8,
    /// nal_unit_type
    pub nal_unit_type: NalUnitType,
}

impl NalUnitHeader {
    /// True for IDR slices (NAL type 5).
    pub fn idr_pic_flag(&self) -> bool {
        self.nal_unit_type == NalUnitType::IdrSlice
    }
}

/// Parsed NAL unit with its RBSP payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NalUnit {
    /// NAL unit header.
    pub header: NalUnitHeader,
    /// Payload after the header byte, emulation prevention removed.
    pub payload: Vec<u8>,
}

impl NalUnit {
    /// Get NAL unit type.
    pub fn nal_type(&self) -> NalUnitType {
        self.header.nal_unit_type
    }
}

/// Parse NAL unit header from a single byte.
pub fn parse_nal_header(byte: u8) -> Result<NalUnitHeader> {
    if byte & 0x80 != 0 {
        return Err(AvcError::ForbiddenBitSet);
    }

    Ok(NalUnitHeader {
        nal_ref_idc: (byte >> 5) & 0x03,
        nal_unit_type: NalUnitType::from_u8(byte & 0x1F),
    })
}

/// Parse a complete NAL unit (header byte plus escaped payload).
pub fn parse_nal_unit(data: &[u8]) -> Result<NalUnit> {
    if data.is_empty() {
        return Err(AvcError::UnexpectedEndOfStream {
            needed: 8,
            available: 0,
        });
    }
    let header = parse_nal_header(data[0])?;
    let payload = unescape_rbsp(&data[1..])?;
    Ok(NalUnit { header, payload })
}

/// Find NAL units delimited by Annex-B start codes (`00 00 01` or
/// `00 00 00 01`). Returns `(offset, length)` pairs where the offset
/// points to the first byte after the start code (the NAL header byte).
pub fn find_nal_units(data: &[u8]) -> Vec<(usize, usize)> {
    let mut starts = Vec::new();
    let mut i = 0;

    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                starts.push(i + 3);
                i += 3;
                continue;
            } else if i + 3 < data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                starts.push(i + 4);
                i += 4;
                continue;
            }
        }
        i += 1;
    }

    let mut chunks = Vec::with_capacity(starts.len());
    for (idx, &start) in starts.iter().enumerate() {
        let end = if idx + 1 < starts.len() {
            // Back off over the next unit's start code
            let next_start = starts[idx + 1];
            if next_start >= 4 && data[next_start - 4] == 0 {
                next_start - 4
            } else {
                next_start - 3
            }
        } else {
            data.len()
        };
        if start < end {
            chunks.push((start, end - start));
        }
    }

    chunks
}

/// Remove emulation-prevention bytes (`0x03` after two zero bytes).
///
/// A `00 00 00` run anywhere but trailing padding violates the encoding
/// and fails with `MalformedRbsp`.
pub fn unescape_rbsp(data: &[u8]) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len());
    let mut zero_run = 0usize;

    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        if zero_run >= 2 {
            match byte {
                0x03 => {
                    // Emulation prevention byte, not part of the RBSP
                    zero_run = 0;
                    i += 1;
                    continue;
                }
                0x00 => {
                    // Only legal as trailing alignment padding
                    if data[i..].iter().any(|&b| b != 0) {
                        return Err(AvcError::MalformedRbsp(format!(
                            "0x000000 sequence at offset {}",
                            i - 2
                        )));
                    }
                }
                _ => {}
            }
        }
        zero_run = if byte == 0 { zero_run + 1 } else { 0 };
        result.push(byte);
        i += 1;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nal_header() {
        // SPS: nal_ref_idc=3, nal_unit_type=7
        let header = parse_nal_header(0x67).unwrap();
        assert_eq!(header.nal_ref_idc, 3);
        assert_eq!(header.nal_unit_type, NalUnitType::Sps);

        // PPS: nal_ref_idc=3, nal_unit_type=8
        let header = parse_nal_header(0x68).unwrap();
        assert_eq!(header.nal_unit_type, NalUnitType::Pps);

        // IDR: nal_ref_idc=3, nal_unit_type=5
        let header = parse_nal_header(0x65).unwrap();
        assert_eq!(header.nal_unit_type, NalUnitType::IdrSlice);
        assert!(header.idr_pic_flag());
    }

    #[test]
    fn test_forbidden_bit() {
        assert!(matches!(
            parse_nal_header(0xE7),
            Err(AvcError::ForbiddenBitSet)
        ));
    }

    #[test]
    fn test_find_nal_units() {
        let data = [
            0x00, 0x00, 0x01, 0x67, 0xAA, 0x00, 0x00, 0x00, 0x01, 0x68, 0xBB, 0xCC,
        ];
        let chunks = find_nal_units(&data);
        assert_eq!(chunks, vec![(3, 2), (9, 3)]);
    }

    #[test]
    fn test_unescape_rbsp() {
        let data = [0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x02];
        let result = unescape_rbsp(&data).unwrap();
        assert_eq!(result, vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_unescape_rejects_zero_run() {
        let data = [0x11, 0x00, 0x00, 0x00, 0x22];
        assert!(matches!(
            unescape_rbsp(&data),
            Err(AvcError::MalformedRbsp(_))
        ));
    }

    #[test]
    fn test_unescape_allows_trailing_padding() {
        let data = [0x11, 0x80, 0x00, 0x00, 0x00];
        let result = unescape_rbsp(&data).unwrap();
        assert_eq!(result, data.to_vec());
    }

    #[test]
    fn test_is_coded_slice() {
        assert!(NalUnitType::NonIdrSlice.is_coded_slice());
        assert!(NalUnitType::IdrSlice.is_coded_slice());
        assert!(!NalUnitType::Sps.is_coded_slice());
        assert!(!NalUnitType::Sei.is_coded_slice());
    }
}
