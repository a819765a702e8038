//! Decoder facade: container dispatch, parameter-set bootstrap, and
//! per-frame motion-field extraction.

use memmap2::Mmap;
use mvscan_avc::nal::{self, NalUnitType};
use mvscan_avc::{
    build_grid, derive_motion_vectors, parse_pps, parse_slice_data, parse_slice_header,
    parse_sps, BitReader, Pps, SliceContext, Sps,
};
use mvscan_core::{MvGrid, MvscanError, Result};
use mvscan_formats::{looks_like_mp4, parse_mp4, Mp4Index};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Input framing of the opened file.
#[derive(Debug)]
enum Input {
    /// Raw Annex-B byte stream: all NAL chunks plus the subset that are
    /// coded pictures.
    AnnexB {
        chunks: Vec<(usize, usize)>,
        coded_slices: Vec<usize>,
    },
    /// ISO-BMFF with length-prefixed NAL samples.
    Mp4(Mp4Index),
}

/// Motion-vector decoder over one media file.
///
/// The file is memory-mapped for the lifetime of the decoder; parameter
/// sets are parsed once at open. Each `load_frame` call is independent,
/// so frames may be decoded in any order, and separate decoders over the
/// same file can run on separate threads.
#[derive(Debug)]
pub struct Decoder {
    data: Mmap,
    input: Input,
    sps_map: HashMap<u8, Sps>,
    pps_map: HashMap<u8, Pps>,
    /// First SPS seen; sizes non-picture output deterministically.
    default_sps_id: u8,
}

impl Decoder {
    /// Open a media file (`.mp4`, `.264`/`.h264`, or sniffed by magic),
    /// index its coded pictures, and load the parameter sets.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Decoder> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // Safety: the map is read-only and private to this decoder
        let data = unsafe { Mmap::map(&file)? };

        let is_mp4 = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("mp4") => true,
            Some("264") | Some("h264") => false,
            _ => {
                if looks_like_mp4(&data) {
                    true
                } else if starts_with_start_code(&data) {
                    false
                } else {
                    return Err(MvscanError::MalformedContainer(
                        "unrecognized container format".to_string(),
                    ));
                }
            }
        };

        if is_mp4 {
            Self::open_mp4(data)
        } else {
            Self::open_annex_b(data)
        }
    }

    fn open_mp4(data: Mmap) -> Result<Decoder> {
        let index = parse_mp4(&data)?;

        let mut sps_map = HashMap::new();
        let mut pps_map = HashMap::new();
        let mut default_sps_id = None;

        for raw in &index.sps_nals {
            let unit = nal::parse_nal_unit(raw)?;
            let sps = parse_sps(&unit.payload)?;
            default_sps_id.get_or_insert(sps.seq_parameter_set_id);
            sps_map.insert(sps.seq_parameter_set_id, sps);
        }
        for raw in &index.pps_nals {
            let unit = nal::parse_nal_unit(raw)?;
            let pps = parse_pps(&unit.payload)?;
            pps_map.insert(pps.pic_parameter_set_id, pps);
        }

        let default_sps_id = default_sps_id.ok_or_else(|| {
            MvscanError::MalformedContainer("no SPS in avcC record".to_string())
        })?;

        Ok(Decoder {
            data,
            input: Input::Mp4(index),
            sps_map,
            pps_map,
            default_sps_id,
        })
    }

    fn open_annex_b(data: Mmap) -> Result<Decoder> {
        let chunks = nal::find_nal_units(&data);
        if chunks.is_empty() {
            return Err(MvscanError::MalformedContainer(
                "no NAL units found".to_string(),
            ));
        }

        let mut sps_map = HashMap::new();
        let mut pps_map = HashMap::new();
        let mut default_sps_id = None;
        let mut coded_slices = Vec::new();

        for (idx, &(offset, length)) in chunks.iter().enumerate() {
            let header = nal::parse_nal_header(byte_at(&data, offset)?)?;
            match header.nal_unit_type {
                NalUnitType::Sps => {
                    let unit = nal::parse_nal_unit(&data[offset..offset + length])?;
                    let sps = parse_sps(&unit.payload)?;
                    default_sps_id.get_or_insert(sps.seq_parameter_set_id);
                    sps_map.insert(sps.seq_parameter_set_id, sps);
                }
                NalUnitType::Pps => {
                    let unit = nal::parse_nal_unit(&data[offset..offset + length])?;
                    let pps = parse_pps(&unit.payload)?;
                    pps_map.insert(pps.pic_parameter_set_id, pps);
                }
                t if t.is_coded_slice() => coded_slices.push(idx),
                _ => {}
            }
        }

        let default_sps_id = default_sps_id.ok_or_else(|| {
            MvscanError::MalformedContainer("SPS not found in stream".to_string())
        })?;
        if pps_map.is_empty() {
            return Err(MvscanError::MalformedContainer(
                "PPS not found in stream".to_string(),
            ));
        }

        Ok(Decoder {
            data,
            input: Input::AnnexB {
                chunks,
                coded_slices,
            },
            sps_map,
            pps_map,
            default_sps_id,
        })
    }

    /// Number of coded pictures indexed.
    pub fn sample_count(&self) -> u64 {
        match &self.input {
            Input::AnnexB { coded_slices, .. } => coded_slices.len() as u64,
            Input::Mp4(index) => index.sample_count(),
        }
    }

    /// Byte offset of each coded picture in the input, in decode order.
    /// Callers that fan out across threads partition these indices.
    pub fn sample_offsets(&self) -> Vec<u64> {
        match &self.input {
            Input::AnnexB {
                chunks,
                coded_slices,
            } => coded_slices
                .iter()
                .map(|&idx| chunks[idx].0 as u64)
                .collect(),
            Input::Mp4(index) => index.sample_offsets.clone(),
        }
    }

    /// Parse picture `index` and return its motion-vector grid along with
    /// whether it was a P picture.
    ///
    /// Non-P pictures return an all-zero grid and `false`. Frames with
    /// unsupported or locally malformed slice payloads degrade to an
    /// empty grid as well; errors in the container layer propagate.
    pub fn load_frame(&self, index: u64) -> Result<(MvGrid, bool)> {
        let nal_bytes = self.frame_nal(index)?;

        let first = *nal_bytes.first().ok_or_else(|| {
            MvscanError::MalformedBitstream(format!("frame {} has an empty NAL", index))
        })?;
        let header = nal::parse_nal_header(first)?;

        if !header.nal_unit_type.is_coded_slice() {
            return Ok((self.empty_grid(self.default_sps()), false));
        }

        let payload = nal::unescape_rbsp(&nal_bytes[1..])?;
        let mut reader = BitReader::new(&payload);

        let (slice_header, sps, pps) =
            match parse_slice_header(&mut reader, &self.sps_map, &self.pps_map, &header) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::warn!(frame = index, error = %err, "slice header rejected");
                    return Ok((self.empty_grid(self.default_sps()), false));
                }
            };

        if !slice_header.slice_type.is_p() {
            return Ok((self.empty_grid(sps), false));
        }

        let mut ctx = SliceContext::new(sps, pps, slice_header);
        let derived = parse_slice_data(&mut ctx, &mut reader)
            .and_then(|()| derive_motion_vectors(&mut ctx));

        match derived {
            Ok(()) => Ok((build_grid(&ctx), true)),
            Err(err) => {
                tracing::warn!(frame = index, error = %err, "frame degraded to empty grid");
                Ok((self.empty_grid(sps), false))
            }
        }
    }

    /// Locate the coded-picture NAL of frame `index`.
    fn frame_nal(&self, index: u64) -> Result<&[u8]> {
        match &self.input {
            Input::AnnexB {
                chunks,
                coded_slices,
            } => {
                let chunk_idx = *coded_slices.get(index as usize).ok_or_else(|| {
                    MvscanError::MalformedContainer(format!(
                        "frame {} out of range ({} coded pictures)",
                        index,
                        coded_slices.len()
                    ))
                })?;
                let (offset, length) = chunks[chunk_idx];
                Ok(&self.data[offset..offset + length])
            }
            Input::Mp4(mp4) => {
                let sample = mp4.extract_sample(&self.data, index)?;
                let length_size = mp4.length_size as usize;
                let prefix = sample.get(..length_size).ok_or_else(|| {
                    MvscanError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("sample {} shorter than its length prefix", index),
                    ))
                })?;
                let nal_len = prefix.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
                sample
                    .get(length_size..length_size + nal_len)
                    .ok_or_else(|| {
                        MvscanError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!(
                                "sample {} NAL of {} bytes exceeds sample of {}",
                                index,
                                nal_len,
                                sample.len()
                            ),
                        ))
                    })
            }
        }
    }

    fn default_sps(&self) -> &Sps {
        &self.sps_map[&self.default_sps_id]
    }

    /// All-zero grid of the picture's shape.
    fn empty_grid(&self, sps: &Sps) -> MvGrid {
        MvGrid::new(
            sps.display_width(),
            sps.display_height(),
            sps.pic_width_in_mbs(),
            sps.frame_height_in_mbs(),
            false,
        )
    }
}

fn starts_with_start_code(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

fn byte_at(data: &[u8], offset: usize) -> Result<u8> {
    data.get(offset).copied().ok_or_else(|| {
        MvscanError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("NAL header at offset {} beyond end of file", offset),
        ))
    })
}
