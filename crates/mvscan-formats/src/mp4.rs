//! ISO Base Media File Format (MP4) parser
//!
//! Minimal MP4 parsing to locate the AVC track, its embedded parameter
//! sets, and a per-sample byte index. No sample data is copied; callers
//! slice the input with the offsets produced here.
//!
//! References:
//! - ISO/IEC 14496-12 (ISO Base Media File Format)
//! - ISO/IEC 14496-15 (AVC file format, avcC record)

use mvscan_core::{MvscanError, Result};
use std::io::{Cursor, Read, Seek, SeekFrom};

/// Maximum table entry count to prevent absurd allocations
const MAX_ENTRY_COUNT: u32 = 10_000_000;

/// Maximum total samples in one track
const MAX_TOTAL_SAMPLES: usize = 1_000_000;

/// Maximum box nesting depth
const MAX_BOX_DEPTH: u32 = 32;

/// Box types whose payload is a concatenation of child boxes
const CONTAINER_BOXES: [&[u8; 4]; 20] = [
    b"moov", b"trak", b"edts", b"mdia", b"minf", b"stbl", b"mvex", b"moof", b"traf", b"mfra",
    b"skip", b"strk", b"meta", b"dinf", b"ipro", b"sinf", b"fiin", b"paen", b"meco", b"mere",
];

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    let mut buf = [0u8; 1];
    cursor.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    let mut buf = [0u8; 2];
    cursor.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let mut buf = [0u8; 8];
    cursor.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

fn read_fourcc(cursor: &mut Cursor<&[u8]>) -> Result<[u8; 4]> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

/// One node of the box tree. Container boxes carry children; leaf boxes
/// carry only their payload location.
#[derive(Debug, Clone)]
pub struct Mp4Box {
    /// Four-CC box type.
    pub box_type: [u8; 4],
    /// Absolute offset of the payload (after the header).
    pub data_offset: u64,
    /// Payload size in bytes.
    pub data_size: u64,
    /// Child boxes of container types.
    pub children: Vec<Mp4Box>,
}

impl Mp4Box {
    /// Depth-first search for the first box of the given type.
    pub fn find_first(&self, box_type: &[u8; 4]) -> Option<&Mp4Box> {
        for child in &self.children {
            if &child.box_type == box_type {
                return Some(child);
            }
            if let Some(found) = child.find_first(box_type) {
                return Some(found);
            }
        }
        None
    }

    fn parse(cursor: &mut Cursor<&[u8]>, depth: u32) -> Result<Mp4Box> {
        if depth > MAX_BOX_DEPTH {
            return Err(MvscanError::MalformedContainer(
                "box nesting too deep".to_string(),
            ));
        }

        let start_pos = cursor.position();
        let file_size = cursor.get_ref().len() as u64;

        let size32 = read_u32(cursor)?;
        let box_type = read_fourcc(cursor)?;

        let size = match size32 {
            0 => file_size - start_pos,
            1 => read_u64(cursor)?,
            n => n as u64,
        };

        let data_offset = cursor.position();
        let header_size = data_offset - start_pos;

        if size < header_size || start_pos + size > file_size {
            return Err(MvscanError::MalformedContainer(format!(
                "box '{}' size {} inconsistent at offset {}",
                String::from_utf8_lossy(&box_type),
                size,
                start_pos
            )));
        }

        let data_size = size - header_size;
        let end = data_offset + data_size;

        let mut children = Vec::new();
        if CONTAINER_BOXES.contains(&&box_type) {
            while cursor.position() + 8 <= end {
                children.push(Mp4Box::parse(cursor, depth + 1)?);
            }
        } else if &box_type == b"stsd" {
            // Sample description: version/flags, entry count, then the
            // sample entries as child boxes
            cursor.seek(SeekFrom::Current(4))?;
            let entry_count = read_u32(cursor)?;
            for _ in 0..entry_count {
                if cursor.position() + 8 > end {
                    break;
                }
                children.push(Mp4Box::parse(cursor, depth + 1)?);
            }
        }

        cursor.seek(SeekFrom::Start(end))?;

        Ok(Mp4Box {
            box_type,
            data_offset,
            data_size,
            children,
        })
    }
}

/// stsc entry.
#[derive(Debug, Clone, Copy)]
struct SampleToChunk {
    first_chunk: u32,
    samples_per_chunk: u32,
}

/// Sample index of the AVC track of an MP4 file, plus the embedded
/// decoder configuration.
#[derive(Debug, Clone)]
pub struct Mp4Index {
    /// NAL length-prefix size in bytes (length_size_minus_one + 1).
    pub length_size: u8,
    /// Embedded SPS NAL units (complete NALs, headers included).
    pub sps_nals: Vec<Vec<u8>>,
    /// Embedded PPS NAL units (complete NALs, headers included).
    pub pps_nals: Vec<Vec<u8>>,
    /// Absolute byte offset of each sample.
    pub sample_offsets: Vec<u64>,
    /// Size of each sample in bytes.
    pub sample_sizes: Vec<u32>,
}

impl Mp4Index {
    /// Number of indexed samples.
    pub fn sample_count(&self) -> u64 {
        self.sample_offsets.len() as u64
    }

    /// Borrow the bytes of sample `index` out of the container data.
    pub fn extract_sample<'a>(&self, data: &'a [u8], index: u64) -> Result<&'a [u8]> {
        let i = index as usize;
        let (offset, size) = match (self.sample_offsets.get(i), self.sample_sizes.get(i)) {
            (Some(&o), Some(&s)) => (o as usize, s as usize),
            _ => {
                return Err(MvscanError::MalformedContainer(format!(
                    "sample {} out of range ({} samples)",
                    index,
                    self.sample_offsets.len()
                )));
            }
        };
        let end = offset.checked_add(size).ok_or_else(|| {
            MvscanError::MalformedContainer(format!("sample {} offset overflow", index))
        })?;
        data.get(offset..end).ok_or_else(|| {
            MvscanError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "sample {} at {}..{} exceeds file size {}",
                    index,
                    offset,
                    end,
                    data.len()
                ),
            ))
        })
    }
}

/// Quick signature check for dispatching on file content.
pub fn looks_like_mp4(data: &[u8]) -> bool {
    data.len() >= 12 && &data[4..8] == b"ftyp"
}

/// Parse the MP4 box tree and index the AVC track.
pub fn parse_mp4(data: &[u8]) -> Result<Mp4Index> {
    if data.is_empty() {
        return Err(MvscanError::MalformedContainer("empty MP4 data".to_string()));
    }

    let mut cursor = Cursor::new(data);
    let mut top_level = Vec::new();
    while cursor.position() + 8 <= data.len() as u64 {
        top_level.push(Mp4Box::parse(&mut cursor, 0)?);
    }

    let root = Mp4Box {
        box_type: *b"root",
        data_offset: 0,
        data_size: data.len() as u64,
        children: top_level,
    };

    // The AVC track is the one whose sample description carries avc1
    let mut avc_trak = None;
    if let Some(moov) = root.children.iter().find(|b| &b.box_type == b"moov") {
        for trak in moov.children.iter().filter(|b| &b.box_type == b"trak") {
            if let Some(avc1) = trak.find_first(b"avc1") {
                avc_trak = Some((trak, avc1));
                break;
            }
        }
    }
    let (trak, avc1) = avc_trak.ok_or_else(|| {
        MvscanError::MalformedContainer("no track with an avc1 sample entry".to_string())
    })?;

    let (length_size, sps_nals, pps_nals) = parse_avc1(data, avc1)?;

    let chunk_offsets = if let Some(stco) = trak.find_first(b"stco") {
        parse_stco(data, stco, false)?
    } else if let Some(co64) = trak.find_first(b"co64") {
        parse_stco(data, co64, true)?
    } else {
        return Err(MvscanError::MalformedContainer(
            "stco/co64 not found".to_string(),
        ));
    };

    let stsc = trak
        .find_first(b"stsc")
        .ok_or_else(|| MvscanError::MalformedContainer("stsc not found".to_string()))?;
    let sample_to_chunk = parse_stsc(data, stsc)?;

    let stsz = trak
        .find_first(b"stsz")
        .ok_or_else(|| MvscanError::MalformedContainer("stsz not found".to_string()))?;
    let sample_sizes = parse_stsz(data, stsz)?;

    let sample_offsets = expand_sample_offsets(&chunk_offsets, &sample_to_chunk, &sample_sizes)?;

    tracing::debug!(
        samples = sample_offsets.len(),
        chunks = chunk_offsets.len(),
        length_size,
        "indexed AVC track"
    );

    Ok(Mp4Index {
        length_size,
        sps_nals,
        pps_nals,
        sample_offsets,
        sample_sizes,
    })
}

/// Parse the avc1 visual sample entry and its nested avcC record.
fn parse_avc1(data: &[u8], avc1: &Mp4Box) -> Result<(u8, Vec<Vec<u8>>, Vec<Vec<u8>>)> {
    let mut cursor = Cursor::new(data);
    // SampleEntry (8 bytes) plus the fixed VisualSampleEntry fields
    // (70 bytes) precede the nested boxes
    let entries_start = avc1.data_offset + 78;
    let end = avc1.data_offset + avc1.data_size;
    if entries_start + 8 > end {
        return Err(MvscanError::MalformedContainer(
            "avc1 sample entry truncated".to_string(),
        ));
    }

    cursor.seek(SeekFrom::Start(entries_start))?;
    while cursor.position() + 8 <= end {
        let b = Mp4Box::parse(&mut cursor, 0)?;
        if &b.box_type == b"avcC" {
            return parse_avcc(data, &b);
        }
    }

    Err(MvscanError::MalformedContainer(
        "avcC not found in avc1 sample entry".to_string(),
    ))
}

/// Parse the AVC decoder configuration record.
fn parse_avcc(data: &[u8], avcc: &Mp4Box) -> Result<(u8, Vec<Vec<u8>>, Vec<Vec<u8>>)> {
    let mut cursor = Cursor::new(data);
    cursor.seek(SeekFrom::Start(avcc.data_offset))?;

    let configuration_version = read_u8(&mut cursor)?;
    if configuration_version != 1 {
        return Err(MvscanError::MalformedContainer(format!(
            "avcC configuration version {} not supported",
            configuration_version
        )));
    }
    let _avc_profile = read_u8(&mut cursor)?;
    let _profile_compatibility = read_u8(&mut cursor)?;
    let _avc_level = read_u8(&mut cursor)?;

    let tmp = read_u8(&mut cursor)?;
    if tmp >> 2 != 0x3F {
        return Err(MvscanError::MalformedContainer(
            "avcC reserved bits not 111111".to_string(),
        ));
    }
    let length_size = (tmp & 0x03) + 1;

    let num_sps = read_u8(&mut cursor)? & 0x1F;
    let mut sps_nals = Vec::with_capacity(num_sps as usize);
    for _ in 0..num_sps {
        let length = read_u16(&mut cursor)? as usize;
        let mut nal = vec![0u8; length];
        cursor.read_exact(&mut nal)?;
        sps_nals.push(nal);
    }

    let num_pps = read_u8(&mut cursor)?;
    let mut pps_nals = Vec::with_capacity(num_pps as usize);
    for _ in 0..num_pps {
        let length = read_u16(&mut cursor)? as usize;
        let mut nal = vec![0u8; length];
        cursor.read_exact(&mut nal)?;
        pps_nals.push(nal);
    }

    if sps_nals.is_empty() || pps_nals.is_empty() {
        return Err(MvscanError::MalformedContainer(
            "avcC carries no SPS/PPS".to_string(),
        ));
    }

    Ok((length_size, sps_nals, pps_nals))
}

/// Parse stco (32-bit) or co64 (64-bit) chunk offsets.
fn parse_stco(data: &[u8], stco: &Mp4Box, large: bool) -> Result<Vec<u64>> {
    let mut cursor = Cursor::new(data);
    cursor.seek(SeekFrom::Start(stco.data_offset))?;
    cursor.seek(SeekFrom::Current(4))?; // version + flags

    let entry_count = read_u32(&mut cursor)?;
    if entry_count > MAX_ENTRY_COUNT {
        return Err(MvscanError::MalformedContainer(format!(
            "chunk offset count {} exceeds maximum {}",
            entry_count, MAX_ENTRY_COUNT
        )));
    }

    let mut offsets = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        offsets.push(if large {
            read_u64(&mut cursor)?
        } else {
            read_u32(&mut cursor)? as u64
        });
    }
    Ok(offsets)
}

/// Parse the sample-to-chunk table.
fn parse_stsc(data: &[u8], stsc: &Mp4Box) -> Result<Vec<SampleToChunk>> {
    let mut cursor = Cursor::new(data);
    cursor.seek(SeekFrom::Start(stsc.data_offset))?;
    cursor.seek(SeekFrom::Current(4))?; // version + flags

    let entry_count = read_u32(&mut cursor)?;
    if entry_count > MAX_ENTRY_COUNT {
        return Err(MvscanError::MalformedContainer(format!(
            "sample-to-chunk count {} exceeds maximum {}",
            entry_count, MAX_ENTRY_COUNT
        )));
    }

    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let first_chunk = read_u32(&mut cursor)?;
        let samples_per_chunk = read_u32(&mut cursor)?;
        let _sample_description_index = read_u32(&mut cursor)?;
        entries.push(SampleToChunk {
            first_chunk,
            samples_per_chunk,
        });
    }
    Ok(entries)
}

/// Parse per-sample sizes.
fn parse_stsz(data: &[u8], stsz: &Mp4Box) -> Result<Vec<u32>> {
    let mut cursor = Cursor::new(data);
    cursor.seek(SeekFrom::Start(stsz.data_offset))?;
    cursor.seek(SeekFrom::Current(4))?; // version + flags

    let sample_size = read_u32(&mut cursor)?;
    let sample_count = read_u32(&mut cursor)?;
    if sample_count as usize > MAX_TOTAL_SAMPLES {
        return Err(MvscanError::MalformedContainer(format!(
            "sample count {} exceeds maximum {}",
            sample_count, MAX_TOTAL_SAMPLES
        )));
    }

    let mut sizes = Vec::with_capacity(sample_count as usize);
    if sample_size == 0 {
        for _ in 0..sample_count {
            sizes.push(read_u32(&mut cursor)?);
        }
    } else {
        sizes.resize(sample_count as usize, sample_size);
    }
    Ok(sizes)
}

/// Expand the chunk tables into one byte offset per sample by walking
/// chunks in order and accumulating sample sizes.
fn expand_sample_offsets(
    chunk_offsets: &[u64],
    sample_to_chunk: &[SampleToChunk],
    sample_sizes: &[u32],
) -> Result<Vec<u64>> {
    let mut offsets = Vec::with_capacity(sample_sizes.len());
    if sample_sizes.is_empty() {
        return Ok(offsets);
    }
    if chunk_offsets.is_empty() || sample_to_chunk.is_empty() {
        return Err(MvscanError::MalformedContainer(
            "empty chunk tables for a non-empty track".to_string(),
        ));
    }

    let mut stsc_idx = 0usize;
    let mut sample = 0usize;

    for (chunk, &chunk_offset) in chunk_offsets.iter().enumerate() {
        // first_chunk is 1-based
        while stsc_idx + 1 < sample_to_chunk.len()
            && sample_to_chunk[stsc_idx + 1].first_chunk as usize <= chunk + 1
        {
            stsc_idx += 1;
        }

        let mut offset = chunk_offset;
        for _ in 0..sample_to_chunk[stsc_idx].samples_per_chunk {
            if sample >= sample_sizes.len() {
                break;
            }
            offsets.push(offset);
            offset += sample_sizes[sample] as u64;
            sample += 1;
        }
        if sample >= sample_sizes.len() {
            break;
        }
    }

    if sample < sample_sizes.len() {
        return Err(MvscanError::MalformedContainer(format!(
            "chunk tables cover {} of {} samples",
            sample,
            sample_sizes.len()
        )));
    }

    Ok(offsets)
}
