//! Macroblock-layer parsing for CAVLC slices.
//!
//! Parses `slice_data()` in raster order: skip runs, `mb_type`, prediction
//! syntax, coded-block-pattern, and the residual-block skeleton, keeping
//! the bit cursor exact without reconstructing samples. Neighbour
//! addresses and the per-macroblock partition-index table feed the motion
//! derivation pass in `mv`.

use crate::bitreader::BitReader;
use crate::cavlc;
use crate::error::{AvcError, Result};
use crate::pps::Pps;
use crate::slice::{SliceHeader, SliceType};
use crate::sps::Sps;

/// P and SP slice macroblock types (Table 7-13). Intra types follow at an
/// offset of [`P_INTRA_OFFSET`]; `P_Skip` is never coded explicitly.
pub const P_L0_16X16: u32 = 0;
pub const P_L0_L0_16X8: u32 = 1;
pub const P_L0_L0_8X16: u32 = 2;
pub const P_8X8: u32 = 3;
pub const P_8X8_REF0: u32 = 4;
pub const P_SKIP: u32 = 31;

/// First intra mb_type value inside a P slice.
pub const P_INTRA_OFFSET: u32 = 5;

/// I slice macroblock types (Table 7-11).
pub const I_4X4: u32 = 0;
pub const I_PCM: u32 = 25;

/// Macroblock partition prediction mode (Tables 7-11 and 7-13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredMode {
    Intra4x4,
    Intra16x16,
    PredL0,
    PredL1,
    BiPred,
    Direct,
    /// No prediction for this partition index.
    Na,
}

/// NumMbPart(mb_type) for P slices; 0 for intra types.
pub fn num_mb_part(mb_type: u32) -> u32 {
    match mb_type {
        P_L0_16X16 | P_SKIP => 1,
        P_L0_L0_16X8 | P_L0_L0_8X16 => 2,
        P_8X8 | P_8X8_REF0 => 4,
        _ => 0,
    }
}

/// MbPartWidth(mb_type) for inter types.
pub fn mb_part_width(mb_type: u32) -> u32 {
    match mb_type {
        P_L0_L0_8X16 => 8,
        P_8X8 | P_8X8_REF0 => 8,
        _ => 16,
    }
}

/// MbPartHeight(mb_type) for inter types.
pub fn mb_part_height(mb_type: u32) -> u32 {
    match mb_type {
        P_L0_L0_16X8 => 8,
        P_8X8 | P_8X8_REF0 => 8,
        _ => 16,
    }
}

/// MbPartPredMode(mb_type, part_idx) for the given slice type.
pub fn mb_part_pred_mode(mb_type: u32, part_idx: u32, slice_type: SliceType) -> PredMode {
    if slice_type.is_intra() {
        return i_pred_mode(mb_type);
    }
    match mb_type {
        P_L0_16X16 | P_SKIP => {
            if part_idx == 0 {
                PredMode::PredL0
            } else {
                PredMode::Na
            }
        }
        P_L0_L0_16X8 | P_L0_L0_8X16 => PredMode::PredL0,
        P_8X8 | P_8X8_REF0 => PredMode::Na,
        intra => i_pred_mode(intra - P_INTRA_OFFSET),
    }
}

/// MbPartPredMode for I-slice macroblock types.
fn i_pred_mode(i_mb_type: u32) -> PredMode {
    match i_mb_type {
        I_4X4 => PredMode::Intra4x4,
        1..=24 => PredMode::Intra16x16,
        _ => PredMode::Na,
    }
}

/// True when the macroblock is intra coded.
pub fn is_mb_intra(mb_type: u32, slice_type: SliceType) -> bool {
    matches!(
        mb_part_pred_mode(mb_type, 0, slice_type),
        PredMode::Intra4x4 | PredMode::Intra16x16
    ) || is_i_pcm(mb_type, slice_type)
}

/// True for the PCM macroblock type.
pub fn is_i_pcm(mb_type: u32, slice_type: SliceType) -> bool {
    if slice_type.is_intra() {
        mb_type == I_PCM
    } else {
        mb_type == I_PCM + P_INTRA_OFFSET
    }
}

/// CodedBlockPattern{Luma,Chroma} fixed by the Intra_16x16 mb_type
/// (Table 7-11).
fn i16x16_coded_block_pattern(i_mb_type: u32) -> (u32, u32) {
    let idx = i_mb_type - 1;
    ((idx / 12) * 15, (idx / 4) % 3)
}

/// codeNum to coded_block_pattern for Intra_4x4/Intra_8x8 prediction
/// (Table 9-4).
const CBP_CODE_INTRA: [u8; 48] = [
    47, 31, 15, 0, 23, 27, 29, 30, 7, 11, 13, 14, 39, 43, 45, 46, 16, 3, 5, 10, 12, 19, 21, 26,
    28, 35, 37, 42, 44, 1, 2, 4, 8, 17, 18, 20, 24, 6, 9, 22, 25, 32, 33, 34, 36, 40, 38, 41,
];

/// codeNum to coded_block_pattern for inter prediction (Table 9-4).
const CBP_CODE_INTER: [u8; 48] = [
    0, 16, 1, 2, 4, 8, 32, 3, 5, 10, 12, 15, 47, 7, 11, 13, 14, 6, 9, 31, 35, 37, 42, 44, 33,
    34, 36, 40, 39, 43, 45, 46, 17, 18, 20, 24, 19, 21, 26, 28, 23, 27, 29, 30, 22, 25, 38, 41,
];

/// Prediction syntax of one macroblock (mb_pred). Only List 0 is carried;
/// B slices are outside the supported subset.
#[derive(Debug, Clone, Default)]
pub struct MbPred {
    /// prev_intra4x4_pred_mode_flag per 4x4 (or 8x8) luma block
    pub prev_intra_pred_mode_flag: [bool; 16],
    /// rem_intra4x4_pred_mode per 4x4 (or 8x8) luma block
    pub rem_intra_pred_mode: [u8; 16],
    /// intra_chroma_pred_mode
    pub intra_chroma_pred_mode: u32,
    /// ref_idx_l0 per partition
    pub ref_idx_l0: [u32; 4],
    /// mvd_l0 per partition, (x, y)
    pub mvd_l0: [[i32; 2]; 4],
}

/// One macroblock plus everything motion derivation needs from it.
#[derive(Debug, Clone)]
pub struct Macroblock {
    /// Raster scan address.
    pub mb_addr: u32,
    /// Position in macroblock units.
    pub mb_x: u32,
    pub mb_y: u32,
    /// Slice type the macroblock was coded in.
    pub slice_type: SliceType,
    /// Raw mb_type value (P-slice numbering for P/SP slices).
    pub mb_type: u32,
    pub transform_size_8x8_flag: bool,
    pub mb_qp_delta: i32,
    pub coded_block_pattern_luma: u32,
    pub coded_block_pattern_chroma: u32,
    /// Prediction syntax; absent for skip and PCM macroblocks.
    pub mb_pred: Option<MbPred>,
    /// Raster addresses of the A/B/C/D neighbours, -1 outside the picture.
    pub mb_addr_a: i32,
    pub mb_addr_b: i32,
    pub mb_addr_c: i32,
    pub mb_addr_d: i32,
    /// Partition index inside the corresponding neighbour, adjacent to
    /// this macroblock's top-left corner.
    pub mb_part_idx_a: u8,
    pub mb_part_idx_b: u8,
    pub mb_part_idx_c: u8,
    pub mb_part_idx_d: u8,
    /// 4x4 map (4-pel units, `[x][y]`) of sub-block to owning mbPartIdx.
    pub part_idx_table: [[u8; 4]; 4],
    /// TotalCoeff per 4x4 luma block, for CAVLC nC prediction.
    pub total_coeffs_luma: [u8; 16],
    /// TotalCoeff per 4x4 chroma block, `[iCbCr][blk]`.
    pub total_coeffs_chroma: [[u8; 4]; 2],
    /// Derived motion vectors, `[list][part][sub][component]`,
    /// quarter-sample units.
    pub mv_l: [[[[i32; 2]; 4]; 4]; 2],
    /// Prediction-utilisation flags `[list][part]`.
    pub pred_flag_l: [[bool; 4]; 2],
    /// Reference indices `[list][part]`, -1 when unused.
    pub ref_idx_l: [[i32; 4]; 2],
}

impl Macroblock {
    /// A skipped macroblock at the given address; also the base state
    /// every coded macroblock starts from.
    pub fn new_skip(mb_addr: u32, slice_type: SliceType, pic_width_in_mbs: u32) -> Self {
        let w = pic_width_in_mbs;
        let a = mb_addr;

        let mb_addr_a = if a % w != 0 { a as i32 - 1 } else { -1 };
        let mb_addr_b = if a >= w { (a - w) as i32 } else { -1 };
        let mb_addr_c = if a >= w && (a + 1) % w != 0 {
            (a - w + 1) as i32
        } else {
            -1
        };
        let mb_addr_d = if a >= w && a % w != 0 {
            (a - w - 1) as i32
        } else {
            -1
        };

        Self {
            mb_addr,
            mb_x: a % w,
            mb_y: a / w,
            slice_type,
            mb_type: P_SKIP,
            transform_size_8x8_flag: false,
            mb_qp_delta: 0,
            coded_block_pattern_luma: 0,
            coded_block_pattern_chroma: 0,
            mb_pred: None,
            mb_addr_a,
            mb_addr_b,
            mb_addr_c,
            mb_addr_d,
            mb_part_idx_a: 0,
            mb_part_idx_b: 0,
            mb_part_idx_c: 0,
            mb_part_idx_d: 0,
            part_idx_table: [[0; 4]; 4],
            total_coeffs_luma: [0; 16],
            total_coeffs_chroma: [[0; 4]; 2],
            mv_l: [[[[0; 2]; 4]; 4]; 2],
            pred_flag_l: [[false; 4]; 2],
            ref_idx_l: [[0; 4]; 2],
        }
    }

    /// True when this macroblock is intra coded.
    pub fn is_intra(&self) -> bool {
        is_mb_intra(self.mb_type, self.slice_type)
    }

    /// Fill the partition-index table from the macroblock's shape and look
    /// up the neighbour partition indices. Must run after `mb_type` is
    /// final and all raster predecessors are in `mbs`.
    fn finish_layout(&mut self, mbs: &[Macroblock]) {
        let num = num_mb_part(self.mb_type);
        if num == 2 {
            if mb_part_width(self.mb_type) == 8 {
                // 8x16: right half belongs to partition 1
                for j in 0..4 {
                    self.part_idx_table[2][j] = 1;
                    self.part_idx_table[3][j] = 1;
                }
            } else {
                // 16x8: lower half belongs to partition 1
                for i in 0..4 {
                    self.part_idx_table[i][2] = 1;
                    self.part_idx_table[i][3] = 1;
                }
            }
        }

        // Positions adjacent to this macroblock's top-left corner, in the
        // neighbour's 4-pel coordinate frame (Table 6-3).
        self.mb_part_idx_a = neighbour_part_idx(mbs, self.mb_addr_a, 3, 0);
        self.mb_part_idx_b = neighbour_part_idx(mbs, self.mb_addr_b, 0, 3);
        self.mb_part_idx_c = neighbour_part_idx(mbs, self.mb_addr_c, 0, 3);
        self.mb_part_idx_d = neighbour_part_idx(mbs, self.mb_addr_d, 3, 3);
    }
}

fn neighbour_part_idx(mbs: &[Macroblock], mb_addr: i32, x: usize, y: usize) -> u8 {
    if mb_addr < 0 {
        return 0;
    }
    mbs[mb_addr as usize].part_idx_table[x][y]
}

/// Parsing state for one slice: the active parameter sets, the slice
/// header, and the picture's macroblock array.
pub struct SliceContext<'a> {
    pub sps: &'a Sps,
    pub pps: &'a Pps,
    pub header: SliceHeader,
    pub mbs: Vec<Macroblock>,
}

impl<'a> SliceContext<'a> {
    pub fn new(sps: &'a Sps, pps: &'a Pps, header: SliceHeader) -> Self {
        Self {
            sps,
            pps,
            header,
            mbs: Vec::new(),
        }
    }

    pub fn pic_width_in_mbs(&self) -> u32 {
        self.sps.pic_width_in_mbs()
    }

    pub fn pic_height_in_mbs(&self) -> u32 {
        self.sps.frame_height_in_mbs() / (1 + self.header.field_pic_flag as u32)
    }

    pub fn pic_size_in_mbs(&self) -> u32 {
        self.pic_width_in_mbs() * self.pic_height_in_mbs()
    }
}

/// Parse `slice_data()` for a CAVLC slice, populating the context's
/// macroblock array.
pub fn parse_slice_data(ctx: &mut SliceContext, reader: &mut BitReader) -> Result<()> {
    if ctx.header.slice_type.is_b() {
        return Err(AvcError::NotImplemented("B slice".to_string()));
    }
    if ctx.header.field_pic_flag {
        return Err(AvcError::Unsupported("field picture".to_string()));
    }
    if ctx.sps.mb_adaptive_frame_field_flag {
        return Err(AvcError::Unsupported("MBAFF".to_string()));
    }
    if ctx.sps.chroma_array_type() != 1 {
        return Err(AvcError::NotImplemented(format!(
            "chroma_array_type {}",
            ctx.sps.chroma_array_type()
        )));
    }

    let pic_size = ctx.pic_size_in_mbs();
    let pic_width = ctx.pic_width_in_mbs();
    let slice_type = ctx.header.slice_type;

    tracing::debug!(
        slice_type = slice_type.name(),
        first_mb = ctx.header.first_mb_in_slice,
        pic_size,
        "parsing slice data"
    );

    if ctx.header.first_mb_in_slice >= pic_size {
        return Err(AvcError::InvalidSliceData(format!(
            "first_mb_in_slice {} outside picture of {} macroblocks",
            ctx.header.first_mb_in_slice, pic_size
        )));
    }

    ctx.mbs = (0..pic_size)
        .map(|addr| Macroblock::new_skip(addr, slice_type, pic_width))
        .collect();

    let mut curr_mb_addr = ctx.header.first_mb_in_slice;
    let mut more_data = true;

    while more_data {
        if !slice_type.is_intra() {
            let mb_skip_run = reader.read_ue()?;
            for _ in 0..mb_skip_run {
                if curr_mb_addr >= pic_size {
                    return Err(AvcError::InvalidSliceData(
                        "mb_skip_run extends past the end of the picture".to_string(),
                    ));
                }
                let mut mb = Macroblock::new_skip(curr_mb_addr, slice_type, pic_width);
                mb.finish_layout(&ctx.mbs);
                ctx.mbs[curr_mb_addr as usize] = mb;
                curr_mb_addr += 1;
            }
            if mb_skip_run > 0 {
                more_data = reader.more_rbsp_data();
            }
        }

        if more_data {
            if curr_mb_addr >= pic_size {
                return Err(AvcError::InvalidSliceData(
                    "macroblock address past the end of the picture".to_string(),
                ));
            }
            parse_macroblock(ctx, reader, curr_mb_addr)?;
            curr_mb_addr += 1;
        }

        more_data = reader.more_rbsp_data();
    }

    if curr_mb_addr != pic_size {
        return Err(AvcError::InvalidSliceData(format!(
            "slice covered {} of {} macroblocks",
            curr_mb_addr, pic_size
        )));
    }

    Ok(())
}

/// Parse one `macroblock_layer()`.
fn parse_macroblock(ctx: &mut SliceContext, reader: &mut BitReader, mb_addr: u32) -> Result<()> {
    let slice_type = ctx.header.slice_type;
    let mut mb = Macroblock::new_skip(mb_addr, slice_type, ctx.pic_width_in_mbs());

    mb.mb_type = reader.read_ue()?;
    let max_mb_type = if slice_type.is_intra() { I_PCM } else { 30 };
    if mb.mb_type > max_mb_type {
        return Err(AvcError::InvalidSliceData(format!(
            "mb_type {} out of range for {} slice",
            mb.mb_type,
            slice_type.name()
        )));
    }

    if is_i_pcm(mb.mb_type, slice_type) {
        parse_i_pcm(ctx, reader, &mut mb)?;
        mb.finish_layout(&ctx.mbs);
        ctx.mbs[mb_addr as usize] = mb;
        return Ok(());
    }

    if !mb.is_intra() && num_mb_part(mb.mb_type) == 4 {
        return Err(AvcError::Unsupported(
            "P_8x8 sub-macroblock partitions".to_string(),
        ));
    }

    let pred_mode0 = mb_part_pred_mode(mb.mb_type, 0, slice_type);

    if pred_mode0 == PredMode::Intra4x4 && ctx.pps.transform_8x8_mode_flag {
        mb.transform_size_8x8_flag = reader.read_flag()?;
    }

    mb.mb_pred = Some(parse_mb_pred(ctx, reader, &mb)?);

    if pred_mode0 != PredMode::Intra16x16 {
        let code_num = reader.read_ue()?;
        if code_num > 47 {
            return Err(AvcError::InvalidSliceData(format!(
                "coded_block_pattern codeNum {} out of range",
                code_num
            )));
        }
        let cbp = if pred_mode0 == PredMode::Intra4x4 {
            CBP_CODE_INTRA[code_num as usize]
        } else {
            CBP_CODE_INTER[code_num as usize]
        } as u32;
        mb.coded_block_pattern_luma = cbp % 16;
        mb.coded_block_pattern_chroma = cbp / 16;

        if mb.coded_block_pattern_luma > 0
            && ctx.pps.transform_8x8_mode_flag
            && !mb.is_intra()
        {
            mb.transform_size_8x8_flag = reader.read_flag()?;
        }
    } else {
        let i_mb_type = if slice_type.is_intra() {
            mb.mb_type
        } else {
            mb.mb_type - P_INTRA_OFFSET
        };
        let (luma, chroma) = i16x16_coded_block_pattern(i_mb_type);
        mb.coded_block_pattern_luma = luma;
        mb.coded_block_pattern_chroma = chroma;
    }

    let has_residual = mb.coded_block_pattern_luma > 0
        || mb.coded_block_pattern_chroma > 0
        || pred_mode0 == PredMode::Intra16x16;

    if has_residual {
        mb.mb_qp_delta = reader.read_se()?;
    }

    mb.finish_layout(&ctx.mbs);
    ctx.mbs[mb_addr as usize] = mb;

    if has_residual {
        cavlc::parse_residual(reader, ctx, mb_addr)?;
    }

    Ok(())
}

/// Consume the PCM sample payload; the sample values are not retained.
fn parse_i_pcm(ctx: &SliceContext, reader: &mut BitReader, mb: &mut Macroblock) -> Result<()> {
    reader.byte_align();
    let bit_depth_luma = ctx.sps.bit_depth_luma();
    for _ in 0..256 {
        reader.read_bits(bit_depth_luma)?;
    }
    let bit_depth_chroma = ctx.sps.bit_depth_chroma();
    for _ in 0..2 * ctx.sps.mb_width_c() * ctx.sps.mb_height_c() {
        reader.read_bits(bit_depth_chroma)?;
    }
    // PCM macroblocks count as fully coded for CAVLC nC prediction
    mb.total_coeffs_luma = [16; 16];
    mb.total_coeffs_chroma = [[16; 4]; 2];
    Ok(())
}

/// Parse `mb_pred()`.
fn parse_mb_pred(ctx: &SliceContext, reader: &mut BitReader, mb: &Macroblock) -> Result<MbPred> {
    let slice_type = ctx.header.slice_type;
    let mut pred = MbPred::default();
    let pred_mode0 = mb_part_pred_mode(mb.mb_type, 0, slice_type);

    if pred_mode0 == PredMode::Intra4x4 || pred_mode0 == PredMode::Intra16x16 {
        if pred_mode0 == PredMode::Intra4x4 {
            let blocks = if mb.transform_size_8x8_flag { 4 } else { 16 };
            for blk_idx in 0..blocks {
                pred.prev_intra_pred_mode_flag[blk_idx] = reader.read_flag()?;
                if !pred.prev_intra_pred_mode_flag[blk_idx] {
                    pred.rem_intra_pred_mode[blk_idx] = reader.read_bits(3)? as u8;
                }
            }
        }
        if matches!(ctx.sps.chroma_array_type(), 1 | 2) {
            pred.intra_chroma_pred_mode = reader.read_ue()?;
            if pred.intra_chroma_pred_mode > 3 {
                return Err(AvcError::InvalidSliceData(format!(
                    "intra_chroma_pred_mode {} out of range",
                    pred.intra_chroma_pred_mode
                )));
            }
        }
        return Ok(pred);
    }

    let num_part = num_mb_part(mb.mb_type);
    let range_l0 = ctx.header.num_ref_idx_l0_active_minus1 + 1;

    for part in 0..num_part as usize {
        if range_l0 > 1
            && mb_part_pred_mode(mb.mb_type, part as u32, slice_type) != PredMode::PredL1
        {
            let ref_idx = reader.read_te(range_l0)?;
            if ref_idx >= range_l0 {
                return Err(AvcError::InvalidSliceData(format!(
                    "ref_idx_l0 {} outside active list of {}",
                    ref_idx, range_l0
                )));
            }
            pred.ref_idx_l0[part] = ref_idx;
        }
    }

    for part in 0..num_part as usize {
        if mb_part_pred_mode(mb.mb_type, part as u32, slice_type) != PredMode::PredL1 {
            pred.mvd_l0[part][0] = reader.read_se()?;
            pred.mvd_l0[part][1] = reader.read_se()?;
        }
    }

    Ok(pred)
}
