//! CAVLC residual-block skeleton (clause 9.2).
//!
//! Consumes residual bits exactly without reconstructing coefficient
//! values. Only `TotalCoeff` per 4x4 block is retained, for the nC
//! predictor of later blocks.

use crate::bitreader::BitReader;
use crate::error::{AvcError, Result};
use crate::macroblock::{mb_part_pred_mode, Macroblock, PredMode, SliceContext};

/// Residual block categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockType {
    Luma4x4,
    Luma16x16Dc,
    Luma16x16Ac,
    ChromaDc,
    ChromaAc,
}

/// coeff_token length tables for nC classes 0..2, 2..4, 4..8
/// (Table 9-5), indexed `[class][trailing_ones][total_coeff]`.
const COEFF_TOKEN_LEN: [[[u8; 17]; 4]; 3] = [
    [
        [1, 6, 8, 9, 10, 11, 13, 13, 13, 14, 14, 15, 15, 16, 16, 16, 16],
        [0, 2, 6, 8, 9, 10, 11, 13, 13, 14, 14, 15, 15, 15, 16, 16, 16],
        [0, 0, 3, 7, 8, 9, 10, 11, 13, 13, 14, 14, 15, 15, 16, 16, 16],
        [0, 0, 0, 5, 6, 7, 8, 9, 10, 11, 13, 14, 14, 15, 15, 16, 16],
    ],
    [
        [2, 6, 6, 7, 8, 8, 9, 11, 11, 12, 12, 12, 13, 13, 13, 14, 14],
        [0, 2, 5, 6, 6, 7, 8, 9, 11, 11, 12, 12, 13, 13, 14, 14, 14],
        [0, 0, 3, 6, 6, 7, 8, 9, 11, 11, 12, 12, 13, 13, 13, 14, 14],
        [0, 0, 0, 4, 4, 5, 6, 6, 7, 9, 11, 11, 12, 13, 13, 13, 14],
    ],
    [
        [4, 6, 6, 6, 7, 7, 7, 7, 8, 8, 9, 9, 9, 10, 10, 10, 10],
        [0, 4, 5, 5, 5, 5, 6, 6, 7, 7, 8, 8, 9, 10, 10, 10, 10],
        [0, 0, 4, 5, 5, 5, 6, 6, 7, 7, 8, 8, 9, 10, 10, 10, 10],
        [0, 0, 0, 4, 4, 4, 4, 4, 5, 6, 7, 8, 8, 9, 10, 10, 10],
    ],
];

/// coeff_token code tables matching [`COEFF_TOKEN_LEN`].
const COEFF_TOKEN_CODE: [[[u8; 17]; 4]; 3] = [
    [
        [1, 5, 7, 7, 7, 7, 15, 11, 8, 15, 11, 15, 11, 15, 11, 7, 4],
        [0, 1, 4, 6, 6, 6, 6, 14, 10, 14, 10, 14, 10, 1, 14, 10, 6],
        [0, 0, 1, 5, 5, 5, 5, 5, 13, 9, 13, 9, 13, 9, 13, 9, 5],
        [0, 0, 0, 3, 3, 4, 4, 4, 4, 4, 12, 8, 12, 12, 8, 8, 4],
    ],
    [
        [3, 11, 7, 7, 7, 4, 7, 15, 11, 15, 11, 8, 15, 11, 7, 9, 7],
        [0, 2, 7, 10, 6, 6, 6, 6, 14, 10, 14, 10, 14, 10, 11, 8, 6],
        [0, 0, 3, 9, 5, 5, 5, 5, 13, 9, 13, 9, 13, 9, 6, 10, 5],
        [0, 0, 0, 5, 4, 6, 8, 4, 4, 4, 12, 8, 12, 12, 8, 1, 4],
    ],
    [
        [15, 15, 11, 8, 15, 11, 9, 8, 15, 11, 15, 11, 8, 13, 9, 5, 1],
        [0, 14, 15, 12, 10, 8, 14, 10, 14, 14, 10, 14, 10, 7, 12, 8, 4],
        [0, 0, 13, 14, 11, 9, 13, 9, 13, 10, 13, 9, 13, 9, 11, 7, 3],
        [0, 0, 0, 12, 11, 10, 9, 8, 13, 12, 12, 12, 8, 12, 10, 6, 2],
    ],
];

/// coeff_token tables for chroma DC, nC == -1 (4:2:0).
const COEFF_TOKEN_CDC420_LEN: [[u8; 5]; 4] = [
    [2, 6, 6, 6, 6],
    [0, 1, 6, 7, 8],
    [0, 0, 3, 7, 8],
    [0, 0, 0, 6, 7],
];
const COEFF_TOKEN_CDC420_CODE: [[u8; 5]; 4] = [
    [1, 7, 4, 3, 2],
    [0, 1, 6, 3, 3],
    [0, 0, 1, 2, 2],
    [0, 0, 0, 5, 0],
];

/// coeff_token tables for chroma DC, nC == -2 (4:2:2).
const COEFF_TOKEN_CDC422_LEN: [[u8; 9]; 4] = [
    [1, 7, 7, 9, 9, 10, 11, 12, 13],
    [0, 2, 7, 7, 9, 10, 11, 12, 12],
    [0, 0, 3, 7, 7, 9, 10, 11, 12],
    [0, 0, 0, 5, 6, 7, 7, 10, 11],
];
const COEFF_TOKEN_CDC422_CODE: [[u8; 9]; 4] = [
    [1, 15, 14, 7, 6, 7, 7, 7, 7],
    [0, 1, 13, 6, 5, 6, 6, 6, 6],
    [0, 0, 1, 12, 5, 5, 5, 5, 4],
    [0, 0, 0, 1, 4, 4, 4, 4, 4],
];

/// total_zeros tables for 4x4 blocks (Tables 9-7/9-8), indexed
/// `[total_coeff - 1][total_zeros]`.
const TOTAL_ZEROS_LEN: [[u8; 16]; 15] = [
    [1, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 9],
    [3, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 6, 6, 6, 6, 0],
    [4, 3, 3, 3, 4, 4, 3, 3, 4, 5, 5, 6, 5, 6, 0, 0],
    [5, 3, 4, 4, 3, 3, 3, 4, 3, 4, 5, 5, 5, 0, 0, 0],
    [4, 4, 4, 3, 3, 3, 3, 3, 4, 5, 4, 5, 0, 0, 0, 0],
    [6, 5, 3, 3, 3, 3, 3, 3, 4, 3, 6, 0, 0, 0, 0, 0],
    [6, 5, 3, 3, 3, 2, 3, 4, 3, 6, 0, 0, 0, 0, 0, 0],
    [6, 4, 5, 3, 2, 2, 3, 3, 6, 0, 0, 0, 0, 0, 0, 0],
    [6, 6, 4, 2, 2, 3, 2, 5, 0, 0, 0, 0, 0, 0, 0, 0],
    [5, 5, 3, 2, 2, 2, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 4, 3, 3, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 4, 2, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 3, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];
const TOTAL_ZEROS_CODE: [[u8; 16]; 15] = [
    [1, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 1],
    [7, 6, 5, 4, 3, 5, 4, 3, 2, 3, 2, 3, 2, 1, 0, 0],
    [5, 7, 6, 5, 4, 3, 5, 4, 3, 2, 1, 1, 0, 1, 0, 0],
    [3, 7, 5, 4, 6, 5, 4, 3, 3, 2, 2, 1, 0, 0, 0, 0],
    [5, 4, 3, 7, 6, 5, 4, 3, 2, 1, 1, 0, 0, 0, 0, 0],
    [1, 1, 7, 6, 5, 4, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0],
    [1, 1, 5, 4, 3, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 1, 3, 3, 2, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 0, 1, 3, 2, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 0, 1, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 2, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];

/// total_zeros tables for chroma DC, 4:2:0 (Table 9-9a).
const TOTAL_ZEROS_CDC420_LEN: [[u8; 4]; 3] =
    [[1, 2, 3, 3], [1, 2, 2, 0], [1, 1, 0, 0]];
const TOTAL_ZEROS_CDC420_CODE: [[u8; 4]; 3] =
    [[1, 1, 1, 0], [1, 1, 0, 0], [1, 0, 0, 0]];

/// total_zeros tables for chroma DC, 4:2:2 (Table 9-9b).
const TOTAL_ZEROS_CDC422_LEN: [[u8; 8]; 7] = [
    [1, 3, 3, 4, 4, 4, 5, 5],
    [3, 2, 3, 3, 3, 3, 3, 0],
    [3, 3, 2, 2, 3, 3, 0, 0],
    [3, 2, 2, 2, 3, 0, 0, 0],
    [2, 2, 2, 2, 0, 0, 0, 0],
    [2, 2, 1, 0, 0, 0, 0, 0],
    [1, 1, 0, 0, 0, 0, 0, 0],
];
const TOTAL_ZEROS_CDC422_CODE: [[u8; 8]; 7] = [
    [1, 2, 3, 2, 3, 1, 1, 0],
    [0, 1, 1, 4, 5, 6, 7, 0],
    [0, 1, 1, 2, 6, 7, 0, 0],
    [6, 0, 1, 2, 7, 0, 0, 0],
    [0, 1, 2, 3, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 0, 0, 0, 0, 0, 0],
];

/// run_before tables (Table 9-10), indexed `[min(zeros_left, 7) - 1]`.
const RUN_BEFORE_LEN: [[u8; 15]; 7] = [
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 2, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 3, 3, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 3, 3, 3, 3, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 3, 3, 3, 3, 3, 3, 4, 5, 6, 7, 8, 9, 10, 11],
];
const RUN_BEFORE_CODE: [[u8; 15]; 7] = [
    [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 3, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 0, 1, 3, 2, 5, 4, 0, 0, 0, 0, 0, 0, 0, 0],
    [7, 6, 5, 4, 3, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1],
];

/// Parse the residual of the macroblock at `mb_addr`. Its header fields
/// (mb_type, coded-block-pattern) must already be in the context.
pub(crate) fn parse_residual(
    reader: &mut BitReader,
    ctx: &mut SliceContext,
    mb_addr: u32,
) -> Result<()> {
    residual_luma(reader, ctx, mb_addr)?;
    residual_chroma(reader, ctx, mb_addr)
}

fn residual_luma(reader: &mut BitReader, ctx: &mut SliceContext, mb_addr: u32) -> Result<()> {
    let mb = &ctx.mbs[mb_addr as usize];
    let intra16 = mb_part_pred_mode(mb.mb_type, 0, ctx.header.slice_type)
        == PredMode::Intra16x16;
    let cbp_luma = mb.coded_block_pattern_luma;

    if intra16 {
        parse_block(reader, ctx, mb_addr, BlockType::Luma16x16Dc, 0, 0, 16)?;
    }

    for i8x8 in 0..4u32 {
        for i4x4 in 0..4u32 {
            let blk_idx = (i8x8 * 4 + i4x4) as usize;
            if cbp_luma & (1 << i8x8) != 0 {
                if intra16 {
                    parse_block(reader, ctx, mb_addr, BlockType::Luma16x16Ac, 0, blk_idx, 15)?;
                } else {
                    parse_block(reader, ctx, mb_addr, BlockType::Luma4x4, 0, blk_idx, 16)?;
                }
            } else {
                ctx.mbs[mb_addr as usize].total_coeffs_luma[blk_idx] = 0;
            }
        }
    }

    Ok(())
}

fn residual_chroma(reader: &mut BitReader, ctx: &mut SliceContext, mb_addr: u32) -> Result<()> {
    let chroma_array_type = ctx.sps.chroma_array_type();
    if chroma_array_type != 1 && chroma_array_type != 2 {
        return Ok(());
    }

    let num_c8x8 = 4
        / (ctx.sps.chroma_format_idc.sub_width_c() * ctx.sps.chroma_format_idc.sub_height_c());
    let cbp_chroma = ctx.mbs[mb_addr as usize].coded_block_pattern_chroma;

    for icbcr in 0..2 {
        if cbp_chroma & 3 != 0 {
            parse_block(
                reader,
                ctx,
                mb_addr,
                BlockType::ChromaDc,
                icbcr,
                0,
                4 * num_c8x8,
            )?;
        }
    }

    for icbcr in 0..2 {
        for i8x8 in 0..num_c8x8 {
            for i4x4 in 0..4 {
                let blk_idx = (i8x8 * 4 + i4x4) as usize;
                if cbp_chroma & 2 != 0 {
                    parse_block(reader, ctx, mb_addr, BlockType::ChromaAc, icbcr, blk_idx, 15)?;
                } else {
                    ctx.mbs[mb_addr as usize].total_coeffs_chroma[icbcr][blk_idx] = 0;
                }
            }
        }
    }

    Ok(())
}

/// Parse one residual_block_cavlc(), retaining only TotalCoeff.
fn parse_block(
    reader: &mut BitReader,
    ctx: &mut SliceContext,
    mb_addr: u32,
    block_type: BlockType,
    icbcr: usize,
    blk_idx: usize,
    max_coeffs: u32,
) -> Result<()> {
    let nc = predict_nc(ctx, mb_addr, block_type, icbcr, blk_idx)?;
    let (total_coeff, trailing_ones) = read_coeff_token(reader, nc)?;

    // Store TotalCoeff for later blocks' nC prediction
    {
        let mb = &mut ctx.mbs[mb_addr as usize];
        match block_type {
            BlockType::Luma4x4 | BlockType::Luma16x16Dc | BlockType::Luma16x16Ac => {
                mb.total_coeffs_luma[blk_idx] = total_coeff;
            }
            BlockType::ChromaAc => {
                mb.total_coeffs_chroma[icbcr][blk_idx] = total_coeff;
            }
            BlockType::ChromaDc => {}
        }
    }

    if total_coeff as u32 > max_coeffs {
        return Err(AvcError::InvalidSliceData(format!(
            "coeff_token TotalCoeff {} exceeds block capacity {}",
            total_coeff, max_coeffs
        )));
    }
    if total_coeff == 0 {
        return Ok(());
    }

    // 9.2.2 level information
    let mut suffix_length: u32 = if total_coeff > 10 && trailing_ones < 3 {
        1
    } else {
        0
    };

    for i in 0..total_coeff {
        if i < trailing_ones {
            let _trailing_ones_sign_flag = reader.read_bit()?;
        } else {
            let level_prefix = read_level_prefix(reader)?;
            let mut level_code = (level_prefix.min(15) as i32) << suffix_length;

            if suffix_length > 0 || level_prefix >= 14 {
                let level_suffix_size = if level_prefix == 14 && suffix_length == 0 {
                    4
                } else if level_prefix > 14 {
                    level_prefix - 3
                } else {
                    suffix_length
                };
                level_code += reader.read_bits(level_suffix_size as u8)? as i32;
            }

            if level_prefix >= 15 && suffix_length == 0 {
                level_code += 15;
            }
            if level_prefix >= 16 {
                level_code += (1 << (level_prefix - 3)) - 4096;
            }
            if i == trailing_ones && trailing_ones < 3 {
                level_code += 2;
            }

            let level = if level_code % 2 == 0 {
                (level_code + 2) >> 1
            } else {
                (-level_code - 1) >> 1
            };

            if suffix_length == 0 {
                suffix_length = 1;
            }
            if level.abs() > (3 << (suffix_length - 1)) && suffix_length < 6 {
                suffix_length += 1;
            }
        }
    }

    // 9.2.3 run information
    let mut zeros_left: i32 = 0;
    if (total_coeff as u32) < max_coeffs {
        let vlc_num = (total_coeff - 1) as usize;
        zeros_left = match block_type {
            BlockType::ChromaDc => {
                let chroma_array_type = ctx.sps.chroma_array_type();
                if chroma_array_type == 1 {
                    read_vlc(
                        reader,
                        &TOTAL_ZEROS_CDC420_LEN[vlc_num],
                        &TOTAL_ZEROS_CDC420_CODE[vlc_num],
                    )?
                } else {
                    read_vlc(
                        reader,
                        &TOTAL_ZEROS_CDC422_LEN[vlc_num],
                        &TOTAL_ZEROS_CDC422_CODE[vlc_num],
                    )?
                }
            }
            _ => read_vlc(
                reader,
                &TOTAL_ZEROS_LEN[vlc_num],
                &TOTAL_ZEROS_CODE[vlc_num],
            )?,
        } as i32;
    }

    for _ in 0..total_coeff - 1 {
        if zeros_left > 0 {
            let vlc_num = (zeros_left - 1).min(6) as usize;
            let run_before =
                read_vlc(reader, &RUN_BEFORE_LEN[vlc_num], &RUN_BEFORE_CODE[vlc_num])?;
            zeros_left -= run_before as i32;
        }
    }

    Ok(())
}

/// 9.2.1 nC predictor from neighbouring block TotalCoeff values.
fn predict_nc(
    ctx: &SliceContext,
    mb_addr: u32,
    block_type: BlockType,
    icbcr: usize,
    blk_idx: usize,
) -> Result<i32> {
    if block_type == BlockType::ChromaDc {
        return Ok(if ctx.sps.chroma_array_type() == 1 {
            -1
        } else {
            -2
        });
    }

    let mb = &ctx.mbs[mb_addr as usize];
    let luma = block_type != BlockType::ChromaAc;

    let neighbour_a = block_neighbour(ctx, mb, blk_idx, luma, -1, 0);
    let neighbour_b = block_neighbour(ctx, mb, blk_idx, luma, 0, -1);

    let count = |loc: Option<(usize, usize)>| -> Option<i32> {
        loc.map(|(addr, blk)| {
            let n = &ctx.mbs[addr];
            if luma {
                n.total_coeffs_luma[blk] as i32
            } else {
                n.total_coeffs_chroma[icbcr][blk] as i32
            }
        })
    };

    Ok(match (count(neighbour_a), count(neighbour_b)) {
        (Some(na), Some(nb)) => (na + nb + 1) >> 1,
        (Some(na), None) => na,
        (None, Some(nb)) => nb,
        (None, None) => 0,
    })
}

/// 6.4.3 inverse 4x4 luma block scan.
fn luma_block_position(blk_idx: usize) -> (i32, i32) {
    let x = ((blk_idx / 4) % 2) * 8 + (blk_idx % 2) * 4;
    let y = (blk_idx / 8) * 8 + ((blk_idx % 4) / 2) * 4;
    (x as i32, y as i32)
}

/// 6.4.12 neighbouring 4x4 block location: resolves the block at
/// `(dx, dy)` from the top-left of `blk_idx` to a macroblock address and
/// block index, or None when outside the picture.
fn block_neighbour(
    ctx: &SliceContext,
    mb: &Macroblock,
    blk_idx: usize,
    luma: bool,
    dx: i32,
    dy: i32,
) -> Option<(usize, usize)> {
    let (max_w, max_h, (x, y)) = if luma {
        (16i32, 16i32, luma_block_position(blk_idx))
    } else {
        let w = ctx.sps.mb_width_c() as i32;
        let h = ctx.sps.mb_height_c() as i32;
        (w, h, (((blk_idx as i32) % 2) * 4, ((blk_idx as i32) / 2) * 4))
    };

    let xn = x + dx;
    let yn = y + dy;

    // Table 6-3
    let mb_addr_n = if yn >= 0 {
        if xn < 0 {
            mb.mb_addr_a
        } else if xn < max_w {
            mb.mb_addr as i32
        } else {
            return None;
        }
    } else if xn < 0 {
        mb.mb_addr_d
    } else if xn < max_w {
        mb.mb_addr_b
    } else {
        mb.mb_addr_c
    };

    if mb_addr_n < 0 {
        return None;
    }

    let xw = (xn + max_w) % max_w;
    let yw = (yn + max_h) % max_h;

    let blk_n = if luma {
        8 * (yw / 8) + 4 * (xw / 8) + 2 * ((yw % 8) / 4) + (xw % 8) / 4
    } else {
        // 6.4.12.2, in the closed form the reference decoders use
        2 * ((yw + 4) / 8) + (xw + 4) / 8
    };

    Some((mb_addr_n as usize, blk_n as usize))
}

/// 9.2.1 coeff_token decode; returns (TotalCoeff, TrailingOnes).
fn read_coeff_token(reader: &mut BitReader, nc: i32) -> Result<(u8, u8)> {
    if nc >= 8 {
        let code = reader.read_bits(6)?;
        let mut total_coeff = (code >> 2) as u8;
        let mut trailing_ones = (code & 3) as u8;
        if total_coeff == 0 && trailing_ones == 3 {
            trailing_ones = 0;
        } else {
            total_coeff += 1;
        }
        return Ok((total_coeff, trailing_ones));
    }

    let class = if nc < 2 {
        0
    } else if nc < 4 {
        1
    } else {
        2
    };

    let available = reader.remaining_bits();
    for trailing_ones in 0..4usize {
        let (len_row, code_row): (&[u8], &[u8]) = match nc {
            -2 => (
                &COEFF_TOKEN_CDC422_LEN[trailing_ones],
                &COEFF_TOKEN_CDC422_CODE[trailing_ones],
            ),
            -1 => (
                &COEFF_TOKEN_CDC420_LEN[trailing_ones],
                &COEFF_TOKEN_CDC420_CODE[trailing_ones],
            ),
            _ => (
                &COEFF_TOKEN_LEN[class][trailing_ones],
                &COEFF_TOKEN_CODE[class][trailing_ones],
            ),
        };
        for total_coeff in 0..len_row.len() {
            let length = len_row[total_coeff];
            if length == 0 || length as usize > available {
                continue;
            }
            if reader.peek_bits(length)? == code_row[total_coeff] as u32 {
                reader.skip_bits(length as usize)?;
                return Ok((total_coeff as u8, trailing_ones as u8));
            }
        }
    }

    Err(AvcError::InvalidSliceData(
        "coeff_token lookup failed".to_string(),
    ))
}

/// Unary level_prefix (9.2.2).
fn read_level_prefix(reader: &mut BitReader) -> Result<u32> {
    let mut leading_zeros = 0u32;
    while !reader.read_bit()? {
        leading_zeros += 1;
        if leading_zeros > 32 {
            return Err(AvcError::InvalidSliceData(
                "level_prefix exceeds 32 leading zeros".to_string(),
            ));
        }
    }
    Ok(leading_zeros)
}

/// Linear-scan VLC decode: returns the index of the matched codeword.
fn read_vlc(reader: &mut BitReader, len_tab: &[u8], code_tab: &[u8]) -> Result<u32> {
    let available = reader.remaining_bits();
    for (idx, (&length, &code)) in len_tab.iter().zip(code_tab.iter()).enumerate() {
        if length == 0 || length as usize > available {
            continue;
        }
        if reader.peek_bits(length)? == code as u32 {
            reader.skip_bits(length as usize)?;
            return Ok(idx as u32);
        }
    }
    Err(AvcError::InvalidSliceData(
        "variable-length code lookup failed".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_block_positions() {
        assert_eq!(luma_block_position(0), (0, 0));
        assert_eq!(luma_block_position(1), (4, 0));
        assert_eq!(luma_block_position(2), (0, 4));
        assert_eq!(luma_block_position(3), (4, 4));
        assert_eq!(luma_block_position(4), (8, 0));
        assert_eq!(luma_block_position(7), (12, 4));
        assert_eq!(luma_block_position(8), (0, 8));
        assert_eq!(luma_block_position(15), (12, 12));
    }

    #[test]
    fn test_coeff_token_low_nc() {
        // TotalCoeff=0, TrailingOnes=0 for nC in [0,2) is the single bit 1
        let data = [0b10000000];
        let mut reader = BitReader::new(&data);
        assert_eq!(read_coeff_token(&mut reader, 0).unwrap(), (0, 0));

        // TotalCoeff=1, TrailingOnes=1 is 01
        let data = [0b01000000];
        let mut reader = BitReader::new(&data);
        assert_eq!(read_coeff_token(&mut reader, 0).unwrap(), (1, 1));

        // TotalCoeff=2, TrailingOnes=2 is 001
        let data = [0b00100000];
        let mut reader = BitReader::new(&data);
        assert_eq!(read_coeff_token(&mut reader, 1).unwrap(), (2, 2));
    }

    #[test]
    fn test_coeff_token_chroma_dc() {
        // 4:2:0 chroma DC: TotalCoeff=0 is 01
        let data = [0b01000000];
        let mut reader = BitReader::new(&data);
        assert_eq!(read_coeff_token(&mut reader, -1).unwrap(), (0, 0));

        // TotalCoeff=1, TrailingOnes=1 is 1
        let data = [0b10000000];
        let mut reader = BitReader::new(&data);
        assert_eq!(read_coeff_token(&mut reader, -1).unwrap(), (1, 1));
    }

    #[test]
    fn test_coeff_token_high_nc_flc() {
        // nC >= 8: 6-bit FLC, 000011 -> TotalCoeff=0, TrailingOnes=3
        // which decodes as (0, 0)
        let data = [0b00001100];
        let mut reader = BitReader::new(&data);
        assert_eq!(read_coeff_token(&mut reader, 8).unwrap(), (0, 0));

        // 000000 -> TotalCoeff=1, TrailingOnes=0
        let data = [0b00000000];
        let mut reader = BitReader::new(&data);
        assert_eq!(read_coeff_token(&mut reader, 8).unwrap(), (1, 0));
    }

    #[test]
    fn test_level_prefix() {
        let data = [0b00010000];
        let mut reader = BitReader::new(&data);
        assert_eq!(read_level_prefix(&mut reader).unwrap(), 3);
    }

    #[test]
    fn test_run_before_table() {
        // zeros_left=1 (vlc 0): bit 1 -> run 0, bit 0 -> run 1
        let data = [0b10000000];
        let mut reader = BitReader::new(&data);
        assert_eq!(
            read_vlc(&mut reader, &RUN_BEFORE_LEN[0], &RUN_BEFORE_CODE[0]).unwrap(),
            0
        );

        let data = [0b00000000];
        let mut reader = BitReader::new(&data);
        assert_eq!(
            read_vlc(&mut reader, &RUN_BEFORE_LEN[0], &RUN_BEFORE_CODE[0]).unwrap(),
            1
        );
    }

    #[test]
    fn test_total_zeros_table() {
        // TotalCoeff=1 (vlc 0): total_zeros=0 is 1, total_zeros=1 is 011
        let data = [0b10110000];
        let mut reader = BitReader::new(&data);
        assert_eq!(
            read_vlc(&mut reader, &TOTAL_ZEROS_LEN[0], &TOTAL_ZEROS_CODE[0]).unwrap(),
            0
        );
        assert_eq!(
            read_vlc(&mut reader, &TOTAL_ZEROS_LEN[0], &TOTAL_ZEROS_CODE[0]).unwrap(),
            1
        );
    }
}
