//! Motion-vector derivation for P slices (clause 8.4.1).
//!
//! Runs after all macroblocks of a slice are parsed. Walks the raster
//! scan, gathers the A/B/C neighbour predictors of each partition,
//! applies the P_Skip override and the 16x8/8x16 shape shortcuts, and
//! falls back to the component-wise median rule. List 1 stays zero; B
//! slices are outside the supported subset.

use crate::error::{AvcError, Result};
use crate::macroblock::{
    mb_part_height, mb_part_pred_mode, mb_part_width, num_mb_part, Macroblock, PredMode,
    SliceContext, P_8X8, P_8X8_REF0, P_SKIP,
};
use mvscan_core::{MotionVector, MvGrid};

/// Neighbour predictors of one partition: List 0 vectors and reference
/// indices of A, B and C (with D substituted when C is unavailable).
#[derive(Debug, Clone, Copy)]
struct NeighbourMotion {
    mv_a: [i32; 2],
    mv_b: [i32; 2],
    mv_c: [i32; 2],
    ref_a: i32,
    ref_b: i32,
    ref_c: i32,
}

/// Derive the List 0 motion vector of every macroblock partition in the
/// parsed slice.
pub fn derive_motion_vectors(ctx: &mut SliceContext) -> Result<()> {
    if ctx.sps.chroma_array_type() != 1 {
        return Err(AvcError::NotImplemented(format!(
            "chroma_array_type {}",
            ctx.sps.chroma_array_type()
        )));
    }

    for addr in 0..ctx.mbs.len() {
        if ctx.mbs[addr].slice_type.is_b() {
            return Err(AvcError::NotImplemented("B slice".to_string()));
        }
        let mb_type = ctx.mbs[addr].mb_type;
        if mb_type == P_8X8 || mb_type == P_8X8_REF0 {
            return Err(AvcError::Unsupported(
                "P_8x8 sub-macroblock partitions".to_string(),
            ));
        }

        let num_parts = num_mb_part(mb_type) as usize;
        let mut derived: [([i32; 2], i32, bool); 4] = [([0, 0], -1, false); 4];

        {
            let mb = &ctx.mbs[addr];
            for (part_idx, slot) in derived.iter_mut().enumerate().take(num_parts) {
                *slot = derive_partition(&ctx.mbs, mb, part_idx as u32)?;
            }
        }

        let mb = &mut ctx.mbs[addr];
        for (part_idx, (mv, ref_idx, pred_flag)) in derived.iter().enumerate().take(num_parts) {
            mb.mv_l[0][part_idx][0] = *mv;
            mb.ref_idx_l[0][part_idx] = *ref_idx;
            mb.pred_flag_l[0][part_idx] = *pred_flag;
            // List 1 is inactive for P slices
            mb.ref_idx_l[1][part_idx] = -1;
            mb.pred_flag_l[1][part_idx] = false;
        }
    }

    Ok(())
}

/// Derive `(mvL0, refIdxL0, predFlagL0)` of one partition.
fn derive_partition(
    mbs: &[Macroblock],
    mb: &Macroblock,
    part_idx: u32,
) -> Result<([i32; 2], i32, bool)> {
    let slice_type = mb.slice_type;

    if mb.mb_type == P_SKIP {
        // 8.4.1.1: zero override when either hard neighbour is missing
        // or predicts a stationary block from the nearest reference
        let n = neighbour_motion(mbs, mb, 0);
        let mv = if mb.mb_addr_a == -1
            || mb.mb_addr_b == -1
            || (n.ref_a == 0 && n.mv_a == [0, 0])
            || (n.ref_b == 0 && n.mv_b == [0, 0])
        {
            [0, 0]
        } else {
            predict_luma_mv(mb.mb_type, part_idx, 0, &n)
        };
        return Ok((mv, 0, true));
    }

    let pred_mode = mb_part_pred_mode(mb.mb_type, part_idx, slice_type);
    if pred_mode != PredMode::PredL0 && pred_mode != PredMode::BiPred {
        return Ok(([0, 0], -1, false));
    }

    let pred = mb.mb_pred.as_ref().ok_or_else(|| {
        AvcError::InvalidSliceData("inter macroblock without prediction record".to_string())
    })?;
    let ref_idx = pred.ref_idx_l0[part_idx as usize] as i32;

    let n = neighbour_motion(mbs, mb, 0);
    let mvp = predict_luma_mv(mb.mb_type, part_idx, ref_idx, &n);
    let mv = [
        mvp[0] + pred.mvd_l0[part_idx as usize][0],
        mvp[1] + pred.mvd_l0[part_idx as usize][1],
    ];

    Ok((mv, ref_idx, true))
}

/// Gather the A/B/C neighbour vectors and reference indices for the
/// given list. Unavailable, intra, or unpredicted neighbours contribute
/// a zero vector with reference index -1; D stands in for an
/// unavailable C.
fn neighbour_motion(mbs: &[Macroblock], mb: &Macroblock, list: usize) -> NeighbourMotion {
    let (addr_c, part_c) = if mb.mb_addr_c == -1 {
        (mb.mb_addr_d, mb.mb_part_idx_d)
    } else {
        (mb.mb_addr_c, mb.mb_part_idx_c)
    };

    let fetch = |addr: i32, part: u8| -> ([i32; 2], i32) {
        if addr < 0 {
            return ([0, 0], -1);
        }
        let n = &mbs[addr as usize];
        if n.is_intra() || !n.pred_flag_l[list][part as usize] {
            return ([0, 0], -1);
        }
        (
            n.mv_l[list][part as usize][0],
            n.ref_idx_l[list][part as usize],
        )
    };

    let (mv_a, ref_a) = fetch(mb.mb_addr_a, mb.mb_part_idx_a);
    let (mv_b, ref_b) = fetch(mb.mb_addr_b, mb.mb_part_idx_b);
    let (mv_c, ref_c) = fetch(addr_c, part_c);

    NeighbourMotion {
        mv_a,
        mv_b,
        mv_c,
        ref_a,
        ref_b,
        ref_c,
    }
}

/// 8.4.1.3: predicted luma motion vector of one partition.
fn predict_luma_mv(mb_type: u32, part_idx: u32, ref_idx: i32, n: &NeighbourMotion) -> [i32; 2] {
    let part_width = mb_part_width(mb_type);
    let part_height = mb_part_height(mb_type);

    // Partition-shape shortcuts. 16x8 partitions take the designated
    // neighbour only on a reference match; 8x16 partitions take it
    // unconditionally.
    if part_width == 16 && part_height == 8 {
        if part_idx == 0 && n.ref_b == ref_idx {
            return n.mv_b;
        }
        if part_idx == 1 && n.ref_a == ref_idx {
            return n.mv_a;
        }
    } else if part_width == 8 && part_height == 16 {
        if part_idx == 0 {
            return n.mv_a;
        }
        if part_idx == 1 {
            return n.mv_c;
        }
    }

    // 8.4.1.3.1: a single reference-matching neighbour wins; otherwise
    // the component-wise median
    let matches = [
        (n.ref_a == ref_idx, n.mv_a),
        (n.ref_b == ref_idx, n.mv_b),
        (n.ref_c == ref_idx, n.mv_c),
    ];
    let matching: Vec<[i32; 2]> = matches
        .iter()
        .filter(|(matched, _)| *matched)
        .map(|(_, mv)| *mv)
        .collect();
    if matching.len() == 1 {
        return matching[0];
    }

    [
        median3(n.mv_a[0], n.mv_b[0], n.mv_c[0]),
        median3(n.mv_a[1], n.mv_b[1], n.mv_c[1]),
    ]
}

fn median3(a: i32, b: i32, c: i32) -> i32 {
    i32::max(i32::min(a, b), i32::min(i32::max(a, b), c))
}

/// Emit the output grid from a fully derived slice context. Vectors are
/// scaled from quarter-sample units to sign-negated integer pixels.
pub fn build_grid(ctx: &SliceContext) -> MvGrid {
    let mut grid = MvGrid::new(
        ctx.sps.display_width(),
        ctx.sps.display_height(),
        ctx.pic_width_in_mbs(),
        ctx.pic_height_in_mbs(),
        true,
    );

    for mb in &ctx.mbs {
        let mv = MotionVector::new(
            (
                (-mb.mv_l[0][0][0][0] / 4) as i16,
                (-mb.mv_l[0][0][0][1] / 4) as i16,
            ),
            mb.mb_x,
            mb.mb_y,
        );
        grid.set(mb.mb_x, mb.mb_y, mv);
    }

    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macroblock::{MbPred, P_L0_16X16, P_L0_L0_16X8, P_L0_L0_8X16};
    use crate::pps::tests::default_pps;
    use crate::slice::tests::minimal_header;
    use crate::slice::SliceType;
    use crate::sps::tests::baseline_sps;

    #[test]
    fn test_median3() {
        assert_eq!(median3(1, 2, 3), 2);
        assert_eq!(median3(3, 1, 2), 2);
        assert_eq!(median3(-4, 0, 4), 0);
        assert_eq!(median3(5, 5, 1), 5);
    }

    fn skip_context<'a>(
        sps: &'a crate::sps::Sps,
        pps: &'a crate::pps::Pps,
    ) -> SliceContext<'a> {
        let mut ctx = SliceContext::new(sps, pps, minimal_header(SliceType::P));
        let w = ctx.pic_width_in_mbs();
        ctx.mbs = (0..ctx.pic_size_in_mbs())
            .map(|addr| Macroblock::new_skip(addr, SliceType::P, w))
            .collect();
        ctx
    }

    /// Same as `skip_context` but with two active List 0 references.
    fn skip_context_two_refs<'a>(
        sps: &'a crate::sps::Sps,
        pps: &'a crate::pps::Pps,
    ) -> SliceContext<'a> {
        let mut header = minimal_header(SliceType::P);
        header.num_ref_idx_l0_active_minus1 = 1;
        let mut ctx = SliceContext::new(sps, pps, header);
        let w = ctx.pic_width_in_mbs();
        ctx.mbs = (0..ctx.pic_size_in_mbs())
            .map(|addr| Macroblock::new_skip(addr, SliceType::P, w))
            .collect();
        ctx
    }

    #[test]
    fn test_all_skip_picture_is_zero() {
        let sps = baseline_sps(2, 2);
        let pps = default_pps();
        let mut ctx = skip_context(&sps, &pps);

        derive_motion_vectors(&mut ctx).unwrap();
        for mb in &ctx.mbs {
            assert_eq!(mb.mv_l[0][0][0], [0, 0]);
            assert_eq!(mb.ref_idx_l[0][0], 0);
            assert!(mb.pred_flag_l[0][0]);
        }

        let grid = build_grid(&ctx);
        assert!(grid.p_frame());
        assert!(grid.vectors().iter().all(|mv| mv.mvl0 == (0, 0)));
    }

    #[test]
    fn test_skip_inherits_median_motion() {
        // 3x2 picture; top row moves uniformly, so the bottom-middle
        // skip macroblock predicts the shared motion
        let sps = baseline_sps(3, 2);
        let pps = default_pps();
        let mut ctx = skip_context(&sps, &pps);

        // Top-left MB carries the motion; the rest of the coded MBs have
        // zero differentials and inherit it through prediction
        for addr in [0usize, 1, 2, 3] {
            let mb = &mut ctx.mbs[addr];
            mb.mb_type = P_L0_16X16;
            let mut pred = MbPred::default();
            if addr == 0 {
                pred.mvd_l0[0] = [8, -4];
            }
            mb.mb_pred = Some(pred);
        }

        derive_motion_vectors(&mut ctx).unwrap();

        // Skip MB at (1, 1): A=(8,-4) nonzero, B nonzero, general rule
        let mb = &ctx.mbs[4];
        assert_eq!(mb.mb_type, P_SKIP);
        assert_eq!(mb.mv_l[0][0][0], [8, -4]);
    }

    #[test]
    fn test_skip_zero_override_at_picture_edge() {
        let sps = baseline_sps(3, 2);
        let pps = default_pps();
        let mut ctx = skip_context(&sps, &pps);

        // The top-left skip MB derives zero because A and B are
        // unavailable, regardless of what the rest of the picture does
        derive_motion_vectors(&mut ctx).unwrap();
        assert_eq!(ctx.mbs[0].mv_l[0][0][0], [0, 0]);
    }

    #[test]
    fn test_16x8_partition_uses_upper_neighbour() {
        let sps = baseline_sps(1, 2);
        let pps = default_pps();
        let mut ctx = skip_context(&sps, &pps);

        // Top MB: 16x16 with mv (4, 0)
        let mb = &mut ctx.mbs[0];
        mb.mb_type = P_L0_16X16;
        let mut pred = MbPred::default();
        pred.mvd_l0[0] = [4, 0];
        mb.mb_pred = Some(pred);

        // Bottom MB: 16x8, zero mvd; partition 0 takes B's vector
        let mb = &mut ctx.mbs[1];
        mb.mb_type = P_L0_L0_16X8;
        mb.mb_pred = Some(MbPred::default());

        derive_motion_vectors(&mut ctx).unwrap();

        let mb = &ctx.mbs[1];
        assert_eq!(mb.mv_l[0][0][0], [4, 0]);
        // Partition 1: A is unavailable at the left edge so the shape
        // shortcut misses; B is the single reference-matching neighbour
        assert_eq!(mb.mv_l[0][1][0], [4, 0]);
    }

    #[test]
    fn test_16x8_reference_mismatch_falls_back_to_median() {
        let sps = baseline_sps(1, 2);
        let pps = default_pps();
        let mut ctx = skip_context_two_refs(&sps, &pps);

        // Top MB predicts from reference 1 with motion (4, 0)
        let mb = &mut ctx.mbs[0];
        mb.mb_type = P_L0_16X16;
        let mut pred = MbPred::default();
        pred.ref_idx_l0[0] = 1;
        pred.mvd_l0[0] = [4, 0];
        mb.mb_pred = Some(pred);

        // Bottom MB: 16x8 from reference 0; the shortcut needs B to
        // share the reference, so both partitions fall to the general
        // rule, and with no reference-matching neighbour that is the
        // median over (0,0), (4,0), (0,0)
        let mb = &mut ctx.mbs[1];
        mb.mb_type = P_L0_L0_16X8;
        mb.mb_pred = Some(MbPred::default());

        derive_motion_vectors(&mut ctx).unwrap();

        let mb = &ctx.mbs[1];
        assert_eq!(mb.ref_idx_l[0][0], 0);
        assert_eq!(mb.mv_l[0][0][0], [0, 0]);
        assert_eq!(mb.mv_l[0][1][0], [0, 0]);
        // The upstream MB keeps its own motion on reference 1
        assert_eq!(ctx.mbs[0].ref_idx_l[0][0], 1);
        assert_eq!(ctx.mbs[0].mv_l[0][0][0], [4, 0]);
    }

    #[test]
    fn test_8x16_takes_designated_neighbour_unconditionally() {
        let sps = baseline_sps(2, 1);
        let pps = default_pps();
        let mut ctx = skip_context_two_refs(&sps, &pps);

        // Left MB predicts from reference 1 with motion (-8, 4)
        let mb = &mut ctx.mbs[0];
        mb.mb_type = P_L0_16X16;
        let mut pred = MbPred::default();
        pred.ref_idx_l0[0] = 1;
        pred.mvd_l0[0] = [-8, 4];
        mb.mb_pred = Some(pred);

        // Right MB: 8x16 from reference 0 with zero differentials
        let mb = &mut ctx.mbs[1];
        mb.mb_type = P_L0_L0_8X16;
        mb.mb_pred = Some(MbPred::default());

        derive_motion_vectors(&mut ctx).unwrap();

        let mb = &ctx.mbs[1];
        // Partition 0 takes A's vector despite the reference mismatch
        assert_eq!(mb.mv_l[0][0][0], [-8, 4]);
        // Partition 1 takes C, which is outside the picture
        assert_eq!(mb.mv_l[0][1][0], [0, 0]);
    }

    #[test]
    fn test_grid_scaling_and_sign() {
        let sps = baseline_sps(1, 1);
        let pps = default_pps();
        let mut ctx = skip_context(&sps, &pps);

        let mb = &mut ctx.mbs[0];
        mb.mb_type = P_L0_16X16;
        let mut pred = MbPred::default();
        // quarter-sample motion of (8, -12) maps to (-2, 3) pixels
        pred.mvd_l0[0] = [8, -12];
        mb.mb_pred = Some(pred);

        derive_motion_vectors(&mut ctx).unwrap();
        let grid = build_grid(&ctx);
        let mv = grid.get(0, 0).unwrap();
        assert_eq!(mv.mvl0, (-2, 3));
        assert_eq!(mv.energy, 13);
    }

    #[test]
    fn test_b_slice_rejected() {
        let sps = baseline_sps(1, 1);
        let pps = default_pps();
        let mut ctx = SliceContext::new(&sps, &pps, minimal_header(SliceType::B));
        ctx.mbs = vec![Macroblock::new_skip(0, SliceType::B, 1)];
        assert!(matches!(
            derive_motion_vectors(&mut ctx),
            Err(AvcError::NotImplemented(_))
        ));
    }
}
