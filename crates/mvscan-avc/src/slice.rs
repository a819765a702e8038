//! H.264/AVC slice header parsing.

use crate::bitreader::BitReader;
use crate::error::{AvcError, Result};
use crate::nal::NalUnitHeader;
use crate::pps::Pps;
use crate::sps::{ChromaFormat, Sps};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Slice type (slice_type % 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceType {
    /// P slice (predictive)
    P = 0,
    /// B slice (bi-predictive)
    B = 1,
    /// I slice (intra)
    I = 2,
    /// SP slice (switching P)
    Sp = 3,
    /// SI slice (switching I)
    Si = 4,
}

impl SliceType {
    /// Create from raw value.
    pub fn from_u32(value: u32) -> Self {
        match value % 5 {
            0 => SliceType::P,
            1 => SliceType::B,
            2 => SliceType::I,
            3 => SliceType::Sp,
            _ => SliceType::Si,
        }
    }

    /// Check if this is an intra slice.
    pub fn is_intra(&self) -> bool {
        matches!(self, SliceType::I | SliceType::Si)
    }

    /// Check if this is a B slice.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Check if this is a P slice.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P | SliceType::Sp)
    }

    /// Get name.
    pub fn name(&self) -> &'static str {
        match self {
            SliceType::P => "P",
            SliceType::B => "B",
            SliceType::I => "I",
            SliceType::Sp => "SP",
            SliceType::Si => "SI",
        }
    }
}

/// Reference picture list modification entries, kept only to keep the bit
/// cursor aligned with the slice data that follows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefPicListModification {
    /// (modification_of_pic_nums_idc, value) pairs
    pub modifications: Vec<(u32, u32)>,
}

/// Decoded reference picture marking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecRefPicMarking {
    /// no_output_of_prior_pics_flag
    pub no_output_of_prior_pics_flag: bool,
    /// long_term_reference_flag
    pub long_term_reference_flag: bool,
    /// adaptive_ref_pic_marking_mode_flag
    pub adaptive_ref_pic_marking_mode_flag: bool,
    /// (operation, diff_of_pic_nums, long_term_idx) triples
    pub mmco_operations: Vec<(u32, u32, u32)>,
}

/// Slice header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceHeader {
    /// first_mb_in_slice
    pub first_mb_in_slice: u32,
    /// slice_type
    pub slice_type: SliceType,
    /// pic_parameter_set_id
    pub pic_parameter_set_id: u8,
    /// colour_plane_id (if separate_colour_plane_flag)
    pub colour_plane_id: u8,
    /// frame_num
    pub frame_num: u32,
    /// field_pic_flag
    pub field_pic_flag: bool,
    /// bottom_field_flag
    pub bottom_field_flag: bool,
    /// idr_pic_id (for IDR slices)
    pub idr_pic_id: u32,
    /// pic_order_cnt_lsb (for poc_type == 0)
    pub pic_order_cnt_lsb: u32,
    /// delta_pic_order_cnt_bottom
    pub delta_pic_order_cnt_bottom: i32,
    /// delta_pic_order_cnt[2]
    pub delta_pic_order_cnt: [i32; 2],
    /// redundant_pic_cnt
    pub redundant_pic_cnt: u32,
    /// direct_spatial_mv_pred_flag (B slices)
    pub direct_spatial_mv_pred_flag: bool,
    /// num_ref_idx_active_override_flag
    pub num_ref_idx_active_override_flag: bool,
    /// num_ref_idx_l0_active_minus1
    pub num_ref_idx_l0_active_minus1: u32,
    /// num_ref_idx_l1_active_minus1
    pub num_ref_idx_l1_active_minus1: u32,
    /// Reference picture list modification L0
    pub ref_pic_list_modification_l0: RefPicListModification,
    /// Reference picture list modification L1
    pub ref_pic_list_modification_l1: RefPicListModification,
    /// Decoded reference picture marking
    pub dec_ref_pic_marking: DecRefPicMarking,
    /// slice_qp_delta
    pub slice_qp_delta: i32,
    /// sp_for_switch_flag
    pub sp_for_switch_flag: bool,
    /// slice_qs_delta
    pub slice_qs_delta: i32,
    /// disable_deblocking_filter_idc
    pub disable_deblocking_filter_idc: u32,
    /// slice_alpha_c0_offset_div2
    pub slice_alpha_c0_offset_div2: i32,
    /// slice_beta_offset_div2
    pub slice_beta_offset_div2: i32,
    /// slice_group_change_cycle
    pub slice_group_change_cycle: u32,
}

impl SliceHeader {
    /// Get slice QP.
    pub fn qp(&self, pps: &Pps) -> i32 {
        26 + pps.pic_init_qp_minus26 + self.slice_qp_delta
    }

    /// Check if this is the first slice in picture.
    pub fn is_first_slice(&self) -> bool {
        self.first_mb_in_slice == 0
    }
}

/// Parse a slice header from the reader positioned at the start of the
/// slice RBSP. The reader is left at the first bit of the slice data.
pub fn parse_slice_header<'a>(
    reader: &mut BitReader,
    sps_map: &'a HashMap<u8, Sps>,
    pps_map: &'a HashMap<u8, Pps>,
    nal: &NalUnitHeader,
) -> Result<(SliceHeader, &'a Sps, &'a Pps)> {
    let first_mb_in_slice = reader.read_ue()?;
    let slice_type = SliceType::from_u32(reader.read_ue()?);
    let pic_parameter_set_id = reader.read_ue()? as u8;

    let pps = pps_map.get(&pic_parameter_set_id).ok_or_else(|| {
        AvcError::MissingParameterSet(format!("PPS {} not found", pic_parameter_set_id))
    })?;
    let sps = sps_map.get(&pps.seq_parameter_set_id).ok_or_else(|| {
        AvcError::MissingParameterSet(format!("SPS {} not found", pps.seq_parameter_set_id))
    })?;

    let mut colour_plane_id = 0;
    if sps.separate_colour_plane_flag {
        colour_plane_id = reader.read_bits(2)? as u8;
    }

    let frame_num = reader.read_bits(sps.log2_max_frame_num_minus4 + 4)?;

    let mut field_pic_flag = false;
    let mut bottom_field_flag = false;
    if !sps.frame_mbs_only_flag {
        field_pic_flag = reader.read_flag()?;
        if field_pic_flag {
            bottom_field_flag = reader.read_flag()?;
        }
    }

    let mut idr_pic_id = 0;
    if nal.idr_pic_flag() {
        idr_pic_id = reader.read_ue()?;
    }

    let mut pic_order_cnt_lsb = 0;
    let mut delta_pic_order_cnt_bottom = 0;
    let mut delta_pic_order_cnt = [0i32; 2];

    match sps.pic_order_cnt_type {
        0 => {
            pic_order_cnt_lsb =
                reader.read_bits(sps.log2_max_pic_order_cnt_lsb_minus4 + 4)?;
            if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                delta_pic_order_cnt_bottom = reader.read_se()?;
            }
        }
        1 if !sps.delta_pic_order_always_zero_flag => {
            delta_pic_order_cnt[0] = reader.read_se()?;
            if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                delta_pic_order_cnt[1] = reader.read_se()?;
            }
        }
        _ => {}
    }

    let mut redundant_pic_cnt = 0;
    if pps.redundant_pic_cnt_present_flag {
        redundant_pic_cnt = reader.read_ue()?;
    }

    let mut direct_spatial_mv_pred_flag = false;
    if slice_type.is_b() {
        direct_spatial_mv_pred_flag = reader.read_flag()?;
    }

    let mut num_ref_idx_active_override_flag = false;
    let mut num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
    let mut num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;

    if slice_type.is_p() || slice_type.is_b() {
        num_ref_idx_active_override_flag = reader.read_flag()?;
        if num_ref_idx_active_override_flag {
            num_ref_idx_l0_active_minus1 = reader.read_ue()?;
            if slice_type.is_b() {
                num_ref_idx_l1_active_minus1 = reader.read_ue()?;
            }
        }
    }

    let mut ref_pic_list_modification_l0 = RefPicListModification::default();
    let mut ref_pic_list_modification_l1 = RefPicListModification::default();

    if !slice_type.is_intra() && reader.read_flag()? {
        ref_pic_list_modification_l0 = parse_ref_pic_list_modification(reader)?;
    }
    if slice_type.is_b() && reader.read_flag()? {
        ref_pic_list_modification_l1 = parse_ref_pic_list_modification(reader)?;
    }

    if (pps.weighted_pred_flag && slice_type.is_p())
        || (pps.weighted_bipred_idc == 1 && slice_type.is_b())
    {
        skip_pred_weight_table(
            reader,
            slice_type,
            num_ref_idx_l0_active_minus1,
            num_ref_idx_l1_active_minus1,
            sps,
        )?;
    }

    let mut dec_ref_pic_marking = DecRefPicMarking::default();
    if nal.nal_ref_idc != 0 {
        dec_ref_pic_marking = parse_dec_ref_pic_marking(reader, nal)?;
    }

    // cabac_init_idc would be read here; CAVLC-only PPSes never carry it.

    let slice_qp_delta = reader.read_se()?;

    let mut sp_for_switch_flag = false;
    let mut slice_qs_delta = 0;
    if matches!(slice_type, SliceType::Sp | SliceType::Si) {
        if matches!(slice_type, SliceType::Sp) {
            sp_for_switch_flag = reader.read_flag()?;
        }
        slice_qs_delta = reader.read_se()?;
    }

    let mut disable_deblocking_filter_idc = 0;
    let mut slice_alpha_c0_offset_div2 = 0;
    let mut slice_beta_offset_div2 = 0;

    if pps.deblocking_filter_control_present_flag {
        disable_deblocking_filter_idc = reader.read_ue()?;
        if disable_deblocking_filter_idc != 1 {
            slice_alpha_c0_offset_div2 = reader.read_se()?;
            slice_beta_offset_div2 = reader.read_se()?;
        }
    }

    let mut slice_group_change_cycle = 0;
    if pps.num_slice_groups_minus1 > 0
        && pps.slice_group_map_type >= 3
        && pps.slice_group_map_type <= 5
    {
        let pic_size_in_map_units =
            sps.pic_width_in_mbs() * sps.pic_height_in_map_units();
        let slice_group_change_rate = pps.slice_group_change_rate_minus1 + 1;
        let bits = ceil_log2(pic_size_in_map_units / slice_group_change_rate + 1);
        slice_group_change_cycle = reader.read_bits(bits)?;
    }

    Ok((
        SliceHeader {
            first_mb_in_slice,
            slice_type,
            pic_parameter_set_id,
            colour_plane_id,
            frame_num,
            field_pic_flag,
            bottom_field_flag,
            idr_pic_id,
            pic_order_cnt_lsb,
            delta_pic_order_cnt_bottom,
            delta_pic_order_cnt,
            redundant_pic_cnt,
            direct_spatial_mv_pred_flag,
            num_ref_idx_active_override_flag,
            num_ref_idx_l0_active_minus1,
            num_ref_idx_l1_active_minus1,
            ref_pic_list_modification_l0,
            ref_pic_list_modification_l1,
            dec_ref_pic_marking,
            slice_qp_delta,
            sp_for_switch_flag,
            slice_qs_delta,
            disable_deblocking_filter_idc,
            slice_alpha_c0_offset_div2,
            slice_beta_offset_div2,
            slice_group_change_cycle,
        },
        sps,
        pps,
    ))
}

/// Log base 2 rounded up; zero maps to zero.
fn ceil_log2(x: u32) -> u8 {
    let mut log = 0u8;
    while (x >> log) > 0 {
        log += 1;
    }
    if log > 0 && x == 1 << (log - 1) {
        log -= 1;
    }
    log
}

/// Parse reference picture list modification.
fn parse_ref_pic_list_modification(reader: &mut BitReader) -> Result<RefPicListModification> {
    let mut modifications = Vec::new();

    loop {
        let modification_of_pic_nums_idc = reader.read_ue()?;
        if modification_of_pic_nums_idc == 3 {
            break;
        }
        let value = match modification_of_pic_nums_idc {
            // abs_diff_pic_num_minus1, long_term_pic_num, or
            // abs_diff_view_idx_minus1 (MVC)
            0 | 1 | 2 | 4 | 5 => reader.read_ue()?,
            other => {
                return Err(AvcError::InvalidSliceHeader(format!(
                    "modification_of_pic_nums_idc {} out of range",
                    other
                )));
            }
        };
        modifications.push((modification_of_pic_nums_idc, value));
    }

    Ok(RefPicListModification { modifications })
}

/// Parse decoded reference picture marking.
fn parse_dec_ref_pic_marking(
    reader: &mut BitReader,
    nal: &NalUnitHeader,
) -> Result<DecRefPicMarking> {
    let mut marking = DecRefPicMarking::default();

    if nal.idr_pic_flag() {
        marking.no_output_of_prior_pics_flag = reader.read_flag()?;
        marking.long_term_reference_flag = reader.read_flag()?;
    } else {
        marking.adaptive_ref_pic_marking_mode_flag = reader.read_flag()?;

        if marking.adaptive_ref_pic_marking_mode_flag {
            loop {
                let op = reader.read_ue()?;
                if op == 0 {
                    break;
                }

                let mut diff_of_pic_nums = 0;
                let mut long_term_idx = 0;

                match op {
                    1 => diff_of_pic_nums = reader.read_ue()?,
                    2 => long_term_idx = reader.read_ue()?,
                    3 => {
                        diff_of_pic_nums = reader.read_ue()?;
                        long_term_idx = reader.read_ue()?;
                    }
                    4 | 6 => long_term_idx = reader.read_ue()?,
                    5 => {}
                    other => {
                        return Err(AvcError::InvalidSliceHeader(format!(
                            "memory_management_control_operation {} out of range",
                            other
                        )));
                    }
                }

                marking
                    .mmco_operations
                    .push((op, diff_of_pic_nums, long_term_idx));
            }
        }
    }

    Ok(marking)
}

/// Skip prediction weight table.
fn skip_pred_weight_table(
    reader: &mut BitReader,
    slice_type: SliceType,
    num_ref_idx_l0_active_minus1: u32,
    num_ref_idx_l1_active_minus1: u32,
    sps: &Sps,
) -> Result<()> {
    let monochrome = sps.chroma_format_idc == ChromaFormat::Monochrome;

    let _luma_log2_weight_denom = reader.read_ue()?;
    if !monochrome {
        let _chroma_log2_weight_denom = reader.read_ue()?;
    }

    for _ in 0..=num_ref_idx_l0_active_minus1 {
        if reader.read_flag()? {
            let _luma_weight = reader.read_se()?;
            let _luma_offset = reader.read_se()?;
        }
        if !monochrome && reader.read_flag()? {
            for _ in 0..2 {
                let _chroma_weight = reader.read_se()?;
                let _chroma_offset = reader.read_se()?;
            }
        }
    }

    if slice_type.is_b() {
        for _ in 0..=num_ref_idx_l1_active_minus1 {
            if reader.read_flag()? {
                let _luma_weight = reader.read_se()?;
                let _luma_offset = reader.read_se()?;
            }
            if !monochrome && reader.read_flag()? {
                for _ in 0..2 {
                    let _chroma_weight = reader.read_se()?;
                    let _chroma_offset = reader.read_se()?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::nal::{parse_nal_header, NalUnitType};

    pub(crate) fn minimal_header(slice_type: SliceType) -> SliceHeader {
        SliceHeader {
            first_mb_in_slice: 0,
            slice_type,
            pic_parameter_set_id: 0,
            colour_plane_id: 0,
            frame_num: 0,
            field_pic_flag: false,
            bottom_field_flag: false,
            idr_pic_id: 0,
            pic_order_cnt_lsb: 0,
            delta_pic_order_cnt_bottom: 0,
            delta_pic_order_cnt: [0, 0],
            redundant_pic_cnt: 0,
            direct_spatial_mv_pred_flag: false,
            num_ref_idx_active_override_flag: false,
            num_ref_idx_l0_active_minus1: 0,
            num_ref_idx_l1_active_minus1: 0,
            ref_pic_list_modification_l0: RefPicListModification::default(),
            ref_pic_list_modification_l1: RefPicListModification::default(),
            dec_ref_pic_marking: DecRefPicMarking::default(),
            slice_qp_delta: 0,
            sp_for_switch_flag: false,
            slice_qs_delta: 0,
            disable_deblocking_filter_idc: 0,
            slice_alpha_c0_offset_div2: 0,
            slice_beta_offset_div2: 0,
            slice_group_change_cycle: 0,
        }
    }

    #[test]
    fn test_slice_type() {
        assert_eq!(SliceType::from_u32(0), SliceType::P);
        assert_eq!(SliceType::from_u32(1), SliceType::B);
        assert_eq!(SliceType::from_u32(2), SliceType::I);
        assert_eq!(SliceType::from_u32(5), SliceType::P);
        assert_eq!(SliceType::from_u32(7), SliceType::I);

        assert!(SliceType::I.is_intra());
        assert!(SliceType::B.is_b());
        assert!(SliceType::P.is_p());
        assert!(SliceType::Sp.is_p());
    }

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
    }

    #[test]
    fn test_missing_pps_is_reported() {
        let sps_map = HashMap::new();
        let pps_map = HashMap::new();
        let nal = parse_nal_header(0x65).unwrap();
        assert_eq!(nal.nal_unit_type, NalUnitType::IdrSlice);

        // first_mb=0, slice_type=0 (P), pps_id=0
        let data = [0b11100000];
        let mut reader = BitReader::new(&data);
        assert!(matches!(
            parse_slice_header(&mut reader, &sps_map, &pps_map, &nal),
            Err(AvcError::MissingParameterSet(_))
        ));
    }

    #[test]
    fn test_minimal_p_slice_header() {
        let mut sps_map = HashMap::new();
        sps_map.insert(0, crate::sps::tests::baseline_sps(2, 2));
        let mut pps_map = HashMap::new();
        pps_map.insert(0, crate::pps::tests::default_pps());
        let nal = parse_nal_header(0x41).unwrap();

        // first_mb=0 (1), slice_type=0/P (1), pps_id=0 (1),
        // frame_num=1 (0001), num_ref_idx_active_override=0,
        // ref_pic_list_modification_flag_l0=0,
        // adaptive_ref_pic_marking_mode_flag=0 (nal_ref_idc=2),
        // slice_qp_delta=0 (1)
        let data = [0b11100010, 0b00100000];
        let mut reader = BitReader::new(&data);
        let (header, sps, _pps) =
            parse_slice_header(&mut reader, &sps_map, &pps_map, &nal).unwrap();
        assert_eq!(header.slice_type, SliceType::P);
        assert_eq!(header.frame_num, 1);
        assert_eq!(header.slice_qp_delta, 0);
        assert_eq!(sps.pic_width_in_mbs(), 2);
    }
}
