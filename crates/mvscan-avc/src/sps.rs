//! H.264/AVC Sequence Parameter Set (SPS) parsing.

use crate::bitreader::BitReader;
use crate::error::{AvcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// H.264/AVC Profile IDC values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProfileIdc {
    /// Baseline Profile
    Baseline = 66,
    /// Main Profile
    Main = 77,
    /// Extended Profile
    Extended = 88,
    /// High Profile
    High = 100,
    /// High 10 Profile
    High10 = 110,
    /// High 4:2:2 Profile
    High422 = 122,
    /// High 4:4:4 Predictive Profile
    High444 = 244,
    /// CAVLC 4:4:4 Intra Profile
    Cavlc444 = 44,
    /// Scalable Baseline Profile
    ScalableBaseline = 83,
    /// Scalable High Profile
    ScalableHigh = 86,
    /// Multiview High Profile
    MultiviewHigh = 118,
    /// Stereo High Profile
    StereoHigh = 128,
    /// Unknown profile
    Unknown = 0,
}

impl ProfileIdc {
    /// Create from raw value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            66 => ProfileIdc::Baseline,
            77 => ProfileIdc::Main,
            88 => ProfileIdc::Extended,
            100 => ProfileIdc::High,
            110 => ProfileIdc::High10,
            122 => ProfileIdc::High422,
            244 => ProfileIdc::High444,
            44 => ProfileIdc::Cavlc444,
            83 => ProfileIdc::ScalableBaseline,
            86 => ProfileIdc::ScalableHigh,
            118 => ProfileIdc::MultiviewHigh,
            128 => ProfileIdc::StereoHigh,
            _ => ProfileIdc::Unknown,
        }
    }

    /// Profiles whose SPS carries chroma and bit-depth syntax.
    pub fn has_chroma_info(&self) -> bool {
        matches!(
            self,
            ProfileIdc::High
                | ProfileIdc::High10
                | ProfileIdc::High422
                | ProfileIdc::High444
                | ProfileIdc::Cavlc444
                | ProfileIdc::ScalableBaseline
                | ProfileIdc::ScalableHigh
                | ProfileIdc::MultiviewHigh
                | ProfileIdc::StereoHigh
        )
    }
}

impl fmt::Display for ProfileIdc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileIdc::Baseline => write!(f, "Baseline"),
            ProfileIdc::Main => write!(f, "Main"),
            ProfileIdc::Extended => write!(f, "Extended"),
            ProfileIdc::High => write!(f, "High"),
            ProfileIdc::High10 => write!(f, "High 10"),
            ProfileIdc::High422 => write!(f, "High 4:2:2"),
            ProfileIdc::High444 => write!(f, "High 4:4:4"),
            ProfileIdc::Cavlc444 => write!(f, "CAVLC 4:4:4"),
            ProfileIdc::ScalableBaseline => write!(f, "Scalable Baseline"),
            ProfileIdc::ScalableHigh => write!(f, "Scalable High"),
            ProfileIdc::MultiviewHigh => write!(f, "Multiview High"),
            ProfileIdc::StereoHigh => write!(f, "Stereo High"),
            ProfileIdc::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Chroma format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChromaFormat {
    /// Monochrome (4:0:0)
    Monochrome = 0,
    /// 4:2:0 - inferred when the SPS carries no chroma_format_idc
    #[default]
    Yuv420 = 1,
    /// 4:2:2
    Yuv422 = 2,
    /// 4:4:4
    Yuv444 = 3,
}

impl ChromaFormat {
    /// Create from raw value; callers validate the range first.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ChromaFormat::Monochrome,
            1 => ChromaFormat::Yuv420,
            2 => ChromaFormat::Yuv422,
            _ => ChromaFormat::Yuv444,
        }
    }

    /// Get subsampling width factor.
    pub fn sub_width_c(&self) -> u32 {
        match self {
            ChromaFormat::Monochrome => 0,
            ChromaFormat::Yuv420 | ChromaFormat::Yuv422 => 2,
            ChromaFormat::Yuv444 => 1,
        }
    }

    /// Get subsampling height factor.
    pub fn sub_height_c(&self) -> u32 {
        match self {
            ChromaFormat::Monochrome => 0,
            ChromaFormat::Yuv420 => 2,
            ChromaFormat::Yuv422 | ChromaFormat::Yuv444 => 1,
        }
    }
}

/// Sequence Parameter Set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sps {
    /// profile_idc
    pub profile_idc: ProfileIdc,
    /// constraint_setX_flag bits plus reserved bits, as coded
    pub constraint_flags: u8,
    /// level_idc
    pub level_idc: u8,
    /// seq_parameter_set_id
    pub seq_parameter_set_id: u8,
    /// chroma_format_idc
    pub chroma_format_idc: ChromaFormat,
    /// separate_colour_plane_flag
    pub separate_colour_plane_flag: bool,
    /// bit_depth_luma_minus8
    pub bit_depth_luma_minus8: u8,
    /// bit_depth_chroma_minus8
    pub bit_depth_chroma_minus8: u8,
    /// qpprime_y_zero_transform_bypass_flag
    pub qpprime_y_zero_transform_bypass_flag: bool,
    /// log2_max_frame_num_minus4
    pub log2_max_frame_num_minus4: u8,
    /// pic_order_cnt_type
    pub pic_order_cnt_type: u8,
    /// log2_max_pic_order_cnt_lsb_minus4
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    /// delta_pic_order_always_zero_flag
    pub delta_pic_order_always_zero_flag: bool,
    /// offset_for_non_ref_pic
    pub offset_for_non_ref_pic: i32,
    /// offset_for_top_to_bottom_field
    pub offset_for_top_to_bottom_field: i32,
    /// offset_for_ref_frame
    pub offset_for_ref_frame: Vec<i32>,
    /// max_num_ref_frames
    pub max_num_ref_frames: u32,
    /// gaps_in_frame_num_value_allowed_flag
    pub gaps_in_frame_num_value_allowed_flag: bool,
    /// pic_width_in_mbs_minus1
    pub pic_width_in_mbs_minus1: u32,
    /// pic_height_in_map_units_minus1
    pub pic_height_in_map_units_minus1: u32,
    /// frame_mbs_only_flag
    pub frame_mbs_only_flag: bool,
    /// mb_adaptive_frame_field_flag
    pub mb_adaptive_frame_field_flag: bool,
    /// direct_8x8_inference_flag
    pub direct_8x8_inference_flag: bool,
    /// frame_cropping_flag
    pub frame_cropping_flag: bool,
    /// frame_crop_left_offset
    pub frame_crop_left_offset: u32,
    /// frame_crop_right_offset
    pub frame_crop_right_offset: u32,
    /// frame_crop_top_offset
    pub frame_crop_top_offset: u32,
    /// frame_crop_bottom_offset
    pub frame_crop_bottom_offset: u32,
    /// vui_parameters_present_flag (VUI body is not parsed)
    pub vui_parameters_present_flag: bool,
}

impl Sps {
    /// ChromaArrayType: 0 when colour planes are coded separately,
    /// otherwise chroma_format_idc.
    pub fn chroma_array_type(&self) -> u8 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc as u8
        }
    }

    /// Picture width in macroblocks.
    pub fn pic_width_in_mbs(&self) -> u32 {
        self.pic_width_in_mbs_minus1 + 1
    }

    /// Picture height in map units.
    pub fn pic_height_in_map_units(&self) -> u32 {
        self.pic_height_in_map_units_minus1 + 1
    }

    /// Frame height in macroblocks (doubled for field coding).
    pub fn frame_height_in_mbs(&self) -> u32 {
        (2 - self.frame_mbs_only_flag as u32) * self.pic_height_in_map_units()
    }

    /// Get picture width in luma samples.
    pub fn pic_width(&self) -> u32 {
        self.pic_width_in_mbs() * 16
    }

    /// Get picture height in luma samples.
    pub fn pic_height(&self) -> u32 {
        self.frame_height_in_mbs() * 16
    }

    /// Get display width after cropping.
    pub fn display_width(&self) -> u32 {
        let width = self.pic_width();
        if self.frame_cropping_flag {
            let crop_unit_x = if self.chroma_array_type() == 0 {
                1
            } else {
                self.chroma_format_idc.sub_width_c()
            };
            width - crop_unit_x * (self.frame_crop_left_offset + self.frame_crop_right_offset)
        } else {
            width
        }
    }

    /// Get display height after cropping.
    pub fn display_height(&self) -> u32 {
        let height = self.pic_height();
        if self.frame_cropping_flag {
            let crop_unit_y = if self.chroma_array_type() == 0 {
                1
            } else {
                self.chroma_format_idc.sub_height_c()
            } * (2 - self.frame_mbs_only_flag as u32);
            height - crop_unit_y * (self.frame_crop_top_offset + self.frame_crop_bottom_offset)
        } else {
            height
        }
    }

    /// Get bit depth for luma.
    pub fn bit_depth_luma(&self) -> u8 {
        self.bit_depth_luma_minus8 + 8
    }

    /// Get bit depth for chroma.
    pub fn bit_depth_chroma(&self) -> u8 {
        self.bit_depth_chroma_minus8 + 8
    }

    /// Chroma macroblock width in samples.
    pub fn mb_width_c(&self) -> u32 {
        match self.chroma_format_idc.sub_width_c() {
            0 => 0,
            w => 16 / w,
        }
    }

    /// Chroma macroblock height in samples.
    pub fn mb_height_c(&self) -> u32 {
        match self.chroma_format_idc.sub_height_c() {
            0 => 0,
            h => 16 / h,
        }
    }
}

/// Parse SPS from NAL unit payload (RBSP, header byte stripped).
pub fn parse_sps(data: &[u8]) -> Result<Sps> {
    let mut reader = BitReader::new(data);

    let profile_idc = ProfileIdc::from_u8(reader.read_bits(8)? as u8);
    let constraint_flags = reader.read_bits(8)? as u8;
    let level_idc = reader.read_bits(8)? as u8;
    let seq_parameter_set_id = reader.read_ue()? as u8;

    let mut chroma_format_idc = ChromaFormat::Yuv420;
    let mut separate_colour_plane_flag = false;
    let mut bit_depth_luma_minus8 = 0u8;
    let mut bit_depth_chroma_minus8 = 0u8;
    let mut qpprime_y_zero_transform_bypass_flag = false;

    if profile_idc.has_chroma_info() {
        let raw_chroma_format = reader.read_ue()?;
        if raw_chroma_format > 3 {
            return Err(AvcError::InvalidSps(format!(
                "chroma_format_idc {} exceeds maximum 3",
                raw_chroma_format
            )));
        }
        chroma_format_idc = ChromaFormat::from_u8(raw_chroma_format as u8);

        if chroma_format_idc == ChromaFormat::Yuv444 {
            separate_colour_plane_flag = reader.read_flag()?;
        }

        const MAX_BIT_DEPTH_MINUS8: u32 = 6;
        let raw_bit_depth_luma = reader.read_ue()?;
        if raw_bit_depth_luma > MAX_BIT_DEPTH_MINUS8 {
            return Err(AvcError::InvalidSps(format!(
                "bit_depth_luma_minus8 {} exceeds maximum {}",
                raw_bit_depth_luma, MAX_BIT_DEPTH_MINUS8
            )));
        }
        bit_depth_luma_minus8 = raw_bit_depth_luma as u8;

        let raw_bit_depth_chroma = reader.read_ue()?;
        if raw_bit_depth_chroma > MAX_BIT_DEPTH_MINUS8 {
            return Err(AvcError::InvalidSps(format!(
                "bit_depth_chroma_minus8 {} exceeds maximum {}",
                raw_bit_depth_chroma, MAX_BIT_DEPTH_MINUS8
            )));
        }
        bit_depth_chroma_minus8 = raw_bit_depth_chroma as u8;

        qpprime_y_zero_transform_bypass_flag = reader.read_flag()?;
        if reader.read_flag()? {
            return Err(AvcError::Unsupported(
                "seq_scaling_matrix_present_flag".to_string(),
            ));
        }
    }

    let log2_max_frame_num_minus4 = reader.read_ue()?;
    if log2_max_frame_num_minus4 > 12 {
        return Err(AvcError::InvalidSps(format!(
            "log2_max_frame_num_minus4 {} exceeds maximum 12",
            log2_max_frame_num_minus4
        )));
    }
    let pic_order_cnt_type = reader.read_ue()? as u8;

    let mut log2_max_pic_order_cnt_lsb_minus4 = 0u8;
    let mut delta_pic_order_always_zero_flag = false;
    let mut offset_for_non_ref_pic = 0i32;
    let mut offset_for_top_to_bottom_field = 0i32;
    let mut offset_for_ref_frame = Vec::new();

    match pic_order_cnt_type {
        0 => {
            let raw = reader.read_ue()?;
            if raw > 12 {
                return Err(AvcError::InvalidSps(format!(
                    "log2_max_pic_order_cnt_lsb_minus4 {} exceeds maximum 12",
                    raw
                )));
            }
            log2_max_pic_order_cnt_lsb_minus4 = raw as u8;
        }
        1 => {
            delta_pic_order_always_zero_flag = reader.read_flag()?;
            offset_for_non_ref_pic = reader.read_se()?;
            offset_for_top_to_bottom_field = reader.read_se()?;

            const MAX_REF_FRAMES_IN_CYCLE: u32 = 255;
            let cycle_count = reader.read_ue()?;
            if cycle_count > MAX_REF_FRAMES_IN_CYCLE {
                return Err(AvcError::InvalidSps(format!(
                    "num_ref_frames_in_pic_order_cnt_cycle {} exceeds maximum {}",
                    cycle_count, MAX_REF_FRAMES_IN_CYCLE
                )));
            }
            for _ in 0..cycle_count {
                offset_for_ref_frame.push(reader.read_se()?);
            }
        }
        2 => {}
        other => {
            return Err(AvcError::InvalidSps(format!(
                "pic_order_cnt_type {} out of range",
                other
            )));
        }
    }

    const MAX_NUM_REF_FRAMES: u32 = 32;
    let max_num_ref_frames = reader.read_ue()?;
    if max_num_ref_frames > MAX_NUM_REF_FRAMES {
        return Err(AvcError::InvalidSps(format!(
            "max_num_ref_frames {} exceeds maximum {}",
            max_num_ref_frames, MAX_NUM_REF_FRAMES
        )));
    }

    let gaps_in_frame_num_value_allowed_flag = reader.read_flag()?;

    const MAX_PIC_DIMENSION_IN_MBS: u32 = 16384;
    let pic_width_in_mbs_minus1 = reader.read_ue()?;
    if pic_width_in_mbs_minus1 >= MAX_PIC_DIMENSION_IN_MBS {
        return Err(AvcError::InvalidSps(format!(
            "pic_width_in_mbs_minus1 {} exceeds maximum {}",
            pic_width_in_mbs_minus1, MAX_PIC_DIMENSION_IN_MBS
        )));
    }
    let pic_height_in_map_units_minus1 = reader.read_ue()?;
    if pic_height_in_map_units_minus1 >= MAX_PIC_DIMENSION_IN_MBS {
        return Err(AvcError::InvalidSps(format!(
            "pic_height_in_map_units_minus1 {} exceeds maximum {}",
            pic_height_in_map_units_minus1, MAX_PIC_DIMENSION_IN_MBS
        )));
    }

    let frame_mbs_only_flag = reader.read_flag()?;

    let mut mb_adaptive_frame_field_flag = false;
    if !frame_mbs_only_flag {
        mb_adaptive_frame_field_flag = reader.read_flag()?;
    }

    let direct_8x8_inference_flag = reader.read_flag()?;
    let frame_cropping_flag = reader.read_flag()?;

    let mut frame_crop_left_offset = 0;
    let mut frame_crop_right_offset = 0;
    let mut frame_crop_top_offset = 0;
    let mut frame_crop_bottom_offset = 0;

    if frame_cropping_flag {
        frame_crop_left_offset = reader.read_ue()?;
        frame_crop_right_offset = reader.read_ue()?;
        frame_crop_top_offset = reader.read_ue()?;
        frame_crop_bottom_offset = reader.read_ue()?;
    }

    let vui_parameters_present_flag = reader.read_flag()?;

    Ok(Sps {
        profile_idc,
        constraint_flags,
        level_idc,
        seq_parameter_set_id,
        chroma_format_idc,
        separate_colour_plane_flag,
        bit_depth_luma_minus8,
        bit_depth_chroma_minus8,
        qpprime_y_zero_transform_bypass_flag,
        log2_max_frame_num_minus4: log2_max_frame_num_minus4 as u8,
        pic_order_cnt_type,
        log2_max_pic_order_cnt_lsb_minus4,
        delta_pic_order_always_zero_flag,
        offset_for_non_ref_pic,
        offset_for_top_to_bottom_field,
        offset_for_ref_frame,
        max_num_ref_frames,
        gaps_in_frame_num_value_allowed_flag,
        pic_width_in_mbs_minus1,
        pic_height_in_map_units_minus1,
        frame_mbs_only_flag,
        mb_adaptive_frame_field_flag,
        direct_8x8_inference_flag,
        frame_cropping_flag,
        frame_crop_left_offset,
        frame_crop_right_offset,
        frame_crop_top_offset,
        frame_crop_bottom_offset,
        vui_parameters_present_flag,
    })
}
