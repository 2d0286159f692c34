//! H.264 SPS (Sequence Parameter Set) 解析器.
//!
//! 只保留 DPB 管理与加速器配置所需的字段:
//! - Profile / Level, 色度格式与位深
//! - 图像尺寸 (宏块单位与裁剪后的像素尺寸), 帧/场编码方式
//! - frame_num 与 POC 推导参数
//! - 参考帧数量与 VUI bitstream_restriction 中的 DPB 大小

use hwdec_core::bitreader::BitReader;
use hwdec_core::{HwdecError, HwdecResult};

/// VUI 中的 bitstream_restriction 信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitstreamRestriction {
    /// max_num_reorder_frames
    pub max_num_reorder_frames: u32,
    /// max_dec_frame_buffering
    pub max_dec_frame_buffering: u32,
}

/// SPS 解析结果
#[derive(Debug, Clone)]
pub struct Sps {
    /// profile_idc (编码规格, 如 66=Baseline, 77=Main, 100=High)
    pub profile_idc: u8,
    /// constraint_set 标志位 (bit7 = constraint_set0_flag)
    pub constraint_set_flags: u8,
    /// level_idc (编码级别, 如 30=3.0, 41=4.1)
    pub level_idc: u8,
    /// seq_parameter_set_id
    pub sps_id: u32,
    /// 色度格式 (0=单色, 1=4:2:0, 2=4:2:2, 3=4:4:4)
    pub chroma_format_idc: u32,
    /// separate_colour_plane_flag
    pub separate_colour_plane_flag: bool,
    /// 亮度位深
    pub bit_depth_luma: u32,
    /// 色度位深
    pub bit_depth_chroma: u32,
    /// log2(MaxFrameNum)
    pub log2_max_frame_num: u32,
    /// 图像顺序计数类型 (0, 1, 2)
    pub poc_type: u32,
    /// log2(MaxPicOrderCntLsb) (仅 poc_type==0)
    pub log2_max_poc_lsb: u32,
    /// delta_pic_order_always_zero_flag (仅 poc_type==1)
    pub delta_pic_order_always_zero_flag: bool,
    /// offset_for_non_ref_pic (仅 poc_type==1)
    pub offset_for_non_ref_pic: i32,
    /// offset_for_top_to_bottom_field (仅 poc_type==1)
    pub offset_for_top_to_bottom_field: i32,
    /// offset_for_ref_frame 列表, 长度即 num_ref_frames_in_pic_order_cnt_cycle
    pub offset_for_ref_frame: Vec<i32>,
    /// max_num_ref_frames
    pub max_num_ref_frames: u32,
    /// gaps_in_frame_num_value_allowed_flag
    pub gaps_in_frame_num_value_allowed_flag: bool,
    /// 宽度 (宏块数)
    pub pic_width_in_mbs: u32,
    /// 高度 (map unit 数, 场编码时为半帧高度)
    pub pic_height_in_map_units: u32,
    /// frame_mbs_only_flag
    pub frame_mbs_only: bool,
    /// mb_adaptive_frame_field_flag
    pub mb_adaptive_frame_field: bool,
    /// 图像宽度 (像素, 已应用 cropping)
    pub width: u32,
    /// 图像高度 (像素, 已应用 cropping)
    pub height: u32,
    /// VUI bitstream_restriction (存在时)
    pub bitstream_restriction: Option<BitstreamRestriction>,
}

impl Sps {
    /// MaxFrameNum
    pub fn max_frame_num(&self) -> u32 {
        1 << self.log2_max_frame_num
    }

    /// MaxPicOrderCntLsb
    pub fn max_poc_lsb(&self) -> u32 {
        1 << self.log2_max_poc_lsb
    }

    /// FrameHeightInMbs
    pub fn frame_height_in_mbs(&self) -> u32 {
        let factor = if self.frame_mbs_only { 1 } else { 2 };
        self.pic_height_in_map_units * factor
    }

    /// 帧的宏块总数 (PicWidthInMbs * FrameHeightInMbs)
    pub fn frame_size_in_mbs(&self) -> u32 {
        self.pic_width_in_mbs * self.frame_height_in_mbs()
    }

    /// constraint_set3_flag
    pub fn constraint_set3(&self) -> bool {
        self.constraint_set_flags & 0x10 != 0
    }
}

/// 从 RBSP 数据解析 SPS
pub fn parse_sps(rbsp: &[u8]) -> HwdecResult<Sps> {
    if rbsp.len() < 3 {
        return Err(HwdecError::InvalidData("H.264: SPS RBSP 太短".into()));
    }

    let mut br = BitReader::new(rbsp);

    let profile_idc = br.read_bits(8)? as u8;
    let constraint_set_flags = br.read_bits(8)? as u8;
    let level_idc = br.read_bits(8)? as u8;
    let sps_id = br.read_ue()?;
    if sps_id > 31 {
        return Err(HwdecError::InvalidData(format!(
            "H.264: sps_id 超出范围, sps_id={}",
            sps_id
        )));
    }

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane_flag = false;
    let mut bit_depth_luma = 8;
    let mut bit_depth_chroma = 8;

    // High profile 及以上有额外字段
    if is_high_profile(profile_idc) {
        chroma_format_idc = br.read_ue()?;
        if chroma_format_idc > 3 {
            return Err(HwdecError::InvalidData(format!(
                "H.264: chroma_format_idc 非法, value={}",
                chroma_format_idc
            )));
        }
        if chroma_format_idc == 3 {
            separate_colour_plane_flag = br.read_flag()?;
        }
        bit_depth_luma = br.read_ue()? + 8;
        bit_depth_chroma = br.read_ue()? + 8;
        if bit_depth_luma > 14 || bit_depth_chroma > 14 {
            return Err(HwdecError::InvalidData(format!(
                "H.264: 位深非法, luma={}, chroma={}",
                bit_depth_luma, bit_depth_chroma
            )));
        }
        br.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
        if br.read_flag()? {
            let list_count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..list_count {
                if br.read_flag()? {
                    skip_scaling_list(&mut br, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let log2_max_frame_num_minus4 = br.read_ue()?;
    if log2_max_frame_num_minus4 > 12 {
        return Err(HwdecError::InvalidData(format!(
            "H.264: log2_max_frame_num_minus4 超出范围, value={}",
            log2_max_frame_num_minus4
        )));
    }

    let poc_type = br.read_ue()?;
    let mut log2_max_poc_lsb = 0u32;
    let mut delta_pic_order_always_zero_flag = false;
    let mut offset_for_non_ref_pic = 0i32;
    let mut offset_for_top_to_bottom_field = 0i32;
    let mut offset_for_ref_frame = Vec::new();
    match poc_type {
        0 => {
            let log2_max_poc_lsb_minus4 = br.read_ue()?;
            if log2_max_poc_lsb_minus4 > 12 {
                return Err(HwdecError::InvalidData(format!(
                    "H.264: log2_max_pic_order_cnt_lsb_minus4 超出范围, value={}",
                    log2_max_poc_lsb_minus4
                )));
            }
            log2_max_poc_lsb = log2_max_poc_lsb_minus4 + 4;
        }
        1 => {
            delta_pic_order_always_zero_flag = br.read_flag()?;
            offset_for_non_ref_pic = br.read_se()?;
            offset_for_top_to_bottom_field = br.read_se()?;
            let num_ref_in_poc_cycle = br.read_ue()?;
            if num_ref_in_poc_cycle > 255 {
                return Err(HwdecError::InvalidData(format!(
                    "H.264: num_ref_frames_in_pic_order_cnt_cycle 超出范围, value={}",
                    num_ref_in_poc_cycle
                )));
            }
            for _ in 0..num_ref_in_poc_cycle {
                offset_for_ref_frame.push(br.read_se()?);
            }
        }
        2 => {}
        _ => {
            return Err(HwdecError::InvalidData(format!(
                "H.264: pic_order_cnt_type 非法, value={}",
                poc_type
            )));
        }
    }

    let max_num_ref_frames = br.read_ue()?;
    if max_num_ref_frames > 16 {
        return Err(HwdecError::InvalidData(format!(
            "H.264: max_num_ref_frames 超出范围, value={}",
            max_num_ref_frames
        )));
    }
    let gaps_in_frame_num_value_allowed_flag = br.read_flag()?;

    let pic_width_in_mbs = br.read_ue()? + 1;
    let pic_height_in_map_units = br.read_ue()? + 1;
    if pic_width_in_mbs > 1024 || pic_height_in_map_units > 1024 {
        return Err(HwdecError::InvalidData(format!(
            "H.264: 图像尺寸超出范围, width_mbs={}, height_map_units={}",
            pic_width_in_mbs, pic_height_in_map_units
        )));
    }

    let frame_mbs_only = br.read_flag()?;
    let mb_adaptive_frame_field = if frame_mbs_only {
        false
    } else {
        br.read_flag()?
    };
    br.skip_bits(1)?; // direct_8x8_inference_flag

    let mut crop = [0u32; 4];
    if br.read_flag()? {
        for c in crop.iter_mut() {
            *c = br.read_ue()?;
        }
    }

    let chroma_array_type = if separate_colour_plane_flag {
        0
    } else {
        chroma_format_idc
    };
    let (crop_unit_x, crop_unit_y) = cropping_unit(chroma_array_type, frame_mbs_only);
    let raw_width = pic_width_in_mbs * 16;
    let raw_height = pic_height_in_map_units * if frame_mbs_only { 16 } else { 32 };
    let crop_x = (crop[0] + crop[1]) * crop_unit_x;
    let crop_y = (crop[2] + crop[3]) * crop_unit_y;
    if crop_x >= raw_width || crop_y >= raw_height {
        return Err(HwdecError::InvalidData(format!(
            "H.264: 裁剪参数非法, raw={}x{}, crop_x={}, crop_y={}",
            raw_width, raw_height, crop_x, crop_y
        )));
    }

    let bitstream_restriction = if br.read_flag()? {
        parse_vui(&mut br)?
    } else {
        None
    };

    Ok(Sps {
        profile_idc,
        constraint_set_flags,
        level_idc,
        sps_id,
        chroma_format_idc,
        separate_colour_plane_flag,
        bit_depth_luma,
        bit_depth_chroma,
        log2_max_frame_num: log2_max_frame_num_minus4 + 4,
        poc_type,
        log2_max_poc_lsb,
        delta_pic_order_always_zero_flag,
        offset_for_non_ref_pic,
        offset_for_top_to_bottom_field,
        offset_for_ref_frame,
        max_num_ref_frames,
        gaps_in_frame_num_value_allowed_flag,
        pic_width_in_mbs,
        pic_height_in_map_units,
        frame_mbs_only,
        mb_adaptive_frame_field,
        width: raw_width - crop_x,
        height: raw_height - crop_y,
        bitstream_restriction,
    })
}

// ============================================================
// 辅助函数
// ============================================================

/// 是否为 High Profile 或更高
fn is_high_profile(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134
    )
}

/// 获取 cropping 单位
fn cropping_unit(chroma_array_type: u32, frame_mbs_only: bool) -> (u32, u32) {
    let (sub_width, sub_height) = match chroma_array_type {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    };
    let height_mult = if frame_mbs_only { 1 } else { 2 };
    (sub_width, sub_height * height_mult)
}

/// 跳过一个 scaling_list() 语法结构
pub(crate) fn skip_scaling_list(br: &mut BitReader, size: usize) -> HwdecResult<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = br.read_se()?;
            if !(-128..=127).contains(&delta_scale) {
                return Err(HwdecError::InvalidData(format!(
                    "H.264: delta_scale 超出范围, value={}",
                    delta_scale
                )));
            }
            next_scale = (last_scale + delta_scale + 256).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// 跳过 hrd_parameters()
fn skip_hrd_parameters(br: &mut BitReader) -> HwdecResult<()> {
    let cpb_cnt_minus1 = br.read_ue()?;
    if cpb_cnt_minus1 > 31 {
        return Err(HwdecError::InvalidData(format!(
            "H.264: cpb_cnt_minus1 超出范围, value={}",
            cpb_cnt_minus1
        )));
    }
    br.skip_bits(8)?; // bit_rate_scale + cpb_size_scale
    for _ in 0..=cpb_cnt_minus1 {
        br.read_ue()?; // bit_rate_value_minus1
        br.read_ue()?; // cpb_size_value_minus1
        br.skip_bits(1)?; // cbr_flag
    }
    br.skip_bits(20)?; // 4 个 5 位的时延长度字段
    Ok(())
}

/// 解析 VUI, 只提取 bitstream_restriction
fn parse_vui(br: &mut BitReader) -> HwdecResult<Option<BitstreamRestriction>> {
    // aspect_ratio_info_present_flag
    if br.read_flag()? {
        let ar_idc = br.read_bits(8)?;
        if ar_idc == 255 {
            br.skip_bits(32)?; // sar_width + sar_height
        }
    }

    // overscan_info_present_flag
    if br.read_flag()? {
        br.skip_bits(1)?;
    }

    // video_signal_type_present_flag
    if br.read_flag()? {
        br.skip_bits(4)?; // video_format + video_full_range_flag
        if br.read_flag()? {
            br.skip_bits(24)?; // colour_primaries, transfer_characteristics, matrix_coefficients
        }
    }

    // chroma_loc_info_present_flag
    if br.read_flag()? {
        br.read_ue()?;
        br.read_ue()?;
    }

    // timing_info_present_flag
    if br.read_flag()? {
        br.skip_bits(65)?;
    }

    let nal_hrd = br.read_flag()?;
    if nal_hrd {
        skip_hrd_parameters(br)?;
    }
    let vcl_hrd = br.read_flag()?;
    if vcl_hrd {
        skip_hrd_parameters(br)?;
    }
    if nal_hrd || vcl_hrd {
        br.skip_bits(1)?; // low_delay_hrd_flag
    }
    br.skip_bits(1)?; // pic_struct_present_flag

    if !br.read_flag()? {
        return Ok(None);
    }
    br.skip_bits(1)?; // motion_vectors_over_pic_boundaries_flag
    br.read_ue()?; // max_bytes_per_pic_denom
    br.read_ue()?; // max_bits_per_mb_denom
    br.read_ue()?; // log2_max_mv_length_horizontal
    br.read_ue()?; // log2_max_mv_length_vertical
    let max_num_reorder_frames = br.read_ue()?;
    let max_dec_frame_buffering = br.read_ue()?;

    Ok(Some(BitstreamRestriction {
        max_num_reorder_frames,
        max_dec_frame_buffering,
    }))
}
