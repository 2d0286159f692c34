//! H.265/HEVC SPS 解析器.
//!
//! 提取 DPB 管理所需的参数: POC 位宽、子层 DPB 容量/重排序/时延、短期 RPS 集合与长期参考候选,
//! 以及加速器配置所需的尺寸、位深与 CTB 大小.

use hwdec_core::bitreader::BitReader;
use hwdec_core::{HwdecError, HwdecResult};

use super::rps::{ShortTermRps, parse_st_ref_pic_set};

/// 子层数量上限
const MAX_SUB_LAYERS: usize = 7;

/// SPS 解析结果
#[derive(Debug, Clone)]
pub struct HevcSps {
    /// SPS 所引用的 VPS ID
    pub vps_id: u8,
    /// sps_max_sub_layers_minus1 + 1
    pub max_sub_layers: u8,
    /// SPS ID
    pub sps_id: u32,
    /// general_profile_idc
    pub general_profile_idc: u8,
    /// general_level_idc
    pub general_level_idc: u8,
    /// 色度格式 (0=单色, 1=4:2:0, 2=4:2:2, 3=4:4:4)
    pub chroma_format_idc: u32,
    /// separate_colour_plane_flag
    pub separate_colour_plane_flag: bool,
    /// pic_width_in_luma_samples
    pub pic_width: u32,
    /// pic_height_in_luma_samples
    pub pic_height: u32,
    /// 图像宽度 (像素, 已应用 conformance window)
    pub width: u32,
    /// 图像高度 (像素, 已应用 conformance window)
    pub height: u32,
    /// 亮度位深
    pub bit_depth_luma: u32,
    /// 色度位深
    pub bit_depth_chroma: u32,
    /// log2_max_pic_order_cnt_lsb_minus4 + 4
    pub log2_max_poc_lsb: u32,
    /// sps_max_dec_pic_buffering_minus1[i]
    pub max_dec_pic_buffering_minus1: Vec<u32>,
    /// sps_max_num_reorder_pics[i]
    pub max_num_reorder_pics: Vec<u32>,
    /// sps_max_latency_increase_plus1[i]
    pub max_latency_increase_plus1: Vec<u32>,
    /// MinCbLog2SizeY
    pub log2_min_cb_size: u32,
    /// CtbLog2SizeY
    pub log2_ctb_size: u32,
    /// sample_adaptive_offset_enabled_flag
    pub sample_adaptive_offset_enabled: bool,
    /// 短期 RPS 集合
    pub short_term_ref_pic_sets: Vec<ShortTermRps>,
    /// long_term_ref_pics_present_flag
    pub long_term_ref_pics_present: bool,
    /// lt_ref_pic_poc_lsb_sps[i]
    pub lt_ref_pic_poc_lsb_sps: Vec<u32>,
    /// used_by_curr_pic_lt_sps_flag[i]
    pub used_by_curr_pic_lt_sps: Vec<bool>,
    /// sps_temporal_mvp_enabled_flag
    pub temporal_mvp_enabled: bool,
}

impl HevcSps {
    /// MaxPicOrderCntLsb
    pub fn max_poc_lsb(&self) -> i32 {
        1 << self.log2_max_poc_lsb
    }

    fn highest(&self, values: &[u32]) -> u32 {
        values.last().copied().unwrap_or(0)
    }

    /// 最高子层的 sps_max_dec_pic_buffering_minus1 + 1
    pub fn max_dec_pic_buffering(&self) -> u32 {
        self.highest(&self.max_dec_pic_buffering_minus1) + 1
    }

    /// 最高子层的 sps_max_num_reorder_pics
    pub fn max_num_reorder(&self) -> u32 {
        self.highest(&self.max_num_reorder_pics)
    }

    /// SpsMaxLatencyPictures, sps_max_latency_increase_plus1 为 0 时不限制
    pub fn max_latency_pictures(&self) -> Option<u32> {
        let plus1 = self.highest(&self.max_latency_increase_plus1);
        (plus1 != 0).then(|| self.max_num_reorder() + plus1 - 1)
    }

    /// ChromaArrayType
    pub fn chroma_array_type(&self) -> u32 {
        if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        }
    }

    /// PicSizeInCtbsY
    pub fn pic_size_in_ctbs(&self) -> u32 {
        let ctb = 1u32 << self.log2_ctb_size;
        self.pic_width.div_ceil(ctb) * self.pic_height.div_ceil(ctb)
    }

    /// 以最小 CB 为单位的宽高 (用于检测尺寸变化)
    pub fn size_in_min_cbs(&self) -> (u32, u32) {
        (
            self.pic_width >> self.log2_min_cb_size,
            self.pic_height >> self.log2_min_cb_size,
        )
    }
}

/// 解析 profile_tier_level, 返回 (general_profile_idc, general_level_idc)
fn parse_profile_tier_level(br: &mut BitReader, max_sub_layers: u8) -> HwdecResult<(u8, u8)> {
    br.skip_bits(3)?; // general_profile_space + general_tier_flag
    let profile_idc = br.read_bits(5)? as u8;
    br.skip_bits(32)?; // general_profile_compatibility_flags
    br.skip_bits(48)?; // progressive/interlaced/non_packed/frame_only + 44 位约束标志
    let level_idc = br.read_bits(8)? as u8;

    if max_sub_layers > 1 {
        let sub_layers = max_sub_layers as usize - 1;
        let mut profile_present = [false; MAX_SUB_LAYERS];
        let mut level_present = [false; MAX_SUB_LAYERS];
        for i in 0..sub_layers {
            profile_present[i] = br.read_flag()?;
            level_present[i] = br.read_flag()?;
        }
        for _ in sub_layers..8 {
            br.skip_bits(2)?; // reserved_zero_2bits
        }
        for i in 0..sub_layers {
            if profile_present[i] {
                br.skip_bits(88)?;
            }
            if level_present[i] {
                br.skip_bits(8)?;
            }
        }
    }

    Ok((profile_idc, level_idc))
}

/// 解析 HEVC SPS
pub fn parse_hevc_sps(rbsp: &[u8]) -> HwdecResult<HevcSps> {
    if rbsp.len() < 3 {
        return Err(HwdecError::InvalidData("HEVC: SPS RBSP 太短".into()));
    }

    let mut br = BitReader::new(rbsp);

    let vps_id = br.read_bits(4)? as u8;
    let max_sub_layers = br.read_bits(3)? as u8 + 1;
    if max_sub_layers as usize > MAX_SUB_LAYERS {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: sps_max_sub_layers_minus1 超出范围, value={}",
            max_sub_layers - 1
        )));
    }
    br.skip_bits(1)?; // sps_temporal_id_nesting_flag

    let (general_profile_idc, general_level_idc) =
        parse_profile_tier_level(&mut br, max_sub_layers)?;

    let sps_id = br.read_ue()?;
    if sps_id > 15 {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: sps_id 超出范围, value={}",
            sps_id
        )));
    }
    let chroma_format_idc = br.read_ue()?;
    if chroma_format_idc > 3 {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: chroma_format_idc 非法, value={}",
            chroma_format_idc
        )));
    }
    let separate_colour_plane_flag = chroma_format_idc == 3 && br.read_flag()?;

    let pic_width = br.read_ue()?;
    let pic_height = br.read_ue()?;
    if pic_width == 0 || pic_height == 0 || pic_width > 16_888 || pic_height > 16_888 {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: 图像尺寸非法, {}x{}",
            pic_width, pic_height
        )));
    }

    let mut conf_win = [0u32; 4];
    if br.read_flag()? {
        for c in conf_win.iter_mut() {
            *c = br.read_ue()?;
        }
    }

    let bit_depth_luma = br.read_ue()? + 8;
    let bit_depth_chroma = br.read_ue()? + 8;
    let log2_max_poc_lsb = br.read_ue()? + 4;
    if log2_max_poc_lsb > 16 {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: log2_max_pic_order_cnt_lsb_minus4 超出范围, value={}",
            log2_max_poc_lsb - 4
        )));
    }

    let sub_layer_ordering_info_present = br.read_flag()?;
    let layers = max_sub_layers as usize;
    let mut max_dec_pic_buffering_minus1 = vec![0u32; layers];
    let mut max_num_reorder_pics = vec![0u32; layers];
    let mut max_latency_increase_plus1 = vec![0u32; layers];
    let first = if sub_layer_ordering_info_present {
        0
    } else {
        layers - 1
    };
    for i in first..layers {
        max_dec_pic_buffering_minus1[i] = br.read_ue()?;
        max_num_reorder_pics[i] = br.read_ue()?;
        max_latency_increase_plus1[i] = br.read_ue()?;
        if max_dec_pic_buffering_minus1[i] > 15
            || max_num_reorder_pics[i] > max_dec_pic_buffering_minus1[i]
        {
            return Err(HwdecError::InvalidData(format!(
                "HEVC: 子层 DPB 参数非法, max_dec_pic_buffering_minus1={}, max_num_reorder={}",
                max_dec_pic_buffering_minus1[i], max_num_reorder_pics[i]
            )));
        }
    }
    // 未显式给出的低子层取最高子层的值
    for i in 0..first {
        max_dec_pic_buffering_minus1[i] = max_dec_pic_buffering_minus1[first];
        max_num_reorder_pics[i] = max_num_reorder_pics[first];
        max_latency_increase_plus1[i] = max_latency_increase_plus1[first];
    }

    let log2_min_cb_size = br.read_ue()? + 3;
    let log2_ctb_size = log2_min_cb_size + br.read_ue()?;
    if log2_ctb_size > 6 {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: CTB 大小非法, log2={}",
            log2_ctb_size
        )));
    }
    br.read_ue()?; // log2_min_luma_transform_block_size_minus2
    br.read_ue()?; // log2_diff_max_min_luma_transform_block_size
    br.read_ue()?; // max_transform_hierarchy_depth_inter
    br.read_ue()?; // max_transform_hierarchy_depth_intra

    if br.read_flag()? && br.read_flag()? {
        skip_scaling_list_data(&mut br)?;
    }

    br.skip_bits(1)?; // amp_enabled_flag
    let sample_adaptive_offset_enabled = br.read_flag()?;

    if br.read_flag()? {
        br.skip_bits(8)?; // pcm_sample_bit_depth_luma/chroma_minus1
        br.read_ue()?; // log2_min_pcm_luma_coding_block_size_minus3
        br.read_ue()?; // log2_diff_max_min_pcm_luma_coding_block_size
        br.skip_bits(1)?; // pcm_loop_filter_disabled_flag
    }

    let num_short_term_ref_pic_sets = br.read_ue()? as usize;
    if num_short_term_ref_pic_sets > 64 {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: num_short_term_ref_pic_sets 超出范围, value={}",
            num_short_term_ref_pic_sets
        )));
    }
    let mut short_term_ref_pic_sets = Vec::with_capacity(num_short_term_ref_pic_sets);
    for i in 0..num_short_term_ref_pic_sets {
        let rps = parse_st_ref_pic_set(
            &mut br,
            i,
            &short_term_ref_pic_sets,
            num_short_term_ref_pic_sets,
        )?;
        short_term_ref_pic_sets.push(rps);
    }

    let long_term_ref_pics_present = br.read_flag()?;
    let mut lt_ref_pic_poc_lsb_sps = Vec::new();
    let mut used_by_curr_pic_lt_sps = Vec::new();
    if long_term_ref_pics_present {
        let num_long_term_ref_pics_sps = br.read_ue()?;
        if num_long_term_ref_pics_sps > 32 {
            return Err(HwdecError::InvalidData(format!(
                "HEVC: num_long_term_ref_pics_sps 超出范围, value={}",
                num_long_term_ref_pics_sps
            )));
        }
        for _ in 0..num_long_term_ref_pics_sps {
            lt_ref_pic_poc_lsb_sps.push(br.read_bits(log2_max_poc_lsb)?);
            used_by_curr_pic_lt_sps.push(br.read_flag()?);
        }
    }

    let temporal_mvp_enabled = br.read_flag()?;
    // 其后的 strong_intra_smoothing / VUI / 扩展字段对 DPB 管理无影响

    let (sub_width_c, sub_height_c) = match chroma_format_idc {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    };
    let crop_x = sub_width_c * (conf_win[0] + conf_win[1]);
    let crop_y = sub_height_c * (conf_win[2] + conf_win[3]);
    if crop_x >= pic_width || crop_y >= pic_height {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: conformance window 非法, pic={}x{}, crop_x={}, crop_y={}",
            pic_width, pic_height, crop_x, crop_y
        )));
    }

    Ok(HevcSps {
        vps_id,
        max_sub_layers,
        sps_id,
        general_profile_idc,
        general_level_idc,
        chroma_format_idc,
        separate_colour_plane_flag,
        pic_width,
        pic_height,
        width: pic_width - crop_x,
        height: pic_height - crop_y,
        bit_depth_luma,
        bit_depth_chroma,
        log2_max_poc_lsb,
        max_dec_pic_buffering_minus1,
        max_num_reorder_pics,
        max_latency_increase_plus1,
        log2_min_cb_size,
        log2_ctb_size,
        sample_adaptive_offset_enabled,
        short_term_ref_pic_sets,
        long_term_ref_pics_present,
        lt_ref_pic_poc_lsb_sps,
        used_by_curr_pic_lt_sps,
        temporal_mvp_enabled,
    })
}

/// 跳过 scaling_list_data()
pub(crate) fn skip_scaling_list_data(br: &mut BitReader) -> HwdecResult<()> {
    for size_id in 0..4 {
        let step = if size_id == 3 { 3 } else { 1 };
        for _ in (0..6).step_by(step) {
            if !br.read_flag()? {
                br.read_ue()?; // scaling_list_pred_matrix_id_delta
            } else {
                let coef_num = 64.min(1 << (4 + (size_id << 1)));
                if size_id > 1 {
                    br.read_se()?; // scaling_list_dc_coef_minus8
                }
                for _ in 0..coef_num {
                    br.read_se()?; // scaling_list_delta_coef
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_streams::h265::SpsBuilder;

    #[test]
    fn test_sps_basic_fields() {
        let rbsp = SpsBuilder::new(416, 240).rbsp();
        let sps = parse_hevc_sps(&rbsp).unwrap();

        assert_eq!(sps.general_profile_idc, 1);
        assert_eq!((sps.pic_width, sps.pic_height), (416, 240));
        assert_eq!((sps.width, sps.height), (416, 240));
        assert_eq!(sps.log2_max_poc_lsb, 8);
        assert_eq!(sps.log2_ctb_size, 4);
        assert_eq!(sps.pic_size_in_ctbs(), 26 * 15);
        assert_eq!(sps.max_dec_pic_buffering(), 5);
        assert_eq!(sps.max_num_reorder(), 2);
        assert_eq!(sps.max_latency_pictures(), None);
    }

    #[test]
    fn test_sps_rps_and_long_term_refs() {
        let rbsp = SpsBuilder::new(416, 240)
            .short_term_sets(vec![vec![-1], vec![-1, -2]])
            .long_term_sps(vec![(3, true)])
            .latency_increase_plus1(2)
            .rbsp();
        let sps = parse_hevc_sps(&rbsp).unwrap();

        assert_eq!(sps.short_term_ref_pic_sets.len(), 2);
        assert_eq!(sps.short_term_ref_pic_sets[1].delta_poc_s0, vec![-1, -2]);
        assert!(sps.long_term_ref_pics_present);
        assert_eq!(sps.lt_ref_pic_poc_lsb_sps, vec![3]);
        assert_eq!(sps.used_by_curr_pic_lt_sps, vec![true]);
        assert_eq!(sps.max_latency_pictures(), Some(3));
    }

    #[test]
    fn test_sps_rbsp_too_short() {
        assert!(parse_hevc_sps(&[0]).is_err());
    }
}
