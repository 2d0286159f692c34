//! H.264 PPS (Picture Parameter Set) 解析.

use hwdec_core::bitreader::BitReader;
use hwdec_core::{HwdecError, HwdecResult};

use super::sps::skip_scaling_list;

/// PPS 解析结果
#[derive(Debug, Clone)]
pub struct Pps {
    /// pic_parameter_set_id
    pub pps_id: u32,
    /// seq_parameter_set_id
    pub sps_id: u32,
    /// entropy_coding_mode_flag (CABAC)
    pub entropy_coding_mode: bool,
    /// bottom_field_pic_order_in_frame_present_flag
    pub bottom_field_pic_order_in_frame_present: bool,
    /// num_slice_groups_minus1 + 1
    pub num_slice_groups: u32,
    /// num_ref_idx_l0_default_active_minus1
    pub num_ref_idx_l0_default_active_minus1: u32,
    /// num_ref_idx_l1_default_active_minus1
    pub num_ref_idx_l1_default_active_minus1: u32,
    /// weighted_pred_flag
    pub weighted_pred: bool,
    /// weighted_bipred_idc
    pub weighted_bipred_idc: u32,
    /// pic_init_qp_minus26 + 26
    pub pic_init_qp: i32,
    /// chroma_qp_index_offset
    pub chroma_qp_index_offset: i32,
    /// deblocking_filter_control_present_flag
    pub deblocking_filter_control_present: bool,
    /// constrained_intra_pred_flag
    pub constrained_intra_pred: bool,
    /// redundant_pic_cnt_present_flag
    pub redundant_pic_cnt_present: bool,
    /// transform_8x8_mode_flag
    pub transform_8x8_mode: bool,
    /// second_chroma_qp_index_offset
    pub second_chroma_qp_index_offset: i32,
}

/// 解析 PPS
///
/// `chroma_format_idc` 为所引用 SPS 的色度格式, 仅在 PPS 携带 8x8 量化矩阵时使用.
pub fn parse_pps(rbsp: &[u8], chroma_format_idc: impl Fn(u32) -> Option<u32>) -> HwdecResult<Pps> {
    if rbsp.is_empty() {
        return Err(HwdecError::InvalidData("H.264: PPS RBSP 为空".into()));
    }

    let mut br = BitReader::new(rbsp);
    let pps_id = br.read_ue()?;
    if pps_id > 255 {
        return Err(HwdecError::InvalidData(format!(
            "H.264: pps_id 超出范围, pps_id={}",
            pps_id
        )));
    }
    let sps_id = br.read_ue()?;
    if sps_id > 31 {
        return Err(HwdecError::InvalidData(format!(
            "H.264: sps_id 超出范围, sps_id={}",
            sps_id
        )));
    }

    let entropy_coding_mode = br.read_flag()?;
    let bottom_field_pic_order_in_frame_present = br.read_flag()?;

    let num_slice_groups_minus1 = br.read_ue()?;
    if num_slice_groups_minus1 > 7 {
        return Err(HwdecError::InvalidData(format!(
            "H.264: num_slice_groups_minus1 超出范围, value={}",
            num_slice_groups_minus1
        )));
    }
    if num_slice_groups_minus1 > 0 {
        skip_slice_groups(&mut br, num_slice_groups_minus1)?;
    }

    let num_ref_idx_l0_default_active_minus1 = br.read_ue()?;
    let num_ref_idx_l1_default_active_minus1 = br.read_ue()?;
    if num_ref_idx_l0_default_active_minus1 > 31 || num_ref_idx_l1_default_active_minus1 > 31 {
        return Err(HwdecError::InvalidData(format!(
            "H.264: num_ref_idx_default_active_minus1 超出范围, l0={}, l1={}",
            num_ref_idx_l0_default_active_minus1, num_ref_idx_l1_default_active_minus1
        )));
    }

    let weighted_pred = br.read_flag()?;
    let weighted_bipred_idc = br.read_bits(2)?;
    if weighted_bipred_idc > 2 {
        return Err(HwdecError::InvalidData(format!(
            "H.264: weighted_bipred_idc 非法, value={}",
            weighted_bipred_idc
        )));
    }

    let pic_init_qp = 26 + br.read_se()?;
    if !(0..=51).contains(&pic_init_qp) {
        return Err(HwdecError::InvalidData(format!(
            "H.264: pic_init_qp 超出范围, pic_init_qp={}",
            pic_init_qp
        )));
    }
    br.read_se()?; // pic_init_qs_minus26
    let chroma_qp_index_offset = br.read_se()?;
    let deblocking_filter_control_present = br.read_flag()?;
    let constrained_intra_pred = br.read_flag()?;
    let redundant_pic_cnt_present = br.read_flag()?;

    let mut transform_8x8_mode = false;
    let mut second_chroma_qp_index_offset = chroma_qp_index_offset;
    if br.more_rbsp_data() {
        transform_8x8_mode = br.read_flag()?;
        if br.read_flag()? {
            let chroma = chroma_format_idc(sps_id).unwrap_or(1);
            let list_count = 6 + if transform_8x8_mode {
                if chroma == 3 { 6 } else { 2 }
            } else {
                0
            };
            for i in 0..list_count {
                if br.read_flag()? {
                    skip_scaling_list(&mut br, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
        second_chroma_qp_index_offset = br.read_se()?;
    }

    Ok(Pps {
        pps_id,
        sps_id,
        entropy_coding_mode,
        bottom_field_pic_order_in_frame_present,
        num_slice_groups: num_slice_groups_minus1 + 1,
        num_ref_idx_l0_default_active_minus1,
        num_ref_idx_l1_default_active_minus1,
        weighted_pred,
        weighted_bipred_idc,
        pic_init_qp,
        chroma_qp_index_offset,
        deblocking_filter_control_present,
        constrained_intra_pred,
        redundant_pic_cnt_present,
        transform_8x8_mode,
        second_chroma_qp_index_offset,
    })
}

fn skip_slice_groups(br: &mut BitReader, num_slice_groups_minus1: u32) -> HwdecResult<()> {
    let slice_group_map_type = br.read_ue()?;
    match slice_group_map_type {
        0 => {
            for _ in 0..=num_slice_groups_minus1 {
                br.read_ue()?; // run_length_minus1
            }
        }
        1 => {}
        2 => {
            for _ in 0..num_slice_groups_minus1 {
                br.read_ue()?; // top_left
                br.read_ue()?; // bottom_right
            }
        }
        3..=5 => {
            br.skip_bits(1)?; // slice_group_change_direction_flag
            br.read_ue()?; // slice_group_change_rate_minus1
        }
        6 => {
            let pic_size_in_map_units = br.read_ue()? as usize + 1;
            let bits_per_id = u32::BITS - num_slice_groups_minus1.leading_zeros();
            br.skip_bits(pic_size_in_map_units * bits_per_id as usize)?;
        }
        _ => {
            return Err(HwdecError::InvalidData(format!(
                "H.264: slice_group_map_type 非法, value={}",
                slice_group_map_type
            )));
        }
    }
    Ok(())
}
