//! H.265/HEVC PPS 解析器.
//!
//! 只保留片头解析与参考列表构建依赖的字段, tiles / 去块滤波 / 缩放列表等结构被跳过.

use hwdec_core::bitreader::BitReader;
use hwdec_core::{HwdecError, HwdecResult};

use super::sps::skip_scaling_list_data;

/// PPS 解析结果
#[derive(Debug, Clone)]
pub struct HevcPps {
    /// PPS ID
    pub pps_id: u32,
    /// 引用的 SPS ID
    pub sps_id: u32,
    /// dependent_slice_segments_enabled_flag
    pub dependent_slice_segments_enabled: bool,
    /// output_flag_present_flag
    pub output_flag_present: bool,
    /// num_extra_slice_header_bits
    pub num_extra_slice_header_bits: u32,
    /// cabac_init_present_flag
    pub cabac_init_present: bool,
    /// num_ref_idx_l0_default_active_minus1
    pub num_ref_idx_l0_default_active_minus1: u32,
    /// num_ref_idx_l1_default_active_minus1
    pub num_ref_idx_l1_default_active_minus1: u32,
    /// init_qp_minus26
    pub init_qp_minus26: i32,
    /// weighted_pred_flag
    pub weighted_pred: bool,
    /// weighted_bipred_flag
    pub weighted_bipred: bool,
    /// tiles_enabled_flag
    pub tiles_enabled: bool,
    /// entropy_coding_sync_enabled_flag
    pub entropy_coding_sync_enabled: bool,
    /// lists_modification_present_flag
    pub lists_modification_present: bool,
    /// slice_segment_header_extension_present_flag
    pub slice_segment_header_extension_present: bool,
}

/// 解析 HEVC PPS
pub fn parse_hevc_pps(rbsp: &[u8]) -> HwdecResult<HevcPps> {
    let mut br = BitReader::new(rbsp);

    let pps_id = br.read_ue()?;
    if pps_id > 63 {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: pps_id 超出范围, value={}",
            pps_id
        )));
    }
    let sps_id = br.read_ue()?;
    if sps_id > 15 {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: PPS 引用的 sps_id 超出范围, value={}",
            sps_id
        )));
    }

    let dependent_slice_segments_enabled = br.read_flag()?;
    let output_flag_present = br.read_flag()?;
    let num_extra_slice_header_bits = br.read_bits(3)?;
    br.skip_bits(1)?; // sign_data_hiding_enabled_flag
    let cabac_init_present = br.read_flag()?;

    let num_ref_idx_l0_default_active_minus1 = br.read_ue()?;
    let num_ref_idx_l1_default_active_minus1 = br.read_ue()?;
    if num_ref_idx_l0_default_active_minus1 > 14 || num_ref_idx_l1_default_active_minus1 > 14 {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: 默认参考索引数超出范围, l0={}, l1={}",
            num_ref_idx_l0_default_active_minus1, num_ref_idx_l1_default_active_minus1
        )));
    }
    let init_qp_minus26 = br.read_se()?;

    br.skip_bits(2)?; // constrained_intra_pred_flag + transform_skip_enabled_flag
    if br.read_flag()? {
        br.read_ue()?; // diff_cu_qp_delta_depth
    }
    br.read_se()?; // pps_cb_qp_offset
    br.read_se()?; // pps_cr_qp_offset
    br.skip_bits(1)?; // pps_slice_chroma_qp_offsets_present_flag

    let weighted_pred = br.read_flag()?;
    let weighted_bipred = br.read_flag()?;
    br.skip_bits(1)?; // transquant_bypass_enabled_flag
    let tiles_enabled = br.read_flag()?;
    let entropy_coding_sync_enabled = br.read_flag()?;

    if tiles_enabled {
        let num_tile_columns_minus1 = br.read_ue()?;
        let num_tile_rows_minus1 = br.read_ue()?;
        if num_tile_columns_minus1 > 19 || num_tile_rows_minus1 > 21 {
            return Err(HwdecError::InvalidData(format!(
                "HEVC: tile 划分超出范围, cols_minus1={}, rows_minus1={}",
                num_tile_columns_minus1, num_tile_rows_minus1
            )));
        }
        let uniform_spacing = br.read_flag()?;
        if !uniform_spacing {
            for _ in 0..num_tile_columns_minus1 + num_tile_rows_minus1 {
                br.read_ue()?; // column_width_minus1 / row_height_minus1
            }
        }
        br.skip_bits(1)?; // loop_filter_across_tiles_enabled_flag
    }

    br.skip_bits(1)?; // pps_loop_filter_across_slices_enabled_flag
    if br.read_flag()? {
        br.skip_bits(1)?; // deblocking_filter_override_enabled_flag
        if !br.read_flag()? {
            br.read_se()?; // pps_beta_offset_div2
            br.read_se()?; // pps_tc_offset_div2
        }
    }

    if br.read_flag()? {
        skip_scaling_list_data(&mut br)?;
    }

    let lists_modification_present = br.read_flag()?;
    br.read_ue()?; // log2_parallel_merge_level_minus2
    let slice_segment_header_extension_present = br.read_flag()?;

    Ok(HevcPps {
        pps_id,
        sps_id,
        dependent_slice_segments_enabled,
        output_flag_present,
        num_extra_slice_header_bits,
        cabac_init_present,
        num_ref_idx_l0_default_active_minus1,
        num_ref_idx_l1_default_active_minus1,
        init_qp_minus26,
        weighted_pred,
        weighted_bipred,
        tiles_enabled,
        entropy_coding_sync_enabled,
        lists_modification_present,
        slice_segment_header_extension_present,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_streams::h265::PpsBuilder;

    #[test]
    fn test_pps_basic_fields() {
        let rbsp = PpsBuilder::new(3, 0)
            .num_ref_idx_default(1, 0)
            .output_flag_present(true)
            .lists_modification(true)
            .rbsp();
        let pps = parse_hevc_pps(&rbsp).unwrap();

        assert_eq!(pps.pps_id, 3);
        assert_eq!(pps.sps_id, 0);
        assert_eq!(pps.num_ref_idx_l0_default_active_minus1, 1);
        assert_eq!(pps.num_ref_idx_l1_default_active_minus1, 0);
        assert!(pps.output_flag_present);
        assert!(pps.lists_modification_present);
        assert!(!pps.dependent_slice_segments_enabled);
    }

    #[test]
    fn test_pps_id_out_of_range() {
        let mut bw = hwdec_core::BitWriter::new();
        bw.write_ue(64);
        bw.write_ue(0);
        bw.write_trailing_bits();
        assert!(parse_hevc_pps(&bw.finish()).is_err());
    }
}
