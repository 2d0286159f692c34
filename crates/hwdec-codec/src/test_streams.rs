//! 测试用码流构造器.
//!
//! 用 [`BitWriter`] 按语法顺序写出 SPS / PPS / slice header, 生成可被本 crate 解析器
//! 直接消费的 NAL 单元. 只覆盖解码前端会读取的语法元素, slice data 部分留空.

use hwdec_core::BitWriter;

use crate::parsers::bytestream::add_emulation_prevention;

/// 拼接为 Annex B 字节流 (4 字节起始码)
pub fn annex_b(nals: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

/// 拼接为长度前缀格式
pub fn length_prefixed(nals: &[Vec<u8>], length_size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        let len = (nal.len() as u32).to_be_bytes();
        out.extend_from_slice(&len[4 - length_size..]);
        out.extend_from_slice(nal);
    }
    out
}

fn ceil_log2(n: u32) -> u32 {
    if n <= 1 { 0 } else { 32 - (n - 1).leading_zeros() }
}

/// H.264 码流构造器
pub mod h264 {
    use super::*;
    use crate::parsers::h264::{MmcoOp, Pps, RefPicListMod, Sps};

    /// SPS 构造器
    #[derive(Debug, Clone)]
    pub struct SpsBuilder {
        profile_idc: u8,
        constraint_flags: u8,
        level_idc: u8,
        sps_id: u32,
        log2_max_frame_num: u32,
        poc_type: u32,
        log2_max_poc_lsb: u32,
        delta_pic_order_always_zero: bool,
        offset_for_non_ref_pic: i32,
        offset_for_top_to_bottom_field: i32,
        offset_for_ref_frame: Vec<i32>,
        max_num_ref_frames: u32,
        gaps_allowed: bool,
        width: u32,
        height: u32,
        frame_mbs_only: bool,
        bitstream_restriction: Option<(u32, u32)>,
    }

    impl SpsBuilder {
        /// Baseline, level 3.0, MaxFrameNum=16, POC type 0 (MaxPocLsb=256), 4 参考帧
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                profile_idc: 66,
                constraint_flags: 0,
                level_idc: 30,
                sps_id: 0,
                log2_max_frame_num: 4,
                poc_type: 0,
                log2_max_poc_lsb: 8,
                delta_pic_order_always_zero: false,
                offset_for_non_ref_pic: 0,
                offset_for_top_to_bottom_field: 0,
                offset_for_ref_frame: Vec::new(),
                max_num_ref_frames: 4,
                gaps_allowed: false,
                width,
                height,
                frame_mbs_only: true,
                bitstream_restriction: None,
            }
        }

        pub fn profile(mut self, profile_idc: u8) -> Self {
            self.profile_idc = profile_idc;
            self
        }

        pub fn constraint_flags(mut self, flags: u8) -> Self {
            self.constraint_flags = flags;
            self
        }

        pub fn level(mut self, level_idc: u8) -> Self {
            self.level_idc = level_idc;
            self
        }

        pub fn sps_id(mut self, sps_id: u32) -> Self {
            self.sps_id = sps_id;
            self
        }

        pub fn log2_max_frame_num(mut self, bits: u32) -> Self {
            self.log2_max_frame_num = bits;
            self
        }

        pub fn log2_max_poc_lsb(mut self, bits: u32) -> Self {
            self.log2_max_poc_lsb = bits;
            self
        }

        pub fn poc_type1(
            mut self,
            always_zero: bool,
            offset_for_non_ref_pic: i32,
            offset_for_top_to_bottom_field: i32,
            offset_for_ref_frame: Vec<i32>,
        ) -> Self {
            self.poc_type = 1;
            self.delta_pic_order_always_zero = always_zero;
            self.offset_for_non_ref_pic = offset_for_non_ref_pic;
            self.offset_for_top_to_bottom_field = offset_for_top_to_bottom_field;
            self.offset_for_ref_frame = offset_for_ref_frame;
            self
        }

        pub fn poc_type2(mut self) -> Self {
            self.poc_type = 2;
            self
        }

        pub fn max_num_ref_frames(mut self, n: u32) -> Self {
            self.max_num_ref_frames = n;
            self
        }

        pub fn gaps_allowed(mut self, allowed: bool) -> Self {
            self.gaps_allowed = allowed;
            self
        }

        pub fn frame_mbs_only(mut self, frame_mbs_only: bool) -> Self {
            self.frame_mbs_only = frame_mbs_only;
            self
        }

        pub fn bitstream_restriction(mut self, reorder: u32, max_dec_frame_buffering: u32) -> Self {
            self.bitstream_restriction = Some((reorder, max_dec_frame_buffering));
            self
        }

        /// 生成 SPS RBSP
        pub fn rbsp(&self) -> Vec<u8> {
            let mut bw = BitWriter::new();
            bw.write_bits(u32::from(self.profile_idc), 8);
            bw.write_bits(u32::from(self.constraint_flags), 8);
            bw.write_bits(u32::from(self.level_idc), 8);
            bw.write_ue(self.sps_id);
            if matches!(self.profile_idc, 100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128) {
                bw.write_ue(1); // chroma_format_idc
                bw.write_ue(0); // bit_depth_luma_minus8
                bw.write_ue(0); // bit_depth_chroma_minus8
                bw.write_flag(false); // qpprime_y_zero_transform_bypass_flag
                bw.write_flag(false); // seq_scaling_matrix_present_flag
            }
            bw.write_ue(self.log2_max_frame_num - 4);
            bw.write_ue(self.poc_type);
            match self.poc_type {
                0 => bw.write_ue(self.log2_max_poc_lsb - 4),
                1 => {
                    bw.write_flag(self.delta_pic_order_always_zero);
                    bw.write_se(self.offset_for_non_ref_pic);
                    bw.write_se(self.offset_for_top_to_bottom_field);
                    bw.write_ue(self.offset_for_ref_frame.len() as u32);
                    for &offset in &self.offset_for_ref_frame {
                        bw.write_se(offset);
                    }
                }
                _ => {}
            }
            bw.write_ue(self.max_num_ref_frames);
            bw.write_flag(self.gaps_allowed);

            let width_mbs = self.width.div_ceil(16);
            let map_unit_height = if self.frame_mbs_only { 16 } else { 32 };
            let height_map_units = self.height.div_ceil(map_unit_height);
            bw.write_ue(width_mbs - 1);
            bw.write_ue(height_map_units - 1);
            bw.write_flag(self.frame_mbs_only);
            if !self.frame_mbs_only {
                bw.write_flag(false); // mb_adaptive_frame_field_flag
            }
            bw.write_flag(true); // direct_8x8_inference_flag

            let crop_unit_y = if self.frame_mbs_only { 2 } else { 4 };
            let crop_right = (width_mbs * 16 - self.width) / 2;
            let crop_bottom = (height_map_units * map_unit_height - self.height) / crop_unit_y;
            let cropping = crop_right != 0 || crop_bottom != 0;
            bw.write_flag(cropping);
            if cropping {
                bw.write_ue(0);
                bw.write_ue(crop_right);
                bw.write_ue(0);
                bw.write_ue(crop_bottom);
            }

            bw.write_flag(self.bitstream_restriction.is_some()); // vui_parameters_present_flag
            if let Some((reorder, dec_buf)) = self.bitstream_restriction {
                for _ in 0..5 {
                    bw.write_flag(false); // aspect/overscan/video_signal/chroma_loc/timing
                }
                bw.write_flag(false); // nal_hrd_parameters_present_flag
                bw.write_flag(false); // vcl_hrd_parameters_present_flag
                bw.write_flag(false); // pic_struct_present_flag
                bw.write_flag(true); // bitstream_restriction_flag
                bw.write_flag(true); // motion_vectors_over_pic_boundaries_flag
                bw.write_ue(0);
                bw.write_ue(0);
                bw.write_ue(16);
                bw.write_ue(16);
                bw.write_ue(reorder);
                bw.write_ue(dec_buf);
            }
            bw.write_trailing_bits();
            bw.finish()
        }

        /// 生成含 NAL 头的 SPS
        pub fn nal(&self) -> Vec<u8> {
            let mut nal = vec![0x67];
            nal.extend(add_emulation_prevention(&self.rbsp()));
            nal
        }
    }

    /// PPS 构造器
    #[derive(Debug, Clone)]
    pub struct PpsBuilder {
        pps_id: u32,
        sps_id: u32,
        bottom_field_pic_order: bool,
        num_ref_idx_l0_default_minus1: u32,
        num_ref_idx_l1_default_minus1: u32,
    }

    impl PpsBuilder {
        pub fn new(pps_id: u32, sps_id: u32) -> Self {
            Self {
                pps_id,
                sps_id,
                bottom_field_pic_order: false,
                num_ref_idx_l0_default_minus1: 0,
                num_ref_idx_l1_default_minus1: 0,
            }
        }

        pub fn num_ref_idx_default(mut self, l0_minus1: u32, l1_minus1: u32) -> Self {
            self.num_ref_idx_l0_default_minus1 = l0_minus1;
            self.num_ref_idx_l1_default_minus1 = l1_minus1;
            self
        }

        pub fn bottom_field_pic_order(mut self, present: bool) -> Self {
            self.bottom_field_pic_order = present;
            self
        }

        /// 生成 PPS RBSP
        pub fn rbsp(&self) -> Vec<u8> {
            let mut bw = BitWriter::new();
            bw.write_ue(self.pps_id);
            bw.write_ue(self.sps_id);
            bw.write_flag(false); // entropy_coding_mode_flag
            bw.write_flag(self.bottom_field_pic_order);
            bw.write_ue(0); // num_slice_groups_minus1
            bw.write_ue(self.num_ref_idx_l0_default_minus1);
            bw.write_ue(self.num_ref_idx_l1_default_minus1);
            bw.write_flag(false); // weighted_pred_flag
            bw.write_bits(0, 2); // weighted_bipred_idc
            bw.write_se(0); // pic_init_qp_minus26
            bw.write_se(0); // pic_init_qs_minus26
            bw.write_se(0); // chroma_qp_index_offset
            bw.write_flag(true); // deblocking_filter_control_present_flag
            bw.write_flag(false); // constrained_intra_pred_flag
            bw.write_flag(false); // redundant_pic_cnt_present_flag
            bw.write_trailing_bits();
            bw.finish()
        }

        /// 生成含 NAL 头的 PPS
        pub fn nal(&self) -> Vec<u8> {
            let mut nal = vec![0x68];
            nal.extend(add_emulation_prevention(&self.rbsp()));
            nal
        }
    }

    /// slice header 构造器
    #[derive(Debug, Clone)]
    pub struct SliceBuilder {
        idr: bool,
        ref_idc: u8,
        first_mb: u32,
        slice_type: u32,
        pps_id: u32,
        frame_num: u32,
        field: Option<bool>,
        idr_pic_id: u32,
        poc_lsb: u32,
        delta_poc_bottom: i32,
        delta_poc: [i32; 2],
        num_ref_idx: Option<(u32, u32)>,
        list0_mods: Vec<RefPicListMod>,
        list1_mods: Vec<RefPicListMod>,
        mmco: Option<Vec<MmcoOp>>,
        no_output_of_prior_pics: bool,
        long_term_reference: bool,
    }

    impl SliceBuilder {
        fn with(idr: bool, ref_idc: u8, slice_type: u32, frame_num: u32) -> Self {
            Self {
                idr,
                ref_idc,
                first_mb: 0,
                slice_type,
                pps_id: 0,
                frame_num,
                field: None,
                idr_pic_id: 0,
                poc_lsb: 0,
                delta_poc_bottom: 0,
                delta_poc: [0; 2],
                num_ref_idx: None,
                list0_mods: Vec::new(),
                list1_mods: Vec::new(),
                mmco: None,
                no_output_of_prior_pics: false,
                long_term_reference: false,
            }
        }

        /// IDR I slice, nal_ref_idc=3
        pub fn idr() -> Self {
            Self::with(true, 3, 7, 0)
        }

        /// 非 IDR I slice, nal_ref_idc=2
        pub fn i(frame_num: u32) -> Self {
            Self::with(false, 2, 7, frame_num)
        }

        /// P slice, nal_ref_idc=2
        pub fn p(frame_num: u32) -> Self {
            Self::with(false, 2, 5, frame_num)
        }

        /// B slice, nal_ref_idc=0
        pub fn b(frame_num: u32) -> Self {
            Self::with(false, 0, 6, frame_num)
        }

        pub fn ref_idc(mut self, ref_idc: u8) -> Self {
            self.ref_idc = ref_idc;
            self
        }

        pub fn first_mb(mut self, first_mb: u32) -> Self {
            self.first_mb = first_mb;
            self
        }

        pub fn pps_id(mut self, pps_id: u32) -> Self {
            self.pps_id = pps_id;
            self
        }

        pub fn poc_lsb(mut self, lsb: u32) -> Self {
            self.poc_lsb = lsb;
            self
        }

        pub fn delta_poc_bottom(mut self, delta: i32) -> Self {
            self.delta_poc_bottom = delta;
            self
        }

        pub fn delta_poc(mut self, delta0: i32, delta1: i32) -> Self {
            self.delta_poc = [delta0, delta1];
            self
        }

        pub fn idr_pic_id(mut self, id: u32) -> Self {
            self.idr_pic_id = id;
            self
        }

        /// 显式覆盖 num_ref_idx_active_minus1
        pub fn num_ref_idx(mut self, l0_minus1: u32, l1_minus1: u32) -> Self {
            self.num_ref_idx = Some((l0_minus1, l1_minus1));
            self
        }

        pub fn list0_mods(mut self, mods: Vec<RefPicListMod>) -> Self {
            self.list0_mods = mods;
            self
        }

        pub fn list1_mods(mut self, mods: Vec<RefPicListMod>) -> Self {
            self.list1_mods = mods;
            self
        }

        /// 启用自适应标记并写入给定的 MMCO 操作
        pub fn mmco(mut self, ops: Vec<MmcoOp>) -> Self {
            self.mmco = Some(ops);
            self
        }

        /// 场图像, `bottom` 指定底场
        pub fn field(mut self, bottom: bool) -> Self {
            self.field = Some(bottom);
            self
        }

        pub fn no_output_of_prior_pics(mut self) -> Self {
            self.no_output_of_prior_pics = true;
            self
        }

        pub fn long_term_reference(mut self) -> Self {
            self.long_term_reference = true;
            self
        }

        /// 生成含 NAL 头的 slice NAL
        pub fn nal(&self, sps: &Sps, pps: &Pps) -> Vec<u8> {
            let mut bw = BitWriter::new();
            let is_b = self.slice_type % 5 == 1;
            let is_intra = self.slice_type % 5 == 2;
            let field_pic = self.field.is_some();

            bw.write_ue(self.first_mb);
            bw.write_ue(self.slice_type);
            bw.write_ue(self.pps_id);
            if sps.separate_colour_plane_flag {
                bw.write_bits(0, 2);
            }
            bw.write_bits(self.frame_num % sps.max_frame_num(), sps.log2_max_frame_num);
            if !sps.frame_mbs_only {
                bw.write_flag(field_pic);
                if let Some(bottom) = self.field {
                    bw.write_flag(bottom);
                }
            }
            if self.idr {
                bw.write_ue(self.idr_pic_id);
            }

            let bottom_present = pps.bottom_field_pic_order_in_frame_present && !field_pic;
            if sps.poc_type == 0 {
                bw.write_bits(self.poc_lsb % sps.max_poc_lsb(), sps.log2_max_poc_lsb);
                if bottom_present {
                    bw.write_se(self.delta_poc_bottom);
                }
            } else if sps.poc_type == 1 && !sps.delta_pic_order_always_zero_flag {
                bw.write_se(self.delta_poc[0]);
                if bottom_present {
                    bw.write_se(self.delta_poc[1]);
                }
            }
            if pps.redundant_pic_cnt_present {
                bw.write_ue(0);
            }
            if is_b {
                bw.write_flag(true); // direct_spatial_mv_pred_flag
            }
            if !is_intra {
                bw.write_flag(self.num_ref_idx.is_some());
                if let Some((l0, l1)) = self.num_ref_idx {
                    bw.write_ue(l0);
                    if is_b {
                        bw.write_ue(l1);
                    }
                }
                write_list_mods(&mut bw, &self.list0_mods);
                if is_b {
                    write_list_mods(&mut bw, &self.list1_mods);
                }
            }
            if self.ref_idc != 0 {
                if self.idr {
                    bw.write_flag(self.no_output_of_prior_pics);
                    bw.write_flag(self.long_term_reference);
                } else {
                    bw.write_flag(self.mmco.is_some());
                    if let Some(ops) = &self.mmco {
                        for op in ops {
                            write_mmco(&mut bw, op);
                        }
                        bw.write_ue(0);
                    }
                }
            }
            bw.write_ue(0); // slice_qp_delta
            bw.write_trailing_bits();

            let nal_type = if self.idr { 5 } else { 1 };
            let mut nal = vec![(self.ref_idc << 5) | nal_type];
            nal.extend(add_emulation_prevention(&bw.finish()));
            nal
        }
    }

    fn write_list_mods(bw: &mut BitWriter, mods: &[RefPicListMod]) {
        bw.write_flag(!mods.is_empty());
        if mods.is_empty() {
            return;
        }
        for m in mods {
            match *m {
                RefPicListMod::ShortTermSub {
                    abs_diff_pic_num_minus1,
                } => {
                    bw.write_ue(0);
                    bw.write_ue(abs_diff_pic_num_minus1);
                }
                RefPicListMod::ShortTermAdd {
                    abs_diff_pic_num_minus1,
                } => {
                    bw.write_ue(1);
                    bw.write_ue(abs_diff_pic_num_minus1);
                }
                RefPicListMod::LongTerm { long_term_pic_num } => {
                    bw.write_ue(2);
                    bw.write_ue(long_term_pic_num);
                }
            }
        }
        bw.write_ue(3);
    }

    fn write_mmco(bw: &mut BitWriter, op: &MmcoOp) {
        match *op {
            MmcoOp::ForgetShort {
                difference_of_pic_nums_minus1,
            } => {
                bw.write_ue(1);
                bw.write_ue(difference_of_pic_nums_minus1);
            }
            MmcoOp::ForgetLong { long_term_pic_num } => {
                bw.write_ue(2);
                bw.write_ue(long_term_pic_num);
            }
            MmcoOp::ConvertShortToLong {
                difference_of_pic_nums_minus1,
                long_term_frame_idx,
            } => {
                bw.write_ue(3);
                bw.write_ue(difference_of_pic_nums_minus1);
                bw.write_ue(long_term_frame_idx);
            }
            MmcoOp::TrimLong {
                max_long_term_frame_idx_plus1,
            } => {
                bw.write_ue(4);
                bw.write_ue(max_long_term_frame_idx_plus1);
            }
            MmcoOp::ClearAll => bw.write_ue(5),
            MmcoOp::MarkCurrentLong {
                long_term_frame_idx,
            } => {
                bw.write_ue(6);
                bw.write_ue(long_term_frame_idx);
            }
        }
    }

    /// 序列结束 NAL
    pub fn end_of_sequence() -> Vec<u8> {
        vec![0x0A]
    }
}

/// H.265 码流构造器
pub mod h265 {
    use super::*;
    use crate::parsers::h265::{HevcNalUnitType, HevcPps, HevcSliceType, HevcSps};

    fn nal_header(nal_type: HevcNalUnitType, temporal_id: u8) -> Vec<u8> {
        vec![nal_type.id() << 1, temporal_id + 1]
    }

    /// 显式写出 st_ref_pic_set(), 所有条目均用于当前图像
    fn write_explicit_rps(bw: &mut BitWriter, has_inter_flag: bool, deltas: &[i32]) {
        if has_inter_flag {
            bw.write_flag(false); // inter_ref_pic_set_prediction_flag
        }
        let negative: Vec<i32> = deltas.iter().copied().filter(|&d| d < 0).collect();
        let positive: Vec<i32> = deltas.iter().copied().filter(|&d| d > 0).collect();
        bw.write_ue(negative.len() as u32);
        bw.write_ue(positive.len() as u32);
        let mut prev = 0;
        for d in negative {
            bw.write_ue((prev - d - 1) as u32);
            bw.write_flag(true);
            prev = d;
        }
        prev = 0;
        for d in positive {
            bw.write_ue((d - prev - 1) as u32);
            bw.write_flag(true);
            prev = d;
        }
    }

    /// SPS 构造器
    #[derive(Debug, Clone)]
    pub struct SpsBuilder {
        width: u32,
        height: u32,
        log2_max_poc_lsb: u32,
        max_dec_pic_buffering_minus1: u32,
        max_num_reorder: u32,
        latency_increase_plus1: u32,
        short_term_sets: Vec<Vec<i32>>,
        long_term_sps: Option<Vec<(u32, bool)>>,
    }

    impl SpsBuilder {
        /// Main profile, MaxPocLsb=256, CTB 16x16, DPB 5 帧, 重排序 2
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                log2_max_poc_lsb: 8,
                max_dec_pic_buffering_minus1: 4,
                max_num_reorder: 2,
                latency_increase_plus1: 0,
                short_term_sets: Vec::new(),
                long_term_sps: None,
            }
        }

        pub fn log2_max_poc_lsb(mut self, bits: u32) -> Self {
            self.log2_max_poc_lsb = bits;
            self
        }

        /// 设置 sps_max_dec_pic_buffering_minus1 与 sps_max_num_reorder_pics
        pub fn dpb(mut self, max_dec_pic_buffering_minus1: u32, max_num_reorder: u32) -> Self {
            self.max_dec_pic_buffering_minus1 = max_dec_pic_buffering_minus1;
            self.max_num_reorder = max_num_reorder;
            self
        }

        pub fn latency_increase_plus1(mut self, value: u32) -> Self {
            self.latency_increase_plus1 = value;
            self
        }

        /// 每个集合为 delta POC 列表, 负值进入 S0, 正值进入 S1
        pub fn short_term_sets(mut self, sets: Vec<Vec<i32>>) -> Self {
            self.short_term_sets = sets;
            self
        }

        /// 长期参考候选 (lt_ref_pic_poc_lsb_sps, used_by_curr_pic_lt_sps_flag)
        pub fn long_term_sps(mut self, candidates: Vec<(u32, bool)>) -> Self {
            self.long_term_sps = Some(candidates);
            self
        }

        /// 生成 SPS RBSP
        pub fn rbsp(&self) -> Vec<u8> {
            let mut bw = BitWriter::new();
            bw.write_bits(0, 4); // sps_video_parameter_set_id
            bw.write_bits(0, 3); // sps_max_sub_layers_minus1
            bw.write_flag(true); // sps_temporal_id_nesting_flag

            // profile_tier_level
            bw.write_bits(0, 3); // general_profile_space + general_tier_flag
            bw.write_bits(1, 5); // general_profile_idc = Main
            bw.write_bits(0x6000, 16);
            bw.write_bits(0, 16);
            bw.write_bits(0x90_0000, 24);
            bw.write_bits(0, 24);
            bw.write_bits(93, 8); // general_level_idc

            bw.write_ue(0); // sps_seq_parameter_set_id
            bw.write_ue(1); // chroma_format_idc
            let pic_width = self.width.div_ceil(8) * 8;
            let pic_height = self.height.div_ceil(8) * 8;
            bw.write_ue(pic_width);
            bw.write_ue(pic_height);
            let window = pic_width != self.width || pic_height != self.height;
            bw.write_flag(window);
            if window {
                bw.write_ue(0);
                bw.write_ue((pic_width - self.width) / 2);
                bw.write_ue(0);
                bw.write_ue((pic_height - self.height) / 2);
            }
            bw.write_ue(0); // bit_depth_luma_minus8
            bw.write_ue(0); // bit_depth_chroma_minus8
            bw.write_ue(self.log2_max_poc_lsb - 4);

            bw.write_flag(true); // sps_sub_layer_ordering_info_present_flag
            bw.write_ue(self.max_dec_pic_buffering_minus1);
            bw.write_ue(self.max_num_reorder);
            bw.write_ue(self.latency_increase_plus1);

            bw.write_ue(0); // log2_min_luma_coding_block_size_minus3
            bw.write_ue(1); // log2_diff_max_min_luma_coding_block_size
            bw.write_ue(0); // log2_min_luma_transform_block_size_minus2
            bw.write_ue(2); // log2_diff_max_min_luma_transform_block_size
            bw.write_ue(0); // max_transform_hierarchy_depth_inter
            bw.write_ue(0); // max_transform_hierarchy_depth_intra
            bw.write_flag(false); // scaling_list_enabled_flag
            bw.write_flag(false); // amp_enabled_flag
            bw.write_flag(false); // sample_adaptive_offset_enabled_flag
            bw.write_flag(false); // pcm_enabled_flag

            bw.write_ue(self.short_term_sets.len() as u32);
            for (i, set) in self.short_term_sets.iter().enumerate() {
                write_explicit_rps(&mut bw, i != 0, set);
            }

            bw.write_flag(self.long_term_sps.is_some());
            if let Some(candidates) = &self.long_term_sps {
                bw.write_ue(candidates.len() as u32);
                for &(lsb, used) in candidates {
                    bw.write_bits(lsb, self.log2_max_poc_lsb);
                    bw.write_flag(used);
                }
            }
            bw.write_flag(false); // sps_temporal_mvp_enabled_flag
            bw.write_flag(false); // strong_intra_smoothing_enabled_flag
            bw.write_flag(false); // vui_parameters_present_flag
            bw.write_flag(false); // sps_extension_present_flag
            bw.write_trailing_bits();
            bw.finish()
        }

        /// 生成含 NAL 头的 SPS
        pub fn nal(&self) -> Vec<u8> {
            let mut nal = nal_header(HevcNalUnitType::Sps, 0);
            nal.extend(add_emulation_prevention(&self.rbsp()));
            nal
        }
    }

    /// PPS 构造器
    #[derive(Debug, Clone)]
    pub struct PpsBuilder {
        pps_id: u32,
        sps_id: u32,
        dependent_slices: bool,
        output_flag_present: bool,
        num_ref_idx_l0_default_minus1: u32,
        num_ref_idx_l1_default_minus1: u32,
        lists_modification: bool,
    }

    impl PpsBuilder {
        pub fn new(pps_id: u32, sps_id: u32) -> Self {
            Self {
                pps_id,
                sps_id,
                dependent_slices: false,
                output_flag_present: false,
                num_ref_idx_l0_default_minus1: 0,
                num_ref_idx_l1_default_minus1: 0,
                lists_modification: false,
            }
        }

        pub fn num_ref_idx_default(mut self, l0_minus1: u32, l1_minus1: u32) -> Self {
            self.num_ref_idx_l0_default_minus1 = l0_minus1;
            self.num_ref_idx_l1_default_minus1 = l1_minus1;
            self
        }

        pub fn dependent_slices(mut self, enabled: bool) -> Self {
            self.dependent_slices = enabled;
            self
        }

        pub fn output_flag_present(mut self, present: bool) -> Self {
            self.output_flag_present = present;
            self
        }

        pub fn lists_modification(mut self, present: bool) -> Self {
            self.lists_modification = present;
            self
        }

        /// 生成 PPS RBSP
        pub fn rbsp(&self) -> Vec<u8> {
            let mut bw = BitWriter::new();
            bw.write_ue(self.pps_id);
            bw.write_ue(self.sps_id);
            bw.write_flag(self.dependent_slices);
            bw.write_flag(self.output_flag_present);
            bw.write_bits(0, 3); // num_extra_slice_header_bits
            bw.write_flag(false); // sign_data_hiding_enabled_flag
            bw.write_flag(false); // cabac_init_present_flag
            bw.write_ue(self.num_ref_idx_l0_default_minus1);
            bw.write_ue(self.num_ref_idx_l1_default_minus1);
            bw.write_se(0); // init_qp_minus26
            bw.write_flag(false); // constrained_intra_pred_flag
            bw.write_flag(false); // transform_skip_enabled_flag
            bw.write_flag(false); // cu_qp_delta_enabled_flag
            bw.write_se(0); // pps_cb_qp_offset
            bw.write_se(0); // pps_cr_qp_offset
            bw.write_flag(false); // pps_slice_chroma_qp_offsets_present_flag
            bw.write_flag(false); // weighted_pred_flag
            bw.write_flag(false); // weighted_bipred_flag
            bw.write_flag(false); // transquant_bypass_enabled_flag
            bw.write_flag(false); // tiles_enabled_flag
            bw.write_flag(false); // entropy_coding_sync_enabled_flag
            bw.write_flag(false); // pps_loop_filter_across_slices_enabled_flag
            bw.write_flag(false); // deblocking_filter_control_present_flag
            bw.write_flag(false); // pps_scaling_list_data_present_flag
            bw.write_flag(self.lists_modification);
            bw.write_ue(0); // log2_parallel_merge_level_minus2
            bw.write_flag(false); // slice_segment_header_extension_present_flag
            bw.write_flag(false); // pps_extension_present_flag
            bw.write_trailing_bits();
            bw.finish()
        }

        /// 生成含 NAL 头的 PPS
        pub fn nal(&self) -> Vec<u8> {
            let mut nal = nal_header(HevcNalUnitType::Pps, 0);
            nal.extend(add_emulation_prevention(&self.rbsp()));
            nal
        }
    }

    #[derive(Debug, Clone)]
    enum RpsChoice {
        Sps(u32),
        Explicit(Vec<i32>),
    }

    /// slice segment header 构造器
    #[derive(Debug, Clone)]
    pub struct SliceBuilder {
        nal_type: HevcNalUnitType,
        temporal_id: u8,
        dependent_address: Option<u32>,
        no_output_of_prior_pics: bool,
        pps_id: u32,
        slice_type: HevcSliceType,
        pic_output_flag: bool,
        poc_lsb: u32,
        rps: RpsChoice,
        long_term: (u32, Vec<(u32, bool, Option<u32>)>),
        num_ref_idx: Option<(u32, u32)>,
        list_entry_l0: Option<Vec<u32>>,
        list_entry_l1: Option<Vec<u32>>,
    }

    impl SliceBuilder {
        fn with(nal_type: HevcNalUnitType, slice_type: HevcSliceType, poc_lsb: u32) -> Self {
            Self {
                nal_type,
                temporal_id: 0,
                dependent_address: None,
                no_output_of_prior_pics: false,
                pps_id: 0,
                slice_type,
                pic_output_flag: true,
                poc_lsb,
                rps: RpsChoice::Explicit(Vec::new()),
                long_term: (0, Vec::new()),
                num_ref_idx: None,
                list_entry_l0: None,
                list_entry_l1: None,
            }
        }

        /// IDR_W_RADL I slice
        pub fn idr() -> Self {
            Self::with(HevcNalUnitType::IdrWRadl, HevcSliceType::I, 0)
        }

        /// CRA I slice
        pub fn cra(poc_lsb: u32) -> Self {
            Self::with(HevcNalUnitType::Cra, HevcSliceType::I, poc_lsb)
        }

        /// TRAIL_R slice
        pub fn trail(slice_type: HevcSliceType, poc_lsb: u32) -> Self {
            Self::with(HevcNalUnitType::TrailR, slice_type, poc_lsb)
        }

        pub fn nal_type(mut self, nal_type: HevcNalUnitType) -> Self {
            self.nal_type = nal_type;
            self
        }

        pub fn temporal_id(mut self, temporal_id: u8) -> Self {
            self.temporal_id = temporal_id;
            self
        }

        pub fn pps_id(mut self, pps_id: u32) -> Self {
            self.pps_id = pps_id;
            self
        }

        pub fn no_output_of_prior_pics(mut self) -> Self {
            self.no_output_of_prior_pics = true;
            self
        }

        pub fn pic_output(mut self, output: bool) -> Self {
            self.pic_output_flag = output;
            self
        }

        /// 非首个 slice 段, 作为依赖 slice 段写出
        pub fn dependent(mut self, address: u32) -> Self {
            self.dependent_address = Some(address);
            self
        }

        /// 引用 SPS 中第 idx 个 RPS
        pub fn sps_rps_idx(mut self, idx: u32) -> Self {
            self.rps = RpsChoice::Sps(idx);
            self
        }

        /// 片头内显式 RPS, 所有条目均用于当前图像
        pub fn explicit_rps(mut self, negative: Vec<i32>, positive: Vec<i32>) -> Self {
            self.rps = RpsChoice::Explicit(negative.into_iter().chain(positive).collect());
            self
        }

        /// 长期参考条目: 前 `num_sps` 个为 (lt_idx_sps, -, msb_cycle), 其后为 (poc_lsb, used, msb_cycle)
        pub fn long_term(mut self, num_sps: u32, entries: Vec<(u32, bool, Option<u32>)>) -> Self {
            self.long_term = (num_sps, entries);
            self
        }

        pub fn num_ref_idx(mut self, l0_minus1: u32, l1_minus1: u32) -> Self {
            self.num_ref_idx = Some((l0_minus1, l1_minus1));
            self
        }

        pub fn list_entry_l0(mut self, entries: Vec<u32>) -> Self {
            self.list_entry_l0 = Some(entries);
            self
        }

        pub fn list_entry_l1(mut self, entries: Vec<u32>) -> Self {
            self.list_entry_l1 = Some(entries);
            self
        }

        /// 生成含 NAL 头的 slice NAL
        pub fn nal(&self, sps: &HevcSps, pps: &HevcPps) -> Vec<u8> {
            let mut bw = BitWriter::new();
            let first = self.dependent_address.is_none();
            bw.write_flag(first);
            if self.nal_type.is_irap() {
                bw.write_flag(self.no_output_of_prior_pics);
            }
            bw.write_ue(self.pps_id);
            if let Some(address) = self.dependent_address {
                if pps.dependent_slice_segments_enabled {
                    bw.write_flag(true);
                }
                bw.write_bits(address, ceil_log2(sps.pic_size_in_ctbs()));
                bw.write_trailing_bits();
                return self.finish_nal(bw);
            }

            bw.write_bits(0, pps.num_extra_slice_header_bits);
            bw.write_ue(match self.slice_type {
                HevcSliceType::B => 0,
                HevcSliceType::P => 1,
                HevcSliceType::I => 2,
            });
            if pps.output_flag_present {
                bw.write_flag(self.pic_output_flag);
            }
            if sps.separate_colour_plane_flag {
                bw.write_bits(0, 2);
            }

            let mut num_pic_total_curr = 0;
            if !self.nal_type.is_idr() {
                bw.write_bits(self.poc_lsb % sps.max_poc_lsb() as u32, sps.log2_max_poc_lsb);
                let num_sets = sps.short_term_ref_pic_sets.len();
                match &self.rps {
                    RpsChoice::Sps(idx) => {
                        bw.write_flag(true);
                        if num_sets > 1 {
                            bw.write_bits(*idx, ceil_log2(num_sets as u32));
                        }
                        num_pic_total_curr +=
                            sps.short_term_ref_pic_sets[*idx as usize].num_used_by_curr();
                    }
                    RpsChoice::Explicit(deltas) => {
                        bw.write_flag(false);
                        write_explicit_rps(&mut bw, num_sets != 0, deltas);
                        num_pic_total_curr += deltas.len();
                    }
                }

                if sps.long_term_ref_pics_present {
                    let (num_sps, entries) = &self.long_term;
                    let candidates = sps.lt_ref_pic_poc_lsb_sps.len();
                    if candidates > 0 {
                        bw.write_ue(*num_sps);
                    }
                    bw.write_ue(entries.len() as u32 - num_sps);
                    for (i, &(value, used, msb)) in entries.iter().enumerate() {
                        if (i as u32) < *num_sps {
                            if candidates > 1 {
                                bw.write_bits(value, ceil_log2(candidates as u32));
                            }
                            if sps.used_by_curr_pic_lt_sps[value as usize] {
                                num_pic_total_curr += 1;
                            }
                        } else {
                            bw.write_bits(value, sps.log2_max_poc_lsb);
                            bw.write_flag(used);
                            if used {
                                num_pic_total_curr += 1;
                            }
                        }
                        bw.write_flag(msb.is_some());
                        if let Some(cycle) = msb {
                            bw.write_ue(cycle);
                        }
                    }
                }
                if sps.temporal_mvp_enabled {
                    bw.write_flag(false);
                }
            }

            if sps.sample_adaptive_offset_enabled {
                bw.write_flag(false);
                if sps.chroma_array_type() != 0 {
                    bw.write_flag(false);
                }
            }

            if !self.slice_type.is_intra() {
                bw.write_flag(self.num_ref_idx.is_some());
                if let Some((l0, l1)) = self.num_ref_idx {
                    bw.write_ue(l0);
                    if self.slice_type.is_b() {
                        bw.write_ue(l1);
                    }
                }
                if pps.lists_modification_present && num_pic_total_curr > 1 {
                    let bits = ceil_log2(num_pic_total_curr as u32);
                    write_list_entries(&mut bw, self.list_entry_l0.as_deref(), bits);
                    if self.slice_type.is_b() {
                        write_list_entries(&mut bw, self.list_entry_l1.as_deref(), bits);
                    }
                }
            }
            bw.write_trailing_bits();
            self.finish_nal(bw)
        }

        fn finish_nal(&self, bw: BitWriter) -> Vec<u8> {
            let mut nal = nal_header(self.nal_type, self.temporal_id);
            nal.extend(add_emulation_prevention(&bw.finish()));
            nal
        }
    }

    fn write_list_entries(bw: &mut BitWriter, entries: Option<&[u32]>, bits: u32) {
        bw.write_flag(entries.is_some());
        for &entry in entries.unwrap_or_default() {
            bw.write_bits(entry, bits);
        }
    }

    /// 序列结束 NAL
    pub fn end_of_sequence() -> Vec<u8> {
        nal_header(HevcNalUnitType::Eos, 0)
    }
}
