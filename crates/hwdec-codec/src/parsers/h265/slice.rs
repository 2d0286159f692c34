//! H.265 slice segment header 解析.
//!
//! 解析到 ref_pic_lists_modification() 为止. 短期 RPS 与长期参考条目在此处展开,
//! DeltaPocMsbCycleLt 已累加, 上层可直接用于 RPS 推导.

use hwdec_core::bitreader::BitReader;
use hwdec_core::{HwdecError, HwdecResult};

use super::nal::{HevcNalUnit, HevcNalUnitType};
use super::pps::HevcPps;
use super::rps::{ShortTermRps, parse_st_ref_pic_set};
use super::sps::HevcSps;

/// slice 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HevcSliceType {
    /// B slice
    B,
    /// P slice
    P,
    /// I slice
    I,
}

impl HevcSliceType {
    fn from_raw(raw: u32) -> HwdecResult<Self> {
        match raw {
            0 => Ok(Self::B),
            1 => Ok(Self::P),
            2 => Ok(Self::I),
            _ => Err(HwdecError::InvalidData(format!(
                "HEVC: slice_type 非法, value={}",
                raw
            ))),
        }
    }

    /// 是否为 B slice
    pub fn is_b(&self) -> bool {
        matches!(self, Self::B)
    }

    /// 是否为 I slice
    pub fn is_intra(&self) -> bool {
        matches!(self, Self::I)
    }
}

/// 片头中的一条长期参考条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongTermRef {
    /// PocLsbLt[i]
    pub poc_lsb: u32,
    /// UsedByCurrPicLt[i]
    pub used_by_curr: bool,
    /// delta_poc_msb_present_flag[i]
    pub delta_poc_msb_present: bool,
    /// DeltaPocMsbCycleLt[i] (已累加)
    pub delta_poc_msb_cycle: u32,
}

/// slice segment header 解析结果
#[derive(Debug, Clone)]
pub struct HevcSliceHeader {
    /// NAL 类型
    pub nal_type: HevcNalUnitType,
    /// TemporalId
    pub temporal_id: u8,
    /// first_slice_segment_in_pic_flag
    pub first_slice_segment_in_pic: bool,
    /// no_output_of_prior_pics_flag (仅 IRAP)
    pub no_output_of_prior_pics: bool,
    /// slice_pic_parameter_set_id
    pub pps_id: u32,
    /// dependent_slice_segment_flag
    pub dependent_slice_segment: bool,
    /// slice_segment_address
    pub slice_segment_address: u32,
    /// slice 类型
    pub slice_type: HevcSliceType,
    /// pic_output_flag (缺省为 1)
    pub pic_output_flag: bool,
    /// colour_plane_id
    pub colour_plane_id: u32,
    /// slice_pic_order_cnt_lsb (IDR 为 0)
    pub pic_order_cnt_lsb: u32,
    /// short_term_ref_pic_set_sps_flag
    pub short_term_ref_pic_set_sps_flag: bool,
    /// short_term_ref_pic_set_idx
    pub short_term_ref_pic_set_idx: u32,
    /// 当前图像使用的短期 RPS (已展开)
    pub short_term_rps: ShortTermRps,
    /// 片头内显式 st_ref_pic_set() 占用的比特数
    pub st_rps_bits: usize,
    /// 长期参考条目
    pub long_term_refs: Vec<LongTermRef>,
    /// slice_temporal_mvp_enabled_flag
    pub temporal_mvp_enabled: bool,
    /// slice_sao_luma_flag
    pub sao_luma: bool,
    /// slice_sao_chroma_flag
    pub sao_chroma: bool,
    /// num_ref_idx_l0_active_minus1 (已应用 PPS 默认值)
    pub num_ref_idx_l0_active_minus1: u32,
    /// num_ref_idx_l1_active_minus1 (已应用 PPS 默认值)
    pub num_ref_idx_l1_active_minus1: u32,
    /// list_entry_l0 (ref_pic_list_modification_flag_l0 = 1 时存在)
    pub list_entry_l0: Option<Vec<u32>>,
    /// list_entry_l1
    pub list_entry_l1: Option<Vec<u32>>,
    /// NumPicTotalCurr
    pub num_pic_total_curr: u32,
    /// 片头解析结束时的比特偏移 (至 ref_pic_lists_modification 之后)
    pub header_bits: usize,
}

impl HevcSliceHeader {
    /// 当前 slice 的 L0 活跃参考数
    pub fn num_ref_idx_l0_active(&self) -> usize {
        if self.slice_type.is_intra() {
            0
        } else {
            self.num_ref_idx_l0_active_minus1 as usize + 1
        }
    }

    /// 当前 slice 的 L1 活跃参考数
    pub fn num_ref_idx_l1_active(&self) -> usize {
        if self.slice_type.is_b() {
            self.num_ref_idx_l1_active_minus1 as usize + 1
        } else {
            0
        }
    }
}

/// Ceil(Log2(n))
fn ceil_log2(n: u32) -> u32 {
    if n <= 1 { 0 } else { 32 - (n - 1).leading_zeros() }
}

/// 解析 slice segment header
///
/// `find_pps` 按 pps_id 查找 PPS 及其引用的 SPS. 依赖 slice 段需要 `prev` 提供同一图像
/// 最近一个独立 slice 段的片头, 其字段被继承.
pub fn parse_hevc_slice_header<'p>(
    nalu: &HevcNalUnit,
    rbsp: &[u8],
    prev: Option<&HevcSliceHeader>,
    find_pps: impl FnOnce(u32) -> Option<(&'p HevcPps, &'p HevcSps)>,
) -> HwdecResult<HevcSliceHeader> {
    let nal_type = nalu.nal_type;
    let mut br = BitReader::new(rbsp);

    let first_slice_segment_in_pic = br.read_flag()?;
    let no_output_of_prior_pics = nal_type.is_irap() && br.read_flag()?;
    let pps_id = br.read_ue()?;
    let (pps, sps) = find_pps(pps_id)
        .ok_or_else(|| HwdecError::InvalidData(format!("HEVC: 未找到 PPS id={}", pps_id)))?;

    let mut dependent_slice_segment = false;
    let mut slice_segment_address = 0;
    if !first_slice_segment_in_pic {
        if pps.dependent_slice_segments_enabled {
            dependent_slice_segment = br.read_flag()?;
        }
        slice_segment_address = br.read_bits(ceil_log2(sps.pic_size_in_ctbs()))?;
    }

    if dependent_slice_segment {
        let prev = prev.ok_or_else(|| {
            HwdecError::InvalidData("HEVC: 依赖 slice 段缺少前置独立 slice 段".into())
        })?;
        return Ok(HevcSliceHeader {
            nal_type,
            temporal_id: nalu.temporal_id,
            first_slice_segment_in_pic,
            no_output_of_prior_pics,
            pps_id,
            dependent_slice_segment,
            slice_segment_address,
            header_bits: br.bits_read(),
            ..prev.clone()
        });
    }

    br.skip_bits(pps.num_extra_slice_header_bits as usize)?; // slice_reserved_flag
    let slice_type = HevcSliceType::from_raw(br.read_ue()?)?;
    let pic_output_flag = if pps.output_flag_present {
        br.read_flag()?
    } else {
        true
    };
    let colour_plane_id = if sps.separate_colour_plane_flag {
        br.read_bits(2)?
    } else {
        0
    };

    let mut pic_order_cnt_lsb = 0;
    let mut short_term_ref_pic_set_sps_flag = false;
    let mut short_term_ref_pic_set_idx = 0;
    let mut short_term_rps = ShortTermRps::default();
    let mut st_rps_bits = 0;
    let mut long_term_refs = Vec::new();
    let mut temporal_mvp_enabled = false;

    if !nal_type.is_idr() {
        pic_order_cnt_lsb = br.read_bits(sps.log2_max_poc_lsb)?;

        let num_sets = sps.short_term_ref_pic_sets.len();
        short_term_ref_pic_set_sps_flag = br.read_flag()?;
        if !short_term_ref_pic_set_sps_flag {
            let start = br.bits_read();
            short_term_rps = parse_st_ref_pic_set(
                &mut br,
                num_sets,
                &sps.short_term_ref_pic_sets,
                num_sets,
            )?;
            st_rps_bits = br.bits_read() - start;
        } else {
            if num_sets == 0 {
                return Err(HwdecError::InvalidData(
                    "HEVC: 片头引用 SPS RPS, 但 SPS 未定义任何 RPS".into(),
                ));
            }
            if num_sets > 1 {
                short_term_ref_pic_set_idx = br.read_bits(ceil_log2(num_sets as u32))?;
            }
            short_term_rps = sps
                .short_term_ref_pic_sets
                .get(short_term_ref_pic_set_idx as usize)
                .cloned()
                .ok_or_else(|| {
                    HwdecError::InvalidData(format!(
                        "HEVC: short_term_ref_pic_set_idx 超出范围, value={}",
                        short_term_ref_pic_set_idx
                    ))
                })?;
        }

        if sps.long_term_ref_pics_present {
            long_term_refs = parse_long_term_refs(&mut br, sps)?;
        }

        if sps.temporal_mvp_enabled {
            temporal_mvp_enabled = br.read_flag()?;
        }
    }

    let mut sao_luma = false;
    let mut sao_chroma = false;
    if sps.sample_adaptive_offset_enabled {
        sao_luma = br.read_flag()?;
        if sps.chroma_array_type() != 0 {
            sao_chroma = br.read_flag()?;
        }
    }

    let num_pic_total_curr = (short_term_rps.num_used_by_curr()
        + long_term_refs.iter().filter(|lt| lt.used_by_curr).count())
        as u32;

    let mut num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
    let mut num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;
    let mut list_entry_l0 = None;
    let mut list_entry_l1 = None;
    if !slice_type.is_intra() {
        if br.read_flag()? {
            num_ref_idx_l0_active_minus1 = br.read_ue()?;
            if slice_type.is_b() {
                num_ref_idx_l1_active_minus1 = br.read_ue()?;
            }
        }
        if num_ref_idx_l0_active_minus1 > 14 || num_ref_idx_l1_active_minus1 > 14 {
            return Err(HwdecError::InvalidData(format!(
                "HEVC: num_ref_idx_active_minus1 超出范围, l0={}, l1={}",
                num_ref_idx_l0_active_minus1, num_ref_idx_l1_active_minus1
            )));
        }

        if pps.lists_modification_present && num_pic_total_curr > 1 {
            let entry_bits = ceil_log2(num_pic_total_curr);
            if br.read_flag()? {
                list_entry_l0 = Some(read_list_entries(
                    &mut br,
                    num_ref_idx_l0_active_minus1,
                    entry_bits,
                    num_pic_total_curr,
                )?);
            }
            if slice_type.is_b() && br.read_flag()? {
                list_entry_l1 = Some(read_list_entries(
                    &mut br,
                    num_ref_idx_l1_active_minus1,
                    entry_bits,
                    num_pic_total_curr,
                )?);
            }
        }
    }

    Ok(HevcSliceHeader {
        nal_type,
        temporal_id: nalu.temporal_id,
        first_slice_segment_in_pic,
        no_output_of_prior_pics,
        pps_id,
        dependent_slice_segment,
        slice_segment_address,
        slice_type,
        pic_output_flag,
        colour_plane_id,
        pic_order_cnt_lsb,
        short_term_ref_pic_set_sps_flag,
        short_term_ref_pic_set_idx,
        short_term_rps,
        st_rps_bits,
        long_term_refs,
        temporal_mvp_enabled,
        sao_luma,
        sao_chroma,
        num_ref_idx_l0_active_minus1,
        num_ref_idx_l1_active_minus1,
        list_entry_l0,
        list_entry_l1,
        num_pic_total_curr,
        header_bits: br.bits_read(),
    })
}

/// 解析片头中的长期参考条目, 并累加 DeltaPocMsbCycleLt
fn parse_long_term_refs(br: &mut BitReader, sps: &HevcSps) -> HwdecResult<Vec<LongTermRef>> {
    let num_lt_sps_candidates = sps.lt_ref_pic_poc_lsb_sps.len();
    let num_long_term_sps = if num_lt_sps_candidates > 0 {
        br.read_ue()? as usize
    } else {
        0
    };
    if num_long_term_sps > num_lt_sps_candidates {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: num_long_term_sps 超出范围, value={}, candidates={}",
            num_long_term_sps, num_lt_sps_candidates
        )));
    }
    let num_long_term_pics = br.read_ue()? as usize;
    // DeltaPocMsbCycleLt 上限 2^(32 - log2_max_poc_lsb)
    let max_msb_cycle = 1u64 << (32 - sps.log2_max_poc_lsb);
    let total = num_long_term_sps + num_long_term_pics;
    if total > 32 {
        return Err(HwdecError::InvalidData(format!(
            "HEVC: 长期参考条目过多, value={}",
            total
        )));
    }

    let lt_idx_bits = ceil_log2(num_lt_sps_candidates as u32);
    let mut refs: Vec<LongTermRef> = Vec::with_capacity(total);
    for i in 0..total {
        let (poc_lsb, used_by_curr) = if i < num_long_term_sps {
            let lt_idx = if num_lt_sps_candidates > 1 {
                br.read_bits(lt_idx_bits)? as usize
            } else {
                0
            };
            let poc_lsb = *sps.lt_ref_pic_poc_lsb_sps.get(lt_idx).ok_or_else(|| {
                HwdecError::InvalidData(format!("HEVC: lt_idx_sps 超出范围, value={}", lt_idx))
            })?;
            (poc_lsb, sps.used_by_curr_pic_lt_sps[lt_idx])
        } else {
            (br.read_bits(sps.log2_max_poc_lsb)?, br.read_flag()?)
        };

        let delta_poc_msb_present = br.read_flag()?;
        let mut delta_poc_msb_cycle = if delta_poc_msb_present {
            br.read_ue()?
        } else {
            0
        };
        // 式 7-52: 每组 (SPS 候选 / 片头显式) 的首个条目重新开始累加
        if i != 0 && i != num_long_term_sps {
            delta_poc_msb_cycle = delta_poc_msb_cycle.saturating_add(refs[i - 1].delta_poc_msb_cycle);
        }
        if u64::from(delta_poc_msb_cycle) > max_msb_cycle {
            return Err(HwdecError::InvalidData(format!(
                "HEVC: delta_poc_msb_cycle_lt 超出范围, value={}, max={}",
                delta_poc_msb_cycle, max_msb_cycle
            )));
        }

        refs.push(LongTermRef {
            poc_lsb,
            used_by_curr,
            delta_poc_msb_present,
            delta_poc_msb_cycle,
        });
    }
    Ok(refs)
}

fn read_list_entries(
    br: &mut BitReader,
    num_active_minus1: u32,
    entry_bits: u32,
    num_pic_total_curr: u32,
) -> HwdecResult<Vec<u32>> {
    let mut entries = Vec::with_capacity(num_active_minus1 as usize + 1);
    for _ in 0..=num_active_minus1 {
        let entry = br.read_bits(entry_bits)?;
        if entry >= num_pic_total_curr {
            return Err(HwdecError::InvalidData(format!(
                "HEVC: list_entry 超出范围, value={}, NumPicTotalCurr={}",
                entry, num_pic_total_curr
            )));
        }
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::h265::{parse_hevc_pps, parse_hevc_sps};
    use crate::test_streams::h265::{PpsBuilder, SliceBuilder, SpsBuilder};

    fn params() -> (HevcSps, HevcPps) {
        let sps = parse_hevc_sps(
            &SpsBuilder::new(416, 240)
                .short_term_sets(vec![vec![-1], vec![-1, -2]])
                .long_term_sps(vec![(3, true), (5, false)])
                .rbsp(),
        )
        .unwrap();
        let pps = parse_hevc_pps(&PpsBuilder::new(0, 0).lists_modification(true).rbsp()).unwrap();
        (sps, pps)
    }

    fn parse(nal: &[u8], sps: &HevcSps, pps: &HevcPps) -> HevcSliceHeader {
        let nalu = HevcNalUnit::parse(nal).unwrap();
        parse_hevc_slice_header(&nalu, &nalu.rbsp(), None, |_| Some((pps, sps))).unwrap()
    }

    #[test]
    fn test_idr_slice_header() {
        let (sps, pps) = params();
        let nal = SliceBuilder::idr().nal(&sps, &pps);
        let header = parse(&nal, &sps, &pps);

        assert!(header.first_slice_segment_in_pic);
        assert_eq!(header.slice_type, HevcSliceType::I);
        assert_eq!(header.pic_order_cnt_lsb, 0);
        assert_eq!(header.short_term_rps.num_delta_pocs(), 0);
        assert!(header.pic_output_flag);
    }

    #[test]
    fn test_sps_rps_reference() {
        let (sps, pps) = params();
        let nal = SliceBuilder::trail(HevcSliceType::P, 5)
            .sps_rps_idx(1)
            .nal(&sps, &pps);
        let header = parse(&nal, &sps, &pps);

        assert_eq!(header.pic_order_cnt_lsb, 5);
        assert!(header.short_term_ref_pic_set_sps_flag);
        assert_eq!(header.short_term_rps.delta_poc_s0, vec![-1, -2]);
        assert_eq!(header.num_pic_total_curr, 2);
        assert_eq!(header.st_rps_bits, 0);
    }

    #[test]
    fn test_explicit_rps_and_list_modification() {
        let (sps, pps) = params();
        let nal = SliceBuilder::trail(HevcSliceType::B, 8)
            .explicit_rps(vec![-2, -4], vec![4])
            .num_ref_idx(1, 0)
            .list_entry_l0(vec![2, 0])
            .nal(&sps, &pps);
        let header = parse(&nal, &sps, &pps);

        assert_eq!(header.short_term_rps.delta_poc_s0, vec![-2, -4]);
        assert_eq!(header.short_term_rps.delta_poc_s1, vec![4]);
        assert!(header.st_rps_bits > 0);
        assert_eq!(header.num_pic_total_curr, 3);
        assert_eq!(header.num_ref_idx_l0_active(), 2);
        assert_eq!(header.num_ref_idx_l1_active(), 1);
        assert_eq!(header.list_entry_l0, Some(vec![2, 0]));
        assert_eq!(header.list_entry_l1, None);
    }

    #[test]
    fn test_long_term_msb_cycle_accumulates() {
        let (sps, pps) = params();
        // 1 个 SPS 候选 + 2 个显式条目
        let nal = SliceBuilder::trail(HevcSliceType::P, 9)
            .sps_rps_idx(0)
            .long_term(1, vec![(1, true, Some(1)), (7, true, Some(2)), (2, false, Some(3))])
            .nal(&sps, &pps);
        let header = parse(&nal, &sps, &pps);

        assert_eq!(header.long_term_refs.len(), 3);
        assert_eq!(header.long_term_refs[0].poc_lsb, 5);
        assert!(!header.long_term_refs[0].used_by_curr);
        assert_eq!(header.long_term_refs[0].delta_poc_msb_cycle, 1);
        // 显式组首条目重新开始
        assert_eq!(header.long_term_refs[1].poc_lsb, 7);
        assert_eq!(header.long_term_refs[1].delta_poc_msb_cycle, 2);
        assert_eq!(header.long_term_refs[2].delta_poc_msb_cycle, 5);
        // 1 个短期 + 1 个长期用于当前图像
        assert_eq!(header.num_pic_total_curr, 2);
    }

    #[test]
    fn test_long_term_msb_cycle_out_of_range_rejected() {
        let (sps, pps) = params();
        let limit = 1u32 << (32 - sps.log2_max_poc_lsb);
        for entries in [
            vec![(7, true, Some(u32::MAX))],
            vec![(7, true, Some(limit + 1))],
            // 单项合法, 累加后越界
            vec![(7, true, Some(limit)), (6, true, Some(1))],
        ] {
            let nal = SliceBuilder::trail(HevcSliceType::P, 9)
                .sps_rps_idx(0)
                .long_term(0, entries)
                .nal(&sps, &pps);
            let nalu = HevcNalUnit::parse(&nal).unwrap();
            let err = parse_hevc_slice_header(&nalu, &nalu.rbsp(), None, |_| Some((&pps, &sps)))
                .unwrap_err();
            assert!(err.to_string().contains("delta_poc_msb_cycle_lt"), "错误: {}", err);
        }
    }

    #[test]
    fn test_dependent_segment_requires_previous_header() {
        let (sps, pps) = params();
        let pps = HevcPps {
            dependent_slice_segments_enabled: true,
            ..pps
        };
        let nal = SliceBuilder::trail(HevcSliceType::P, 3)
            .sps_rps_idx(0)
            .dependent(10)
            .nal(&sps, &pps);
        let nalu = HevcNalUnit::parse(&nal).unwrap();
        let result = parse_hevc_slice_header(&nalu, &nalu.rbsp(), None, |_| Some((&pps, &sps)));
        assert!(result.is_err());

        let first = parse(&SliceBuilder::trail(HevcSliceType::P, 3).sps_rps_idx(0).nal(&sps, &pps), &sps, &pps);
        let dep = parse_hevc_slice_header(&nalu, &nalu.rbsp(), Some(&first), |_| Some((&pps, &sps)))
            .unwrap();
        assert!(dep.dependent_slice_segment);
        assert_eq!(dep.slice_segment_address, 10);
        assert_eq!(dep.pic_order_cnt_lsb, 3);
        assert_eq!(dep.short_term_rps, first.short_term_rps);
    }

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(390), 9);
    }
}
