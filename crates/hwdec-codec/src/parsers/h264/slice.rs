//! H.264 slice header 解析.
//!
//! 解析到 dec_ref_pic_marking() 为止, 覆盖 POC 推导、参考列表构建与参考帧标记所需的全部语法元素.
//! 其后的熵解码相关字段由硬件加速器自行处理.

use hwdec_core::bitreader::BitReader;
use hwdec_core::{HwdecError, HwdecResult};

use super::nal::{NalUnit, NalUnitType};
use super::pps::Pps;
use super::sps::Sps;

/// 单个 slice 中允许的 MMCO 操作上限
const MAX_MMCO_OPS: usize = 66;

/// LongTermFrameIdx 上限 (不超过 DPB 容量)
const MAX_LONG_TERM_FRAME_IDX: u32 = 15;

/// LongTermPicNum 上限, 场图像为 2 * LongTermFrameIdx + 1
const LONG_TERM_PIC_NUM_LIMIT: u32 = 2 * MAX_LONG_TERM_FRAME_IDX + 2;

/// 读取 ue(v) 并检查 `value < limit`
fn read_ue_below(br: &mut BitReader, name: &str, limit: u32) -> HwdecResult<u32> {
    let value = br.read_ue()?;
    if value >= limit {
        return Err(HwdecError::InvalidData(format!(
            "H.264: {} 超出范围, value={}, limit={}",
            name, value, limit
        )));
    }
    Ok(value)
}

/// slice 类型 (slice_type % 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    /// P slice
    P,
    /// B slice
    B,
    /// I slice
    I,
    /// SP slice
    Sp,
    /// SI slice
    Si,
}

impl SliceType {
    fn from_raw(raw: u32) -> HwdecResult<Self> {
        let slice_type = match raw {
            0 | 5 => Self::P,
            1 | 6 => Self::B,
            2 | 7 => Self::I,
            3 | 8 => Self::Sp,
            4 | 9 => Self::Si,
            _ => {
                return Err(HwdecError::InvalidData(format!(
                    "H.264: slice_type 非法, value={}",
                    raw
                )));
            }
        };
        Ok(slice_type)
    }

    /// 是否为 B slice
    pub fn is_b(&self) -> bool {
        matches!(self, Self::B)
    }

    /// 是否为帧内 slice (I/SI)
    pub fn is_intra(&self) -> bool {
        matches!(self, Self::I | Self::Si)
    }
}

/// ref_pic_list_modification 单条操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPicListMod {
    /// modification_of_pic_nums_idc = 0
    ShortTermSub { abs_diff_pic_num_minus1: u32 },
    /// modification_of_pic_nums_idc = 1
    ShortTermAdd { abs_diff_pic_num_minus1: u32 },
    /// modification_of_pic_nums_idc = 2
    LongTerm { long_term_pic_num: u32 },
}

/// 自适应参考帧标记操作 (memory_management_control_operation)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmcoOp {
    /// MMCO1: 短期参考标记为不用于参考
    ForgetShort { difference_of_pic_nums_minus1: u32 },
    /// MMCO2: 长期参考标记为不用于参考
    ForgetLong { long_term_pic_num: u32 },
    /// MMCO3: 短期参考转为长期参考
    ConvertShortToLong {
        difference_of_pic_nums_minus1: u32,
        long_term_frame_idx: u32,
    },
    /// MMCO4: 设置 MaxLongTermFrameIdx
    TrimLong { max_long_term_frame_idx_plus1: u32 },
    /// MMCO5: 清空全部参考
    ClearAll,
    /// MMCO6: 当前图像标记为长期参考
    MarkCurrentLong { long_term_frame_idx: u32 },
}

/// dec_ref_pic_marking() 语法结构
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecRefPicMarking {
    /// no_output_of_prior_pics_flag (仅 IDR)
    pub no_output_of_prior_pics: bool,
    /// long_term_reference_flag (仅 IDR)
    pub long_term_reference_flag: bool,
    /// adaptive_ref_pic_marking_mode_flag
    pub adaptive: bool,
    /// MMCO 操作列表
    pub ops: Vec<MmcoOp>,
}

impl DecRefPicMarking {
    /// 是否包含 MMCO5
    pub fn has_mmco5(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, MmcoOp::ClearAll))
    }
}

/// slice header 解析结果
#[derive(Debug, Clone)]
pub struct SliceHeader {
    /// NAL 类型
    pub nal_type: NalUnitType,
    /// nal_ref_idc
    pub nal_ref_idc: u8,
    /// first_mb_in_slice
    pub first_mb_in_slice: u32,
    /// slice 类型
    pub slice_type: SliceType,
    /// pic_parameter_set_id
    pub pps_id: u32,
    /// colour_plane_id
    pub colour_plane_id: u32,
    /// frame_num
    pub frame_num: u32,
    /// field_pic_flag
    pub field_pic: bool,
    /// bottom_field_flag
    pub bottom_field: bool,
    /// idr_pic_id
    pub idr_pic_id: u32,
    /// pic_order_cnt_lsb
    pub pic_order_cnt_lsb: u32,
    /// delta_pic_order_cnt_bottom
    pub delta_pic_order_cnt_bottom: i32,
    /// delta_pic_order_cnt[0..2]
    pub delta_pic_order_cnt: [i32; 2],
    /// redundant_pic_cnt
    pub redundant_pic_cnt: u32,
    /// direct_spatial_mv_pred_flag
    pub direct_spatial_mv_pred: bool,
    /// num_ref_idx_l0_active_minus1 (已应用 PPS 默认值)
    pub num_ref_idx_l0_active_minus1: u32,
    /// num_ref_idx_l1_active_minus1 (已应用 PPS 默认值)
    pub num_ref_idx_l1_active_minus1: u32,
    /// list0 修改操作
    pub ref_pic_list_mod_l0: Vec<RefPicListMod>,
    /// list1 修改操作
    pub ref_pic_list_mod_l1: Vec<RefPicListMod>,
    /// 参考帧标记
    pub dec_ref_pic_marking: DecRefPicMarking,
    /// 解析结束时的比特位置 (相对 RBSP 起点)
    pub header_bits: usize,
}

impl SliceHeader {
    /// IdrPicFlag
    pub fn is_idr(&self) -> bool {
        self.nal_type.is_idr()
    }

    /// 当前图像是否用作参考
    pub fn is_reference(&self) -> bool {
        self.nal_ref_idc != 0
    }

    /// 当前 slice 是否带 MMCO5
    pub fn has_mmco5(&self) -> bool {
        self.dec_ref_pic_marking.has_mmco5()
    }
}

/// 从 RBSP 解析 slice header
///
/// `find_pps` 按 pps_id 查找 PPS 及其引用的 SPS.
pub fn parse_slice_header<'p>(
    nalu: &NalUnit,
    rbsp: &[u8],
    find_pps: impl FnOnce(u32) -> Option<(&'p Pps, &'p Sps)>,
) -> HwdecResult<SliceHeader> {
    if nalu.nal_type.is_vcl() && !matches!(nalu.nal_type, NalUnitType::Slice | NalUnitType::SliceIdr)
    {
        return Err(HwdecError::Unsupported(format!(
            "H.264: 不支持数据分区 slice, nal_type={}",
            nalu.nal_type
        )));
    }

    let mut br = BitReader::new(rbsp);
    let first_mb_in_slice = br.read_ue()?;
    let slice_type = SliceType::from_raw(br.read_ue()?)?;
    let pps_id = br.read_ue()?;
    let (pps, sps) = find_pps(pps_id)
        .ok_or_else(|| HwdecError::InvalidData(format!("H.264: 未找到 PPS id={}", pps_id)))?;

    let is_idr = nalu.nal_type.is_idr();
    let colour_plane_id = if sps.separate_colour_plane_flag {
        br.read_bits(2)?
    } else {
        0
    };
    let frame_num = br.read_bits(sps.log2_max_frame_num)?;

    let mut field_pic = false;
    let mut bottom_field = false;
    if !sps.frame_mbs_only {
        field_pic = br.read_flag()?;
        if field_pic {
            bottom_field = br.read_flag()?;
        }
    }

    let idr_pic_id = if is_idr { br.read_ue()? } else { 0 };

    let mut pic_order_cnt_lsb = 0;
    let mut delta_pic_order_cnt_bottom = 0;
    let mut delta_pic_order_cnt = [0i32; 2];
    let bottom_present = pps.bottom_field_pic_order_in_frame_present && !field_pic;
    if sps.poc_type == 0 {
        pic_order_cnt_lsb = br.read_bits(sps.log2_max_poc_lsb)?;
        if bottom_present {
            delta_pic_order_cnt_bottom = br.read_se()?;
        }
    } else if sps.poc_type == 1 && !sps.delta_pic_order_always_zero_flag {
        delta_pic_order_cnt[0] = br.read_se()?;
        if bottom_present {
            delta_pic_order_cnt[1] = br.read_se()?;
        }
    }

    let redundant_pic_cnt = if pps.redundant_pic_cnt_present {
        br.read_ue()?
    } else {
        0
    };

    let direct_spatial_mv_pred = if slice_type.is_b() {
        br.read_flag()?
    } else {
        false
    };

    // 场图像默认参考数为帧默认值的两倍
    let field_scale = |minus1: u32| if field_pic { minus1 * 2 + 1 } else { minus1 };
    let mut num_ref_idx_l0_active_minus1 = field_scale(pps.num_ref_idx_l0_default_active_minus1);
    let mut num_ref_idx_l1_active_minus1 = field_scale(pps.num_ref_idx_l1_default_active_minus1);
    if !slice_type.is_intra() {
        if br.read_flag()? {
            num_ref_idx_l0_active_minus1 = br.read_ue()?;
            if slice_type.is_b() {
                num_ref_idx_l1_active_minus1 = br.read_ue()?;
            }
        }
        let limit = if field_pic { 31 } else { 15 };
        if num_ref_idx_l0_active_minus1 > limit || num_ref_idx_l1_active_minus1 > limit {
            return Err(HwdecError::InvalidData(format!(
                "H.264: num_ref_idx_active_minus1 超出范围, l0={}, l1={}",
                num_ref_idx_l0_active_minus1, num_ref_idx_l1_active_minus1
            )));
        }
    }

    // MaxPicNum, 场图像为 2 * MaxFrameNum
    let max_pic_num = sps.max_frame_num() << u32::from(field_pic);
    let mut ref_pic_list_mod_l0 = Vec::new();
    let mut ref_pic_list_mod_l1 = Vec::new();
    if !slice_type.is_intra() {
        ref_pic_list_mod_l0 = parse_ref_pic_list_mod(&mut br, max_pic_num)?;
        if slice_type.is_b() {
            ref_pic_list_mod_l1 = parse_ref_pic_list_mod(&mut br, max_pic_num)?;
        }
    }

    let weighted = (pps.weighted_pred && matches!(slice_type, SliceType::P | SliceType::Sp))
        || (pps.weighted_bipred_idc == 1 && slice_type.is_b());
    if weighted {
        let chroma_array_type = if sps.separate_colour_plane_flag {
            0
        } else {
            sps.chroma_format_idc
        };
        skip_pred_weight_table(
            &mut br,
            chroma_array_type,
            num_ref_idx_l0_active_minus1,
            slice_type.is_b().then_some(num_ref_idx_l1_active_minus1),
        )?;
    }

    let dec_ref_pic_marking = if nalu.ref_idc != 0 {
        parse_dec_ref_pic_marking(&mut br, is_idr, max_pic_num)?
    } else {
        DecRefPicMarking::default()
    };

    Ok(SliceHeader {
        nal_type: nalu.nal_type,
        nal_ref_idc: nalu.ref_idc,
        first_mb_in_slice,
        slice_type,
        pps_id,
        colour_plane_id,
        frame_num,
        field_pic,
        bottom_field,
        idr_pic_id,
        pic_order_cnt_lsb,
        delta_pic_order_cnt_bottom,
        delta_pic_order_cnt,
        redundant_pic_cnt,
        direct_spatial_mv_pred,
        num_ref_idx_l0_active_minus1,
        num_ref_idx_l1_active_minus1,
        ref_pic_list_mod_l0,
        ref_pic_list_mod_l1,
        dec_ref_pic_marking,
        header_bits: br.bits_read(),
    })
}

fn parse_ref_pic_list_mod(br: &mut BitReader, max_pic_num: u32) -> HwdecResult<Vec<RefPicListMod>> {
    let mut mods = Vec::new();
    if !br.read_flag()? {
        return Ok(mods);
    }
    loop {
        let idc = br.read_ue()?;
        let op = match idc {
            0 => RefPicListMod::ShortTermSub {
                abs_diff_pic_num_minus1: read_ue_below(br, "abs_diff_pic_num_minus1", max_pic_num)?,
            },
            1 => RefPicListMod::ShortTermAdd {
                abs_diff_pic_num_minus1: read_ue_below(br, "abs_diff_pic_num_minus1", max_pic_num)?,
            },
            2 => RefPicListMod::LongTerm {
                long_term_pic_num: read_ue_below(br, "long_term_pic_num", LONG_TERM_PIC_NUM_LIMIT)?,
            },
            3 => break,
            _ => {
                return Err(HwdecError::InvalidData(format!(
                    "H.264: modification_of_pic_nums_idc 非法, value={}",
                    idc
                )));
            }
        };
        if mods.len() > 32 {
            return Err(HwdecError::InvalidData(
                "H.264: ref_pic_list_modification 操作过多".into(),
            ));
        }
        mods.push(op);
    }
    Ok(mods)
}

fn skip_pred_weight_table(
    br: &mut BitReader,
    chroma_array_type: u32,
    num_l0_minus1: u32,
    num_l1_minus1: Option<u32>,
) -> HwdecResult<()> {
    br.read_ue()?; // luma_log2_weight_denom
    if chroma_array_type != 0 {
        br.read_ue()?; // chroma_log2_weight_denom
    }
    let lists = std::iter::once(num_l0_minus1).chain(num_l1_minus1);
    for minus1 in lists {
        for _ in 0..=minus1 {
            if br.read_flag()? {
                br.read_se()?;
                br.read_se()?;
            }
            if chroma_array_type != 0 && br.read_flag()? {
                for _ in 0..4 {
                    br.read_se()?;
                }
            }
        }
    }
    Ok(())
}

fn parse_dec_ref_pic_marking(
    br: &mut BitReader,
    is_idr: bool,
    max_pic_num: u32,
) -> HwdecResult<DecRefPicMarking> {
    let mut marking = DecRefPicMarking::default();
    if is_idr {
        marking.no_output_of_prior_pics = br.read_flag()?;
        marking.long_term_reference_flag = br.read_flag()?;
        return Ok(marking);
    }

    marking.adaptive = br.read_flag()?;
    if !marking.adaptive {
        return Ok(marking);
    }

    loop {
        let op = match br.read_ue()? {
            0 => break,
            1 => MmcoOp::ForgetShort {
                difference_of_pic_nums_minus1: read_ue_below(
                    br,
                    "difference_of_pic_nums_minus1",
                    max_pic_num,
                )?,
            },
            2 => MmcoOp::ForgetLong {
                long_term_pic_num: read_ue_below(br, "long_term_pic_num", LONG_TERM_PIC_NUM_LIMIT)?,
            },
            3 => MmcoOp::ConvertShortToLong {
                difference_of_pic_nums_minus1: read_ue_below(
                    br,
                    "difference_of_pic_nums_minus1",
                    max_pic_num,
                )?,
                long_term_frame_idx: read_ue_below(
                    br,
                    "long_term_frame_idx",
                    MAX_LONG_TERM_FRAME_IDX + 1,
                )?,
            },
            4 => MmcoOp::TrimLong {
                max_long_term_frame_idx_plus1: read_ue_below(
                    br,
                    "max_long_term_frame_idx_plus1",
                    MAX_LONG_TERM_FRAME_IDX + 2,
                )?,
            },
            5 => MmcoOp::ClearAll,
            6 => MmcoOp::MarkCurrentLong {
                long_term_frame_idx: read_ue_below(
                    br,
                    "long_term_frame_idx",
                    MAX_LONG_TERM_FRAME_IDX + 1,
                )?,
            },
            other => {
                return Err(HwdecError::InvalidData(format!(
                    "H.264: memory_management_control_operation 非法, value={}",
                    other
                )));
            }
        };
        if marking.ops.len() >= MAX_MMCO_OPS {
            return Err(HwdecError::InvalidData(format!(
                "H.264: MMCO 操作数量过多, max={}",
                MAX_MMCO_OPS
            )));
        }
        marking.ops.push(op);
    }
    Ok(marking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::h264::pps::parse_pps;
    use crate::parsers::h264::sps::parse_sps;
    use crate::test_streams::h264::{PpsBuilder, SliceBuilder, SpsBuilder};

    fn parse(sps_b: SpsBuilder, pps_b: PpsBuilder, slice: SliceBuilder) -> SliceHeader {
        let sps = parse_sps(&sps_b.rbsp()).unwrap();
        let pps = parse_pps(&pps_b.rbsp(), |_| Some(1)).unwrap();
        let nal = slice.nal(&sps, &pps);
        let nalu = NalUnit::parse(&nal).unwrap();
        parse_slice_header(&nalu, &nalu.rbsp(), |_| Some((&pps, &sps))).unwrap()
    }

    #[test]
    fn test_idr_slice_header() {
        let sh = parse(
            SpsBuilder::new(176, 144),
            PpsBuilder::new(0, 0),
            SliceBuilder::idr().poc_lsb(0).idr_pic_id(3),
        );
        assert!(sh.is_idr());
        assert!(sh.is_reference());
        assert_eq!(sh.slice_type, SliceType::I);
        assert_eq!(sh.idr_pic_id, 3);
        assert_eq!(sh.frame_num, 0);
        assert!(!sh.dec_ref_pic_marking.no_output_of_prior_pics);
    }

    #[test]
    fn test_b_slice_with_modification_and_override() {
        let sh = parse(
            SpsBuilder::new(176, 144),
            PpsBuilder::new(0, 0),
            SliceBuilder::b(3)
                .poc_lsb(6)
                .num_ref_idx(2, 1)
                .list0_mods(vec![RefPicListMod::ShortTermSub {
                    abs_diff_pic_num_minus1: 1,
                }]),
        );
        assert_eq!(sh.slice_type, SliceType::B);
        assert_eq!(sh.frame_num, 3);
        assert_eq!(sh.pic_order_cnt_lsb, 6);
        assert_eq!(sh.num_ref_idx_l0_active_minus1, 2);
        assert_eq!(sh.num_ref_idx_l1_active_minus1, 1);
        assert_eq!(
            sh.ref_pic_list_mod_l0,
            vec![RefPicListMod::ShortTermSub {
                abs_diff_pic_num_minus1: 1
            }]
        );
        assert!(sh.ref_pic_list_mod_l1.is_empty());
        assert!(!sh.is_reference(), "B 帧默认不作参考");
    }

    #[test]
    fn test_mmco_ops() {
        let ops = vec![
            MmcoOp::ForgetShort {
                difference_of_pic_nums_minus1: 0,
            },
            MmcoOp::MarkCurrentLong {
                long_term_frame_idx: 1,
            },
            MmcoOp::ClearAll,
        ];
        let sh = parse(
            SpsBuilder::new(176, 144),
            PpsBuilder::new(0, 0),
            SliceBuilder::p(2).mmco(ops.clone()),
        );
        assert!(sh.dec_ref_pic_marking.adaptive);
        assert_eq!(sh.dec_ref_pic_marking.ops, ops);
        assert!(sh.has_mmco5());
    }

    #[test]
    fn test_field_slice_default_ref_count_doubles() {
        let sh = parse(
            SpsBuilder::new(176, 144).frame_mbs_only(false),
            PpsBuilder::new(0, 0),
            SliceBuilder::p(1).field(true),
        );
        assert!(sh.field_pic);
        assert!(sh.bottom_field);
        assert_eq!(sh.num_ref_idx_l0_active_minus1, 1, "场图像默认参考数应翻倍");
    }

    fn parse_err(slice: SliceBuilder) -> HwdecError {
        let sps = parse_sps(&SpsBuilder::new(176, 144).log2_max_frame_num(4).rbsp()).unwrap();
        let pps = parse_pps(&PpsBuilder::new(0, 0).rbsp(), |_| Some(1)).unwrap();
        let nal = slice.nal(&sps, &pps);
        let nalu = NalUnit::parse(&nal).unwrap();
        parse_slice_header(&nalu, &nalu.rbsp(), |_| Some((&pps, &sps))).unwrap_err()
    }

    #[test]
    fn test_pic_num_differences_bounded_by_max_pic_num() {
        let err = parse_err(SliceBuilder::p(2).list0_mods(vec![RefPicListMod::ShortTermSub {
            abs_diff_pic_num_minus1: 0x7FFF_FFFF,
        }]));
        assert!(matches!(err, HwdecError::InvalidData(_)), "错误: {}", err);

        // MaxPicNum=16, 16 已越界
        let err = parse_err(SliceBuilder::p(2).list0_mods(vec![RefPicListMod::ShortTermAdd {
            abs_diff_pic_num_minus1: 16,
        }]));
        assert!(err.to_string().contains("abs_diff_pic_num_minus1"), "错误: {}", err);

        let err = parse_err(SliceBuilder::p(2).mmco(vec![MmcoOp::ForgetShort {
            difference_of_pic_nums_minus1: u32::MAX,
        }]));
        assert!(matches!(err, HwdecError::InvalidData(_)), "错误: {}", err);
    }

    #[test]
    fn test_long_term_indices_bounded() {
        let err = parse_err(SliceBuilder::p(2).mmco(vec![MmcoOp::MarkCurrentLong {
            long_term_frame_idx: 16,
        }]));
        assert!(err.to_string().contains("long_term_frame_idx"), "错误: {}", err);

        let err = parse_err(SliceBuilder::p(2).list0_mods(vec![RefPicListMod::LongTerm {
            long_term_pic_num: 1 << 20,
        }]));
        assert!(matches!(err, HwdecError::InvalidData(_)), "错误: {}", err);
    }

    #[test]
    fn test_missing_pps() {
        let sps = parse_sps(&SpsBuilder::new(176, 144).rbsp()).unwrap();
        let pps = parse_pps(&PpsBuilder::new(0, 0).rbsp(), |_| Some(1)).unwrap();
        let nal = SliceBuilder::idr().nal(&sps, &pps);
        let nalu = NalUnit::parse(&nal).unwrap();
        let err = parse_slice_header(&nalu, &nalu.rbsp(), |_| None).expect_err("缺少 PPS 应报错");
        assert!(format!("{err}").contains("PPS"));
    }
}
