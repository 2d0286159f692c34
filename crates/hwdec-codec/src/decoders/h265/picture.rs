//! H.265 图像记录.

use crate::parsers::h265::HevcNalUnitType;
use crate::surface::Surface;

/// 参考标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefMark {
    /// 不用于参考
    #[default]
    Unused,
    /// 短期参考
    ShortTerm,
    /// 长期参考
    LongTerm,
}

/// H.265 图像
#[derive(Debug, Clone)]
pub struct H265Picture {
    /// 解码表面
    pub surface: Option<Surface>,
    /// 输入时间戳
    pub timestamp: i64,
    /// PicOrderCntVal
    pub poc: i32,
    /// slice_pic_order_cnt_lsb
    pub poc_lsb: u32,
    /// 参考标记
    pub reference: RefMark,
    /// 仍待输出
    pub output_needed: bool,
    /// PicOutputFlag
    pub pic_output_flag: bool,
    /// PicLatencyCount
    pub pic_latency_count: u32,
    /// NAL 类型
    pub nal_type: HevcNalUnitType,
    /// NoRaslOutputFlag (仅 IRAP 有意义)
    pub no_rasl_output: bool,
}

impl H265Picture {
    pub fn new(poc: i32, poc_lsb: u32, nal_type: HevcNalUnitType) -> Self {
        Self {
            surface: None,
            timestamp: crate::buffer::NO_TIMESTAMP,
            poc,
            poc_lsb,
            reference: RefMark::Unused,
            output_needed: false,
            pic_output_flag: true,
            pic_latency_count: 0,
            nal_type,
            no_rasl_output: false,
        }
    }

    /// 是否用于参考 (短期或长期)
    pub fn is_reference(&self) -> bool {
        self.reference != RefMark::Unused
    }

    pub fn is_short_term(&self) -> bool {
        self.reference == RefMark::ShortTerm
    }

    pub fn is_long_term(&self) -> bool {
        self.reference == RefMark::LongTerm
    }

    /// 是否为带 NoRaslOutputFlag 的 IRAP 图像
    pub fn is_irap_no_rasl(&self) -> bool {
        self.nal_type.is_irap() && self.no_rasl_output
    }
}
