//! H.265 图像顺序计数推导, 对应标准 8.3.1.

use crate::parsers::h265::{HevcSliceHeader, HevcSps};

/// POC 推导跨图像状态
///
/// 只保存 prevTid0Pic 的 POC, 其 LSB/MSB 按当前 SPS 的 MaxPicOrderCntLsb 拆分.
#[derive(Debug, Clone, Default)]
pub struct HevcPocState {
    prev_tid0_poc: i32,
}

impl HevcPocState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// prevTid0Pic 的 PicOrderCntVal
    pub fn prev_tid0_poc(&self) -> i32 {
        self.prev_tid0_poc
    }

    /// 计算当前图像的 PicOrderCntVal, 不修改状态
    ///
    /// `no_rasl_output` 为当前图像的 NoRaslOutputFlag.
    pub fn compute(&self, sps: &HevcSps, slice: &HevcSliceHeader, no_rasl_output: bool) -> i32 {
        let max_lsb = sps.max_poc_lsb();
        let lsb = slice.pic_order_cnt_lsb as i32;

        let msb = if slice.nal_type.is_irap() && no_rasl_output {
            0
        } else {
            let prev_lsb = self.prev_tid0_poc & (max_lsb - 1);
            let prev_msb = self.prev_tid0_poc - prev_lsb;
            if lsb < prev_lsb && prev_lsb - lsb >= max_lsb / 2 {
                prev_msb.wrapping_add(max_lsb)
            } else if lsb > prev_lsb && lsb - prev_lsb > max_lsb / 2 {
                prev_msb.wrapping_sub(max_lsb)
            } else {
                prev_msb
            }
        };
        msb.wrapping_add(lsb)
    }

    /// 当前图像开始解码后更新 prevTid0Pic
    ///
    /// 只有 TemporalId 为 0 且不是 RASL、RADL 或子层非参考图像时才更新.
    pub fn update(&mut self, slice: &HevcSliceHeader, poc: i32) {
        let nal_type = slice.nal_type;
        if slice.temporal_id == 0
            && !nal_type.is_rasl()
            && !nal_type.is_radl()
            && !nal_type.is_sub_layer_non_reference()
        {
            self.prev_tid0_poc = poc;
        }
    }
}
