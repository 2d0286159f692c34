//! H.264 图像顺序计数 (POC) 推导, 对应标准 8.2.1.

use crate::parsers::h264::{SliceHeader, Sps};

use super::picture::{FieldMask, H264Picture};

/// 当前图像的顶场/底场 POC
///
/// 场图像只有对应奇偶性的一项有效.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldOrderCnt {
    /// TopFieldOrderCnt
    pub top: i32,
    /// BottomFieldOrderCnt
    pub bottom: i32,
}

/// POC 推导跨图像状态
#[derive(Debug, Clone, Default)]
pub struct PocState {
    /// prevPicOrderCntMsb (类型 0, 仅由参考图像更新)
    prev_poc_msb: i32,
    /// prevPicOrderCntLsb (类型 0, 仅由参考图像更新)
    prev_poc_lsb: i32,
    /// prevFrameNumOffset (类型 1/2)
    prev_frame_num_offset: i32,
    /// 前一图像的 frame_num
    prev_frame_num: u32,
    /// 当前图像的 PicOrderCntMsb
    cur_poc_msb: i32,
    /// 当前图像的 FrameNumOffset
    cur_frame_num_offset: i32,
}

impl PocState {
    /// 创建初始状态
    pub fn new() -> Self {
        Self::default()
    }

    /// 恢复初始状态 (flush / 格式变化后)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 前一图像的 frame_num
    pub fn prev_frame_num(&self) -> u32 {
        self.prev_frame_num
    }

    /// 计算当前图像的 POC
    pub fn compute(&mut self, sps: &Sps, slice: &SliceHeader) -> FieldOrderCnt {
        match sps.poc_type {
            0 => self.compute_type0(sps, slice),
            1 => self.compute_type1(sps, slice),
            _ => self.compute_type2(sps, slice),
        }
    }

    fn compute_type0(&mut self, sps: &Sps, slice: &SliceHeader) -> FieldOrderCnt {
        let (prev_msb, prev_lsb) = if slice.is_idr() {
            (0, 0)
        } else {
            (self.prev_poc_msb, self.prev_poc_lsb)
        };
        let max_lsb = sps.max_poc_lsb() as i32;
        let lsb = slice.pic_order_cnt_lsb as i32;

        // (8-3)
        let msb = if lsb < prev_lsb && prev_lsb - lsb >= max_lsb / 2 {
            prev_msb.wrapping_add(max_lsb)
        } else if lsb > prev_lsb && lsb - prev_lsb > max_lsb / 2 {
            prev_msb.wrapping_sub(max_lsb)
        } else {
            prev_msb
        };
        self.cur_poc_msb = msb;

        let mut cnt = FieldOrderCnt::default();
        let poc = msb.wrapping_add(lsb);
        if !slice.field_pic {
            cnt.top = poc;
            cnt.bottom = poc.wrapping_add(slice.delta_pic_order_cnt_bottom);
        } else if !slice.bottom_field {
            cnt.top = poc;
        } else {
            cnt.bottom = poc;
        }
        cnt
    }

    fn frame_num_offset(&mut self, sps: &Sps, slice: &SliceHeader) -> i32 {
        let offset = if slice.is_idr() {
            0
        } else if self.prev_frame_num > slice.frame_num {
            self.prev_frame_num_offset.wrapping_add(sps.max_frame_num() as i32)
        } else {
            self.prev_frame_num_offset
        };
        self.cur_frame_num_offset = offset;
        offset
    }

    fn compute_type1(&mut self, sps: &Sps, slice: &SliceHeader) -> FieldOrderCnt {
        let offset = self.frame_num_offset(sps, slice);
        let expected = expected_poc_type1(sps, offset, slice.frame_num, slice.is_reference());

        let top_to_bottom = sps.offset_for_top_to_bottom_field;
        let mut cnt = FieldOrderCnt::default();
        if !slice.field_pic {
            cnt.top = expected.wrapping_add(slice.delta_pic_order_cnt[0]);
            cnt.bottom = cnt
                .top
                .wrapping_add(top_to_bottom)
                .wrapping_add(slice.delta_pic_order_cnt[1]);
        } else if !slice.bottom_field {
            cnt.top = expected.wrapping_add(slice.delta_pic_order_cnt[0]);
        } else {
            cnt.bottom = expected
                .wrapping_add(top_to_bottom)
                .wrapping_add(slice.delta_pic_order_cnt[0]);
        }
        cnt
    }

    fn compute_type2(&mut self, sps: &Sps, slice: &SliceHeader) -> FieldOrderCnt {
        let offset = self.frame_num_offset(sps, slice);
        let temp = if slice.is_idr() {
            0
        } else {
            let temp = offset.wrapping_add(slice.frame_num as i32).wrapping_mul(2);
            if slice.is_reference() {
                temp
            } else {
                temp.wrapping_sub(1)
            }
        };

        let mut cnt = FieldOrderCnt::default();
        if !slice.field_pic {
            cnt.top = temp;
            cnt.bottom = temp;
        } else if !slice.bottom_field {
            cnt.top = temp;
        } else {
            cnt.bottom = temp;
        }
        cnt
    }

    /// 计算 frame_num 间隙中 "不存在" 帧的 POC, 并推进 frame_num 状态
    ///
    /// 类型 0 无法从 frame_num 推导 POC, 返回前一参考图像的 POC.
    pub fn compute_non_existing(&mut self, sps: &Sps, frame_num: u32) -> i32 {
        let offset = if self.prev_frame_num > frame_num {
            self.prev_frame_num_offset.wrapping_add(sps.max_frame_num() as i32)
        } else {
            self.prev_frame_num_offset
        };
        self.prev_frame_num_offset = offset;
        self.prev_frame_num = frame_num;

        match sps.poc_type {
            0 => self.prev_poc_msb.wrapping_add(self.prev_poc_lsb),
            1 => expected_poc_type1(sps, offset, frame_num, true),
            _ => offset.wrapping_add(frame_num as i32).wrapping_mul(2),
        }
    }

    /// 当前图像解码完成后更新跨图像状态, 在图像存入 DPB 之前调用
    pub fn finish_picture(&mut self, pic: &H264Picture, structure: FieldMask, poc_lsb: u32) {
        if pic.mmco5 {
            // 8.2.1: 带 MMCO5 的图像之后视作 frame_num=0, 以 tempPicOrderCnt 为基准
            self.prev_frame_num_offset = 0;
            self.prev_frame_num = 0;
            if pic.nal_ref {
                self.prev_poc_msb = 0;
                self.prev_poc_lsb = if structure == FieldMask::FRAME {
                    pic.top_poc.wrapping_sub(pic.top_poc.min(pic.bottom_poc))
                } else {
                    0
                };
            }
            return;
        }

        self.prev_frame_num_offset = self.cur_frame_num_offset;
        self.prev_frame_num = pic.frame_num;
        if pic.nal_ref {
            self.prev_poc_msb = self.cur_poc_msb;
            self.prev_poc_lsb = poc_lsb as i32;
        }
    }
}

/// 类型 1 的 expectedPicOrderCnt, 对应 (8-6) ~ (8-9)
///
/// offset_for_* 可取满 32 位范围, 累加按补码回绕.
fn expected_poc_type1(sps: &Sps, frame_num_offset: i32, frame_num: u32, is_reference: bool) -> i32 {
    let wrapping_sum = |offsets: &[i32]| offsets.iter().fold(0i32, |acc, &v| acc.wrapping_add(v));
    let cycle_len = sps.offset_for_ref_frame.len() as i32;
    let mut abs_frame_num = if cycle_len != 0 {
        frame_num_offset.wrapping_add(frame_num as i32)
    } else {
        0
    };
    if !is_reference && abs_frame_num > 0 {
        abs_frame_num -= 1;
    }

    let mut expected = 0i32;
    if abs_frame_num > 0 {
        let cycle_cnt = (abs_frame_num - 1) / cycle_len;
        let in_cycle = ((abs_frame_num - 1) % cycle_len) as usize;
        let delta_per_cycle = wrapping_sum(&sps.offset_for_ref_frame);
        expected = cycle_cnt
            .wrapping_mul(delta_per_cycle)
            .wrapping_add(wrapping_sum(&sps.offset_for_ref_frame[..=in_cycle]));
    }
    if !is_reference {
        expected = expected.wrapping_add(sps.offset_for_non_ref_pic);
    }
    expected
}
