//! H.264 解码参考图像标记, 对应标准 8.2.5.

use log::{debug, warn};

use crate::arena::PicId;
use crate::parsers::h264::{DecRefPicMarking, MmcoOp};

use super::dpb::H264Dpb;
use super::picture::{FieldMask, H264Picture};

impl H264Dpb {
    /// 对当前图像执行参考标记
    ///
    /// `first_field` 为当前第二场所属的第一场条目.
    pub(super) fn mark_current(
        &mut self,
        pic: &mut H264Picture,
        marking: &DecRefPicMarking,
        first_field: Option<PicId>,
    ) {
        if !pic.nal_ref {
            return;
        }

        if pic.idr {
            if first_field.is_none() {
                for id in self.pictures.clone() {
                    if let Some(other) = self.arena.get_mut(id) {
                        other.unmark();
                    }
                }
                self.max_long_term_frame_idx = marking.long_term_reference_flag.then_some(0);
            }
            if marking.long_term_reference_flag {
                pic.long_term = pic.fields;
                pic.long_term_frame_idx = 0;
            } else {
                pic.short_term = pic.fields;
            }
            return;
        }

        let mut marked_long = false;
        if marking.adaptive {
            for &op in &marking.ops {
                marked_long |= self.apply_mmco(pic, op, first_field);
            }
        } else {
            let first_is_short_ref = first_field
                .and_then(|id| self.arena.get(id))
                .is_some_and(|first| !first.short_term.is_empty());
            // 8.2.5.3: 参考场对的第二场不触发滑动窗口
            if !first_is_short_ref {
                self.sliding_window(pic.frame_num);
            }
        }

        if !marked_long {
            pic.short_term = pic.fields;
        }

        let num_refs = self.num_references() + usize::from(first_field.is_none());
        if num_refs > self.max_num_ref_frames.max(1) as usize {
            warn!(
                "H264: 参考图像数超出 max_num_ref_frames, refs={}, max={}",
                num_refs, self.max_num_ref_frames
            );
        }
    }

    /// 滑动窗口标记: 参考帧数达到上限时淘汰 FrameNumWrap 最小的短期参考
    pub(super) fn sliding_window(&mut self, cur_frame_num: u32) {
        let max_refs = self.max_num_ref_frames.max(1) as usize;
        while self.num_references() >= max_refs {
            let oldest = self
                .pictures
                .iter()
                .copied()
                .filter_map(|id| self.arena.get(id).map(|pic| (id, pic)))
                .filter(|(_, pic)| !pic.short_term.is_empty())
                .min_by_key(|(_, pic)| self.frame_num_wrap(pic.frame_num, cur_frame_num))
                .map(|(id, _)| id);
            let Some(id) = oldest else {
                break;
            };
            if let Some(pic) = self.arena.get_mut(id) {
                debug!("H264: 滑动窗口淘汰 frame_num={}", pic.frame_num);
                pic.short_term = FieldMask::empty();
            }
        }
    }

    /// FrameNumWrap (8-27)
    pub(super) fn frame_num_wrap(&self, frame_num: u32, cur_frame_num: u32) -> i32 {
        if frame_num > cur_frame_num {
            frame_num as i32 - self.max_frame_num as i32
        } else {
            frame_num as i32
        }
    }

    /// 执行一条 MMCO, 返回当前图像是否被标记为长期参考
    fn apply_mmco(&mut self, pic: &mut H264Picture, op: MmcoOp, first_field: Option<PicId>) -> bool {
        let structure = pic.fields;
        let curr_pic_num = if structure.is_field() {
            2 * pic.frame_num as i32 + 1
        } else {
            pic.frame_num as i32
        };

        match op {
            MmcoOp::ForgetShort {
                difference_of_pic_nums_minus1,
            } => {
                let pic_num_x = pic_num_minus(curr_pic_num, difference_of_pic_nums_minus1);
                match self.find_short_term(pic_num_x, pic.frame_num, structure) {
                    Some((id, fields)) => {
                        if let Some(target) = self.arena.get_mut(id) {
                            target.short_term.remove(fields);
                        }
                    }
                    None => self.record_missing_reference("mmco1", pic_num_x),
                }
            }
            MmcoOp::ForgetLong { long_term_pic_num } => {
                match self.find_long_term(long_term_pic_num as i32, structure) {
                    Some((id, fields)) => {
                        if let Some(target) = self.arena.get_mut(id) {
                            target.long_term.remove(fields);
                        }
                    }
                    None => self.record_missing_reference("mmco2", long_term_pic_num as i32),
                }
            }
            MmcoOp::ConvertShortToLong {
                difference_of_pic_nums_minus1,
                long_term_frame_idx,
            } => {
                let pic_num_x = pic_num_minus(curr_pic_num, difference_of_pic_nums_minus1);
                if !self.long_term_idx_allowed(long_term_frame_idx) {
                    return false;
                }
                let Some((id, fields)) = self.find_short_term(pic_num_x, pic.frame_num, structure)
                else {
                    self.record_missing_reference("mmco3", pic_num_x);
                    return false;
                };
                // 同一 LongTermFrameIdx 只能属于一帧 (或同一帧的另一场)
                self.release_long_term_idx(long_term_frame_idx, Some(id));
                if let Some(target) = self.arena.get_mut(id) {
                    target.short_term.remove(fields);
                    target.long_term.insert(fields);
                    target.long_term_frame_idx = long_term_frame_idx;
                }
            }
            MmcoOp::TrimLong {
                max_long_term_frame_idx_plus1,
            } => {
                self.max_long_term_frame_idx = max_long_term_frame_idx_plus1.checked_sub(1);
                for id in self.pictures.clone() {
                    let Some(target) = self.arena.get_mut(id) else {
                        continue;
                    };
                    let exceeds = match self.max_long_term_frame_idx {
                        Some(max) => target.long_term_frame_idx > max,
                        None => true,
                    };
                    if exceeds {
                        target.long_term = FieldMask::empty();
                    }
                }
            }
            MmcoOp::ClearAll => {
                for id in self.pictures.clone() {
                    if let Some(target) = self.arena.get_mut(id) {
                        target.unmark();
                    }
                }
                self.max_long_term_frame_idx = None;
                pic.mmco5 = true;
                reset_poc_after_mmco5(pic);
            }
            MmcoOp::MarkCurrentLong {
                long_term_frame_idx,
            } => {
                if !self.long_term_idx_allowed(long_term_frame_idx) {
                    return false;
                }
                self.release_long_term_idx(long_term_frame_idx, first_field);
                pic.long_term = structure;
                pic.long_term_frame_idx = long_term_frame_idx;
                return true;
            }
        }
        false
    }

    /// 按 PicNum 查找短期参考帧/场
    fn find_short_term(&self, pic_num: i32, cur_frame_num: u32, structure: FieldMask) -> Option<(PicId, FieldMask)> {
        self.pictures.iter().copied().find_map(|id| {
            let pic = self.arena.get(id)?;
            let wrap = self.frame_num_wrap(pic.frame_num, cur_frame_num);
            if !structure.is_field() {
                return (pic.is_short_term_frame() && wrap == pic_num).then_some((id, FieldMask::FRAME));
            }
            [FieldMask::TOP, FieldMask::BOTTOM].into_iter().find_map(|parity| {
                if !pic.short_term.contains(parity) {
                    return None;
                }
                let field_pic_num = if parity == structure { 2 * wrap + 1 } else { 2 * wrap };
                (field_pic_num == pic_num).then_some((id, parity))
            })
        })
    }

    /// 按 LongTermPicNum 查找长期参考帧/场
    fn find_long_term(&self, long_term_pic_num: i32, structure: FieldMask) -> Option<(PicId, FieldMask)> {
        self.pictures.iter().copied().find_map(|id| {
            let pic = self.arena.get(id)?;
            let idx = pic.long_term_frame_idx as i32;
            if !structure.is_field() {
                return (pic.is_long_term_frame() && idx == long_term_pic_num)
                    .then_some((id, FieldMask::FRAME));
            }
            [FieldMask::TOP, FieldMask::BOTTOM].into_iter().find_map(|parity| {
                if !pic.long_term.contains(parity) {
                    return None;
                }
                let field_num = if parity == structure { 2 * idx + 1 } else { 2 * idx };
                (field_num == long_term_pic_num).then_some((id, parity))
            })
        })
    }

    /// LongTermFrameIdx 不得超过 MaxLongTermFrameIdx, 超出的 MMCO 被忽略
    fn long_term_idx_allowed(&self, long_term_frame_idx: u32) -> bool {
        let allowed = self
            .max_long_term_frame_idx
            .is_some_and(|max| long_term_frame_idx <= max);
        if !allowed {
            warn!(
                "H264: long_term_frame_idx={} 超出 MaxLongTermFrameIdx={:?}, 忽略该 MMCO",
                long_term_frame_idx, self.max_long_term_frame_idx
            );
        }
        allowed
    }

    /// 取消其他帧对 `long_term_frame_idx` 的占用
    fn release_long_term_idx(&mut self, long_term_frame_idx: u32, keep: Option<PicId>) {
        for id in self.pictures.clone() {
            if Some(id) == keep {
                continue;
            }
            let Some(pic) = self.arena.get_mut(id) else {
                continue;
            };
            if !pic.long_term.is_empty() && pic.long_term_frame_idx == long_term_frame_idx {
                pic.long_term = FieldMask::empty();
            }
        }
    }
}

/// picNumX = CurrPicNum - (difference_of_pic_nums_minus1 + 1), 溢出时饱和
///
/// 饱和后的值不会匹配任何参考, 按缺失参考处理.
fn pic_num_minus(curr_pic_num: i32, difference_of_pic_nums_minus1: u32) -> i32 {
    curr_pic_num
        .saturating_sub_unsigned(difference_of_pic_nums_minus1)
        .saturating_sub(1)
}

/// MMCO5 之后当前图像的 POC 以自身为基准归零, frame_num 视为 0 (8.2.1)
fn reset_poc_after_mmco5(pic: &mut H264Picture) {
    let temp = if pic.fields == FieldMask::FRAME {
        pic.top_poc.min(pic.bottom_poc)
    } else if pic.fields == FieldMask::TOP {
        pic.top_poc
    } else {
        pic.bottom_poc
    };
    pic.top_poc -= temp;
    pic.bottom_poc -= temp;
    pic.frame_num = 0;
    pic.update_poc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::h264::parse_sps;
    use crate::test_streams::h264::SpsBuilder;

    fn dpb_with_refs(frame_nums: &[u32], num_ref_frames: u32) -> H264Dpb {
        let sps = parse_sps(
            &SpsBuilder::new(64, 64)
                .max_num_ref_frames(num_ref_frames)
                .log2_max_frame_num(4)
                .rbsp(),
        )
        .unwrap();
        let mut dpb = H264Dpb::new();
        dpb.configure(&sps);
        let mut sink = Vec::new();
        for &frame_num in frame_nums {
            let mut pic = H264Picture::new(None, FieldMask::FRAME, frame_num);
            pic.nal_ref = true;
            pic.top_poc = 2 * frame_num as i32;
            pic.bottom_poc = pic.top_poc;
            pic.update_poc();
            dpb.add(pic, &DecRefPicMarking::default(), &mut sink).unwrap();
        }
        dpb
    }

    fn short_frame_nums(dpb: &H264Dpb) -> Vec<u32> {
        let mut nums: Vec<_> = dpb
            .iter()
            .filter(|pic| pic.is_short_term_frame())
            .map(|pic| pic.frame_num)
            .collect();
        nums.sort();
        nums
    }

    fn current(frame_num: u32) -> H264Picture {
        let mut pic = H264Picture::new(None, FieldMask::FRAME, frame_num);
        pic.nal_ref = true;
        pic
    }

    fn adaptive(ops: Vec<MmcoOp>) -> DecRefPicMarking {
        DecRefPicMarking {
            adaptive: true,
            ops,
            ..Default::default()
        }
    }

    #[test]
    fn test_sliding_window_evicts_lowest_frame_num_wrap() {
        let mut dpb = dpb_with_refs(&[0, 1, 2], 3);
        let mut pic = current(3);
        dpb.mark_current(&mut pic, &DecRefPicMarking::default(), None);
        assert_eq!(short_frame_nums(&dpb), vec![1, 2]);
        assert!(pic.is_short_term_frame());
    }

    #[test]
    fn test_sliding_window_respects_frame_num_wrap() {
        // 当前 frame_num=1, 14/15 回绕为 -2/-1, 应先淘汰 14
        let mut dpb = dpb_with_refs(&[14, 15, 0], 3);
        let mut pic = current(1);
        dpb.mark_current(&mut pic, &DecRefPicMarking::default(), None);
        assert_eq!(short_frame_nums(&dpb), vec![0, 15]);
    }

    #[test]
    fn test_sliding_window_never_exceeds_max_num_ref_frames() {
        let dpb = dpb_with_refs(&[0, 1, 2, 3, 4, 5, 6], 4);
        assert!(
            dpb.num_references() <= 4,
            "参考帧数 {} 超出上限",
            dpb.num_references()
        );
        assert_eq!(short_frame_nums(&dpb), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_mmco1_forget_short() {
        let mut dpb = dpb_with_refs(&[0, 1, 2], 4);
        let mut pic = current(3);
        // picNumX = 3 - 2 = 1
        let marking = adaptive(vec![MmcoOp::ForgetShort {
            difference_of_pic_nums_minus1: 1,
        }]);
        dpb.mark_current(&mut pic, &marking, None);
        assert_eq!(short_frame_nums(&dpb), vec![0, 2]);
    }

    #[test]
    fn test_mmco3_convert_and_mmco2_forget_long() {
        let mut dpb = dpb_with_refs(&[0, 1, 2], 4);
        let mut pic = current(3);
        let marking = adaptive(vec![
            MmcoOp::TrimLong {
                max_long_term_frame_idx_plus1: 2,
            },
            MmcoOp::ConvertShortToLong {
                difference_of_pic_nums_minus1: 2,
                long_term_frame_idx: 1,
            },
        ]);
        dpb.mark_current(&mut pic, &marking, None);
        let long: Vec<_> = dpb
            .iter()
            .filter(|p| p.is_long_term_frame())
            .map(|p| (p.frame_num, p.long_term_frame_idx))
            .collect();
        assert_eq!(long, vec![(0, 1)]);
        assert_eq!(short_frame_nums(&dpb), vec![1, 2]);

        let mut next = current(4);
        dpb.mark_current(
            &mut next,
            &adaptive(vec![MmcoOp::ForgetLong { long_term_pic_num: 1 }]),
            None,
        );
        assert!(dpb.iter().all(|p| !p.is_long_term_frame()), "MMCO2 后不应有长期参考");
    }

    #[test]
    fn test_mmco4_trims_long_term() {
        let mut dpb = dpb_with_refs(&[0, 1], 4);
        let mut pic = current(2);
        dpb.mark_current(
            &mut pic,
            &adaptive(vec![
                MmcoOp::TrimLong {
                    max_long_term_frame_idx_plus1: 4,
                },
                MmcoOp::ConvertShortToLong {
                    difference_of_pic_nums_minus1: 0,
                    long_term_frame_idx: 3,
                },
                MmcoOp::TrimLong {
                    max_long_term_frame_idx_plus1: 2,
                },
            ]),
            None,
        );
        assert!(dpb.iter().all(|p| p.long_term.is_empty()), "索引 3 超出新上限应被移除");
        assert_eq!(dpb.max_long_term_frame_idx, Some(1));
    }

    #[test]
    fn test_mmco5_clears_and_resets_poc() {
        let mut dpb = dpb_with_refs(&[0, 1], 4);
        let mut pic = current(2);
        pic.top_poc = 10;
        pic.bottom_poc = 11;
        pic.update_poc();
        dpb.mark_current(&mut pic, &adaptive(vec![MmcoOp::ClearAll]), None);
        assert_eq!(dpb.num_references(), 0);
        assert!(pic.mmco5);
        assert_eq!((pic.top_poc, pic.bottom_poc, pic.poc), (0, 1, 0));
        assert_eq!(pic.frame_num, 0);
        assert!(pic.is_short_term_frame());
    }

    #[test]
    fn test_mmco6_marks_current_long_and_releases_index() {
        let mut dpb = dpb_with_refs(&[0], 4);
        let mut pic = current(1);
        dpb.mark_current(
            &mut pic,
            &adaptive(vec![
                MmcoOp::TrimLong {
                    max_long_term_frame_idx_plus1: 1,
                },
                MmcoOp::ConvertShortToLong {
                    difference_of_pic_nums_minus1: 0,
                    long_term_frame_idx: 0,
                },
                MmcoOp::MarkCurrentLong {
                    long_term_frame_idx: 0,
                },
            ]),
            None,
        );
        assert!(pic.is_long_term_frame());
        assert!(pic.short_term.is_empty());
        assert!(
            dpb.iter().all(|p| p.long_term.is_empty()),
            "旧长期帧应让出索引 0"
        );
    }

    #[test]
    fn test_idr_long_term_reference_flag() {
        let mut dpb = dpb_with_refs(&[0, 1], 4);
        let mut pic = current(0);
        pic.idr = true;
        let marking = DecRefPicMarking {
            long_term_reference_flag: true,
            ..Default::default()
        };
        dpb.mark_current(&mut pic, &marking, None);
        assert_eq!(dpb.num_references(), 0, "IDR 应清除全部参考");
        assert!(pic.is_long_term_frame());
        assert_eq!(dpb.max_long_term_frame_idx, Some(0));
    }

    #[test]
    fn test_long_term_idx_above_limit_is_ignored() {
        let mut dpb = dpb_with_refs(&[0, 1], 4);
        let mut pic = current(2);
        dpb.mark_current(
            &mut pic,
            &adaptive(vec![
                MmcoOp::TrimLong {
                    max_long_term_frame_idx_plus1: 1,
                },
                MmcoOp::ConvertShortToLong {
                    difference_of_pic_nums_minus1: 0,
                    long_term_frame_idx: 2,
                },
                MmcoOp::MarkCurrentLong {
                    long_term_frame_idx: 1,
                },
            ]),
            None,
        );
        assert_eq!(short_frame_nums(&dpb), vec![0, 1], "超出上限的 MMCO3 不应生效");
        assert!(pic.is_short_term_frame(), "超出上限的 MMCO6 不应标记长期参考");
        assert!(dpb.iter().all(|p| p.long_term.is_empty()));
    }

    #[test]
    fn test_long_term_idx_requires_trim_after_non_long_idr() {
        let mut dpb = dpb_with_refs(&[0], 4);
        let mut pic = current(1);
        dpb.mark_current(
            &mut pic,
            &adaptive(vec![MmcoOp::MarkCurrentLong {
                long_term_frame_idx: 0,
            }]),
            None,
        );
        assert!(pic.is_short_term_frame(), "MaxLongTermFrameIdx 为无时不能标记长期参考");
    }

    #[test]
    fn test_huge_pic_num_difference_is_treated_as_missing() {
        let mut dpb = dpb_with_refs(&[0, 1], 4);
        let mut pic = current(2);
        dpb.mark_current(
            &mut pic,
            &adaptive(vec![MmcoOp::ForgetShort {
                difference_of_pic_nums_minus1: u32::MAX,
            }]),
            None,
        );
        assert_eq!(short_frame_nums(&dpb), vec![0, 1]);
    }

    #[test]
    fn test_missing_mmco_target_is_skipped() {
        let mut dpb = dpb_with_refs(&[0], 4);
        let mut pic = current(1);
        dpb.mark_current(
            &mut pic,
            &adaptive(vec![MmcoOp::ForgetShort {
                difference_of_pic_nums_minus1: 7,
            }]),
            None,
        );
        assert_eq!(short_frame_nums(&dpb), vec![0]);
        assert!(pic.is_short_term_frame());
    }
}
