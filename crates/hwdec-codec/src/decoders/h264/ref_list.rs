//! H.264 参考图像列表构建, 对应标准 8.2.4.

use std::cmp::Reverse;

use crate::accelerator::ReferenceEntry;
use crate::arena::PicId;
use crate::parsers::h264::{RefPicListMod, SliceHeader};

use super::dpb::H264Dpb;
use super::picture::{FieldMask, H264Picture};

/// 参考列表中的一项: DPB 条目及其被参考的场
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefPic {
    /// DPB 条目
    pub id: PicId,
    /// 参考的场, 帧解码时为 FRAME
    pub parity: FieldMask,
}

/// 当前 slice 的 RefPicList0 / RefPicList1
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefPicLists {
    /// RefPicList0
    pub list0: Vec<RefPic>,
    /// RefPicList1
    pub list1: Vec<RefPic>,
}

impl H264Dpb {
    /// 以当前 frame_num 重新计算全部条目的 FrameNumWrap (8-27)
    pub fn update_frame_num_wraps(&mut self, cur_frame_num: u32) {
        let max_frame_num = self.max_frame_num as i32;
        for &id in &self.pictures {
            if let Some(pic) = self.arena.get_mut(id) {
                pic.frame_num_wrap = if pic.frame_num > cur_frame_num {
                    pic.frame_num as i32 - max_frame_num
                } else {
                    pic.frame_num as i32
                };
            }
        }
    }

    /// 为当前 slice 构建参考列表: 初始化、修改并截断到活动长度
    pub fn build_ref_lists(
        &mut self,
        cur: &H264Picture,
        structure: FieldMask,
        slice: &SliceHeader,
    ) -> RefPicLists {
        if slice.slice_type.is_intra() {
            return RefPicLists::default();
        }
        self.update_frame_num_wraps(cur.frame_num);

        let cur_poc = cur.field_poc(structure);
        let (mut list0, mut list1) = if structure.is_field() {
            self.init_field_lists(structure, cur_poc, slice.slice_type.is_b())
        } else {
            self.init_frame_lists(cur_poc, slice.slice_type.is_b())
        };

        if list1.len() > 1 && list1 == list0 {
            list1.swap(0, 1);
        }

        let num_l0 = slice.num_ref_idx_l0_active_minus1 as usize + 1;
        self.modify_list(&mut list0, &slice.ref_pic_list_mod_l0, cur, structure, num_l0);
        if slice.slice_type.is_b() {
            let num_l1 = slice.num_ref_idx_l1_active_minus1 as usize + 1;
            self.modify_list(&mut list1, &slice.ref_pic_list_mod_l1, cur, structure, num_l1);
        } else {
            list1.clear();
        }

        RefPicLists { list0, list1 }
    }

    /// 转换为加速器使用的参考描述, 跳过没有表面的 "不存在" 帧
    pub fn ref_entries(&self, list: &[RefPic]) -> Vec<ReferenceEntry> {
        list.iter()
            .filter_map(|r| {
                let pic = self.arena.get(r.id)?;
                let surface = pic.surface.as_ref()?;
                Some(ReferenceEntry {
                    surface: surface.id(),
                    poc: pic.field_poc(r.parity),
                    long_term: pic.long_term.intersects(r.parity),
                    structure: r.parity.structure(),
                })
            })
            .collect()
    }

    // ============================================================
    // 初始列表
    // ============================================================

    /// 帧解码的初始列表 (8.2.4.2.1 / 8.2.4.2.3)
    fn init_frame_lists(&self, cur_poc: i32, is_b: bool) -> (Vec<RefPic>, Vec<RefPic>) {
        let mut short: Vec<_> = self
            .entries()
            .filter(|(_, pic)| pic.is_short_term_frame())
            .collect();
        let mut long: Vec<_> = self
            .entries()
            .filter(|(_, pic)| pic.is_long_term_frame())
            .collect();
        long.sort_by_key(|(_, pic)| pic.long_term_frame_idx);
        let long = long.into_iter().map(|(id, _)| frame_ref(id));

        if !is_b {
            short.sort_by_key(|(_, pic)| Reverse(pic.frame_num_wrap));
            let list0 = short.into_iter().map(|(id, _)| frame_ref(id)).chain(long).collect();
            return (list0, Vec::new());
        }

        let (before, after) = split_by_poc(short, cur_poc, |pic| pic.poc, false);
        let list0 = before.iter().chain(&after).map(|&id| frame_ref(id));
        let list1 = after.iter().chain(&before).map(|&id| frame_ref(id));
        let long: Vec<_> = long.collect();
        (
            list0.chain(long.iter().copied()).collect(),
            list1.chain(long.iter().copied()).collect(),
        )
    }

    /// 场解码的初始列表 (8.2.4.2.2 / 8.2.4.2.4 / 8.2.4.2.5)
    fn init_field_lists(&self, structure: FieldMask, cur_poc: i32, is_b: bool) -> (Vec<RefPic>, Vec<RefPic>) {
        let mut short: Vec<_> = self
            .entries()
            .filter(|(_, pic)| !pic.short_term.is_empty())
            .collect();
        let mut long: Vec<_> = self
            .entries()
            .filter(|(_, pic)| !pic.long_term.is_empty())
            .collect();
        long.sort_by_key(|(_, pic)| pic.long_term_frame_idx);
        let long: Vec<_> = long.into_iter().map(|(id, _)| id).collect();

        let long_fields = self.interleave_fields(&long, structure, |pic| pic.long_term);
        if !is_b {
            short.sort_by_key(|(_, pic)| Reverse(pic.frame_num_wrap));
            let frames: Vec<_> = short.into_iter().map(|(id, _)| id).collect();
            let mut list0 = self.interleave_fields(&frames, structure, |pic| pic.short_term);
            list0.extend(long_fields);
            return (list0, Vec::new());
        }

        // 条目 POC 只统计被标记为短期参考的场, 与当前 POC 相等的归入前半部分
        let (before, after) = split_by_poc(short, cur_poc, short_term_poc, true);
        let frames0: Vec<_> = before.iter().chain(&after).copied().collect();
        let frames1: Vec<_> = after.iter().chain(&before).copied().collect();
        let mut list0 = self.interleave_fields(&frames0, structure, |pic| pic.short_term);
        let mut list1 = self.interleave_fields(&frames1, structure, |pic| pic.short_term);
        list0.extend(long_fields.iter().copied());
        list1.extend(long_fields);
        (list0, list1)
    }

    /// 从帧列表交替取出同/反奇偶性的场, 一方取尽后追加另一方剩余的场
    fn interleave_fields(
        &self,
        frames: &[PicId],
        structure: FieldMask,
        marked: impl Fn(&H264Picture) -> FieldMask,
    ) -> Vec<RefPic> {
        let parities = [structure, structure.opposite()];
        let has = |idx: usize, parity: FieldMask| {
            self.arena
                .get(frames[idx])
                .is_some_and(|pic| marked(pic).contains(parity))
        };

        let mut out = Vec::new();
        let mut next = [0usize; 2];
        let mut turn = 0;
        loop {
            let parity = parities[turn];
            while next[turn] < frames.len() && !has(next[turn], parity) {
                next[turn] += 1;
            }
            if next[turn] >= frames.len() {
                let other = 1 - turn;
                for idx in next[other]..frames.len() {
                    if has(idx, parities[other]) {
                        out.push(RefPic {
                            id: frames[idx],
                            parity: parities[other],
                        });
                    }
                }
                break;
            }
            out.push(RefPic {
                id: frames[next[turn]],
                parity,
            });
            next[turn] += 1;
            turn = 1 - turn;
        }
        out
    }

    fn entries(&self) -> impl Iterator<Item = (PicId, &H264Picture)> {
        self.pictures
            .iter()
            .filter_map(|&id| self.arena.get(id).map(|pic| (id, pic)))
    }

    // ============================================================
    // 列表修改 (8.2.4.3)
    // ============================================================

    fn modify_list(
        &mut self,
        list: &mut Vec<RefPic>,
        ops: &[RefPicListMod],
        cur: &H264Picture,
        structure: FieldMask,
        num_active: usize,
    ) {
        list.truncate(num_active);
        if ops.is_empty() {
            return;
        }

        let (curr_pic_num, max_pic_num) = if structure.is_field() {
            (2 * cur.frame_num as i32 + 1, 2 * self.max_frame_num as i32)
        } else {
            (cur.frame_num as i32, self.max_frame_num as i32)
        };
        let mut pic_num_pred = curr_pic_num;
        let mut ref_idx = 0usize;

        for &op in ops {
            let found = match op {
                RefPicListMod::ShortTermSub {
                    abs_diff_pic_num_minus1,
                }
                | RefPicListMod::ShortTermAdd {
                    abs_diff_pic_num_minus1,
                } => {
                    let abs_diff = i64::from(abs_diff_pic_num_minus1) + 1;
                    let no_wrap = if matches!(op, RefPicListMod::ShortTermSub { .. }) {
                        i64::from(pic_num_pred) - abs_diff
                    } else {
                        i64::from(pic_num_pred) + abs_diff
                    };
                    // 结果落在 [0, MaxPicNum) 内, 转换不会失败
                    let no_wrap = no_wrap.rem_euclid(i64::from(max_pic_num)) as i32;
                    pic_num_pred = no_wrap;
                    let pic_num = if no_wrap > curr_pic_num {
                        no_wrap - max_pic_num
                    } else {
                        no_wrap
                    };
                    let found = self.find_by_pic_num(pic_num, structure);
                    if found.is_none() {
                        self.record_missing_reference("ref_list_mod_short", pic_num);
                    }
                    found
                }
                RefPicListMod::LongTerm { long_term_pic_num } => {
                    let found = self.find_by_long_term_pic_num(long_term_pic_num as i32, structure);
                    if found.is_none() {
                        self.record_missing_reference("ref_list_mod_long", long_term_pic_num as i32);
                    }
                    found
                }
            };

            let Some(pic) = found else {
                continue;
            };
            let at = ref_idx.min(list.len());
            list.insert(at, pic);
            ref_idx += 1;
            let mut pos = at + 1;
            while pos < list.len() {
                if list[pos] == pic {
                    list.remove(pos);
                } else {
                    pos += 1;
                }
            }
            list.truncate(num_active);
        }
    }

    /// 按 PicNum 查找短期参考 (依赖 `update_frame_num_wraps`)
    fn find_by_pic_num(&self, pic_num: i32, structure: FieldMask) -> Option<RefPic> {
        self.entries().find_map(|(id, pic)| {
            if !structure.is_field() {
                return (pic.is_short_term_frame() && pic.frame_num_wrap == pic_num).then_some(frame_ref(id));
            }
            [structure, structure.opposite()].into_iter().find_map(|parity| {
                let field_pic_num = if parity == structure {
                    2 * pic.frame_num_wrap + 1
                } else {
                    2 * pic.frame_num_wrap
                };
                (pic.short_term.contains(parity) && field_pic_num == pic_num).then_some(RefPic { id, parity })
            })
        })
    }

    /// 按 LongTermPicNum 查找长期参考
    fn find_by_long_term_pic_num(&self, long_term_pic_num: i32, structure: FieldMask) -> Option<RefPic> {
        self.entries().find_map(|(id, pic)| {
            let idx = pic.long_term_frame_idx as i32;
            if !structure.is_field() {
                return (pic.is_long_term_frame() && idx == long_term_pic_num).then_some(frame_ref(id));
            }
            [structure, structure.opposite()].into_iter().find_map(|parity| {
                let num = if parity == structure { 2 * idx + 1 } else { 2 * idx };
                (pic.long_term.contains(parity) && num == long_term_pic_num).then_some(RefPic { id, parity })
            })
        })
    }
}

fn frame_ref(id: PicId) -> RefPic {
    RefPic {
        id,
        parity: FieldMask::FRAME,
    }
}

/// 场解码时条目的 POC: 取被短期参考的场中的最小值
fn short_term_poc(pic: &H264Picture) -> i32 {
    [FieldMask::TOP, FieldMask::BOTTOM]
        .into_iter()
        .filter(|&parity| pic.short_term.contains(parity))
        .map(|parity| pic.field_poc(parity))
        .min()
        .unwrap_or(pic.poc)
}

/// 按 POC 拆分为 "之前" (降序) 与 "之后" (升序) 两组
fn split_by_poc(
    entries: Vec<(PicId, &H264Picture)>,
    cur_poc: i32,
    poc_of: impl Fn(&H264Picture) -> i32,
    include_equal: bool,
) -> (Vec<PicId>, Vec<PicId>) {
    let (mut before, mut after): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .map(|(id, pic)| (id, poc_of(pic)))
        .partition(|&(_, poc)| poc < cur_poc || (include_equal && poc == cur_poc));
    before.sort_by_key(|&(_, poc)| Reverse(poc));
    after.sort_by_key(|&(_, poc)| poc);
    (
        before.into_iter().map(|(id, _)| id).collect(),
        after.into_iter().map(|(id, _)| id).collect(),
    )
}
