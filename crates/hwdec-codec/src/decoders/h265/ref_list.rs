//! H.265 参考图像列表构建, 对应标准 8.3.4.
//!
//! 临时列表按 StCurrBefore / StCurrAfter / LtCurr (列表 1 为 StCurrAfter /
//! StCurrBefore / LtCurr) 循环填充到 max(num_ref_idx_active, NumPicTotalCurr),
//! 之后按 list_entry_lX 选取或直接截断.

use log::debug;

use crate::accelerator::{PictureStructure, ReferenceEntry};
use crate::arena::PicId;
use crate::parsers::h265::HevcSliceHeader;

use super::dpb::H265Dpb;

/// 当前 slice 的参考图像列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefPicLists {
    /// RefPicList0
    pub list0: Vec<PicId>,
    /// RefPicList1
    pub list1: Vec<PicId>,
}

impl H265Dpb {
    /// 按当前 RPS 构建 slice 的参考列表
    ///
    /// RPS 中缺失的图像记录告警后跳过.
    pub fn build_ref_lists(&mut self, slice: &HevcSliceHeader) -> RefPicLists {
        if slice.slice_type.is_intra() {
            return RefPicLists::default();
        }
        if self.rps.num_pic_total_curr() == 0 {
            debug!("H265: 帧间 slice 没有可用参考, type={:?}", slice.slice_type);
            return RefPicLists::default();
        }

        let rps = &self.rps;
        let temp0 = round_robin(
            [&rps.st_curr_before, &rps.st_curr_after, &rps.lt_curr],
            slice.num_ref_idx_l0_active().max(rps.num_pic_total_curr()),
        );
        let list0 = self.select(
            &temp0,
            slice.list_entry_l0.as_deref(),
            slice.num_ref_idx_l0_active(),
            "RefPicList0",
        );

        let list1 = if slice.slice_type.is_b() {
            let rps = &self.rps;
            let temp1 = round_robin(
                [&rps.st_curr_after, &rps.st_curr_before, &rps.lt_curr],
                slice.num_ref_idx_l1_active().max(rps.num_pic_total_curr()),
            );
            self.select(
                &temp1,
                slice.list_entry_l1.as_deref(),
                slice.num_ref_idx_l1_active(),
                "RefPicList1",
            )
        } else {
            Vec::new()
        };

        RefPicLists { list0, list1 }
    }

    /// 把列表转换为加速器使用的参考描述
    pub fn ref_entries(&self, list: &[PicId]) -> Vec<ReferenceEntry> {
        list.iter()
            .filter_map(|&id| {
                let pic = self.arena.get(id)?;
                let surface = pic.surface.as_ref()?;
                Some(ReferenceEntry {
                    surface: surface.id(),
                    poc: pic.poc,
                    long_term: pic.is_long_term(),
                    structure: PictureStructure::Frame,
                })
            })
            .collect()
    }

    /// 式 8-9 / 8-11: 按 list_entry 选取或按顺序截断
    fn select(
        &mut self,
        temp: &[Option<PicId>],
        list_entry: Option<&[u32]>,
        num_active: usize,
        scene: &str,
    ) -> Vec<PicId> {
        let mut list = Vec::with_capacity(num_active);
        for idx in 0..num_active {
            let pos = list_entry
                .and_then(|entries| entries.get(idx))
                .map_or(idx, |&entry| entry as usize);
            match temp.get(pos).copied().flatten() {
                Some(id) => list.push(id),
                None => self.record_missing_reference(scene, idx as i32),
            }
        }
        list
    }
}

/// 依次轮流取三个集合的条目, 直到列表长度达到 `total`
fn round_robin(sets: [&Vec<Option<PicId>>; 3], total: usize) -> Vec<Option<PicId>> {
    let mut temp = Vec::with_capacity(total);
    if sets.iter().all(|set| set.is_empty()) {
        return temp;
    }
    while temp.len() < total {
        for set in sets {
            for &entry in set {
                if temp.len() == total {
                    return temp;
                }
                temp.push(entry);
            }
        }
    }
    temp
}
