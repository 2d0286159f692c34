//! H.265 参考图像集 (RPS) 推导与参考标记, 对应标准 8.3.2.
//!
//! 每幅图像的第一个 slice 执行一次: 先按片头给出的 delta POC 推导五个 POC 列表,
//! 再在 DPB 中定位对应图像. 长期参考先于短期参考匹配, 不在 RPS 中的图像一律标记为
//! "不用于参考".

use crate::arena::PicId;
use crate::parsers::h265::HevcSliceHeader;

use super::dpb::H265Dpb;
use super::picture::{H265Picture, RefMark};

/// 当前图像的参考图像集
///
/// 未能在 DPB 中找到的条目为 `None`, 保留位置以便 `list_entry_lX` 按索引引用.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefPicSet {
    /// RefPicSetStCurrBefore
    pub st_curr_before: Vec<Option<PicId>>,
    /// RefPicSetStCurrAfter
    pub st_curr_after: Vec<Option<PicId>>,
    /// RefPicSetStFoll
    pub st_foll: Vec<Option<PicId>>,
    /// RefPicSetLtCurr
    pub lt_curr: Vec<Option<PicId>>,
    /// RefPicSetLtFoll
    pub lt_foll: Vec<Option<PicId>>,
}

impl RefPicSet {
    /// NumPicTotalCurr
    pub fn num_pic_total_curr(&self) -> usize {
        self.st_curr_before.len() + self.st_curr_after.len() + self.lt_curr.len()
    }

    fn all(&self) -> impl Iterator<Item = PicId> + '_ {
        self.st_curr_before
            .iter()
            .chain(&self.st_curr_after)
            .chain(&self.st_foll)
            .chain(&self.lt_curr)
            .chain(&self.lt_foll)
            .flatten()
            .copied()
    }
}

/// 长期参考的 POC 与 delta_poc_msb_present_flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LongTermPoc {
    poc: i32,
    msb_present: bool,
}

/// 由片头推导的 POC 列表 (式 8-5)
#[derive(Debug, Default, PartialEq, Eq)]
struct PocLists {
    st_curr_before: Vec<i32>,
    st_curr_after: Vec<i32>,
    st_foll: Vec<i32>,
    lt_curr: Vec<LongTermPoc>,
    lt_foll: Vec<LongTermPoc>,
}

fn derive_poc_lists(cur_poc: i32, slice: &HevcSliceHeader, max_poc_lsb: i32) -> PocLists {
    let mut lists = PocLists::default();
    let rps = &slice.short_term_rps;

    for (&delta, &used) in rps.delta_poc_s0.iter().zip(&rps.used_by_curr_pic_s0) {
        if used {
            lists.st_curr_before.push(cur_poc.wrapping_add(delta));
        } else {
            lists.st_foll.push(cur_poc.wrapping_add(delta));
        }
    }
    for (&delta, &used) in rps.delta_poc_s1.iter().zip(&rps.used_by_curr_pic_s1) {
        if used {
            lists.st_curr_after.push(cur_poc.wrapping_add(delta));
        } else {
            lists.st_foll.push(cur_poc.wrapping_add(delta));
        }
    }

    // POC 按 32 位补码回绕计算
    let cur_lsb = slice.pic_order_cnt_lsb as i32;
    for lt in &slice.long_term_refs {
        let mut poc = lt.poc_lsb as i32;
        if lt.delta_poc_msb_present {
            let msb_delta = (lt.delta_poc_msb_cycle as i32).wrapping_mul(max_poc_lsb);
            poc = poc.wrapping_add(cur_poc.wrapping_sub(msb_delta).wrapping_sub(cur_lsb));
        }
        let entry = LongTermPoc {
            poc,
            msb_present: lt.delta_poc_msb_present,
        };
        if lt.used_by_curr {
            lists.lt_curr.push(entry);
        } else {
            lists.lt_foll.push(entry);
        }
    }
    lists
}

impl H265Dpb {
    /// 推导当前图像的 RPS 并更新 DPB 中全部图像的参考标记
    pub fn apply_rps(&mut self, cur: &H265Picture, slice: &HevcSliceHeader) {
        if cur.is_irap_no_rasl() {
            for &id in self.pictures.values() {
                if let Some(pic) = self.arena.get_mut(id) {
                    pic.reference = RefMark::Unused;
                }
            }
        }

        let lists = if cur.nal_type.is_idr() {
            PocLists::default()
        } else {
            derive_poc_lists(cur.poc, slice, self.max_poc_lsb)
        };

        let lt_curr: Vec<_> = lists
            .lt_curr
            .iter()
            .map(|&lt| self.find_long_term_candidate(lt))
            .collect();
        let lt_foll: Vec<_> = lists
            .lt_foll
            .iter()
            .map(|&lt| self.find_long_term_candidate(lt))
            .collect();
        for &id in lt_curr.iter().chain(&lt_foll).flatten() {
            if let Some(pic) = self.arena.get_mut(id) {
                pic.reference = RefMark::LongTerm;
            }
        }

        let st_curr_before: Vec<_> = lists
            .st_curr_before
            .iter()
            .map(|&poc| self.find_short_term(poc))
            .collect();
        let st_curr_after: Vec<_> = lists
            .st_curr_after
            .iter()
            .map(|&poc| self.find_short_term(poc))
            .collect();
        let st_foll: Vec<_> = lists
            .st_foll
            .iter()
            .map(|&poc| self.find_short_term(poc))
            .collect();

        for (poc, found) in lists.st_curr_before.iter().zip(&st_curr_before) {
            if found.is_none() {
                self.record_missing_reference("StCurrBefore", *poc);
            }
        }
        for (poc, found) in lists.st_curr_after.iter().zip(&st_curr_after) {
            if found.is_none() {
                self.record_missing_reference("StCurrAfter", *poc);
            }
        }
        for (lt, found) in lists.lt_curr.iter().zip(&lt_curr) {
            if found.is_none() {
                self.record_missing_reference("LtCurr", lt.poc);
            }
        }

        self.rps = RefPicSet {
            st_curr_before,
            st_curr_after,
            st_foll,
            lt_curr,
            lt_foll,
        };

        let in_rps: Vec<PicId> = self.rps.all().collect();
        for &id in self.pictures.values() {
            if !in_rps.contains(&id)
                && let Some(pic) = self.arena.get_mut(id)
            {
                pic.reference = RefMark::Unused;
            }
        }
    }

    /// 在全部参考图像中按 POC (或 POC LSB) 查找长期参考
    fn find_long_term_candidate(&self, lt: LongTermPoc) -> Option<PicId> {
        self.pictures.values().copied().find(|&id| {
            self.arena.get(id).is_some_and(|pic| {
                pic.is_reference()
                    && if lt.msb_present {
                        pic.poc == lt.poc
                    } else {
                        pic.poc_lsb as i32 == lt.poc
                    }
            })
        })
    }

    fn find_short_term(&self, poc: i32) -> Option<PicId> {
        let id = *self.pictures.get(&poc)?;
        self.arena
            .get(id)
            .is_some_and(|pic| pic.is_short_term())
            .then_some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::DecodedPicture;
    use crate::parsers::h265::{
        HevcNalUnit, HevcNalUnitType, HevcPps, HevcSliceType, HevcSps, parse_hevc_pps,
        parse_hevc_slice_header, parse_hevc_sps,
    };
    use crate::test_streams::h265::{PpsBuilder, SliceBuilder, SpsBuilder};

    struct Fixture {
        sps: HevcSps,
        pps: HevcPps,
        dpb: H265Dpb,
        out: Vec<DecodedPicture>,
    }

    impl Fixture {
        /// MaxPicOrderCntLsb = 16, DPB 中已有 POC 0/4/8 三幅短期参考
        fn new() -> Self {
            let sps = parse_hevc_sps(
                &SpsBuilder::new(64, 64)
                    .log2_max_poc_lsb(4)
                    .dpb(6, 6)
                    .long_term_sps(vec![])
                    .rbsp(),
            )
            .unwrap();
            let pps = parse_hevc_pps(&PpsBuilder::new(0, 0).rbsp()).unwrap();
            let mut dpb = H265Dpb::new();
            dpb.configure(&sps);
            let mut fixture = Self {
                sps,
                pps,
                dpb,
                out: Vec::new(),
            };
            for poc in [0, 4, 8] {
                fixture.store(poc);
            }
            fixture
        }

        fn store(&mut self, poc: i32) {
            let pic = H265Picture::new(poc, (poc & 15) as u32, HevcNalUnitType::TrailR);
            self.dpb.add(pic, &mut self.out).unwrap();
        }

        fn header(&self, builder: SliceBuilder) -> HevcSliceHeader {
            let nal = builder.nal(&self.sps, &self.pps);
            let nalu = HevcNalUnit::parse(&nal).unwrap();
            parse_hevc_slice_header(&nalu, &nalu.rbsp(), None, |_| Some((&self.pps, &self.sps)))
                .unwrap()
        }

        fn apply(&mut self, poc: i32, builder: SliceBuilder) {
            let header = self.header(builder);
            let mut cur = H265Picture::new(poc, header.pic_order_cnt_lsb, header.nal_type);
            cur.no_rasl_output = header.nal_type.is_idr();
            self.dpb.apply_rps(&cur, &header);
        }

        fn pocs(&self, list: &[Option<PicId>]) -> Vec<Option<i32>> {
            list.iter()
                .map(|id| id.and_then(|id| self.dpb.get(id)).map(|pic| pic.poc))
                .collect()
        }

        fn marks(&self) -> Vec<(i32, RefMark)> {
            self.dpb.iter().map(|pic| (pic.poc, pic.reference)).collect()
        }
    }

    #[test]
    fn test_short_term_rps_partition() {
        let mut f = Fixture::new();
        f.apply(6, SliceBuilder::trail(HevcSliceType::B, 6).explicit_rps(vec![-2, -6], vec![2]));

        let rps = f.dpb.rps().clone();
        assert_eq!(f.pocs(&rps.st_curr_before), vec![Some(4), Some(0)]);
        assert_eq!(f.pocs(&rps.st_curr_after), vec![Some(8)]);
        assert!(rps.st_foll.is_empty());
        assert_eq!(rps.num_pic_total_curr(), 3);
        assert!(f.marks().iter().all(|&(_, mark)| mark == RefMark::ShortTerm));
    }

    #[test]
    fn test_pictures_outside_rps_unmarked() {
        let mut f = Fixture::new();
        f.apply(10, SliceBuilder::trail(HevcSliceType::P, 10).explicit_rps(vec![-2], vec![]));
        assert_eq!(
            f.marks(),
            vec![(0, RefMark::Unused), (4, RefMark::Unused), (8, RefMark::ShortTerm)]
        );
    }

    #[test]
    fn test_long_term_matched_by_lsb() {
        let mut f = Fixture::new();
        f.apply(
            10,
            SliceBuilder::trail(HevcSliceType::P, 10)
                .explicit_rps(vec![-2], vec![])
                .long_term(0, vec![(4, true, None), (0, false, None)]),
        );

        let rps = f.dpb.rps().clone();
        assert_eq!(f.pocs(&rps.lt_curr), vec![Some(4)]);
        assert_eq!(f.pocs(&rps.lt_foll), vec![Some(0)]);
        assert_eq!(rps.num_pic_total_curr(), 2, "LtFoll 不计入 NumPicTotalCurr");
        assert_eq!(
            f.marks(),
            vec![(0, RefMark::LongTerm), (4, RefMark::LongTerm), (8, RefMark::ShortTerm)]
        );
    }

    #[test]
    fn test_long_term_with_msb_cycle() {
        let mut f = Fixture::new();
        f.store(16);
        // 当前 POC 20 (LSB 4): PocLsbLt 0 + 20 - 1*16 - 4 = 0
        f.apply(
            20,
            SliceBuilder::trail(HevcSliceType::P, 4)
                .explicit_rps(vec![-4], vec![])
                .long_term(0, vec![(0, true, Some(1))]),
        );

        let rps = f.dpb.rps().clone();
        assert_eq!(f.pocs(&rps.lt_curr), vec![Some(0)], "MSB 周期应区分 POC 0 与 16");
        assert_eq!(f.pocs(&rps.st_curr_before), vec![Some(16)]);
    }

    #[test]
    fn test_long_term_not_reused_as_short_term() {
        let mut f = Fixture::new();
        f.apply(
            10,
            SliceBuilder::trail(HevcSliceType::P, 10)
                .explicit_rps(vec![-2], vec![])
                .long_term(0, vec![(4, true, None)]),
        );
        f.apply(12, SliceBuilder::trail(HevcSliceType::P, 12).explicit_rps(vec![-8], vec![]));

        let rps = f.dpb.rps().clone();
        assert_eq!(f.pocs(&rps.st_curr_before), vec![None], "长期图像不能匹配短期条目");
        assert_eq!(
            f.marks(),
            vec![(0, RefMark::Unused), (4, RefMark::Unused), (8, RefMark::Unused)]
        );
    }

    #[test]
    fn test_missing_reference_keeps_slot() {
        let mut f = Fixture::new();
        f.apply(6, SliceBuilder::trail(HevcSliceType::P, 6).explicit_rps(vec![-2, -4], vec![]));
        let rps = f.dpb.rps().clone();
        assert_eq!(f.pocs(&rps.st_curr_before), vec![Some(4), None]);
        assert_eq!(rps.num_pic_total_curr(), 2);
    }

    #[test]
    fn test_idr_clears_all_references() {
        let mut f = Fixture::new();
        f.apply(0, SliceBuilder::idr());
        assert_eq!(f.dpb.rps(), &RefPicSet::default());
        assert!(f.marks().iter().all(|&(_, mark)| mark == RefMark::Unused));
    }

    #[test]
    fn test_poc_list_derivation() {
        let f = Fixture::new();
        let header = f.header(
            SliceBuilder::trail(HevcSliceType::B, 3)
                .explicit_rps(vec![-1, -3], vec![1])
                .long_term(0, vec![(9, false, Some(2))]),
        );
        let lists = derive_poc_lists(35, &header, 16);
        assert_eq!(lists.st_curr_before, vec![34, 32]);
        assert_eq!(lists.st_curr_after, vec![36]);
        // 9 + 35 - 2*16 - 3 = 9
        assert_eq!(
            lists.lt_foll,
            vec![LongTermPoc {
                poc: 9,
                msb_present: true
            }]
        );
    }
}
