//! H.264 解码图像缓冲区 (DPB).
//!
//! 图像存储与输出 (bumping) 对应标准附录 C.4.4 / C.4.5, 参考标记见 `marking.rs`,
//! 参考列表构建见 `ref_list.rs`.
//!
//! DPB 条目以 POC 升序保存, 相同 POC 按插入顺序排列, bumping 总是输出最靠前的
//! 待输出图像.

use log::{debug, warn};

use hwdec_core::{HwdecError, HwdecResult};

use crate::accelerator::ReferenceEntry;
use crate::arena::{PicId, PictureArena};
use crate::output::{DecodedPicture, OutputSink};
use crate::parsers::h264::{DecRefPicMarking, Sps};

use super::picture::{FieldMask, H264Picture};

/// DPB 帧容量上限
pub const MAX_DPB_FRAMES: usize = 16;

/// 缺失参考告警次数上限, 超过后不再逐条输出
const MISSING_REFERENCE_LOG_LIMIT: u32 = 8;

/// 按 level 表 A-1 与 VUI 推导 max_dec_frame_buffering
pub fn max_dec_frame_buffering(sps: &Sps) -> usize {
    // 表 A-1: MaxDpbMbs
    let max_dpb_mbs: u32 = match sps.level_idc {
        9 | 10 => 396,
        11 => 900,
        12 | 13 | 20 => 2376,
        21 => 4752,
        22 | 30 => 8100,
        31 => 18000,
        32 => 20480,
        40 | 41 => 32768,
        42 => 34816,
        50 => 110400,
        51 | 52 => 184320,
        other => {
            warn!("H264: 未知 level_idc={}, 按 level 5.1 推导 DPB 容量", other);
            184320
        }
    };

    let frame_size_in_mbs = sps.frame_size_in_mbs().max(1);
    let mut frames = max_dpb_mbs / frame_size_in_mbs;

    if let Some(restriction) = &sps.bitstream_restriction {
        frames = restriction.max_dec_frame_buffering;
    } else if matches!(sps.profile_idc, 44 | 86 | 100 | 110 | 122 | 244) && sps.constraint_set3() {
        // 帧内 profile 不需要参考帧
        frames = 0;
    }

    let frames = if frames > MAX_DPB_FRAMES as u32 {
        MAX_DPB_FRAMES as u32
    } else {
        frames.max(sps.max_num_ref_frames)
    };
    frames.clamp(1, MAX_DPB_FRAMES as u32) as usize
}

/// H.264 DPB
#[derive(Debug)]
pub struct H264Dpb {
    pub(super) arena: PictureArena<H264Picture>,
    /// 按 POC 升序排列的条目
    pub(super) pictures: Vec<PicId>,
    max_frames: usize,
    pub(super) max_num_ref_frames: u32,
    pub(super) max_frame_num: u32,
    /// MaxLongTermFrameIdx, `None` 表示 "无长期帧索引"
    pub(super) max_long_term_frame_idx: Option<u32>,
    /// 最近插入、尚未配对的第一场
    last_field: Option<PicId>,
    missing_reference_warnings: u32,
}

impl Default for H264Dpb {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Dpb {
    /// 创建空 DPB, 容量在 `configure()` 后生效
    pub fn new() -> Self {
        Self {
            arena: PictureArena::new(),
            pictures: Vec::new(),
            max_frames: 1,
            max_num_ref_frames: 1,
            max_frame_num: 16,
            max_long_term_frame_idx: None,
            last_field: None,
            missing_reference_warnings: 0,
        }
    }

    /// 按 SPS 设置容量与 frame_num 范围
    pub fn configure(&mut self, sps: &Sps) {
        self.max_frames = max_dec_frame_buffering(sps);
        self.max_num_ref_frames = sps.max_num_ref_frames;
        self.max_frame_num = sps.max_frame_num();
        debug!(
            "H264: DPB 配置 max_frames={}, max_num_ref_frames={}, max_frame_num={}",
            self.max_frames, self.max_num_ref_frames, self.max_frame_num
        );
    }

    /// DPB 容量 (帧)
    pub fn capacity(&self) -> usize {
        self.max_frames
    }

    /// 当前条目数
    pub fn len(&self) -> usize {
        self.pictures.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.pictures.is_empty()
    }

    /// 按 POC 顺序遍历条目
    pub fn iter(&self) -> impl Iterator<Item = &H264Picture> {
        self.pictures.iter().filter_map(|&id| self.arena.get(id))
    }

    /// 按索引访问条目
    pub fn get(&self, id: PicId) -> Option<&H264Picture> {
        self.arena.get(id)
    }

    /// 当前参考图像数 (帧或场对计一次)
    pub fn num_references(&self) -> usize {
        self.iter().filter(|pic| pic.is_reference()).count()
    }

    /// 查找可与当前场配对的第一场
    ///
    /// 条件: 最近插入的条目是相反奇偶性的单场、frame_num 相同、参考属性一致.
    pub fn find_first_field(&self, frame_num: u32, parity: FieldMask, nal_ref: bool) -> Option<PicId> {
        if !parity.is_field() {
            return None;
        }
        let id = self.last_field?;
        let first = self.arena.get(id)?;
        let paired = first.fields.is_field()
            && first.fields == parity.opposite()
            && first.frame_num == frame_num
            && first.nal_ref == nal_ref
            && !first.non_existing;
        paired.then_some(id)
    }

    // ============================================================
    // 存储与输出
    // ============================================================

    /// 标记参考并存入当前图像 (C.4.4 / C.4.5)
    ///
    /// 第二场并入第一场的条目, 不占用新的容量.
    pub fn add(
        &mut self,
        mut pic: H264Picture,
        marking: &DecRefPicMarking,
        sink: &mut dyn OutputSink,
    ) -> HwdecResult<()> {
        let first_field = self.find_first_field(pic.frame_num, pic.fields, pic.nal_ref);

        self.mark_current(&mut pic, marking, first_field);

        if first_field.is_none() && (pic.idr || pic.mmco5) {
            if pic.idr && marking.no_output_of_prior_pics {
                debug!("H264: no_output_of_prior_pics, 丢弃 {} 幅图像", self.pictures.len());
                self.clear();
            } else {
                self.flush(sink);
            }
        } else {
            self.remove_unused();
        }

        if let Some(first_id) = first_field {
            self.merge_second_field(first_id, pic);
            return Ok(());
        }

        if pic.is_reference() || !pic.is_complete_frame() {
            // C.4.5.1: 参考图像 (以及非参考第一场) 必须入库
            while self.pictures.len() >= self.max_frames {
                if !self.bump(sink) {
                    return Err(HwdecError::DpbFull(format!(
                        "H264: DPB 已满且无待输出图像, size={}",
                        self.pictures.len()
                    )));
                }
            }
        } else {
            // C.4.5.2: 非参考帧, 若自身 POC 最小则直接输出
            while self.pictures.len() >= self.max_frames {
                let has_earlier = self
                    .iter()
                    .any(|other| other.output_needed && other.poc < pic.poc);
                if !has_earlier {
                    self.output_directly(&pic, sink);
                    return Ok(());
                }
                self.bump(sink);
            }
        }

        pic.output_needed = !pic.non_existing;
        self.insert(pic);
        Ok(())
    }

    /// 存入 frame_num 间隙合成的 "不存在" 帧, 执行滑动窗口标记
    pub fn add_non_existing(&mut self, mut pic: H264Picture, sink: &mut dyn OutputSink) -> HwdecResult<()> {
        self.sliding_window(pic.frame_num);
        pic.short_term = FieldMask::FRAME;
        self.remove_unused();
        while self.pictures.len() >= self.max_frames {
            if !self.bump(sink) {
                return Err(HwdecError::DpbFull(format!(
                    "H264: 无法为 frame_num={} 的间隙帧腾出空间",
                    pic.frame_num
                )));
            }
        }
        self.insert(pic);
        Ok(())
    }

    /// 输出 POC 最小的待输出图像, 不再被参考时移出 DPB
    ///
    /// 没有待输出图像时返回 `false`.
    pub fn bump(&mut self, sink: &mut dyn OutputSink) -> bool {
        let Some(pos) = self
            .pictures
            .iter()
            .position(|&id| self.arena.get(id).is_some_and(|pic| pic.output_needed))
        else {
            return false;
        };

        let id = self.pictures[pos];
        let Some(pic) = self.arena.get_mut(id) else {
            return false;
        };
        pic.output_needed = false;
        if let Some(surface) = pic.surface.clone() {
            debug!("H264: 输出 poc={}, frame_num={}", pic.poc, pic.frame_num);
            sink.output(DecodedPicture {
                surface,
                poc: pic.poc,
                timestamp: pic.timestamp,
            });
        }
        if !pic.is_reference() {
            self.remove_at(pos);
        }
        true
    }

    /// 输出全部待输出图像并清空 DPB
    pub fn flush(&mut self, sink: &mut dyn OutputSink) {
        while self.bump(sink) {}
        self.clear();
    }

    /// 不输出, 直接清空 DPB
    ///
    /// MaxLongTermFrameIdx 由当前 IDR 的标记决定, 不随之清除.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.pictures.clear();
        self.last_field = None;
    }

    /// 清空 DPB 并复位长期参考上限, 用于解码器重启
    pub fn reset(&mut self) {
        self.clear();
        self.max_long_term_frame_idx = None;
    }

    /// 移除既不参考也不待输出的条目
    pub fn remove_unused(&mut self) {
        let mut pos = 0;
        while pos < self.pictures.len() {
            let keep = self
                .arena
                .get(self.pictures[pos])
                .is_some_and(|pic| pic.output_needed || pic.is_reference());
            if keep {
                pos += 1;
            } else {
                self.remove_at(pos);
            }
        }
    }

    /// DPB 中全部参考图像 (提交加速器用)
    pub fn references(&self) -> Vec<ReferenceEntry> {
        self.iter()
            .filter(|pic| pic.is_reference())
            .filter_map(|pic| {
                let surface = pic.surface.as_ref()?;
                Some(ReferenceEntry {
                    surface: surface.id(),
                    poc: pic.poc,
                    long_term: !pic.long_term.is_empty(),
                    structure: pic.fields.structure(),
                })
            })
            .collect()
    }

    fn output_directly(&self, pic: &H264Picture, sink: &mut dyn OutputSink) {
        if let Some(surface) = pic.surface.clone() {
            debug!("H264: 非参考帧直接输出 poc={}", pic.poc);
            sink.output(DecodedPicture {
                surface,
                poc: pic.poc,
                timestamp: pic.timestamp,
            });
        }
    }

    fn insert(&mut self, pic: H264Picture) {
        let poc = pic.poc;
        let single_field = pic.fields.is_field();
        let id = self.arena.insert(pic);
        self.insert_sorted(id, poc);
        self.last_field = single_field.then_some(id);
    }

    fn insert_sorted(&mut self, id: PicId, poc: i32) {
        let arena = &self.arena;
        let pos = self
            .pictures
            .partition_point(|&other| arena.get(other).is_some_and(|pic| pic.poc <= poc));
        self.pictures.insert(pos, id);
    }

    fn merge_second_field(&mut self, first_id: PicId, second: H264Picture) {
        let Some(first) = self.arena.get_mut(first_id) else {
            return;
        };
        first.fields |= second.fields;
        if second.fields == FieldMask::TOP {
            first.top_poc = second.top_poc;
        } else {
            first.bottom_poc = second.bottom_poc;
        }
        first.short_term |= second.short_term;
        first.long_term |= second.long_term;
        if !second.long_term.is_empty() {
            first.long_term_frame_idx = second.long_term_frame_idx;
        }
        first.update_poc();
        let poc = first.poc;
        debug!("H264: 第二场并入 frame_num={}, poc={}", first.frame_num, poc);

        // POC 可能变小, 重新定位
        self.pictures.retain(|&id| id != first_id);
        self.insert_sorted(first_id, poc);
        self.last_field = None;
    }

    fn remove_at(&mut self, pos: usize) {
        let id = self.pictures.remove(pos);
        if self.last_field == Some(id) {
            self.last_field = None;
        }
        self.arena.remove(id);
    }

    pub(super) fn record_missing_reference(&mut self, scene: &str, value: i32) {
        self.missing_reference_warnings = self.missing_reference_warnings.saturating_add(1);
        if self.missing_reference_warnings <= MISSING_REFERENCE_LOG_LIMIT {
            warn!("H264: 缺失参考图像, scene={}, value={}, 已跳过", scene, value);
        } else if self.missing_reference_warnings == MISSING_REFERENCE_LOG_LIMIT + 1 {
            warn!("H264: 缺失参考图像日志过多, 后续同类日志省略");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::h264::parse_sps;
    use crate::surface::SurfacePool;
    use crate::test_streams::h264::SpsBuilder;

    fn dpb_with(max_frames: u32, num_ref_frames: u32) -> H264Dpb {
        let sps = parse_sps(
            &SpsBuilder::new(64, 64)
                .max_num_ref_frames(num_ref_frames)
                .bitstream_restriction(0, max_frames)
                .rbsp(),
        )
        .unwrap();
        let mut dpb = H264Dpb::new();
        dpb.configure(&sps);
        dpb
    }

    fn frame(pool: &SurfacePool, frame_num: u32, poc: i32, nal_ref: bool) -> H264Picture {
        let mut pic = H264Picture::new(pool.acquire(), FieldMask::FRAME, frame_num);
        pic.top_poc = poc;
        pic.bottom_poc = poc;
        pic.poc = poc;
        pic.nal_ref = nal_ref;
        pic
    }

    fn pocs(out: &[DecodedPicture]) -> Vec<i32> {
        out.iter().map(|p| p.poc).collect()
    }

    #[test]
    fn test_max_dec_frame_buffering_from_level() {
        // level 3.0: 8100 / (80*45=3600 MB) = 2, 不低于 num_ref_frames=4
        let sps = parse_sps(&SpsBuilder::new(1280, 720).level(30).rbsp()).unwrap();
        assert_eq!(max_dec_frame_buffering(&sps), 4);

        let sps = parse_sps(&SpsBuilder::new(320, 240).level(30).max_num_ref_frames(1).rbsp())
            .unwrap();
        assert_eq!(max_dec_frame_buffering(&sps), 16, "应截断到 16");

        let sps = parse_sps(
            &SpsBuilder::new(320, 240)
                .max_num_ref_frames(1)
                .bitstream_restriction(1, 3)
                .rbsp(),
        )
        .unwrap();
        assert_eq!(max_dec_frame_buffering(&sps), 3, "VUI 应覆盖 level 推导值");
    }

    #[test]
    fn test_max_dec_frame_buffering_intra_profile() {
        let sps = parse_sps(
            &SpsBuilder::new(320, 240)
                .profile(100)
                .constraint_flags(0x10)
                .max_num_ref_frames(0)
                .rbsp(),
        )
        .unwrap();
        assert_eq!(max_dec_frame_buffering(&sps), 1, "帧内 profile 至少保留 1 帧");
    }

    #[test]
    fn test_bump_outputs_in_poc_order() {
        let pool = SurfacePool::new(8, 64, 64);
        let mut dpb = dpb_with(4, 4);
        let mut out = Vec::new();
        let marking = DecRefPicMarking::default();

        let mut idr = frame(&pool, 0, 0, true);
        idr.idr = true;
        dpb.add(idr, &marking, &mut out).unwrap();
        dpb.add(frame(&pool, 1, 8, true), &marking, &mut out).unwrap();
        dpb.add(frame(&pool, 2, 4, false), &marking, &mut out).unwrap();
        dpb.add(frame(&pool, 2, 2, false), &marking, &mut out).unwrap();
        assert!(out.is_empty(), "DPB 未满时不应输出");

        dpb.flush(&mut out);
        assert_eq!(pocs(&out), vec![0, 2, 4, 8]);
        assert!(dpb.is_empty());
        assert_eq!(pool.available(), 4, "输出仍持有 4 个表面");
        drop(out);
        assert_eq!(pool.available(), 8, "释放输出后表面应全部归还");
    }

    #[test]
    fn test_equal_poc_keeps_insertion_order() {
        let pool = SurfacePool::new(4, 64, 64);
        let mut dpb = dpb_with(4, 4);
        let mut out = Vec::new();
        let marking = DecRefPicMarking::default();

        let a = frame(&pool, 0, 4, true);
        let b = frame(&pool, 1, 4, true);
        let (id_a, id_b) = (a.surface.as_ref().unwrap().id(), b.surface.as_ref().unwrap().id());
        dpb.add(a, &marking, &mut out).unwrap();
        dpb.add(b, &marking, &mut out).unwrap();
        dpb.flush(&mut out);
        let ids: Vec<_> = out.iter().map(|p| p.surface.id()).collect();
        assert_eq!(ids, vec![id_a, id_b], "相同 POC 应按插入顺序输出");
    }

    #[test]
    fn test_non_reference_frame_output_directly_when_smallest() {
        let pool = SurfacePool::new(8, 64, 64);
        let mut dpb = dpb_with(3, 2);
        let mut out = Vec::new();
        let marking = DecRefPicMarking::default();

        let mut idr = frame(&pool, 0, 0, true);
        idr.idr = true;
        dpb.add(idr, &marking, &mut out).unwrap();
        dpb.add(frame(&pool, 1, 8, true), &marking, &mut out).unwrap();
        dpb.add(frame(&pool, 2, 4, false), &marking, &mut out).unwrap();
        assert!(out.is_empty());

        // DPB 已满: 先 bump 出 POC 0, 之后 B(2) 早于全部待输出图像, 直接输出
        dpb.add(frame(&pool, 2, 2, false), &marking, &mut out).unwrap();
        assert_eq!(pocs(&out), vec![0, 2]);
        assert_eq!(dpb.len(), 3);

        dpb.flush(&mut out);
        assert_eq!(pocs(&out), vec![0, 2, 4, 8]);
    }

    #[test]
    fn test_dpb_full_of_references_fails() {
        let pool = SurfacePool::new(8, 64, 64);
        let mut dpb = dpb_with(1, 1);
        let mut out = Vec::new();
        let marking = DecRefPicMarking::default();

        let mut idr = frame(&pool, 0, 0, true);
        idr.idr = true;
        dpb.add(idr, &marking, &mut out).unwrap();
        // 长期参考无法被滑动窗口淘汰, 输出后仍占用 DPB
        for pic in dpb.pictures.clone() {
            let pic = dpb.arena.get_mut(pic).unwrap();
            pic.short_term = FieldMask::empty();
            pic.long_term = FieldMask::FRAME;
        }
        dpb.max_long_term_frame_idx = Some(0);
        let err = dpb.add(frame(&pool, 1, 2, true), &marking, &mut out);
        assert_eq!(pocs(&out), vec![0]);
        assert!(matches!(err, Err(HwdecError::DpbFull(_))), "参考图像占满 DPB 时应报错");
    }

    #[test]
    fn test_second_field_merges_into_first() {
        let pool = SurfacePool::new(4, 64, 64);
        let mut dpb = dpb_with(4, 4);
        let mut out = Vec::new();
        let marking = DecRefPicMarking::default();

        let surface = pool.acquire();
        let mut top = H264Picture::new(surface.clone(), FieldMask::TOP, 0);
        top.idr = true;
        top.nal_ref = true;
        top.top_poc = 0;
        top.update_poc();
        dpb.add(top, &marking, &mut out).unwrap();
        assert!(dpb.find_first_field(0, FieldMask::BOTTOM, true).is_some());
        assert!(dpb.find_first_field(0, FieldMask::TOP, true).is_none(), "同奇偶性不能配对");

        let mut bottom = H264Picture::new(surface, FieldMask::BOTTOM, 0);
        bottom.nal_ref = true;
        bottom.bottom_poc = 1;
        bottom.update_poc();
        dpb.add(bottom, &marking, &mut out).unwrap();

        assert_eq!(dpb.len(), 1, "第二场不应占用新条目");
        let pic = dpb.iter().next().unwrap();
        assert!(pic.is_complete_frame());
        assert!(pic.is_short_term_frame());
        assert_eq!((pic.top_poc, pic.bottom_poc, pic.poc), (0, 1, 0));
    }

    #[test]
    fn test_idr_no_output_of_prior_pics_discards() {
        let pool = SurfacePool::new(8, 64, 64);
        let mut dpb = dpb_with(4, 4);
        let mut out = Vec::new();
        let marking = DecRefPicMarking::default();

        let mut idr = frame(&pool, 0, 0, true);
        idr.idr = true;
        dpb.add(idr, &marking, &mut out).unwrap();
        dpb.add(frame(&pool, 1, 2, true), &marking, &mut out).unwrap();

        let mut idr2 = frame(&pool, 0, 0, true);
        idr2.idr = true;
        let no_output = DecRefPicMarking {
            no_output_of_prior_pics: true,
            ..Default::default()
        };
        dpb.add(idr2, &no_output, &mut out).unwrap();
        assert!(out.is_empty(), "no_output_of_prior_pics 时不应输出旧图像");
        assert_eq!(dpb.len(), 1, "DPB 只应保留 IDR");
    }

    #[test]
    fn test_idr_flushes_prior_pictures() {
        let pool = SurfacePool::new(8, 64, 64);
        let mut dpb = dpb_with(4, 4);
        let mut out = Vec::new();
        let marking = DecRefPicMarking::default();

        let mut idr = frame(&pool, 0, 0, true);
        idr.idr = true;
        dpb.add(idr, &marking, &mut out).unwrap();
        dpb.add(frame(&pool, 1, 2, true), &marking, &mut out).unwrap();

        let mut idr2 = frame(&pool, 0, 0, true);
        idr2.idr = true;
        dpb.add(idr2, &marking, &mut out).unwrap();
        assert_eq!(pocs(&out), vec![0, 2]);
        assert_eq!(dpb.len(), 1);
    }

    #[test]
    fn test_idr_long_term_limit_survives_flush() {
        let pool = SurfacePool::new(4, 64, 64);
        let mut dpb = dpb_with(4, 4);
        let mut out = Vec::new();
        dpb.add(frame(&pool, 0, 0, true), &DecRefPicMarking::default(), &mut out)
            .unwrap();

        let mut idr = frame(&pool, 0, 0, true);
        idr.idr = true;
        let marking = DecRefPicMarking {
            long_term_reference_flag: true,
            ..Default::default()
        };
        dpb.add(idr, &marking, &mut out).unwrap();
        assert_eq!(dpb.max_long_term_frame_idx, Some(0), "IDR 刷新后应保留 MaxLongTermFrameIdx");

        let mark_long = DecRefPicMarking {
            adaptive: true,
            ops: vec![crate::parsers::h264::MmcoOp::MarkCurrentLong {
                long_term_frame_idx: 0,
            }],
            ..Default::default()
        };
        dpb.add(frame(&pool, 1, 2, true), &mark_long, &mut out).unwrap();
        let long: Vec<_> = dpb.iter().filter(|p| p.is_long_term_frame()).map(|p| p.poc).collect();
        assert_eq!(long, vec![2], "MMCO6 应接管长期索引 0");

        dpb.reset();
        assert_eq!(dpb.max_long_term_frame_idx, None);
    }
}
