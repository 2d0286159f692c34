//! H.265 解码图像缓冲区 (DPB).
//!
//! 图像按 POC 严格升序保存. 当前图像解码前执行 RPS 标记 (`rps.rs`) 与 C.5.2.2
//! 的清理/输出, 解码完成后按 C.5.2.3 存入并检查重排序与延迟约束.

use std::collections::BTreeMap;

use log::{debug, warn};

use hwdec_core::{HwdecError, HwdecResult};

use crate::accelerator::{PictureStructure, ReferenceEntry};
use crate::arena::{PicId, PictureArena};
use crate::output::{DecodedPicture, OutputSink};
use crate::parsers::h265::HevcSps;

use super::picture::{H265Picture, RefMark};
use super::rps::RefPicSet;

/// DPB 容量上限
pub const MAX_DPB_PICTURES: usize = 16;

/// 缺失参考告警次数上限
const MISSING_REFERENCE_LOG_LIMIT: u32 = 8;

/// H.265 DPB
#[derive(Debug)]
pub struct H265Dpb {
    pub(super) arena: PictureArena<H265Picture>,
    /// POC -> 图像
    pub(super) pictures: BTreeMap<i32, PicId>,
    max_dec_pic_buffering: usize,
    max_num_reorder: u32,
    /// SpsMaxLatencyPictures
    max_latency_pictures: Option<u32>,
    pub(super) max_poc_lsb: i32,
    /// 当前图像的参考图像集
    pub(super) rps: RefPicSet,
    missing_reference_warnings: u32,
}

impl Default for H265Dpb {
    fn default() -> Self {
        Self::new()
    }
}

impl H265Dpb {
    pub fn new() -> Self {
        Self {
            arena: PictureArena::new(),
            pictures: BTreeMap::new(),
            max_dec_pic_buffering: 1,
            max_num_reorder: 0,
            max_latency_pictures: None,
            max_poc_lsb: 16,
            rps: RefPicSet::default(),
            missing_reference_warnings: 0,
        }
    }

    /// 按 SPS 最高子层的参数设置容量与输出约束
    pub fn configure(&mut self, sps: &HevcSps) {
        self.max_dec_pic_buffering =
            (sps.max_dec_pic_buffering() as usize).clamp(1, MAX_DPB_PICTURES);
        self.max_num_reorder = sps.max_num_reorder();
        self.max_latency_pictures = sps.max_latency_pictures();
        self.max_poc_lsb = sps.max_poc_lsb();
        debug!(
            "H265: DPB 配置 max_dec_pic_buffering={}, max_num_reorder={}, max_latency={:?}",
            self.max_dec_pic_buffering, self.max_num_reorder, self.max_latency_pictures
        );
    }

    /// DPB 容量
    pub fn capacity(&self) -> usize {
        self.max_dec_pic_buffering
    }

    pub fn len(&self) -> usize {
        self.pictures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pictures.is_empty()
    }

    /// 按 POC 升序遍历
    pub fn iter(&self) -> impl Iterator<Item = &H265Picture> {
        self.pictures.values().filter_map(|&id| self.arena.get(id))
    }

    pub fn get(&self, id: PicId) -> Option<&H265Picture> {
        self.arena.get(id)
    }

    /// 当前图像的参考图像集
    pub fn rps(&self) -> &RefPicSet {
        &self.rps
    }

    pub fn num_references(&self) -> usize {
        self.iter().filter(|pic| pic.is_reference()).count()
    }

    /// 待输出图像数
    pub fn num_output_needed(&self) -> usize {
        self.iter().filter(|pic| pic.output_needed).count()
    }

    // ============================================================
    // C.5.2.2: 当前图像解码前
    // ============================================================

    /// 解码当前图像前清理 DPB (需先完成 RPS 标记)
    ///
    /// 带 NoRaslOutputFlag 的 IRAP: `no_output_of_prior_pics` 为真时直接清空,
    /// 否则输出全部待输出图像后清空. 其他图像: 移除无用条目后按重排序、延迟与容量
    /// 约束 bumping, 直到 DPB 能容纳当前图像.
    pub fn prepare_for_decode(
        &mut self,
        cur: &H265Picture,
        no_output_of_prior_pics: bool,
        sink: &mut dyn OutputSink,
    ) -> HwdecResult<()> {
        if cur.is_irap_no_rasl() {
            if no_output_of_prior_pics {
                debug!("H265: NoOutputOfPriorPicsFlag, 丢弃 {} 幅图像", self.pictures.len());
            } else {
                while self.bump(sink) {}
            }
            self.clear();
            return Ok(());
        }

        self.remove_unused();
        while self.output_constraint_exceeded()
            || self.pictures.len() >= self.max_dec_pic_buffering
        {
            if self.bump(sink) {
                continue;
            }
            if self.pictures.len() >= self.max_dec_pic_buffering {
                return Err(HwdecError::DpbFull(format!(
                    "H265: DPB 已满且无待输出图像, size={}",
                    self.pictures.len()
                )));
            }
            break;
        }
        Ok(())
    }

    // ============================================================
    // C.5.2.3: 当前图像解码后
    // ============================================================

    /// 存入已解码的当前图像, 标记为短期参考并执行 "附加 bumping"
    pub fn add(&mut self, mut pic: H265Picture, sink: &mut dyn OutputSink) -> HwdecResult<()> {
        for &id in self.pictures.values() {
            if let Some(other) = self.arena.get_mut(id)
                && other.output_needed
            {
                other.pic_latency_count += 1;
            }
        }

        pic.output_needed = pic.pic_output_flag;
        pic.pic_latency_count = 0;
        pic.reference = RefMark::ShortTerm;
        debug!(
            "H265: 存入 poc={}, output={}, dpb={}",
            pic.poc,
            pic.output_needed,
            self.pictures.len() + 1
        );

        let poc = pic.poc;
        let id = self.arena.insert(pic);
        if let Some(old) = self.pictures.insert(poc, id) {
            warn!("H265: DPB 中已存在 poc={}, 替换旧图像", poc);
            self.arena.remove(old);
        }

        while self.output_constraint_exceeded() {
            if !self.bump(sink) {
                break;
            }
        }

        if self.pictures.len() > self.max_dec_pic_buffering {
            return Err(HwdecError::DpbFull(format!(
                "H265: DPB 超出容量, size={}, capacity={}",
                self.pictures.len(),
                self.max_dec_pic_buffering
            )));
        }
        Ok(())
    }

    /// 重排序或延迟约束是否要求输出
    fn output_constraint_exceeded(&self) -> bool {
        if self.num_output_needed() > self.max_num_reorder as usize {
            return true;
        }
        self.max_latency_pictures.is_some_and(|max_latency| {
            self.iter()
                .any(|pic| pic.output_needed && pic.pic_latency_count >= max_latency)
        })
    }

    // ============================================================
    // 输出
    // ============================================================

    /// 输出 POC 最小的待输出图像, 不再被参考时移出 DPB
    ///
    /// 没有待输出图像时返回 `false`.
    pub fn bump(&mut self, sink: &mut dyn OutputSink) -> bool {
        let Some((poc, id)) = self
            .pictures
            .iter()
            .map(|(&poc, &id)| (poc, id))
            .find(|&(_, id)| self.arena.get(id).is_some_and(|pic| pic.output_needed))
        else {
            return false;
        };

        let Some(pic) = self.arena.get_mut(id) else {
            return false;
        };
        pic.output_needed = false;
        if let Some(surface) = pic.surface.clone() {
            debug!("H265: 输出 poc={}", poc);
            sink.output(DecodedPicture {
                surface,
                poc,
                timestamp: pic.timestamp,
            });
        }
        if !pic.is_reference() {
            self.pictures.remove(&poc);
            self.arena.remove(id);
        }
        true
    }

    /// 输出全部待输出图像并清空 DPB
    pub fn flush(&mut self, sink: &mut dyn OutputSink) {
        while self.bump(sink) {}
        self.clear();
    }

    /// 不输出, 直接清空
    pub fn clear(&mut self) {
        self.arena.clear();
        self.pictures.clear();
        self.rps = RefPicSet::default();
    }

    /// 移除既不参考也不待输出的条目
    pub fn remove_unused(&mut self) {
        let arena = &mut self.arena;
        self.pictures.retain(|_, &mut id| {
            let keep = arena
                .get(id)
                .is_some_and(|pic| pic.output_needed || pic.is_reference());
            if !keep {
                arena.remove(id);
            }
            keep
        });
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
                    long_term: pic.is_long_term(),
                    structure: PictureStructure::Frame,
                })
            })
            .collect()
    }

    pub(super) fn record_missing_reference(&mut self, scene: &str, poc: i32) {
        self.missing_reference_warnings = self.missing_reference_warnings.saturating_add(1);
        if self.missing_reference_warnings <= MISSING_REFERENCE_LOG_LIMIT {
            warn!("H265: 缺失参考图像, scene={}, poc={}, 已跳过", scene, poc);
        } else if self.missing_reference_warnings == MISSING_REFERENCE_LOG_LIMIT + 1 {
            warn!("H265: 缺失参考图像日志过多, 后续同类日志省略");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::h265::{HevcNalUnitType, parse_hevc_sps};
    use crate::surface::SurfacePool;
    use crate::test_streams::h265::SpsBuilder;

    fn dpb_with(max_dec_minus1: u32, reorder: u32, latency_plus1: u32) -> H265Dpb {
        let sps = parse_hevc_sps(
            &SpsBuilder::new(64, 64)
                .dpb(max_dec_minus1, reorder)
                .latency_increase_plus1(latency_plus1)
                .rbsp(),
        )
        .unwrap();
        let mut dpb = H265Dpb::new();
        dpb.configure(&sps);
        dpb
    }

    fn picture(pool: &SurfacePool, poc: i32) -> H265Picture {
        let mut pic = H265Picture::new(poc, poc as u32, HevcNalUnitType::TrailR);
        pic.surface = pool.acquire();
        pic
    }

    fn pocs(out: &[DecodedPicture]) -> Vec<i32> {
        out.iter().map(|p| p.poc).collect()
    }

    /// 模拟一幅图像的完整 DPB 流程: 所有已有图像保持参考
    fn decode(dpb: &mut H265Dpb, pic: H265Picture, out: &mut Vec<DecodedPicture>) {
        dpb.prepare_for_decode(&pic, false, out).unwrap();
        dpb.add(pic, out).unwrap();
    }

    #[test]
    fn test_reorder_bound_outputs_on_third_insert() {
        let pool = SurfacePool::new(8, 64, 64);
        let mut dpb = dpb_with(4, 2, 0);
        let mut out = Vec::new();

        decode(&mut dpb, picture(&pool, 0), &mut out);
        assert!(out.is_empty());
        decode(&mut dpb, picture(&pool, 4), &mut out);
        assert!(out.is_empty());
        decode(&mut dpb, picture(&pool, 2), &mut out);
        assert_eq!(pocs(&out), vec![0], "第三次插入时待输出数 3 > 2, 应输出 POC 0");
        decode(&mut dpb, picture(&pool, 1), &mut out);
        assert_eq!(pocs(&out), vec![0, 1]);

        dpb.flush(&mut out);
        assert_eq!(pocs(&out), vec![0, 1, 2, 4]);
        assert!(dpb.is_empty());
    }

    #[test]
    fn test_latency_bound_triggers_output() {
        let pool = SurfacePool::new(8, 64, 64);
        // SpsMaxLatencyPictures = 2 + 1 - 1 = 2
        let mut dpb = dpb_with(5, 2, 1);
        let mut out = Vec::new();

        decode(&mut dpb, picture(&pool, 8), &mut out);
        let mut hidden = picture(&pool, 9);
        hidden.pic_output_flag = false;
        decode(&mut dpb, hidden, &mut out);
        assert!(out.is_empty(), "POC 8 的延迟计数为 1, 尚未达到 2");

        let mut hidden = picture(&pool, 10);
        hidden.pic_output_flag = false;
        decode(&mut dpb, hidden, &mut out);
        assert_eq!(dpb.num_output_needed(), 0);
        assert_eq!(pocs(&out), vec![8], "待输出数未超限, 延迟计数达到上限时也应输出");
    }

    #[test]
    fn test_capacity_bound_outputs_before_decode() {
        let pool = SurfacePool::new(8, 64, 64);
        let mut dpb = dpb_with(1, 1, 0);
        let mut out = Vec::new();

        decode(&mut dpb, picture(&pool, 0), &mut out);
        let mut hidden = picture(&pool, 4);
        hidden.pic_output_flag = false;
        decode(&mut dpb, hidden, &mut out);
        assert!(out.is_empty());
        assert_eq!(dpb.len(), 2);

        // POC 0 不再被参考但仍待输出, 容量为 2 时先输出再移除
        let first = dpb.pictures[&0];
        dpb.arena.get_mut(first).unwrap().reference = RefMark::Unused;
        decode(&mut dpb, picture(&pool, 8), &mut out);
        assert_eq!(pocs(&out), vec![0]);
        assert_eq!(dpb.len(), 2);
        assert!(dpb.len() <= dpb.capacity());
    }

    #[test]
    fn test_all_reference_pictures_reports_dpb_full() {
        let pool = SurfacePool::new(8, 64, 64);
        let mut dpb = dpb_with(0, 0, 0);
        let mut out = Vec::new();

        decode(&mut dpb, picture(&pool, 0), &mut out);
        assert_eq!(pocs(&out), vec![0], "reorder 为 0 时立即输出");
        let err = dpb.prepare_for_decode(&picture(&pool, 1), false, &mut out);
        assert!(matches!(err, Err(HwdecError::DpbFull(_))));
    }

    #[test]
    fn test_pic_output_flag_false_not_output() {
        let pool = SurfacePool::new(8, 64, 64);
        let mut dpb = dpb_with(4, 2, 0);
        let mut out = Vec::new();

        decode(&mut dpb, picture(&pool, 0), &mut out);
        let mut hidden = picture(&pool, 2);
        hidden.pic_output_flag = false;
        decode(&mut dpb, hidden, &mut out);
        assert_eq!(dpb.num_output_needed(), 1);

        dpb.flush(&mut out);
        assert_eq!(pocs(&out), vec![0]);
    }

    #[test]
    fn test_irap_no_rasl_outputs_or_discards_old() {
        let pool = SurfacePool::new(8, 64, 64);
        let mut out = Vec::new();

        let mut dpb = dpb_with(4, 2, 0);
        decode(&mut dpb, picture(&pool, 0), &mut out);
        decode(&mut dpb, picture(&pool, 4), &mut out);
        let mut idr = picture(&pool, 0);
        idr.nal_type = HevcNalUnitType::IdrWRadl;
        idr.no_rasl_output = true;
        dpb.prepare_for_decode(&idr, false, &mut out).unwrap();
        assert_eq!(pocs(&out), vec![0, 4]);
        assert!(dpb.is_empty());
        dpb.add(idr, &mut out).unwrap();
        assert_eq!(dpb.len(), 1);

        out.clear();
        let mut dpb = dpb_with(4, 2, 0);
        decode(&mut dpb, picture(&pool, 0), &mut out);
        decode(&mut dpb, picture(&pool, 4), &mut out);
        let mut idr = picture(&pool, 0);
        idr.nal_type = HevcNalUnitType::IdrNLp;
        idr.no_rasl_output = true;
        dpb.prepare_for_decode(&idr, true, &mut out).unwrap();
        assert!(out.is_empty(), "NoOutputOfPriorPicsFlag 时不应输出");
        assert!(dpb.is_empty());
    }

    #[test]
    fn test_surface_released_with_entry() {
        let pool = SurfacePool::new(4, 64, 64);
        let mut dpb = dpb_with(3, 0, 0);
        let mut out = Vec::new();

        decode(&mut dpb, picture(&pool, 0), &mut out);
        decode(&mut dpb, picture(&pool, 1), &mut out);
        assert_eq!(pool.available(), 2);
        out.clear();
        assert_eq!(pool.available(), 2, "参考图像仍持有表面");

        dpb.clear();
        assert_eq!(pool.available(), 4, "清空后表面应全部归还");
    }
}
