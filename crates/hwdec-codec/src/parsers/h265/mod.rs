//! H.265/HEVC 码流解析器.
//!
//! 提供硬件解码前端所需的 HEVC 语法解析:
//! - NAL 单元头与 hvcC 配置
//! - SPS / PPS 解析 (VPS 不参与 DPB 管理, 直接忽略)
//! - short-term RPS 与 slice segment header 解析

pub mod nal;
pub mod pps;
pub mod rps;
pub mod slice;
pub mod sps;

use std::collections::HashMap;
use std::sync::Arc;

use hwdec_core::HwdecResult;

pub use nal::{HevcNalUnit, HevcNalUnitType, HvccConfig, parse_hvcc_config};
pub use pps::{HevcPps, parse_hevc_pps};
pub use rps::{ShortTermRps, parse_st_ref_pic_set};
pub use slice::{HevcSliceHeader, HevcSliceType, LongTermRef, parse_hevc_slice_header};
pub use sps::{HevcSps, parse_hevc_sps};

/// 已解析参数集缓存, 按 id 索引
#[derive(Debug, Default)]
pub struct HevcParameterSets {
    sps_map: HashMap<u32, Arc<HevcSps>>,
    pps_map: HashMap<u32, Arc<HevcPps>>,
}

impl HevcParameterSets {
    /// 解析并缓存 SPS
    pub fn put_sps(&mut self, rbsp: &[u8]) -> HwdecResult<Arc<HevcSps>> {
        let sps = Arc::new(parse_hevc_sps(rbsp)?);
        self.sps_map.insert(sps.sps_id, Arc::clone(&sps));
        Ok(sps)
    }

    /// 解析并缓存 PPS
    pub fn put_pps(&mut self, rbsp: &[u8]) -> HwdecResult<Arc<HevcPps>> {
        let pps = Arc::new(parse_hevc_pps(rbsp)?);
        self.pps_map.insert(pps.pps_id, Arc::clone(&pps));
        Ok(pps)
    }

    /// 按 pps_id 查找 PPS 及其引用的 SPS
    pub fn lookup(&self, pps_id: u32) -> Option<(&HevcPps, &HevcSps)> {
        let pps = self.pps_map.get(&pps_id)?;
        let sps = self.sps_map.get(&pps.sps_id)?;
        Some((pps.as_ref(), sps.as_ref()))
    }

    /// 按 pps_id 获取共享的 PPS/SPS
    pub fn active(&self, pps_id: u32) -> Option<(Arc<HevcPps>, Arc<HevcSps>)> {
        let pps = self.pps_map.get(&pps_id)?;
        let sps = self.sps_map.get(&pps.sps_id)?;
        Some((Arc::clone(pps), Arc::clone(sps)))
    }

    /// 清空缓存
    pub fn clear(&mut self) {
        self.sps_map.clear();
        self.pps_map.clear();
    }
}
