//! H.264/AVC 码流解析器.
//!
//! 提供硬件解码前端所需的 H.264 语法解析:
//! - NAL 单元头与 avcC 配置
//! - SPS / PPS 解析
//! - slice header 解析 (含参考列表修改与参考帧标记)

pub mod nal;
pub mod pps;
pub mod slice;
pub mod sps;

use std::collections::HashMap;
use std::sync::Arc;

use hwdec_core::HwdecResult;

pub use nal::{AvccConfig, NalUnit, NalUnitType, parse_avcc_config};
pub use pps::{Pps, parse_pps};
pub use slice::{DecRefPicMarking, MmcoOp, RefPicListMod, SliceHeader, SliceType, parse_slice_header};
pub use sps::{BitstreamRestriction, Sps, parse_sps};

/// 已解析参数集缓存, 按 id 索引
#[derive(Debug, Default)]
pub struct ParameterSets {
    sps_map: HashMap<u32, Arc<Sps>>,
    pps_map: HashMap<u32, Arc<Pps>>,
}

impl ParameterSets {
    /// 解析并缓存 SPS
    pub fn put_sps(&mut self, rbsp: &[u8]) -> HwdecResult<Arc<Sps>> {
        let sps = Arc::new(parse_sps(rbsp)?);
        self.sps_map.insert(sps.sps_id, Arc::clone(&sps));
        Ok(sps)
    }

    /// 解析并缓存 PPS
    pub fn put_pps(&mut self, rbsp: &[u8]) -> HwdecResult<Arc<Pps>> {
        let pps = parse_pps(rbsp, |sps_id| {
            self.sps_map.get(&sps_id).map(|sps| sps.chroma_format_idc)
        })?;
        let pps = Arc::new(pps);
        self.pps_map.insert(pps.pps_id, Arc::clone(&pps));
        Ok(pps)
    }

    /// 按 pps_id 查找 PPS 及其引用的 SPS
    pub fn lookup(&self, pps_id: u32) -> Option<(&Pps, &Sps)> {
        let pps = self.pps_map.get(&pps_id)?;
        let sps = self.sps_map.get(&pps.sps_id)?;
        Some((pps.as_ref(), sps.as_ref()))
    }

    /// 按 pps_id 获取共享的 PPS/SPS
    pub fn active(&self, pps_id: u32) -> Option<(Arc<Pps>, Arc<Sps>)> {
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
