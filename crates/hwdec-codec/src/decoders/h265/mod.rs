//! H.265/HEVC 硬件解码前端.
//!
//! 与 H.264 前端共用同一控制流程, 参考管理改为显式 RPS:
//! 1. VPS 忽略, SPS/PPS 解析后按 id 缓存
//! 2. `first_slice_segment_in_pic_flag` 开始新图像: 完成上一幅图像, 必要时激活新格式
//! 3. 计算 POC, 按 RPS 标记参考, 执行 C.5.2.2 输出/清理后分配表面
//! 4. 每个 slice 段构建参考列表, 依赖 slice 段继承最近独立 slice 段的片头
//! 5. 图像完成时提交加速器并按 C.5.2.3 存入 DPB
//!
//! 与带 NoRaslOutputFlag 的 IRAP 关联的 RASL 图像无法正确解码, 直接丢弃.

mod dpb;
mod picture;
mod poc;
mod ref_list;
mod rps;

pub use dpb::{H265Dpb, MAX_DPB_PICTURES};
pub use picture::{H265Picture, RefMark};
pub use poc::HevcPocState;
pub use ref_list::RefPicLists;
pub use rps::RefPicSet;

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};

use hwdec_core::{HwdecError, HwdecResult};

use crate::accelerator::{Accelerator, PictureJob, PictureStructure, SliceJob};
use crate::buffer::VideoBuffer;
use crate::codec_id::CodecKind;
use crate::config::DecoderConfig;
use crate::decoder::VideoDecoder;
use crate::format::FormatInfo;
use crate::output::{DecodedPicture, OutputQueue};
use crate::parsers::h265::{
    HevcNalUnit, HevcNalUnitType, HevcParameterSets, HevcSliceHeader, HevcSps,
    parse_hevc_slice_header, parse_hvcc_config,
};
use crate::status::DecodeStatus;
use crate::surface::SurfacePool;

use super::{ResumePoint, split_nal_units};

/// 单个 NAL 的处理结果
enum Step {
    Continue,
    FormatChange,
}

/// 正在解码的图像
struct CurrentPicture {
    pic: H265Picture,
    /// 最近一个独立 slice 段的片头
    header: HevcSliceHeader,
    slices: Vec<SliceJob>,
}

/// H.265 解码器
pub struct H265Decoder {
    accel: Box<dyn Accelerator>,
    config: DecoderConfig,
    nal_length_size: Option<usize>,
    params: HevcParameterSets,
    active_sps: Option<Arc<HevcSps>>,
    format: Option<FormatInfo>,
    pool: Option<SurfacePool>,
    poc: HevcPocState,
    dpb: H265Dpb,
    output: OutputQueue,
    current: Option<CurrentPicture>,
    /// 码流开头或 EOS 之后, 下一个 CRA 的 NoRaslOutputFlag 为 1
    new_sequence: bool,
    /// 最近的 IRAP 是否带 NoRaslOutputFlag
    associated_irap_no_rasl: bool,
    /// 正在丢弃 RASL 图像的后续 slice 段
    skipping_rasl: bool,
    resume: ResumePoint,
    started: bool,
}

impl H265Decoder {
    /// 创建解码器实例 (工厂函数)
    pub fn create(accel: Box<dyn Accelerator>) -> Box<dyn VideoDecoder> {
        Box::new(Self::new(accel))
    }

    /// 创建解码器
    pub fn new(accel: Box<dyn Accelerator>) -> Self {
        Self {
            accel,
            config: DecoderConfig::default(),
            nal_length_size: None,
            params: HevcParameterSets::default(),
            active_sps: None,
            format: None,
            pool: None,
            poc: HevcPocState::new(),
            dpb: H265Dpb::new(),
            output: OutputQueue::new(),
            current: None,
            new_sequence: true,
            associated_irap_no_rasl: false,
            skipping_rasl: false,
            resume: ResumePoint::default(),
            started: false,
        }
    }

    /// 当前 DPB (只读)
    pub fn dpb(&self) -> &H265Dpb {
        &self.dpb
    }

    /// 待取出的输出图像数
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    fn reset_state(&mut self) {
        self.params.clear();
        self.active_sps = None;
        self.format = None;
        self.pool = None;
        self.poc.reset();
        self.dpb.clear();
        self.output.clear();
        self.current = None;
        self.new_sequence = true;
        self.associated_irap_no_rasl = false;
        self.skipping_rasl = false;
        self.resume.clear();
    }

    /// 从 hvcC 预加载参数集
    fn load_codec_data(&mut self, data: &[u8]) -> HwdecResult<()> {
        let hvcc = parse_hvcc_config(data)?;
        for nal in hvcc.sps_list.iter().chain(&hvcc.pps_list) {
            let nalu = HevcNalUnit::parse(nal)?;
            match nalu.nal_type {
                HevcNalUnitType::Sps => {
                    self.params.put_sps(&nalu.rbsp())?;
                }
                HevcNalUnitType::Pps => {
                    self.params.put_pps(&nalu.rbsp())?;
                }
                other => debug!("H265: 忽略 hvcC 中的 NAL, type={:?}", other),
            }
        }
        debug!(
            "H265: hvcC 加载完成, vps={}, sps={}, pps={}, length_size={}",
            hvcc.vps_list.len(),
            hvcc.sps_list.len(),
            hvcc.pps_list.len(),
            hvcc.length_size
        );
        self.nal_length_size = Some(hvcc.length_size);
        Ok(())
    }

    // ============================================================
    // NAL 分发
    // ============================================================

    fn handle_nal(&mut self, data: &Bytes, nal: &[u8], timestamp: i64) -> HwdecResult<Step> {
        let nalu = HevcNalUnit::parse(nal)?;
        if nalu.layer_id > 0 {
            debug!("H265: 跳过增强层 NAL, layer_id={}", nalu.layer_id);
            return Ok(Step::Continue);
        }

        match nalu.nal_type {
            HevcNalUnitType::Sps => {
                let sps = self.params.put_sps(&nalu.rbsp())?;
                debug!(
                    "H265: SPS id={} {}x{} profile={} level={} dpb={} reorder={}",
                    sps.sps_id,
                    sps.width,
                    sps.height,
                    sps.general_profile_idc,
                    sps.general_level_idc,
                    sps.max_dec_pic_buffering(),
                    sps.max_num_reorder()
                );
                Ok(Step::Continue)
            }
            HevcNalUnitType::Pps => {
                let pps = self.params.put_pps(&nalu.rbsp())?;
                debug!("H265: PPS id={} sps={}", pps.pps_id, pps.sps_id);
                Ok(Step::Continue)
            }
            HevcNalUnitType::Aud => {
                self.finish_current()?;
                Ok(Step::Continue)
            }
            HevcNalUnitType::Eos | HevcNalUnitType::Eob => {
                debug!("H265: 序列结束, 输出 DPB");
                self.drain()?;
                Ok(Step::Continue)
            }
            HevcNalUnitType::Other(id) => {
                debug!("H265: 忽略保留 NAL 类型 {}", id);
                Ok(Step::Continue)
            }
            nal_type if nal_type.is_vcl() => {
                self.handle_slice(&nalu, data.slice_ref(nal), timestamp)
            }
            _ => Ok(Step::Continue),
        }
    }

    fn handle_slice(
        &mut self,
        nalu: &HevcNalUnit,
        nal: Bytes,
        timestamp: i64,
    ) -> HwdecResult<Step> {
        // first_slice_segment_in_pic_flag 是片头第一个比特
        let first_slice = nalu.payload.first().is_some_and(|&byte| byte & 0x80 != 0);
        if !first_slice && self.skipping_rasl {
            return Ok(Step::Continue);
        }

        let rbsp = nalu.rbsp();
        let params = &self.params;
        let prev = self.current.as_ref().map(|cur| &cur.header).filter(|_| !first_slice);
        let header = parse_hevc_slice_header(nalu, &rbsp, prev, |pps_id| params.lookup(pps_id))?;

        if header.first_slice_segment_in_pic {
            self.finish_current()?;
            let (_, sps) = self.params.active(header.pps_id).ok_or_else(|| {
                HwdecError::InvalidData(format!("H265: 未找到 PPS id={}", header.pps_id))
            })?;
            if self.activate_sps(&sps)? {
                return Ok(Step::FormatChange);
            }
            self.skipping_rasl = !self.start_picture(&header, &sps, timestamp)?;
            if self.skipping_rasl {
                return Ok(Step::Continue);
            }
        }

        let Some(cur) = self.current.as_mut() else {
            return Err(HwdecError::InvalidData(format!(
                "H265: slice 段缺少所属图像, address={}",
                header.slice_segment_address
            )));
        };
        if !header.dependent_slice_segment {
            cur.header = header.clone();
        }
        let lists = self.dpb.build_ref_lists(&header);
        cur.slices.push(SliceJob {
            nal,
            header_bits: header.header_bits,
            ref_list0: self.dpb.ref_entries(&lists.list0),
            ref_list1: self.dpb.ref_entries(&lists.list1),
        });
        Ok(Step::Continue)
    }

    /// 激活 slice 引用的 SPS, 格式变化时返回 `true`
    fn activate_sps(&mut self, sps: &Arc<HevcSps>) -> HwdecResult<bool> {
        if self
            .active_sps
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, sps))
        {
            return Ok(false);
        }

        let format = format_from_sps(sps, self.config.extra_surfaces);
        if self.format.as_ref() == Some(&format) {
            debug!("H265: 重新激活 SPS id={}, 格式不变", sps.sps_id);
            self.dpb.configure(sps);
            self.active_sps = Some(Arc::clone(sps));
            return Ok(false);
        }

        self.drain()?;
        self.accel.configure(&format)?;
        self.pool = Some(SurfacePool::new(
            format.surface_count,
            format.surface_width,
            format.surface_height,
        ));
        self.dpb.configure(sps);
        info!(
            "H265: 格式变化 {}x{}, profile={}, level={}, dpb={}, surfaces={}",
            format.width,
            format.height,
            format.profile,
            format.level,
            format.dpb_size,
            format.surface_count
        );
        self.format = Some(format);
        self.active_sps = Some(Arc::clone(sps));
        Ok(true)
    }

    // ============================================================
    // 图像生命周期
    // ============================================================

    /// 开始新图像, 图像被丢弃 (RASL) 时返回 `false`
    ///
    /// 表面分配之前的步骤可重复执行, 返回 `NoSurface` 后重新提交不会改变状态.
    fn start_picture(
        &mut self,
        header: &HevcSliceHeader,
        sps: &HevcSps,
        timestamp: i64,
    ) -> HwdecResult<bool> {
        let nal_type = header.nal_type;
        if nal_type.is_rasl() && self.associated_irap_no_rasl {
            debug!("H265: 丢弃 RASL 图像, poc_lsb={}", header.pic_order_cnt_lsb);
            return Ok(false);
        }

        let no_rasl_output =
            nal_type.is_idr() || nal_type.is_bla() || (nal_type.is_cra() && self.new_sequence);
        let poc = self.poc.compute(sps, header, no_rasl_output);

        let mut pic = H265Picture::new(poc, header.pic_order_cnt_lsb, nal_type);
        pic.no_rasl_output = nal_type.is_irap() && no_rasl_output;
        pic.pic_output_flag = header.pic_output_flag;
        pic.timestamp = timestamp;

        self.dpb.apply_rps(&pic, header);
        // CRA 的 NoOutputOfPriorPicsFlag 恒为 1
        let no_output_of_prior_pics = nal_type.is_cra() || header.no_output_of_prior_pics;
        self.dpb
            .prepare_for_decode(&pic, no_output_of_prior_pics, &mut self.output)?;

        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| HwdecError::Internal("H265: 表面池未创建".into()))?;
        pic.surface = Some(pool.try_acquire()?);

        self.poc.update(header, poc);
        if nal_type.is_irap() {
            self.associated_irap_no_rasl = no_rasl_output;
            self.new_sequence = false;
        }
        debug!(
            "H265: 新图像 poc={}, type={:?}, slice={:?}, refs={}",
            poc,
            nal_type,
            header.slice_type,
            self.dpb.num_references()
        );

        self.current = Some(CurrentPicture {
            pic,
            header: header.clone(),
            slices: Vec::new(),
        });
        Ok(true)
    }

    /// 提交当前图像并存入 DPB
    fn finish_current(&mut self) -> HwdecResult<()> {
        let Some(CurrentPicture { pic, slices, .. }) = self.current.take() else {
            return Ok(());
        };

        let surface = pic
            .surface
            .as_ref()
            .map(|surface| surface.id())
            .ok_or_else(|| HwdecError::Internal("H265: 当前图像没有表面".into()))?;
        let job = PictureJob {
            codec: CodecKind::H265,
            surface,
            poc: pic.poc,
            structure: PictureStructure::Frame,
            references: self.dpb.references(),
            slices,
        };
        self.accel.submit(&job)?;
        self.dpb.add(pic, &mut self.output)
    }

    /// 完成当前图像, 输出 DPB 全部图像, 下一个 IRAP 视为新序列开始
    fn drain(&mut self) -> HwdecResult<()> {
        let result = self.finish_current();
        self.dpb.flush(&mut self.output);
        self.poc.reset();
        self.new_sequence = true;
        self.skipping_rasl = false;
        result
    }
}

// ============================================================
// VideoDecoder trait 实现
// ============================================================

impl VideoDecoder for H265Decoder {
    fn codec(&self) -> CodecKind {
        CodecKind::H265
    }

    fn name(&self) -> &str {
        "hevc_hwdec"
    }

    fn start(&mut self, config: &DecoderConfig) -> HwdecResult<()> {
        config.validate()?;
        self.reset_state();
        self.config = config.clone();
        self.nal_length_size = None;
        if let Some(data) = &config.codec_data {
            self.load_codec_data(data)?;
        }
        self.started = true;
        debug!("H265: 解码器启动, format={:?}", config.stream_format);
        Ok(())
    }

    fn decode(&mut self, buffer: &VideoBuffer) -> DecodeStatus {
        if !self.started {
            warn!("H265: 解码器未启动");
            return DecodeStatus::Fail;
        }

        let nals = split_nal_units(&buffer.data, self.config.stream_format, self.nal_length_size);
        let nals = match nals {
            Ok(nals) => nals,
            Err(err) => {
                warn!("H265: NAL 分割失败, err={}", err);
                return DecodeStatus::from(&err);
            }
        };

        let start = self.resume.start_index(&buffer.data);
        let mut status = DecodeStatus::Success;
        for (index, nal) in nals.iter().enumerate().skip(start) {
            match self.handle_nal(&buffer.data, nal, buffer.timestamp) {
                Ok(Step::Continue) => {}
                Ok(Step::FormatChange) => {
                    self.resume.suspend(&buffer.data, index);
                    return DecodeStatus::FormatChange;
                }
                Err(HwdecError::NoSurface) => {
                    debug!("H265: 表面池耗尽, 等待调用方释放输出");
                    self.resume.suspend(&buffer.data, index);
                    return DecodeStatus::NoSurface;
                }
                Err(err) => {
                    warn!("H265: NAL 处理失败, index={}, err={}", index, err);
                    status = DecodeStatus::from(&err);
                }
            }
        }
        status
    }

    fn get_output(&mut self) -> Option<DecodedPicture> {
        self.output.pop()
    }

    fn flush(&mut self) {
        self.resume.clear();
        if let Err(err) = self.drain() {
            warn!("H265: flush 时提交当前图像失败, err={}", err);
        }
    }

    fn format_info(&self) -> Option<&FormatInfo> {
        self.format.as_ref()
    }

    fn stop(&mut self) {
        self.flush();
        self.active_sps = None;
        self.format = None;
        self.pool = None;
        self.params.clear();
        self.started = false;
        debug!("H265: 解码器停止");
    }
}

/// 由 SPS 推导输出格式
fn format_from_sps(sps: &HevcSps, extra_surfaces: u32) -> FormatInfo {
    let dpb_size = sps.max_dec_pic_buffering();
    FormatInfo {
        codec: CodecKind::H265,
        width: sps.width,
        height: sps.height,
        surface_width: sps.pic_width,
        surface_height: sps.pic_height,
        surface_count: dpb_size + extra_surfaces,
        dpb_size,
        profile: sps.general_profile_idc,
        level: sps.general_level_idc,
        bit_depth: sps.bit_depth_luma,
        chroma_format_idc: sps.chroma_format_idc,
    }
}
