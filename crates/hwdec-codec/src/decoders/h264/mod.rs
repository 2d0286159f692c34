//! H.264/AVC 硬件解码前端.
//!
//! 负责 NAL 分发、参数集激活、POC 推导、参考帧管理与输出重排,
//! 每幅图像的像素重建通过 [`Accelerator`] 交给硬件完成.
//!
//! 控制流程:
//! 1. SPS/PPS 解析后按 id 缓存
//! 2. slice 引用的 SPS 与当前格式不同时, 输出旧序列并返回 `FormatChange`
//! 3. 新图像的第一个 slice: 完成上一幅图像, 填补 frame_num 间隙, 分配表面并计算 POC
//! 4. 每个 slice 构建参考列表后记录到当前图像
//! 5. 图像完成时提交加速器, 执行参考标记并存入 DPB

mod dpb;
mod marking;
mod picture;
mod poc;
mod ref_list;
#[cfg(test)]
mod tests;

pub use dpb::{H264Dpb, MAX_DPB_FRAMES, max_dec_frame_buffering};
pub use picture::{FieldMask, H264Picture};
pub use poc::{FieldOrderCnt, PocState};
pub use ref_list::{RefPic, RefPicLists};

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};

use hwdec_core::{HwdecError, HwdecResult};

use crate::accelerator::{Accelerator, PictureJob, SliceJob};
use crate::buffer::VideoBuffer;
use crate::codec_id::CodecKind;
use crate::config::DecoderConfig;
use crate::decoder::VideoDecoder;
use crate::format::FormatInfo;
use crate::output::{DecodedPicture, OutputQueue};
use crate::parsers::h264::{
    NalUnit, NalUnitType, ParameterSets, SliceHeader, Sps, parse_avcc_config, parse_slice_header,
};
use crate::status::DecodeStatus;
use crate::surface::SurfacePool;

use super::{ResumePoint, split_nal_units};

/// 单个 NAL 的处理结果
enum Step {
    /// 继续处理下一个 NAL
    Continue,
    /// 激活了新格式, 中断当前缓冲区
    FormatChange,
}

/// 正在解码的图像
struct CurrentPicture {
    pic: H264Picture,
    structure: FieldMask,
    /// 第一个 slice 的 header, 用于新图像检测与参考标记
    header: SliceHeader,
    slices: Vec<SliceJob>,
}

/// H.264 解码器
pub struct H264Decoder {
    accel: Box<dyn Accelerator>,
    config: DecoderConfig,
    /// codec data 给出的 NAL 长度前缀大小
    nal_length_size: Option<usize>,
    params: ParameterSets,
    active_sps: Option<Arc<Sps>>,
    format: Option<FormatInfo>,
    pool: Option<SurfacePool>,
    poc: PocState,
    dpb: H264Dpb,
    output: OutputQueue,
    current: Option<CurrentPicture>,
    /// PrevRefFrameNum, IDR 之后为 `None`
    prev_ref_frame_num: Option<u32>,
    resume: ResumePoint,
    started: bool,
}

impl H264Decoder {
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
            params: ParameterSets::default(),
            active_sps: None,
            format: None,
            pool: None,
            poc: PocState::new(),
            dpb: H264Dpb::new(),
            output: OutputQueue::new(),
            current: None,
            prev_ref_frame_num: None,
            resume: ResumePoint::default(),
            started: false,
        }
    }

    /// 当前 DPB (只读)
    pub fn dpb(&self) -> &H264Dpb {
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
        self.dpb.reset();
        self.output.clear();
        self.current = None;
        self.prev_ref_frame_num = None;
        self.resume.clear();
    }

    /// 从 avcC 预加载参数集
    fn load_codec_data(&mut self, data: &[u8]) -> HwdecResult<()> {
        let avcc = parse_avcc_config(data)?;
        for nal in avcc.sps_list.iter().chain(&avcc.pps_list) {
            let nalu = NalUnit::parse(nal)?;
            match nalu.nal_type {
                NalUnitType::Sps => {
                    self.params.put_sps(&nalu.rbsp())?;
                }
                NalUnitType::Pps => {
                    self.params.put_pps(&nalu.rbsp())?;
                }
                other => debug!("H264: 忽略 avcC 中的 NAL, type={}", other),
            }
        }
        debug!(
            "H264: avcC 加载完成, sps={}, pps={}, length_size={}",
            avcc.sps_list.len(),
            avcc.pps_list.len(),
            avcc.length_size
        );
        self.nal_length_size = Some(avcc.length_size);
        Ok(())
    }

    // ============================================================
    // NAL 分发
    // ============================================================

    fn handle_nal(&mut self, data: &Bytes, nal: &[u8], timestamp: i64) -> HwdecResult<Step> {
        let nalu = NalUnit::parse(nal)?;
        match nalu.nal_type {
            NalUnitType::Sps => {
                let sps = self.params.put_sps(&nalu.rbsp())?;
                debug!(
                    "H264: SPS id={} {}x{} profile={} level={} refs={}",
                    sps.sps_id,
                    sps.width,
                    sps.height,
                    sps.profile_idc,
                    sps.level_idc,
                    sps.max_num_ref_frames
                );
                Ok(Step::Continue)
            }
            NalUnitType::Pps => {
                let pps = self.params.put_pps(&nalu.rbsp())?;
                debug!("H264: PPS id={} sps={}", pps.pps_id, pps.sps_id);
                Ok(Step::Continue)
            }
            NalUnitType::Slice
            | NalUnitType::SliceIdr
            | NalUnitType::SliceDpa
            | NalUnitType::SliceDpb
            | NalUnitType::SliceDpc => self.handle_slice(&nalu, data.slice_ref(nal), timestamp),
            NalUnitType::Aud => {
                self.finish_current()?;
                Ok(Step::Continue)
            }
            NalUnitType::EndOfSequence | NalUnitType::EndOfStream => {
                debug!("H264: 序列结束, 输出 DPB");
                self.drain()?;
                Ok(Step::Continue)
            }
            _ => Ok(Step::Continue),
        }
    }

    fn handle_slice(&mut self, nalu: &NalUnit, nal: Bytes, timestamp: i64) -> HwdecResult<Step> {
        let rbsp = nalu.rbsp();
        let params = &self.params;
        let header = parse_slice_header(nalu, &rbsp, |pps_id| params.lookup(pps_id))?;
        let (_, sps) = self.params.active(header.pps_id).ok_or_else(|| {
            HwdecError::InvalidData(format!("H264: 未找到 PPS id={}", header.pps_id))
        })?;

        if header.redundant_pic_cnt > 0 {
            debug!("H264: 跳过冗余 slice, redundant_pic_cnt={}", header.redundant_pic_cnt);
            return Ok(Step::Continue);
        }

        if self.activate_sps(&sps)? {
            return Ok(Step::FormatChange);
        }

        let structure = FieldMask::from_slice(header.field_pic, header.bottom_field);
        let new_picture = self
            .current
            .as_ref()
            .is_none_or(|cur| is_new_picture(&cur.header, &header, &sps));
        if new_picture {
            self.finish_current()?;
            self.start_picture(&header, &sps, structure, timestamp)?;
        }

        let Some(cur) = self.current.as_mut() else {
            return Err(HwdecError::Internal("H264: 当前图像缺失".into()));
        };
        let lists = self.dpb.build_ref_lists(&cur.pic, cur.structure, &header);
        cur.slices.push(SliceJob {
            nal,
            header_bits: header.header_bits,
            ref_list0: self.dpb.ref_entries(&lists.list0),
            ref_list1: self.dpb.ref_entries(&lists.list1),
        });
        Ok(Step::Continue)
    }

    /// 激活 slice 引用的 SPS, 格式变化时返回 `true`
    fn activate_sps(&mut self, sps: &Arc<Sps>) -> HwdecResult<bool> {
        if self
            .active_sps
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, sps))
        {
            return Ok(false);
        }

        let format = format_from_sps(sps, self.config.extra_surfaces);
        if self.format.as_ref() == Some(&format) {
            debug!("H264: 重新激活 SPS id={}, 格式不变", sps.sps_id);
            self.dpb.configure(sps);
            self.active_sps = Some(Arc::clone(sps));
            return Ok(false);
        }

        // 旧序列的图像全部输出后再切换
        self.drain()?;
        self.accel.configure(&format)?;
        self.pool = Some(SurfacePool::new(
            format.surface_count,
            format.surface_width,
            format.surface_height,
        ));
        self.dpb.configure(sps);
        info!(
            "H264: 格式变化 {}x{}, profile={}, level={}, dpb={}, surfaces={}",
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

    fn start_picture(
        &mut self,
        header: &SliceHeader,
        sps: &Sps,
        structure: FieldMask,
        timestamp: i64,
    ) -> HwdecResult<()> {
        if header.is_idr() {
            self.prev_ref_frame_num = None;
        } else {
            self.fill_frame_num_gap(sps, header.frame_num)?;
        }

        // 第二场复用第一场的表面
        let first_field = self
            .dpb
            .find_first_field(header.frame_num, structure, header.is_reference())
            .and_then(|id| self.dpb.get(id))
            .and_then(|first| first.surface.clone());
        let surface = match first_field {
            Some(surface) => surface,
            None => {
                let pool = self
                    .pool
                    .as_ref()
                    .ok_or_else(|| HwdecError::Internal("H264: 表面池未创建".into()))?;
                pool.try_acquire()?
            }
        };

        let cnt = self.poc.compute(sps, header);
        let mut pic = H264Picture::new(Some(surface), structure, header.frame_num);
        pic.top_poc = cnt.top;
        pic.bottom_poc = cnt.bottom;
        pic.update_poc();
        pic.timestamp = timestamp;
        pic.idr = header.is_idr();
        pic.nal_ref = header.is_reference();
        pic.mmco5 = header.has_mmco5();
        debug!(
            "H264: 新图像 frame_num={}, poc={}, structure={:?}, type={:?}",
            pic.frame_num, pic.poc, structure, header.slice_type
        );

        self.current = Some(CurrentPicture {
            pic,
            structure,
            header: header.clone(),
            slices: Vec::new(),
        });
        Ok(())
    }

    /// 为 PrevRefFrameNum 与当前 frame_num 之间缺失的帧插入 "不存在" 参考帧
    fn fill_frame_num_gap(&mut self, sps: &Sps, frame_num: u32) -> HwdecResult<()> {
        let Some(prev) = self.prev_ref_frame_num else {
            return Ok(());
        };
        let max_frame_num = sps.max_frame_num();
        let mut unused = (prev + 1) % max_frame_num;
        if frame_num == prev || frame_num == unused {
            return Ok(());
        }
        if !self.config.enable_gap_filling {
            warn!("H264: frame_num 间隙未填补, prev={}, cur={}", prev, frame_num);
            return Ok(());
        }
        if !sps.gaps_in_frame_num_value_allowed_flag {
            warn!(
                "H264: SPS 未允许 frame_num 间隙, 仍按间隙处理, prev={}, cur={}",
                prev, frame_num
            );
        }

        while unused != frame_num {
            let poc = self.poc.compute_non_existing(sps, unused);
            debug!("H264: 插入间隙帧 frame_num={}, poc={}", unused, poc);
            self.dpb
                .add_non_existing(H264Picture::non_existing(unused, poc), &mut self.output)?;
            self.prev_ref_frame_num = Some(unused);
            unused = (unused + 1) % max_frame_num;
        }
        Ok(())
    }

    /// 提交当前图像并存入 DPB
    fn finish_current(&mut self) -> HwdecResult<()> {
        let Some(CurrentPicture {
            pic,
            structure,
            header,
            slices,
        }) = self.current.take()
        else {
            return Ok(());
        };

        let surface = pic
            .surface
            .as_ref()
            .map(|surface| surface.id())
            .ok_or_else(|| HwdecError::Internal("H264: 当前图像没有表面".into()))?;
        let job = PictureJob {
            codec: CodecKind::H264,
            surface,
            poc: pic.field_poc(structure),
            structure: structure.structure(),
            references: self.dpb.references(),
            slices,
        };
        self.accel.submit(&job)?;

        self.poc
            .finish_picture(&pic, structure, header.pic_order_cnt_lsb);
        if pic.nal_ref {
            self.prev_ref_frame_num = Some(if pic.mmco5 { 0 } else { pic.frame_num });
        }
        self.dpb
            .add(pic, &header.dec_ref_pic_marking, &mut self.output)
    }

    /// 完成当前图像, 输出 DPB 全部图像并重置 POC 状态
    fn drain(&mut self) -> HwdecResult<()> {
        let result = self.finish_current();
        self.dpb.flush(&mut self.output);
        self.poc.reset();
        self.prev_ref_frame_num = None;
        result
    }
}

// ============================================================
// VideoDecoder trait 实现
// ============================================================

impl VideoDecoder for H264Decoder {
    fn codec(&self) -> CodecKind {
        CodecKind::H264
    }

    fn name(&self) -> &str {
        "h264_hwdec"
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
        debug!("H264: 解码器启动, format={:?}", config.stream_format);
        Ok(())
    }

    fn decode(&mut self, buffer: &VideoBuffer) -> DecodeStatus {
        if !self.started {
            warn!("H264: 解码器未启动");
            return DecodeStatus::Fail;
        }

        let nals = split_nal_units(&buffer.data, self.config.stream_format, self.nal_length_size);
        let nals = match nals {
            Ok(nals) => nals,
            Err(err) => {
                warn!("H264: NAL 分割失败, err={}", err);
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
                    debug!("H264: 表面池耗尽, 等待调用方释放输出");
                    self.resume.suspend(&buffer.data, index);
                    return DecodeStatus::NoSurface;
                }
                Err(err) => {
                    warn!("H264: NAL 处理失败, index={}, err={}", index, err);
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
            warn!("H264: flush 时提交当前图像失败, err={}", err);
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
        debug!("H264: 解码器停止");
    }
}

/// 由 SPS 推导输出格式
fn format_from_sps(sps: &Sps, extra_surfaces: u32) -> FormatInfo {
    let dpb_size = max_dec_frame_buffering(sps) as u32;
    FormatInfo {
        codec: CodecKind::H264,
        width: sps.width,
        height: sps.height,
        surface_width: sps.pic_width_in_mbs * 16,
        surface_height: sps.frame_height_in_mbs() * 16,
        surface_count: dpb_size + extra_surfaces,
        dpb_size,
        profile: sps.profile_idc,
        level: sps.level_idc,
        bit_depth: sps.bit_depth_luma,
        chroma_format_idc: sps.chroma_format_idc,
    }
}

/// 判断 slice 是否开始新图像 (7.4.1.2.4)
fn is_new_picture(prev: &SliceHeader, cur: &SliceHeader, sps: &Sps) -> bool {
    if cur.first_mb_in_slice == 0 && cur.colour_plane_id == prev.colour_plane_id {
        return true;
    }
    let poc_differs = match sps.poc_type {
        0 => {
            prev.pic_order_cnt_lsb != cur.pic_order_cnt_lsb
                || prev.delta_pic_order_cnt_bottom != cur.delta_pic_order_cnt_bottom
        }
        1 => prev.delta_pic_order_cnt != cur.delta_pic_order_cnt,
        _ => false,
    };
    prev.frame_num != cur.frame_num
        || prev.pps_id != cur.pps_id
        || prev.field_pic != cur.field_pic
        || (cur.field_pic && prev.bottom_field != cur.bottom_field)
        || (prev.nal_ref_idc == 0) != (cur.nal_ref_idc == 0)
        || poc_differs
        || prev.is_idr() != cur.is_idr()
        || (prev.is_idr() && cur.is_idr() && prev.idr_pic_id != cur.idr_pic_id)
}
