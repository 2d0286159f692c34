//! 硬件加速器接口.
//!
//! 解码前端只负责参考帧管理与图像组织, 像素重建由实现 [`Accelerator`] 的后端完成.
//! 每幅图像完成后, 控制循环向加速器提交一个 [`PictureJob`].

use bytes::Bytes;
use log::debug;

use hwdec_core::HwdecResult;

use crate::codec_id::CodecKind;
use crate::format::FormatInfo;
use crate::surface::SurfaceId;

/// 图像结构
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PictureStructure {
    /// 帧
    Frame,
    /// 顶场
    TopField,
    /// 底场
    BottomField,
}

/// 参考图像描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceEntry {
    /// 参考图像所在表面
    pub surface: SurfaceId,
    /// 参考图像 POC (场参考时为该场的 POC)
    pub poc: i32,
    /// 是否为长期参考
    pub long_term: bool,
    /// 参考的帧/场
    pub structure: PictureStructure,
}

/// 单个 slice 的提交数据
#[derive(Debug, Clone)]
pub struct SliceJob {
    /// slice NAL 原始数据 (含 NAL 头, 含防竞争字节)
    pub nal: Bytes,
    /// slice header 解析结束时的比特偏移
    pub header_bits: usize,
    /// RefPicList0
    pub ref_list0: Vec<ReferenceEntry>,
    /// RefPicList1
    pub ref_list1: Vec<ReferenceEntry>,
}

/// 单幅图像的提交数据
#[derive(Debug, Clone)]
pub struct PictureJob {
    /// 编解码器
    pub codec: CodecKind,
    /// 目标表面
    pub surface: SurfaceId,
    /// 图像 POC
    pub poc: i32,
    /// 图像结构
    pub structure: PictureStructure,
    /// DPB 中全部参考图像
    pub references: Vec<ReferenceEntry>,
    /// 按解码顺序排列的 slice
    pub slices: Vec<SliceJob>,
}

/// 硬件加速器
pub trait Accelerator: Send {
    /// 按新的序列格式配置硬件上下文
    fn configure(&mut self, format: &FormatInfo) -> HwdecResult<()>;

    /// 提交一幅图像进行解码
    fn submit(&mut self, job: &PictureJob) -> HwdecResult<()>;
}

/// 空加速器: 接受所有提交, 不产生像素
///
/// 用于码流分析与输出顺序验证.
#[derive(Debug, Default)]
pub struct NullAccelerator {
    configured: Option<FormatInfo>,
    submitted: u64,
}

impl NullAccelerator {
    /// 创建空加速器
    pub fn new() -> Self {
        Self::default()
    }

    /// 已提交的图像数
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// 最近一次配置的格式
    pub fn configured(&self) -> Option<&FormatInfo> {
        self.configured.as_ref()
    }
}

impl Accelerator for NullAccelerator {
    fn configure(&mut self, format: &FormatInfo) -> HwdecResult<()> {
        debug!(
            "NullAccelerator: 配置 {} {}x{}, surfaces={}",
            format.codec, format.width, format.height, format.surface_count
        );
        self.configured = Some(format.clone());
        Ok(())
    }

    fn submit(&mut self, job: &PictureJob) -> HwdecResult<()> {
        debug!(
            "NullAccelerator: 提交图像 surface={}, poc={}, slices={}, refs={}",
            job.surface,
            job.poc,
            job.slices.len(),
            job.references.len()
        );
        self.submitted += 1;
        Ok(())
    }
}
