//! 解码器实现模块.
//!
//! 两个解码前端共用 NAL 分割与重新提交续点逻辑.

pub mod h264;
pub mod h265;

use bytes::Bytes;

use hwdec_core::HwdecResult;

use crate::codec_id::CodecKind;
use crate::config::StreamFormat;
use crate::parsers::bytestream::{split_annex_b, split_length_prefixed};
use crate::registry::CodecRegistry;

/// 注册所有内置解码器
pub fn register_all_decoders(registry: &mut CodecRegistry) {
    registry.register_decoder(CodecKind::H264, "h264_hwdec", h264::H264Decoder::create);
    registry.register_decoder(CodecKind::H265, "hevc_hwdec", h265::H265Decoder::create);
}

/// 按码流格式分割 NAL 单元, `nal_length_size` 优先于 `format`
pub(crate) fn split_nal_units(
    data: &[u8],
    format: StreamFormat,
    nal_length_size: Option<usize>,
) -> HwdecResult<Vec<&[u8]>> {
    match (nal_length_size, format) {
        (Some(size), _) | (None, StreamFormat::LengthPrefixed { nal_length_size: size }) => {
            split_length_prefixed(data, size)
        }
        (None, StreamFormat::AnnexB) => Ok(split_annex_b(data)),
    }
}

/// 重新提交续点
///
/// 返回 `FormatChange` / `NoSurface` 时记录中断位置, 调用方重新提交同一缓冲区后
/// 从中断的 NAL 继续, 已处理的 NAL 不会重复执行.
#[derive(Debug, Default)]
pub(crate) struct ResumePoint {
    buffer: Option<Bytes>,
    next_nal: usize,
}

impl ResumePoint {
    /// 本次 `decode()` 的起始 NAL 索引
    pub(crate) fn start_index(&mut self, data: &Bytes) -> usize {
        match self.buffer.take() {
            Some(pending) if pending == *data => std::mem::take(&mut self.next_nal),
            _ => {
                self.next_nal = 0;
                0
            }
        }
    }

    /// 在第 `nal_index` 个 NAL 处中断
    pub(crate) fn suspend(&mut self, data: &Bytes, nal_index: usize) {
        self.buffer = Some(data.clone());
        self.next_nal = nal_index;
    }

    pub(crate) fn clear(&mut self) {
        self.buffer = None;
        self.next_nal = 0;
    }
}
