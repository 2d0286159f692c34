//! 解码器配置.
//!
//! 可由调用方直接构造, 也可从 JSON 等 serde 支持的格式反序列化.

use serde::{Deserialize, Serialize};

use hwdec_core::{HwdecError, HwdecResult};

/// 默认额外表面数量 (DPB 之外供输出队列与调用方持有)
pub const DEFAULT_EXTRA_SURFACES: u32 = 11;

/// 输入码流封装格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFormat {
    /// Annex B 起始码格式
    #[default]
    AnnexB,
    /// 长度前缀格式 (MP4/MKV 中的 AVC/HEVC 样本)
    LengthPrefixed {
        /// NAL 长度字段字节数 (1/2/4)
        nal_length_size: usize,
    },
}

/// 解码器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// 输入码流格式
    pub stream_format: StreamFormat,
    /// DPB 之外额外分配的表面数量
    pub extra_surfaces: u32,
    /// avcC / hvcC 配置记录, 提供时在 start() 阶段预解析参数集
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_data: Option<Vec<u8>>,
    /// 是否为 frame_num 间隙合成 "不存在" 参考帧 (仅 H.264)
    pub enable_gap_filling: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            stream_format: StreamFormat::AnnexB,
            extra_surfaces: DEFAULT_EXTRA_SURFACES,
            codec_data: None,
            enable_gap_filling: true,
        }
    }
}

impl DecoderConfig {
    /// 校验配置合法性
    pub fn validate(&self) -> HwdecResult<()> {
        if let StreamFormat::LengthPrefixed { nal_length_size } = self.stream_format
            && !matches!(nal_length_size, 1 | 2 | 4)
        {
            return Err(HwdecError::InvalidArgument(format!(
                "nal_length_size 必须为 1/2/4, 实际={}",
                nal_length_size
            )));
        }
        if self.extra_surfaces > 64 {
            return Err(HwdecError::InvalidArgument(format!(
                "extra_surfaces 过大: {}",
                self.extra_surfaces
            )));
        }
        Ok(())
    }
}
