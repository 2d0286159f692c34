//! 编解码器标识符.
//!
//! 硬件解码前端支持的视频编码标准, 可由 MIME 类型或文件扩展名推断.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use hwdec_core::HwdecError;

/// 编解码器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// H.264 / AVC / MPEG-4 Part 10
    H264,
    /// H.265 / HEVC / MPEG-H Part 2
    H265,
}

impl CodecKind {
    /// 获取编解码器的人类可读名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "hevc",
        }
    }

    /// 对应的 MIME 类型
    pub const fn mime(&self) -> &'static str {
        match self {
            Self::H264 => "video/h264",
            Self::H265 => "video/h265",
        }
    }

    /// 从 MIME 类型推断
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "video/h264" | "video/avc" | "video/x-h264" => Some(Self::H264),
            "video/h265" | "video/hevc" | "video/x-h265" => Some(Self::H265),
            _ => None,
        }
    }

    /// 从文件扩展名推断 (不含点号)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "h264" | "264" | "avc" | "jsv" | "jvt" => Some(Self::H264),
            "h265" | "265" | "hevc" | "bit" => Some(Self::H265),
            _ => None,
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CodecKind {
    type Err = HwdecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(Self::H264),
            "h265" | "hevc" => Ok(Self::H265),
            other => Self::from_mime(other).ok_or_else(|| {
                HwdecError::InvalidArgument(format!("未知编解码器: {}", s))
            }),
        }
    }
}
