//! 解码状态码.
//!
//! `decode()` 不返回 `Result`, 而是返回调用方据此决定后续动作的状态:
//! 格式变化需重新查询格式并重新提交同一缓冲区, 无可用表面需先取出输出再重试.

use std::fmt;

use hwdec_core::HwdecError;

/// 解码状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeStatus {
    /// 缓冲区已全部处理
    Success,
    /// 激活了新的序列参数, 调用方应查询 `format_info()` 后重新提交当前缓冲区
    FormatChange,
    /// 存在损坏的 NAL, 已跳过
    InvalidData,
    /// 表面池耗尽, 调用方应先取出输出后重新提交
    NoSurface,
    /// 码流使用了不支持的特性
    Unsupported,
    /// 加速器或内部失败
    Fail,
}

impl DecodeStatus {
    /// 是否需要调用方重新提交当前缓冲区
    pub fn needs_resubmit(&self) -> bool {
        matches!(self, Self::FormatChange | Self::NoSurface)
    }

    /// 是否为错误状态
    pub fn is_error(&self) -> bool {
        matches!(self, Self::InvalidData | Self::Unsupported | Self::Fail)
    }
}

impl From<&HwdecError> for DecodeStatus {
    fn from(err: &HwdecError) -> Self {
        match err {
            HwdecError::InvalidData(_) | HwdecError::Eof => Self::InvalidData,
            HwdecError::NoSurface => Self::NoSurface,
            HwdecError::Unsupported(_) => Self::Unsupported,
            HwdecError::InvalidArgument(_)
            | HwdecError::DpbFull(_)
            | HwdecError::Accelerator(_)
            | HwdecError::Io(_)
            | HwdecError::Internal(_) => Self::Fail,
        }
    }
}

impl fmt::Display for DecodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::FormatChange => "format_change",
            Self::InvalidData => "invalid_data",
            Self::NoSurface => "no_surface",
            Self::Unsupported => "unsupported",
            Self::Fail => "fail",
        };
        f.write_str(name)
    }
}
