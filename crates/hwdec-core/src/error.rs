//! 统一错误类型定义.
//!
//! 所有 hwdec crate 共用的错误类型, 支持跨模块传播.

use thiserror::Error;

/// hwdec 统一错误类型
#[derive(Debug, Error)]
pub enum HwdecError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 无效数据 (损坏的码流、越界的语法元素等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 不支持的码流特性
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 表面池中暂无空闲表面
    #[error("无可用表面")]
    NoSurface,

    /// DPB 已满且无法输出任何图像
    #[error("DPB 已满: {0}")]
    DpbFull(String),

    /// 硬件加速器返回失败
    #[error("加速器错误: {0}")]
    Accelerator(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 已到达比特流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// hwdec 统一 Result 类型
pub type HwdecResult<T> = Result<T, HwdecError>;
