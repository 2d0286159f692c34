//! # hwdec
//!
//! H.264/H.265 硬件解码前端.
//!
//! 负责硬件解码器之外的码流逻辑: 参数集解析、POC 推导、参考帧管理、
//! DPB 输出重排与解码控制循环. 像素重建交给实现
//! [`codec::Accelerator`] 的后端完成.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use hwdec::codec::{CodecKind, DecodeStatus, DecoderConfig, NullAccelerator, VideoBuffer};
//!
//! let registry = hwdec::default_registry();
//! let mut decoder = registry
//!     .create_decoder(CodecKind::H264, Box::new(NullAccelerator::new()))
//!     .unwrap();
//! decoder.start(&DecoderConfig::default()).unwrap();
//!
//! let buffer = VideoBuffer::from_data(std::fs::read("input.h264").unwrap());
//! while decoder.decode(&buffer) == DecodeStatus::FormatChange {}
//! decoder.flush();
//! while let Some(picture) = decoder.get_output() {
//!     println!("poc={}", picture.poc);
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `hwdec-core` | 错误类型与比特流读写 |
//! | `hwdec-codec` | 码流解析、DPB 与解码控制循环 |

pub mod config;
pub mod logging;

/// 核心类型与工具
pub use hwdec_core as core;

/// 解码前端
pub use hwdec_codec as codec;

/// 获取版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置解码器的注册表
pub fn default_registry() -> hwdec_codec::CodecRegistry {
    let mut registry = hwdec_codec::CodecRegistry::new();
    hwdec_codec::register_all(&mut registry);
    registry
}
