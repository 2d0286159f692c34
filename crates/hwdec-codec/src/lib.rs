//! # hwdec-codec
//!
//! H.264/AVC 与 H.265/HEVC 硬件解码前端.
//!
//! 本 crate 不做像素重建, 只负责硬件解码器之外的全部码流逻辑:
//! 参数集与片头解析、POC 推导、参考标记、解码图像缓冲区 (DPB) 管理、
//! 参考列表构建与显示顺序输出. 每幅图像组织成 [`PictureJob`] 交给实现
//! [`Accelerator`] 的后端.
//!
//! ## 使用示例
//!
//! ```rust
//! use hwdec_codec::{CodecKind, CodecRegistry, DecoderConfig, NullAccelerator};
//!
//! let mut reg = CodecRegistry::new();
//! hwdec_codec::register_all(&mut reg);
//!
//! let mut decoder = reg
//!     .create_decoder(CodecKind::H265, Box::new(NullAccelerator::new()))
//!     .unwrap();
//! decoder.start(&DecoderConfig::default()).unwrap();
//! assert!(decoder.format_info().is_none());
//! ```

pub mod accelerator;
pub mod arena;
pub mod buffer;
pub mod codec_id;
pub mod config;
pub mod decoder;
pub mod decoders;
pub mod format;
pub mod output;
pub mod parsers;
pub mod registry;
pub mod status;
pub mod surface;

#[cfg(any(test, feature = "test-streams"))]
#[doc(hidden)]
pub mod test_streams;

// 重导出常用类型
pub use accelerator::{
    Accelerator, NullAccelerator, PictureJob, PictureStructure, ReferenceEntry, SliceJob,
};
pub use buffer::{NO_TIMESTAMP, VideoBuffer};
pub use codec_id::CodecKind;
pub use config::{DEFAULT_EXTRA_SURFACES, DecoderConfig, StreamFormat};
pub use decoder::VideoDecoder;
pub use format::FormatInfo;
pub use output::{DecodedPicture, OutputQueue, OutputSink};
pub use registry::CodecRegistry;
pub use status::DecodeStatus;
pub use surface::{Surface, SurfaceId, SurfacePool};

/// 注册所有内置解码器
pub fn register_all(registry: &mut CodecRegistry) {
    decoders::register_all_decoders(registry);
}
