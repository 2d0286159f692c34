//! 解码器注册表.
//!
//! 按 [`CodecKind`] 查找解码器工厂并以给定加速器实例化.

use std::collections::HashMap;

use hwdec_core::{HwdecError, HwdecResult};

use crate::accelerator::Accelerator;
use crate::codec_id::CodecKind;
use crate::decoder::VideoDecoder;

/// 解码器工厂函数类型
pub type DecoderFactory = fn(Box<dyn Accelerator>) -> Box<dyn VideoDecoder>;

/// 解码器注册条目
struct DecoderEntry {
    /// 解码器名称
    name: String,
    /// 工厂函数
    factory: DecoderFactory,
}

/// 解码器注册表
#[derive(Default)]
pub struct CodecRegistry {
    decoders: HashMap<CodecKind, Vec<DecoderEntry>>,
}

impl CodecRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个解码器
    pub fn register_decoder(
        &mut self,
        codec: CodecKind,
        name: impl Into<String>,
        factory: DecoderFactory,
    ) {
        self.decoders.entry(codec).or_default().push(DecoderEntry {
            name: name.into(),
            factory,
        });
    }

    /// 创建指定编解码器的解码器实例
    pub fn create_decoder(
        &self,
        codec: CodecKind,
        accelerator: Box<dyn Accelerator>,
    ) -> HwdecResult<Box<dyn VideoDecoder>> {
        // 使用第一个注册的解码器 (优先级最高)
        let entry = self
            .decoders
            .get(&codec)
            .and_then(|entries| entries.first())
            .ok_or_else(|| HwdecError::Unsupported(format!("未找到 {} 的解码器", codec)))?;
        Ok((entry.factory)(accelerator))
    }

    /// 获取所有已注册的解码器名称
    pub fn list_decoders(&self) -> Vec<(CodecKind, &str)> {
        let mut result = Vec::new();
        for (codec, entries) in &self.decoders {
            for entry in entries {
                result.push((*codec, entry.name.as_str()));
            }
        }
        result.sort_by_key(|(codec, _)| codec.name());
        result
    }
}
