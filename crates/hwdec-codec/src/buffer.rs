//! 压缩视频缓冲区.

use bytes::Bytes;

/// 无效时间戳
pub const NO_TIMESTAMP: i64 = i64::MIN;

/// 输入缓冲区
///
/// 一次 `decode()` 调用送入的压缩数据, 可包含任意数量的 NAL 单元.
/// 时间戳随缓冲区中第一幅新图像传递到输出.
#[derive(Debug, Clone)]
pub struct VideoBuffer {
    /// 压缩数据 (Annex B 或长度前缀格式)
    pub data: Bytes,
    /// 显示时间戳
    pub timestamp: i64,
}

impl VideoBuffer {
    /// 从数据创建缓冲区
    pub fn new(data: impl Into<Bytes>, timestamp: i64) -> Self {
        Self {
            data: data.into(),
            timestamp,
        }
    }

    /// 从数据创建不带时间戳的缓冲区
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self::new(data, NO_TIMESTAMP)
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为空缓冲区
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
