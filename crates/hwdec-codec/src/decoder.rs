//! 解码器 trait 定义.
//!
//! H.264 与 H.265 解码前端都实现 [`VideoDecoder`].

use hwdec_core::HwdecResult;

use crate::buffer::VideoBuffer;
use crate::codec_id::CodecKind;
use crate::config::DecoderConfig;
use crate::format::FormatInfo;
use crate::output::DecodedPicture;
use crate::status::DecodeStatus;

/// 视频解码器 trait
///
/// 解码流程:
/// 1. 调用 `start()` 传入配置 (可附带 avcC/hvcC 配置记录)
/// 2. 循环调用 `decode()` 送入压缩数据, 按返回状态处理:
///    - `FormatChange`: 查询 `format_info()` 后重新提交同一缓冲区
///    - `NoSurface`: 先通过 `get_output()` 取出并释放输出, 再重新提交
/// 3. 每次 `decode()` 之后调用 `get_output()` 直到返回 `None`
/// 4. 流结束时调用 `flush()` 并取出剩余输出, 最后 `stop()`
pub trait VideoDecoder: Send {
    /// 获取编解码器类型
    fn codec(&self) -> CodecKind;

    /// 获取解码器名称
    fn name(&self) -> &str;

    /// 使用配置启动解码器
    fn start(&mut self, config: &DecoderConfig) -> HwdecResult<()>;

    /// 送入一个缓冲区进行解码
    fn decode(&mut self, buffer: &VideoBuffer) -> DecodeStatus;

    /// 按显示顺序取出一幅已解码图像
    fn get_output(&mut self) -> Option<DecodedPicture>;

    /// 完成当前图像并输出 DPB 中全部待输出图像
    fn flush(&mut self);

    /// 当前激活序列的格式, 未激活时为 `None`
    fn format_info(&self) -> Option<&FormatInfo>;

    /// 停止解码器, 释放上下文与表面池
    fn stop(&mut self);
}
