//! 解码输出格式信息.

use crate::codec_id::CodecKind;

/// 激活序列的输出格式
///
/// 在 `decode()` 返回 `FormatChange` 后通过 `format_info()` 查询.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatInfo {
    /// 编解码器
    pub codec: CodecKind,
    /// 显示宽度 (已裁剪)
    pub width: u32,
    /// 显示高度 (已裁剪)
    pub height: u32,
    /// 表面宽度 (按宏块/CTB 对齐)
    pub surface_width: u32,
    /// 表面高度 (按宏块/CTB 对齐)
    pub surface_height: u32,
    /// 表面池大小 (DPB + 额外表面)
    pub surface_count: u32,
    /// DPB 容量 (帧)
    pub dpb_size: u32,
    /// profile_idc
    pub profile: u8,
    /// level_idc
    pub level: u8,
    /// 亮度位深
    pub bit_depth: u32,
    /// chroma_format_idc
    pub chroma_format_idc: u32,
}
