//! 解码驱动循环.
//!
//! 按 [`VideoDecoder`] 的调用协议送入码流: 格式变化时记录新格式后重新提交,
//! 表面耗尽时先取出输出再重新提交.

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{debug, info, warn};

use hwdec_codec::{CodecKind, DecodeStatus, FormatInfo, VideoBuffer, VideoDecoder};

/// 激活格式摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatSummary {
    pub width: u32,
    pub height: u32,
    pub profile: u8,
    pub level: u8,
    pub dpb_size: u32,
    pub surface_count: u32,
}

impl From<&FormatInfo> for FormatSummary {
    fn from(format: &FormatInfo) -> Self {
        Self {
            width: format.width,
            height: format.height,
            profile: format.profile,
            level: format.level,
            dpb_size: format.dpb_size,
            surface_count: format.surface_count,
        }
    }
}

/// 解码统计
#[derive(Debug, Clone, Serialize)]
pub struct DecodeSummary {
    pub codec: CodecKind,
    /// 依次激活的格式
    pub formats: Vec<FormatSummary>,
    /// 按输出顺序排列的 POC
    pub output_pocs: Vec<i32>,
    /// 表面耗尽后重新提交的次数
    pub no_surface_retries: usize,
    /// 是否遇到损坏数据
    pub invalid_data: bool,
}

impl DecodeSummary {
    pub fn print(&self) {
        println!("编解码器: {}", self.codec);
        for (index, format) in self.formats.iter().enumerate() {
            println!(
                "格式 #{}: {}x{}, profile={}, level={}, dpb={}, surfaces={}",
                index,
                format.width,
                format.height,
                format.profile,
                format.level,
                format.dpb_size,
                format.surface_count
            );
        }
        println!("输出图像: {}", self.output_pocs.len());
        println!("表面耗尽重试: {}", self.no_surface_retries);
        if self.invalid_data {
            println!("警告: 码流中存在损坏数据");
        }
    }
}

/// 送入整段码流并取出全部输出
pub fn decode_stream(decoder: &mut dyn VideoDecoder, data: Vec<u8>) -> Result<DecodeSummary> {
    let mut summary = DecodeSummary {
        codec: decoder.codec(),
        formats: Vec::new(),
        output_pocs: Vec::new(),
        no_surface_retries: 0,
        invalid_data: false,
    };
    let buffer = VideoBuffer::from_data(data);

    loop {
        let status = decoder.decode(&buffer);
        let drained = drain(decoder, &mut summary);
        match status {
            DecodeStatus::Success => break,
            DecodeStatus::FormatChange => {
                let Some(format) = decoder.format_info() else {
                    bail!("FormatChange 之后没有可用格式");
                };
                info!(
                    "格式变化: {}x{}, dpb={}, surfaces={}",
                    format.width, format.height, format.dpb_size, format.surface_count
                );
                summary.formats.push(FormatSummary::from(format));
            }
            DecodeStatus::NoSurface => {
                if drained == 0 {
                    bail!("表面池耗尽且没有可释放的输出");
                }
                debug!("表面耗尽, 已释放 {} 幅输出后重新提交", drained);
                summary.no_surface_retries += 1;
            }
            DecodeStatus::InvalidData => {
                warn!("码流中存在损坏的 NAL, 其余 NAL 已处理");
                summary.invalid_data = true;
                break;
            }
            DecodeStatus::Unsupported | DecodeStatus::Fail => {
                bail!("解码失败, status={}", status);
            }
        }
    }

    decoder.flush();
    drain(decoder, &mut summary);
    info!(
        "解码完成: 输出 {} 幅, 格式变化 {} 次",
        summary.output_pocs.len(),
        summary.formats.len()
    );
    Ok(summary)
}

/// 取出并释放全部待输出图像, 返回数量
fn drain(decoder: &mut dyn VideoDecoder, summary: &mut DecodeSummary) -> usize {
    let mut count = 0;
    while let Some(picture) = decoder.get_output() {
        debug!("输出 poc={}, surface={}", picture.poc, picture.surface.id());
        summary.output_pocs.push(picture.poc);
        count += 1;
    }
    count
}
