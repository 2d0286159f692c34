//! hwdec-cli - 码流分析命令行工具
//!
//! 用空加速器驱动 H.264/H.265 解码前端, 报告格式变化与显示顺序输出.

mod decode;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use hwdec::config::AppConfig;
use hwdec::logging;
use hwdec_codec::{CodecKind, NullAccelerator, StreamFormat};

#[derive(Parser, Debug)]
#[command(name = "hwdec-cli", version, about = "H.264/H.265 解码前端码流分析工具")]
struct Cli {
    /// 输入码流文件
    input: PathBuf,

    /// 编解码器 (h264/hevc 或 MIME 类型), 缺省时按扩展名推断
    #[arg(short, long)]
    codec: Option<String>,

    /// JSON 配置文件, 命令行参数优先
    #[arg(long)]
    config: Option<PathBuf>,

    /// NAL 长度前缀字节数, 指定时按长度前缀格式解析
    #[arg(long)]
    nal_length_size: Option<usize>,

    /// DPB 之外额外分配的表面数量
    #[arg(long)]
    extra_surfaces: Option<u32>,

    /// 不为 frame_num 间隙合成参考帧 (H.264)
    #[arg(long)]
    no_gap_filling: bool,

    /// 以 JSON 输出统计结果
    #[arg(long)]
    json: bool,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// 命令行参数覆盖配置文件
    fn apply(&self, config: &mut AppConfig) {
        if let Some(size) = self.nal_length_size {
            config.decoder.stream_format = StreamFormat::LengthPrefixed {
                nal_length_size: size,
            };
        }
        if let Some(extra) = self.extra_surfaces {
            config.decoder.extra_surfaces = extra;
        }
        if self.no_gap_filling {
            config.decoder.enable_gap_filling = false;
        }
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("错误: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;
    logging::init(&config.logging, cli.verbose)?;

    let codec = resolve_codec(cli.codec.as_deref(), &cli.input)?;
    let data = fs::read(&cli.input)
        .with_context(|| format!("读取输入失败, path={}", cli.input.display()))?;
    info!(
        "hwdec-cli {}: 输入 {} ({} 字节), codec={}",
        hwdec::version(),
        cli.input.display(),
        data.len(),
        codec
    );

    let registry = hwdec::default_registry();
    let mut decoder = registry.create_decoder(codec, Box::new(NullAccelerator::new()))?;
    decoder.start(&config.decoder)?;
    let summary = decode::decode_stream(decoder.as_mut(), data)?;
    decoder.stop();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        summary.print();
    }
    Ok(())
}

/// 按命令行参数或文件扩展名确定编解码器
fn resolve_codec(name: Option<&str>, input: &Path) -> Result<CodecKind> {
    if let Some(name) = name {
        return Ok(name.parse()?);
    }
    let ext = input.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
    match CodecKind::from_extension(ext) {
        Some(codec) => Ok(codec),
        None => bail!("无法从扩展名 '{}' 推断编解码器, 请使用 --codec 指定", ext),
    }
}
