//! 日志系统.
//!
//! 双输出:
//! - console: 彩色, 默认 info, 带日志来源
//! - file: 无色, 按天滚动, 文件名 `{prefix}.{date}.log`
//!
//! 解码库通过 `log` 门面输出, tracing-subscriber 安装时自动桥接.
//! 文件级别取自配置, `-v`/`-vv` 提升为 debug/trace, `HWDEC_LOG` 环境变量优先.

mod history;

pub use history::cleanup_history;

use std::fmt::Write as _;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// 覆盖文件日志级别的环境变量
pub const LOG_ENV: &str = "HWDEC_LOG";

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 文件日志级别 (EnvFilter 语法)
    pub level: String,
    /// 日志目录
    pub directory: String,
    /// 日志文件前缀
    pub file_prefix: String,
    /// 历史日志保留天数
    pub retention_days: i64,
    /// 是否 gzip 压缩历史日志
    pub compress_history: bool,
    /// 是否输出到控制台
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
            file_prefix: "hwdec".to_string(),
            retention_days: 30,
            compress_history: true,
            console: true,
        }
    }
}

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// 初始化日志系统, 进程内只能调用一次
///
/// `verbosity`: 0 使用配置级别, 1 为 debug, 2 及以上为 trace.
pub fn init(config: &LoggingConfig, verbosity: u8) -> Result<()> {
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("创建日志目录失败, path={}", config.directory))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .build(&config.directory)
        .context("创建日志文件失败")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD.set(guard).ok();

    let file_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(file_level(&config.level, verbosity)));
    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(LineFormatter { ansi: false })
        .with_filter(file_filter);

    let console_layer = config.console.then(|| {
        fmt::Layer::default()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .event_format(LineFormatter { ansi: true })
            .with_filter(EnvFilter::new(console_level(verbosity)))
    });

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统已初始化")?;

    match cleanup_history(config, Local::now().date_naive()) {
        Ok(0) => {}
        Ok(count) => tracing::debug!("历史日志整理完成, files={}", count),
        Err(err) => tracing::warn!("历史日志整理失败: {:#}", err),
    }
    Ok(())
}

fn file_level(level: &str, verbosity: u8) -> String {
    match verbosity {
        0 => level.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

fn console_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// 单行格式: `[月-日 时:分:秒.毫秒] 级别 来源 > 消息`
struct LineFormatter {
    ansi: bool,
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        let mut prefix = format!(
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis()
        );
        if self.ansi {
            let color = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                _ => "\x1b[34m",
            };
            write!(prefix, "{}{:5}\x1b[0m", color, meta.level())?;
        } else {
            write!(prefix, "{:5}", meta.level())?;
        }
        write!(writer, "{} {} > ", prefix, meta.target())?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
