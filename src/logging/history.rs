//! 历史日志整理: 删除超过保留期的文件, 压缩当天之前的日志.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use flate2::Compression;
use flate2::write::GzEncoder;

use super::LoggingConfig;

/// 整理日志目录, 返回删除与压缩的文件数
///
/// 只处理 `{prefix}.{YYYY-MM-DD}.log` 与 `{prefix}.{YYYY-MM-DD}.log.gz`, 其他文件保持不动.
pub fn cleanup_history(config: &LoggingConfig, today: NaiveDate) -> Result<usize> {
    let directory = Path::new(&config.directory);
    if !directory.exists() {
        return Ok(0);
    }

    let cutoff = today - Duration::days(config.retention_days);
    let mut touched = 0;
    for entry in fs::read_dir(directory)
        .with_context(|| format!("读取日志目录失败, path={}", directory.display()))?
    {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some((date, compressed)) = parse_history_name(name, &config.file_prefix) else {
            continue;
        };

        if date < cutoff {
            fs::remove_file(&path)
                .with_context(|| format!("删除过期日志失败, path={}", path.display()))?;
            touched += 1;
        } else if config.compress_history && !compressed && date < today {
            compress_to_gz(&path)?;
            touched += 1;
        }
    }
    Ok(touched)
}

/// 解析历史日志文件名, 返回 (日期, 是否已压缩)
fn parse_history_name(file_name: &str, prefix: &str) -> Option<(NaiveDate, bool)> {
    let rest = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
    let (date_part, compressed) = match rest.strip_suffix(".log.gz") {
        Some(date_part) => (date_part, true),
        None => (rest.strip_suffix(".log")?, false),
    };
    if date_part.len() != 10 {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some((date, compressed))
}

fn compress_to_gz(path: &Path) -> Result<()> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    if gz_path.exists() {
        return Ok(());
    }

    let mut input =
        File::open(path).with_context(|| format!("打开待压缩日志失败, path={}", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("创建压缩日志失败, path={}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;

    fs::remove_file(path)
        .with_context(|| format!("删除已压缩日志失败, path={}", path.display()))?;
    Ok(())
}
