//! 应用配置文件.
//!
//! JSON 格式, 所有字段均可省略:
//!
//! ```json
//! {
//!     "decoder": { "stream_format": { "type": "annex_b" }, "extra_surfaces": 4 },
//!     "logging": { "level": "debug", "directory": "logs" }
//! }
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use hwdec_codec::DecoderConfig;

use crate::logging::LoggingConfig;

/// 应用配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// 解码器配置
    pub decoder: DecoderConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从文件加载并校验
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败, path={}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("配置文件无效, path={}", path.display()))
    }

    /// 从 JSON 文本解析并校验
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("JSON 解析失败")?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<()> {
        self.decoder.validate()?;
        if self.logging.file_prefix.is_empty() {
            anyhow::bail!("logging.file_prefix 不能为空");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwdec_codec::StreamFormat;

    #[test]
    fn test_空对象使用默认值() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_部分字段覆盖() {
        let config = AppConfig::from_json(
            r#"{
                "decoder": {
                    "stream_format": { "type": "length_prefixed", "nal_length_size": 4 },
                    "enable_gap_filling": false
                },
                "logging": { "level": "debug" }
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.decoder.stream_format,
            StreamFormat::LengthPrefixed { nal_length_size: 4 }
        );
        assert!(!config.decoder.enable_gap_filling);
        assert_eq!(config.decoder.extra_surfaces, hwdec_codec::DEFAULT_EXTRA_SURFACES);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file_prefix, LoggingConfig::default().file_prefix);
    }

    #[test]
    fn test_非法配置被拒绝() {
        let err = AppConfig::from_json(
            r#"{ "decoder": { "stream_format": { "type": "length_prefixed", "nal_length_size": 3 } } }"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("nal_length_size"), "错误信息应指出非法字段");

        assert!(AppConfig::from_json(r#"{ "logging": { "file_prefix": "" } }"#).is_err());
        assert!(AppConfig::from_json("[1, 2]").is_err());
    }
}
