//! # hwdec-core
//!
//! hwdec 硬件解码前端核心库, 提供统一错误类型与比特流读写工具.
//!
//! 参数集/片头解析、DPB 与解码控制循环都建立在本 crate 之上.

pub mod bitreader;
pub mod bitwriter;
pub mod error;

// 重导出常用类型
pub use bitreader::BitReader;
pub use bitwriter::BitWriter;
pub use error::{HwdecError, HwdecResult};
