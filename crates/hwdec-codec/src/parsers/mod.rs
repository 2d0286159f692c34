//! 码流语法解析器.
//!
//! 只解析 DPB 管理与加速器提交所需的语法层, 宏块/CTU 层数据交由硬件处理.

pub mod bytestream;
pub mod h264;
pub mod h265;
