//! 解码输出.
//!
//! DPB 通过 [`OutputSink`] 交出按显示顺序排列的图像, 控制循环使用 [`OutputQueue`]
//! 暂存, 供调用方 `get_output()` 取出.

use std::collections::VecDeque;

use crate::surface::Surface;

/// 已解码、可显示的图像
#[derive(Debug, Clone)]
pub struct DecodedPicture {
    /// 图像所在表面, 释放全部句柄后归还表面池
    pub surface: Surface,
    /// 图像 POC
    pub poc: i32,
    /// 随输入缓冲区传入的时间戳
    pub timestamp: i64,
}

/// 输出接收端
pub trait OutputSink {
    /// 接收一幅按显示顺序输出的图像
    fn output(&mut self, picture: DecodedPicture);
}

/// 输出队列
#[derive(Debug, Default)]
pub struct OutputQueue {
    pictures: VecDeque<DecodedPicture>,
}

impl OutputQueue {
    /// 创建空队列
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出最早的输出图像
    pub fn pop(&mut self) -> Option<DecodedPicture> {
        self.pictures.pop_front()
    }

    /// 队列长度
    pub fn len(&self) -> usize {
        self.pictures.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.pictures.is_empty()
    }

    /// 丢弃全部待取出图像
    pub fn clear(&mut self) {
        self.pictures.clear();
    }
}

impl OutputSink for OutputQueue {
    fn output(&mut self, picture: DecodedPicture) {
        self.pictures.push_back(picture);
    }
}

impl OutputSink for Vec<DecodedPicture> {
    fn output(&mut self, picture: DecodedPicture) {
        self.push(picture);
    }
}
