//! 图像存储池.
//!
//! DPB 中的图像以 [`PicId`] 引用, 索引在图像释放前保持稳定.
//! 释放的槽位进入空闲列表, 供后续图像复用.

/// 图像索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PicId(u32);

impl PicId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// 带空闲列表的图像存储池
#[derive(Debug)]
pub struct PictureArena<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
}

impl<T> Default for PictureArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PictureArena<T> {
    /// 创建空池
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// 存入图像, 返回其索引
    pub fn insert(&mut self, value: T) -> PicId {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(value);
            return PicId(idx);
        }
        self.slots.push(Some(value));
        PicId((self.slots.len() - 1) as u32)
    }

    /// 取出并释放图像
    pub fn remove(&mut self, id: PicId) -> Option<T> {
        let value = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id.0);
        Some(value)
    }

    /// 按索引访问
    pub fn get(&self, id: PicId) -> Option<&T> {
        self.slots.get(id.index())?.as_ref()
    }

    /// 按索引可变访问
    pub fn get_mut(&mut self, id: PicId) -> Option<&mut T> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    /// 释放全部图像
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}
