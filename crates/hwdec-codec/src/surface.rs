//! 解码表面池.
//!
//! 固定容量的空闲表面列表, 由互斥锁保护. 借出的 [`Surface`] 句柄可在线程间共享,
//! 最后一个句柄释放时表面自动归还池中 (DPB 条目、输出队列、调用方持有的输出均持有句柄).

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use log::{debug, warn};

use hwdec_core::{HwdecError, HwdecResult};

/// 表面标识 (加速器侧的表面编号)
pub type SurfaceId = u32;

struct PoolShared {
    free: Mutex<Vec<SurfaceId>>,
    capacity: usize,
    width: u32,
    height: u32,
}

/// 解码表面池
#[derive(Clone)]
pub struct SurfacePool {
    shared: Arc<PoolShared>,
}

impl SurfacePool {
    /// 创建包含 `count` 个表面的池, 表面编号为 `0..count`
    pub fn new(count: u32, width: u32, height: u32) -> Self {
        // 逆序入栈, 使首次借出的编号从 0 开始
        let free = (0..count).rev().collect();
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
                capacity: count as usize,
                width,
                height,
            }),
        }
    }

    /// 借出一个空闲表面, 池耗尽时返回 `None`
    pub fn acquire(&self) -> Option<Surface> {
        let mut free = match self.shared.free.lock() {
            Ok(free) => free,
            Err(_) => {
                warn!("表面池锁已中毒, 拒绝分配");
                return None;
            }
        };
        let id = free.pop()?;
        Some(Surface {
            slot: Arc::new(SurfaceSlot {
                id,
                pool: Arc::downgrade(&self.shared),
            }),
        })
    }

    /// 借出一个空闲表面, 池耗尽时返回 `NoSurface` 错误
    pub fn try_acquire(&self) -> HwdecResult<Surface> {
        self.acquire().ok_or(HwdecError::NoSurface)
    }

    /// 当前空闲表面数
    pub fn available(&self) -> usize {
        self.shared.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    /// 池容量
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// 表面尺寸
    pub fn dimensions(&self) -> (u32, u32) {
        (self.shared.width, self.shared.height)
    }
}

impl fmt::Debug for SurfacePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfacePool")
            .field("capacity", &self.shared.capacity)
            .field("available", &self.available())
            .field("width", &self.shared.width)
            .field("height", &self.shared.height)
            .finish()
    }
}

struct SurfaceSlot {
    id: SurfaceId,
    pool: Weak<PoolShared>,
}

impl Drop for SurfaceSlot {
    fn drop(&mut self) {
        // 池已销毁时表面随之失效, 无需归还
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        match pool.free.lock() {
            Ok(mut free) => free.push(self.id),
            Err(_) => warn!("表面池锁已中毒, 表面 {} 未能归还", self.id),
        }
        debug!("表面 {} 已归还", self.id);
    }
}

/// 表面句柄
///
/// 克隆只增加引用计数, 全部句柄释放后表面归还所属池.
#[derive(Clone)]
pub struct Surface {
    slot: Arc<SurfaceSlot>,
}

impl Surface {
    /// 表面编号
    pub fn id(&self) -> SurfaceId {
        self.slot.id
    }

    /// 当前句柄数
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.slot)
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Surface({})", self.slot.id)
    }
}

impl PartialEq for Surface {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Eq for Surface {}
