//! 集群互斥锁
//!
//! 只提供非阻塞的 try_lock 语义：拿不到锁说明其它节点正在执行，
//! 调用方直接跳过本轮，绝不等待。

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 集群级互斥锁句柄
pub trait ClusterLock: Send + Sync {
    /// 尝试加锁，立即返回是否成功
    fn try_lock(&self) -> bool;

    /// 释放锁；非持有者调用时无副作用
    fn unlock(&self);
}

/// 加锁成功后的作用域守卫，离开作用域时无条件释放锁
pub struct LockGuard {
    lock: Arc<dyn ClusterLock>,
}

impl LockGuard {
    /// 非阻塞获取，失败返回 None
    pub fn try_acquire(lock: Arc<dyn ClusterLock>) -> Option<Self> {
        if lock.try_lock() {
            Some(Self { lock })
        } else {
            None
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// 锁的持有记录
#[derive(Debug, Clone)]
pub(crate) struct LockHolder {
    pub owner: String,
    pub expires_at: Instant,
}

/// 基于租约的锁实现
///
/// 持有者崩溃时租约到期后锁自动失效，其它节点不会被永久阻塞。
pub struct LeaseLock {
    slot: Arc<Mutex<Option<LockHolder>>>,
    owner: String,
    lease: Duration,
}

impl LeaseLock {
    pub(crate) fn new(slot: Arc<Mutex<Option<LockHolder>>>, owner: String, lease: Duration) -> Self {
        Self { slot, owner, lease }
    }
}

impl ClusterLock for LeaseLock {
    fn try_lock(&self) -> bool {
        let mut slot = self.slot.lock();
        let now = Instant::now();
        match slot.as_ref() {
            Some(holder) if holder.expires_at > now => false,
            Some(holder) => {
                log::debug!("Lease of {} expired, taking over lock", holder.owner);
                *slot = Some(LockHolder {
                    owner: self.owner.clone(),
                    expires_at: now + self.lease,
                });
                true
            }
            None => {
                *slot = Some(LockHolder {
                    owner: self.owner.clone(),
                    expires_at: now + self.lease,
                });
                true
            }
        }
    }

    fn unlock(&self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().map_or(false, |holder| holder.owner == self.owner) {
            *slot = None;
        }
    }
}
