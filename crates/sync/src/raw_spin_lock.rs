//! 自旋锁实现
//!
//! 基于原子操作实现自旋锁机制，并接入 `lock_api::RawMutex`。

use core::{
    hint,
    sync::atomic::{AtomicBool, Ordering},
};

/// 自旋锁的原始状态，提供互斥访问临界区的能力。
///
/// 不可重入 (即同一线程不能嵌套获取同一把锁)。
/// 通常不直接使用，而是通过 [`crate::SpinLock`] 包装数据。
#[derive(Debug)]
pub struct RawSpinLock {
    lock: AtomicBool,
}

impl RawSpinLock {
    /// 创建一个新的 RawSpinLock 实例。
    pub const fn new() -> Self {
        RawSpinLock {
            lock: AtomicBool::new(false),
        }
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: lock/try_lock 通过 Acquire CAS 保证同一时刻只有一个持有者，
// unlock 以 Release 写回，使临界区内的写入对下一个持有者可见。
unsafe impl lock_api::RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLock::new();

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // 先只读等待，避免在竞争时反复写缓存行
            while self.lock.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }
}
