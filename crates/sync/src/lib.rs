//! 同步原语
//!
//! 向文件系统各层提供基本的锁原语：
//! - [`SpinLock`]：互斥自旋锁，保护区域空闲链表、对象池与目录项集合
//! - [`RwLock`]：读写自旋锁，用于挂载实例的生命周期闸门
//!
//! 锁的外壳由 `lock_api` 提供，本 crate 只实现底层的原子状态机
//! （[`RawSpinLock`] 与 [`RawRwSpinLock`]）。
//! 所有临界区都是纯内存操作，持有时间很短，因此采用自旋而非睡眠等待。

#![no_std]

mod raw_spin_lock;
mod rwlock;
mod spin_lock;

pub use raw_spin_lock::RawSpinLock;
pub use rwlock::{RawRwSpinLock, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
