//! 定长对象池
//!
//! 为大量同尺寸的元数据对象（例如文件系统节点）提供 slab 风格的分配：
//!
//! - 槽位按缓存行对齐，以段（segment）为单位批量创建
//! - 每个段对应 [`PoolConfig::batch_pages`] 个后备页，后备页从
//!   [`PageAllocator`] 的 [`PoolConfig::zone`] 区域申请，区域耗尽即池耗尽
//! - 槽位直接构造在后备页的内存里，每页放 `PAGE_SIZE / 槽位大小` 个，槽位不跨页
//! - 空闲槽位以索引栈管理，释放的槽位会被下一次 [`ObjectPool::acquire`] 复用
//!
//! ## 一次性构造
//!
//! 每个槽位首次被使用时调用 [`PoolObject::construct`] 完成结构性初始化
//! （锁、容器等），之后的每次复用只调用 [`PoolObject::reset`] 把对象恢复到
//! 初始状态。槽位上的对象从不析构，直到它所在的段被销毁。
//!
//! ## 句柄与段的生命周期
//!
//! [`PoolRef`] 以（段，偏移，代数）定位槽位，而不是裸地址。槽位被释放时代数加一，
//! 因此持有旧句柄的释放会被检测为过期释放。
//!
//! 句柄持有段的引用计数。[`ObjectPool::shrink`] 只是把段从池中摘下，段里的
//! 对象和后备页要等最后一个句柄（包括已过期的句柄）drop 之后才被析构并归还区域。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ops::Deref;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use spin::Once;
use sync::SpinLock;

use crate::config::{DEFAULT_POOL_BATCH_PAGES, PAGE_SIZE};
use crate::error::MmResult;
use crate::page_allocator::{PageAllocator, PageFrame};
use crate::zone::ZoneTag;

/// 可以放入对象池的对象
pub trait PoolObject: Send + Sync + 'static {
    /// 槽位首次使用时调用一次
    fn construct() -> Self;

    /// 槽位被复用时调用，把对象恢复到刚构造时的状态
    fn reset(&self);
}

/// 对象池配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// 每次扩容申请的后备页数（至少为 1）
    pub batch_pages: usize,
    /// 后备页来源区域
    pub zone: ZoneTag,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            batch_pages: DEFAULT_POOL_BATCH_PAGES,
            zone: ZoneTag::General,
        }
    }
}

/// 对象池统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// 槽位总数
    pub total_slots: usize,
    /// 正在使用的槽位数
    pub in_use: usize,
    /// 空闲槽位数
    pub free: usize,
    /// 构造函数累计调用次数
    pub constructed: usize,
    /// 池中各段持有的后备页数
    pub backing_pages: usize,
    /// 单个槽位的字节数
    pub slot_size: usize,
}

// 对齐值需与 config::CACHE_LINE_SIZE 一致
#[repr(align(64))]
struct PoolSlot<T> {
    object: Once<T>,
    in_use: AtomicBool,
    generation: AtomicU32,
}

impl<T> PoolSlot<T> {
    const fn new() -> Self {
        Self {
            object: Once::new(),
            in_use: AtomicBool::new(false),
            generation: AtomicU32::new(0),
        }
    }
}

const _: () = assert!(core::mem::align_of::<PoolSlot<u8>>() == crate::config::CACHE_LINE_SIZE);

/// 一批后备页，以及构造在这些页里的槽位
struct Segment<T> {
    pages: Vec<PageFrame>,
    slots_per_page: usize,
    slot_count: usize,
    _marker: PhantomData<PoolSlot<T>>,
}

impl<T> Segment<T> {
    /// 在页内逐个写入空槽位
    fn new(pages: Vec<PageFrame>, slots_per_page: usize) -> Self {
        let segment = Self {
            slot_count: pages.len() * slots_per_page,
            pages,
            slots_per_page,
            _marker: PhantomData,
        };
        for offset in 0..segment.slot_count {
            // SAFETY: 槽位位于段独占的页内，页起始地址按页对齐，槽位不跨页且满足对齐
            unsafe { ptr::write(segment.slot_ptr(offset), PoolSlot::new()) };
        }
        segment
    }

    fn slot_ptr(&self, offset: usize) -> *mut PoolSlot<T> {
        debug_assert!(offset < self.slot_count);
        let page = &self.pages[offset / self.slots_per_page];
        let within = (offset % self.slots_per_page) * size_of::<PoolSlot<T>>();
        // SAFETY: within + 槽位大小 <= PAGE_SIZE
        unsafe { page.as_ptr().add(within).cast() }
    }

    fn slot(&self, offset: usize) -> &PoolSlot<T> {
        // SAFETY: 槽位在 new 中已初始化，直到段 drop 才析构；只通过共享引用访问
        unsafe { &*self.slot_ptr(offset) }
    }

    fn slots(&self) -> impl Iterator<Item = &PoolSlot<T>> {
        (0..self.slot_count).map(move |offset| self.slot(offset))
    }
}

impl<T> Drop for Segment<T> {
    fn drop(&mut self) {
        // 先析构槽位上的对象，页随后随 pages 归还区域
        for offset in 0..self.slot_count {
            // SAFETY: 每个槽位只初始化一次，此处只析构一次，之后不再被访问
            unsafe { ptr::drop_in_place(self.slot_ptr(offset)) };
        }
    }
}

// SAFETY: 段拥有页及其中的槽位，槽位的共享访问由原子量与 Once 同步
unsafe impl<T: Send + Sync> Send for Segment<T> {}
unsafe impl<T: Send + Sync> Sync for Segment<T> {}

/// 对象池中槽位的句柄
///
/// 句柄可以被克隆，但一个槽位只能被释放一次。
pub struct PoolRef<T: PoolObject> {
    segment: Arc<Segment<T>>,
    offset: usize,
    index: usize,
    generation: u32,
}

impl<T: PoolObject> PoolRef<T> {
    /// 槽位在池中的全局索引
    pub fn index(&self) -> usize {
        self.index
    }

    /// 句柄是否仍指向当前的占用者
    pub fn is_current(&self) -> bool {
        let slot = self.slot();
        slot.in_use.load(Ordering::Acquire)
            && slot.generation.load(Ordering::Acquire) == self.generation
    }

    /// 两个句柄是否指向同一个槽位的同一次占用
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.segment, &b.segment) && a.offset == b.offset && a.generation == b.generation
    }

    fn slot(&self) -> &PoolSlot<T> {
        self.segment.slot(self.offset)
    }
}

impl<T: PoolObject> Clone for PoolRef<T> {
    fn clone(&self) -> Self {
        Self {
            segment: self.segment.clone(),
            offset: self.offset,
            index: self.index,
            generation: self.generation,
        }
    }
}

impl<T: PoolObject> Deref for PoolRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.slot().object.get() {
            Some(obj) => obj,
            None => unreachable!("pool slot {} handed out before construction", self.index),
        }
    }
}

impl<T: PoolObject> fmt::Debug for PoolRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRef")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

struct PoolInner<T> {
    segments: Vec<Arc<Segment<T>>>,
    free: Vec<usize>,
    in_use: usize,
}

/// 定长对象池
pub struct ObjectPool<T: PoolObject> {
    name: &'static str,
    config: PoolConfig,
    allocator: Arc<PageAllocator>,
    slot_size: usize,
    slots_per_page: usize,
    slots_per_batch: usize,
    inner: SpinLock<PoolInner<T>>,
    constructed: AtomicUsize,
}

impl<T: PoolObject> ObjectPool<T> {
    /// 创建对象池，此时不申请任何后备页
    pub fn new(name: &'static str, allocator: Arc<PageAllocator>, config: PoolConfig) -> Self {
        const { assert!(size_of::<PoolSlot<T>>() <= PAGE_SIZE, "pool object larger than a page") };

        let config = PoolConfig {
            batch_pages: config.batch_pages.max(1),
            ..config
        };
        let slot_size = size_of::<PoolSlot<T>>();
        let slots_per_page = PAGE_SIZE / slot_size;
        let slots_per_batch = slots_per_page * config.batch_pages;

        log::debug!(
            "pool {}: slot {} bytes, {} slots per {} page(s) from {} zone",
            name,
            slot_size,
            slots_per_batch,
            config.batch_pages,
            config.zone
        );

        Self {
            name,
            config,
            allocator,
            slot_size,
            slots_per_page,
            slots_per_batch,
            inner: SpinLock::new(PoolInner {
                segments: Vec::new(),
                free: Vec::new(),
                in_use: 0,
            }),
            constructed: AtomicUsize::new(0),
        }
    }

    /// 池名称
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 池配置
    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// 取得一个处于初始状态的对象
    ///
    /// 池为空时按批次扩容；后备区域耗尽时返回 [`crate::MmError::OutOfMemory`]。
    pub fn acquire(&self) -> MmResult<PoolRef<T>> {
        let (segment, offset, index) = {
            let mut inner = self.inner.lock();
            if inner.free.is_empty() {
                self.grow(&mut inner)?;
            }
            let Some(index) = inner.free.pop() else {
                unreachable!("pool {}: empty after growth", self.name);
            };
            inner.in_use += 1;
            let seg = index / self.slots_per_batch;
            (inner.segments[seg].clone(), index % self.slots_per_batch, index)
        };

        let slot = segment.slot(offset);
        let was_in_use = slot.in_use.swap(true, Ordering::AcqRel);
        assert!(!was_in_use, "pool {}: slot {} handed out twice", self.name, index);

        let mut fresh = false;
        let object = slot.object.call_once(|| {
            fresh = true;
            self.constructed.fetch_add(1, Ordering::Relaxed);
            T::construct()
        });
        if !fresh {
            object.reset();
        }

        let generation = slot.generation.load(Ordering::Acquire);
        Ok(PoolRef {
            segment,
            offset,
            index,
            generation,
        })
    }

    /// 归还对象
    ///
    /// 对象持有的外部资源（页、子对象）必须已由调用者释放。
    ///
    /// # Panics
    /// 重复释放、释放过期句柄或释放不属于本池的句柄时 panic。
    pub fn release(&self, obj: PoolRef<T>) {
        let mut inner = self.inner.lock();
        let seg = obj.index / self.slots_per_batch;
        let owned = inner
            .segments
            .get(seg)
            .is_some_and(|s| Arc::ptr_eq(s, &obj.segment));
        assert!(owned, "pool {}: release of foreign slot {}", self.name, obj.index);

        let slot = obj.slot();
        assert!(
            slot.in_use.load(Ordering::Acquire),
            "pool {}: double release of slot {}",
            self.name,
            obj.index
        );
        assert!(
            slot.generation.load(Ordering::Acquire) == obj.generation,
            "pool {}: stale release of slot {}",
            self.name,
            obj.index
        );

        slot.generation.fetch_add(1, Ordering::AcqRel);
        slot.in_use.store(false, Ordering::Release);
        inner.free.push(obj.index);
        inner.in_use -= 1;
    }

    /// 所有正在使用的槽位的句柄
    pub fn in_use_refs(&self) -> Vec<PoolRef<T>> {
        let inner = self.inner.lock();
        let mut refs = Vec::with_capacity(inner.in_use);
        for (seg_no, segment) in inner.segments.iter().enumerate() {
            for (offset, slot) in segment.slots().enumerate() {
                if slot.in_use.load(Ordering::Acquire) {
                    refs.push(PoolRef {
                        segment: segment.clone(),
                        offset,
                        index: seg_no * self.slots_per_batch + offset,
                        generation: slot.generation.load(Ordering::Acquire),
                    });
                }
            }
        }
        refs
    }

    /// 在没有槽位被占用时把全部段摘下，返回摘下的后备页数
    ///
    /// 仍有槽位在使用时不做任何事并返回 0。没有外部句柄引用的段立即归还
    /// 后备页，其余的段在最后一个句柄 drop 时归还。
    pub fn shrink(&self) -> usize {
        let mut inner = self.inner.lock();
        if inner.in_use != 0 {
            log::warn!(
                "pool {}: shrink skipped, {} slots still in use",
                self.name,
                inner.in_use
            );
            return 0;
        }
        let pages = inner.segments.iter().map(|s| s.pages.len()).sum();
        let pinned = inner
            .segments
            .iter()
            .filter(|s| Arc::strong_count(s) > 1)
            .count();
        if pinned != 0 {
            log::debug!(
                "pool {}: {} segment(s) outlive shrink through stale handles",
                self.name,
                pinned
            );
        }
        inner.segments.clear();
        inner.free.clear();
        pages
    }

    /// 统计信息
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            total_slots: inner.segments.len() * self.slots_per_batch,
            in_use: inner.in_use,
            free: inner.free.len(),
            constructed: self.constructed.load(Ordering::Relaxed),
            backing_pages: inner.segments.iter().map(|s| s.pages.len()).sum(),
            slot_size: self.slot_size,
        }
    }

    fn grow(&self, inner: &mut PoolInner<T>) -> MmResult<()> {
        let pages = self
            .allocator
            .alloc_pages(self.config.batch_pages, Some(self.config.zone))?;

        let base = inner.segments.len() * self.slots_per_batch;
        inner
            .segments
            .push(Arc::new(Segment::new(pages, self.slots_per_page)));
        inner.free.extend((base..base + self.slots_per_batch).rev());

        log::trace!(
            "pool {}: grew to {} slots",
            self.name,
            inner.segments.len() * self.slots_per_batch
        );
        Ok(())
    }
}

impl<T: PoolObject> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::error::MmError;
    use crate::zone::ZoneRegistry;
    use core::sync::atomic::AtomicU64;
    use std::thread;
    use std::vec::Vec as StdVec;

    struct Counter {
        value: AtomicU64,
    }

    impl PoolObject for Counter {
        fn construct() -> Self {
            Counter {
                value: AtomicU64::new(0),
            }
        }

        fn reset(&self) {
            self.value.store(0, Ordering::Relaxed);
        }
    }

    fn allocator(general_pages: usize) -> Arc<PageAllocator> {
        let mut reg = ZoneRegistry::new();
        reg.register_zone(0x10_0000, general_pages * PAGE_SIZE, ZoneTag::General)
            .unwrap();
        reg.register_zone(0x80_0000, 4 * PAGE_SIZE, ZoneTag::Storage)
            .unwrap();
        Arc::new(PageAllocator::new(reg))
    }

    #[test]
    fn test_construct_runs_once_per_slot() {
        let pool: ObjectPool<Counter> = ObjectPool::new("counter", allocator(4), PoolConfig::default());
        let a = pool.acquire().unwrap();
        a.value.store(42, Ordering::Relaxed);
        let idx = a.index();
        pool.release(a);

        let b = pool.acquire().unwrap();
        assert_eq!(b.index(), idx);
        assert_eq!(b.value.load(Ordering::Relaxed), 0);
        assert_eq!(pool.stats().constructed, 1);
        pool.release(b);
    }

    #[test]
    fn test_reuse_without_growth() {
        let pool: ObjectPool<Counter> = ObjectPool::new("counter", allocator(4), PoolConfig::default());
        let a = pool.acquire().unwrap();
        let before = pool.stats();
        pool.release(a);
        for _ in 0..10 {
            let r = pool.acquire().unwrap();
            pool.release(r);
        }
        let after = pool.stats();
        assert_eq!(before.total_slots, after.total_slots);
        assert_eq!(after.backing_pages, 1);
        assert_eq!(after.in_use, 0);
    }

    #[test]
    fn test_batch_growth_and_exhaustion() {
        let pool: ObjectPool<Counter> = ObjectPool::new("counter", allocator(2), PoolConfig::default());
        let per_page = PAGE_SIZE / pool.stats().slot_size;

        let mut held = StdVec::new();
        for _ in 0..per_page * 2 {
            held.push(pool.acquire().unwrap());
        }
        assert_eq!(pool.stats().backing_pages, 2);
        assert_eq!(pool.acquire().unwrap_err(), MmError::OutOfMemory);

        for r in held {
            pool.release(r);
        }
        assert_eq!(pool.shrink(), 2);
        assert_eq!(pool.stats().total_slots, 0);
        assert_eq!(pool.allocator.tag_stats(ZoneTag::General).used, 0);
    }

    #[test]
    fn test_storage_backed_pool() {
        let alloc = allocator(4);
        let config = PoolConfig {
            batch_pages: 2,
            zone: ZoneTag::Storage,
        };
        let pool: ObjectPool<Counter> = ObjectPool::new("counter", alloc.clone(), config);
        let r = pool.acquire().unwrap();
        assert_eq!(alloc.tag_stats(ZoneTag::Storage).used, 2);
        assert_eq!(alloc.tag_stats(ZoneTag::General).used, 0);
        pool.release(r);
    }

    /// 槽位地址落在哪个后备页内
    fn backing_page_of(r: &PoolRef<Counter>) -> Option<&PageFrame> {
        let addr = &**r as *const Counter as usize;
        r.segment.pages.iter().find(|p| {
            let base = p.as_ptr() as usize;
            (base..base + PAGE_SIZE).contains(&addr)
        })
    }

    #[test]
    fn test_slots_live_in_backing_pages() {
        let alloc = allocator(4);
        let config = PoolConfig {
            batch_pages: 2,
            zone: ZoneTag::Storage,
        };
        let pool: ObjectPool<Counter> = ObjectPool::new("counter", alloc.clone(), config);
        let per_page = PAGE_SIZE / pool.stats().slot_size;

        let held: StdVec<_> = (0..per_page + 1).map(|_| pool.acquire().unwrap()).collect();
        for r in &held {
            let page = backing_page_of(r).expect("slot outside its backing pages");
            assert_eq!(page.tag(), ZoneTag::Storage);
            assert_eq!(&**r as *const Counter as usize % crate::config::CACHE_LINE_SIZE, 0);
        }
        // 第一页放满之后，下一个槽位落在第二页
        let first = backing_page_of(&held[0]).unwrap().ppn();
        let next = backing_page_of(&held[per_page]).unwrap().ppn();
        assert_eq!(next, first + 1);

        for r in held {
            pool.release(r);
        }
    }

    #[test]
    fn test_stale_handle_keeps_segment_alive() {
        let alloc = allocator(4);
        let pool: ObjectPool<Counter> = ObjectPool::new("counter", alloc.clone(), PoolConfig::default());
        let r = pool.acquire().unwrap();
        let stale = r.clone();
        pool.release(r);

        assert_eq!(pool.shrink(), 1);
        assert_eq!(pool.stats().backing_pages, 0);
        // 过期句柄仍能安全读取槽位，页尚未归还
        assert!(!stale.is_current());
        assert_eq!(stale.value.load(Ordering::Relaxed), 0);
        assert_eq!(alloc.tag_stats(ZoneTag::General).used, 1);

        drop(stale);
        assert_eq!(alloc.tag_stats(ZoneTag::General).used, 0);
    }

    #[test]
    fn test_shrink_skipped_while_in_use() {
        let pool: ObjectPool<Counter> = ObjectPool::new("counter", allocator(4), PoolConfig::default());
        let r = pool.acquire().unwrap();
        assert_eq!(pool.shrink(), 0);
        assert_eq!(pool.in_use_refs().len(), 1);
        pool.release(r);
        assert_eq!(pool.shrink(), 1);
    }

    #[test]
    #[should_panic(expected = "double release")]
    fn test_double_release_panics() {
        let pool: ObjectPool<Counter> = ObjectPool::new("counter", allocator(4), PoolConfig::default());
        let r = pool.acquire().unwrap();
        let copy = r.clone();
        pool.release(r);
        pool.release(copy);
    }

    #[test]
    #[should_panic(expected = "stale release")]
    fn test_stale_release_panics() {
        let pool: ObjectPool<Counter> = ObjectPool::new("counter", allocator(4), PoolConfig::default());
        let r = pool.acquire().unwrap();
        let stale = r.clone();
        pool.release(r);
        let _again = pool.acquire().unwrap();
        assert!(!stale.is_current());
        pool.release(stale);
    }

    #[test]
    fn test_concurrent_acquire_distinct() {
        let pool: Arc<ObjectPool<Counter>> =
            Arc::new(ObjectPool::new("counter", allocator(64), PoolConfig::default()));
        let handles: StdVec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    let mut mine = StdVec::new();
                    for _ in 0..100 {
                        let r = pool.acquire().unwrap();
                        r.value.fetch_add(1, Ordering::Relaxed);
                        mine.push(r);
                    }
                    mine
                })
            })
            .collect();

        let mut all: StdVec<PoolRef<Counter>> = StdVec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        let mut indices: StdVec<usize> = all.iter().map(|r| r.index()).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 400);
        assert!(all.iter().all(|r| r.value.load(Ordering::Relaxed) == 1));
        for r in all {
            pool.release(r);
        }
        assert_eq!(pool.stats().in_use, 0);
    }
}
