//! 内存区域（Zone）与区域注册表
//!
//! 物理内存被划分为若干互不重叠的区域，每个区域带有一个能力标签：
//!
//! - [`ZoneTag::General`]：通用内存，供内核/用户的普通分配使用
//! - [`ZoneTag::Storage`]：存储级内存，只承载文件数据页
//!
//! ## 注册约定
//!
//! [`ZoneRegistry`] 是显式构造的对象，而不是全局可变状态。注册只能在系统启动阶段
//! 通过 `&mut self` 完成；注册表被包进 `Arc` 交给分配器之后，区域集合即被冻结，
//! 此后只有各区域内部的空闲/已用计数会变化。
//!
//! ## 空闲链表
//!
//! 每个区域维护：
//!
//! - **next**：从未分配过的页从这里顺序取出
//! - **recycled**：释放后待复用的页索引栈，分配与释放均为 O(1)
//! - **bitmap**：每块一张，每个 bit 表示一页的状态（0=空闲，1=已分配），
//!   用于检测重复释放和链表损坏
//!
//! ## 后备内存
//!
//! 区域覆盖的内存按 [`ZONE_CHUNK_PAGES`] 页分块，某块第一次有页被分配时才向宿主
//! 申请并清零。注册一个很大的区域只需要块表本身的空间；块表都无法分配，或页数
//! 超过 [`MAX_ZONE_PAGES`] 时注册返回 [`MmError::ZoneTooLarge`]。
//!
//! 页大小固定，不做拆分与合并，因此无需碎片整理。

use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use sync::SpinLock;

use crate::address::{Paddr, Ppn};
use crate::config::{MAX_ZONE_PAGES, PAGE_SIZE, ZONE_CHUNK_PAGES};
use crate::error::{MmError, MmResult};

/// 区域的能力标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ZoneTag {
    /// 通用内存
    General,
    /// 存储级（类持久内存）内存
    Storage,
}

impl ZoneTag {
    /// 标签名称
    pub fn as_str(self) -> &'static str {
        match self {
            ZoneTag::General => "general",
            ZoneTag::Storage => "storage",
        }
    }
}

impl fmt::Display for ZoneTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 区域编号，即注册顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(usize);

impl ZoneId {
    /// 转换为 usize
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// 区域统计信息（单位：页）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneStats {
    /// 总页数
    pub total: usize,
    /// 空闲页数
    pub free: usize,
    /// 已分配页数
    pub used: usize,
}

/// 区域的后备存储
///
/// 模拟该区域覆盖的物理内存，按块惰性申请，随区域一起释放。
struct ZoneMemory {
    chunks: Box<[AtomicPtr<u8>]>,
    total: usize,
}

impl ZoneMemory {
    fn new(total: usize) -> MmResult<Self> {
        let count = total.div_ceil(ZONE_CHUNK_PAGES);
        let mut chunks = Vec::new();
        chunks
            .try_reserve_exact(count)
            .map_err(|_| MmError::ZoneTooLarge)?;
        chunks.resize_with(count, || AtomicPtr::new(ptr::null_mut()));
        Ok(Self {
            chunks: chunks.into_boxed_slice(),
            total,
        })
    }

    /// 块的页数，最后一块可能不满
    fn chunk_pages(&self, chunk: usize) -> usize {
        (self.total - chunk * ZONE_CHUNK_PAGES).min(ZONE_CHUNK_PAGES)
    }

    fn chunk_layout(&self, chunk: usize) -> Layout {
        // SAFETY: 大小为非零的整页数且不超过一个块，对齐为 2 的幂
        unsafe { Layout::from_size_align_unchecked(self.chunk_pages(chunk) * PAGE_SIZE, PAGE_SIZE) }
    }

    /// 为块申请清零的后备内存，宿主内存不足时返回 false
    ///
    /// 调用者必须持有区域的空闲链表锁。
    fn back_chunk(&self, chunk: usize) -> bool {
        if !self.chunks[chunk].load(Ordering::Acquire).is_null() {
            return true;
        }
        // SAFETY: layout 大小非零
        let mem = unsafe { alloc_zeroed(self.chunk_layout(chunk)) };
        if mem.is_null() {
            return false;
        }
        self.chunks[chunk].store(mem, Ordering::Release);
        true
    }

    /// 已有后备内存的页数
    fn resident_pages(&self) -> usize {
        (0..self.chunks.len())
            .filter(|&c| !self.chunks[c].load(Ordering::Acquire).is_null())
            .map(|c| self.chunk_pages(c))
            .sum()
    }

    fn page_ptr(&self, idx: usize) -> *mut u8 {
        let base = self.chunks[idx / ZONE_CHUNK_PAGES].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "page {} has no backing memory", idx);
        // SAFETY: 页所在的块已有后备内存，块内偏移不越界
        unsafe { base.add((idx % ZONE_CHUNK_PAGES) * PAGE_SIZE) }
    }
}

impl Drop for ZoneMemory {
    fn drop(&mut self) {
        for (chunk, mem) in self.chunks.iter().enumerate() {
            let mem = mem.load(Ordering::Acquire);
            if !mem.is_null() {
                // SAFETY: mem 由 back_chunk 以相同的 layout 申请，只在此处释放一次
                unsafe { dealloc(mem, self.chunk_layout(chunk)) };
            }
        }
    }
}

// SAFETY: ZoneMemory 只是若干块堆内存的所有权；各页的访问互斥由空闲链表保证
// （同一页同一时刻只会被交给一个 PageFrame）。
unsafe impl Send for ZoneMemory {}
unsafe impl Sync for ZoneMemory {}

/// 区域内的空闲链表状态，由自旋锁保护
struct ZoneFreeList {
    /// 每块一张位图（0=空闲，1=已分配），块有后备内存之后才创建
    bitmaps: Vec<Option<Box<[u64]>>>,
    /// 释放后待复用的页索引栈
    recycled: Vec<usize>,
    /// 下一个从未分配过的页
    next: usize,
    /// 已分配页数
    used: usize,
}

impl ZoneFreeList {
    fn new(total: usize) -> MmResult<Self> {
        let count = total.div_ceil(ZONE_CHUNK_PAGES);
        let mut bitmaps = Vec::new();
        bitmaps
            .try_reserve_exact(count)
            .map_err(|_| MmError::ZoneTooLarge)?;
        bitmaps.resize_with(count, || None);
        Ok(Self {
            bitmaps,
            recycled: Vec::new(),
            next: 0,
            used: 0,
        })
    }

    #[inline]
    fn locate(idx: usize) -> (usize, usize, u64) {
        let local = idx % ZONE_CHUNK_PAGES;
        (idx / ZONE_CHUNK_PAGES, local / 64, 1u64 << (local % 64))
    }

    #[inline]
    fn is_allocated(&self, idx: usize) -> bool {
        let (chunk, word, mask) = Self::locate(idx);
        self.bitmaps[chunk]
            .as_ref()
            .is_some_and(|bits| bits[word] & mask != 0)
    }

    #[inline]
    fn set_allocated(&mut self, idx: usize, allocated: bool) {
        let (chunk, word, mask) = Self::locate(idx);
        if let Some(bits) = self.bitmaps[chunk].as_mut() {
            if allocated {
                bits[word] |= mask;
            } else {
                bits[word] &= !mask;
            }
        }
    }
}

/// 一个已注册的内存区域
pub struct Zone {
    id: ZoneId,
    tag: ZoneTag,
    /// 注册时给出的原始范围
    base: Paddr,
    len: usize,
    /// 对齐到页边界后的可用页范围 [start, start + total)
    start: Ppn,
    total: usize,
    memory: ZoneMemory,
    free_list: SpinLock<ZoneFreeList>,
}

impl Zone {
    /// 区域编号
    pub fn id(&self) -> ZoneId {
        self.id
    }

    /// 能力标签
    pub fn tag(&self) -> ZoneTag {
        self.tag
    }

    /// 注册时的起始地址
    pub fn base(&self) -> Paddr {
        self.base
    }

    /// 注册时的字节长度
    pub fn len(&self) -> usize {
        self.len
    }

    /// 区域是否不含任何页（注册成功的区域总是非空）
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// 第一个可用页的页号
    pub fn start_ppn(&self) -> Ppn {
        self.start
    }

    /// 总页数
    pub fn total_pages(&self) -> usize {
        self.total
    }

    /// 页号是否落在本区域内
    pub fn contains(&self, ppn: Ppn) -> bool {
        ppn >= self.start && ppn < self.start + self.total
    }

    /// 获取区域当前的统计信息
    pub fn stats(&self) -> ZoneStats {
        let list = self.free_list.lock();
        let stats = ZoneStats {
            total: self.total,
            free: self.total - list.used,
            used: list.used,
        };
        debug_assert_eq!(stats.free + stats.used, stats.total);
        stats
    }

    /// 已有后备内存的页数
    pub fn resident_pages(&self) -> usize {
        let _list = self.free_list.lock();
        self.memory.resident_pages()
    }

    /// 取出一页并清零，返回页索引
    ///
    /// 优先复用最近释放的页，否则取下一个从未分配过的页。
    pub(crate) fn alloc_index(&self) -> Option<usize> {
        let idx = {
            let mut list = self.free_list.lock();
            let idx = match list.recycled.pop() {
                Some(idx) => idx,
                None if list.next < self.total => {
                    let idx = list.next;
                    let chunk = idx / ZONE_CHUNK_PAGES;
                    if list.bitmaps[chunk].is_none() {
                        if !self.memory.back_chunk(chunk) {
                            log::warn!("zone {}: no host memory for chunk {}", self.id.0, chunk);
                            return None;
                        }
                        list.bitmaps[chunk] =
                            Some(alloc::vec![0u64; ZONE_CHUNK_PAGES / 64].into_boxed_slice());
                    }
                    list.next += 1;
                    idx
                }
                None => return None,
            };
            assert!(
                !list.is_allocated(idx),
                "zone {}: free list corrupted, page {} already allocated",
                self.id.0,
                idx
            );
            list.set_allocated(idx, true);
            list.used += 1;
            idx
        };
        // 该页已从空闲链表中摘下，此时只有调用者能访问它
        // SAFETY: idx < total，页所在的块已有后备内存
        unsafe { ptr::write_bytes(self.page_ptr(idx), 0, PAGE_SIZE) };
        Some(idx)
    }

    /// 将页索引归还空闲链表
    ///
    /// # Panics
    /// 页已处于空闲状态时（重复释放）panic。
    pub(crate) fn free_index(&self, idx: usize) {
        assert!(idx < self.total, "zone {}: page index {} out of range", self.id.0, idx);
        let mut list = self.free_list.lock();
        assert!(
            list.is_allocated(idx),
            "zone {}: double free detected for {:?}",
            self.id.0,
            self.start + idx
        );
        list.set_allocated(idx, false);
        list.used -= 1;
        list.recycled.push(idx);
    }

    /// 页索引对应的内存地址，页必须处于已分配状态
    pub(crate) fn page_ptr(&self, idx: usize) -> *mut u8 {
        debug_assert!(idx < self.total);
        self.memory.page_ptr(idx)
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("base", &self.base)
            .field("len", &self.len)
            .field("pages", &self.total)
            .finish()
    }
}

/// 区域注册表
///
/// 描述系统中所有内存区域的表。构造后在启动阶段逐个注册区域，
/// 然后包进 `Arc` 交给 [`crate::PageAllocator`]，此后不再允许注册。
#[derive(Debug, Default)]
pub struct ZoneRegistry {
    zones: Vec<Arc<Zone>>,
}

impl ZoneRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self { zones: Vec::new() }
    }

    /// 注册一个区域
    ///
    /// 范围 `[base, base + len)` 会向内对齐到页边界。
    ///
    /// # 错误
    /// - 与已注册区域的地址范围重叠：[`MmError::ZoneOverlap`]
    /// - 对齐后不足一页：[`MmError::ZoneTooSmall`]
    /// - `base + len` 溢出：[`MmError::InvalidRange`]
    /// - 页数超过 [`MAX_ZONE_PAGES`] 或簿记结构无法分配：[`MmError::ZoneTooLarge`]
    pub fn register_zone(&mut self, base: usize, len: usize, tag: ZoneTag) -> MmResult<ZoneId> {
        let end = base.checked_add(len).ok_or(MmError::InvalidRange)?;
        if base.checked_add(PAGE_SIZE - 1).is_none() {
            return Err(MmError::InvalidRange);
        }

        if let Some(other) = self
            .zones
            .iter()
            .find(|z| base < z.base.as_usize() + z.len && z.base.as_usize() < end)
        {
            log::warn!(
                "mm: zone [{:#x}, {:#x}) overlaps zone {} ({:?})",
                base,
                end,
                other.id.0,
                other
            );
            return Err(MmError::ZoneOverlap);
        }

        let start = Ppn::from_addr_ceil(Paddr::from_usize(base));
        let stop = Ppn::from_addr_floor(Paddr::from_usize(end));
        if stop <= start {
            return Err(MmError::ZoneTooSmall);
        }
        let total = stop - start;
        if total > MAX_ZONE_PAGES {
            log::warn!(
                "mm: zone [{:#x}, {:#x}) has {} pages, limit is {}",
                base,
                end,
                total,
                MAX_ZONE_PAGES
            );
            return Err(MmError::ZoneTooLarge);
        }
        let memory = ZoneMemory::new(total)?;
        let free_list = ZoneFreeList::new(total)?;

        let id = ZoneId(self.zones.len());
        self.zones.push(Arc::new(Zone {
            id,
            tag,
            base: Paddr::from_usize(base),
            len,
            start,
            total,
            memory,
            free_list: SpinLock::new(free_list),
        }));

        log::info!(
            "mm: registered {} zone {} at [{:#x}, {:#x}), {} pages",
            tag,
            id.0,
            base,
            end,
            total
        );
        Ok(id)
    }

    /// 查找第一个带有指定标签的区域
    pub fn lookup(&self, tag: ZoneTag) -> Option<ZoneId> {
        self.zones.iter().find(|z| z.tag == tag).map(|z| z.id)
    }

    /// 查询区域统计信息
    pub fn stats(&self, id: ZoneId) -> Option<ZoneStats> {
        self.zone(id).map(|z| z.stats())
    }

    /// 按编号获取区域
    pub fn zone(&self, id: ZoneId) -> Option<&Arc<Zone>> {
        self.zones.get(id.0)
    }

    /// 遍历所有区域（按注册顺序）
    pub fn zones(&self) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.iter()
    }

    /// 遍历带有指定标签的区域
    pub fn zones_tagged(&self, tag: ZoneTag) -> impl Iterator<Item = &Arc<Zone>> {
        self.zones.iter().filter(move |z| z.tag == tag)
    }

    /// 指定标签的所有区域的统计之和
    pub fn tag_stats(&self, tag: ZoneTag) -> ZoneStats {
        self.zones_tagged(tag).fold(
            ZoneStats {
                total: 0,
                free: 0,
                used: 0,
            },
            |acc, z| {
                let s = z.stats();
                ZoneStats {
                    total: acc.total + s.total,
                    free: acc.free + s.free,
                    used: acc.used + s.used,
                }
            },
        )
    }

    /// 查找包含指定页号的区域
    pub fn zone_of(&self, ppn: Ppn) -> Option<&Arc<Zone>> {
        self.zones.iter().find(|z| z.contains(ppn))
    }
}
