//! 区域感知的页分配器
//!
//! 分配请求携带一个可选的区域提示（[`ZoneTag`]）：
//!
//! - 没有提示时按 [`ZoneTag::General`] 处理
//! - 依注册顺序尝试所有带该标签的区域，取第一个有空闲页的
//! - **绝不**回退到其他标签的区域：存储区耗尽时即使通用区仍有空闲，也返回
//!   [`MmError::OutOfMemory`]
//!
//! ## RAII：自动回收
//!
//! 分配得到的 [`PageFrame`] 在 `Drop` 时把页归还给来源区域，所以一个页帧
//! 只可能被释放一次。需要脱离 RAII 管理时（例如交给外部代码持有原始页号），
//! 使用 [`PageFrame::into_raw`] 与 [`PageAllocator::free_raw`]，后者在重复
//! 释放时 panic。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::mem::ManuallyDrop;

use crate::address::Ppn;
use crate::config::PAGE_SIZE;
use crate::error::{MmError, MmResult};
use crate::zone::{Zone, ZoneId, ZoneRegistry, ZoneStats, ZoneTag};

// ============================================================================
// PageFrame - 单页 RAII 封装
// ============================================================================

/// 已分配的页帧
///
/// 页内容在分配时被清零。当此结构体被 drop 时，页会被自动归还给来源区域。
pub struct PageFrame {
    zone: Arc<Zone>,
    index: usize,
}

impl PageFrame {
    /// 物理页号
    pub fn ppn(&self) -> Ppn {
        self.zone.start_ppn() + self.index
    }

    /// 来源区域编号
    pub fn zone_id(&self) -> ZoneId {
        self.zone.id()
    }

    /// 来源区域标签
    pub fn tag(&self) -> ZoneTag {
        self.zone.tag()
    }

    /// 以只读字节切片访问页内容
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: 页在 self 存活期间只属于 self
        unsafe { core::slice::from_raw_parts(self.zone.page_ptr(self.index), PAGE_SIZE) }
    }

    /// 以可写字节切片访问页内容
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: 同上，且 &mut self 保证独占
        unsafe { core::slice::from_raw_parts_mut(self.zone.page_ptr(self.index), PAGE_SIZE) }
    }

    /// 页的起始地址，页在 self 存活期间保持有效
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.zone.page_ptr(self.index)
    }

    /// 将页内容清零
    pub fn zero(&mut self) {
        self.as_bytes_mut().fill(0);
    }

    /// 放弃 RAII 管理，返回物理页号
    ///
    /// 之后必须通过 [`PageAllocator::free_raw`] 释放该页，否则页会泄漏。
    pub fn into_raw(self) -> Ppn {
        let ppn = self.ppn();
        let this = ManuallyDrop::new(self);
        // SAFETY: this 不会再被 drop，zone 的所有权只被取出一次
        drop(unsafe { core::ptr::read(&this.zone) });
        ppn
    }
}

impl Drop for PageFrame {
    fn drop(&mut self) {
        self.zone.free_index(self.index);
    }
}

impl fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageFrame")
            .field("ppn", &self.ppn())
            .field("zone", &self.zone.id())
            .field("tag", &self.zone.tag())
            .finish()
    }
}

// ============================================================================
// PageAllocator
// ============================================================================

/// 区域感知的页分配器
///
/// 持有冻结后的 [`ZoneRegistry`]，可在多个子系统之间通过 `Arc` 共享。
#[derive(Debug)]
pub struct PageAllocator {
    registry: Arc<ZoneRegistry>,
}

impl PageAllocator {
    /// 基于已完成注册的区域表创建分配器
    pub fn new(registry: ZoneRegistry) -> Self {
        Self::from_shared(Arc::new(registry))
    }

    /// 基于共享的区域表创建分配器
    pub fn from_shared(registry: Arc<ZoneRegistry>) -> Self {
        if registry.zones().next().is_none() {
            log::warn!("mm: page allocator created without any zone");
        }
        Self { registry }
    }

    /// 区域注册表
    pub fn registry(&self) -> &ZoneRegistry {
        &self.registry
    }

    /// 分配一页
    ///
    /// `hint` 为 `None` 时使用 [`ZoneTag::General`]。
    ///
    /// # 错误
    /// - 没有任何区域带有该标签：[`MmError::NoSuchZone`]
    /// - 所有匹配区域均已耗尽：[`MmError::OutOfMemory`]
    pub fn allocate(&self, hint: Option<ZoneTag>) -> MmResult<PageFrame> {
        let tag = hint.unwrap_or(ZoneTag::General);
        let mut matched = false;
        for zone in self.registry.zones_tagged(tag) {
            matched = true;
            if let Some(index) = zone.alloc_index() {
                return Ok(PageFrame {
                    zone: zone.clone(),
                    index,
                });
            }
        }
        if matched {
            log::debug!("mm: {} zones exhausted", tag);
            Err(MmError::OutOfMemory)
        } else {
            Err(MmError::NoSuchZone)
        }
    }

    /// 分配多页（不要求连续）
    ///
    /// 全部成功或全部失败：中途失败时已分配的页会被立即归还。
    pub fn alloc_pages(&self, num: usize, hint: Option<ZoneTag>) -> MmResult<Vec<PageFrame>> {
        let mut frames = Vec::with_capacity(num);
        for _ in 0..num {
            frames.push(self.allocate(hint)?);
        }
        Ok(frames)
    }

    /// 显式释放一页，等价于 drop
    pub fn free(&self, frame: PageFrame) {
        drop(frame);
    }

    /// 释放一个通过 [`PageFrame::into_raw`] 取出的页
    ///
    /// # Safety
    /// 调用者不得再访问该页的内容。
    ///
    /// # Panics
    /// 页号不属于任何区域，或该页已经是空闲状态（重复释放）时 panic。
    pub unsafe fn free_raw(&self, ppn: Ppn) {
        let zone = self
            .registry
            .zone_of(ppn)
            .unwrap_or_else(|| panic!("mm: free of {:?} outside every zone", ppn));
        zone.free_index(ppn - zone.start_ppn());
    }

    /// 指定区域的统计信息
    pub fn stats(&self, id: ZoneId) -> Option<ZoneStats> {
        self.registry.stats(id)
    }

    /// 指定标签所有区域的统计之和
    pub fn tag_stats(&self, tag: ZoneTag) -> ZoneStats {
        self.registry.tag_stats(tag)
    }
}
