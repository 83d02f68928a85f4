//! 地址模块
//!
//! 提供物理地址 [`Paddr`] 与物理页号 [`Ppn`] 两个新类型。
//! 区域注册使用物理地址描述范围，分配器内部以页号索引页帧。

use core::fmt;
use core::ops::{Add, Sub};

use crate::config::{PAGE_SHIFT, PAGE_SIZE};

/// 物理地址
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Paddr(usize);

impl Paddr {
    /// 从 usize 构造
    pub const fn from_usize(addr: usize) -> Self {
        Self(addr)
    }

    /// 转换为 usize
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// 是否按页对齐
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// 页内偏移
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl fmt::Debug for Paddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Paddr({:#x})", self.0)
    }
}

/// 物理页号（Physical Page Number）
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ppn(usize);

impl Ppn {
    /// 从 usize 构造
    pub const fn from_usize(ppn: usize) -> Self {
        Self(ppn)
    }

    /// 转换为 usize
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// 将地址转换为页号（向下取整，即包含该地址的页）
    pub const fn from_addr_floor(addr: Paddr) -> Self {
        Self(addr.0 >> PAGE_SHIFT)
    }

    /// 将地址转换为页号（向上取整，未对齐的地址指向下一页）
    ///
    /// 调用者需保证 `addr + PAGE_SIZE - 1` 不溢出。
    pub const fn from_addr_ceil(addr: Paddr) -> Self {
        Self((addr.0 + PAGE_SIZE - 1) >> PAGE_SHIFT)
    }

    /// 页的起始地址
    pub const fn start_addr(self) -> Paddr {
        Paddr(self.0 << PAGE_SHIFT)
    }

    /// 页的结束地址（下一页的起始地址）
    pub const fn end_addr(self) -> Paddr {
        Paddr((self.0 + 1) << PAGE_SHIFT)
    }
}

impl Add<usize> for Ppn {
    type Output = Ppn;

    fn add(self, rhs: usize) -> Ppn {
        Ppn(self.0 + rhs)
    }
}

impl Sub<Ppn> for Ppn {
    type Output = usize;

    fn sub(self, rhs: Ppn) -> usize {
        self.0 - rhs.0
    }
}

impl fmt::Debug for Ppn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ppn({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ppn_start_end_addr() {
        let ppn = Ppn::from_usize(1);
        assert_eq!(ppn.start_addr().as_usize(), 4096);
        assert_eq!(ppn.end_addr().as_usize(), 8192);
    }

    #[test]
    fn test_ppn_from_addr_floor_ceil() {
        let a = Paddr::from_usize(4096);
        assert_eq!(Ppn::from_addr_floor(a).as_usize(), 1);
        assert_eq!(Ppn::from_addr_ceil(a).as_usize(), 1);

        let b = Paddr::from_usize(4097);
        assert_eq!(Ppn::from_addr_floor(b).as_usize(), 1);
        assert_eq!(Ppn::from_addr_ceil(b).as_usize(), 2);
        assert_eq!(b.page_offset(), 1);
        assert!(!b.is_page_aligned());
    }

    #[test]
    fn test_ppn_arith() {
        let p = Ppn::from_usize(10) + 5;
        assert_eq!(p.as_usize(), 15);
        assert_eq!(p - Ppn::from_usize(10), 5);
    }
}
