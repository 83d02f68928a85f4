//! 内存管理子系统
//!
//! 提供按能力划分的物理内存区域、区域感知的页分配器以及定长对象池。
//!
//! # 组成
//!
//! - [`ZoneRegistry`]：启动期注册互不重叠的内存区域，注册完成后冻结
//! - [`PageAllocator`]：按区域提示分配页，返回 RAII 的 [`PageFrame`]
//! - [`ObjectPool`]：从指定区域批量取页、复用槽位的 slab 风格对象池
//!
//! # 使用方式
//!
//! ```
//! use mm::{PageAllocator, ZoneRegistry, ZoneTag, PAGE_SIZE};
//!
//! let mut registry = ZoneRegistry::new();
//! registry.register_zone(0x10_0000, 8 * PAGE_SIZE, ZoneTag::General).unwrap();
//! registry.register_zone(0x80_0000, 8 * PAGE_SIZE, ZoneTag::Storage).unwrap();
//!
//! let allocator = PageAllocator::new(registry);
//! let page = allocator.allocate(Some(ZoneTag::Storage)).unwrap();
//! assert_eq!(page.tag(), ZoneTag::Storage);
//! ```

#![no_std]

extern crate alloc;

mod config;
mod error;

pub mod address;
pub mod object_pool;
pub mod page_allocator;
pub mod zone;

pub use address::{Paddr, Ppn};
pub use config::{
    CACHE_LINE_SIZE, DEFAULT_POOL_BATCH_PAGES, MAX_ZONE_PAGES, PAGE_SHIFT, PAGE_SIZE, ZONE_CHUNK_PAGES,
};
pub use error::{MmError, MmResult};
pub use object_pool::{ObjectPool, PoolConfig, PoolObject, PoolRef, PoolStats};
pub use page_allocator::{PageAllocator, PageFrame};
pub use zone::{Zone, ZoneId, ZoneRegistry, ZoneStats, ZoneTag};
