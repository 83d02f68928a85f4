//! 内存管理配置常量

/// 页大小（字节）
pub const PAGE_SIZE: usize = 4096;

/// 页大小的位移量，`PAGE_SIZE == 1 << PAGE_SHIFT`
pub const PAGE_SHIFT: usize = 12;

/// 缓存行大小，对象池槽位按此对齐
pub const CACHE_LINE_SIZE: usize = 64;

/// 对象池每次扩容默认申请的页数
pub const DEFAULT_POOL_BATCH_PAGES: usize = 1;

/// 区域后备内存的分块大小（页），块在第一次有页被分配时才申请
pub const ZONE_CHUNK_PAGES: usize = 4096;

/// 单个区域最多管理的页数（4 KiB 页时为 16 TiB）
pub const MAX_ZONE_PAGES: usize = (u32::MAX as usize).saturating_add(1);

const _: () = assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
const _: () = assert!(ZONE_CHUNK_PAGES % 64 == 0);
