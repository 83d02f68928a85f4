//! 区域隔离与对象池页计数的集成测试

use std::sync::Arc;
use std::thread;

use mm::{MmError, ObjectPool, PAGE_SIZE, PageAllocator, PoolConfig, PoolObject, ZoneRegistry, ZoneTag};

fn allocator(general: usize, storage: usize) -> Arc<PageAllocator> {
    let mut registry = ZoneRegistry::new();
    registry
        .register_zone(0x4000_0000, general * PAGE_SIZE, ZoneTag::General)
        .unwrap();
    registry
        .register_zone(0x8000_0000, storage * PAGE_SIZE, ZoneTag::Storage)
        .unwrap();
    Arc::new(PageAllocator::new(registry))
}

#[test]
fn test_storage_pages_never_come_from_general() {
    let alloc = allocator(32, 4);
    let storage_id = alloc.registry().lookup(ZoneTag::Storage).unwrap();

    let held: Vec<_> = (0..4)
        .map(|_| alloc.allocate(Some(ZoneTag::Storage)).unwrap())
        .collect();
    assert!(held.iter().all(|p| p.zone_id() == storage_id));
    assert_eq!(
        alloc.allocate(Some(ZoneTag::Storage)).unwrap_err(),
        MmError::OutOfMemory
    );

    // 通用区域不受影响
    let general = alloc.allocate(None).unwrap();
    assert_eq!(general.tag(), ZoneTag::General);
    assert_eq!(alloc.tag_stats(ZoneTag::General).free, 31);
}

#[test]
fn test_concurrent_alloc_free_conserves_pages() {
    let alloc = allocator(64, 64);
    let workers: Vec<_> = (0..4)
        .map(|n| {
            let alloc = alloc.clone();
            thread::spawn(move || {
                let tag = if n % 2 == 0 { ZoneTag::General } else { ZoneTag::Storage };
                for _ in 0..200 {
                    let pages = alloc.alloc_pages(8, Some(tag)).unwrap();
                    let mut seen: Vec<_> = pages.iter().map(|p| p.ppn()).collect();
                    seen.sort();
                    seen.dedup();
                    assert_eq!(seen.len(), 8);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    for zone in alloc.registry().zones() {
        let stats = zone.stats();
        assert_eq!(stats.used, 0);
        assert_eq!(stats.free, stats.total);
    }
}

struct Blob {
    bytes: [u8; 200],
}

impl PoolObject for Blob {
    fn construct() -> Self {
        Blob { bytes: [0; 200] }
    }

    fn reset(&self) {}
}

#[test]
fn test_pool_accounts_against_its_zone() {
    let alloc = allocator(1, 8);
    let pool: ObjectPool<Blob> = ObjectPool::new(
        "blob",
        alloc.clone(),
        PoolConfig {
            batch_pages: 1,
            zone: ZoneTag::General,
        },
    );

    let stats = pool.stats();
    assert_eq!(stats.slot_size % mm::CACHE_LINE_SIZE, 0);

    let per_page = PAGE_SIZE / stats.slot_size;
    let held: Vec<_> = (0..per_page).map(|_| pool.acquire().unwrap()).collect();
    assert!(held.iter().all(|b| b.bytes.iter().all(|&x| x == 0)));

    // 通用区域只有一页，池无法继续扩容，存储区保持不变
    assert_eq!(pool.acquire().unwrap_err(), MmError::OutOfMemory);
    assert_eq!(alloc.tag_stats(ZoneTag::Storage).used, 0);

    for b in held {
        pool.release(b);
    }
    assert_eq!(pool.shrink(), 1);
    assert_eq!(alloc.tag_stats(ZoneTag::General).used, 0);
}
