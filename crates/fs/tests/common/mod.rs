//! 共用辅助：为 scmfs 测试注册运行时钩子并建立区域

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicI64, Ordering};

use fs::{FsOps, ScmFs, ScmFsType, register_fs_ops};
use mm::{PAGE_SIZE, PageAllocator, ZoneRegistry, ZoneTag};
use vfs::{FileMode, Inode, TimeSpec};

pub const TEST_UID: u32 = 1000;
pub const TEST_GID: u32 = 100;

struct TestOps {
    clock: AtomicI64,
}

impl FsOps for TestOps {
    fn timespec_now(&self) -> TimeSpec {
        TimeSpec::new(self.clock.fetch_add(1, Ordering::Relaxed) + 1, 0)
    }

    fn current_uid(&self) -> u32 {
        TEST_UID
    }

    fn current_gid(&self) -> u32 {
        TEST_GID
    }
}

static TEST_OPS: TestOps = TestOps {
    clock: AtomicI64::new(0),
};
static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| unsafe { register_fs_ops(&TEST_OPS) });
}

/// 通用区与存储区各自 `general` / `storage` 页
pub fn allocator(general: usize, storage: usize) -> Arc<PageAllocator> {
    init();
    let mut registry = ZoneRegistry::new();
    registry
        .register_zone(0x1000_0000, general * PAGE_SIZE, ZoneTag::General)
        .unwrap();
    registry
        .register_zone(0x4000_0000, storage * PAGE_SIZE, ZoneTag::Storage)
        .unwrap();
    Arc::new(PageAllocator::new(registry))
}

pub fn scmfs(alloc: &Arc<PageAllocator>, options: &str) -> Arc<ScmFs> {
    ScmFsType::storage(alloc.clone()).mount_scmfs(options).unwrap()
}

pub fn mode(bits: u32) -> FileMode {
    FileMode::from_permissions(bits)
}

pub fn nlinks(inode: &Arc<dyn Inode>) -> usize {
    inode.metadata().unwrap().nlinks
}

pub fn read_all(inode: &Arc<dyn Inode>) -> Vec<u8> {
    let size = inode.metadata().unwrap().size;
    let mut buf = vec![0u8; size];
    let n = inode.read_at(0, &mut buf).unwrap();
    buf.truncate(n);
    buf
}
