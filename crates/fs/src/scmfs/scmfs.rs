//! ScmFs 超级块与文件系统类型
//!
//! 一个 [`ScmFsType`] 描述数据页的来源区域（`scmfs` 用存储区，`ramfs` 用通用区），
//! 每次挂载创建一个 [`ScmFs`] 实例，实例独占自己的节点池、inode 编号空间与容量计数。
//!
//! ## 卸载
//!
//! 卸载会独占挂载闸门（`alive`），等待正在执行的操作结束后：
//!
//! 1. 从根目录出发遍历整棵树，释放每个节点的数据页并把节点归还到池
//! 2. 清扫池中剩余的在用槽位（已删除但仍被打开的节点）
//! 3. 收缩节点池，摘下全部后备页
//!
//! 卸载之后仍存活的句柄对任何操作都返回 [`FsError::StaleHandle`]，drop 时不做任何事。
//! 节点直接存放在池的后备页里，这些句柄会让所在的页一直保留到它们被 drop，
//! 数据页则在卸载时立即归还。
//!
//! 挂载闸门是读者优先的读写锁：只要还有操作持续进入，卸载就可能一直等不到写锁。
//! 卸载前应先让调用方停止发起新操作。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use mm::{MmError, ObjectPool, PAGE_SIZE, PageAllocator, PageFrame, PoolConfig, PoolStats, ZoneStats, ZoneTag};
use sync::{RwLock, RwLockReadGuard, SpinLock};
use uapi::magic::{RAMFS_MAGIC, SCMFS_MAGIC};
use vfs::{FileMode, FileSystem, FileSystemType, FsError, Inode, InodeMetadata, InodeType, StatFs};

use super::inode::ScmInode;
use super::node::{NodeContent, NodeRef, NodeState, ScmNode};
use super::options::MountOptions;
use crate::ops::fs_ops;

/// 文件名最大长度
pub const MAX_NAME_LEN: usize = 255;

/// 根目录的 inode 编号
pub const ROOT_INO: usize = 1;

pub(super) fn map_mm_error(err: MmError) -> FsError {
    log::debug!("scmfs: allocation failed: {}", err);
    FsError::NoSpace
}

/// 已挂载实例的共享状态
pub(crate) struct ScmFsInner {
    pub(super) name: &'static str,
    pub(super) magic: u64,
    pub(super) fsid: u64,
    pub(super) options: MountOptions,
    pub(super) data_zone: ZoneTag,
    pub(super) allocator: Arc<PageAllocator>,
    pub(super) pool: ObjectPool<ScmNode>,
    /// 已占用的数据页数
    data_pages: SpinLock<usize>,
    next_ino: AtomicUsize,
    /// 挂载闸门，false 表示已卸载
    alive: RwLock<bool>,
    /// 卸载时取走
    root: SpinLock<Option<NodeRef>>,
}

impl ScmFsInner {
    /// 进入挂载闸门，已卸载时返回 [`FsError::StaleHandle`]
    pub(super) fn enter(&self) -> Result<RwLockReadGuard<'_, bool>, FsError> {
        let guard = self.alive.read();
        if *guard { Ok(guard) } else { Err(FsError::StaleHandle) }
    }

    pub(super) fn alloc_ino(&self) -> usize {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    /// 从池中取出一个节点并填写元数据
    pub(super) fn alloc_node(
        &self,
        inode_type: InodeType,
        mode: FileMode,
        uid: u32,
        gid: u32,
        rdev: u64,
        content: NodeContent,
    ) -> Result<NodeRef, FsError> {
        let node = self.pool.acquire().map_err(map_mm_error)?;
        let now = fs_ops().timespec_now();
        let size = match &content {
            NodeContent::Symlink { target } => target.len(),
            _ => 0,
        };
        node.init(
            InodeMetadata {
                inode_no: self.alloc_ino(),
                inode_type,
                mode: inode_type.mode_bits() | mode.permissions(),
                uid,
                gid,
                size,
                atime: now,
                mtime: now,
                ctime: now,
                nlinks: if inode_type == InodeType::Directory { 2 } else { 1 },
                blocks: 0,
                rdev,
            },
            content,
        );
        Ok(node)
    }

    /// 预留一个数据页的容量
    fn reserve_page(&self) -> Result<(), FsError> {
        let mut used = self.data_pages.lock();
        let max = self.options.max_pages;
        if max != 0 && *used >= max {
            log::debug!("{}: capacity of {} pages reached", self.name, max);
            return Err(FsError::NoSpace);
        }
        *used += 1;
        Ok(())
    }

    /// 分配一个数据页（计入容量）
    pub(super) fn alloc_data_page(&self) -> Result<PageFrame, FsError> {
        self.reserve_page()?;
        match self.allocator.allocate(Some(self.data_zone)) {
            Ok(frame) => Ok(frame),
            Err(e) => {
                self.unaccount_pages(1);
                Err(map_mm_error(e))
            }
        }
    }

    /// 归还容量计数
    pub(super) fn unaccount_pages(&self, num: usize) {
        if num == 0 {
            return;
        }
        let mut used = self.data_pages.lock();
        debug_assert!(*used >= num);
        *used = used.saturating_sub(num);
    }

    pub(super) fn used_pages(&self) -> usize {
        *self.data_pages.lock()
    }

    /// 释放一个已不可达的节点：内容、数据页与池槽位
    ///
    /// 调用者必须已把节点状态置为 [`NodeState::Reclaimed`]，且不持有任何目录锁。
    pub(super) fn reclaim(&self, node: &NodeRef) {
        let content = core::mem::replace(&mut *node.content.lock(), NodeContent::Empty);
        let pages = content.page_count();
        if let NodeContent::Directory { entries } = &content {
            debug_assert!(entries.is_empty());
        }
        drop(content);
        self.unaccount_pages(pages);
        log::trace!("{}: reclaimed inode {} ({} pages)", self.name, node.ino(), pages);
        self.pool.release(node.clone());
    }

    /// 为根目录创建句柄
    fn root_handle(self: &Arc<Self>) -> Result<ScmInode, FsError> {
        let _alive = self.enter()?;
        let root = self.root.lock().clone().ok_or(FsError::StaleHandle)?;
        Ok(ScmInode::new(self.clone(), root))
    }

    /// 卸载：拆除整棵树并使全部句柄失效
    fn teardown(&self) -> Result<(), FsError> {
        let mut alive = self.alive.write();
        if !*alive {
            return Err(FsError::StaleHandle);
        }
        *alive = false;

        let mut reached = 0usize;
        let mut pages = 0usize;

        // 遍历可达的树，硬链接指向的节点只处理一次
        let mut stack: Vec<NodeRef> = Vec::new();
        if let Some(root) = self.root.lock().take() {
            root.meta.lock().state = NodeState::Reclaimed;
            stack.push(root);
        }
        while let Some(node) = stack.pop() {
            let content = core::mem::replace(&mut *node.content.lock(), NodeContent::Empty);
            pages += content.page_count();
            if let NodeContent::Directory { entries } = content {
                for child in entries.into_values() {
                    let mut meta = child.meta.lock();
                    if meta.state == NodeState::Live {
                        meta.state = NodeState::Reclaimed;
                        drop(meta);
                        stack.push(child);
                    }
                }
            }
            reached += 1;
            self.pool.release(node);
        }

        // 已删除但仍被打开的节点不在树中
        let orphans = self.pool.in_use_refs();
        let orphan_count = orphans.len();
        for node in orphans {
            node.meta.lock().state = NodeState::Reclaimed;
            let content = core::mem::replace(&mut *node.content.lock(), NodeContent::Empty);
            pages += content.page_count();
            drop(content);
            self.pool.release(node);
        }

        self.unaccount_pages(pages);
        let leaked = self.used_pages();
        if leaked != 0 {
            log::error!("{}: {} data pages unaccounted after teardown", self.name, leaked);
        }
        let backing = self.pool.shrink();

        log::info!(
            "{}: unmounted, released {} nodes ({} orphaned), {} data pages, {} pool pages",
            self.name,
            reached + orphan_count,
            orphan_count,
            pages,
            backing
        );
        Ok(())
    }
}

impl Drop for ScmFsInner {
    fn drop(&mut self) {
        // 未经 umount 直接丢弃的实例，此时已不存在任何句柄
        if *self.alive.get_mut() {
            let _ = self.teardown();
        }
    }
}

/// 占用情况快照
#[derive(Debug, Clone, Copy)]
pub struct ScmFsUsage {
    /// 已占用的数据页数
    pub data_pages: usize,
    /// 数据页上限，0 表示不限
    pub max_pages: usize,
    /// 节点池统计
    pub pool: PoolStats,
    /// 数据区域统计
    pub data_zone: ZoneStats,
    /// 节点池后备区域统计
    pub node_zone: ZoneStats,
}

/// 已挂载的 ScmFs 实例
pub struct ScmFs {
    inner: Arc<ScmFsInner>,
}

impl ScmFs {
    /// 以默认选项创建一个实例
    pub fn new(fs_type: &ScmFsType) -> Result<Arc<Self>, FsError> {
        Self::with_options(fs_type, MountOptions::default())
    }

    /// 以给定选项创建一个实例
    pub fn with_options(fs_type: &ScmFsType, options: MountOptions) -> Result<Arc<Self>, FsError> {
        let allocator = fs_type.allocator.clone();
        let registry = allocator.registry();
        if registry.lookup(fs_type.data_zone).is_none() {
            log::error!("{}: no {} zone registered", fs_type.name, fs_type.data_zone);
            return Err(FsError::NoDevice);
        }
        if registry.lookup(options.inode_zone).is_none() {
            log::error!("{}: no {} zone for the node pool", fs_type.name, options.inode_zone);
            return Err(FsError::NoDevice);
        }

        let pool = ObjectPool::<ScmNode>::new(
            fs_type.name,
            allocator.clone(),
            PoolConfig {
                batch_pages: options.pool_batch,
                zone: options.inode_zone,
            },
        );
        let root = pool.acquire().map_err(map_mm_error)?;
        let now = fs_ops().timespec_now();
        root.init(
            InodeMetadata {
                inode_no: ROOT_INO,
                inode_type: InodeType::Directory,
                mode: FileMode::S_IFDIR | FileMode::from_permissions(options.mode),
                uid: fs_ops().current_uid(),
                gid: fs_ops().current_gid(),
                size: 0,
                atime: now,
                mtime: now,
                ctime: now,
                nlinks: 2,
                blocks: 0,
                rdev: 0,
            },
            NodeContent::Directory {
                entries: Default::default(),
            },
        );

        let inner = Arc::new(ScmFsInner {
            name: fs_type.name,
            magic: fs_type.magic,
            fsid: fs_type.next_fsid.fetch_add(1, Ordering::Relaxed),
            options,
            data_zone: fs_type.data_zone,
            allocator,
            pool,
            data_pages: SpinLock::new(0),
            next_ino: AtomicUsize::new(ROOT_INO + 1),
            alive: RwLock::new(true),
            root: SpinLock::new(Some(root)),
        });

        log::info!(
            "{}: mounted (fsid {}, data zone {}, {})",
            inner.name,
            inner.fsid,
            inner.data_zone,
            options.show()
        );
        Ok(Arc::new(Self { inner }))
    }

    /// 根目录句柄
    pub fn root(&self) -> Result<Arc<ScmInode>, FsError> {
        Ok(Arc::new(self.inner.root_handle()?))
    }

    /// 生效的挂载选项
    pub fn options(&self) -> &MountOptions {
        &self.inner.options
    }

    /// 是否已卸载
    pub fn is_unmounted(&self) -> bool {
        !*self.inner.alive.read()
    }

    /// 占用情况快照
    pub fn usage(&self) -> ScmFsUsage {
        let allocator = &self.inner.allocator;
        ScmFsUsage {
            data_pages: self.inner.used_pages(),
            max_pages: self.inner.options.max_pages,
            pool: self.inner.pool.stats(),
            data_zone: allocator.tag_stats(self.inner.data_zone),
            node_zone: allocator.tag_stats(self.inner.options.inode_zone),
        }
    }
}

impl FileSystem for ScmFs {
    fn fs_type(&self) -> &'static str {
        self.inner.name
    }

    fn root_inode(&self) -> Result<Arc<dyn Inode>, FsError> {
        Ok(self.root()? as Arc<dyn Inode>)
    }

    fn sync(&self) -> Result<(), FsError> {
        // 内容只驻留在内存区域中，无需同步
        self.inner.enter().map(|_| ())
    }

    fn statfs(&self) -> Result<StatFs, FsError> {
        let _alive = self.inner.enter()?;
        let usage = self.usage();

        let (total_blocks, free_blocks) = if usage.max_pages == 0 {
            (usage.data_zone.total, usage.data_zone.free)
        } else {
            let left = usage.max_pages.saturating_sub(usage.data_pages);
            (usage.max_pages, left.min(usage.data_zone.free))
        };

        Ok(StatFs {
            magic: self.inner.magic,
            block_size: PAGE_SIZE,
            total_blocks,
            free_blocks,
            available_blocks: free_blocks,
            total_inodes: usage.pool.total_slots,
            free_inodes: usage.pool.free,
            fsid: self.inner.fsid,
            max_filename_len: MAX_NAME_LEN,
        })
    }

    fn umount(&self) -> Result<(), FsError> {
        self.inner.teardown()
    }

    fn show_options(&self) -> String {
        self.inner.options.show()
    }
}

/// ScmFs 文件系统类型
pub struct ScmFsType {
    name: &'static str,
    magic: u64,
    data_zone: ZoneTag,
    allocator: Arc<PageAllocator>,
    next_fsid: AtomicU64,
}

impl ScmFsType {
    /// 数据页位于存储区域的 `scmfs`
    pub fn storage(allocator: Arc<PageAllocator>) -> Self {
        Self::with_zone("scmfs", SCMFS_MAGIC, ZoneTag::Storage, allocator)
    }

    /// 数据页位于通用区域的 `ramfs`
    pub fn ram(allocator: Arc<PageAllocator>) -> Self {
        Self::with_zone("ramfs", RAMFS_MAGIC, ZoneTag::General, allocator)
    }

    /// 指定名称、魔数与数据区域
    pub fn with_zone(
        name: &'static str,
        magic: u64,
        data_zone: ZoneTag,
        allocator: Arc<PageAllocator>,
    ) -> Self {
        Self {
            name,
            magic,
            data_zone,
            allocator,
            next_fsid: AtomicU64::new(1),
        }
    }

    /// 数据页来源区域
    pub fn data_zone(&self) -> ZoneTag {
        self.data_zone
    }

    /// 解析挂载字符串并创建实例
    pub fn mount_scmfs(&self, options: &str) -> Result<Arc<ScmFs>, FsError> {
        let options = MountOptions::parse(options)?;
        ScmFs::with_options(self, options)
    }
}

impl FileSystemType for ScmFsType {
    fn name(&self) -> &'static str {
        self.name
    }

    fn mount(&self, options: &str) -> Result<Arc<dyn FileSystem>, FsError> {
        Ok(self.mount_scmfs(options)? as Arc<dyn FileSystem>)
    }
}
