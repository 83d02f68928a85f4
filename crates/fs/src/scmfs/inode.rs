//! ScmFs Inode 实现
//!
//! [`ScmInode`] 是指向池中节点的打开句柄。句柄存在期间节点的引用计数大于 0，
//! 因此即使节点已被 unlink，内容与槽位也会保留到最后一个句柄被 drop。
//!
//! 需要同时修改两个目录的操作（rmdir、rename）分两步进行：先在各自的目录锁下
//! 固定住相关节点，再按 inode 编号升序一次性锁住全部目录并重新校验目录项，
//! 校验失败则重试。

use alloc::collections::BTreeMap;
use alloc::collections::btree_map::Entry;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;

use mm::{PAGE_SIZE, PoolRef};
use sync::SpinLockGuard;
use uapi::time::TimeSpec;
use vfs::{DirEntry, FileMode, FsError, Inode, InodeMetadata, InodeType};

use super::node::{NodeContent, NodeRef, NodeState};
use super::scmfs::{MAX_NAME_LEN, ScmFsInner};
use crate::ops::fs_ops;

type Entries = BTreeMap<String, NodeRef>;

fn check_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(FsError::InvalidArgument);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

fn entries(content: &NodeContent) -> Result<&Entries, FsError> {
    match content {
        NodeContent::Directory { entries } => Ok(entries),
        _ => Err(FsError::NotDirectory),
    }
}

fn entries_mut(content: &mut NodeContent) -> Result<&mut Entries, FsError> {
    match content {
        NodeContent::Directory { entries } => Ok(entries),
        _ => Err(FsError::NotDirectory),
    }
}

fn same(a: &NodeRef, b: &NodeRef) -> bool {
    PoolRef::ptr_eq(a, b)
}

/// 按 inode 编号升序持有的一组目录锁
struct LockedDirs<'a> {
    guards: Vec<(usize, SpinLockGuard<'a, NodeContent>)>,
}

impl<'a> LockedDirs<'a> {
    fn lock(nodes: &[&'a NodeRef]) -> Self {
        let mut sorted: Vec<&'a NodeRef> = nodes.to_vec();
        sorted.sort_by_key(|n| n.ino());
        sorted.dedup_by_key(|n| n.ino());
        let guards = sorted
            .into_iter()
            .map(|n| (n.ino(), n.content.lock()))
            .collect();
        Self { guards }
    }

    fn dir(&self, node: &NodeRef) -> Result<&Entries, FsError> {
        let ino = node.ino();
        let (_, guard) = self
            .guards
            .iter()
            .find(|(i, _)| *i == ino)
            .ok_or(FsError::NotDirectory)?;
        entries(guard)
    }

    fn dir_mut(&mut self, node: &NodeRef) -> Result<&mut Entries, FsError> {
        let ino = node.ino();
        let (_, guard) = self
            .guards
            .iter_mut()
            .find(|(i, _)| *i == ino)
            .ok_or(FsError::NotDirectory)?;
        entries_mut(guard)
    }
}

/// ScmFs Inode 句柄
pub struct ScmInode {
    fs: Arc<ScmFsInner>,
    node: NodeRef,
}

impl ScmInode {
    pub(super) fn new(fs: Arc<ScmFsInner>, node: NodeRef) -> Self {
        node.meta.lock().refs += 1;
        Self { fs, node }
    }

    /// inode 编号
    pub fn ino(&self) -> usize {
        self.node.ino()
    }

    /// 节点在池中的槽位编号
    pub fn slot(&self) -> usize {
        self.node.index()
    }

    /// 两个句柄是否指向同一个节点
    pub fn same_node(&self, other: &ScmInode) -> bool {
        Arc::ptr_eq(&self.fs, &other.fs) && same(&self.node, &other.node)
    }

    fn handle(&self, node: &NodeRef) -> ScmInode {
        ScmInode::new(self.fs.clone(), node.clone())
    }

    fn now() -> TimeSpec {
        fs_ops().timespec_now()
    }

    /// 已被删除的目录不能再添加目录项
    fn check_dir_alive(&self) -> Result<(), FsError> {
        if self.node.meta.lock().md.nlinks == 0 {
            return Err(FsError::NotFound);
        }
        Ok(())
    }

    /// 新节点的属主：uid 取自当前凭据；父目录带 S_ISGID 时继承其 gid，
    /// 新建子目录同时继承 S_ISGID
    fn owner_for(&self, inode_type: InodeType, mode: FileMode) -> (u32, u32, FileMode) {
        let ops = fs_ops();
        let uid = ops.current_uid();
        let dir = self.node.meta.lock();
        if dir.md.mode.contains(FileMode::S_ISGID) {
            let mode = if inode_type == InodeType::Directory {
                mode | FileMode::S_ISGID
            } else {
                mode
            };
            (uid, dir.md.gid, mode)
        } else {
            (uid, ops.current_gid(), mode)
        }
    }

    fn new_child(
        &self,
        name: &str,
        inode_type: InodeType,
        mode: FileMode,
        rdev: u64,
        content: NodeContent,
    ) -> Result<Arc<dyn Inode>, FsError> {
        let _alive = self.fs.enter()?;
        check_name(name)?;

        let mut guard = self.node.content.lock();
        let entries = entries_mut(&mut guard)?;
        self.check_dir_alive()?;
        if entries.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }

        let (uid, gid, mode) = self.owner_for(inode_type, mode);
        let child = self.fs.alloc_node(inode_type, mode, uid, gid, rdev, content)?;
        let handle = self.handle(&child);
        entries.insert(name.to_string(), child);

        let mut meta = self.node.meta.lock();
        if inode_type == InodeType::Directory {
            meta.md.nlinks += 1;
        }
        meta.touch(Self::now());
        drop(meta);
        drop(guard);

        Ok(Arc::new(handle))
    }
}

impl Drop for ScmInode {
    fn drop(&mut self) {
        // 已卸载：节点已随拆除一并释放
        let Ok(_alive) = self.fs.enter() else {
            return;
        };
        let reclaim = {
            let mut meta = self.node.meta.lock();
            meta.refs -= 1;
            let dead = meta.refs == 0 && meta.md.nlinks == 0 && meta.state == NodeState::Live;
            if dead {
                meta.state = NodeState::Reclaimed;
            }
            dead
        };
        if reclaim {
            self.fs.reclaim(&self.node);
        }
    }
}

impl Inode for ScmInode {
    fn metadata(&self) -> Result<InodeMetadata, FsError> {
        let _alive = self.fs.enter()?;
        Ok(self.node.meta.lock().md.clone())
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, FsError> {
        let _alive = self.fs.enter()?;
        let guard = self.node.content.lock();
        let pages = match &*guard {
            NodeContent::Regular { pages } => pages,
            NodeContent::Directory { .. } => return Err(FsError::IsDirectory),
            _ => return Err(FsError::InvalidArgument),
        };

        let size = self.node.meta.lock().md.size;
        if offset >= size {
            return Ok(0);
        }
        let len = buf.len().min(size - offset);

        let mut done = 0;
        while done < len {
            let pos = offset + done;
            let (index, page_off) = (pos / PAGE_SIZE, pos % PAGE_SIZE);
            let n = (PAGE_SIZE - page_off).min(len - done);
            match pages.get(&index) {
                Some(frame) => {
                    buf[done..done + n].copy_from_slice(&frame.as_bytes()[page_off..page_off + n])
                }
                // 空洞读出 0
                None => buf[done..done + n].fill(0),
            }
            done += n;
        }

        self.node.meta.lock().md.atime = Self::now();
        Ok(done)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, FsError> {
        let _alive = self.fs.enter()?;
        if offset.checked_add(buf.len()).is_none() {
            return Err(FsError::InvalidArgument);
        }

        let mut guard = self.node.content.lock();
        let pages = match &mut *guard {
            NodeContent::Regular { pages } => pages,
            NodeContent::Directory { .. } => return Err(FsError::IsDirectory),
            _ => return Err(FsError::InvalidArgument),
        };

        let mut done = 0;
        let mut error = None;
        while done < buf.len() {
            let pos = offset + done;
            let (index, page_off) = (pos / PAGE_SIZE, pos % PAGE_SIZE);
            let n = (PAGE_SIZE - page_off).min(buf.len() - done);
            let frame = match pages.entry(index) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(v) => match self.fs.alloc_data_page() {
                    Ok(frame) => v.insert(frame),
                    Err(e) => {
                        error = Some(e);
                        break;
                    }
                },
            };
            frame.as_bytes_mut()[page_off..page_off + n].copy_from_slice(&buf[done..done + n]);
            done += n;
        }

        if done > 0 {
            let mut meta = self.node.meta.lock();
            meta.md.size = meta.md.size.max(offset + done);
            meta.md.blocks = pages.len() * (PAGE_SIZE / 512);
            meta.touch(Self::now());
        }
        drop(guard);

        // 部分写入成功时返回已写入的字节数
        match error {
            Some(e) if done == 0 => Err(e),
            _ => Ok(done),
        }
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Inode>, FsError> {
        let _alive = self.fs.enter()?;
        check_name(name)?;
        let guard = self.node.content.lock();
        let child = entries(&guard)?.get(name).ok_or(FsError::NotFound)?;
        let handle = self.handle(child);
        drop(guard);
        Ok(Arc::new(handle))
    }

    fn create(&self, name: &str, mode: FileMode) -> Result<Arc<dyn Inode>, FsError> {
        self.new_child(
            name,
            InodeType::File,
            mode,
            0,
            NodeContent::Regular {
                pages: BTreeMap::new(),
            },
        )
    }

    fn mkdir(&self, name: &str, mode: FileMode) -> Result<Arc<dyn Inode>, FsError> {
        self.new_child(
            name,
            InodeType::Directory,
            mode,
            0,
            NodeContent::Directory {
                entries: BTreeMap::new(),
            },
        )
    }

    fn symlink(&self, name: &str, target: &str) -> Result<Arc<dyn Inode>, FsError> {
        // 目标串存放在节点内，长度只受内存限制
        if target.is_empty() {
            return Err(FsError::NotFound);
        }
        self.new_child(
            name,
            InodeType::Symlink,
            FileMode::from_permissions(0o777),
            0,
            NodeContent::Symlink {
                target: target.to_string(),
            },
        )
    }

    fn mknod(&self, name: &str, mode: FileMode, dev: u64) -> Result<Arc<dyn Inode>, FsError> {
        match InodeType::from_mode(mode) {
            Some(InodeType::File) => self.create(name, mode),
            Some(InodeType::Directory) => self.mkdir(name, mode),
            Some(ty) if ty.is_special() => self.new_child(name, ty, mode, dev, NodeContent::Empty),
            _ => Err(FsError::InvalidArgument),
        }
    }

    fn link(&self, name: &str, target: &Arc<dyn Inode>) -> Result<(), FsError> {
        let _alive = self.fs.enter()?;
        check_name(name)?;
        let target = target
            .downcast_ref::<ScmInode>()
            .filter(|t| Arc::ptr_eq(&t.fs, &self.fs))
            .ok_or(FsError::CrossDevice)?;
        if target.node.inode_type() == InodeType::Directory {
            return Err(FsError::NotPermitted);
        }

        let mut guard = self.node.content.lock();
        let entries = entries_mut(&mut guard)?;
        self.check_dir_alive()?;
        if entries.contains_key(name) {
            return Err(FsError::AlreadyExists);
        }

        let now = Self::now();
        {
            let mut meta = target.node.meta.lock();
            if meta.md.nlinks == 0 {
                return Err(FsError::NotFound);
            }
            meta.md.nlinks += 1;
            meta.md.ctime = now;
        }
        entries.insert(name.to_string(), target.node.clone());
        self.node.meta.lock().touch(now);
        Ok(())
    }

    fn unlink(&self, name: &str) -> Result<(), FsError> {
        let _alive = self.fs.enter()?;
        check_name(name)?;

        let mut guard = self.node.content.lock();
        let entries = entries_mut(&mut guard)?;
        let child = entries.get(name).ok_or(FsError::NotFound)?;
        if child.inode_type() == InodeType::Directory {
            return Err(FsError::IsDirectory);
        }
        // 句柄保证节点在目录锁释放之前不会被回收
        let pin = self.handle(child);
        entries.remove(name);

        let now = Self::now();
        {
            let mut meta = pin.node.meta.lock();
            meta.md.nlinks -= 1;
            meta.md.ctime = now;
        }
        self.node.meta.lock().touch(now);
        drop(guard);
        drop(pin);
        Ok(())
    }

    fn rmdir(&self, name: &str) -> Result<(), FsError> {
        let _alive = self.fs.enter()?;
        check_name(name)?;

        loop {
            let pin = {
                let guard = self.node.content.lock();
                let child = entries(&guard)?.get(name).ok_or(FsError::NotFound)?;
                if child.inode_type() != InodeType::Directory {
                    return Err(FsError::NotDirectory);
                }
                self.handle(child)
            };

            let mut dirs = LockedDirs::lock(&[&self.node, &pin.node]);
            let unchanged = dirs
                .dir(&self.node)?
                .get(name)
                .is_some_and(|n| same(n, &pin.node));
            if !unchanged {
                continue;
            }
            if !dirs.dir(&pin.node)?.is_empty() {
                return Err(FsError::DirectoryNotEmpty);
            }
            dirs.dir_mut(&self.node)?.remove(name);

            let now = Self::now();
            {
                let mut meta = pin.node.meta.lock();
                meta.md.nlinks = 0;
                meta.md.ctime = now;
            }
            {
                let mut meta = self.node.meta.lock();
                meta.md.nlinks -= 1;
                meta.touch(now);
            }
            drop(dirs);
            return Ok(());
        }
    }

    fn rename(
        &self,
        old_name: &str,
        new_parent: Arc<dyn Inode>,
        new_name: &str,
    ) -> Result<(), FsError> {
        let _alive = self.fs.enter()?;
        check_name(old_name)?;
        check_name(new_name)?;
        let new_dir = new_parent
            .downcast_ref::<ScmInode>()
            .filter(|d| Arc::ptr_eq(&d.fs, &self.fs))
            .ok_or(FsError::CrossDevice)?;
        if new_dir.node.inode_type() != InodeType::Directory {
            return Err(FsError::NotDirectory);
        }

        loop {
            let source = {
                let guard = self.node.content.lock();
                let child = entries(&guard)?.get(old_name).ok_or(FsError::NotFound)?;
                self.handle(child)
            };
            if same(&source.node, &new_dir.node) {
                return Err(FsError::InvalidArgument);
            }
            let target = {
                let guard = new_dir.node.content.lock();
                entries(&guard)?.get(new_name).map(|n| self.handle(n))
            };

            let source_is_dir = source.node.inode_type() == InodeType::Directory;
            let mut nodes = alloc::vec![&self.node, &new_dir.node];
            if let Some(t) = &target {
                if t.node.inode_type() == InodeType::Directory {
                    nodes.push(&t.node);
                }
            }

            let mut dirs = LockedDirs::lock(&nodes);
            let source_ok = dirs
                .dir(&self.node)?
                .get(old_name)
                .is_some_and(|n| same(n, &source.node));
            let target_ok = match (&target, dirs.dir(&new_dir.node)?.get(new_name)) {
                (None, None) => true,
                (Some(t), Some(n)) => same(n, &t.node),
                _ => false,
            };
            if !source_ok || !target_ok {
                continue;
            }
            new_dir.check_dir_alive()?;

            if let Some(t) = &target {
                // 新旧名字指向同一个节点
                if same(&t.node, &source.node) {
                    return Ok(());
                }
                let target_is_dir = t.node.inode_type() == InodeType::Directory;
                match (source_is_dir, target_is_dir) {
                    (true, false) => return Err(FsError::NotDirectory),
                    (false, true) => return Err(FsError::IsDirectory),
                    (true, true) => {
                        if !dirs.dir(&t.node)?.is_empty() {
                            return Err(FsError::DirectoryNotEmpty);
                        }
                    }
                    _ => {}
                }
            }

            if let Some(moved) = dirs.dir_mut(&self.node)?.remove(old_name) {
                dirs.dir_mut(&new_dir.node)?.insert(new_name.to_string(), moved);
            }

            let now = Self::now();
            match &target {
                Some(t) => {
                    {
                        let mut meta = t.node.meta.lock();
                        meta.md.nlinks = if source_is_dir { 0 } else { meta.md.nlinks - 1 };
                        meta.md.ctime = now;
                    }
                    if source_is_dir {
                        self.node.meta.lock().md.nlinks -= 1;
                    }
                }
                None if source_is_dir => {
                    self.node.meta.lock().md.nlinks -= 1;
                    new_dir.node.meta.lock().md.nlinks += 1;
                }
                None => {}
            }
            source.node.meta.lock().md.ctime = now;
            self.node.meta.lock().touch(now);
            new_dir.node.meta.lock().touch(now);
            drop(dirs);
            return Ok(());
        }
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, FsError> {
        let _alive = self.fs.enter()?;
        let guard = self.node.content.lock();
        let list: Vec<DirEntry> = entries(&guard)?
            .iter()
            .map(|(name, node)| {
                let meta = node.meta.lock();
                DirEntry {
                    name: name.clone(),
                    inode_no: meta.md.inode_no,
                    inode_type: meta.md.inode_type,
                }
            })
            .collect();
        self.node.meta.lock().md.atime = Self::now();
        drop(guard);
        Ok(list)
    }

    fn truncate(&self, size: usize) -> Result<(), FsError> {
        let _alive = self.fs.enter()?;
        let mut guard = self.node.content.lock();
        let pages = match &mut *guard {
            NodeContent::Regular { pages } => pages,
            NodeContent::Directory { .. } => return Err(FsError::IsDirectory),
            _ => return Err(FsError::InvalidArgument),
        };

        let released = pages.split_off(&size.div_ceil(PAGE_SIZE));
        let freed = released.len();
        drop(released);
        // 末页中超出新长度的部分清零，之后扩展时读出 0
        if size % PAGE_SIZE != 0 {
            if let Some(frame) = pages.get_mut(&(size / PAGE_SIZE)) {
                frame.as_bytes_mut()[size % PAGE_SIZE..].fill(0);
            }
        }
        self.fs.unaccount_pages(freed);

        let mut meta = self.node.meta.lock();
        meta.md.size = size;
        meta.md.blocks = pages.len() * (PAGE_SIZE / 512);
        meta.touch(Self::now());
        Ok(())
    }

    fn readlink(&self) -> Result<String, FsError> {
        let _alive = self.fs.enter()?;
        match &*self.node.content.lock() {
            NodeContent::Symlink { target } => Ok(target.clone()),
            _ => Err(FsError::InvalidArgument),
        }
    }

    fn set_times(&self, atime: Option<TimeSpec>, mtime: Option<TimeSpec>) -> Result<(), FsError> {
        let _alive = self.fs.enter()?;
        let mut meta = self.node.meta.lock();
        if let Some(atime) = atime {
            meta.md.atime = atime;
        }
        if let Some(mtime) = mtime {
            meta.md.mtime = mtime;
        }
        meta.md.ctime = Self::now();
        Ok(())
    }

    fn chown(&self, uid: u32, gid: u32) -> Result<(), FsError> {
        let _alive = self.fs.enter()?;
        let mut meta = self.node.meta.lock();
        meta.md.uid = uid;
        meta.md.gid = gid;
        meta.md.ctime = Self::now();
        Ok(())
    }

    fn chmod(&self, mode: FileMode) -> Result<(), FsError> {
        let _alive = self.fs.enter()?;
        let mut meta = self.node.meta.lock();
        meta.md.mode = meta.md.inode_type.mode_bits() | mode.permissions();
        meta.md.ctime = Self::now();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
