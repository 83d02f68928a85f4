//! 节点对象
//!
//! [`ScmNode`] 是放在对象池槽位里的定长元数据节点。目录项与打开的句柄都只持有
//! 指向槽位的 [`NodeRef`]，节点本身由池管理，不单独分配。
//!
//! 锁顺序：
//!
//! 1. 多个目录的 `content` 锁按 inode 编号升序获取
//! 2. `meta` 锁总是最内层，持有 `meta` 时不得再获取任何 `content` 锁

use alloc::collections::BTreeMap;
use alloc::string::String;
use core::sync::atomic::{AtomicUsize, Ordering};

use mm::{PageFrame, PoolObject, PoolRef};
use sync::SpinLock;
use uapi::time::TimeSpec;
use vfs::{FileMode, InodeMetadata, InodeType};

/// 指向池中节点的引用
pub type NodeRef = PoolRef<ScmNode>;

/// 节点生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// 槽位刚被取出，尚未填写元数据
    Uninitialized,
    /// 节点可见且可用
    Live,
    /// 节点内容已释放，等待或已经归还到池
    Reclaimed,
}

/// 节点元数据与引用计数
pub struct NodeMeta {
    /// 对外可见的元数据
    pub md: InodeMetadata,
    /// 打开的句柄数
    pub refs: usize,
    /// 生命周期状态
    pub state: NodeState,
}

impl NodeMeta {
    fn blank() -> Self {
        Self {
            md: InodeMetadata {
                inode_no: 0,
                inode_type: InodeType::File,
                mode: FileMode::empty(),
                uid: 0,
                gid: 0,
                size: 0,
                atime: TimeSpec::zero(),
                mtime: TimeSpec::zero(),
                ctime: TimeSpec::zero(),
                nlinks: 0,
                blocks: 0,
                rdev: 0,
            },
            refs: 0,
            state: NodeState::Uninitialized,
        }
    }

    /// 更新修改时间与状态改变时间
    pub fn touch(&mut self, now: TimeSpec) {
        self.md.mtime = now;
        self.md.ctime = now;
    }
}

/// 节点内容
pub enum NodeContent {
    /// 空（未初始化、特殊文件或已释放）
    Empty,
    /// 普通文件：按页号索引的稀疏数据页
    Regular {
        /// 已分配的数据页
        pages: BTreeMap<usize, PageFrame>,
    },
    /// 目录：名字到子节点
    Directory {
        /// 目录项
        entries: BTreeMap<String, NodeRef>,
    },
    /// 符号链接
    Symlink {
        /// 链接目标
        target: String,
    },
}

impl NodeContent {
    /// 普通文件持有的数据页数
    pub fn page_count(&self) -> usize {
        match self {
            NodeContent::Regular { pages } => pages.len(),
            _ => 0,
        }
    }
}

/// 池中的元数据节点
pub struct ScmNode {
    ino: AtomicUsize,
    /// 元数据（最内层锁）
    pub meta: SpinLock<NodeMeta>,
    /// 内容
    pub content: SpinLock<NodeContent>,
}

impl ScmNode {
    /// inode 编号，无需加锁
    pub fn ino(&self) -> usize {
        self.ino.load(Ordering::Acquire)
    }

    /// 填写新节点，状态变为 [`NodeState::Live`]
    pub fn init(&self, md: InodeMetadata, content: NodeContent) {
        self.ino.store(md.inode_no, Ordering::Release);
        *self.content.lock() = content;
        let mut meta = self.meta.lock();
        debug_assert_eq!(meta.state, NodeState::Uninitialized);
        meta.md = md;
        meta.refs = 0;
        meta.state = NodeState::Live;
    }

    /// 节点类型
    pub fn inode_type(&self) -> InodeType {
        self.meta.lock().md.inode_type
    }
}

impl PoolObject for ScmNode {
    fn construct() -> Self {
        Self {
            ino: AtomicUsize::new(0),
            meta: SpinLock::new(NodeMeta::blank()),
            content: SpinLock::new(NodeContent::Empty),
        }
    }

    fn reset(&self) {
        self.ino.store(0, Ordering::Release);
        *self.content.lock() = NodeContent::Empty;
        *self.meta.lock() = NodeMeta::blank();
    }
}
