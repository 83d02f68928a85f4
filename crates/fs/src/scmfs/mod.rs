//! ScmFs - 区域感知的内存文件系统
//!
//! 该模块提供一个**完全驻留在内存中的文件系统**，与 tmpfs 类似，但内存来源是显式划分的区域：
//!
//! - 普通文件的数据页只从类型指定的数据区域分配（`scmfs` 为存储区，`ramfs` 为通用区）
//! - 元数据节点来自每个挂载实例独占的定长对象池
//!
//! 内容不会被换出或回收，卸载后全部丢失。

mod inode;
mod node;
mod options;
mod scmfs;

pub use inode::ScmInode;
pub use node::NodeState;
pub use options::{DEFAULT_ROOT_MODE, MountOptions};
pub use scmfs::{MAX_NAME_LEN, ROOT_INO, ScmFs, ScmFsType, ScmFsUsage};
