//! 虚拟文件系统层
//!
//! 此 crate 提供 POSIX 兼容的虚拟文件系统抽象，包括：
//!
//! - [`Inode`] trait - 索引节点接口
//! - [`FileSystem`] trait - 已挂载的文件系统实例
//! - [`FileSystemType`] trait - 可按名字挂载的文件系统类型
//! - [`MountTable`] - 文件系统类型注册与挂载点管理

#![no_std]

extern crate alloc;

pub mod error;

mod file_system;
mod inode;
mod mount;

// Re-export error
pub use error::FsError;

// Re-export inode
pub use inode::{DirEntry, FileMode, Inode, InodeMetadata, InodeType};

// Re-export file_system
pub use file_system::{FileSystem, FileSystemType, StatFs};

// Re-export mount
pub use mount::{MountPoint, MountTable};

// Re-export uapi types for convenience
pub use uapi::time::TimeSpec;
