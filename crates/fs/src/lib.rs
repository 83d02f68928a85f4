//! # 文件系统模块 (FS)
//!
//! 本模块提供具体的文件系统实现，通过实现 VFS 的 `FileSystem`、`FileSystemType`
//! 和 `Inode` trait 与虚拟文件系统层集成。
//!
//! ## 支持的文件系统
//!
//! - **[scmfs](scmfs)**: 数据页位于存储级内存区域的内存文件系统，
//!   同一实现以通用区域为数据来源时即为 `ramfs`

#![no_std]
#![doc = "文件系统实现"]

extern crate alloc;

pub mod ops;
pub mod scmfs;

pub use ops::{FsOps, fs_ops, register_fs_ops};
pub use scmfs::{MountOptions, ScmFs, ScmFsType, ScmFsUsage, ScmInode};
