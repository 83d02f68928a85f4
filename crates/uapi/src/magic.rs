//! 文件系统魔数（`statfs.f_type`）

/// ramfs 的魔数，与 Linux `RAMFS_MAGIC` 一致
pub const RAMFS_MAGIC: u64 = 0x8584_58f6;

/// scmfs（存储级内存区上的 ramfs）的魔数
pub const SCMFS_MAGIC: u64 = 0x5343_4d46;
