//! 文件系统抽象

use alloc::string::String;
use alloc::sync::Arc;

use crate::{FsError, Inode};

/// 文件系统 trait
///
/// 一个已挂载的文件系统实例（超级块）。所有文件系统实现都必须实现此 trait。
pub trait FileSystem: Send + Sync {
    /// 文件系统类型名称
    fn fs_type(&self) -> &'static str;

    /// 获取根 inode
    fn root_inode(&self) -> Result<Arc<dyn Inode>, FsError>;

    /// 同步文件系统
    fn sync(&self) -> Result<(), FsError>;

    /// 获取文件系统统计信息
    fn statfs(&self) -> Result<StatFs, FsError>;

    /// 卸载文件系统
    ///
    /// 卸载后实例不再可用，重复卸载返回 [`FsError::StaleHandle`]。
    fn umount(&self) -> Result<(), FsError> {
        self.sync()
    }

    /// 以挂载字符串的形式输出生效的挂载选项
    fn show_options(&self) -> String {
        String::new()
    }
}

/// 文件系统类型
///
/// 可以被注册到 [`crate::MountTable`]，按名字创建新的文件系统实例。
pub trait FileSystemType: Send + Sync {
    /// 类型名称，例如 `"ramfs"`
    fn name(&self) -> &'static str;

    /// 以给定的挂载选项创建一个新实例
    ///
    /// 选项格式错误时返回 [`FsError::InvalidArgument`]。
    fn mount(&self, options: &str) -> Result<Arc<dyn FileSystem>, FsError>;
}

/// 文件系统统计信息
#[derive(Debug, Clone)]
pub struct StatFs {
    /// 文件系统魔数
    pub magic: u64,
    /// 块大小（单位：字节）
    pub block_size: usize,
    /// 总块数
    pub total_blocks: usize,
    /// 空闲块数
    pub free_blocks: usize,
    /// 可用块数（非特权用户）
    pub available_blocks: usize,
    /// 总 inode 数
    pub total_inodes: usize,
    /// 空闲 inode 数
    pub free_inodes: usize,
    /// 文件系统 ID
    pub fsid: u64,
    /// 最大文件名长度
    pub max_filename_len: usize,
}
