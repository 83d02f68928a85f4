//! Inode 抽象层 - VFS 存储层接口
//!
//! 该模块定义了文件系统的底层存储接口，提供无状态的文件和目录访问能力。
//!
//! `Inode` 侧接口以“显式 offset”的随机访问为主，路径解析、`.`/`..` 以及打开文件的
//! 会话状态由更上层负责，这里只处理单个目录内的名字。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use uapi::time::TimeSpec;

use crate::FsError;

/// 文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
    /// 普通文件
    File,
    /// 目录
    Directory,
    /// 符号链接
    Symlink,
    /// 字符设备
    CharDevice,
    /// 块设备
    BlockDevice,
    /// 命名管道
    Fifo,
    /// 套接字
    Socket,
}

impl InodeType {
    /// 从 mode 的类型位解析文件类型，类型位为空时视为普通文件
    pub fn from_mode(mode: FileMode) -> Option<Self> {
        let ty = mode.bits() & FileMode::S_IFMT.bits();
        match ty {
            0 => Some(InodeType::File),
            t if t == FileMode::S_IFREG.bits() => Some(InodeType::File),
            t if t == FileMode::S_IFDIR.bits() => Some(InodeType::Directory),
            t if t == FileMode::S_IFLNK.bits() => Some(InodeType::Symlink),
            t if t == FileMode::S_IFCHR.bits() => Some(InodeType::CharDevice),
            t if t == FileMode::S_IFBLK.bits() => Some(InodeType::BlockDevice),
            t if t == FileMode::S_IFIFO.bits() => Some(InodeType::Fifo),
            t if t == FileMode::S_IFSOCK.bits() => Some(InodeType::Socket),
            _ => None,
        }
    }

    /// 对应的 mode 类型位
    pub fn mode_bits(self) -> FileMode {
        match self {
            InodeType::File => FileMode::S_IFREG,
            InodeType::Directory => FileMode::S_IFDIR,
            InodeType::Symlink => FileMode::S_IFLNK,
            InodeType::CharDevice => FileMode::S_IFCHR,
            InodeType::BlockDevice => FileMode::S_IFBLK,
            InodeType::Fifo => FileMode::S_IFIFO,
            InodeType::Socket => FileMode::S_IFSOCK,
        }
    }

    /// 是否为特殊文件（设备、管道、套接字）
    pub fn is_special(self) -> bool {
        matches!(
            self,
            InodeType::CharDevice | InodeType::BlockDevice | InodeType::Fifo | InodeType::Socket
        )
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// 文件权限和类型（与 POSIX 兼容）
    pub struct FileMode: u32 {
        // 文件类型掩码
        /// 文件类型掩码
        const S_IFMT   = 0o170000;
        /// 普通文件
        const S_IFREG  = 0o100000;
        /// 目录
        const S_IFDIR  = 0o040000;
        /// 符号链接
        const S_IFLNK  = 0o120000;
        /// 字符设备
        const S_IFCHR  = 0o020000;
        /// 块设备
        const S_IFBLK  = 0o060000;
        /// FIFO
        const S_IFIFO  = 0o010000;
        /// Socket
        const S_IFSOCK = 0o140000;

        // 用户权限
        /// 用户读
        const S_IRUSR  = 0o400;
        /// 用户写
        const S_IWUSR  = 0o200;
        /// 用户执行
        const S_IXUSR  = 0o100;

        // 组权限
        /// 组读
        const S_IRGRP  = 0o040;
        /// 组写
        const S_IWGRP  = 0o020;
        /// 组执行
        const S_IXGRP  = 0o010;

        // 其他用户权限
        /// 其他读
        const S_IROTH  = 0o004;
        /// 其他写
        const S_IWOTH  = 0o002;
        /// 其他执行
        const S_IXOTH  = 0o001;

        // 特殊位
        /// Set UID
        const S_ISUID  = 0o4000;
        /// Set GID
        const S_ISGID  = 0o2000;
        /// Sticky bit
        const S_ISVTX  = 0o1000;
    }
}

impl FileMode {
    /// 全部权限位与特殊位（S_IALLUGO）
    pub const PERMISSION_MASK: u32 = 0o7777;

    /// 仅保留权限位与特殊位
    pub fn permissions(self) -> FileMode {
        FileMode::from_bits_truncate(self.bits() & Self::PERMISSION_MASK)
    }

    /// 从八进制权限值构造，超出 0o7777 的位被丢弃
    pub fn from_permissions(bits: u32) -> FileMode {
        FileMode::from_bits_truncate(bits & Self::PERMISSION_MASK)
    }
}

/// 轻量级目录项（readdir 返回）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// 文件名
    pub name: String,
    /// Inode 编号
    pub inode_no: usize,
    /// 文件类型
    pub inode_type: InodeType,
}

/// 文件元数据
#[derive(Debug, Clone)]
pub struct InodeMetadata {
    /// Inode 编号
    pub inode_no: usize,
    /// 文件类型
    pub inode_type: InodeType,
    /// 权限位（含类型位）
    pub mode: FileMode,
    /// 用户 ID
    pub uid: u32,
    /// 组 ID
    pub gid: u32,
    /// 文件大小（字节）
    pub size: usize,
    /// 访问时间
    pub atime: TimeSpec,
    /// 修改时间
    pub mtime: TimeSpec,
    /// 状态改变时间
    pub ctime: TimeSpec,
    /// 硬链接数
    pub nlinks: usize,
    /// 占用的块数（512B 为单位）
    pub blocks: usize,
    /// 设备号（仅对 CharDevice 和 BlockDevice 有效）
    pub rdev: u64,
}

/// 文件系统底层存储接口
pub trait Inode: Send + Sync + Any {
    /// 获取文件元数据
    fn metadata(&self) -> Result<InodeMetadata, FsError>;

    /// 从指定偏移量读取数据
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, FsError>;

    /// 向指定偏移量写入数据
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, FsError>;

    /// 在目录中查找子项
    fn lookup(&self, name: &str) -> Result<Arc<dyn Inode>, FsError>;

    /// 在目录中创建文件
    fn create(&self, name: &str, mode: FileMode) -> Result<Arc<dyn Inode>, FsError>;

    /// 在目录中创建子目录
    fn mkdir(&self, name: &str, mode: FileMode) -> Result<Arc<dyn Inode>, FsError>;

    /// 创建符号链接
    fn symlink(&self, name: &str, target: &str) -> Result<Arc<dyn Inode>, FsError>;

    /// 创建设备文件节点
    fn mknod(&self, name: &str, mode: FileMode, dev: u64) -> Result<Arc<dyn Inode>, FsError>;

    /// 创建硬链接
    fn link(&self, name: &str, target: &Arc<dyn Inode>) -> Result<(), FsError>;

    /// 删除普通文件/链接
    fn unlink(&self, name: &str) -> Result<(), FsError>;

    /// 删除目录
    fn rmdir(&self, name: &str) -> Result<(), FsError>;

    /// 重命名/移动 (原子操作)
    fn rename(
        &self,
        old_name: &str,
        new_parent: Arc<dyn Inode>,
        new_name: &str,
    ) -> Result<(), FsError>;

    /// 列出目录内容（不含 `.` 与 `..`）
    fn readdir(&self) -> Result<Vec<DirEntry>, FsError>;

    /// 截断文件到指定大小
    fn truncate(&self, size: usize) -> Result<(), FsError>;

    /// 读取符号链接的目标路径
    fn readlink(&self) -> Result<String, FsError>;

    /// 设置文件时间戳
    fn set_times(&self, atime: Option<TimeSpec>, mtime: Option<TimeSpec>) -> Result<(), FsError>;

    /// 修改文件所有者和组
    fn chown(&self, uid: u32, gid: u32) -> Result<(), FsError>;

    /// 修改文件权限模式
    fn chmod(&self, mode: FileMode) -> Result<(), FsError>;

    /// 向下转型为 &dyn Any，用于支持 downcast
    fn as_any(&self) -> &dyn Any;
}

/// 向下转型辅助方法
impl dyn Inode {
    /// 尝试获取具体类型的引用
    pub fn downcast_ref<T: Inode>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}
