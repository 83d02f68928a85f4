//! VFS 错误类型
//!
//! 定义了与 POSIX 兼容的文件系统错误码，可通过 [`FsError::to_errno()`] 转换为系统调用错误码。

/// VFS 错误类型
///
/// 各错误码对应标准 POSIX errno 值。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    // 文件/目录相关
    /// 文件不存在 (-ENOENT)
    NotFound,
    /// 文件已存在 (-EEXIST)
    AlreadyExists,
    /// 不是目录 (-ENOTDIR)
    NotDirectory,
    /// 是目录 (-EISDIR)
    IsDirectory,
    /// 目录非空 (-ENOTEMPTY)
    DirectoryNotEmpty,

    // 权限相关
    /// 操作不被允许 (-EPERM)
    NotPermitted,

    // 参数相关
    /// 无效参数 (-EINVAL)，挂载选项格式错误也归入此类
    InvalidArgument,
    /// 文件名过长 (-ENAMETOOLONG)
    NameTooLong,

    // 文件系统相关
    /// 设备空间不足 (-ENOSPC)
    NoSpace,
    /// 设备不存在 (-ENODEV)，用于未注册的文件系统类型
    NoDevice,
    /// 跨设备链接 (-EXDEV)
    CrossDevice,
    /// 设备或资源忙 (-EBUSY)
    Busy,
    /// 句柄已失效 (-ESTALE)，文件系统已被卸载
    StaleHandle,

    // 其他
    /// 操作不支持 (-ENOTSUP)
    NotSupported,
}

impl FsError {
    /// 转换为系统调用错误码（负数）
    pub fn to_errno(&self) -> isize {
        match self {
            FsError::NotPermitted => -1,
            FsError::NotFound => -2,
            FsError::Busy => -16,
            FsError::AlreadyExists => -17,
            FsError::CrossDevice => -18,
            FsError::NoDevice => -19,
            FsError::NotDirectory => -20,
            FsError::IsDirectory => -21,
            FsError::InvalidArgument => -22,
            FsError::NoSpace => -28,
            FsError::NameTooLong => -36,
            FsError::DirectoryNotEmpty => -39,
            FsError::NotSupported => -95,
            FsError::StaleHandle => -116,
        }
    }
}
