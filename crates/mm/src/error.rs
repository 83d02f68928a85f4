//! 内存管理错误类型

use core::fmt;

/// 区域注册与页分配中可能发生的错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// 区域与已注册的区域地址重叠
    ZoneOverlap,
    /// 区域对齐到页边界后不足一页
    ZoneTooSmall,
    /// 区域地址范围越界（`base + len` 溢出）
    InvalidRange,
    /// 区域超出可管理的页数，或宿主无法为其簿记结构提供内存
    ZoneTooLarge,
    /// 没有与提示匹配的区域
    NoSuchZone,
    /// 区域或对象池耗尽
    OutOfMemory,
}

impl MmError {
    /// 是否属于启动期配置错误（区域注册失败）
    ///
    /// 这类错误应立即报告给调用者，不应重试。
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            MmError::ZoneOverlap
                | MmError::ZoneTooSmall
                | MmError::InvalidRange
                | MmError::ZoneTooLarge
        )
    }
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            MmError::ZoneOverlap => "zone overlaps a registered zone",
            MmError::ZoneTooSmall => "zone is smaller than one page",
            MmError::InvalidRange => "zone address range overflows",
            MmError::ZoneTooLarge => "zone is too large to manage",
            MmError::NoSuchZone => "no zone matches the requested tag",
            MmError::OutOfMemory => "out of memory",
        };
        f.write_str(msg)
    }
}

/// 内存管理操作的结果类型
pub type MmResult<T> = Result<T, MmError>;
