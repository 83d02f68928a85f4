//! FS 相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `fs` crate（避免循环依赖）。
//! `fs` crate 在 `cfg(test)` 下为这些类型实现其 trait（例如 `FsOps`）。

use core::sync::atomic::{AtomicI64, Ordering};

/// Mock 的 FS 运行时操作
///
/// 时钟每被读取一次前进一秒，便于断言时间戳先后；凭据固定为 root。
pub struct MockFsOps {
    ticks: AtomicI64,
}

impl MockFsOps {
    /// 凭据中的 uid
    pub const UID: u32 = 0;
    /// 凭据中的 gid
    pub const GID: u32 = 0;

    pub const fn new() -> Self {
        Self {
            ticks: AtomicI64::new(0),
        }
    }

    /// 读取时钟并前进一拍，返回（秒，纳秒）
    pub fn tick(&self) -> (i64, i64) {
        let secs = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        (secs, 0)
    }
}

impl Default for MockFsOps {
    fn default() -> Self {
        Self::new()
    }
}

/// 全局 Mock 实例
pub static MOCK_FS_OPS: MockFsOps = MockFsOps::new();
