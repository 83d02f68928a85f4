//! Mock 实现模块
//!
//! 提供各子系统运行时钩子的 Mock 实现，用于测试

pub mod fs;
