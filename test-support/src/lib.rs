//! 测试支持 crate
//!
//! 提供各子系统运行时钩子的 Mock 实现

#![no_std]

pub mod mock;
