//! 与用户空间共用定义和声明
//!
//! 包含常量和类型，确保文件系统与用户空间看到的 ABI 一致

#![no_std]
// uapi 中包含大量与 Linux 兼容的常量/结构体字段定义；逐项补 `///` 噪声较大。
#![allow(missing_docs)]

pub mod magic;
pub mod time;
