//! 挂载选项解析
//!
//! 挂载字符串由逗号分隔的 `key=value` 组成：
//!
//! | 键           | 含义                                   | 默认值    |
//! |--------------|----------------------------------------|-----------|
//! | `mode`       | 根目录权限（八进制），截断到 `0o7777`  | `0755`    |
//! | `size`       | 数据页容量上限，可带 `k`/`m`/`g` 后缀  | `0`（无限）|
//! | `inode_zone` | 节点池的后备区域 `general`/`storage`   | `general` |
//! | `pool_batch` | 节点池每次扩容的页数（≥ 1）            | `1`       |
//!
//! 空段与未知键被忽略；已知键的值格式错误时返回 [`FsError::InvalidArgument`]。

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use mm::{DEFAULT_POOL_BATCH_PAGES, PAGE_SIZE, ZoneTag};
use vfs::{FileMode, FsError};

/// 根目录默认权限
pub const DEFAULT_ROOT_MODE: u32 = 0o755;

/// 解析后的挂载选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOptions {
    /// 根目录权限位
    pub mode: u32,
    /// 数据页上限，0 表示不限
    pub max_pages: usize,
    /// 节点池后备区域
    pub inode_zone: ZoneTag,
    /// 节点池扩容批次（页）
    pub pool_batch: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            mode: DEFAULT_ROOT_MODE,
            max_pages: 0,
            inode_zone: ZoneTag::General,
            pool_batch: DEFAULT_POOL_BATCH_PAGES,
        }
    }
}

impl MountOptions {
    /// 解析挂载字符串
    pub fn parse(data: &str) -> Result<Self, FsError> {
        let mut opts = Self::default();
        for token in data.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (token, None),
            };
            match key {
                "mode" => {
                    let v = value.ok_or(FsError::InvalidArgument)?;
                    let mode = u32::from_str_radix(v, 8).map_err(|_| {
                        log::warn!("scmfs: bad mode value {:?}", v);
                        FsError::InvalidArgument
                    })?;
                    opts.mode = mode & FileMode::PERMISSION_MASK;
                }
                "size" => {
                    let bytes = parse_size(value.ok_or(FsError::InvalidArgument)?)?;
                    let pages = bytes.div_ceil(PAGE_SIZE);
                    // 向上取整后的字节数也必须可表示
                    if pages.checked_mul(PAGE_SIZE).is_none() {
                        log::warn!("scmfs: size {} out of range", bytes);
                        return Err(FsError::InvalidArgument);
                    }
                    opts.max_pages = pages;
                }
                "inode_zone" => {
                    opts.inode_zone = match value {
                        Some("general") => ZoneTag::General,
                        Some("storage") => ZoneTag::Storage,
                        _ => return Err(FsError::InvalidArgument),
                    };
                }
                "pool_batch" => {
                    let v = value.ok_or(FsError::InvalidArgument)?;
                    let batch: usize = v.parse().map_err(|_| FsError::InvalidArgument)?;
                    if batch == 0 {
                        return Err(FsError::InvalidArgument);
                    }
                    opts.pool_batch = batch;
                }
                _ => log::debug!("scmfs: ignoring mount option {:?}", token),
            }
        }
        Ok(opts)
    }

    /// 容量上限（字节），0 表示不限
    pub fn max_bytes(&self) -> usize {
        self.max_pages.saturating_mul(PAGE_SIZE)
    }

    /// 以挂载字符串形式输出
    ///
    /// `mode` 总是输出，其余选项只在不同于默认值时输出。
    pub fn show(&self) -> String {
        let defaults = Self::default();
        let mut parts: Vec<String> = Vec::new();
        parts.push(format!("mode={:04o}", self.mode));
        if self.max_pages != defaults.max_pages {
            parts.push(format!("size={}k", self.max_bytes() / 1024));
        }
        if self.inode_zone != defaults.inode_zone {
            parts.push(format!("inode_zone={}", self.inode_zone));
        }
        if self.pool_batch != defaults.pool_batch {
            parts.push(format!("pool_batch={}", self.pool_batch));
        }
        parts.join(",")
    }
}

/// 解析带可选 `k`/`m`/`g` 后缀的字节数
fn parse_size(value: &str) -> Result<usize, FsError> {
    let (digits, shift) = match value.as_bytes().last() {
        Some(b'k' | b'K') => (&value[..value.len() - 1], 10),
        Some(b'm' | b'M') => (&value[..value.len() - 1], 20),
        Some(b'g' | b'G') => (&value[..value.len() - 1], 30),
        _ => (value, 0),
    };
    let n: usize = digits.parse().map_err(|_| FsError::InvalidArgument)?;
    n.checked_mul(1usize << shift).ok_or(FsError::InvalidArgument)
}
