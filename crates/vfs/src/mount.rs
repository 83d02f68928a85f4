//! 挂载表
//!
//! [`MountTable`] 记录已注册的文件系统类型和当前的挂载点。它是一个显式构造的
//! 对象，由调用者决定其生命周期（通常是内核启动时创建一个并共享）。
//!
//! 挂载点以目标路径字符串为键，本层不做路径规范化。

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use sync::SpinLock;

use crate::{FileSystem, FileSystemType, FsError};

/// 一个挂载点
#[derive(Clone)]
pub struct MountPoint {
    /// 挂载目标路径
    pub target: String,
    /// 文件系统类型名称
    pub fs_type: &'static str,
    /// 挂载时给出的原始选项
    pub options: String,
    /// 文件系统实例
    pub fs: Arc<dyn FileSystem>,
}

impl core::fmt::Debug for MountPoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MountPoint")
            .field("target", &self.target)
            .field("fs_type", &self.fs_type)
            .field("options", &self.options)
            .finish()
    }
}

/// 挂载表
#[derive(Default)]
pub struct MountTable {
    types: SpinLock<BTreeMap<&'static str, Arc<dyn FileSystemType>>>,
    mounts: SpinLock<BTreeMap<String, MountPoint>>,
}

impl MountTable {
    /// 创建空挂载表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册文件系统类型
    ///
    /// 同名类型只能注册一次，重复注册返回 [`FsError::AlreadyExists`]。
    pub fn register_filesystem(&self, fs_type: Arc<dyn FileSystemType>) -> Result<(), FsError> {
        let name = fs_type.name();
        let mut types = self.types.lock();
        if types.contains_key(name) {
            log::warn!("vfs: filesystem type {} already registered", name);
            return Err(FsError::AlreadyExists);
        }
        types.insert(name, fs_type);
        log::info!("vfs: registered filesystem type {}", name);
        Ok(())
    }

    /// 注销文件系统类型
    ///
    /// 仍有该类型的挂载点时返回 [`FsError::Busy`]。
    pub fn unregister_filesystem(&self, name: &str) -> Result<(), FsError> {
        let mounts = self.mounts.lock();
        if mounts.values().any(|m| m.fs_type == name) {
            return Err(FsError::Busy);
        }
        self.types
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or(FsError::NoDevice)
    }

    /// 已注册的文件系统类型名称
    pub fn filesystems(&self) -> Vec<&'static str> {
        self.types.lock().keys().copied().collect()
    }

    /// 挂载
    ///
    /// # 错误
    /// - 类型未注册：[`FsError::NoDevice`]
    /// - 目标已被占用：[`FsError::Busy`]
    /// - 文件系统自身的挂载错误（例如选项格式错误）原样返回
    pub fn mount(
        &self,
        fs_type: &str,
        target: &str,
        options: &str,
    ) -> Result<Arc<dyn FileSystem>, FsError> {
        let ty = self
            .types
            .lock()
            .get(fs_type)
            .cloned()
            .ok_or(FsError::NoDevice)?;

        // 持有挂载表锁创建实例，保证同一目标不会被并发挂载两次
        let mut mounts = self.mounts.lock();
        if mounts.contains_key(target) {
            return Err(FsError::Busy);
        }
        let fs = ty.mount(options)?;
        mounts.insert(
            target.to_string(),
            MountPoint {
                target: target.to_string(),
                fs_type: ty.name(),
                options: options.to_string(),
                fs: fs.clone(),
            },
        );
        log::info!("vfs: mounted {} on {}", ty.name(), target);
        Ok(fs)
    }

    /// 卸载
    ///
    /// 挂载点不存在时返回 [`FsError::NotFound`]。
    pub fn umount(&self, target: &str) -> Result<(), FsError> {
        let mount = self.mounts.lock().remove(target).ok_or(FsError::NotFound)?;
        mount.fs.umount()?;
        log::info!("vfs: unmounted {} from {}", mount.fs_type, target);
        Ok(())
    }

    /// 获取挂载在目标上的文件系统
    pub fn get(&self, target: &str) -> Option<Arc<dyn FileSystem>> {
        self.mounts.lock().get(target).map(|m| m.fs.clone())
    }

    /// 列出所有挂载点（按目标路径排序）
    pub fn list(&self) -> Vec<MountPoint> {
        self.mounts.lock().values().cloned().collect()
    }
}
