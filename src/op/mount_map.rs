// 挂载表
//
// 挂载路径 -> 驱动实例。所有读写都只通过 load / store / delete / range，
// 调用方拿到的是 Arc 克隆，不会在持有分片锁时跨越 await。

use crate::driver::MountedStorage;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct MountMap {
    inner: DashMap<String, Arc<MountedStorage>>,
}

impl MountMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, mount_path: &str) -> Option<Arc<MountedStorage>> {
        self.inner.get(mount_path).map(|e| e.value().clone())
    }

    /// 写入，返回被替换的旧实例
    pub fn store(&self, mount_path: String, mounted: Arc<MountedStorage>) -> Option<Arc<MountedStorage>> {
        self.inner.insert(mount_path, mounted)
    }

    pub fn delete(&self, mount_path: &str) -> Option<Arc<MountedStorage>> {
        self.inner.remove(mount_path).map(|(_, v)| v)
    }

    pub fn has(&self, mount_path: &str) -> bool {
        self.inner.contains_key(mount_path)
    }

    /// 遍历，回调返回 false 时停止
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Arc<MountedStorage>) -> bool,
    {
        for entry in self.inner.iter() {
            if !f(entry.key(), entry.value()) {
                break;
            }
        }
    }

    pub fn values(&self) -> Vec<Arc<MountedStorage>> {
        self.inner.iter().map(|e| e.value().clone()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
