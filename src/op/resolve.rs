//! 路径解析
//!
//! 虚拟路径 -> (驱动实例, 驱动内路径)：
//! - 最长前缀匹配：候选为等于或包含查询路径的挂载点，取深度最大者
//! - 同一虚拟路径下的多个负载均衡存储按轮询选取
//! - 没有直接挂载的中间目录由子挂载点合成

use super::storage::StorageRegistry;
use crate::driver::MountedStorage;
use crate::errors::{Error, Result};
use crate::model::Obj;
use crate::utils::path::{depth, fix_and_clean_path, get_actual_mount_path, is_sub_path, join_path};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

impl StorageRegistry {
    /// 按内部挂载路径（含 `.balance` 后缀）精确查找
    pub fn get_storage_by_mount_path(&self, mount_path: &str) -> Result<Arc<MountedStorage>> {
        let mount_path = fix_and_clean_path(mount_path);
        self.mounts
            .load(&mount_path)
            .ok_or(Error::StorageNotFound(mount_path))
    }

    pub fn has_storage(&self, mount_path: &str) -> bool {
        self.mounts.has(&fix_and_clean_path(mount_path))
    }

    /// 所有实例，按 order、mount_path 排序
    pub fn get_all_storages(&self) -> Vec<Arc<MountedStorage>> {
        let mut storages = self.mounts.values();
        sort_by_order(&mut storages);
        storages
    }

    /// 与查询路径最长匹配的所有实例，按内部挂载路径排序
    pub fn get_storages_by_path(&self, path: &str) -> Vec<Arc<MountedStorage>> {
        let path = fix_and_clean_path(path);
        let mut storages: Vec<Arc<MountedStorage>> = Vec::new();
        let mut cur_depth = 0;
        self.mounts.range(|mount_path, mounted| {
            let actual = get_actual_mount_path(mount_path);
            if is_sub_path(actual, &path) {
                let d = depth(actual);
                if d > cur_depth {
                    storages.clear();
                    cur_depth = d;
                }
                if d == cur_depth {
                    storages.push(mounted.clone());
                }
            }
            true
        });
        // 相同输入得到相同顺序
        storages.sort_by_key(|s| s.mount_path());
        storages
    }

    /// 按轮询从候选实例中选取一个
    pub fn get_balanced_storage(&self, path: &str) -> Option<Arc<MountedStorage>> {
        let mut storages = self.get_storages_by_path(path);
        match storages.len() {
            0 => None,
            1 => storages.pop(),
            n => {
                let virtual_path = storages[0].virtual_path();
                let index = {
                    let mut counter = self.balance.entry(virtual_path).or_insert(0);
                    *counter = (*counter + 1) % n;
                    *counter
                };
                Some(storages.swap_remove(index))
            }
        }
    }

    /// 前缀下由子挂载点合成的虚拟目录
    pub fn get_storage_virtual_files_by_path(&self, prefix: &str) -> Vec<Obj> {
        let prefix = fix_and_clean_path(prefix);
        let mut files = Vec::new();
        let mut seen = HashSet::new();
        for mounted in self.get_all_storages() {
            let mount_path = mounted.virtual_path();
            // 排除前缀本身和不在前缀下的挂载点
            if prefix.len() >= mount_path.len() || !is_sub_path(&prefix, &mount_path) {
                continue;
            }
            let name = mount_path[prefix.len()..]
                .trim_start_matches('/')
                .split('/')
                .next()
                .unwrap_or_default()
                .to_string();
            if name.is_empty() || !seen.insert(name.clone()) {
                continue;
            }
            let mut obj = Obj::folder(name.clone(), join_path(&prefix, &name));
            obj.modified = mounted.modified();
            files.push(obj);
        }
        files
    }

    /// 解析虚拟路径，返回实例和驱动内路径
    pub fn get_storage_and_actual_path(&self, raw_path: &str) -> Result<(Arc<MountedStorage>, String)> {
        let raw_path = fix_and_clean_path(raw_path);
        let Some(storage) = self.get_balanced_storage(&raw_path) else {
            if raw_path == "/" {
                return Err(Error::StorageNotFound("please add a storage first".to_string()));
            }
            return Err(Error::StorageNotFound(raw_path));
        };
        debug!("使用存储: {}", storage.mount_path());
        let mount_path = storage.virtual_path();
        let actual_path = fix_and_clean_path(raw_path.strip_prefix(&mount_path).unwrap_or(&raw_path));
        Ok((storage, actual_path))
    }
}

fn sort_by_order(storages: &mut [Arc<MountedStorage>]) {
    storages.sort_by(|a, b| {
        a.order()
            .cmp(&b.order())
            .then_with(|| a.mount_path().cmp(&b.mount_path()))
    });
}
