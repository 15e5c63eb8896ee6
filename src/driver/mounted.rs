// 已挂载的驱动实例

use super::Driver;
use crate::model::Storage;
use crate::utils::path::get_actual_mount_path;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// 驱动实例：存储配置 + 解码后的驱动运行期状态
///
/// 每个挂载路径恰好一个，由注册表独占持有
pub struct MountedStorage {
    storage: RwLock<Storage>,
    driver: Box<dyn Driver>,
}

impl MountedStorage {
    pub fn new(storage: Storage, driver: Box<dyn Driver>) -> Self {
        Self {
            storage: RwLock::new(storage),
            driver,
        }
    }

    /// 存储配置快照
    pub fn storage(&self) -> Storage {
        self.storage.read().clone()
    }

    pub fn id(&self) -> u64 {
        self.storage.read().id
    }

    /// 内部挂载路径（负载均衡存储带 `.balance` 后缀）
    pub fn mount_path(&self) -> String {
        self.storage.read().mount_path.clone()
    }

    /// 对外可见的挂载路径
    pub fn virtual_path(&self) -> String {
        get_actual_mount_path(&self.storage.read().mount_path).to_string()
    }

    pub fn order(&self) -> i32 {
        self.storage.read().order
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.storage.read().modified
    }

    pub fn driver_name(&self) -> String {
        self.storage.read().driver.clone()
    }

    pub fn status(&self) -> String {
        self.storage.read().status.clone()
    }

    pub fn set_status(&self, status: impl Into<String>) {
        self.storage.write().set_status(status);
    }

    pub(crate) fn set_addition(&self, addition: String) {
        self.storage.write().addition = addition;
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// 是否为同一个实例
    pub fn same_as(&self, other: &MountedStorage) -> bool {
        std::ptr::eq(self, other)
    }
}

impl std::fmt::Debug for MountedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage.read();
        f.debug_struct("MountedStorage")
            .field("id", &storage.id)
            .field("mount_path", &storage.mount_path)
            .field("driver", &storage.driver)
            .field("status", &storage.status)
            .finish()
    }
}
