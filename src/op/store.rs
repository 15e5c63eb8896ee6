// 存储记录持久化接口

use crate::errors::Result;
use crate::model::Storage;
use serde_json::{Map, Value};

/// 存储配置记录存储
pub trait StorageStore: Send + Sync {
    /// 创建记录并回填 ID
    fn create_storage(&self, storage: &mut Storage) -> Result<()>;

    fn get_storage_by_id(&self, id: u64) -> Result<Storage>;

    fn update_storage(&self, storage: &Storage) -> Result<()>;

    fn delete_storage_by_id(&self, id: u64) -> Result<()>;

    /// 所有未禁用的记录，按 order、mount_path 排序
    fn get_enabled_storages(&self) -> Result<Vec<Storage>>;

    fn get_group_storages(&self, group: &str) -> Result<Vec<Storage>>;

    /// 把 `changes` 中的键合并进分组内每条记录的 Addition
    fn update_group_storages(&self, group: &str, changes: &Map<String, Value>) -> Result<()>;
}
