//! 存储注册表
//!
//! 维护 挂载路径 -> 驱动实例 的映射，负责存储的创建、加载、启用、禁用、
//! 更新和删除。记录存储与挂载表的一致性约束：
//! - 挂载路径规范化后唯一
//! - 被禁用的存储不在挂载表中，永远不会被解析到
//! - 实例从挂载表移除前先调用驱动的 release

use super::mount_map::MountMap;
use super::store::StorageStore;
use crate::driver::{Driver, DriverTable, MountedStorage};
use crate::errors::{Error, Result};
use crate::model::{Storage, STATUS_DISABLED, STATUS_WORK};
use crate::utils::path::fix_and_clean_path;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 存储变更事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEvent {
    Add,
    Del,
    Update,
}

impl StorageEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageEvent::Add => "add",
            StorageEvent::Del => "del",
            StorageEvent::Update => "update",
        }
    }
}

/// 存储变更回调（异步触发）
pub type StorageHook = Arc<dyn Fn(StorageEvent, Storage) + Send + Sync>;

/// 同步组比较 Addition 时忽略的键
const GROUP_EXCLUDED_KEYS: &[&str] = &["order", "cache_expiration", "remark", "group", "sync_group"];

pub struct StorageRegistry {
    pub(super) mounts: MountMap,
    /// 虚拟挂载路径 -> 轮询计数（不持久化）
    pub(super) balance: DashMap<String, usize>,
    store: Arc<dyn StorageStore>,
    drivers: DriverTable,
    hooks: RwLock<Vec<StorageHook>>,
}

fn parse_addition(addition: &str) -> Result<Map<String, Value>> {
    if addition.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(addition).map_err(|e| Error::InvalidAddition(e.to_string()))
}

/// 新 Addition 中与旧值不同的键（忽略分组无关字段）
fn diff_addition(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let mut changes = Map::new();
    for (key, value) in new {
        if GROUP_EXCLUDED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if old.get(key) != Some(value) {
            changes.insert(key.clone(), value.clone());
        }
    }
    changes
}

impl StorageRegistry {
    pub fn new(store: Arc<dyn StorageStore>, drivers: DriverTable) -> Arc<Self> {
        Arc::new(Self {
            mounts: MountMap::new(),
            balance: DashMap::new(),
            store,
            drivers,
            hooks: RwLock::new(Vec::new()),
        })
    }

    pub fn drivers(&self) -> &DriverTable {
        &self.drivers
    }

    pub fn register_hook(&self, hook: StorageHook) {
        self.hooks.write().push(hook);
    }

    fn call_hooks(&self, event: StorageEvent, mounted: &MountedStorage) {
        let hooks = self.hooks.read().clone();
        if hooks.is_empty() {
            return;
        }
        let storage = mounted.storage();
        tokio::spawn(async move {
            for hook in hooks {
                hook(event, storage.clone());
            }
        });
    }

    /// 创建存储：写入记录、实例化驱动并初始化
    ///
    /// 初始化失败时记录和实例都已存在（状态为错误信息），返回 `InitFailed`
    pub async fn create_storage(&self, mut storage: Storage) -> Result<u64> {
        storage.modified = Utc::now();
        storage.mount_path = fix_and_clean_path(&storage.mount_path);

        let driver = self.drivers.create(&storage.driver)?;
        if self.mounts.has(&storage.mount_path) {
            return Err(Error::MountPathExists(storage.mount_path));
        }
        self.store.create_storage(&mut storage)?;

        let id = storage.id;
        let mount_path = storage.mount_path.clone();
        let (mounted, result) = self.init_storage(storage, driver).await;
        self.call_hooks(StorageEvent::Add, &mounted);

        if let Err(e) = result {
            warn!("存储已创建但初始化失败: mount_path={}, 错误: {}", mount_path, e);
            return Err(Error::InitFailed {
                id,
                reason: e.to_string(),
            });
        }
        info!("存储已创建: id={}, mount_path={}", id, mount_path);
        Ok(id)
    }

    /// 加载已有记录（启动时或启用时），不创建记录
    pub async fn load_storage(&self, mut storage: Storage) -> Result<()> {
        storage.mount_path = fix_and_clean_path(&storage.mount_path);
        let driver = self.drivers.create(&storage.driver)?;
        let mount_path = storage.mount_path.clone();

        let (mounted, result) = self.init_storage(storage, driver).await;
        self.call_hooks(StorageEvent::Add, &mounted);

        match &result {
            Ok(()) => info!("存储已加载: {} ({})", mount_path, mounted.driver_name()),
            Err(e) => error!("加载存储失败: {}, 错误: {}", mount_path, e),
        }
        result
    }

    /// 初始化序列：解码 Addition、调用 init、登记到挂载表、回写状态
    ///
    /// 无论 init 是否成功都登记到挂载表
    async fn init_storage(
        &self,
        storage: Storage,
        mut driver: Box<dyn Driver>,
    ) -> (Arc<MountedStorage>, Result<()>) {
        let mount_path = storage.mount_path.clone();
        let mut result = driver.load_addition(&storage.addition);
        if result.is_ok() {
            result = driver.init().await;
        }

        let mounted = Arc::new(MountedStorage::new(storage, driver));
        match &result {
            Ok(()) => mounted.set_status(STATUS_WORK),
            Err(e) => mounted.set_status(e.to_string()),
        }
        self.mounts.store(mount_path, mounted.clone());
        self.save_driver_storage(&mounted);
        (mounted, result)
    }

    /// 把驱动当前的 Addition 与状态写回记录存储，失败只记录日志
    pub fn save_driver_storage(&self, mounted: &MountedStorage) {
        match mounted.driver().dump_addition() {
            Ok(addition) => mounted.set_addition(addition),
            Err(e) => error!("导出 Addition 失败: {}, 错误: {}", mounted.mount_path(), e),
        }
        if let Err(e) = self.store.update_storage(&mounted.storage()) {
            error!("保存存储状态失败: {}, 错误: {}", mounted.mount_path(), e);
        }
    }

    pub async fn enable_storage(&self, id: u64) -> Result<()> {
        let mut storage = self.store.get_storage_by_id(id)?;
        if !storage.disabled {
            return Err(Error::AlreadyEnabled);
        }
        storage.disabled = false;
        self.store.update_storage(&storage)?;
        self.load_storage(storage).await
    }

    pub async fn disable_storage(&self, id: u64) -> Result<()> {
        let mut storage = self.store.get_storage_by_id(id)?;
        if storage.disabled {
            return Err(Error::AlreadyDisabled);
        }

        let live = self.mounts.load(&storage.mount_path);
        if let Some(live) = &live {
            live.driver()
                .release()
                .await
                .map_err(|e| e.context("failed drop storage"))?;
            live.set_status(STATUS_DISABLED);
            self.mounts.delete(&storage.mount_path);
        }

        storage.disabled = true;
        storage.set_status(STATUS_DISABLED);
        self.store.update_storage(&storage)?;

        if let Some(live) = live {
            self.call_hooks(StorageEvent::Del, &live);
        }
        info!("存储已禁用: id={}, mount_path={}", id, storage.mount_path);
        Ok(())
    }

    /// 更新存储
    ///
    /// - 驱动类型不可修改
    /// - 挂载路径变更时先移除旧键
    /// - 开启同步组时只比较 Addition 差异并同步到整个分组
    pub async fn update_storage(self: &Arc<Self>, mut storage: Storage) -> Result<()> {
        let old = self.store.get_storage_by_id(storage.id)?;
        if old.driver != storage.driver {
            return Err(Error::DriverChanged);
        }
        storage.modified = Utc::now();
        storage.mount_path = fix_and_clean_path(&storage.mount_path);
        let renamed = storage.mount_path != old.mount_path;
        if renamed && self.mounts.has(&storage.mount_path) {
            return Err(Error::MountPathExists(storage.mount_path));
        }

        if storage.sync_group && !storage.group.is_empty() {
            return self.update_sync_group(old, storage).await;
        }

        let live = self.mounts.load(&old.mount_path);
        self.store.update_storage(&storage)?;

        if let Some(live) = &live {
            if renamed || storage.disabled {
                self.mounts.delete(&old.mount_path);
            }
            if let Err(e) = live.driver().release().await {
                warn!("释放旧驱动实例失败: {}, 错误: {}", old.mount_path, e);
            }
        }

        if storage.disabled {
            if let Some(live) = &live {
                self.call_hooks(StorageEvent::Del, live);
            }
            debug!("存储已更新（禁用状态，不重新初始化）: id={}", storage.id);
            return Ok(());
        }

        let driver = self.drivers.create(&storage.driver)?;
        let (mounted, result) = self.init_storage(storage, driver).await;
        self.call_hooks(StorageEvent::Update, &mounted);
        result
    }

    async fn update_sync_group(self: &Arc<Self>, old: Storage, storage: Storage) -> Result<()> {
        let changes = diff_addition(
            &parse_addition(&old.addition)?,
            &parse_addition(&storage.addition)?,
        );
        if changes.is_empty() {
            return Err(Error::NoChange);
        }

        self.store.update_storage(&storage)?;
        self.store.update_group_storages(&storage.group, &changes)?;
        info!(
            "同步组 {} 的 Addition 已更新: {:?}",
            storage.group,
            changes.keys().collect::<Vec<_>>()
        );

        if storage.mount_path != old.mount_path || storage.disabled {
            if let Some(live) = self.mounts.delete(&old.mount_path) {
                if let Err(e) = live.driver().release().await {
                    warn!("释放旧驱动实例失败: {}, 错误: {}", old.mount_path, e);
                }
                self.call_hooks(StorageEvent::Del, &live);
            }
        }

        let registry = self.clone();
        let group = storage.group.clone();
        tokio::spawn(async move {
            registry.reload_group(&group).await;
        });
        Ok(())
    }

    /// 按最新记录重建分组内所有未禁用存储的实例
    async fn reload_group(&self, group: &str) {
        let storages = match self.store.get_group_storages(group) {
            Ok(storages) => storages,
            Err(e) => {
                error!("读取分组 {} 的存储失败: {}", group, e);
                return;
            }
        };

        for storage in storages.into_iter().filter(|s| !s.disabled) {
            if let Some(live) = self.mounts.delete(&storage.mount_path) {
                if let Err(e) = live.driver().release().await {
                    warn!("释放驱动实例失败: {}, 错误: {}", storage.mount_path, e);
                }
            }
            let driver = match self.drivers.create(&storage.driver) {
                Ok(driver) => driver,
                Err(e) => {
                    error!("重建驱动实例失败: {}, 错误: {}", storage.mount_path, e);
                    continue;
                }
            };
            let mount_path = storage.mount_path.clone();
            let (mounted, result) = self.init_storage(storage, driver).await;
            if let Err(e) = result {
                warn!("重新加载同组存储失败: {}, 错误: {}", mount_path, e);
            }
            self.call_hooks(StorageEvent::Update, &mounted);
        }
        debug!("分组 {} 重新加载完成", group);
    }

    pub async fn delete_storage_by_id(&self, id: u64) -> Result<()> {
        let storage = self.store.get_storage_by_id(id)?;
        if !storage.disabled {
            if let Some(live) = self.mounts.load(&storage.mount_path) {
                live.driver()
                    .release()
                    .await
                    .map_err(|e| e.context("failed drop storage"))?;
                self.mounts.delete(&storage.mount_path);
                self.call_hooks(StorageEvent::Del, &live);
            }
        }
        self.store.delete_storage_by_id(id)?;
        info!("存储已删除: id={}, mount_path={}", id, storage.mount_path);
        Ok(())
    }

    /// 启动时加载所有未禁用的存储，返回初始化成功的数量
    pub async fn load_all_storages(&self) -> Result<usize> {
        let storages = self.store.get_enabled_storages()?;
        let total = storages.len();
        let results = join_all(storages.into_iter().map(|s| self.load_storage(s))).await;
        let loaded = results.iter().filter(|r| r.is_ok()).count();
        info!("存储加载完成: 成功 {}/{}", loaded, total);
        Ok(loaded)
    }

    /// 释放所有实例（进程退出前）
    pub async fn release_all(&self) {
        for mounted in self.mounts.values() {
            if let Err(e) = mounted.driver().release().await {
                warn!("释放驱动实例失败: {}, 错误: {}", mounted.mount_path(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::test_support::{mock_driver_table, mock_stats, wait_until, MOCK_DRIVER};
    use parking_lot::Mutex;
    use proptest::prelude::*;

    fn registry() -> (Arc<StorageRegistry>, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = StorageRegistry::new(db.clone(), mock_driver_table());
        (registry, db)
    }

    fn mock(mount_path: &str, tag: &str) -> Storage {
        Storage::new(mount_path, MOCK_DRIVER).with_addition(format!(r#"{{"tag":"{}"}}"#, tag))
    }

    fn tag() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    #[tokio::test]
    async fn test_create_storage_registers_and_persists_status() {
        let (registry, db) = registry();
        let id = registry.create_storage(mock("a/", &tag())).await.unwrap();

        let mounted = registry.get_storage_by_mount_path("/a").unwrap();
        assert_eq!(mounted.status(), STATUS_WORK);
        assert_eq!(db.get_storage_by_id(id).unwrap().status, STATUS_WORK);
    }

    #[tokio::test]
    async fn test_create_storage_init_failure_keeps_record() {
        let (registry, db) = registry();
        let storage = Storage::new("/bad", MOCK_DRIVER).with_addition(r#"{"fail_init":true}"#);
        let err = registry.create_storage(storage).await.unwrap_err();

        let Error::InitFailed { id, reason } = err else {
            panic!("应返回 InitFailed");
        };
        assert!(reason.contains("mock init failed"));
        assert!(registry.has_storage("/bad"));
        assert_eq!(
            db.get_storage_by_id(id).unwrap().status,
            "mock init failed"
        );
    }

    #[tokio::test]
    async fn test_create_storage_rejects_unknown_driver_and_duplicates() {
        let (registry, db) = registry();
        let err = registry
            .create_storage(Storage::new("/x", "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDriver(_)));
        assert!(db.get_enabled_storages().unwrap().is_empty());

        registry.create_storage(mock("/x", &tag())).await.unwrap();
        let err = registry.create_storage(mock("/x/", &tag())).await.unwrap_err();
        assert!(matches!(err, Error::MountPathExists(p) if p == "/x"));
        assert_eq!(db.get_enabled_storages().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disable_enable_cycle() {
        let (registry, db) = registry();
        let tag = tag();
        let id = registry.create_storage(mock("/a", &tag)).await.unwrap();

        registry.disable_storage(id).await.unwrap();
        assert!(!registry.has_storage("/a"));
        assert!(registry.get_storage_and_actual_path("/a/file").is_err());
        assert_eq!(mock_stats(&tag).releases, 1);
        assert_eq!(db.get_storage_by_id(id).unwrap().status, STATUS_DISABLED);
        assert!(matches!(
            registry.disable_storage(id).await,
            Err(Error::AlreadyDisabled)
        ));

        registry.enable_storage(id).await.unwrap();
        assert!(registry.has_storage("/a"));
        assert_eq!(db.get_storage_by_id(id).unwrap().status, STATUS_WORK);
        assert!(matches!(
            registry.enable_storage(id).await,
            Err(Error::AlreadyEnabled)
        ));
    }

    #[tokio::test]
    async fn test_update_storage_rename_and_driver_change() {
        let (registry, _db) = registry();
        let tag = tag();
        let id = registry.create_storage(mock("/old", &tag)).await.unwrap();
        registry.create_storage(mock("/taken", &tag)).await.unwrap();

        let mut storage = registry.get_storage_by_mount_path("/old").unwrap().storage();
        storage.driver = crate::driver::LOCAL_DRIVER.to_string();
        assert!(matches!(
            registry.update_storage(storage.clone()).await,
            Err(Error::DriverChanged)
        ));

        storage.driver = MOCK_DRIVER.to_string();
        storage.mount_path = "/taken".to_string();
        assert!(matches!(
            registry.update_storage(storage.clone()).await,
            Err(Error::MountPathExists(_))
        ));
        assert!(registry.has_storage("/old"));

        storage.mount_path = "/new/".to_string();
        registry.update_storage(storage.clone()).await.unwrap();
        assert!(!registry.has_storage("/old"));
        let mounted = registry.get_storage_by_mount_path("/new").unwrap();
        assert_eq!(mounted.id(), id);
        assert_eq!(mock_stats(&tag).releases, 1);
    }

    #[tokio::test]
    async fn test_update_storage_to_disabled_drops_instance() {
        let (registry, _db) = registry();
        let id = registry.create_storage(mock("/a", &tag())).await.unwrap();

        let mut storage = registry.get_storage_by_mount_path("/a").unwrap().storage();
        storage.disabled = true;
        registry.update_storage(storage).await.unwrap();

        assert!(!registry.has_storage("/a"));
        registry.enable_storage(id).await.unwrap();
        assert!(registry.has_storage("/a"));
    }

    #[tokio::test]
    async fn test_update_sync_group_propagates_changes() {
        let (registry, db) = registry();
        let a = Storage::new("/g1", MOCK_DRIVER)
            .with_addition(r#"{"token":"old","tag":"g1"}"#)
            .with_group("g", true);
        let b = Storage::new("/g2", MOCK_DRIVER)
            .with_addition(r#"{"token":"old","tag":"g2"}"#)
            .with_group("g", true);
        let id_a = registry.create_storage(a).await.unwrap();
        let id_b = registry.create_storage(b).await.unwrap();

        let mut storage = db.get_storage_by_id(id_a).unwrap();
        assert!(matches!(
            registry.update_storage(storage.clone()).await,
            Err(Error::NoChange)
        ));

        // 仅排除字段变化也视为无变化
        storage.addition = r#"{"token":"old","tag":"g1","remark":"x"}"#.to_string();
        assert!(matches!(
            registry.update_storage(storage.clone()).await,
            Err(Error::NoChange)
        ));

        storage.addition = r#"{"token":"new","tag":"g1"}"#.to_string();
        registry.update_storage(storage).await.unwrap();

        let b_record: Value =
            serde_json::from_str(&db.get_storage_by_id(id_b).unwrap().addition).unwrap();
        assert_eq!(b_record["token"], "new");
        assert_eq!(b_record["tag"], "g2");

        let registry_clone = registry.clone();
        wait_until(move || {
            registry_clone
                .get_storage_by_mount_path("/g2")
                .map(|m| m.storage().addition.contains("new"))
                .unwrap_or(false)
        })
        .await;
    }

    #[tokio::test]
    async fn test_delete_storage() {
        let (registry, db) = registry();
        let id = registry.create_storage(mock("/a", &tag())).await.unwrap();
        registry.delete_storage_by_id(id).await.unwrap();
        assert!(!registry.has_storage("/a"));
        assert!(db.get_storage_by_id(id).is_err());

        // 已禁用的存储直接删除记录
        let id = registry.create_storage(mock("/b", &tag())).await.unwrap();
        registry.disable_storage(id).await.unwrap();
        registry.delete_storage_by_id(id).await.unwrap();
        assert!(db.get_enabled_storages().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_all_storages_and_hooks() {
        let (registry, db) = registry();
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        registry.register_hook(Arc::new(move |event, storage| {
            events_clone.lock().push((event, storage.mount_path));
        }));

        db.create_storage(&mut mock("/a", &tag())).unwrap();
        db.create_storage(&mut Storage::new("/b", MOCK_DRIVER).with_addition(r#"{"fail_init":true}"#))
            .unwrap();
        let mut disabled = mock("/c", &tag());
        disabled.disabled = true;
        db.create_storage(&mut disabled).unwrap();

        assert_eq!(registry.load_all_storages().await.unwrap(), 1);
        assert!(registry.has_storage("/a"));
        assert!(registry.has_storage("/b"));
        assert!(!registry.has_storage("/c"));

        let events_clone = events.clone();
        wait_until(move || events_clone.lock().len() == 2).await;
        assert!(events
            .lock()
            .iter()
            .all(|(event, _)| *event == StorageEvent::Add));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create(usize),
        Disable(usize),
        Enable(usize),
        Delete(usize),
        Rename(usize, usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize).prop_map(Op::Create),
            (0..4usize).prop_map(Op::Disable),
            (0..4usize).prop_map(Op::Enable),
            (0..4usize).prop_map(Op::Delete),
            (0..4usize, 0..4usize).prop_map(|(a, b)| Op::Rename(a, b)),
        ]
    }

    const PATHS: [&str; 4] = ["/a", "/a/", "/b", "/a/b"];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_registry_consistent_under_crud(ops in proptest::collection::vec(op_strategy(), 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let (registry, db) = registry();
                for op in ops {
                    // 按挂载路径找到记录（含已禁用）
                    let find = |path: &str| -> Option<Storage> {
                        let path = fix_and_clean_path(path);
                        let enabled = db.get_enabled_storages().unwrap();
                        enabled.into_iter().find(|s| s.mount_path == path).or_else(|| {
                            (1..200).filter_map(|id| db.get_storage_by_id(id).ok())
                                .find(|s| s.mount_path == path)
                        })
                    };
                    let _ = match op {
                        Op::Create(i) => registry.create_storage(mock(PATHS[i], "")).await.map(|_| ()),
                        Op::Disable(i) => match find(PATHS[i]) {
                            Some(s) => registry.disable_storage(s.id).await,
                            None => Ok(()),
                        },
                        Op::Enable(i) => match find(PATHS[i]) {
                            Some(s) => registry.enable_storage(s.id).await,
                            None => Ok(()),
                        },
                        Op::Delete(i) => match find(PATHS[i]) {
                            Some(s) => registry.delete_storage_by_id(s.id).await,
                            None => Ok(()),
                        },
                        Op::Rename(i, j) => match find(PATHS[i]) {
                            Some(mut s) => {
                                s.mount_path = PATHS[j].to_string();
                                registry.update_storage(s).await
                            }
                            None => Ok(()),
                        },
                    };

                    // 挂载表与未禁用记录一一对应
                    let mut live = registry.mounts.keys();
                    live.sort();
                    let mut enabled: Vec<String> = db
                        .get_enabled_storages()
                        .unwrap()
                        .into_iter()
                        .map(|s| s.mount_path)
                        .collect();
                    enabled.sort();
                    assert_eq!(live, enabled);

                    // 被禁用的存储不会被解析到
                    for id in 1..200 {
                        if let Ok(s) = db.get_storage_by_id(id) {
                            if s.disabled {
                                assert!(!registry.has_storage(&s.mount_path));
                            }
                        }
                    }
                }
            });
        }
    }
}
