// 存储配置记录的读写

use super::Database;
use crate::errors::{Error, Result};
use crate::model::Storage;
use crate::op::StorageStore;
use chrono::{TimeZone, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use serde_json::{Map, Value};
use tracing::debug;

const STORAGE_COLUMNS: &str = "id, mount_path, sort_order, driver, cache_expiration, status, \
                               addition, remark, modified, disabled, group_name, sync_group";

fn row_to_storage(row: &Row<'_>) -> rusqlite::Result<Storage> {
    let modified_ms: i64 = row.get(8)?;
    Ok(Storage {
        id: row.get::<_, i64>(0)? as u64,
        mount_path: row.get(1)?,
        order: row.get(2)?,
        driver: row.get(3)?,
        cache_expiration: row.get(4)?,
        status: row.get(5)?,
        addition: row.get(6)?,
        remark: row.get(7)?,
        modified: Utc
            .timestamp_millis_opt(modified_ms)
            .single()
            .unwrap_or_else(Utc::now),
        disabled: row.get(9)?,
        group: row.get(10)?,
        sync_group: row.get(11)?,
    })
}

/// 唯一约束冲突转换为挂载路径冲突
fn map_unique(err: rusqlite::Error, mount_path: &str) -> Error {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::ConstraintViolation => {
            Error::MountPathExists(mount_path.to_string())
        }
        other => Error::Database(other),
    }
}

impl StorageStore for Database {
    fn create_storage(&self, storage: &mut Storage) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO storages (mount_path, sort_order, driver, cache_expiration, status, \
             addition, remark, modified, disabled, group_name, sync_group) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                storage.mount_path,
                storage.order,
                storage.driver,
                storage.cache_expiration,
                storage.status,
                storage.addition,
                storage.remark,
                storage.modified.timestamp_millis(),
                storage.disabled,
                storage.group,
                storage.sync_group,
            ],
        )
        .map_err(|e| map_unique(e, &storage.mount_path))?;
        storage.id = conn.last_insert_rowid() as u64;
        debug!("已创建存储记录: id={}, mount_path={}", storage.id, storage.mount_path);
        Ok(())
    }

    fn get_storage_by_id(&self, id: u64) -> Result<Storage> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM storages WHERE id = ?1", STORAGE_COLUMNS),
            params![id as i64],
            row_to_storage,
        )
        .optional()?
        .ok_or_else(|| Error::RecordNotFound(format!("storage id={}", id)))
    }

    fn update_storage(&self, storage: &Storage) -> Result<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE storages SET mount_path = ?1, sort_order = ?2, driver = ?3, \
                 cache_expiration = ?4, status = ?5, addition = ?6, remark = ?7, modified = ?8, \
                 disabled = ?9, group_name = ?10, sync_group = ?11 WHERE id = ?12",
                params![
                    storage.mount_path,
                    storage.order,
                    storage.driver,
                    storage.cache_expiration,
                    storage.status,
                    storage.addition,
                    storage.remark,
                    storage.modified.timestamp_millis(),
                    storage.disabled,
                    storage.group,
                    storage.sync_group,
                    storage.id as i64,
                ],
            )
            .map_err(|e| map_unique(e, &storage.mount_path))?;
        if affected == 0 {
            return Err(Error::RecordNotFound(format!("storage id={}", storage.id)));
        }
        Ok(())
    }

    fn delete_storage_by_id(&self, id: u64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM storages WHERE id = ?1", params![id as i64])?;
        debug!("已删除存储记录: id={}", id);
        Ok(())
    }

    fn get_enabled_storages(&self) -> Result<Vec<Storage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM storages WHERE disabled = 0 ORDER BY sort_order, mount_path",
            STORAGE_COLUMNS
        ))?;
        let storages = stmt
            .query_map([], row_to_storage)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(storages)
    }

    fn get_group_storages(&self, group: &str) -> Result<Vec<Storage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM storages WHERE group_name = ?1 ORDER BY sort_order, mount_path",
            STORAGE_COLUMNS
        ))?;
        let storages = stmt
            .query_map(params![group], row_to_storage)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(storages)
    }

    fn update_group_storages(&self, group: &str, changes: &Map<String, Value>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let rows: Vec<(i64, String)> = {
            let mut stmt = tx.prepare("SELECT id, addition FROM storages WHERE group_name = ?1")?;
            let rows = stmt
                .query_map(params![group], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let now = Utc::now().timestamp_millis();
        for (id, addition) in rows {
            let mut map: Map<String, Value> = serde_json::from_str(&addition)
                .map_err(|e| Error::InvalidAddition(format!("storage id={}: {}", id, e)))?;
            for (key, value) in changes {
                map.insert(key.clone(), value.clone());
            }
            tx.execute(
                "UPDATE storages SET addition = ?1, modified = ?2 WHERE id = ?3",
                params![serde_json::to_string(&map)?, now, id],
            )?;
        }
        tx.commit()?;

        debug!("已同步分组 {} 的 Addition 字段: {:?}", group, changes.keys());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_get_update_delete() {
        let db = Database::open_in_memory().unwrap();
        let mut storage = Storage::new("/a", "mock").with_addition(r#"{"root":"1"}"#);
        db.create_storage(&mut storage).unwrap();
        assert!(storage.id > 0);

        let mut loaded = db.get_storage_by_id(storage.id).unwrap();
        assert_eq!(loaded.mount_path, "/a");
        assert_eq!(loaded.addition, r#"{"root":"1"}"#);

        loaded.disabled = true;
        db.update_storage(&loaded).unwrap();
        assert!(db.get_enabled_storages().unwrap().is_empty());

        db.delete_storage_by_id(storage.id).unwrap();
        assert!(matches!(
            db.get_storage_by_id(storage.id),
            Err(Error::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_mount_path_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_storage(&mut Storage::new("/a", "mock")).unwrap();
        let result = db.create_storage(&mut Storage::new("/a", "mock"));
        assert!(matches!(result, Err(Error::MountPathExists(p)) if p == "/a"));
    }

    #[test]
    fn test_update_group_storages_merges_keys() {
        let db = Database::open_in_memory().unwrap();
        let mut a = Storage::new("/a", "mock")
            .with_addition(r#"{"token":"old","root":"1"}"#)
            .with_group("g", true);
        let mut b = Storage::new("/b", "mock")
            .with_addition(r#"{"token":"old","root":"2"}"#)
            .with_group("g", true);
        let mut c = Storage::new("/c", "mock").with_addition(r#"{"token":"old"}"#);
        db.create_storage(&mut a).unwrap();
        db.create_storage(&mut b).unwrap();
        db.create_storage(&mut c).unwrap();

        let mut changes = Map::new();
        changes.insert("token".to_string(), Value::String("new".to_string()));
        db.update_group_storages("g", &changes).unwrap();

        let a: Value = serde_json::from_str(&db.get_storage_by_id(a.id).unwrap().addition).unwrap();
        let b: Value = serde_json::from_str(&db.get_storage_by_id(b.id).unwrap().addition).unwrap();
        let c: Value = serde_json::from_str(&db.get_storage_by_id(c.id).unwrap().addition).unwrap();
        assert_eq!(a["token"], "new");
        assert_eq!(a["root"], "1");
        assert_eq!(b["token"], "new");
        assert_eq!(b["root"], "2");
        assert_eq!(c["token"], "old");
    }
}
