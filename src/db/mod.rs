//! SQLite 记录存储
//!
//! 保存两类记录：
//! - storages: 存储（挂载）配置
//! - task_items: 各类任务的持久化数据（按 kind + id 单条写入）

mod storage;
mod task;

use crate::errors::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// 数据库管理器
pub struct Database {
    /// SQLite 连接
    conn: Mutex<Connection>,
}

impl Database {
    /// 打开（或创建）数据库文件
    pub fn new(db_path: &Path) -> Result<Self> {
        // 确保父目录存在
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_tables()?;

        info!("数据库已打开: {:?}", db_path);
        Ok(db)
    }

    /// 内存数据库
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_tables()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Other(format!("获取数据库锁失败: {}", e)))
    }

    /// 初始化数据库表
    fn init_tables(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS storages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mount_path TEXT NOT NULL UNIQUE,
                sort_order INTEGER NOT NULL DEFAULT 0,
                driver TEXT NOT NULL,
                cache_expiration INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT '',
                addition TEXT NOT NULL DEFAULT '{}',
                remark TEXT NOT NULL DEFAULT '',
                modified INTEGER NOT NULL,
                disabled INTEGER NOT NULL DEFAULT 0,
                group_name TEXT NOT NULL DEFAULT '',
                sync_group INTEGER NOT NULL DEFAULT 0
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_storages_group ON storages(group_name)",
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS task_items (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                persist_data TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (kind, id)
            )
            "#,
            [],
        )?;

        Ok(())
    }
}
