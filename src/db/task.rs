// 任务持久化数据的读写

use super::Database;
use crate::errors::Result;
use crate::task::TaskStore;
use chrono::Utc;
use rusqlite::params;

impl TaskStore for Database {
    fn load_tasks(&self, kind: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT persist_data FROM task_items WHERE kind = ?1 ORDER BY rowid")?;
        let items = stmt
            .query_map(params![kind], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(items)
    }

    fn save_task(&self, kind: &str, id: &str, data: &str) -> Result<()> {
        let conn = self.lock()?;
        // 冲突时只更新数据，rowid 不变，恢复时按首次写入顺序入队
        conn.execute(
            "INSERT INTO task_items (kind, id, persist_data, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(kind, id) DO UPDATE SET persist_data = excluded.persist_data, updated_at = excluded.updated_at",
            params![kind, id, data, Utc::now().timestamp_micros()],
        )?;
        Ok(())
    }

    fn remove_task(&self, kind: &str, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM task_items WHERE kind = ?1 AND id = ?2",
            params![kind, id],
        )?;
        Ok(())
    }
}
