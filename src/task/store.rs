// 任务持久化接口

use crate::errors::Result;

/// 任务记录的持久化存储
///
/// 以 (kind, id) 为键保存序列化后的任务 JSON。
pub trait TaskStore: Send + Sync {
    /// 按首次写入顺序加载某类任务
    fn load_tasks(&self, kind: &str) -> Result<Vec<String>>;

    /// 写入或覆盖一条任务记录
    fn save_task(&self, kind: &str, id: &str, data: &str) -> Result<()>;

    fn remove_task(&self, kind: &str, id: &str) -> Result<()>;
}
