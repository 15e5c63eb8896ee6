// 下载工具能力与工具表

use crate::errors::{Error, Result};
use crate::stream::ProgressSink;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// 提交给工具的下载参数
#[derive(Debug, Clone)]
pub struct AddUrlArgs {
    pub url: String,
    /// 任务 ID
    pub uid: String,
    pub temp_dir: PathBuf,
    /// 工具状态变化时可主动推送，任务收到后立即查询状态
    pub signal: mpsc::UnboundedSender<()>,
}

/// 工具视角下的一次下载
#[derive(Debug, Clone)]
pub struct ToolJob {
    pub uid: String,
    pub url: String,
    pub temp_dir: PathBuf,
    /// 工具内部的任务标识，`add_url` 返回
    pub gid: String,
}

/// 工具上报的状态
#[derive(Debug, Clone, Default)]
pub struct ToolStatus {
    pub progress: f64,
    pub status: String,
    pub completed: bool,
    /// 下载明确失败
    pub err: Option<String>,
    /// 工具把任务切换到新的标识（如磁力链接解析后）
    pub new_gid: Option<String>,
}

/// 下载产出的本地文件
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFile {
    pub name: String,
    pub size: u64,
    pub path: PathBuf,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// 初始化，返回就绪信息
    async fn init(&self) -> Result<String>;

    fn is_ready(&self) -> bool;

    /// 同步下载；返回 NotSupport 时改走 add_url + 轮询
    async fn run(&self, _job: &ToolJob, _progress: ProgressSink) -> Result<()> {
        Err(Error::NotSupport)
    }

    /// 提交下载，返回工具内部标识
    async fn add_url(&self, args: AddUrlArgs) -> Result<String>;

    async fn status(&self, job: &ToolJob) -> Result<ToolStatus>;

    /// 释放工具侧资源（取消或完成后）
    async fn remove(&self, job: &ToolJob) -> Result<()>;

    /// 工具自行提供产出文件列表；为 None 时遍历临时目录
    fn get_files(&self, _job: &ToolJob) -> Option<Vec<ToolFile>> {
        None
    }
}

/// 工具名称 -> 工具
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 初始化所有工具；失败只记录日志
    pub async fn init_all(&self) {
        for (name, tool) in &self.tools {
            match tool.init().await {
                Ok(msg) => info!("离线下载工具就绪: {}, {}", name, msg),
                Err(e) => warn!("离线下载工具初始化失败: {}, 错误: {}", name, e),
            }
        }
    }
}

/// 遍历目录下的所有文件
pub async fn collect_files(dir: &Path) -> Result<Vec<ToolFile>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Other(format!("遍历目录失败: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(ToolFile {
                name: entry.file_name().to_string_lossy().to_string(),
                size,
                path: entry.path().to_path_buf(),
            });
        }
        Ok(files)
    })
    .await
    .map_err(|e| Error::Other(format!("遍历任务异常: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_collect_files_recursive() {
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("album/cd1")).await.unwrap();
        tokio::fs::write(dir.path().join("album/cd1/01.flac"), b"abc").await.unwrap();
        tokio::fs::write(dir.path().join("cover.jpg"), b"x").await.unwrap();

        let files = collect_files(dir.path()).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "01.flac");
        assert_eq!(files[0].size, 3);
        assert_eq!(files[1].path, dir.path().join("cover.jpg"));
    }

    #[tokio::test]
    async fn test_collect_files_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(collect_files(&dir.path().join("ghost")).await.is_err());
    }
}
