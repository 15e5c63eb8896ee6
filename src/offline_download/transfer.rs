// 转存任务：把离线下载的本地文件写入目标存储

use super::DeletePolicy;
use crate::context::TaskContext;
use crate::errors::Result;
use crate::op::object;
use crate::stream::SeekableStream;
use crate::task::{Task, TaskBase};
use crate::utils::path::join_path;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize)]
pub struct TransferTask {
    #[serde(flatten)]
    pub base: TaskBase,
    /// 本地文件
    pub file_path: PathBuf,
    /// 目标目录（命名空间路径）
    pub dst_dir_path: String,
    /// 下载任务的临时目录，文件相对它的子目录结构会保留
    pub temp_dir: PathBuf,
    #[serde(default)]
    pub delete_policy: DeletePolicy,
}

impl TransferTask {
    pub fn new(
        file_path: impl Into<PathBuf>,
        dst_dir_path: impl Into<String>,
        temp_dir: impl Into<PathBuf>,
        delete_policy: DeletePolicy,
    ) -> Self {
        Self {
            base: TaskBase::new(),
            file_path: file_path.into(),
            dst_dir_path: dst_dir_path.into(),
            temp_dir: temp_dir.into(),
            delete_policy,
        }
    }

    /// 文件在临时目录中的相对父目录
    fn relative_dir(&self) -> String {
        self.file_path
            .parent()
            .and_then(|parent| parent.strip_prefix(&self.temp_dir).ok())
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }

    async fn cleanup(&self, succeeded: bool) {
        if !self.delete_policy.should_delete(succeeded) {
            return;
        }
        match tokio::fs::remove_file(&self.file_path).await {
            Ok(()) => debug!("已删除临时文件: {:?}", self.file_path),
            Err(e) => warn!("删除临时文件失败: {:?}, 错误: {}", self.file_path, e),
        }
        remove_empty_dirs(&self.file_path, &self.temp_dir).await;
    }
}

/// 自下而上删除临时目录内的空目录，包括临时目录本身
async fn remove_empty_dirs(file_path: &Path, temp_dir: &Path) {
    let mut dir = file_path.parent();
    while let Some(cur) = dir {
        if !cur.starts_with(temp_dir) {
            break;
        }
        // 非空目录删除失败即停止
        if tokio::fs::remove_dir(cur).await.is_err() {
            break;
        }
        if cur == temp_dir {
            break;
        }
        dir = cur.parent();
    }
}

#[async_trait]
impl Task for TransferTask {
    type Context = TaskContext;

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn name(&self) -> String {
        format!("transfer {} to [{}]", self.file_path.display(), self.dst_dir_path)
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        // 目标可能在排队期间被修改，执行时重新解析
        let (storage, dst_dir_actual) = ctx
            .registry
            .get_storage_and_actual_path(&self.dst_dir_path)
            .map_err(|e| e.context("failed get storage"))?;
        let stream = SeekableStream::from_local(&self.file_path)
            .await
            .map_err(|e| e.context(format!("failed open file {}", self.file_path.display())))?;
        let dst_dir = join_path(&dst_dir_actual, &self.relative_dir());

        let token = self.base.cancel_token();
        tokio::select! {
            result = object::put(&storage, &dst_dir, stream, self.base.progress_sink()) => result,
            _ = token.cancelled() => Err(crate::errors::Error::Canceled),
        }
    }

    async fn on_succeeded(&self, _ctx: &TaskContext) {
        info!("转存完成: {}", self.name());
        self.cleanup(true).await;
    }

    async fn on_failed(&self, _ctx: &TaskContext) {
        self.cleanup(false).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::Database;
    use crate::model::Storage;
    use crate::notify::NoopNotifier;
    use crate::offline_download::ToolRegistry;
    use crate::op::StorageRegistry;
    use crate::task::TaskState;
    use crate::test_support::{mock_addition, mock_driver_table, wait_until, MOCK_DRIVER};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn context(root: &Path) -> Arc<TaskContext> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = StorageRegistry::new(db, mock_driver_table());
        registry
            .create_storage(Storage::new("/dst", MOCK_DRIVER).with_addition(mock_addition(root, "")))
            .await
            .unwrap();
        let ctx = TaskContext::new(
            registry,
            &AppConfig::default(),
            Arc::new(ToolRegistry::new()),
            Arc::new(NoopNotifier),
            None,
        )
        .unwrap();
        ctx.start();
        ctx
    }

    #[test]
    fn test_relative_dir() {
        let task = TransferTask::new("/tmp/x/a/b/f.txt", "/dst", "/tmp/x", DeletePolicy::DeleteNever);
        assert_eq!(task.relative_dir(), "a/b");
        let task = TransferTask::new("/tmp/x/f.txt", "/dst", "/tmp/x", DeletePolicy::DeleteNever);
        assert_eq!(task.relative_dir(), "");
    }

    #[tokio::test]
    async fn test_transfer_keeps_layout_and_deletes_on_success() {
        let temp = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let ctx = context(dst.path()).await;

        let job_dir = temp.path().join("job");
        tokio::fs::create_dir_all(job_dir.join("sub")).await.unwrap();
        let file = job_dir.join("sub/movie.mkv");
        tokio::fs::write(&file, b"frames").await.unwrap();

        let task = ctx.transfer_manager.add(TransferTask::new(
            &file,
            "/dst/downloads",
            &job_dir,
            DeletePolicy::DeleteOnUploadSucceed,
        ));
        wait_until(|| task.base().state().is_terminal()).await;

        assert_eq!(task.base().state(), TaskState::Succeeded);
        let uploaded = dst.path().join("downloads/sub/movie.mkv");
        assert_eq!(tokio::fs::read(uploaded).await.unwrap(), b"frames");
        // 清理在状态变为成功之后执行
        wait_until(|| !job_dir.exists()).await;
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_transfer_failure_keeps_file_by_default() {
        let temp = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let ctx = context(dst.path()).await;

        let file = temp.path().join("a.bin");
        tokio::fs::write(&file, b"x").await.unwrap();

        let task = ctx.transfer_manager.add(TransferTask::new(
            &file,
            "/nowhere",
            temp.path(),
            DeletePolicy::DeleteOnUploadSucceed,
        ));
        wait_until(|| task.base().state().is_terminal()).await;

        assert_eq!(task.base().state(), TaskState::Failed);
        assert!(!task.base().error().is_empty());
        assert!(file.exists());
    }
}
