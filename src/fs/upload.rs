// 上传任务
//
// 持有内存中的数据流，不持久化

use crate::context::TaskContext;
use crate::driver::MountedStorage;
use crate::errors::{Error, Result};
use crate::op::object;
use crate::stream::SeekableStream;
use crate::task::{Task, TaskBase};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize, Deserialize)]
pub struct UploadTask {
    #[serde(flatten)]
    pub base: TaskBase,
    pub file_name: String,
    pub storage_mp: String,
    /// 目标目录的驱动内路径
    pub dst_dir_path: String,
    #[serde(skip)]
    stream: Mutex<Option<SeekableStream>>,
    #[serde(skip)]
    storage: Mutex<Option<Arc<MountedStorage>>>,
}

impl UploadTask {
    fn new(storage: Arc<MountedStorage>, dst_dir_path: String, stream: SeekableStream) -> Self {
        Self {
            base: TaskBase::new(),
            file_name: stream.name().to_string(),
            storage_mp: storage.mount_path(),
            dst_dir_path,
            stream: Mutex::new(Some(stream)),
            storage: Mutex::new(Some(storage)),
        }
    }
}

/// 以任务方式上传到目标目录
pub fn put_as_task(ctx: &TaskContext, dst_dir: &str, stream: SeekableStream) -> Result<Arc<UploadTask>> {
    let (storage, dst_dir_actual) = ctx
        .registry
        .get_storage_and_actual_path(dst_dir)
        .map_err(|e| e.context("failed get storage"))?;
    if storage.driver().config().no_upload {
        return Err(Error::NotSupport);
    }
    Ok(ctx
        .upload_manager
        .add(UploadTask::new(storage, dst_dir_actual, stream)))
}

#[async_trait]
impl Task for UploadTask {
    type Context = TaskContext;

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn name(&self) -> String {
        format!(
            "upload {} to [{}]({})",
            self.file_name, self.storage_mp, self.dst_dir_path
        )
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        // 数据流可重复读取，重试时复用
        let stream = self
            .stream
            .lock()
            .clone()
            .ok_or_else(|| Error::Fatal("upload stream is gone".to_string()))?;
        let bound = self.storage.lock().clone();
        let storage = match bound {
            Some(storage) => storage,
            None => ctx.registry.get_storage_by_mount_path(&self.storage_mp)?,
        };

        let token = self.base.cancel_token();
        tokio::select! {
            result = object::put(&storage, &self.dst_dir_path, stream, self.base.progress_sink()) => result,
            _ = token.cancelled() => Err(Error::Canceled),
        }
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
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_as_task() {
        let root = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = StorageRegistry::new(db.clone(), mock_driver_table());
        registry
            .create_storage(Storage::new("/m", MOCK_DRIVER).with_addition(mock_addition(root.path(), "")))
            .await
            .unwrap();
        let ctx = TaskContext::new(
            registry,
            &AppConfig::default(),
            Arc::new(ToolRegistry::new()),
            Arc::new(NoopNotifier),
            Some(db),
        )
        .unwrap();
        ctx.start();
        assert!(!ctx.upload_manager.is_persistent());

        let file = src.path().join("photo.jpg");
        std::fs::write(&file, b"jpeg").unwrap();
        let stream = SeekableStream::from_local(&file).await.unwrap();
        let task = put_as_task(&ctx, "/m/pics", stream).unwrap();
        assert_eq!(task.name(), "upload photo.jpg to [/m](/pics)");

        wait_until(|| task.base().state().is_terminal()).await;
        assert_eq!(task.base().state(), TaskState::Succeeded);
        assert_eq!(std::fs::read(root.path().join("pics/photo.jpg")).unwrap(), b"jpeg");

        let stream = SeekableStream::from_local(&file).await.unwrap();
        assert!(put_as_task(&ctx, "/elsewhere", stream).is_err());
    }
}
