// 任务运行上下文
//
// 四类任务共享同一个上下文：注册表、HTTP 客户端、通知、离线下载工具，
// 以及用于派生子任务的各个管理器

use crate::config::{AppConfig, NotifyConfig, OfflineDownloadConfig, TaskConfig};
use crate::errors::Result;
use crate::fs::{CopyTask, UploadTask};
use crate::notify::Notifier;
use crate::offline_download::{DownloadTask, ToolRegistry, TransferTask};
use crate::op::StorageRegistry;
use crate::task::{ManagerOptions, Task, TaskManager, TaskStore};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const UPLOAD_KIND: &str = "upload";
pub const COPY_KIND: &str = "copy";
pub const DOWNLOAD_KIND: &str = "download";
pub const TRANSFER_KIND: &str = "transfer";

pub struct TaskContext {
    pub registry: Arc<StorageRegistry>,
    pub http: Client,
    pub notifier: Arc<dyn Notifier>,
    pub notify: NotifyConfig,
    pub tools: Arc<ToolRegistry>,
    pub offline: OfflineDownloadConfig,
    pub upload_manager: Arc<TaskManager<UploadTask>>,
    pub copy_manager: Arc<TaskManager<CopyTask>>,
    pub download_manager: Arc<TaskManager<DownloadTask>>,
    pub transfer_manager: Arc<TaskManager<TransferTask>>,
}

fn manager<T: Task>(
    kind: &'static str,
    config: &TaskConfig,
    store: &Option<Arc<dyn TaskStore>>,
) -> Arc<TaskManager<T>> {
    let store = if config.task_persistent {
        store.clone()
    } else {
        None
    };
    TaskManager::new(
        kind,
        ManagerOptions {
            workers: config.workers,
            max_retry: config.max_retry,
            store,
        },
    )
}

impl TaskContext {
    /// 按配置创建上下文与四个任务管理器
    ///
    /// `store` 为空时所有任务都不持久化；上传任务持有内存中的数据流，始终不持久化
    pub fn new(
        registry: Arc<StorageRegistry>,
        config: &AppConfig,
        tools: Arc<ToolRegistry>,
        notifier: Arc<dyn Notifier>,
        store: Option<Arc<dyn TaskStore>>,
    ) -> Result<Arc<Self>> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        let tasks = &config.tasks;
        Ok(Arc::new(Self {
            registry,
            http,
            notifier,
            notify: config.notify.clone(),
            tools,
            offline: config.offline_download.clone(),
            upload_manager: manager(UPLOAD_KIND, &tasks.upload, &None),
            copy_manager: manager(COPY_KIND, &tasks.copy, &store),
            download_manager: manager(DOWNLOAD_KIND, &tasks.download, &store),
            transfer_manager: manager(TRANSFER_KIND, &tasks.transfer, &store),
        }))
    }

    /// 恢复持久化任务，返回重新入队的数量
    pub fn restore_tasks(&self) -> Result<usize> {
        let copies = self.copy_manager.restore()?;
        let downloads = self.download_manager.restore()?;
        let transfers = self.transfer_manager.restore()?;
        info!(
            "持久化任务恢复完成: copy={}, download={}, transfer={}",
            copies, downloads, transfers
        );
        Ok(copies + downloads + transfers)
    }

    /// 启动所有管理器的分发循环
    pub fn start(self: &Arc<Self>) {
        self.upload_manager.start(self.clone());
        self.copy_manager.start(self.clone());
        self.download_manager.start(self.clone());
        self.transfer_manager.start(self.clone());
    }

    pub fn shutdown(&self) {
        self.upload_manager.shutdown();
        self.copy_manager.shutdown();
        self.download_manager.shutdown();
        self.transfer_manager.shutdown();
    }
}
