// 应用启动与关闭

use crate::config::AppConfig;
use crate::context::TaskContext;
use crate::db::Database;
use crate::driver::DriverTable;
use crate::notify::{Notifier, PlatformNotifier};
use crate::offline_download::ToolRegistry;
use crate::op::StorageRegistry;
use crate::task::TaskStore;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// 应用全局状态
pub struct AppState {
    pub config: AppConfig,
    pub db: Arc<Database>,
    pub registry: Arc<StorageRegistry>,
    pub ctx: Arc<TaskContext>,
}

impl AppState {
    /// 启动顺序：数据库 -> 注册表 -> 任务管理器 -> 恢复任务 -> 挂载存储 -> 开始分发
    pub async fn bootstrap(config: AppConfig, drivers: DriverTable, tools: ToolRegistry) -> Result<Self> {
        config.validate().context("配置验证失败")?;

        let db = Arc::new(Database::new(&config.database.path).context("打开数据库失败")?);
        let registry = StorageRegistry::new(db.clone(), drivers);

        let notifier: Arc<dyn Notifier> = Arc::new(PlatformNotifier::new(
            reqwest::Client::new(),
            &config.notify,
        ));
        tools.init_all().await;
        let store: Arc<dyn TaskStore> = db.clone();
        let ctx = TaskContext::new(registry.clone(), &config, Arc::new(tools), notifier, Some(store))
            .context("创建任务上下文失败")?;

        ctx.restore_tasks().context("恢复持久化任务失败")?;
        if ctx.transfer_manager.is_empty() {
            clean_temp_dir(&config.offline_download.temp_dir).await;
        }

        // 恢复的任务按挂载路径解析存储，必须先挂载再开始分发
        let loaded = registry
            .load_all_storages()
            .await
            .context("加载存储失败")?;
        info!("✓ 已加载 {} 个存储", loaded);
        ctx.start();

        Ok(Self {
            config,
            db,
            registry,
            ctx,
        })
    }

    /// 停止分发任务并释放所有驱动
    pub async fn shutdown(&self) {
        self.ctx.shutdown();
        self.registry.release_all().await;
        info!("应用已关闭");
    }
}

/// 没有待转存的文件时清空离线下载临时目录
async fn clean_temp_dir(temp_dir: &Path) {
    if !temp_dir.exists() {
        return;
    }
    match tokio::fs::remove_dir_all(temp_dir).await {
        Ok(()) => info!("已清理离线下载临时目录: {:?}", temp_dir),
        Err(e) => warn!("清理离线下载临时目录失败: {:?}, 错误: {}", temp_dir, e),
    }
}
