// 离线下载任务
//
// 工具支持同步下载时直接完成；否则提交给工具后轮询状态，
// 下载完成后为每个产出文件创建转存任务

use super::tool::{collect_files, AddUrlArgs, Tool, ToolJob};
use super::{DeletePolicy, TransferTask};
use crate::context::TaskContext;
use crate::errors::{Error, Result};
use crate::task::{Task, TaskBase};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Serialize, Deserialize)]
pub struct DownloadTask {
    #[serde(flatten)]
    pub base: TaskBase,
    pub url: String,
    pub dst_dir_path: String,
    pub temp_dir: PathBuf,
    /// 工具名称，执行时从工具表中查找
    pub tool: String,
    #[serde(default)]
    pub delete_policy: DeletePolicy,
    #[serde(skip)]
    status: Mutex<String>,
    #[serde(skip)]
    gid: Mutex<String>,
}

impl DownloadTask {
    pub fn new(
        url: impl Into<String>,
        dst_dir_path: impl Into<String>,
        temp_dir: impl Into<PathBuf>,
        tool: impl Into<String>,
        delete_policy: DeletePolicy,
    ) -> Self {
        Self {
            base: TaskBase::new(),
            url: url.into(),
            dst_dir_path: dst_dir_path.into(),
            temp_dir: temp_dir.into(),
            tool: tool.into(),
            delete_policy,
            status: Mutex::new(String::new()),
            gid: Mutex::new(String::new()),
        }
    }

    fn set_status(&self, status: impl Into<String>) {
        *self.status.lock() = status.into();
    }

    fn job(&self) -> ToolJob {
        ToolJob {
            uid: self.base.id(),
            url: self.url.clone(),
            temp_dir: self.temp_dir.clone(),
            gid: self.gid.lock().clone(),
        }
    }

    /// 查询一次状态，返回是否已结束
    async fn update(&self, ctx: &TaskContext, tool: &dyn Tool, failures: &mut u32) -> Result<bool> {
        let info = match tool.status(&self.job()).await {
            Ok(info) => info,
            Err(e) => {
                *failures += 1;
                error!(
                    "获取下载状态失败: {}, 已重试 {} 次, 错误: {}",
                    self.base.id(),
                    failures,
                    e
                );
                if *failures > ctx.offline.max_status_failures {
                    return Err(Error::Fatal(format!(
                        "failed to get status of {}, retried {} times",
                        self.base.id(),
                        failures
                    )));
                }
                return Ok(false);
            }
        };
        *failures = 0;
        self.base.set_progress(info.progress);
        self.set_status(format!("[{}]: {}", tool.name(), info.status));

        if let Some(gid) = info.new_gid.filter(|gid| !gid.is_empty()) {
            debug!("下载任务切换标识: {} -> {}", self.gid.lock(), gid);
            *self.gid.lock() = gid;
            return Ok(false);
        }
        if info.completed {
            self.complete(ctx, tool)
                .await
                .map_err(|e| e.context("failed to transfer file"))?;
            return Ok(true);
        }
        if let Some(err) = info.err {
            return Err(Error::Fatal(format!(
                "failed to download {}, error: {}",
                self.base.id(),
                err
            )));
        }
        Ok(false)
    }

    /// 为每个产出文件创建转存任务
    async fn complete(&self, ctx: &TaskContext, tool: &dyn Tool) -> Result<()> {
        let files = match tool.get_files(&self.job()) {
            Some(files) => files,
            None => collect_files(&self.temp_dir)
                .await
                .map_err(|e| e.context("failed to get files"))?,
        };
        info!("下载完成，创建 {} 个转存任务: {}", files.len(), self.url);
        for file in files {
            ctx.transfer_manager.add(TransferTask::new(
                file.path,
                self.dst_dir_path.clone(),
                self.temp_dir.clone(),
                self.delete_policy,
            ));
        }
        Ok(())
    }

    /// 完成后按工具配置等待一段时间，再释放工具侧资源
    async fn release_tool(&self, ctx: &TaskContext, tool: &dyn Tool) {
        let minutes = ctx
            .offline
            .post_complete_delays
            .get(tool.name())
            .copied()
            .unwrap_or(0);
        if minutes > 0 {
            self.set_status("offline download completed, waiting for seeding");
            let token = self.base.cancel_token();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(minutes * 60)) => {}
                _ = token.cancelled() => {}
            }
        }
        if let Err(e) = tool.remove(&self.job()).await {
            warn!("释放下载工具资源失败: {}, 错误: {}", self.base.id(), e);
        }
    }
}

#[async_trait]
impl Task for DownloadTask {
    type Context = TaskContext;

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn name(&self) -> String {
        format!("download {} to ({})", self.url, self.dst_dir_path)
    }

    fn status(&self) -> String {
        self.status.lock().clone()
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        let tool = ctx
            .tools
            .get(&self.tool)
            .ok_or_else(|| Error::Fatal(format!("tool not found: {}", self.tool)))?;
        let token = self.base.cancel_token();

        let job = self.job();
        let sync_result = tokio::select! {
            result = tool.run(&job, self.base.progress_sink()) => result,
            _ = token.cancelled() => return Err(Error::Canceled),
        };
        match sync_result {
            Ok(()) => return self.complete(ctx, tool.as_ref()).await,
            Err(e) if e.is_not_support() => {}
            Err(e) => return Err(e),
        }

        // 保留一个发送端，工具丢弃信号通道后仍按定时器轮询
        let (signal, mut signal_rx) = mpsc::unbounded_channel();
        let gid = tool
            .add_url(AddUrlArgs {
                url: self.url.clone(),
                uid: self.base.id(),
                temp_dir: self.temp_dir.clone(),
                signal: signal.clone(),
            })
            .await?;
        *self.gid.lock() = gid;

        let interval = Duration::from_secs(ctx.offline.poll_interval_secs);
        let mut failures = 0u32;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tool.remove(&self.job()).await?;
                    return Err(Error::Canceled);
                }
                _ = signal_rx.recv() => {}
                _ = tokio::time::sleep(interval) => {}
            }
            if self.update(ctx, tool.as_ref(), &mut failures).await? {
                break;
            }
        }
        drop(signal);

        self.set_status("offline download completed, maybe transferring");
        self.release_tool(ctx, tool.as_ref()).await;
        Ok(())
    }

    async fn on_succeeded(&self, ctx: &TaskContext) {
        let result = format!("{}下载成功", self.url);
        debug!("{}", result);
        if ctx.notify.enabled && ctx.notify.on_download_succeeded {
            ctx.notifier.notify("文件下载结果", &result);
        }
    }

    async fn on_failed(&self, ctx: &TaskContext) {
        let result = format!("{}下载失败:{}", self.url, self.base.error());
        debug!("{}", result);
        if ctx.notify.enabled && ctx.notify.on_download_failed {
            ctx.notifier.notify("文件下载结果", &result);
        }
    }
}
