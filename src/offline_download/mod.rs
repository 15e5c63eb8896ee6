//! 离线下载
//!
//! 下载工具把远程资源拉到本地临时目录，完成后为每个产出文件创建一个
//! 转存任务，把文件上传到目标存储。
//!
//! - [`DownloadTask`]：驱动下载工具并轮询状态
//! - [`TransferTask`]：把本地文件写入命名空间，并按删除策略清理临时文件
//! - [`Tool`]：下载工具能力，[`ToolRegistry`] 为名称到工具的显式表

pub mod download;
pub mod http;
pub mod tool;
pub mod transfer;

pub use download::DownloadTask;
pub use http::{SimpleHttpTool, SIMPLE_HTTP_TOOL};
pub use tool::{collect_files, AddUrlArgs, Tool, ToolFile, ToolJob, ToolRegistry, ToolStatus};
pub use transfer::TransferTask;

use crate::context::TaskContext;
use crate::errors::{Error, Result};
use crate::op::object;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// 临时文件删除策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// 上传成功后删除
    #[default]
    DeleteOnUploadSucceed,
    /// 上传失败后删除
    DeleteOnUploadFailed,
    DeleteNever,
    DeleteAlways,
}

impl DeletePolicy {
    /// 转存任务结束后是否删除本地文件
    pub fn should_delete(&self, succeeded: bool) -> bool {
        match self {
            DeletePolicy::DeleteOnUploadSucceed => succeeded,
            DeletePolicy::DeleteOnUploadFailed => !succeeded,
            DeletePolicy::DeleteNever => false,
            DeletePolicy::DeleteAlways => true,
        }
    }
}

/// 添加离线下载的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddUrlRequest {
    pub url: String,
    /// 目标目录（命名空间路径）
    pub dst_dir_path: String,
    pub tool: String,
    /// 为空时使用配置的默认策略
    #[serde(default)]
    pub delete_policy: Option<DeletePolicy>,
}

/// 添加离线下载任务
///
/// 校验工具可用、目标目录可写后，为任务分配独立的临时目录
/// `<temp_dir>/<tool>/<uuid>`
pub async fn add_url(ctx: &TaskContext, req: AddUrlRequest) -> Result<Arc<DownloadTask>> {
    let url = req.url.trim();
    if url.is_empty() {
        return Err(Error::Other("url is empty".to_string()));
    }
    let tool = ctx
        .tools
        .get(&req.tool)
        .ok_or_else(|| Error::Other(format!("tool not found: {}", req.tool)))?;
    if !tool.is_ready() {
        // 尝试初始化一次
        tool.init()
            .await
            .map_err(|e| e.context(format!("failed init tool {}", req.tool)))?;
    }

    let (storage, dst_dir_actual) = ctx
        .registry
        .get_storage_and_actual_path(&req.dst_dir_path)
        .map_err(|e| e.context("failed get storage"))?;
    if storage.driver().config().no_upload {
        return Err(Error::NotSupport);
    }
    match object::get(&storage, &dst_dir_actual).await {
        Ok(obj) if !obj.is_dir() => {
            return Err(Error::Other(format!("not a folder: {}", req.dst_dir_path)));
        }
        Ok(_) => {}
        Err(e) if e.is_object_not_found() => {}
        Err(e) => return Err(e.context("failed get object")),
    }

    let uid = uuid::Uuid::new_v4().to_string();
    let temp_dir = ctx.offline.temp_dir.join(tool.name()).join(&uid);
    let delete_policy = req
        .delete_policy
        .unwrap_or(ctx.offline.default_delete_policy);

    let task = DownloadTask::new(url, &req.dst_dir_path, temp_dir, tool.name(), delete_policy);
    let task = ctx.download_manager.add(task);
    info!("添加离线下载: url={}, 目标={}, 工具={}", url, req.dst_dir_path, tool.name());
    Ok(task)
}
