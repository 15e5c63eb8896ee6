// 跨存储复制
//
// 同一实例内使用驱动原生复制；跨实例时通过源链接构造可寻址数据流，
// 再上传到目标实例。目录复制展开为每个子项一个复制任务。

use crate::context::TaskContext;
use crate::driver::MountedStorage;
use crate::errors::{Error, Result};
use crate::model::{LinkArgs, Obj};
use crate::op::object;
use crate::stream::{noop_sink, SeekableStream};
use crate::task::{Task, TaskBase};
use crate::utils::path::{fix_and_clean_path, join_path, split_path};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// 复制选项
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    /// 目标已存在同名文件时覆盖
    pub overwrite: bool,
    /// 单个文件直接同步复制，不创建任务
    pub no_task: bool,
}

/// 复制结果
pub enum CopyOutcome {
    /// 已同步完成
    Done,
    /// 已创建复制任务
    Queued(Arc<CopyTask>),
}

impl std::fmt::Debug for CopyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyOutcome::Done => write!(f, "Done"),
            CopyOutcome::Queued(task) => write!(f, "Queued({})", task.name()),
        }
    }
}

/// 复制对象到目标目录
pub async fn copy(
    ctx: &TaskContext,
    src_obj_path: &str,
    dst_dir_path: &str,
    options: CopyOptions,
) -> Result<CopyOutcome> {
    let (src_storage, src_actual) = ctx
        .registry
        .get_storage_and_actual_path(src_obj_path)
        .map_err(|e| e.context("failed get src storage"))?;
    let (dst_storage, dst_actual) = ctx
        .registry
        .get_storage_and_actual_path(dst_dir_path)
        .map_err(|e| e.context("failed get dst storage"))?;

    // 同一实例只走原生复制，驱动不支持时原样返回 not implement
    if src_storage.same_as(&dst_storage) {
        debug!("同一存储内复制: {}", src_storage.mount_path());
        return object::copy(&src_storage, &src_actual, &dst_actual)
            .await
            .map(|_| CopyOutcome::Done);
    }

    if options.no_task {
        let src_obj = object::get(&src_storage, &src_actual)
            .await
            .map_err(|e| e.context("failed get src object"))?;
        if !src_obj.is_dir() {
            copy_file(ctx, &src_storage, &dst_storage, &src_actual, &dst_actual, src_obj, None).await?;
            return Ok(CopyOutcome::Done);
        }
    }

    let mut task = CopyTask::new(
        src_storage.mount_path(),
        src_actual,
        dst_storage.mount_path(),
        dst_actual,
        options.overwrite,
    );
    task.bind(src_storage, dst_storage);
    Ok(CopyOutcome::Queued(ctx.copy_manager.add(task)))
}

/// 源文件链接 -> 可寻址数据流 -> 目标上传
async fn copy_file(
    ctx: &TaskContext,
    src_storage: &MountedStorage,
    dst_storage: &MountedStorage,
    src_path: &str,
    dst_dir: &str,
    src_obj: Obj,
    task: Option<&TaskBase>,
) -> Result<()> {
    let (link, _) = object::link(src_storage, src_path, &LinkArgs::default())
        .await
        .map_err(|e| e.context(format!("failed get [{}] link", src_path)))?;
    let stream = SeekableStream::new(src_obj, &link, &ctx.http)?;
    let Some(base) = task else {
        return object::put(dst_storage, dst_dir, stream, noop_sink()).await;
    };
    let token = base.cancel_token();
    tokio::select! {
        result = object::put(dst_storage, dst_dir, stream, base.progress_sink()) => result,
        _ = token.cancelled() => Err(Error::Canceled),
    }
}

/// 复制任务
///
/// 持久化的只有挂载路径和驱动内路径，存储实例在执行时重新解析
#[derive(Serialize, Deserialize)]
pub struct CopyTask {
    #[serde(flatten)]
    pub base: TaskBase,
    pub src_storage_mp: String,
    /// 源对象的驱动内路径
    pub src_obj_path: String,
    pub dst_storage_mp: String,
    /// 目标目录的驱动内路径
    pub dst_dir_path: String,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(skip)]
    status: Mutex<String>,
    #[serde(skip)]
    storages: Mutex<Option<(Arc<MountedStorage>, Arc<MountedStorage>)>>,
}

impl CopyTask {
    pub fn new(
        src_storage_mp: impl Into<String>,
        src_obj_path: impl Into<String>,
        dst_storage_mp: impl Into<String>,
        dst_dir_path: impl Into<String>,
        overwrite: bool,
    ) -> Self {
        Self {
            base: TaskBase::new(),
            src_storage_mp: src_storage_mp.into(),
            src_obj_path: fix_and_clean_path(&src_obj_path.into()),
            dst_storage_mp: dst_storage_mp.into(),
            dst_dir_path: fix_and_clean_path(&dst_dir_path.into()),
            overwrite,
            status: Mutex::new(String::new()),
            storages: Mutex::new(None),
        }
    }

    fn bind(&mut self, src: Arc<MountedStorage>, dst: Arc<MountedStorage>) {
        *self.storages.get_mut() = Some((src, dst));
    }

    fn set_status(&self, status: impl Into<String>) {
        *self.status.lock() = status.into();
    }

    fn child(&self, src_obj_path: String, dst_dir_path: String) -> CopyTask {
        let mut child = CopyTask::new(
            self.src_storage_mp.clone(),
            src_obj_path,
            self.dst_storage_mp.clone(),
            dst_dir_path,
            self.overwrite,
        );
        if let Some((src, dst)) = self.storages.lock().clone() {
            child.bind(src, dst);
        }
        child
    }

    /// 取绑定的实例；未绑定或实例已被替换时按挂载路径重新解析
    fn resolve(&self, ctx: &TaskContext) -> Result<(Arc<MountedStorage>, Arc<MountedStorage>)> {
        if let Some((src, dst)) = self.storages.lock().clone() {
            let live = |s: &Arc<MountedStorage>| {
                ctx.registry
                    .get_storage_by_mount_path(&s.mount_path())
                    .map(|cur| cur.same_as(s))
                    .unwrap_or(false)
            };
            if live(&src) && live(&dst) {
                return Ok((src, dst));
            }
        }
        let src = ctx
            .registry
            .get_storage_by_mount_path(&self.src_storage_mp)
            .map_err(|e| e.context("failed get storage"))?;
        let dst = ctx
            .registry
            .get_storage_by_mount_path(&self.dst_storage_mp)
            .map_err(|e| e.context("failed get storage"))?;
        *self.storages.lock() = Some((src.clone(), dst.clone()));
        Ok((src, dst))
    }
}

#[async_trait]
impl Task for CopyTask {
    type Context = TaskContext;

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn name(&self) -> String {
        format!(
            "copy [{}]({}) to [{}]({})",
            self.src_storage_mp, self.src_obj_path, self.dst_storage_mp, self.dst_dir_path
        )
    }

    fn status(&self) -> String {
        self.status.lock().clone()
    }

    async fn run(&self, ctx: &TaskContext) -> Result<()> {
        let (src_storage, dst_storage) = self.resolve(ctx)?;

        self.set_status("getting src object");
        let src_obj = object::get(&src_storage, &self.src_obj_path)
            .await
            .map_err(|e| e.context(format!("failed get src [{}] file", self.src_obj_path)))?;

        if src_obj.is_dir() {
            self.set_status("src object is dir, listing objs");
            let token = self.base.cancel_token();
            let objs = tokio::select! {
                result = object::list(&src_storage, &self.src_obj_path) => result
                    .map_err(|e| e.context(format!("failed list src [{}] objs", self.src_obj_path)))?,
                _ = token.cancelled() => return Err(Error::Canceled),
            };
            let dst_dir = join_path(&self.dst_dir_path, &src_obj.name);
            for obj in objs {
                // 取消后放弃剩余子任务，不视为错误
                if self.base.is_canceled() {
                    return Ok(());
                }
                let src_path = join_path(&self.src_obj_path, &obj.name);
                ctx.copy_manager.add(self.child(src_path, dst_dir.clone()));
            }
            self.set_status("src object is dir, added all copy tasks of objs");
            return Ok(());
        }

        if !self.overwrite {
            let (_, name) = split_path(&self.src_obj_path);
            let dst_path = join_path(&self.dst_dir_path, &name);
            match object::get(&dst_storage, &dst_path).await {
                Ok(_) => {
                    info!("目标已存在同名文件，跳过: {}", dst_path);
                    self.set_status("dst object exists, skipped");
                    return Ok(());
                }
                Err(e) if e.is_object_not_found() => {}
                Err(e) => return Err(e.context("failed check dst object")),
            }
        }

        self.set_status("copying file");
        copy_file(
            ctx,
            &src_storage,
            &dst_storage,
            &self.src_obj_path,
            &self.dst_dir_path,
            src_obj,
            Some(&self.base),
        )
        .await
    }

    async fn on_succeeded(&self, ctx: &TaskContext) {
        if ctx.notify.enabled && ctx.notify.on_copy_result {
            ctx.notifier.notify("文件复制结果", &format!("{}成功", self.name()));
        }
    }

    async fn on_failed(&self, ctx: &TaskContext) {
        if ctx.notify.enabled && ctx.notify.on_copy_result {
            ctx.notifier.notify(
                "文件复制结果",
                &format!("{}失败:{}", self.name(), self.base.error()),
            );
        }
    }
}
