// 任务管理器
//
// 单个分发循环从队列取任务，持有信号量许可后派生执行；
// 许可数即最大并发数。

use super::{Task, TaskState, TaskStore};
use crate::errors::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 管理器参数
#[derive(Clone)]
pub struct ManagerOptions {
    /// 最大并发数（至少为 1）
    pub workers: usize,
    /// 最大执行次数
    pub max_retry: u32,
    /// 持久化存储；为 None 时不持久化
    pub store: Option<Arc<dyn TaskStore>>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            workers: 5,
            max_retry: 0,
            store: None,
        }
    }
}

pub struct TaskManager<T: Task> {
    kind: &'static str,
    tasks: DashMap<String, Arc<T>>,
    queue_tx: mpsc::UnboundedSender<Arc<T>>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<T>>>>,
    semaphore: Arc<Semaphore>,
    workers: usize,
    max_retry: u32,
    store: Option<Arc<dyn TaskStore>>,
    shutdown: CancellationToken,
}

impl<T: Task> TaskManager<T> {
    pub fn new(kind: &'static str, options: ManagerOptions) -> Arc<Self> {
        let workers = options.workers.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            kind,
            tasks: DashMap::new(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            semaphore: Arc::new(Semaphore::new(workers)),
            workers,
            max_retry: options.max_retry,
            store: options.store,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// 提交任务，返回共享句柄
    pub fn add(&self, task: T) -> Arc<T> {
        let task = Arc::new(task);
        let base = task.base();
        if base.id().is_empty() {
            base.set_id(uuid::Uuid::new_v4().to_string());
        }
        base.set_retry(0, self.max_retry);

        self.install_persist(&task);
        base.set_state(TaskState::Pending);

        let id = base.id();
        self.tasks.insert(id.clone(), task.clone());
        debug!("任务已提交: kind={}, id={}, name={}", self.kind, id, task.name());
        self.enqueue(task.clone());
        task
    }

    fn install_persist(&self, task: &Arc<T>) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let weak = Arc::downgrade(task);
        let kind = self.kind;
        task.base().set_persist(Arc::new(move || {
            let Some(task) = weak.upgrade() else {
                return;
            };
            let id = task.base().id();
            match serde_json::to_string(&*task) {
                Ok(data) => {
                    if let Err(e) = store.save_task(kind, &id, &data) {
                        warn!("持久化任务失败: kind={}, id={}, 错误: {}", kind, id, e);
                    }
                }
                Err(e) => warn!("序列化任务失败: kind={}, id={}, 错误: {}", kind, id, e),
            }
        }));
    }

    fn enqueue(&self, task: Arc<T>) {
        if self.queue_tx.send(task).is_err() {
            warn!("任务队列已关闭: kind={}", self.kind);
        }
    }

    /// 启动分发循环；重复调用无效
    pub fn start(self: &Arc<Self>, ctx: Arc<T::Context>) {
        let Some(rx) = self.queue_rx.lock().take() else {
            warn!("任务管理器已启动: kind={}", self.kind);
            return;
        };
        let manager = self.clone();
        tokio::spawn(async move {
            manager.dispatch_loop(rx, ctx).await;
        });
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Arc<T>>,
        ctx: Arc<T::Context>,
    ) {
        info!("任务管理器启动: kind={}, workers={}", self.kind, self.workers);
        loop {
            let task = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            // 已被移除的任务不再执行
            if !self.tasks.contains_key(&task.base().id()) {
                continue;
            }

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let manager = self.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                manager.execute(task, ctx.as_ref()).await;
            });
        }
        info!("任务管理器已停止: kind={}", self.kind);
    }

    async fn execute(&self, task: Arc<T>, ctx: &T::Context) {
        let base = task.base();
        let id = base.id();

        if base.is_canceled() || base.state() == TaskState::Canceling {
            base.set_state(TaskState::Canceled);
            info!("任务在执行前已取消: kind={}, id={}", self.kind, id);
            return;
        }
        if base.state() != TaskState::Pending {
            debug!("跳过非排队状态的任务: id={}, state={}", id, base.state());
            return;
        }

        base.set_state(TaskState::Running);
        debug!("开始执行任务: kind={}, name={}", self.kind, task.name());
        let result = task.run(ctx).await;

        if base.is_canceled() {
            base.set_state(TaskState::Canceled);
            info!("任务已取消: kind={}, name={}", self.kind, task.name());
            return;
        }

        match result {
            Ok(()) => {
                base.set_progress(100.0);
                base.set_state(TaskState::Succeeded);
                info!("任务完成: kind={}, name={}", self.kind, task.name());
                task.on_succeeded(ctx).await;
            }
            Err(Error::Canceled) => {
                base.set_state(TaskState::Canceled);
                info!("任务已取消: kind={}, name={}", self.kind, task.name());
            }
            Err(err) => {
                let fatal = err.is_fatal();
                base.set_error(&err);
                base.set_state(TaskState::Errored);

                // max_retry 为总执行次数上限
                let (retry, max_retry) = base.retry();
                if !fatal && retry + 1 < max_retry {
                    warn!(
                        "任务执行出错，准备重试 ({}/{}): kind={}, name={}, 错误: {}",
                        retry + 1,
                        max_retry,
                        self.kind,
                        task.name(),
                        err
                    );
                    base.set_retry(retry + 1, max_retry);
                    base.set_state(TaskState::Pending);
                    self.enqueue(task.clone());
                } else {
                    error!(
                        "任务失败: kind={}, name={}, fatal={}, 错误: {}",
                        self.kind,
                        task.name(),
                        fatal,
                        err
                    );
                    base.set_state(TaskState::Failed);
                    task.on_failed(ctx).await;
                }
            }
        }
    }

    /// 取消任务；已结束的任务不受影响
    pub fn cancel(&self, id: &str) -> Result<()> {
        let task = self
            .get_by_id(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        if task.base().state().is_terminal() {
            return Ok(());
        }
        task.base().cancel();
        info!("已请求取消任务: kind={}, id={}", self.kind, id);
        Ok(())
    }

    /// 手动重试已失败或已取消的任务
    pub fn retry(&self, id: &str) -> Result<()> {
        let task = self
            .get_by_id(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        let state = task.base().state();
        if !matches!(state, TaskState::Failed | TaskState::Canceled) {
            return Err(Error::Other(format!("任务状态为 {}，无法重试", state)));
        }
        task.base().reset_for_retry();
        self.enqueue(task);
        Ok(())
    }

    /// 恢复持久化的任务，返回重新入队的数量
    ///
    /// 已结束的任务保留以供查看；Canceling 视为已取消；其余重新排队。
    pub fn restore(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let items = store.load_tasks(self.kind)?;
        let mut requeued = 0;
        for data in items {
            let task: T = match serde_json::from_str(&data) {
                Ok(task) => task,
                Err(e) => {
                    warn!("跳过无法解析的任务记录: kind={}, 错误: {}", self.kind, e);
                    continue;
                }
            };
            let task = Arc::new(task);
            self.install_persist(&task);
            let base = task.base();
            let requeue = match base.state() {
                TaskState::Succeeded | TaskState::Failed | TaskState::Canceled => false,
                TaskState::Canceling => {
                    base.set_state(TaskState::Canceled);
                    false
                }
                _ => {
                    base.set_state(TaskState::Pending);
                    true
                }
            };
            self.tasks.insert(base.id(), task.clone());
            if requeue {
                self.enqueue(task);
                requeued += 1;
            }
        }
        info!("已恢复任务: kind={}, 重新排队 {} 个", self.kind, requeued);
        Ok(requeued)
    }

    pub fn get_all(&self) -> Vec<Arc<T>> {
        self.tasks.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<T>> {
        self.tasks.get(id).map(|e| e.value().clone())
    }

    pub fn get_by_state(&self, state: TaskState) -> Vec<Arc<T>> {
        self.tasks
            .iter()
            .filter(|e| e.value().base().state() == state)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 移除已结束的任务
    pub fn remove(&self, id: &str) -> Result<()> {
        let task = self
            .get_by_id(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        if !task.base().state().is_terminal() {
            return Err(Error::TaskNotRemovable(id.to_string()));
        }
        self.drop_task(id, &task);
        Ok(())
    }

    fn drop_task(&self, id: &str, task: &Arc<T>) {
        task.base().clear_persist();
        self.tasks.remove(id);
        if let Some(store) = &self.store {
            if let Err(e) = store.remove_task(self.kind, id) {
                warn!("删除任务记录失败: kind={}, id={}, 错误: {}", self.kind, id, e);
            }
        }
    }

    fn remove_where(&self, pred: impl Fn(TaskState) -> bool) -> usize {
        let ids: Vec<(String, Arc<T>)> = self
            .tasks
            .iter()
            .filter(|e| pred(e.value().base().state()))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (id, task) in &ids {
            self.drop_task(id, task);
        }
        ids.len()
    }

    /// 清除所有已结束的任务
    pub fn clear_done(&self) -> usize {
        self.remove_where(|s| s.is_terminal())
    }

    pub fn clear_succeeded(&self) -> usize {
        self.remove_where(|s| s == TaskState::Succeeded)
    }

    /// 停止分发新任务；执行中的任务保留其持久化状态，下次启动时恢复
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
