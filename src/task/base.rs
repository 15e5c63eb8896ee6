//! 任务公共记录
//!
//! 所有任务类型共享的字段：ID、状态、重试计数、错误、进度。
//! 每个 setter 修改后立即调用持久化回调（写穿），崩溃时最多丢失
//! 正在进行的一步，而不会丢失上一次落盘的状态。

use super::state::TaskState;
use crate::stream::ProgressSink;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 持久化回调
pub type PersistFn = Arc<dyn Fn() + Send + Sync>;

/// 可持久化的公共字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub state: TaskState,
    #[serde(default)]
    pub retry: u32,
    #[serde(default)]
    pub max_retry: u32,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub progress: f64,
}

impl Default for TaskRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            state: TaskState::Pending,
            retry: 0,
            max_retry: 0,
            error: String::new(),
            progress: 0.0,
        }
    }
}

#[derive(Default)]
struct Shared {
    record: Mutex<TaskRecord>,
    token: Mutex<CancellationToken>,
    persist: RwLock<Option<PersistFn>>,
}

/// 任务公共记录
///
/// 内部可变，允许管理器和任务自身并发读取状态与进度
#[derive(Default)]
pub struct TaskBase {
    shared: Arc<Shared>,
}

impl TaskBase {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_record(record: TaskRecord) -> Self {
        Self {
            shared: Arc::new(Shared {
                record: Mutex::new(record),
                token: Mutex::new(CancellationToken::new()),
                persist: RwLock::new(None),
            }),
        }
    }

    /// 写入本任务进度的回调，可交给驱动在后台线程中调用
    pub fn progress_sink(&self) -> ProgressSink {
        let handle = TaskBase {
            shared: self.shared.clone(),
        };
        Arc::new(move |progress| handle.set_progress(progress))
    }

    /// 当前记录快照
    pub fn snapshot(&self) -> TaskRecord {
        self.shared.record.lock().clone()
    }

    pub fn id(&self) -> String {
        self.shared.record.lock().id.clone()
    }

    pub fn set_id(&self, id: impl Into<String>) {
        self.shared.record.lock().id = id.into();
        self.persist();
    }

    pub fn state(&self) -> TaskState {
        self.shared.record.lock().state
    }

    pub fn set_state(&self, state: TaskState) {
        self.shared.record.lock().state = state;
        self.persist();
    }

    pub fn progress(&self) -> f64 {
        self.shared.record.lock().progress
    }

    /// 设置进度，限制在 [0, 100]
    pub fn set_progress(&self, progress: f64) {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 100.0)
        };
        self.shared.record.lock().progress = progress;
        self.persist();
    }

    pub fn error(&self) -> String {
        self.shared.record.lock().error.clone()
    }

    pub fn set_error(&self, err: impl std::fmt::Display) {
        self.shared.record.lock().error = err.to_string();
        self.persist();
    }

    /// (retry, max_retry)
    pub fn retry(&self) -> (u32, u32) {
        let record = self.shared.record.lock();
        (record.retry, record.max_retry)
    }

    pub fn set_retry(&self, retry: u32, max_retry: u32) {
        {
            let mut record = self.shared.record.lock();
            record.retry = retry;
            record.max_retry = max_retry;
        }
        self.persist();
    }

    /// 取消令牌（任务执行中用于观察取消）
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.token.lock().clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.token.lock().is_cancelled()
    }

    /// 进入 Canceling 并触发取消令牌
    pub fn cancel(&self) {
        self.set_state(TaskState::Canceling);
        self.shared.token.lock().cancel();
    }

    /// 手动重试前重置：新的取消令牌、清空错误和进度
    pub(crate) fn reset_for_retry(&self) {
        *self.shared.token.lock() = CancellationToken::new();
        {
            let mut record = self.shared.record.lock();
            record.retry = 0;
            record.error.clear();
            record.progress = 0.0;
            record.state = TaskState::Pending;
        }
        self.persist();
    }

    pub fn set_persist(&self, persist: PersistFn) {
        *self.shared.persist.write() = Some(persist);
    }

    pub(crate) fn clear_persist(&self) {
        *self.shared.persist.write() = None;
    }

    /// 调用持久化回调（调用时不持有记录锁）
    pub fn persist(&self) {
        let persist = self.shared.persist.read().clone();
        if let Some(persist) = persist {
            persist();
        }
    }
}

impl Serialize for TaskBase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TaskBase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TaskRecord::deserialize(deserializer).map(TaskBase::from_record)
    }
}

impl std::fmt::Debug for TaskBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskBase")
            .field("record", &*self.shared.record.lock())
            .finish()
    }
}
