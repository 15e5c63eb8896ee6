//! 任务引擎
//!
//! 每类任务一个 [`TaskManager`]：有界并发的工作池、重试、取消与可选持久化。

pub mod base;
pub mod manager;
pub mod state;
pub mod store;

pub use base::{PersistFn, TaskBase, TaskRecord};
pub use manager::{ManagerOptions, TaskManager};
pub use state::TaskState;
pub use store::TaskStore;

use crate::errors::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// 可调度的任务
///
/// 任务自身需可序列化（公共字段通过 `#[serde(flatten)]` 嵌入 [`TaskBase`]），
/// 运行期依赖通过 `Context` 注入，不参与持久化。
#[async_trait]
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Context: Send + Sync + 'static;

    fn base(&self) -> &TaskBase;

    /// 任务名称（用于展示和日志）
    fn name(&self) -> String;

    /// 当前阶段的简短描述
    fn status(&self) -> String {
        String::new()
    }

    /// 执行一次；返回错误后由管理器决定是否重试
    async fn run(&self, ctx: &Self::Context) -> Result<()>;

    async fn on_succeeded(&self, _ctx: &Self::Context) {}

    async fn on_failed(&self, _ctx: &Self::Context) {}
}
