// 任务状态定义

use serde::{Deserialize, Serialize};

/// 任务状态
///
/// ```text
/// Pending -> Running -> Succeeded
///                    -> Errored -> Pending（仍有重试次数）
///                               -> Failed（重试耗尽或致命错误）
/// Canceling -> Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// 排队中
    Pending,
    /// 执行中
    Running,
    /// 已成功
    Succeeded,
    /// 取消中
    Canceling,
    /// 已取消
    Canceled,
    /// 本次执行出错（等待判定是否重试）
    Errored,
    /// 最终失败
    Failed,
}

impl TaskState {
    /// 获取状态的中文描述
    pub fn description(&self) -> &'static str {
        match self {
            TaskState::Pending => "排队中",
            TaskState::Running => "执行中",
            TaskState::Succeeded => "已成功",
            TaskState::Canceling => "取消中",
            TaskState::Canceled => "已取消",
            TaskState::Errored => "出错",
            TaskState::Failed => "已失败",
        }
    }

    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Canceled | TaskState::Failed
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Canceling => "canceling",
            TaskState::Canceled => "canceled",
            TaskState::Errored => "errored",
            TaskState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_terminal() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Canceling.is_terminal());
        assert!(!TaskState::Errored.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }

    #[test]
    fn test_state_serde_snake_case() {
        let json = serde_json::to_string(&TaskState::Canceling).unwrap();
        assert_eq!(json, "\"canceling\"");
        let state: TaskState = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(state, TaskState::Failed);
    }
}
