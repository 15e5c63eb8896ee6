//! 统一错误类型
//!
//! 错误分为几类：
//! - 配置错误（未知驱动、Addition 解析失败）：同步返回给调用方
//! - 能力错误（not implement / not support）：原样返回，任务中视为致命错误不重试
//! - 注册表一致性错误（挂载路径不存在、驱动不一致、挂载路径冲突）：在任何修改之前拒绝
//! - 运行期 I/O 错误：任务中按最大重试次数重试

use thiserror::Error;

/// 统一结果类型
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// 驱动未实现该能力
    #[error("not implement")]
    NotImplement,

    /// 工具或驱动不支持该操作
    #[error("not support")]
    NotSupport,

    #[error("object not found")]
    ObjectNotFound,

    /// 找不到挂载路径对应的存储
    #[error("no mount path for an storage is: {0}")]
    StorageNotFound(String),

    #[error("failed get driver new: 未知驱动 {0}")]
    UnknownDriver(String),

    /// Addition 反序列化失败
    #[error("invalid addition: {0}")]
    InvalidAddition(String),

    #[error("driver cannot be changed")]
    DriverChanged,

    #[error("记录不存在: {0}")]
    RecordNotFound(String),

    #[error("挂载路径已存在: {0}")]
    MountPathExists(String),

    /// 同步组存储的 Addition 未发生任何变化
    #[error("Addition信息未发生变化，如需修改请关闭同步组存储选项")]
    NoChange,

    #[error("this storage have enabled")]
    AlreadyEnabled,

    #[error("this storage have disabled")]
    AlreadyDisabled,

    #[error("can't move files between two storages, try to copy")]
    CrossStorageMove,

    /// 存储记录已创建，但驱动初始化失败
    #[error("failed init storage but storage is already created (id={id}): {reason}")]
    InitFailed { id: u64, reason: String },

    #[error("任务不存在: {0}")]
    TaskNotFound(String),

    #[error("任务未结束，无法移除: {0}")]
    TaskNotRemovable(String),

    /// 明确的致命错误，任务不再重试
    #[error("{0}")]
    Fatal(String),

    #[error("任务已取消")]
    Canceled,

    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP 错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// 是否为致命错误（任务失败后不再重试）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NotImplement
                | Error::NotSupport
                | Error::UnknownDriver(_)
                | Error::InvalidAddition(_)
                | Error::CrossStorageMove
                | Error::Fatal(_)
        )
    }

    pub fn is_not_support(&self) -> bool {
        matches!(self, Error::NotSupport)
    }

    pub fn is_not_implement(&self) -> bool {
        matches!(self, Error::NotImplement)
    }

    pub fn is_object_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound)
    }

    /// 在错误信息前附加上下文，保留错误种类
    ///
    /// 能力错误与致命错误保持原样，以便调用方按类型判断
    pub fn context(self, msg: impl std::fmt::Display) -> Self {
        match self {
            Error::NotImplement
            | Error::NotSupport
            | Error::ObjectNotFound
            | Error::Canceled
            | Error::StorageNotFound(_) => self,
            Error::Fatal(inner) => Error::Fatal(format!("{}: {}", msg, inner)),
            other => Error::Other(format!("{}: {}", msg, other)),
        }
    }
}
