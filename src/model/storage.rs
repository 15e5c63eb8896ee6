// 存储（挂载）配置模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 驱动初始化成功后的状态文本
pub const STATUS_WORK: &str = "work";
/// 存储被禁用后的状态文本
pub const STATUS_DISABLED: &str = "disabled";

/// 存储配置记录
///
/// 由注册表持有，持久化在记录存储中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    /// 记录 ID（创建时由记录存储分配）
    #[serde(default)]
    pub id: u64,
    /// 规范化后的挂载路径
    pub mount_path: String,
    /// 排序值
    #[serde(default)]
    pub order: i32,
    /// 驱动类型名称
    pub driver: String,
    /// 缓存过期时间（分钟）
    #[serde(default)]
    pub cache_expiration: i32,
    /// 状态文本（work / 禁用 / 初始化错误信息）
    #[serde(default)]
    pub status: String,
    /// 驱动专属配置（JSON 字符串）
    #[serde(default = "default_addition")]
    pub addition: String,
    #[serde(default)]
    pub remark: String,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub disabled: bool,
    /// 所属分组
    #[serde(default)]
    pub group: String,
    /// 是否与同组存储同步 Addition
    #[serde(default)]
    pub sync_group: bool,
}

fn default_addition() -> String {
    "{}".to_string()
}

impl Storage {
    /// 创建新的存储配置
    pub fn new(mount_path: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            id: 0,
            mount_path: mount_path.into(),
            order: 0,
            driver: driver.into(),
            cache_expiration: 0,
            status: String::new(),
            addition: default_addition(),
            remark: String::new(),
            modified: Utc::now(),
            disabled: false,
            group: String::new(),
            sync_group: false,
        }
    }

    pub fn with_addition(mut self, addition: impl Into<String>) -> Self {
        self.addition = addition.into();
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_group(mut self, group: impl Into<String>, sync_group: bool) -> Self {
        self.group = group.into();
        self.sync_group = sync_group;
        self
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }
}
