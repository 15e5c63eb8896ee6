// 多网盘聚合与离线下载核心库

// 应用启动
pub mod app;

// 配置管理模块
pub mod config;

// 任务运行上下文
pub mod context;

// 存储与任务记录
pub mod db;

// 存储驱动
pub mod driver;

pub mod errors;

// 命名空间文件操作与跨存储复制
pub mod fs;

pub mod logging;

pub mod model;

// 消息推送
pub mod notify;

// 离线下载
pub mod offline_download;

// 存储注册表与路径解析
pub mod op;

// 可寻址数据流
pub mod stream;

// 任务引擎
pub mod task;

pub mod utils;

#[cfg(test)]
mod test_support;

// 导出常用类型
pub use app::AppState;
pub use config::AppConfig;
pub use context::TaskContext;
pub use errors::{Error, Result};
pub use op::StorageRegistry;
pub use task::{TaskManager, TaskState};
