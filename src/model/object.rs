// 文件对象模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// 驱动列举出的文件或目录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obj {
    /// 驱动内部 ID（可为空）
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// 驱动内的完整路径
    #[serde(default)]
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_folder: bool,
}

impl Obj {
    pub fn file(name: impl Into<String>, path: impl Into<String>, size: u64) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            path: path.into(),
            size,
            modified: Utc::now(),
            is_folder: false,
        }
    }

    pub fn folder(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            path: path.into(),
            size: 0,
            modified: Utc::now(),
            is_folder: true,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.is_folder
    }
}

/// 获取直链时的参数
#[derive(Debug, Clone, Default)]
pub struct LinkArgs {
    /// 客户端 IP
    pub ip: String,
    /// 透传给驱动的请求头
    pub header: HashMap<String, String>,
}

/// 驱动返回的下载链接
#[derive(Debug, Clone, Default)]
pub struct Link {
    pub url: String,
    /// 访问链接时必须携带的请求头（鉴权等）
    pub header: HashMap<String, String>,
    /// 本地文件路径（本地类驱动直接给出文件）
    pub file_path: Option<PathBuf>,
    /// 链接有效期
    pub expiration: Option<Duration>,
}

impl Link {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }
}

/// 驱动扩展调用参数
#[derive(Debug, Clone)]
pub struct OtherArgs {
    /// 目标对象路径
    pub path: String,
    /// 方法名
    pub method: String,
    pub data: serde_json::Value,
}
