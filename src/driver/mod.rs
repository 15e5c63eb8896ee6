//! 存储驱动能力契约
//!
//! 每个后端（网盘、对象存储等）实现 [`Driver`]，核心层只通过该契约调用后端。
//! 驱动的具体 HTTP/API 逻辑由外部实现并通过 [`DriverTable`] 注册。

pub mod local;
pub mod mounted;

use crate::errors::{Error, Result};
use crate::model::{Link, LinkArgs, Obj, OtherArgs};
use crate::stream::{ProgressSink, SeekableStream};
use async_trait::async_trait;
use std::collections::HashMap;

pub use local::{LocalDriver, LOCAL_DRIVER};
pub use mounted::MountedStorage;

/// 驱动静态配置
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// 驱动类型名称
    pub name: &'static str,
    /// 是否由本地排序
    pub local_sort: bool,
    /// 是否禁止上传
    pub no_upload: bool,
    /// 默认根目录
    pub default_root: &'static str,
}

/// 存储驱动
///
/// 路径参数均为驱动内的路径（已去掉挂载前缀，以 `/` 开头）
#[async_trait]
pub trait Driver: Send + Sync {
    fn config(&self) -> DriverConfig;

    /// 把 Addition JSON 解码为驱动的强类型配置
    fn load_addition(&mut self, addition: &str) -> Result<()>;

    /// 把当前配置编码为 Addition JSON（驱动可能在运行期刷新 token 等字段）
    fn dump_addition(&self) -> Result<String>;

    /// 初始化（登录、获取根目录 ID 等）
    async fn init(&self) -> Result<()>;

    /// 释放资源：停止定时器和后台刷新任务
    async fn release(&self) -> Result<()>;

    async fn list(&self, dir: &str) -> Result<Vec<Obj>>;

    /// 直接获取对象，未实现时由上层通过列举父目录查找
    async fn get(&self, _path: &str) -> Result<Obj> {
        Err(Error::NotImplement)
    }

    async fn link(&self, path: &str, args: &LinkArgs) -> Result<Link>;

    async fn make_dir(&self, parent_dir: &str, name: &str) -> Result<()>;

    async fn move_obj(&self, _src_path: &str, _dst_dir: &str) -> Result<()> {
        Err(Error::NotImplement)
    }

    async fn rename(&self, _src_path: &str, _new_name: &str) -> Result<()> {
        Err(Error::NotImplement)
    }

    async fn copy(&self, _src_path: &str, _dst_dir: &str) -> Result<()> {
        Err(Error::NotImplement)
    }

    async fn remove(&self, _path: &str) -> Result<()> {
        Err(Error::NotImplement)
    }

    /// 上传流到目录，字节进度通过 `progress` 回调
    async fn put(&self, dst_dir: &str, stream: SeekableStream, progress: ProgressSink) -> Result<()>;

    /// 驱动扩展调用
    async fn other(&self, _args: OtherArgs) -> Result<serde_json::Value> {
        Err(Error::NotImplement)
    }
}

/// 驱动构造函数
pub type DriverConstructor = fn() -> Box<dyn Driver>;

/// 驱动类型名称 -> 构造函数 的显式映射表
#[derive(Default, Clone)]
pub struct DriverTable {
    constructors: HashMap<String, DriverConstructor>,
}

impl DriverTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册驱动类型（同名覆盖）
    pub fn register(&mut self, name: &str, constructor: DriverConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn with(mut self, name: &str, constructor: DriverConstructor) -> Self {
        self.register(name, constructor);
        self
    }

    /// 按名称实例化驱动
    pub fn create(&self, name: &str) -> Result<Box<dyn Driver>> {
        self.constructors
            .get(name)
            .map(|c| c())
            .ok_or_else(|| Error::UnknownDriver(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// 已注册的驱动名称（排序后）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}
