//! 存储层操作
//!
//! - [`StorageRegistry`]：存储的增删改查与挂载表
//! - 路径解析（最长前缀、负载均衡、虚拟目录）
//! - [`object`]：单个实例上的对象操作

pub mod mount_map;
pub mod object;
mod resolve;
pub mod storage;
pub mod store;

pub use mount_map::MountMap;
pub use storage::{StorageEvent, StorageHook, StorageRegistry};
pub use store::StorageStore;
