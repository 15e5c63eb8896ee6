//! 命名空间文件操作
//!
//! 对外暴露的路径都是虚拟路径：先解析到存储实例和驱动内路径，
//! 再调用 [`crate::op::object`] 中的单实例操作。

mod copy;
mod upload;

pub use copy::{copy, CopyOptions, CopyOutcome, CopyTask};
pub use upload::{put_as_task, UploadTask};

use crate::errors::{Error, Result};
use crate::model::{Link, LinkArgs, Obj};
use crate::op::{object, StorageRegistry};
use crate::stream::{ProgressSink, SeekableStream};
use crate::utils::path::{fix_and_clean_path, split_path};
use std::collections::HashSet;
use tracing::error;

/// 列举目录，合并子挂载点合成的虚拟目录（同名时虚拟目录优先）
pub async fn list(registry: &StorageRegistry, path: &str) -> Result<Vec<Obj>> {
    let path = fix_and_clean_path(path);
    let virtual_files = registry.get_storage_virtual_files_by_path(&path);
    let objs = match registry.get_storage_and_actual_path(&path) {
        Ok((storage, actual_path)) => match object::list(&storage, &actual_path).await {
            Ok(objs) => objs,
            Err(e) => {
                error!("fs/list: {}", e);
                if virtual_files.is_empty() {
                    return Err(e.context("failed get objs"));
                }
                Vec::new()
            }
        },
        Err(e) => {
            if virtual_files.is_empty() {
                return Err(e.context("failed get storage"));
            }
            Vec::new()
        }
    };

    let mut names = HashSet::new();
    let mut merged = Vec::with_capacity(virtual_files.len() + objs.len());
    for obj in virtual_files.into_iter().chain(objs) {
        if names.insert(obj.name.clone()) {
            merged.push(obj);
        }
    }
    Ok(merged)
}

/// 获取对象；虚拟目录和根目录返回合成的文件夹
pub async fn get(registry: &StorageRegistry, path: &str) -> Result<Obj> {
    let path = fix_and_clean_path(path);
    if path != "/" {
        let (dir, name) = split_path(&path);
        if let Some(obj) = registry
            .get_storage_virtual_files_by_path(&dir)
            .into_iter()
            .find(|f| f.name == name)
        {
            return Ok(obj);
        }
    }
    match registry.get_storage_and_actual_path(&path) {
        Ok((storage, actual_path)) => object::get(&storage, &actual_path).await,
        // 没有挂载在根上的存储时，根目录仍然存在
        Err(_) if path == "/" => Ok(Obj::folder("root", "/")),
        Err(e) => Err(e.context("failed get storage")),
    }
}

pub async fn make_dir(registry: &StorageRegistry, path: &str) -> Result<()> {
    let (storage, actual_path) = registry
        .get_storage_and_actual_path(path)
        .map_err(|e| e.context("failed get storage"))?;
    object::make_dir(&storage, &actual_path).await
}

pub async fn rename(registry: &StorageRegistry, src_path: &str, new_name: &str) -> Result<()> {
    let (storage, actual_path) = registry
        .get_storage_and_actual_path(src_path)
        .map_err(|e| e.context("failed get storage"))?;
    object::rename(&storage, &actual_path, new_name).await
}

pub async fn remove(registry: &StorageRegistry, path: &str) -> Result<()> {
    let (storage, actual_path) = registry
        .get_storage_and_actual_path(path)
        .map_err(|e| e.context("failed get storage"))?;
    object::remove(&storage, &actual_path).await
}

/// 移动对象，只支持同一存储实例内
pub async fn move_obj(registry: &StorageRegistry, src_path: &str, dst_dir: &str) -> Result<()> {
    let (src_storage, src_actual) = registry
        .get_storage_and_actual_path(src_path)
        .map_err(|e| e.context("failed get src storage"))?;
    let (dst_storage, dst_actual) = registry
        .get_storage_and_actual_path(dst_dir)
        .map_err(|e| e.context("failed get dst storage"))?;
    if !src_storage.same_as(&dst_storage) {
        return Err(Error::CrossStorageMove);
    }
    object::move_obj(&src_storage, &src_actual, &dst_actual).await
}

pub async fn link(registry: &StorageRegistry, path: &str, args: &LinkArgs) -> Result<(Link, Obj)> {
    let (storage, actual_path) = registry
        .get_storage_and_actual_path(path)
        .map_err(|e| e.context("failed get storage"))?;
    object::link(&storage, &actual_path, args).await
}

/// 直接上传到目标目录
pub async fn put(
    registry: &StorageRegistry,
    dst_dir: &str,
    stream: SeekableStream,
    progress: ProgressSink,
) -> Result<()> {
    let (storage, actual_path) = registry
        .get_storage_and_actual_path(dst_dir)
        .map_err(|e| e.context("failed get storage"))?;
    object::put(&storage, &actual_path, stream, progress).await
}
