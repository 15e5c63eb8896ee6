// 单个存储实例上的对象操作
//
// 路径参数都是驱动内路径（已由解析器去掉挂载前缀）

use crate::driver::MountedStorage;
use crate::errors::{Error, Result};
use crate::model::{Link, LinkArgs, Obj};
use crate::stream::{ProgressSink, SeekableStream};
use crate::utils::path::{fix_and_clean_path, split_path};
use tracing::debug;

/// 根目录对象
fn root_folder() -> Obj {
    Obj::folder("root", "/")
}

pub async fn list(storage: &MountedStorage, dir: &str) -> Result<Vec<Obj>> {
    let dir = fix_and_clean_path(dir);
    storage
        .driver()
        .list(&dir)
        .await
        .map_err(|e| e.context(format!("failed to list objs of {}", dir)))
}

/// 获取对象：驱动未实现 get 时列举父目录查找
pub async fn get(storage: &MountedStorage, path: &str) -> Result<Obj> {
    let path = fix_and_clean_path(path);
    if path == "/" {
        return Ok(root_folder());
    }
    match storage.driver().get(&path).await {
        Ok(obj) => return Ok(obj),
        Err(e) if !e.is_not_implement() => {
            debug!("驱动 get 失败，改为列举父目录: {}, 错误: {}", path, e);
        }
        Err(_) => {}
    }

    let (dir, name) = split_path(&path);
    let files = list(storage, &dir).await?;
    files
        .into_iter()
        .find(|f| f.name == name)
        .ok_or(Error::ObjectNotFound)
}

/// 获取文件链接，目录返回错误
pub async fn link(storage: &MountedStorage, path: &str, args: &LinkArgs) -> Result<(Link, Obj)> {
    let file = get(storage, path)
        .await
        .map_err(|e| e.context("failed to get file"))?;
    if file.is_dir() {
        return Err(Error::Other(format!("not a file: {}", path)));
    }
    let link = storage
        .driver()
        .link(&obj_path(&file, path), args)
        .await
        .map_err(|e| e.context("failed get link"))?;
    Ok((link, file))
}

/// 递归创建目录；已存在同名文件时报错
pub async fn make_dir(storage: &MountedStorage, path: &str) -> Result<()> {
    let mut missing: Vec<(String, String)> = Vec::new();
    let mut cur = fix_and_clean_path(path);
    loop {
        match get(storage, &cur).await {
            Ok(obj) => {
                if !obj.is_dir() {
                    return Err(Error::Other(format!("file exists: {}", cur)));
                }
                break;
            }
            Err(e) if e.is_object_not_found() => {
                let (parent, name) = split_path(&cur);
                missing.push((parent.clone(), name));
                cur = parent;
            }
            Err(e) => return Err(e.context("failed to check if dir exists")),
        }
    }
    for (parent, name) in missing.into_iter().rev() {
        storage
            .driver()
            .make_dir(&parent, &name)
            .await
            .map_err(|e| e.context(format!("failed to make dir [{}]", name)))?;
    }
    Ok(())
}

pub async fn move_obj(storage: &MountedStorage, src_path: &str, dst_dir: &str) -> Result<()> {
    let src_path = fix_and_clean_path(src_path);
    let dst_dir = fix_and_clean_path(dst_dir);
    get(storage, &src_path)
        .await
        .map_err(|e| e.context("failed to get src object"))?;
    storage
        .driver()
        .move_obj(&src_path, &dst_dir)
        .await
}

pub async fn rename(storage: &MountedStorage, src_path: &str, new_name: &str) -> Result<()> {
    if new_name.is_empty() || new_name.contains('/') {
        return Err(Error::Other(format!("invalid name: {}", new_name)));
    }
    let src_path = fix_and_clean_path(src_path);
    get(storage, &src_path)
        .await
        .map_err(|e| e.context("failed to get src object"))?;
    storage.driver().rename(&src_path, new_name).await
}

/// 同一实例内复制
pub async fn copy(storage: &MountedStorage, src_path: &str, dst_dir: &str) -> Result<()> {
    let src_path = fix_and_clean_path(src_path);
    let dst_dir = fix_and_clean_path(dst_dir);
    storage.driver().copy(&src_path, &dst_dir).await
}

/// 删除对象，对象不存在时视为成功
pub async fn remove(storage: &MountedStorage, path: &str) -> Result<()> {
    let path = fix_and_clean_path(path);
    if path == "/" {
        return Err(Error::Other("delete root folder is not allowed".to_string()));
    }
    match get(storage, &path).await {
        Ok(_) => storage.driver().remove(&path).await,
        Err(e) if e.is_object_not_found() => {
            debug!("{} 不存在，无需删除", path);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// 上传：先确保目标目录存在
pub async fn put(
    storage: &MountedStorage,
    dst_dir: &str,
    stream: SeekableStream,
    progress: ProgressSink,
) -> Result<()> {
    let dst_dir = fix_and_clean_path(dst_dir);
    if storage.driver().config().no_upload {
        return Err(Error::NotSupport);
    }
    make_dir(storage, &dst_dir)
        .await
        .map_err(|e| e.context(format!("failed to make dir [{}]", dst_dir)))?;
    let name = stream.name().to_string();
    storage
        .driver()
        .put(&dst_dir, stream, progress.clone())
        .await
        .map_err(|e| e.context(format!("failed to put file [{}]", name)))?;
    progress(100.0);
    Ok(())
}

/// 驱动返回的对象可能不带路径
fn obj_path(obj: &Obj, fallback: &str) -> String {
    if obj.path.is_empty() {
        fix_and_clean_path(fallback)
    } else {
        obj.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MountedStorage;
    use crate::model::Storage;
    use crate::stream::noop_sink;
    use crate::test_support::{mock_addition, MockDriver, MOCK_DRIVER};
    use tempfile::TempDir;

    async fn mounted(dir: &TempDir) -> MountedStorage {
        let addition = mock_addition(dir.path(), "");
        let mut driver = MockDriver::boxed();
        driver.load_addition(&addition).unwrap();
        driver.init().await.unwrap();
        MountedStorage::new(Storage::new("/m", MOCK_DRIVER).with_addition(addition), driver)
    }

    #[tokio::test]
    async fn test_get_root_and_missing() {
        let dir = TempDir::new().unwrap();
        let storage = mounted(&dir).await;
        assert!(get(&storage, "/").await.unwrap().is_dir());
        assert!(get(&storage, "/nope").await.unwrap_err().is_object_not_found());
    }

    #[tokio::test]
    async fn test_make_dir_recursive_and_file_conflict() {
        let dir = TempDir::new().unwrap();
        let storage = mounted(&dir).await;

        make_dir(&storage, "/a/b/c").await.unwrap();
        assert!(dir.path().join("a/b/c").is_dir());
        make_dir(&storage, "/a/b").await.unwrap();

        tokio::fs::write(dir.path().join("a/file"), b"x").await.unwrap();
        assert!(make_dir(&storage, "/a/file/sub").await.is_err());
    }

    #[tokio::test]
    async fn test_put_creates_parent_and_link_reads_back() {
        let src = TempDir::new().unwrap();
        let src_file = src.path().join("song.flac");
        tokio::fs::write(&src_file, b"music").await.unwrap();

        let dir = TempDir::new().unwrap();
        let storage = mounted(&dir).await;
        let stream = SeekableStream::from_local(&src_file).await.unwrap();
        put(&storage, "/x/y", stream, noop_sink()).await.unwrap();

        let (link, obj) = link(&storage, "/x/y/song.flac", &LinkArgs::default()).await.unwrap();
        assert_eq!(obj.size, 5);
        assert_eq!(link.file_path.unwrap(), dir.path().join("x/y/song.flac"));

        assert!(super::link(&storage, "/x", &LinkArgs::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok_and_copy_not_implemented() {
        let dir = TempDir::new().unwrap();
        let storage = mounted(&dir).await;
        remove(&storage, "/ghost").await.unwrap();
        assert!(remove(&storage, "/").await.is_err());

        tokio::fs::write(dir.path().join("f.txt"), b"x").await.unwrap();
        assert!(copy(&storage, "/f.txt", "/").await.unwrap_err().is_not_implement());

        rename(&storage, "/f.txt", "g.txt").await.unwrap();
        assert!(dir.path().join("g.txt").exists());
        assert!(rename(&storage, "/g.txt", "a/b").await.is_err());
    }
}
