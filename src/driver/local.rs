// 本地目录驱动
//
// 把本机目录挂载到虚拟路径下；驱动路径一律相对于 root_folder_path 解析，
// 传入的路径已经过规范化，不会越过根目录。

use super::{Driver, DriverConfig};
use crate::errors::{Error, Result};
use crate::model::{Link, LinkArgs, Obj};
use crate::stream::{copy_with_progress, ProgressReporter, ProgressSink, SeekableStream};
use crate::utils::path::{fix_and_clean_path, join_path, split_path};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const LOCAL_DRIVER: &str = "local";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalAddition {
    /// 本机根目录
    #[serde(default)]
    pub root_folder_path: String,
}

#[derive(Default)]
pub struct LocalDriver {
    addition: RwLock<LocalAddition>,
}

impl LocalDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 驱动构造函数（注册到驱动表）
    pub fn boxed() -> Box<dyn Driver> {
        Box::new(Self::new())
    }

    fn root(&self) -> PathBuf {
        PathBuf::from(&self.addition.read().root_folder_path)
    }

    /// 驱动路径 -> 本机路径
    pub fn full_path(&self, path: &str) -> PathBuf {
        let clean = fix_and_clean_path(path);
        let relative = clean.trim_start_matches('/');
        if relative.is_empty() {
            self.root()
        } else {
            self.root().join(relative)
        }
    }
}

fn to_obj(name: String, path: String, meta: &Metadata) -> Obj {
    let mut obj = if meta.is_dir() {
        Obj::folder(name, path)
    } else {
        Obj::file(name, path, meta.len())
    };
    if let Ok(modified) = meta.modified() {
        obj.modified = modified.into();
    }
    obj
}

fn map_not_found(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::ObjectNotFound
    } else {
        Error::Io(err)
    }
}

/// 递归复制目录（阻塞调用）
fn copy_dir_blocking(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl Driver for LocalDriver {
    fn config(&self) -> DriverConfig {
        DriverConfig {
            name: LOCAL_DRIVER,
            local_sort: true,
            no_upload: false,
            default_root: "/",
        }
    }

    fn load_addition(&mut self, addition: &str) -> Result<()> {
        let parsed: LocalAddition =
            serde_json::from_str(addition).map_err(|e| Error::InvalidAddition(e.to_string()))?;
        *self.addition.write() = parsed;
        Ok(())
    }

    fn dump_addition(&self) -> Result<String> {
        Ok(serde_json::to_string(&*self.addition.read())?)
    }

    async fn init(&self) -> Result<()> {
        let root = self.root();
        if root.as_os_str().is_empty() {
            return Err(Error::Other("根目录未配置".to_string()));
        }
        let meta = tokio::fs::metadata(&root)
            .await
            .map_err(|e| Error::Other(format!("根目录不可访问 {:?}: {}", root, e)))?;
        if !meta.is_dir() {
            return Err(Error::Other(format!("根目录不是文件夹: {:?}", root)));
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<Obj>> {
        let full = self.full_path(dir);
        let mut read_dir = tokio::fs::read_dir(&full).await.map_err(map_not_found)?;
        let mut objs = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!("跳过无法读取元数据的条目 {}: {}", name, e);
                    continue;
                }
            };
            let path = join_path(dir, &name);
            objs.push(to_obj(name, path, &meta));
        }
        objs.sort_by(|a, b| b.is_folder.cmp(&a.is_folder).then(a.name.cmp(&b.name)));
        Ok(objs)
    }

    async fn get(&self, path: &str) -> Result<Obj> {
        let meta = tokio::fs::metadata(self.full_path(path))
            .await
            .map_err(map_not_found)?;
        let (_, name) = split_path(path);
        Ok(to_obj(name, fix_and_clean_path(path), &meta))
    }

    async fn link(&self, path: &str, _args: &LinkArgs) -> Result<Link> {
        Ok(Link::local(self.full_path(path)))
    }

    async fn make_dir(&self, parent_dir: &str, name: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.full_path(&join_path(parent_dir, name))).await?;
        Ok(())
    }

    async fn move_obj(&self, src_path: &str, dst_dir: &str) -> Result<()> {
        let (_, name) = split_path(src_path);
        tokio::fs::rename(
            self.full_path(src_path),
            self.full_path(&join_path(dst_dir, &name)),
        )
        .await
        .map_err(map_not_found)
    }

    async fn rename(&self, src_path: &str, new_name: &str) -> Result<()> {
        let (parent, _) = split_path(src_path);
        tokio::fs::rename(
            self.full_path(src_path),
            self.full_path(&join_path(&parent, new_name)),
        )
        .await
        .map_err(map_not_found)
    }

    async fn copy(&self, src_path: &str, dst_dir: &str) -> Result<()> {
        let (_, name) = split_path(src_path);
        let src = self.full_path(src_path);
        let dst = self.full_path(&join_path(dst_dir, &name));
        let meta = tokio::fs::metadata(&src).await.map_err(map_not_found)?;
        if meta.is_dir() {
            tokio::task::spawn_blocking(move || copy_dir_blocking(&src, &dst))
                .await
                .map_err(|e| Error::Other(format!("复制目录任务异常: {}", e)))??;
        } else {
            tokio::fs::copy(&src, &dst).await?;
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        let meta = tokio::fs::metadata(&full).await.map_err(map_not_found)?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&full).await?;
        } else {
            tokio::fs::remove_file(&full).await?;
        }
        Ok(())
    }

    async fn put(&self, dst_dir: &str, stream: SeekableStream, progress: ProgressSink) -> Result<()> {
        let target = self.full_path(&join_path(dst_dir, stream.name()));
        // 先写临时文件，完成后再改名，失败时不留下半截文件
        let part = target.with_file_name(format!("{}.part", stream.name()));

        let mut reader = stream.reader().await?;
        let mut file = tokio::fs::File::create(&part).await?;
        let reporter = ProgressReporter::new(stream.size(), progress);
        if let Err(e) = copy_with_progress(&mut reader, &mut file, &reporter).await {
            drop(file);
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        drop(file);
        tokio::fs::rename(&part, &target).await?;
        debug!("本地写入完成: {:?} ({} 字节)", target, reporter.done());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::noop_sink;
    use tempfile::TempDir;

    async fn driver_at(dir: &TempDir) -> LocalDriver {
        let mut driver = LocalDriver::new();
        let addition = serde_json::json!({ "root_folder_path": dir.path() }).to_string();
        driver.load_addition(&addition).unwrap();
        driver.init().await.unwrap();
        driver
    }

    #[tokio::test]
    async fn test_init_rejects_missing_root() {
        let mut driver = LocalDriver::new();
        driver
            .load_addition(r#"{"root_folder_path":"/definitely/not/here"}"#)
            .unwrap();
        assert!(driver.init().await.is_err());

        let mut driver = LocalDriver::new();
        assert!(matches!(
            driver.load_addition("not json"),
            Err(Error::InvalidAddition(_))
        ));
    }

    #[tokio::test]
    async fn test_list_get_make_dir_remove() {
        let dir = TempDir::new().unwrap();
        let driver = driver_at(&dir).await;

        driver.make_dir("/", "docs").await.unwrap();
        tokio::fs::write(dir.path().join("docs/a.txt"), b"abc").await.unwrap();

        let root = driver.list("/").await.unwrap();
        assert_eq!(root.len(), 1);
        assert!(root[0].is_dir());
        assert_eq!(root[0].path, "/docs");

        let file = driver.get("/docs/a.txt").await.unwrap();
        assert_eq!(file.size, 3);
        assert_eq!(file.name, "a.txt");

        assert!(driver.get("/docs/missing").await.unwrap_err().is_object_not_found());

        driver.remove("/docs").await.unwrap();
        assert!(driver.list("/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_and_copy() {
        let src_dir = TempDir::new().unwrap();
        let src_file = src_dir.path().join("movie.mkv");
        tokio::fs::write(&src_file, vec![1u8; 4096]).await.unwrap();

        let dir = TempDir::new().unwrap();
        let driver = driver_at(&dir).await;
        driver.make_dir("/", "in").await.unwrap();
        driver.make_dir("/", "out").await.unwrap();

        let stream = SeekableStream::from_local(&src_file).await.unwrap();
        driver.put("/in", stream, noop_sink()).await.unwrap();
        assert_eq!(
            tokio::fs::read(dir.path().join("in/movie.mkv")).await.unwrap().len(),
            4096
        );
        assert!(!dir.path().join("in/movie.mkv.part").exists());

        driver.copy("/in/movie.mkv", "/out").await.unwrap();
        driver.copy("/in", "/out").await.unwrap();
        assert!(dir.path().join("out/movie.mkv").exists());
        assert!(dir.path().join("out/in/movie.mkv").exists());

        driver.rename("/out/movie.mkv", "renamed.mkv").await.unwrap();
        driver.move_obj("/out/renamed.mkv", "/in").await.unwrap();
        assert!(dir.path().join("in/renamed.mkv").exists());
    }
}
