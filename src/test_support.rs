// 测试辅助：可控的模拟驱动、记录型通知器和最小 HTTP 服务

use crate::driver::{Driver, DriverConfig, DriverTable, LocalDriver};
use crate::errors::{Error, Result};
use crate::model::{Link, LinkArgs, Obj};
use crate::notify::Notifier;
use crate::stream::{ProgressSink, SeekableStream};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub const MOCK_DRIVER: &str = "mock";

/// 模拟驱动配置
///
/// 文件操作委托给本地目录驱动，其余字段用于注入故障和延迟
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockAddition {
    #[serde(default)]
    pub root_folder_path: String,
    /// 统计计数的键
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub fail_init: bool,
    #[serde(default)]
    pub list_delay_ms: u64,
    /// 是否支持同实例内原生复制
    #[serde(default)]
    pub native_copy: bool,
    #[serde(default)]
    pub token: String,
}

/// 按 tag 统计的调用次数
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    pub inits: usize,
    pub releases: usize,
    pub puts: usize,
    pub native_copies: usize,
}

fn stats_table() -> &'static DashMap<String, MockStats> {
    static STATS: OnceLock<DashMap<String, MockStats>> = OnceLock::new();
    STATS.get_or_init(DashMap::new)
}

pub fn mock_stats(tag: &str) -> MockStats {
    stats_table()
        .get(tag)
        .map(|s| s.value().clone())
        .unwrap_or_default()
}

#[derive(Default)]
pub struct MockDriver {
    local: LocalDriver,
    addition: RwLock<MockAddition>,
}

impl MockDriver {
    pub fn boxed() -> Box<dyn Driver> {
        Box::new(Self::default())
    }

    fn count(&self, f: impl FnOnce(&mut MockStats)) {
        let tag = self.addition.read().tag.clone();
        if !tag.is_empty() {
            f(&mut stats_table().entry(tag).or_default());
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn config(&self) -> DriverConfig {
        DriverConfig {
            name: MOCK_DRIVER,
            ..Default::default()
        }
    }

    fn load_addition(&mut self, addition: &str) -> Result<()> {
        let parsed: MockAddition =
            serde_json::from_str(addition).map_err(|e| Error::InvalidAddition(e.to_string()))?;
        self.local.load_addition(addition)?;
        *self.addition.write() = parsed;
        Ok(())
    }

    fn dump_addition(&self) -> Result<String> {
        Ok(serde_json::to_string(&*self.addition.read())?)
    }

    async fn init(&self) -> Result<()> {
        self.count(|s| s.inits += 1);
        if self.addition.read().fail_init {
            return Err(Error::Other("mock init failed".to_string()));
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.count(|s| s.releases += 1);
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<Obj>> {
        let delay = self.addition.read().list_delay_ms;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.local.list(dir).await
    }

    async fn get(&self, path: &str) -> Result<Obj> {
        self.local.get(path).await
    }

    async fn link(&self, path: &str, args: &LinkArgs) -> Result<Link> {
        self.local.link(path, args).await
    }

    async fn make_dir(&self, parent_dir: &str, name: &str) -> Result<()> {
        self.local.make_dir(parent_dir, name).await
    }

    async fn move_obj(&self, src_path: &str, dst_dir: &str) -> Result<()> {
        self.local.move_obj(src_path, dst_dir).await
    }

    async fn rename(&self, src_path: &str, new_name: &str) -> Result<()> {
        self.local.rename(src_path, new_name).await
    }

    async fn copy(&self, src_path: &str, dst_dir: &str) -> Result<()> {
        if !self.addition.read().native_copy {
            return Err(Error::NotImplement);
        }
        self.count(|s| s.native_copies += 1);
        self.local.copy(src_path, dst_dir).await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.local.remove(path).await
    }

    async fn put(&self, dst_dir: &str, stream: SeekableStream, progress: ProgressSink) -> Result<()> {
        self.count(|s| s.puts += 1);
        self.local.put(dst_dir, stream, progress).await
    }
}

/// 注册了模拟驱动和本地驱动的驱动表
pub fn mock_driver_table() -> DriverTable {
    DriverTable::new()
        .with(MOCK_DRIVER, MockDriver::boxed)
        .with(crate::driver::LOCAL_DRIVER, LocalDriver::boxed)
}

/// 模拟驱动的 Addition
pub fn mock_addition(root: &std::path::Path, tag: &str) -> String {
    serde_json::json!({ "root_folder_path": root, "tag": tag }).to_string()
}

/// 记录所有通知
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(String, String)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, content: &str) {
        self.messages
            .lock()
            .push((title.to_string(), content.to_string()));
    }
}

/// 轮询等待条件成立
pub async fn wait_until<F: Fn() -> bool>(f: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("等待条件超时");
}

/// 本地 HTTP 服务，记录收到的请求头（已转小写）
pub struct TestHttpServer {
    pub url: String,
    pub requests: Arc<Mutex<Vec<String>>>,
}

/// 启动一个只处理简单 GET 的 HTTP 服务
///
/// `respond` 收到小写的请求头文本，返回状态码和响应体
pub async fn serve_http<F>(respond: F) -> TestHttpServer
where
    F: Fn(&str) -> (u16, Vec<u8>) + Send + Sync + 'static,
{
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);
    let recorded = requests.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = respond.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&head).to_lowercase();
                recorded.lock().push(head.clone());

                let (code, body) = respond(&head);
                let reason = match code {
                    200 => "OK",
                    206 => "Partial Content",
                    404 => "Not Found",
                    _ => "Unknown",
                };
                let header = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    code,
                    reason,
                    body.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    TestHttpServer {
        url: format!("http://{}", addr),
        requests,
    }
}

/// 按请求中的 `range: bytes=a-b` 返回 206 区间，没有 Range 时返回 200 全文
pub fn ranged_response(head: &str, data: &[u8]) -> (u16, Vec<u8>) {
    let range = head
        .lines()
        .find_map(|line| line.strip_prefix("range: bytes="))
        .and_then(|r| r.trim().split_once('-'));
    let Some((start, end)) = range else {
        return (200, data.to_vec());
    };
    let start = start.parse::<usize>().unwrap_or(0).min(data.len());
    let end = end
        .parse::<usize>()
        .map(|e| (e + 1).min(data.len()))
        .unwrap_or(data.len());
    (206, data[start..end.max(start)].to_vec())
}
