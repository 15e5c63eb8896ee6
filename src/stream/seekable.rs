//! 可寻址数据流
//!
//! 把驱动给出的链接包装为支持字节范围读取的流，用于在两个存储之间
//! 搬运数据，而不必把整个文件读入内存。
//!
//! - HTTP 链接：使用 Range 请求读取任意区间，携带源驱动要求的请求头
//! - 本地文件：打开文件后 seek 到偏移处读取

use crate::errors::{Error, Result};
use crate::model::{Link, Obj};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::io::StreamReader;
use tracing::debug;

/// 装箱后的异步读取器
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// 数据来源
#[derive(Debug, Clone)]
enum StreamSource {
    Http {
        client: Client,
        url: String,
        header: HashMap<String, String>,
    },
    Local {
        path: PathBuf,
    },
}

/// 可寻址数据流
#[derive(Debug, Clone)]
pub struct SeekableStream {
    obj: Obj,
    source: StreamSource,
}

impl SeekableStream {
    /// 由驱动链接创建
    ///
    /// 链接带本地文件路径时直接读取文件，否则通过 HTTP 读取
    pub fn new(obj: Obj, link: &Link, client: &Client) -> Result<Self> {
        if let Some(ref path) = link.file_path {
            return Ok(Self {
                obj,
                source: StreamSource::Local { path: path.clone() },
            });
        }
        if link.url.is_empty() {
            return Err(Error::Other(format!("[{}] 的链接为空", obj.name)));
        }
        Ok(Self {
            obj,
            source: StreamSource::Http {
                client: client.clone(),
                url: link.url.clone(),
                header: link.header.clone(),
            },
        })
    }

    /// 由本地文件创建（离线下载产物）
    pub async fn from_local(path: &Path) -> Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let mut obj = Obj::file(name, path.to_string_lossy(), meta.len());
        if let Ok(modified) = meta.modified() {
            obj.modified = modified.into();
        }
        Ok(Self {
            obj,
            source: StreamSource::Local {
                path: path.to_path_buf(),
            },
        })
    }

    pub fn obj(&self) -> &Obj {
        &self.obj
    }

    pub fn name(&self) -> &str {
        &self.obj.name
    }

    pub fn size(&self) -> u64 {
        self.obj.size
    }

    /// 读取 `[offset, offset + length)` 区间，`length` 为空表示读到末尾
    pub async fn range_read(&self, offset: u64, length: Option<u64>) -> Result<BoxReader> {
        match &self.source {
            StreamSource::Local { path } => {
                let mut file = tokio::fs::File::open(path).await?;
                if offset > 0 {
                    file.seek(SeekFrom::Start(offset)).await?;
                }
                Ok(match length {
                    Some(len) => Box::new(file.take(len)),
                    None => Box::new(file),
                })
            }
            StreamSource::Http {
                client,
                url,
                header,
            } => {
                let mut request = client.get(url);
                for (k, v) in header {
                    request = request.header(k.as_str(), v.as_str());
                }
                let ranged = offset > 0 || length.is_some();
                if ranged {
                    let range = match length {
                        Some(len) if len > 0 => format!("bytes={}-{}", offset, offset + len - 1),
                        _ => format!("bytes={}-", offset),
                    };
                    debug!("Range 请求: {} ({})", self.obj.name, range);
                    request = request.header("Range", range);
                }
                let resp = request.send().await?.error_for_status()?;
                // 服务端忽略 Range 时无法从中间开始读
                if ranged && offset > 0 && resp.status() != StatusCode::PARTIAL_CONTENT {
                    return Err(Error::Other(format!(
                        "[{}] 的链接不支持 Range 请求: {}",
                        self.obj.name,
                        resp.status()
                    )));
                }
                let body = Box::pin(resp.bytes_stream().map(|chunk| {
                    chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
                }));
                let reader = StreamReader::new(body);
                Ok(match length {
                    Some(len) => Box::new(reader.take(len)),
                    None => Box::new(reader),
                })
            }
        }
    }

    /// 从头读取整个流
    pub async fn reader(&self) -> Result<BoxReader> {
        self.range_read(0, None).await
    }

    /// 一次性读入内存（仅用于小文件）
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        let mut reader = self.reader().await?;
        let mut buf = Vec::with_capacity(self.obj.size as usize);
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}
