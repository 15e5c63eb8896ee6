// 内置的 HTTP 下载工具
//
// 直接在任务内同步下载到临时目录，不需要轮询

use super::tool::{AddUrlArgs, Tool, ToolJob, ToolStatus};
use crate::errors::{Error, Result};
use crate::stream::{copy_with_progress, ProgressReporter, ProgressSink};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use tokio::io::BufWriter;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

pub const SIMPLE_HTTP_TOOL: &str = "SimpleHttp";

pub struct SimpleHttpTool {
    client: Client,
}

impl SimpleHttpTool {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// 从 URL 推断文件名
fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let name = path
        .split_once('/')
        .map(|(_, p)| p.rsplit('/').next().unwrap_or_default())
        .unwrap_or_default();
    let name = urlencoding::decode(name)
        .map(|n| n.into_owned())
        .unwrap_or_else(|_| name.to_string());
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." {
        "download".to_string()
    } else {
        name.replace(['/', '\\'], "_")
    }
}

#[async_trait]
impl Tool for SimpleHttpTool {
    fn name(&self) -> &str {
        SIMPLE_HTTP_TOOL
    }

    async fn init(&self) -> Result<String> {
        Ok("ok".to_string())
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn run(&self, job: &ToolJob, progress: ProgressSink) -> Result<()> {
        let resp = self.client.get(&job.url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Fatal(format!(
                "failed to download {}, status: {}",
                job.url,
                resp.status()
            )));
        }
        let total = resp.content_length().unwrap_or(0);

        tokio::fs::create_dir_all(&job.temp_dir).await?;
        let path = job.temp_dir.join(file_name_from_url(&job.url));
        debug!("开始下载: {} -> {:?}, 大小: {}", job.url, path, total);

        let body = Box::pin(
            resp.bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );
        let mut reader = StreamReader::new(body);
        let mut writer = BufWriter::new(tokio::fs::File::create(&path).await?);
        let reporter = ProgressReporter::new(total, progress);
        let written = copy_with_progress(&mut reader, &mut writer, &reporter).await?;
        info!("下载完成: {:?}, {} 字节", path, written);
        Ok(())
    }

    async fn add_url(&self, _args: AddUrlArgs) -> Result<String> {
        Err(Error::NotSupport)
    }

    async fn status(&self, _job: &ToolJob) -> Result<ToolStatus> {
        Err(Error::NotSupport)
    }

    async fn remove(&self, _job: &ToolJob) -> Result<()> {
        Ok(())
    }
}
