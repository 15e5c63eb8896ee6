// 推送平台
//
// 平台名称 -> 发送函数 的显式表，名称不区分大小写

use super::Notifier;
use crate::config::NotifyConfig;
use crate::errors::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

type SendFn = fn(Client, String, String, String) -> BoxFuture<'static, Result<()>>;

fn bark(client: Client, body: String, title: String, content: String) -> BoxFuture<'static, Result<()>> {
    send_bark(client, body, title, content).boxed()
}

fn gotify(client: Client, body: String, title: String, content: String) -> BoxFuture<'static, Result<()>> {
    send_gotify(client, body, title, content).boxed()
}

fn webhook(client: Client, body: String, title: String, content: String) -> BoxFuture<'static, Result<()>> {
    send_webhook(client, body, title, content).boxed()
}

/// 已支持的推送平台
const PLATFORMS: &[(&str, SendFn)] = &[("bark", bark), ("gotify", gotify), ("webhook", webhook)];

fn find_platform(name: &str) -> Option<SendFn> {
    let name = name.trim().to_lowercase();
    PLATFORMS
        .iter()
        .find(|(platform, _)| *platform == name)
        .map(|(_, send)| *send)
}

/// 按配置选择平台的通知发送者
pub struct PlatformNotifier {
    client: Client,
    enabled: bool,
    platform: String,
    body: String,
}

impl PlatformNotifier {
    pub fn new(client: Client, config: &NotifyConfig) -> Self {
        Self {
            client,
            enabled: config.enabled,
            platform: config.platform.clone(),
            body: config.body.clone(),
        }
    }

    pub fn is_supported(platform: &str) -> bool {
        find_platform(platform).is_some()
    }
}

impl Notifier for PlatformNotifier {
    fn notify(&self, title: &str, content: &str) {
        if !self.enabled {
            debug!("未开启消息推送功能");
            return;
        }
        let Some(send) = find_platform(&self.platform) else {
            warn!("不支持的推送平台: {}", self.platform);
            return;
        };

        let future = send(
            self.client.clone(),
            self.body.clone(),
            title.to_string(),
            content.to_string(),
        );
        let platform = self.platform.clone();
        tokio::spawn(async move {
            match future.await {
                Ok(()) => debug!("通知已发送: {}", platform),
                Err(e) => warn!("通知发送失败: {}, 错误: {}", platform, e),
            }
        });
    }
}

fn check_status(status: StatusCode) -> Result<()> {
    if status == StatusCode::OK {
        Ok(())
    } else {
        Err(Error::Other(format!("Unexpected status code: {}", status)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarkConfig {
    pub bark_push: String,
    #[serde(default)]
    pub bark_icon: String,
    #[serde(default)]
    pub bark_sound: String,
    #[serde(default)]
    pub bark_group: String,
    #[serde(default)]
    pub bark_level: String,
    #[serde(default)]
    pub bark_url: String,
}

impl BarkConfig {
    /// 推送地址：只填写 key 时使用官方服务器
    pub fn push_url(&self, title: &str, content: &str) -> Result<String> {
        if self.bark_push.len() < 2 {
            return Err(Error::Other("请正确设置BarkPush".to_string()));
        }
        let base = if self.bark_push.starts_with("http") {
            self.bark_push.trim_end_matches('/').to_string()
        } else {
            format!("https://api.day.app/{}", self.bark_push)
        };
        Ok(format!(
            "{}/{}/{}",
            base,
            urlencoding::encode(title),
            urlencoding::encode(content)
        ))
    }
}

async fn send_bark(client: Client, body: String, title: String, content: String) -> Result<()> {
    let bark: BarkConfig =
        serde_json::from_str(&body).map_err(|_| Error::Other("无法解析配置文件".to_string()))?;
    let url = bark.push_url(&title, &content)?;
    let resp = client
        .get(url)
        .query(&[
            ("icon", bark.bark_icon.as_str()),
            ("sound", bark.bark_sound.as_str()),
            ("group", bark.bark_group.as_str()),
            ("level", bark.bark_level.as_str()),
            ("url", bark.bark_url.as_str()),
        ])
        .send()
        .await?;
    check_status(resp.status())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GotifyConfig {
    gotify_url: String,
    gotify_token: String,
    #[serde(default)]
    gotify_priority: String,
}

async fn send_gotify(client: Client, body: String, title: String, content: String) -> Result<()> {
    let gotify: GotifyConfig =
        serde_json::from_str(&body).map_err(|_| Error::Other("无法解析配置文件".to_string()))?;
    let url = format!(
        "{}/message?token={}",
        gotify.gotify_url.trim_end_matches('/'),
        urlencoding::encode(&gotify.gotify_token)
    );
    let priority = if gotify.gotify_priority.is_empty() {
        "0".to_string()
    } else {
        gotify.gotify_priority
    };
    let resp = client
        .post(url)
        .form(&[
            ("title", title.as_str()),
            ("message", content.as_str()),
            ("priority", priority.as_str()),
        ])
        .send()
        .await?;
    check_status(resp.status())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub webhook_body: String,
    #[serde(default)]
    pub webhook_headers: String,
    #[serde(default = "default_webhook_method")]
    pub webhook_method: String,
    #[serde(default = "default_webhook_content_type")]
    pub webhook_content_type: String,
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

fn default_webhook_content_type() -> String {
    "application/json".to_string()
}

/// 解析 `key: value` 多行文本，忽略空行
pub fn parse_kv_lines(text: &str) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(Error::Other(format!("malformed line: {}", line)));
        };
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

impl WebhookConfig {
    /// URL 或 Body 中必须包含 `$title`
    pub fn validate(&self) -> Result<()> {
        if !self.webhook_url.contains("$title") && !self.webhook_body.contains("$title") {
            return Err(Error::Other("URL 或者 Body 中必须包含 $title".to_string()));
        }
        Ok(())
    }

    pub fn render_url(&self, title: &str, content: &str) -> String {
        self.webhook_url
            .replace("$title", &urlencoding::encode(title))
            .replace("$content", &urlencoding::encode(content))
    }

    pub fn render_body(&self, title: &str, content: &str) -> Result<HashMap<String, String>> {
        let body = self
            .webhook_body
            .replace("$title", title)
            .replace("$content", content);
        parse_kv_lines(&body)
    }
}

async fn send_webhook(client: Client, body: String, title: String, content: String) -> Result<()> {
    let webhook: WebhookConfig =
        serde_json::from_str(&body).map_err(|_| Error::Other("无法解析配置文件".to_string()))?;
    webhook.validate()?;

    let headers = parse_kv_lines(&webhook.webhook_headers)?;
    let fields = webhook.render_body(&title, &content)?;
    let method = Method::from_bytes(webhook.webhook_method.to_uppercase().as_bytes())
        .map_err(|e| Error::Other(format!("无效的请求方法: {}", e)))?;

    let mut request = client.request(method, webhook.render_url(&title, &content));
    for (key, value) in &headers {
        request = request.header(key.as_str(), value.as_str());
    }
    request = match webhook.webhook_content_type.as_str() {
        "application/json" => request.json(&fields),
        "multipart/form-data" => {
            let mut form = reqwest::multipart::Form::new();
            for (key, value) in fields {
                form = form.text(key, value);
            }
            request.multipart(form)
        }
        "application/x-www-form-urlencoded" | "text/plain" => request.form(&fields),
        other => {
            return Err(Error::Other(format!("Unsupported content type: {}", other)));
        }
    };

    let resp = request.send().await?;
    check_status(resp.status())
}
