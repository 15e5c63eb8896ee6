//! 消息推送
//!
//! 任务结束时向外部平台推送 `(标题, 内容)`。推送是 fire-and-forget：
//! 发送失败只记录日志，不影响任务结果。

mod platform;

pub use platform::{parse_kv_lines, BarkConfig, PlatformNotifier, WebhookConfig};

/// 通知发送者
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, content: &str);
}

/// 不发送任何通知
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _title: &str, _content: &str) {}
}
