// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;

use crate::offline_download::DeletePolicy;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 任务配置
    #[serde(default)]
    pub tasks: TasksConfig,
    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 离线下载配置
    #[serde(default)]
    pub offline_download: OfflineDownloadConfig,
    /// 消息推送配置
    #[serde(default)]
    pub notify: NotifyConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 单类任务的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// 并发数
    pub workers: usize,
    /// 最大执行次数（0 与 1 等价，都只执行一次）
    #[serde(default)]
    pub max_retry: u32,
    /// 是否持久化（重启后恢复）
    #[serde(default)]
    pub task_persistent: bool,
}

impl TaskConfig {
    fn new(workers: usize, max_retry: u32, task_persistent: bool) -> Self {
        Self {
            workers,
            max_retry,
            task_persistent,
        }
    }
}

/// 各类任务的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// 上传任务（持有内存中的数据流，不持久化）
    #[serde(default = "default_upload_task")]
    pub upload: TaskConfig,
    #[serde(default = "default_copy_task")]
    pub copy: TaskConfig,
    #[serde(default = "default_download_task")]
    pub download: TaskConfig,
    #[serde(default = "default_transfer_task")]
    pub transfer: TaskConfig,
}

fn default_upload_task() -> TaskConfig {
    TaskConfig::new(5, 0, false)
}

fn default_copy_task() -> TaskConfig {
    TaskConfig::new(5, 2, true)
}

fn default_download_task() -> TaskConfig {
    TaskConfig::new(5, 1, true)
}

fn default_transfer_task() -> TaskConfig {
    TaskConfig::new(5, 2, true)
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            upload: default_upload_task(),
            copy: default_copy_task(),
            download: default_download_task(),
            transfer: default_transfer_task(),
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite 文件路径
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/netdisk-hub.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// 离线下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineDownloadConfig {
    /// 下载临时目录（每个任务在其下分配独立子目录）
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// 状态轮询间隔（秒）
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// 连续查询状态失败的容忍次数
    #[serde(default = "default_max_status_failures")]
    pub max_status_failures: u32,
    /// 下载完成后、释放工具资源前的等待时间（分钟），按工具名配置
    #[serde(default)]
    pub post_complete_delays: HashMap<String, u64>,
    /// 未指定时使用的临时文件删除策略
    #[serde(default)]
    pub default_delete_policy: DeletePolicy,
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("data/temp")
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_max_status_failures() -> u32 {
    5
}

impl Default for OfflineDownloadConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            poll_interval_secs: default_poll_interval_secs(),
            max_status_failures: default_max_status_failures(),
            post_complete_delays: HashMap::new(),
            default_delete_policy: DeletePolicy::default(),
        }
    }
}

/// 消息推送配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// 是否启用推送
    #[serde(default)]
    pub enabled: bool,
    /// 推送平台（bark / gotify / webhook）
    #[serde(default)]
    pub platform: String,
    /// 平台参数（JSON）
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub on_download_succeeded: bool,
    #[serde(default)]
    pub on_download_failed: bool,
    /// 复制任务结束时推送
    #[serde(default)]
    pub on_copy_result: bool,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

impl AppConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        for (kind, task) in [
            ("upload", &self.tasks.upload),
            ("copy", &self.tasks.copy),
            ("download", &self.tasks.download),
            ("transfer", &self.tasks.transfer),
        ] {
            if task.workers == 0 {
                anyhow::bail!("{} 任务的并发数必须大于 0", kind);
            }
        }
        if self.offline_download.temp_dir.as_os_str().is_empty() {
            anyhow::bail!("离线下载临时目录不能为空");
        }
        if self.offline_download.poll_interval_secs == 0 {
            anyhow::bail!("离线下载轮询间隔必须大于 0");
        }
        if self.notify.enabled && !crate::notify::PlatformNotifier::is_supported(&self.notify.platform) {
            anyhow::bail!("不支持的推送平台: {}", self.notify.platform);
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("配置文件验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                let default_config = Self::default();

                // 首次启动：自动创建临时目录
                let temp_dir = &default_config.offline_download.temp_dir;
                if !temp_dir.exists() {
                    if let Err(e) = std::fs::create_dir_all(temp_dir) {
                        tracing::error!("无法创建离线下载临时目录 {:?}: {}", temp_dir, e);
                    }
                }

                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.tasks.copy.max_retry, 2);
        assert!(!config.tasks.upload.task_persistent);
        assert!(config.tasks.transfer.task_persistent);
        assert_eq!(config.offline_download.poll_interval_secs, 3);
        assert_eq!(config.offline_download.max_status_failures, 5);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config/app.toml");
        let path = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.tasks.download.workers = 2;
        config
            .offline_download
            .post_complete_delays
            .insert("qbittorrent".to_string(), 30);
        config.save_to_file(path).await.unwrap();

        let loaded = AppConfig::load_from_file(path).await.unwrap();
        assert_eq!(loaded.tasks.download.workers, 2);
        assert_eq!(
            loaded.offline_download.post_complete_delays.get("qbittorrent"),
            Some(&30)
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [tasks.copy]
            workers = 3

            [notify]
            enabled = true
            platform = "Bark"
            "#,
        )
        .unwrap();
        assert_eq!(config.tasks.copy.workers, 3);
        assert_eq!(config.tasks.copy.max_retry, 0);
        assert_eq!(config.tasks.download.max_retry, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.tasks.transfer.workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.notify.enabled = true;
        config.notify.platform = "carrier-pigeon".to_string();
        assert!(config.validate().is_err());
    }
}
