use netdisk_hub::{
    config::AppConfig,
    driver::{DriverTable, LocalDriver, LOCAL_DRIVER},
    logging,
    offline_download::{SimpleHttpTool, ToolRegistry},
    AppState,
};
use std::sync::Arc;
use tracing::{error, info};

const CONFIG_PATH: &str = "config/app.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load_or_default(CONFIG_PATH).await;

    // 日志守卫需保持存活
    let _log_guard = logging::init_logging(&config.log);
    info!("netdisk-hub v{} 启动中", env!("CARGO_PKG_VERSION"));

    let drivers = DriverTable::new().with(LOCAL_DRIVER, LocalDriver::boxed);
    let tools = ToolRegistry::new().with(Arc::new(SimpleHttpTool::new(reqwest::Client::new())));

    let state = match AppState::bootstrap(config, drivers, tools).await {
        Ok(state) => state,
        Err(e) => {
            error!("启动失败: {:#}", e);
            return Err(e);
        }
    };
    info!("✓ 启动完成，可用驱动: {:?}", state.registry.drivers().names());

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，正在关闭...");
    state.shutdown().await;
    Ok(())
}
