use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use qh2h_runner::adapters::{LoopbackMarketFeed, PaperTradingSession};
use qh2h_runner::app_config::settings::{resolve_config_path, AppConfig};
use qh2h_runner::market::MarketCache;
use qh2h_runner::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = qh2h_runner::app_init() {
        eprintln!("日志初始化失败: {e:#}");
        return ExitCode::from(1);
    }
    info!("========== qh2h 多模块引擎启动 ==========");

    // 第一个参数可以显式指定配置路径，否则按候选列表找
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(resolve_config_path);
    let Some(config_path) = config_path else {
        error!("工作目录下找不到 config.json");
        return ExitCode::from(1);
    };

    let config = match AppConfig::load(&config_path) {
        Ok(c) => {
            info!("配置加载成功: {}", config_path.display());
            c
        }
        Err(e) => {
            error!("配置加载失败: {e}");
            return ExitCode::from(1);
        }
    };

    // 没有柜台/行情 SDK 链接时跑纸上通道；真实接入时在这里换成 SDK 绑定
    let session = Arc::new(PaperTradingSession::new());
    let feed = Arc::new(LoopbackMarketFeed::new());
    let cache = Arc::new(MarketCache::new());

    let orchestrator = Orchestrator::new(config, session, feed, cache);
    match orchestrator.run().await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            error!("启动失败: {e:#}");
            ExitCode::from(1)
        }
    }
}
