use std::sync::Arc;

use qh2h_runner::adapters::{LoopbackMarketFeed, PaperTradingSession};
use qh2h_runner::app_config::settings::AppConfig;
use qh2h_runner::market::MarketCache;
use qh2h_runner::orchestrator::Orchestrator;

fn orchestrator_with(config: AppConfig) -> Orchestrator {
    Orchestrator::new(
        config,
        Arc::new(PaperTradingSession::new()),
        Arc::new(LoopbackMarketFeed::new()),
        Arc::new(MarketCache::new()),
    )
}

/// 缺交易账号配置在启动期就失败（退出码 1 的路径）
#[tokio::test]
async fn boot_fails_without_trading_account() {
    let config: AppConfig = serde_json::from_str("{}").unwrap();
    let result = orchestrator_with(config).run().await;
    assert!(result.is_err());
}

/// 一个模块都没开也算配置错误
#[tokio::test]
async fn boot_fails_with_no_modules() {
    let config: AppConfig = serde_json::from_str(
        r#"{
            "trading": {"config_section": "sec", "port": 1, "account": "10001", "password": "p"},
            "market": {"host": "h", "port": 1, "user": "u", "password": "p"}
        }"#,
    )
    .unwrap();
    let result = orchestrator_with(config).run().await;
    assert!(result.is_err());
}

/// 卖出策略开着但 watchlist 缺失：策略组跳过，base_cancel 不受影响时仍可失败收场
#[tokio::test]
async fn trio_without_watchlist_is_skipped() {
    let config: AppConfig = serde_json::from_str(
        r#"{
            "trading": {"config_section": "sec", "port": 1, "account": "10001", "password": "p"},
            "market": {"host": "h", "port": 1, "user": "u", "password": "p"},
            "modules": {"sell": 1, "base_cancel": 0, "usage_example": 0}
        }"#,
    )
    .unwrap();
    // watchlist 找不到 -> 策略组空 -> 没有模块可跑
    let result = orchestrator_with(config).run().await;
    assert!(result.is_err());
}
