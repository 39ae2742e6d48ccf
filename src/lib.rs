pub mod adapters;
pub mod app_config;
pub mod error;
pub mod market;
pub mod orchestrator;
pub mod strategy;
pub mod time_util;
pub mod trading;

use dotenv::dotenv;

/// 进程级初始化：env + 日志，必须最先调用
pub fn app_init() -> anyhow::Result<()> {
    dotenv().ok();
    crate::app_config::log::setup_logging()?;
    Ok(())
}
