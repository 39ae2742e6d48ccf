use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

/// 交易会话配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TradingConfig {
    #[serde(default)]
    pub host: String,
    /// SDK 配置段名称；为空时退回 host
    #[serde(default)]
    pub config_section: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: String,
}

impl TradingConfig {
    pub fn effective_section(&self) -> &str {
        if self.config_section.is_empty() {
            &self.host
        } else {
            &self.config_section
        }
    }
}

/// 行情会话配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MarketConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// 节奏参数覆盖（单笔金额 / 随机区间）
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PacingOverride {
    pub single_amt: f64,
    pub rand_amt1: f64,
    pub rand_amt2: f64,
}

/// 策略参数
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub csv_path: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default = "default_sell_to_mkt_ratio")]
    pub sell_to_mkt_ratio: f64,
    #[serde(default = "default_phase1_sell_ratio")]
    pub phase1_sell_ratio: f64,
    #[serde(default = "default_input_amt")]
    pub input_amt: f64,
    #[serde(default = "default_hold_vol")]
    pub hold_vol: i64,
    #[serde(default)]
    pub code_min: Option<String>,
    #[serde(default)]
    pub code_max: Option<String>,
    /// 竞价策略节奏覆盖；缺省用内置默认值
    #[serde(default)]
    pub auction_amt: Option<PacingOverride>,
    /// 收盘策略节奏覆盖；缺省用内置默认值
    #[serde(default)]
    pub close_amt: Option<PacingOverride>,
    /// 随机种子，0 表示用系统熵（单测注入固定值）
    #[serde(default)]
    pub rand_seed: u64,
}

fn default_sell_to_mkt_ratio() -> f64 {
    0.1
}
fn default_phase1_sell_ratio() -> f64 {
    0.1
}
fn default_input_amt() -> f64 {
    600000.0
}
fn default_hold_vol() -> i64 {
    300
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            csv_path: String::new(),
            account_id: String::new(),
            sell_to_mkt_ratio: default_sell_to_mkt_ratio(),
            phase1_sell_ratio: default_phase1_sell_ratio(),
            input_amt: default_input_amt(),
            hold_vol: default_hold_vol(),
            code_min: None,
            code_max: None,
            auction_amt: None,
            close_amt: None,
            rand_seed: 0,
        }
    }
}

/// 模块开关
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModulesConfig {
    #[serde(default)]
    pub sell: i32,
    #[serde(default)]
    pub base_cancel: i32,
    #[serde(default)]
    pub usage_example: i32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UsageExampleConfig {
    /// 当日 watchlist CSV 所在目录
    #[serde(default)]
    pub csv_path: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BaseCancelConfig {
    /// 底仓买入清单目录
    #[serde(default)]
    pub order_dir: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModulesDetailConfig {
    #[serde(default)]
    pub usage_example: UsageExampleConfig,
    #[serde(default)]
    pub base_cancel: BaseCancelConfig,
}

/// 顶层配置（config.json）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub modules_config: ModulesDetailConfig,
    /// 下单走 dry-run 校验通道
    #[serde(default)]
    pub dry_run: bool,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = fs::read_to_string(path)
            .map_err(|e| AppError::ConfigError(format!("{}: {}", path.display(), e)))?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| AppError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }
}

/// 在常见位置查找 config.json
pub fn resolve_config_path() -> Option<PathBuf> {
    const CANDIDATES: [&str; 5] = [
        "config.json",
        "./config.json",
        "../config.json",
        "./result/config.json",
        "../result/config.json",
    ];
    CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_full_config() {
        let json = r#"{
            "trading": {"config_section": "sec1", "port": 7788, "account": "10001", "password": "p"},
            "market": {"host": "10.0.0.2", "port": 9000, "user": "u", "password": "q"},
            "strategy": {
                "csv_path": "./data/watch.csv",
                "account_id": "10001",
                "sell_to_mkt_ratio": 0.2,
                "input_amt": 800000,
                "hold_vol": 500,
                "code_min": "300000"
            },
            "modules": {"sell": 1, "base_cancel": 1, "usage_example": 0},
            "modules_config": {
                "usage_example": {"csv_path": "./data/usage"},
                "base_cancel": {"order_dir": "./data/base_cancel"}
            }
        }"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.trading.effective_section(), "sec1");
        assert_eq!(config.trading.port, 7788);
        assert_eq!(config.strategy.sell_to_mkt_ratio, 0.2);
        assert_eq!(config.strategy.hold_vol, 500);
        assert_eq!(config.strategy.phase1_sell_ratio, 0.1);
        assert_eq!(config.strategy.code_min.as_deref(), Some("300000"));
        assert!(config.strategy.code_max.is_none());
        assert_eq!(config.modules.sell, 1);
        assert_eq!(config.modules_config.base_cancel.order_dir, "./data/base_cancel");
        assert!(!config.dry_run);
    }

    #[test]
    fn defaults_when_sections_missing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{}").unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.strategy.input_amt, 600000.0);
        assert_eq!(config.strategy.hold_vol, 300);
        assert_eq!(config.modules.sell, 0);
    }

    #[test]
    fn malformed_json_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{not json").unwrap();
        assert!(matches!(
            AppConfig::load(file.path()),
            Err(AppError::ConfigError(_))
        ));
    }
}
