pub mod auction_sell;
pub mod base_cancel;
pub mod close_sell;
pub mod common;
pub mod intraday_sell;
pub mod windows;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::market::MarketCache;
use crate::trading::{OrderBook, TradingGateway};

pub use auction_sell::AuctionSellStrategy;
pub use base_cancel::BaseCancelModule;
pub use close_sell::CloseSellStrategy;
pub use intraday_sell::IntradaySellStrategy;

/// 前日盘面标签 -> 盘中卖出条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// 封板未炸
    Fb,
    /// 封板后炸板又回封
    Hf,
    /// 炸板
    Zb,
    /// 连板
    Lb,
}

impl Condition {
    /// (second_flag, fb_flag, zb_flag) -> 条件；都不满足返回 None
    pub fn from_flags(second_flag: i32, fb_flag: i32, zb_flag: i32) -> Option<Self> {
        if second_flag == 1 {
            return Some(Condition::Lb);
        }
        match (fb_flag, zb_flag) {
            (1, 0) => Some(Condition::Fb),
            (1, 1) => Some(Condition::Hf),
            (0, 1) => Some(Condition::Zb),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Fb => "fb",
            Condition::Hf => "hf",
            Condition::Zb => "zb",
            Condition::Lb => "lb",
        }
    }
}

/// 每分钟状态快照里单个策略的汇总
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleStatus {
    pub tracked: usize,
    pub done: usize,
    pub intended_sell_vol: i64,
}

/// 模块共享的能力集：行情只读 + 交易写 + 订单台账
#[derive(Clone)]
pub struct StrategyContext {
    pub gateway: TradingGateway,
    pub cache: Arc<MarketCache>,
    pub order_book: Arc<OrderBook>,
    pub account_id: String,
    pub hold_vol: i64,
}

/// 策略模块：编排器按 tick_interval 驱动
#[async_trait]
pub trait SellModule: Send + Sync {
    fn name(&self) -> &'static str;

    fn tick_interval(&self) -> Duration;

    async fn init(&self) -> anyhow::Result<()>;

    /// now 为本地时间 HHMMSS；tick 内部的错误不得跨出边界
    async fn tick(&self, now: u32) -> anyhow::Result<()>;

    fn status(&self) -> ModuleStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_mapping() {
        assert_eq!(Condition::from_flags(1, 0, 0), Some(Condition::Lb));
        assert_eq!(Condition::from_flags(1, 1, 1), Some(Condition::Lb));
        assert_eq!(Condition::from_flags(0, 1, 0), Some(Condition::Fb));
        assert_eq!(Condition::from_flags(0, 1, 1), Some(Condition::Hf));
        assert_eq!(Condition::from_flags(0, 0, 1), Some(Condition::Zb));
        assert_eq!(Condition::from_flags(0, 0, 0), None);
    }
}
