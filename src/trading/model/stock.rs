use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// 把六位代码规范成 NNNNNN.XX；无法识别的前缀拒绝
pub fn normalize_symbol(code: &str) -> Result<String, AppError> {
    if code.contains('.') {
        return Ok(code.to_string());
    }
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::CsvError(format!("非法代码: {code}")));
    }
    match &code[..2] {
        "60" | "68" => Ok(format!("{code}.SH")),
        "00" | "30" => Ok(format!("{code}.SZ")),
        _ => Err(AppError::CsvError(format!("无法识别的市场前缀: {code}"))),
    }
}

pub fn extract_code(symbol: &str) -> &str {
    symbol.split('.').next().unwrap_or(symbol)
}

/// code_min / code_max 区间过滤（开区间，与原运维口径一致）
pub fn pass_code_filter(code: &str, code_min: Option<&str>, code_max: Option<&str>) -> bool {
    if let Some(min) = code_min {
        if !min.is_empty() && code <= min {
            return false;
        }
    }
    if let Some(max) = code_max {
        if !max.is_empty() && code >= max {
            return false;
        }
    }
    true
}

/// 当日不变的标的参数（watchlist CSV 一行）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockParams {
    pub shortname: String,
    pub symbol: String,
    pub trading_date: String,
    pub avail_vol: i64,
    pub total_vol: i64,
    /// 昨日封板未炸
    pub fb_flag: i32,
    /// 昨日炸板
    pub zb_flag: i32,
    /// 连板
    pub second_flag: i32,
    pub pre_close: f64,
}

/// 当日可变的运行时状态，归属策略单写
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockRuntime {
    /// 卖出完成
    pub sell_flag: i32,
    /// 已累计的卖出意图（非成交确认）
    pub sold_vol: i64,
    /// 竞价阶段累计委托量
    pub total_sell: i64,
    /// 09:27 集合竞价成交额
    pub jjamt: f64,
    pub open_price: f64,
    pub zt_price: f64,
    pub dt_price: f64,
    /// 最近一次委托备注
    pub remark: String,
    /// 撤单扫尾完成
    pub call_back: i32,
    /// 竞价 P1 完成
    pub return1_sell: i32,
    /// 竞价 P3 涨停半仓已卖
    pub limit_sell: i32,
    pub user_order_id: String,
}

/// 持仓
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub total: i64,
    pub available: i64,
    pub frozen: i64,
}
