use serde::{Deserialize, Serialize};

/// 把 1/10000 整数报价换算成两位小数的元
pub fn scale_e4(value: i64) -> f64 {
    round2(value as f64 / 10000.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 六位股票代码过滤：只认 60/68（沪）与 00/30（深），排除可转债、基金等
pub fn is_stock_code(code: &str) -> bool {
    if code.len() < 2 {
        return false;
    }
    matches!(&code[..2], "60" | "68" | "00" | "30")
}

/// 行情快照（五档盘口）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    /// 证券简称（ST 判断用，可能为空）
    pub name: String,
    /// HHMMSSmmm
    pub timestamp: u32,

    pub last: f64,
    pub pre_close: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub up_limit: f64,
    pub down_limit: f64,

    pub bid_price: [f64; 5],
    pub bid_volume: [i64; 5],
    pub ask_price: [f64; 5],
    pub ask_volume: [i64; 5],

    pub volume: i64,
    /// 累计成交额（元）
    pub turnover: f64,
}

impl MarketSnapshot {
    pub fn bid1(&self) -> f64 {
        self.bid_price[0]
    }
    pub fn ask1(&self) -> f64 {
        self.ask_price[0]
    }
    pub fn bid1_vol(&self) -> i64 {
        self.bid_volume[0]
    }
    pub fn bid2_vol(&self) -> i64 {
        self.bid_volume[1]
    }
    pub fn ask1_vol(&self) -> i64 {
        self.ask_volume[0]
    }
    pub fn ask2_vol(&self) -> i64 {
        self.ask_volume[1]
    }
}

/// SDK 推送的原始快照，价格为 1/10000 整数
#[derive(Debug, Clone, Default)]
pub struct RawMarketData {
    pub symbol: String,
    pub name: String,
    pub timestamp: u32,
    pub pre_close: i64,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub last: i64,
    pub up_limit: i64,
    pub down_limit: i64,
    pub bid_price: [i64; 5],
    pub bid_volume: [i64; 5],
    pub ask_price: [i64; 5],
    pub ask_volume: [i64; 5],
    pub volume: i64,
    pub turnover: i64,
}

impl RawMarketData {
    pub fn into_snapshot(self) -> MarketSnapshot {
        let mut snap = MarketSnapshot {
            symbol: self.symbol,
            name: self.name,
            timestamp: self.timestamp,
            last: scale_e4(self.last),
            pre_close: scale_e4(self.pre_close),
            open: scale_e4(self.open),
            high: scale_e4(self.high),
            low: scale_e4(self.low),
            up_limit: scale_e4(self.up_limit),
            down_limit: scale_e4(self.down_limit),
            volume: self.volume,
            turnover: self.turnover as f64,
            ..Default::default()
        };
        for i in 0..5 {
            snap.bid_price[i] = scale_e4(self.bid_price[i]);
            snap.ask_price[i] = scale_e4(self.ask_price[i]);
            snap.bid_volume[i] = self.bid_volume[i];
            snap.ask_volume[i] = self.ask_volume[i];
        }
        snap
    }
}

/// 逐笔成交方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxSide {
    Unknown,
    Buy,
    Sell,
}

impl Default for TxSide {
    fn default() -> Self {
        TxSide::Unknown
    }
}

/// 逐笔成交
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub symbol: String,
    /// HHMMSSmmm
    pub timestamp: u32,
    pub price: f64,
    pub volume: i64,
    pub turnover: f64,
    pub side: TxSide,
    /// 成交类别（'0' 成交，'C' 撤单）
    pub function_code: char,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e4_prices_round_to_fen() {
        assert_eq!(scale_e4(18270500), 1827.05);
        assert_eq!(scale_e4(101234), 10.12);
        assert_eq!(scale_e4(101250), 10.13);
    }

    #[test]
    fn stock_code_filter() {
        assert!(is_stock_code("600519"));
        assert!(is_stock_code("688001"));
        assert!(is_stock_code("000001"));
        assert!(is_stock_code("300750"));
        assert!(!is_stock_code("110038"));
        assert!(!is_stock_code("510300"));
    }
}
