use std::sync::Mutex;

use dashmap::DashMap;

use crate::market::types::{
    is_stock_code, round2, MarketSnapshot, RawMarketData, Transaction,
};
use crate::time_util::normalize_hhmmss;

type TransactionConsumer = Box<dyn Fn(&Transaction) + Send + Sync>;

/// 按代码前缀与 ST 标记推断涨跌幅比例
pub fn limit_ratio_for(code: &str, name: &str) -> f64 {
    if code.starts_with("30") || code.starts_with("68") {
        return 0.20;
    }
    if name.to_uppercase().contains("ST") {
        return 0.05;
    }
    0.10
}

/// 昨收 × (1 ± ratio)，两位小数
pub fn limit_prices_from_pre_close(pre_close: f64, ratio: f64) -> (f64, f64) {
    if pre_close <= 0.0 || ratio <= 0.0 {
        return (0.0, 0.0);
    }
    let up = round2(pre_close * (1.0 + ratio));
    let down = round2(pre_close * (1.0 - ratio)).max(0.0);
    (up, down)
}

/// 进程内行情缓存：快照 + 逐笔分发
///
/// 行情线程写，策略线程读。涨跌停缺失时在写入侧用昨收兜底，
/// 读取侧永远拿到补全后的快照。
pub struct MarketCache {
    snapshots: DashMap<String, MarketSnapshot>,
    tx_consumer: Mutex<Option<TransactionConsumer>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            tx_consumer: Mutex::new(None),
        }
    }

    /// 最新快照；行情未发布时返回 None
    pub fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.snapshots.get(symbol).map(|s| s.clone())
    }

    /// 涨停价、跌停价；行情缺失返回 (0, 0)
    pub fn limits(&self, symbol: &str) -> (f64, f64) {
        match self.snapshots.get(symbol) {
            Some(snap) => (snap.up_limit, snap.down_limit),
            None => (0.0, 0.0),
        }
    }

    /// 集合竞价查询：返回 (开盘价, 截止 at_hhmmss 的累计成交额)。
    /// 快照时间晚于查询时间时成交额报 0（未知），开盘价保持已发布值。
    pub fn auction(&self, symbol: &str, at_hhmmss: u32) -> (f64, f64) {
        let Some(snap) = self.snapshots.get(symbol) else {
            return (0.0, 0.0);
        };
        let open = if snap.open > 0.0 { snap.open } else { 0.0 };
        let snap_time = normalize_hhmmss(snap.timestamp);
        if snap_time > 0 && snap_time <= at_hhmmss {
            (open, snap.turnover)
        } else {
            (open, 0.0)
        }
    }

    /// 行情线程回调：写入快照，缺失的涨跌停用昨收兜底
    pub fn on_tick(&self, mut snap: MarketSnapshot) {
        let code = snap.symbol.split('.').next().unwrap_or("");
        if !is_stock_code(code) {
            return;
        }
        if snap.up_limit <= 0.0 || snap.down_limit <= 0.0 {
            let ratio = limit_ratio_for(code, &snap.name);
            let (up, down) = limit_prices_from_pre_close(snap.pre_close, ratio);
            if snap.up_limit <= 0.0 {
                snap.up_limit = up;
            }
            if snap.down_limit <= 0.0 {
                snap.down_limit = down;
            }
        }
        self.snapshots.insert(snap.symbol.clone(), snap);
    }

    /// 原始 1/10000 整数快照入口
    pub fn on_raw_tick(&self, raw: RawMarketData) {
        self.on_tick(raw.into_snapshot());
    }

    /// 行情线程回调：逐笔成交，转发给注册的消费者
    pub fn on_transaction(&self, tx: &Transaction) {
        let code = tx.symbol.split('.').next().unwrap_or("");
        if !is_stock_code(code) {
            return;
        }
        if let Ok(guard) = self.tx_consumer.lock() {
            if let Some(consumer) = guard.as_ref() {
                consumer(tx);
            }
        }
    }

    /// 注册逐笔消费者（排撤模块用，不依赖逐单回报）
    pub fn set_transaction_consumer<F>(&self, consumer: F)
    where
        F: Fn(&Transaction) + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.tx_consumer.lock() {
            *guard = Some(Box::new(consumer));
        }
    }
}

impl Default for MarketCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(symbol: &str, pre_close: f64, ts: u32) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.to_string(),
            pre_close,
            timestamp: ts,
            ..Default::default()
        }
    }

    #[test]
    fn limit_fallback_gem_board() {
        // 创业板 20%：300750 昨收 200 -> (240, 160)
        let cache = MarketCache::new();
        cache.on_tick(snap("300750.SZ", 200.0, 92500000));
        assert_eq!(cache.limits("300750.SZ"), (240.0, 160.0));
    }

    #[test]
    fn limit_fallback_main_board_and_st() {
        let cache = MarketCache::new();
        cache.on_tick(snap("600519.SH", 1800.0, 92500000));
        assert_eq!(cache.limits("600519.SH"), (1980.0, 1620.0));

        let mut st = snap("600001.SH", 10.0, 92500000);
        st.name = "*ST示例".to_string();
        cache.on_tick(st);
        assert_eq!(cache.limits("600001.SH"), (10.5, 9.5));
    }

    #[test]
    fn feed_limits_win_over_fallback() {
        let cache = MarketCache::new();
        let mut s = snap("600000.SH", 10.0, 92500000);
        s.up_limit = 11.0;
        s.down_limit = 9.0;
        cache.on_tick(s);
        assert_eq!(cache.limits("600000.SH"), (11.0, 9.0));
    }

    #[test]
    fn auction_respects_query_time() {
        let cache = MarketCache::new();
        let mut s = snap("600000.SH", 10.0, 92612000);
        s.open = 10.2;
        s.turnover = 8.0e6;
        cache.on_tick(s);

        // 快照(09:26:12)晚于 09:25:00 -> 成交额未知
        assert_eq!(cache.auction("600000.SH", 92500), (10.2, 0.0));
        // 09:27:00 查询覆盖快照时间 -> 返回累计成交额
        assert_eq!(cache.auction("600000.SH", 92700), (10.2, 8.0e6));
        // 幂等
        assert_eq!(cache.auction("600000.SH", 92700), (10.2, 8.0e6));
        // 未发布的标的
        assert_eq!(cache.auction("000001.SZ", 92700), (0.0, 0.0));
    }

    #[test]
    fn non_stock_codes_dropped() {
        let cache = MarketCache::new();
        cache.on_tick(snap("110038.SH", 100.0, 92500000));
        assert!(cache.snapshot("110038.SH").is_none());
    }

    #[test]
    fn transaction_fanout() {
        use std::sync::atomic::{AtomicI64, Ordering};
        use std::sync::Arc;

        let cache = MarketCache::new();
        let seen = Arc::new(AtomicI64::new(0));
        let seen2 = seen.clone();
        cache.set_transaction_consumer(move |tx| {
            seen2.fetch_add(tx.volume, Ordering::SeqCst);
        });

        let tx = Transaction {
            symbol: "600000.SH".to_string(),
            volume: 100,
            ..Default::default()
        };
        cache.on_transaction(&tx);
        // 非股票代码不分发
        let bond = Transaction {
            symbol: "110038.SH".to_string(),
            volume: 999,
            ..Default::default()
        };
        cache.on_transaction(&bond);
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }
}
