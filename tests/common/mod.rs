#![allow(dead_code)]

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::mpsc;

use qh2h_runner::adapters::PaperTradingSession;
use qh2h_runner::market::{MarketCache, MarketSnapshot};
use qh2h_runner::strategy::StrategyContext;
use qh2h_runner::trading::model::{
    NotifyKind, OrderEvent, OrderSide, OrderType, Position,
};
use qh2h_runner::trading::{OrderBook, TradingGateway};

pub struct Harness {
    pub session: Arc<PaperTradingSession>,
    pub cache: Arc<MarketCache>,
    pub order_book: Arc<OrderBook>,
    pub gateway: TradingGateway,
    pub stop: Arc<AtomicBool>,
    pub event_rx: Option<mpsc::Receiver<OrderEvent>>,
    pub gateway_handle: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub fn context(&self, account_id: &str, hold_vol: i64) -> StrategyContext {
        StrategyContext {
            gateway: self.gateway.clone(),
            cache: self.cache.clone(),
            order_book: self.order_book.clone(),
            account_id: account_id.to_string(),
            hold_vol,
        }
    }
}

/// 起一套纸上引擎：paper 会话 + 缓存 + 台账 + 网关
pub fn setup_engine(dry_run: bool) -> Harness {
    let session = Arc::new(PaperTradingSession::new());
    let cache = Arc::new(MarketCache::new());
    let order_book = Arc::new(OrderBook::new());
    let stop = Arc::new(AtomicBool::new(false));
    let (event_tx, event_rx) = mpsc::channel(1024);
    let (gateway, gateway_handle) = TradingGateway::start(
        session.clone(),
        order_book.clone(),
        cache.clone(),
        event_tx,
        dry_run,
        stop.clone(),
    );
    Harness {
        session,
        cache,
        order_book,
        gateway,
        stop,
        event_rx: Some(event_rx),
        gateway_handle,
    }
}

pub fn position(symbol: &str, total: i64, available: i64) -> Position {
    Position {
        symbol: symbol.to_string(),
        total,
        available,
        frozen: 0,
    }
}

/// 最小可用快照；涨跌停交给缓存按昨收兜底
pub fn snapshot(symbol: &str, pre_close: f64, bid1: f64, ask1: f64, timestamp: u32) -> MarketSnapshot {
    let mut snap = MarketSnapshot {
        symbol: symbol.to_string(),
        pre_close,
        timestamp,
        last: bid1,
        ..Default::default()
    };
    snap.bid_price[0] = bid1;
    snap.ask_price[0] = ask1;
    snap.bid_volume[0] = 1000;
    snap.ask_volume[0] = 1000;
    snap
}

/// 外部参与者的委托确认回报
pub fn external_accept(symbol: &str, price: f64, volume: i64) -> OrderEvent {
    OrderEvent {
        kind: NotifyKind::Accepted,
        local_id: String::new(),
        system_id: format!("ext-sys-{symbol}-{volume}"),
        symbol: symbol.to_string(),
        side: OrderSide::Sell,
        order_type: OrderType::Limit,
        price,
        volume,
        fill_volume: 0,
        fill_price: 0.0,
        remark: String::new(),
        is_local: false,
        err_msg: String::new(),
    }
}

/// 等回报链路落定
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
}
