use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::AppError;
use crate::market::MarketFeed;
use crate::trading::api::{OrderEventCallback, TradingSession};
use crate::trading::model::{
    NotifyKind, Order, OrderEvent, OrderRequest, OrderSide, OrderStatus, Position,
};

struct PaperInner {
    seq: u64,
    orders: HashMap<String, Order>,
    order_seq: Vec<String>,
    positions: HashMap<String, Position>,
}

/// 纸上交易会话：不连任何柜台，订单在内存里走完整的回报链路。
/// dry-run 联通性校验和集成测试都靠它当作引擎。
pub struct PaperTradingSession {
    inner: Mutex<PaperInner>,
    connected: AtomicBool,
    dry_run: AtomicBool,
    callback: Mutex<Option<OrderEventCallback>>,
}

impl PaperTradingSession {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PaperInner {
                seq: 0,
                orders: HashMap::new(),
                order_seq: Vec::new(),
                positions: HashMap::new(),
            }),
            connected: AtomicBool::new(false),
            dry_run: AtomicBool::new(false),
            callback: Mutex::new(None),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, PaperInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, evt: OrderEvent) {
        let callback = {
            let guard = self.callback.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        if let Some(cb) = callback {
            cb(evt);
        }
    }

    /// 柜台回报是异步到达的：晚几毫秒发，保证网关先完成台账登记
    fn emit_deferred(&self, evt: OrderEvent) {
        let callback = {
            let guard = self.callback.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        if let Some(cb) = callback {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                cb(evt);
            });
        }
    }

    fn event_for(order: &Order, kind: NotifyKind) -> OrderEvent {
        OrderEvent {
            kind,
            local_id: order.local_id.clone(),
            system_id: order
                .system_id
                .clone()
                .unwrap_or_else(|| format!("sys-{}", order.local_id)),
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            price: order.price,
            volume: order.volume,
            fill_volume: 0,
            fill_price: 0.0,
            remark: order.remark.clone(),
            is_local: true,
            err_msg: String::new(),
        }
    }

    /// 测试/启动脚手架：灌持仓
    pub fn set_positions(&self, positions: Vec<Position>) {
        let mut inner = self.lock_inner();
        inner.positions = positions.into_iter().map(|p| (p.symbol.clone(), p)).collect();
    }

    /// 已提交订单的 local_id 列表（提交顺序）
    pub fn placed_order_ids(&self) -> Vec<String> {
        self.lock_inner().order_seq.clone()
    }

    pub fn order(&self, local_id: &str) -> Option<Order> {
        self.lock_inner().orders.get(local_id).cloned()
    }

    /// 模拟一笔成交回报，并同步调减持仓
    pub fn fill(&self, local_id: &str, fill_volume: i64, fill_price: f64) {
        let evt = {
            let mut inner = self.lock_inner();
            let Some(order) = inner.orders.get_mut(local_id) else {
                return;
            };
            order.apply_fill(fill_volume, fill_price);
            order.status = if order.filled_volume >= order.volume {
                OrderStatus::Filled
            } else {
                OrderStatus::PartialFilled
            };
            let mut evt = Self::event_for(order, NotifyKind::Match);
            evt.fill_volume = fill_volume;
            evt.fill_price = fill_price;

            let symbol = order.symbol.clone();
            let side = order.side;
            if let Some(pos) = inner.positions.get_mut(&symbol) {
                match side {
                    OrderSide::Sell => {
                        pos.total = (pos.total - fill_volume).max(0);
                        pos.frozen = (pos.frozen - fill_volume).max(0);
                    }
                    OrderSide::Buy => {
                        pos.total += fill_volume;
                        pos.available += fill_volume;
                    }
                }
            }
            evt
        };
        self.emit(evt);
    }

    /// 模拟一条外部参与者的委托回报（排撤探针用）
    pub fn emit_external(&self, evt: OrderEvent) {
        self.emit(evt);
    }
}

impl Default for PaperTradingSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TradingSession for PaperTradingSession {
    async fn connect(
        &self,
        section: &str,
        _port: i32,
        account: &str,
        _password: &str,
    ) -> Result<(), AppError> {
        if section.is_empty() || account.is_empty() {
            return Err(AppError::ConnectError(
                "纸上交易也要配置 section/account".to_string(),
            ));
        }
        self.connected.store(true, Ordering::Release);
        info!("[paper] 已连接 section={} account={}", section, account);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn place_order(&self, req: &OrderRequest) -> String {
        if req.volume <= 0 || req.symbol.is_empty() {
            return String::new();
        }
        let evt = {
            let mut inner = self.lock_inner();
            inner.seq += 1;
            let local_id = format!("paper-{}", inner.seq);
            let mut order = Order::from_request(local_id.clone(), req);
            order.system_id = Some(format!("sys-{}", inner.seq));
            order.status = OrderStatus::Submitted;

            // 卖出冻结可用
            if req.side == OrderSide::Sell {
                if let Some(pos) = inner.positions.get_mut(&req.symbol) {
                    pos.available = (pos.available - req.volume).max(0);
                    pos.frozen += req.volume;
                }
            }

            let evt = Self::event_for(&order, NotifyKind::Accepted);
            inner.orders.insert(local_id.clone(), order);
            inner.order_seq.push(local_id);
            evt
        };
        let local_id = evt.local_id.clone();
        self.emit_deferred(evt);
        local_id
    }

    async fn cancel_order(&self, local_id: &str) -> bool {
        let evt = {
            let mut inner = self.lock_inner();
            let Some(order) = inner.orders.get_mut(local_id) else {
                return false;
            };
            if order.status.is_terminal() {
                return false;
            }
            order.status = OrderStatus::Cancelled;
            let evt = Self::event_for(order, NotifyKind::Cancelled);

            let symbol = order.symbol.clone();
            let side = order.side;
            let unfilled = order.volume - order.filled_volume;
            if side == OrderSide::Sell {
                if let Some(pos) = inner.positions.get_mut(&symbol) {
                    pos.available += unfilled.max(0);
                    pos.frozen = (pos.frozen - unfilled).max(0);
                }
            }
            evt
        };
        self.emit_deferred(evt);
        true
    }

    async fn query_positions(&self) -> Vec<Position> {
        self.lock_inner().positions.values().cloned().collect()
    }

    async fn query_orders(&self) -> Vec<Order> {
        let inner = self.lock_inner();
        inner
            .order_seq
            .iter()
            .filter_map(|id| inner.orders.get(id).cloned())
            .collect()
    }

    async fn query_order(&self, local_id: &str) -> Option<Order> {
        self.lock_inner().orders.get(local_id).cloned()
    }

    async fn wait_order(&self, local_id: &str, timeout_ms: u64) -> Option<Order> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let order = self.lock_inner().orders.get(local_id).cloned();
            match order {
                Some(o) if o.status.is_terminal() => return Some(o),
                Some(o) if tokio::time::Instant::now() >= deadline => return Some(o),
                None => return None,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    }

    fn set_dry_run(&self, enable: bool) {
        self.dry_run.store(enable, Ordering::Release);
    }

    fn set_order_callback(&self, callback: OrderEventCallback) {
        let mut guard = self.callback.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(callback);
    }
}

/// 回环行情会话：不拉外部数据，快照由使用方直接灌进 MarketCache
pub struct LoopbackMarketFeed {
    connected: AtomicBool,
    watchlist: Mutex<Vec<String>>,
}

impl LoopbackMarketFeed {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            watchlist: Mutex::new(Vec::new()),
        }
    }

    pub fn watchlist(&self) -> Vec<String> {
        self.watchlist
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for LoopbackMarketFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketFeed for LoopbackMarketFeed {
    async fn connect(
        &self,
        host: &str,
        port: i32,
        _user: &str,
        _password: &str,
    ) -> Result<(), AppError> {
        info!("[loopback] 行情连接 {}:{}", host, port);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn set_watchlist(&self, symbols: &[String]) {
        let mut guard = self.watchlist.lock().unwrap_or_else(|e| e.into_inner());
        *guard = symbols.to_vec();
    }
}
