use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::trading::model::OrderEvent;

/// 接收回报的模块端点
#[async_trait]
pub trait OrderEventSink: Send + Sync {
    async fn on_order_event(&self, evt: &OrderEvent);
}

/// 回报分发器：单消费者，按 remark 前缀路由到唯一模块
///
/// 外部单（is_local=false）与空 remark 交给监控端点。
/// 分发线程上禁止再进交易网关，模块回调只做轻量登记。
pub struct Dispatcher {
    routes: Vec<(&'static str, Arc<dyn OrderEventSink>)>,
    external: Option<Arc<dyn OrderEventSink>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            external: None,
        }
    }

    /// 注册前缀路由；先注册的先匹配，长前缀要先挂
    pub fn add_route(&mut self, prefix: &'static str, sink: Arc<dyn OrderEventSink>) {
        self.routes.push((prefix, sink));
    }

    /// 外部单 / 空 remark 的监控端点
    pub fn set_external_sink(&mut self, sink: Arc<dyn OrderEventSink>) {
        self.external = Some(sink);
    }

    fn resolve(&self, evt: &OrderEvent) -> Option<&Arc<dyn OrderEventSink>> {
        if evt.is_local && !evt.remark.is_empty() {
            for (prefix, sink) in &self.routes {
                if evt.remark.starts_with(prefix) {
                    return Some(sink);
                }
            }
        }
        if !evt.is_local || evt.remark.is_empty() {
            return self.external.as_ref();
        }
        None
    }

    /// 消费回报队列直到停止且队列排空
    pub async fn run(self, mut rx: mpsc::Receiver<OrderEvent>, stop: Arc<AtomicBool>) {
        loop {
            let evt = tokio::select! {
                evt = rx.recv() => evt,
                _ = tokio::time::sleep(Duration::from_millis(200)) => {
                    if stop.load(Ordering::Acquire) && rx.is_empty() {
                        break;
                    }
                    continue;
                }
            };
            let Some(evt) = evt else { break };

            match self.resolve(&evt) {
                Some(sink) => sink.on_order_event(&evt).await,
                None => debug!(
                    "回报无路由: remark={} symbol={} kind={:?}",
                    evt.remark, evt.symbol, evt.kind
                ),
            }

            if stop.load(Ordering::Acquire) && rx.is_empty() {
                break;
            }
        }
        info!("回报分发器退出");
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::model::{NotifyKind, OrderSide, OrderType};
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    #[async_trait]
    impl OrderEventSink for Counter {
        async fn on_order_event(&self, _evt: &OrderEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn evt(remark: &str, is_local: bool) -> OrderEvent {
        OrderEvent {
            kind: NotifyKind::Accepted,
            local_id: "L".into(),
            system_id: "S".into(),
            symbol: "600000.SH".into(),
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            price: 10.0,
            volume: 100,
            fill_volume: 0,
            fill_price: 0.0,
            remark: remark.into(),
            is_local,
            err_msg: String::new(),
        }
    }

    #[test]
    fn prefix_routing_is_exclusive() {
        let auction = Arc::new(Counter(AtomicUsize::new(0)));
        let intraday = Arc::new(Counter(AtomicUsize::new(0)));
        let close = Arc::new(Counter(AtomicUsize::new(0)));
        let guard = Arc::new(Counter(AtomicUsize::new(0)));

        let mut dispatcher = Dispatcher::new();
        // 长前缀先挂
        dispatcher.add_route("qh2h_sell_auction_", auction.clone());
        dispatcher.add_route("qh2h_sell_", intraday.clone());
        dispatcher.add_route("qh2h_close_", close.clone());
        dispatcher.add_route("qh2h_base_cancel_", guard.clone());
        dispatcher.set_external_sink(guard.clone());

        assert!(dispatcher
            .resolve(&evt("qh2h_sell_auction_600000.SH", true))
            .is_some());
        let sink = dispatcher
            .resolve(&evt("qh2h_sell_auction_600000.SH", true))
            .unwrap();
        futures_block(sink.on_order_event(&evt("qh2h_sell_auction_600000.SH", true)));
        assert_eq!(auction.0.load(Ordering::SeqCst), 1);
        assert_eq!(intraday.0.load(Ordering::SeqCst), 0);

        let sink = dispatcher
            .resolve(&evt("qh2h_sell_intraday_000001.SZ", true))
            .unwrap();
        futures_block(sink.on_order_event(&evt("qh2h_sell_intraday_000001.SZ", true)));
        assert_eq!(intraday.0.load(Ordering::SeqCst), 1);

        // 外部单进监控端点
        let sink = dispatcher.resolve(&evt("", false)).unwrap();
        futures_block(sink.on_order_event(&evt("", false)));
        assert_eq!(guard.0.load(Ordering::SeqCst), 1);

        // 本地单 remark 不认识 -> 无路由
        assert!(dispatcher.resolve(&evt("manual_order", true)).is_none());
    }

    fn futures_block<F: std::future::Future<Output = ()>>(fut: F) {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut);
    }
}
