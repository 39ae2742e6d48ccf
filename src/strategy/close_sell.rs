use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::strategy::common::{at_limit_up, mid_price, randomized_volume, Pacing, SellRng};
use crate::strategy::{ModuleStatus, SellModule, StrategyContext};
use crate::time_util::time_in_range;
use crate::trading::dispatcher::OrderEventSink;
use crate::trading::model::{NotifyKind, OrderEvent, OrderRequest, OrderSide, OrderStatus};

pub const CLOSE_REMARK_PREFIX: &str = "qh2h_close_";

fn close_remark(symbol: &str) -> String {
    format!("{CLOSE_REMARK_PREFIX}{symbol}")
}

struct CloseState {
    /// 初始持仓（只收录 total > hold_vol 的票）
    total_volumes: HashMap<String, i64>,
    /// 实际已卖（用持仓差校正，避免委托量虚高）
    sold_volumes: HashMap<String, i64>,
    remarks: HashMap<String, String>,
    callbacks: HashMap<String, i32>,
    order_ids: HashMap<String, Vec<String>>,
    rng: SellRng,
    phase2_cancel_done: bool,
    phase3_probe_done: bool,
    phase4_bulk_done: bool,
}

/// 收盘卖出策略
///
/// 14:53 起 3s 一拍、15% 概率按中间价随机出货；14:56:45 撤单一轮；
/// 14:57:20 每票 100 股跌停价试探；14:58 把余量全部按跌停价甩出。
pub struct CloseSellStrategy {
    ctx: StrategyContext,
    pacing: Pacing,
    trigger_probability: f64,
    state: Mutex<CloseState>,
}

impl CloseSellStrategy {
    pub fn new(ctx: StrategyContext, pacing: Pacing, rand_seed: u64) -> Self {
        Self {
            ctx,
            pacing,
            trigger_probability: 0.15,
            state: Mutex::new(CloseState {
                total_volumes: HashMap::new(),
                sold_volumes: HashMap::new(),
                remarks: HashMap::new(),
                callbacks: HashMap::new(),
                order_ids: HashMap::new(),
                rng: SellRng::new(rand_seed),
                phase2_cancel_done: false,
                phase3_probe_done: false,
                phase4_bulk_done: false,
            }),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CloseState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 用当前持仓回推实际已卖量
    fn reconcile_sold(state: &mut CloseState, positions: &[crate::trading::model::Position]) {
        for pos in positions {
            if let Some(init_total) = state.total_volumes.get(&pos.symbol) {
                let actual_sold = (init_total - pos.total).max(0);
                state.sold_volumes.insert(pos.symbol.clone(), actual_sold);
            }
        }
    }

    async fn place_close_order(&self, symbol: &str, price: f64, volume: i64, tag: &str) {
        let remark = close_remark(symbol);
        let req = OrderRequest {
            account_id: self.ctx.account_id.clone(),
            symbol: symbol.to_string(),
            side: OrderSide::Sell,
            price,
            volume,
            is_market: false,
            remark: remark.clone(),
        };
        let local_id = self.ctx.gateway.place_order(req).await;
        if local_id.is_empty() {
            return;
        }
        info!("[收盘-{}] {} 卖 {} @ {:.2} local_id={}", tag, symbol, volume, price, local_id);
        let mut state = self.lock_state();
        state.remarks.insert(symbol.to_string(), remark);
        let ids = state.order_ids.entry(symbol.to_string()).or_default();
        if !ids.contains(&local_id) {
            ids.push(local_id);
        }
    }

    /// 14:53:00-14:56:45 概率出货
    async fn phase1_random_sell(&self) {
        let positions = self.ctx.gateway.query_positions().await;
        let mut planned: Vec<(String, f64, i64)> = Vec::new();
        {
            let mut state = self.lock_state();
            Self::reconcile_sold(&mut state, &positions);

            for pos in &positions {
                let symbol = &pos.symbol;
                let Some(&init_total) = state.total_volumes.get(symbol) else {
                    continue;
                };
                if state.rng.uni() >= self.trigger_probability {
                    continue;
                }
                let sold = state.sold_volumes.get(symbol).copied().unwrap_or(0);
                // 卖到七成就收手
                if sold as f64 > init_total as f64 * 0.7 {
                    continue;
                }
                if pos.available <= 0 || pos.total <= self.ctx.hold_vol {
                    continue;
                }
                let remaining = pos.available.min(pos.total) - self.ctx.hold_vol - sold;
                if remaining <= 0 {
                    continue;
                }
                let vol = (pos.available - self.ctx.hold_vol).min(remaining);

                let Some(snap) = self.ctx.cache.snapshot(symbol) else {
                    continue;
                };
                let (zt, _) = self.ctx.cache.limits(symbol);
                if zt <= 0.0 {
                    continue;
                }
                let mut bid1 = snap.bid1();
                if at_limit_up(bid1, zt) {
                    debug!("[收盘-P1] {} 涨停不卖", symbol);
                    continue;
                }
                let price = mid_price(bid1, snap.ask1());
                if bid1 <= 0.0 {
                    bid1 = price;
                }
                let vol = randomized_volume(&mut state.rng, &self.pacing, bid1, vol);
                if vol <= 0 {
                    continue;
                }
                planned.push((symbol.clone(), price, vol));
            }
        }
        for (symbol, price, vol) in planned {
            self.place_close_order(&symbol, price, vol, "P1").await;
        }
    }

    /// 14:56:45 撤掉在途委托：本地单号优先，remark 兜底
    async fn phase2_cancel_orders(&self) {
        let (tracked, all_done) = {
            let state = self.lock_state();
            let done: i32 = state.callbacks.values().sum();
            (
                state.remarks.keys().cloned().collect::<Vec<_>>(),
                !state.callbacks.is_empty() && done as usize == state.callbacks.len(),
            )
        };
        if all_done {
            info!("[收盘-撤单] 回调都处理过了，跳过");
            return;
        }

        let mut cancel_count = 0;
        for symbol in tracked {
            let ids = {
                let state = self.lock_state();
                state.order_ids.get(&symbol).cloned().unwrap_or_default()
            };
            let mut tried = 0;
            for local_id in &ids {
                let Some(order) = self.ctx.order_book.find_by_local(local_id) else {
                    debug!("[收盘-撤单] 未知单号 {} {}", symbol, local_id);
                    continue;
                };
                if !order.is_active() || order.status == OrderStatus::Canceling {
                    continue;
                }
                tried += 1;
                if self.ctx.gateway.cancel_order(local_id).await {
                    cancel_count += 1;
                    info!("[收盘-撤单] {} local_id={}", symbol, local_id);
                }
            }
            if tried == 0 {
                // 兜底：remark 精确匹配
                let remark = close_remark(&symbol);
                let orders = self.ctx.gateway.query_orders().await;
                for order in orders {
                    if order.remark == remark
                        && order.is_active()
                        && order.status != OrderStatus::Canceling
                        && self.ctx.gateway.cancel_order(&order.local_id).await
                    {
                        cancel_count += 1;
                    }
                }
            }
            self.lock_state().callbacks.insert(symbol, 1);
        }
        info!("[收盘-撤单] 共撤 {} 笔", cancel_count);
    }

    /// 14:57:20 每票 100 股挂跌停试探
    async fn phase3_probe_sell(&self) {
        let positions = self.ctx.gateway.query_positions().await;
        let mut planned: Vec<(String, f64)> = Vec::new();
        {
            let mut state = self.lock_state();
            Self::reconcile_sold(&mut state, &positions);

            for pos in &positions {
                let symbol = &pos.symbol;
                if !state.total_volumes.contains_key(symbol) {
                    continue;
                }
                if pos.available <= 0 || pos.total <= self.ctx.hold_vol || pos.available < 100 {
                    continue;
                }
                let sold = state.sold_volumes.get(symbol).copied().unwrap_or(0);
                let remaining = pos.available.min(pos.total) - self.ctx.hold_vol - sold;
                if remaining <= 100 {
                    continue;
                }
                let Some(snap) = self.ctx.cache.snapshot(symbol) else {
                    continue;
                };
                let (zt, dt) = self.ctx.cache.limits(symbol);
                if zt <= 0.0 || dt <= 0.0 {
                    continue;
                }
                if at_limit_up(snap.bid1(), zt) {
                    debug!("[收盘-P3] {} 涨停不卖", symbol);
                    continue;
                }
                planned.push((symbol.clone(), dt));
            }
        }
        for (symbol, dt) in planned {
            self.place_close_order(&symbol, dt, 100, "P3").await;
        }
    }

    /// 14:58:00 余量全部跌停价甩出
    async fn phase4_bulk_sell(&self) {
        let positions = self.ctx.gateway.query_positions().await;
        let mut planned: Vec<(String, f64, i64)> = Vec::new();
        {
            let mut state = self.lock_state();
            Self::reconcile_sold(&mut state, &positions);

            for pos in &positions {
                let symbol = &pos.symbol;
                if !state.total_volumes.contains_key(symbol) {
                    continue;
                }
                if pos.available <= 0 || pos.total <= self.ctx.hold_vol {
                    continue;
                }
                // 可卖量按当前持仓算，不再扣已卖（已卖的量持仓里已经没了）
                let sellable = (pos.available.min(pos.total) - self.ctx.hold_vol).max(0);
                if sellable <= 0 {
                    continue;
                }
                let Some(snap) = self.ctx.cache.snapshot(symbol) else {
                    continue;
                };
                let (zt, dt) = self.ctx.cache.limits(symbol);
                if zt <= 0.0 || dt <= 0.0 || snap.bid1() <= 0.0 {
                    continue;
                }
                if at_limit_up(snap.bid1(), zt) {
                    debug!("[收盘-P4] {} 涨停不卖", symbol);
                    continue;
                }
                planned.push((symbol.clone(), dt, sellable));
            }
        }
        for (symbol, dt, vol) in planned {
            self.place_close_order(&symbol, dt, vol, "P4").await;
        }
    }
}

#[async_trait]
impl SellModule for CloseSellStrategy {
    fn name(&self) -> &'static str {
        "close_sell"
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs(3)
    }

    async fn init(&self) -> anyhow::Result<()> {
        let positions = self.ctx.gateway.query_positions().await;
        let mut state = self.lock_state();
        for pos in positions {
            if pos.total > self.ctx.hold_vol {
                info!(
                    "[收盘-INIT] {} total={} avail={}",
                    pos.symbol, pos.total, pos.available
                );
                state.total_volumes.insert(pos.symbol.clone(), pos.total);
                state.sold_volumes.insert(pos.symbol.clone(), 0);
                state.remarks.insert(pos.symbol.clone(), "empty".to_string());
                state.callbacks.insert(pos.symbol, 0);
            }
        }
        info!("[收盘-INIT] 共 {} 只标的", state.total_volumes.len());
        Ok(())
    }

    async fn tick(&self, now: u32) -> anyhow::Result<()> {
        // 随机出货 (14:53:00 - 14:56:45)
        if time_in_range(now, 145300, 145645) {
            self.phase1_random_sell().await;
        }

        // 撤单 (14:56:45 - 14:57:00)，一轮
        if time_in_range(now, 145645, 145700) && !self.lock_state().phase2_cancel_done {
            self.lock_state().phase2_cancel_done = true;
            self.phase2_cancel_orders().await;
        }

        // 试探单 (14:57:20 - 14:57:50)，一轮
        if time_in_range(now, 145720, 145750) && !self.lock_state().phase3_probe_done {
            self.lock_state().phase3_probe_done = true;
            self.phase3_probe_sell().await;
        }

        // 余量甩卖 (14:58:00 - 14:59:50)，一轮
        if time_in_range(now, 145800, 145950) && !self.lock_state().phase4_bulk_done {
            self.lock_state().phase4_bulk_done = true;
            self.phase4_bulk_sell().await;
        }

        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        let state = self.lock_state();
        let done = state.callbacks.values().filter(|v| **v == 1).count();
        let intended = state.sold_volumes.values().sum();
        ModuleStatus {
            tracked: state.total_volumes.len(),
            done,
            intended_sell_vol: intended,
        }
    }
}

#[async_trait]
impl OrderEventSink for CloseSellStrategy {
    async fn on_order_event(&self, evt: &OrderEvent) {
        match evt.kind {
            NotifyKind::Cancelled => {
                self.lock_state().callbacks.insert(evt.symbol.clone(), 1);
            }
            NotifyKind::Match => {
                debug!(
                    "[收盘] 成交回报 {} {} @ {:.2}",
                    evt.symbol, evt.fill_volume, evt.fill_price
                );
            }
            _ => {}
        }
    }
}
