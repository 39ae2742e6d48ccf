use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::strategy::common::{at_limit_up, mid_price, randomized_volume, Pacing, SellRng};
use crate::strategy::windows::sell_windows;
use crate::strategy::{Condition, ModuleStatus, SellModule, StrategyContext};
use crate::time_util::{now_yyyymmdd, time_in_range};
use crate::trading::dispatcher::OrderEventSink;
use crate::trading::model::{
    NotifyKind, OrderEvent, OrderRequest, OrderSide, OrderStatus, Position, StockParams,
    StockRuntime,
};

pub const INTRADAY_REMARK_PREFIX: &str = "qh2h_sell_intraday_";

fn intraday_remark(symbol: &str) -> String {
    format!("{INTRADAY_REMARK_PREFIX}{symbol}")
}

struct StockSlot {
    params: StockParams,
    runtime: StockRuntime,
}

struct IntradayState {
    stocks: HashMap<String, StockSlot>,
    symbols: Vec<String>,
    rng: SellRng,
    /// 竞价数据已锁定
    before_check: bool,
    /// 竞价结束后采样一次的可用仓位基准（keep_position 的分母）
    base_avail: HashMap<String, i64>,
    cancel_attempts: u32,
    cancel_date: u32,
}

/// 盘中卖出策略
///
/// 3s 一拍。条件(lb/fb/hf/zb) + jjamt 档 + 开盘比档查窗口表，
/// 窗口内 16% 概率出手，中间价随机分笔；14:49 起撤单扫尾（每日最多 3 次）。
pub struct IntradaySellStrategy {
    ctx: StrategyContext,
    pacing: Pacing,
    state: Mutex<IntradayState>,
}

impl IntradaySellStrategy {
    pub fn new(
        ctx: StrategyContext,
        watchlist: Vec<StockParams>,
        input_amt: f64,
        rand_seed: u64,
    ) -> Self {
        let mut stocks = HashMap::new();
        let mut symbols = Vec::new();
        for params in watchlist {
            symbols.push(params.symbol.clone());
            stocks.insert(
                params.symbol.clone(),
                StockSlot {
                    params,
                    runtime: StockRuntime::default(),
                },
            );
        }
        symbols.sort();
        Self {
            ctx,
            pacing: Pacing::intraday_from_input(input_amt),
            state: Mutex::new(IntradayState {
                stocks,
                symbols,
                rng: SellRng::new(rand_seed),
                before_check: false,
                base_avail: HashMap::new(),
                cancel_attempts: 0,
                cancel_date: 0,
            }),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, IntradayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 锁定竞价数据：开盘价、jjamt、可用仓位基准；昨收以快照为准刷新
    async fn collect_auction_data(&self) {
        let positions = self.ctx.gateway.query_positions().await;
        let mut state = self.lock_state();
        for pos in &positions {
            if state.stocks.contains_key(&pos.symbol) {
                state.base_avail.insert(pos.symbol.clone(), pos.available);
            }
        }
        let symbols = state.symbols.clone();
        for symbol in symbols {
            let (open, jjamt) = self.ctx.cache.auction(&symbol, 92700);
            let snap = self.ctx.cache.snapshot(&symbol);
            if let Some(slot) = state.stocks.get_mut(&symbol) {
                slot.runtime.open_price = open;
                slot.runtime.jjamt = jjamt;
                if let Some(snap) = &snap {
                    if snap.pre_close > 0.0 {
                        slot.params.pre_close = snap.pre_close;
                    }
                }
                info!("[盘中-采集] {} open={:.2} jjamt={:.0}", symbol, open, jjamt);
            }
        }
        state.before_check = true;
    }

    async fn execute_sell(&self, now: u32) {
        let positions = self.ctx.gateway.query_positions().await;
        let pos_map: HashMap<String, Position> =
            positions.into_iter().map(|p| (p.symbol.clone(), p)).collect();

        // 决策在锁内完成，出手计划收集好后锁外下单
        let mut planned: Vec<(String, f64, i64)> = Vec::new();
        {
            let mut state = self.lock_state();
            for pos in pos_map.values() {
                if let Some(slot) = state.stocks.get_mut(&pos.symbol) {
                    slot.params.avail_vol = pos.available;
                }
            }

            let symbols = state.symbols.clone();
            for symbol in symbols {
                let snap = self.ctx.cache.snapshot(&symbol);
                let state = &mut *state;
                let Some(slot) = state.stocks.get_mut(&symbol) else {
                    continue;
                };
                if slot.runtime.sell_flag == 1 {
                    continue;
                }
                if slot.params.avail_vol < self.ctx.hold_vol
                    || slot.params.total_vol < self.ctx.hold_vol
                {
                    slot.runtime.sell_flag = 1;
                    continue;
                }
                let Some(condition) = Condition::from_flags(
                    slot.params.second_flag,
                    slot.params.fb_flag,
                    slot.params.zb_flag,
                ) else {
                    continue;
                };

                // 涨停价兜底：行情里拿最新的
                if slot.runtime.zt_price <= 0.0 {
                    if let Some(snap) = &snap {
                        if snap.up_limit > 0.0 {
                            slot.runtime.zt_price = snap.up_limit;
                        }
                    }
                }

                let open_ratio = if slot.params.pre_close > 0.0 {
                    slot.runtime.open_price / slot.params.pre_close
                } else {
                    0.0
                };
                let windows = sell_windows(condition, slot.runtime.jjamt, open_ratio);
                let Some(window) = windows.iter().find(|w| w.contains(now)) else {
                    debug!(
                        "[盘中] {} 不在窗口 now={} cond={}",
                        symbol,
                        now,
                        condition.as_str()
                    );
                    continue;
                };

                // 窗口内每拍 16% 概率出手
                let p = state.rng.uni();
                if p >= 0.16 {
                    debug!("[盘中] {} 随机跳过 p={:.3}", symbol, p);
                    continue;
                }
                info!(
                    "[盘中] {} 条件={} 窗口={}-{} keep={}",
                    symbol,
                    condition.as_str(),
                    window.start,
                    window.end,
                    window.keep_position
                );

                // 余量 = min(可用, 持仓) − 底仓 − 已委托意图
                let avail = slot.params.avail_vol;
                let total = slot.params.total_vol;
                let vol =
                    (avail.min(total) - self.ctx.hold_vol - slot.runtime.sold_vol).max(0);
                if vol == 0 {
                    slot.runtime.sell_flag = 1;
                    continue;
                }
                if slot.runtime.sold_vol >= total {
                    slot.runtime.sell_flag = 1;
                    continue;
                }

                // keep_position 用竞价后基准做分母，已卖出的量不扰动比例
                let avail_for_ratio = (avail - self.ctx.hold_vol).max(0);
                let denom = state
                    .base_avail
                    .get(&symbol)
                    .copied()
                    .filter(|b| *b > 0)
                    .unwrap_or(total);
                if denom > 0
                    && (avail_for_ratio as f64 / denom as f64) <= window.keep_position
                {
                    debug!(
                        "[盘中] {} 已到保留线 keep={}",
                        symbol, window.keep_position
                    );
                    continue;
                }

                let Some(snap) = &snap else { continue };
                let mut bid1 = snap.bid1();
                if at_limit_up(bid1, slot.runtime.zt_price) {
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
                planned.push((symbol, price, vol));
            }
        }

        for (symbol, price, vol) in planned {
            let remark = intraday_remark(&symbol);
            let req = OrderRequest {
                account_id: self.ctx.account_id.clone(),
                symbol: symbol.clone(),
                side: OrderSide::Sell,
                price,
                volume: vol,
                is_market: false,
                remark: remark.clone(),
            };
            let local_id = self.ctx.gateway.place_order(req).await;
            if local_id.is_empty() {
                continue;
            }
            info!("[盘中] {} 卖 {} @ {:.2} local_id={}", symbol, vol, price, local_id);
            let mut state = self.lock_state();
            if let Some(slot) = state.stocks.get_mut(&symbol) {
                slot.runtime.sold_vol += vol;
                slot.runtime.remark = remark;
            }
        }
    }

    /// 14:49-14:51 撤单扫尾；台账优先，remark 兜底，每个交易日最多 3 轮
    async fn cancel_orders(&self) {
        let today = now_yyyymmdd();
        {
            let mut state = self.lock_state();
            if state.cancel_date != today {
                state.cancel_date = today;
                state.cancel_attempts = 0;
            }
            if state.cancel_attempts >= 3 {
                return;
            }
            state.cancel_attempts += 1;
            info!("[盘中-撤单] 第 {}/3 轮", state.cancel_attempts);
        }

        let mut cancelled = 0;
        let open_orders = self
            .ctx
            .order_book
            .active_orders_with_remark(INTRADAY_REMARK_PREFIX);
        for order in &open_orders {
            if order.status == OrderStatus::Canceling {
                continue;
            }
            if self.ctx.gateway.cancel_order(&order.local_id).await {
                cancelled += 1;
                info!("[盘中-撤单] {} local_id={}", order.symbol, order.local_id);
            }
        }
        if open_orders.is_empty() {
            let orders = self.ctx.gateway.query_orders().await;
            for order in orders {
                if order.remark.starts_with(INTRADAY_REMARK_PREFIX)
                    && matches!(
                        order.status,
                        OrderStatus::Submitted | OrderStatus::Accepted | OrderStatus::PartialFilled
                    )
                    && self.ctx.gateway.cancel_order(&order.local_id).await
                {
                    cancelled += 1;
                }
            }
        }

        let mut state = self.lock_state();
        for slot in state.stocks.values_mut() {
            slot.runtime.call_back = 1;
        }
        info!("[盘中-撤单] 成功撤 {} 笔", cancelled);
    }
}

#[async_trait]
impl SellModule for IntradaySellStrategy {
    fn name(&self) -> &'static str {
        "intraday_sell"
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_secs(3)
    }

    async fn init(&self) -> anyhow::Result<()> {
        let positions = self.ctx.gateway.query_positions().await;
        let pos_map: HashMap<String, Position> =
            positions.into_iter().map(|p| (p.symbol.clone(), p)).collect();
        let mut state = self.lock_state();
        let symbols = state.symbols.clone();
        for symbol in symbols {
            let (zt, dt) = self.ctx.cache.limits(&symbol);
            if let Some(slot) = state.stocks.get_mut(&symbol) {
                if let Some(pos) = pos_map.get(&symbol) {
                    slot.params.avail_vol = pos.available;
                    slot.params.total_vol = pos.total;
                }
                if zt > 0.0 {
                    slot.runtime.zt_price = zt;
                    slot.runtime.dt_price = dt;
                }
            }
        }
        info!("[盘中-INIT] 共 {} 只标的", state.symbols.len());
        Ok(())
    }

    async fn tick(&self, now: u32) -> anyhow::Result<()> {
        // 竞价数据采集 (09:26:00 - 11:28:10)，只做一次
        if time_in_range(now, 92600, 112810) && !self.lock_state().before_check {
            self.collect_auction_data().await;
        }

        // 执行卖出 (09:30:03 - 11:30:00, 13:00:00 - 14:48:55)
        if (time_in_range(now, 93003, 113000) || time_in_range(now, 130000, 144855))
            && self.lock_state().before_check
        {
            self.execute_sell(now).await;
        }

        // 撤单 (14:49:00 - 14:51:00)
        if time_in_range(now, 144900, 145100) {
            self.cancel_orders().await;
        }

        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        let state = self.lock_state();
        let done = state
            .stocks
            .values()
            .filter(|s| s.runtime.sell_flag == 1)
            .count();
        let intended = state.stocks.values().map(|s| s.runtime.sold_vol).sum();
        ModuleStatus {
            tracked: state.stocks.len(),
            done,
            intended_sell_vol: intended,
        }
    }
}

#[async_trait]
impl OrderEventSink for IntradaySellStrategy {
    async fn on_order_event(&self, evt: &OrderEvent) {
        match evt.kind {
            NotifyKind::Cancelled => {
                let mut state = self.lock_state();
                if let Some(slot) = state.stocks.get_mut(&evt.symbol) {
                    slot.runtime.call_back = 1;
                }
            }
            NotifyKind::Match => {
                debug!(
                    "[盘中] 成交回报 {} {}/{} @ {:.2}",
                    evt.symbol, evt.fill_volume, evt.volume, evt.fill_price
                );
            }
            _ => {}
        }
    }
}
