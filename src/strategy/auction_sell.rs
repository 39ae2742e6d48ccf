use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::strategy::common::{
    at_limit_up, ceil_round, randomized_volume, randomized_volume_wide, sell_surplus, to_lot,
    Pacing, SellRng,
};
use crate::strategy::{ModuleStatus, SellModule, StrategyContext};
use crate::time_util::time_in_range;
use crate::trading::dispatcher::OrderEventSink;
use crate::trading::model::{
    OrderEvent, OrderRequest, OrderSide, OrderStatus, Position, StockParams, StockRuntime,
};

pub const AUCTION_REMARK_PREFIX: &str = "qh2h_sell_auction_";

fn auction_remark(symbol: &str) -> String {
    format!("{AUCTION_REMARK_PREFIX}{symbol}")
}

/// init 时行情可能还没来，涨跌停跟着最新快照补齐
fn refresh_limits(runtime: &mut StockRuntime, snap: &crate::market::MarketSnapshot) {
    if runtime.zt_price <= 0.0 && snap.up_limit > 0.0 {
        runtime.zt_price = snap.up_limit;
    }
    if runtime.dt_price <= 0.0 && snap.down_limit > 0.0 {
        runtime.dt_price = snap.down_limit;
    }
}

struct StockSlot {
    params: StockParams,
    runtime: StockRuntime,
}

struct AuctionState {
    stocks: HashMap<String, StockSlot>,
    symbols: Vec<String>,
    rng: SellRng,
    /// 行情健康检查完成
    hangqin_check: bool,
    /// 竞价数据采集完成
    before_check: bool,
    /// 开盘跟卖的节拍计数（tick 0.5s，每 6 拍动一次）
    kaipan_timer: u32,
}

/// 计划中的一笔卖出（决策在锁内完成，下单在锁外执行）
struct PlannedSell {
    symbol: String,
    price: f64,
    volume: i64,
    mark_sell_flag: bool,
    mark_limit_sell: bool,
    /// 开盘跟卖会把 call_back 清零
    reset_call_back: bool,
    tag: &'static str,
}

/// 竞价卖出策略
///
/// 0.5s 一拍。P1 无条件一成、P2 条件加仓（每拍 12.5% 概率）、
/// P3 最后冲刺 / 涨停探针，09:25:13 撤单扫尾，09:26 锁定竞价数据，
/// 09:29:55 起对未卖完的票开盘跟卖。
pub struct AuctionSellStrategy {
    ctx: StrategyContext,
    sell_to_mkt_ratio: f64,
    phase1_sell_ratio: f64,
    pacing: Pacing,
    state: Mutex<AuctionState>,
}

impl AuctionSellStrategy {
    pub fn new(
        ctx: StrategyContext,
        watchlist: Vec<StockParams>,
        sell_to_mkt_ratio: f64,
        phase1_sell_ratio: f64,
        pacing: Pacing,
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
            sell_to_mkt_ratio,
            phase1_sell_ratio,
            pacing,
            state: Mutex::new(AuctionState {
                stocks,
                symbols,
                rng: SellRng::new(rand_seed),
                hangqin_check: false,
                before_check: false,
                kaipan_timer: 0,
            }),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AuctionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn position_map(positions: Vec<Position>) -> HashMap<String, Position> {
        positions.into_iter().map(|p| (p.symbol.clone(), p)).collect()
    }

    /// P2/P3 共用的条件挂价：连板 / 封死 / 炸板三选一
    fn conditional_price(params: &StockParams, bid1: f64, ask1_vol: i64) -> Option<(f64, &'static str)> {
        let pre_close = params.pre_close;
        if pre_close <= 0.0 {
            return None;
        }
        let ask1_amt = bid1 * ask1_vol as f64 * 100.0;
        if params.second_flag == 1 {
            let gaokai = ceil_round(pre_close * 1.07);
            if bid1 >= gaokai {
                return Some((gaokai, "lb"));
            }
        } else if params.fb_flag == 1 && params.zb_flag == 0 && ask1_amt < 1.5e7 {
            let gaokai = ceil_round(pre_close * 1.015);
            if bid1 >= gaokai {
                return Some((gaokai, "fb"));
            }
        } else if params.fb_flag == 0 && params.zb_flag == 1 && ask1_amt < 3e6 {
            let gaokai = ceil_round(pre_close * 1.01);
            if bid1 >= gaokai {
                return Some((gaokai, "zb"));
            }
        }
        None
    }

    async fn submit_planned(&self, planned: Vec<PlannedSell>) {
        for plan in planned {
            let remark = auction_remark(&plan.symbol);
            let req = OrderRequest {
                account_id: self.ctx.account_id.clone(),
                symbol: plan.symbol.clone(),
                side: OrderSide::Sell,
                price: plan.price,
                volume: plan.volume,
                is_market: false,
                remark: remark.clone(),
            };
            let local_id = self.ctx.gateway.place_order(req).await;
            if local_id.is_empty() {
                continue;
            }
            info!(
                "[竞价-{}] {} 卖 {} @ {:.2} local_id={}",
                plan.tag, plan.symbol, plan.volume, plan.price, local_id
            );
            let mut state = self.lock_state();
            if let Some(slot) = state.stocks.get_mut(&plan.symbol) {
                slot.runtime.total_sell += plan.volume;
                slot.runtime.user_order_id = remark.clone();
                slot.runtime.remark = remark;
                if plan.mark_sell_flag {
                    slot.runtime.sell_flag = 1;
                }
                if plan.mark_limit_sell {
                    slot.runtime.limit_sell = 1;
                }
                if plan.reset_call_back {
                    slot.runtime.call_back = 0;
                }
            }
        }
    }

    /// P0: 每只票确认行情已经到位，没打过行情的票后面直接跳过
    fn check_market_data(&self) {
        let state = self.lock_state();
        for symbol in &state.symbols {
            match self.ctx.cache.snapshot(symbol) {
                Some(_) => info!("[竞价-P0] {} 行情正常", symbol),
                None => warn!("[竞价-P0] {} 没有行情", symbol),
            }
        }
    }

    /// P1: 无条件按比例卖一笔，挂跌停价
    async fn phase1_decile_sell(&self, positions: &HashMap<String, Position>) {
        let mut planned = Vec::new();
        {
            let mut state = self.lock_state();
            let symbols = state.symbols.clone();
            for symbol in symbols {
                let snap = self.ctx.cache.snapshot(&symbol);
                let Some(slot) = state.stocks.get_mut(&symbol) else {
                    continue;
                };
                if slot.runtime.return1_sell == 1 || slot.runtime.sell_flag == 1 {
                    continue;
                }
                let vol = positions
                    .get(&symbol)
                    .map(|p| sell_surplus(p.available, p.total, self.ctx.hold_vol))
                    .unwrap_or(0);
                if vol == 0 {
                    slot.runtime.sell_flag = 1;
                    slot.runtime.return1_sell = 1;
                    continue;
                }
                let Some(snap) = snap else { continue };
                refresh_limits(&mut slot.runtime, &snap);

                // 涨停但封板不牢（卖二有量）的票当作已全额买走，不卖
                if at_limit_up(snap.bid1(), slot.runtime.zt_price) && snap.ask2_vol() > 0 {
                    continue;
                }
                if slot.runtime.dt_price <= 0.0 {
                    continue;
                }

                let decile = to_lot((vol as f64 * self.phase1_sell_ratio) as i64);
                if decile <= 0 {
                    continue;
                }
                slot.runtime.return1_sell = 1;
                planned.push(PlannedSell {
                    symbol,
                    price: slot.runtime.dt_price,
                    volume: decile,
                    mark_sell_flag: false,
                    mark_limit_sell: false,
                    reset_call_back: false,
                    tag: "P1",
                });
            }
        }
        self.submit_planned(planned).await;
    }

    /// P2: 每拍 12.5% 概率的条件加仓
    async fn phase2_conditional_sell(&self, positions: &HashMap<String, Position>) {
        let mut planned = Vec::new();
        {
            let mut state = self.lock_state();
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
                if state.rng.uni() >= 0.125 {
                    continue;
                }
                let mut vol = positions
                    .get(&symbol)
                    .map(|p| sell_surplus(p.available, p.total, self.ctx.hold_vol))
                    .unwrap_or(0);
                if vol == 0 {
                    slot.runtime.sell_flag = 1;
                    continue;
                }
                let Some(snap) = snap else { continue };
                refresh_limits(&mut slot.runtime, &snap);
                let bid1 = snap.bid1();

                // 总卖出量不越过卖一量的给定比例
                if self.sell_to_mkt_ratio > 0.0
                    && slot.runtime.total_sell as f64 / 100.0
                        >= snap.ask1_vol() as f64 * self.sell_to_mkt_ratio
                {
                    info!(
                        "[竞价-P2] {} 限流: total_sell={} ask1_vol={}",
                        symbol, slot.runtime.total_sell, snap.ask1_vol()
                    );
                    continue;
                }
                if at_limit_up(bid1, slot.runtime.zt_price) && snap.ask2_vol() > 0 {
                    continue;
                }
                let Some((price, tag)) =
                    Self::conditional_price(&slot.params, bid1, snap.ask1_vol())
                else {
                    continue;
                };
                vol = randomized_volume(&mut state.rng, &self.pacing, bid1, vol);
                if vol <= 0 {
                    continue;
                }
                planned.push(PlannedSell {
                    symbol,
                    price,
                    volume: vol,
                    mark_sell_flag: false,
                    mark_limit_sell: false,
                    reset_call_back: false,
                    tag,
                });
            }
        }
        self.submit_planned(planned).await;
    }

    /// P3: 涨停未封牢时一成半仓探针，否则按条件最后冲一把
    async fn phase3_final_sell(&self, positions: &HashMap<String, Position>) {
        let mut planned = Vec::new();
        {
            let mut state = self.lock_state();
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
                let mut vol = positions
                    .get(&symbol)
                    .map(|p| sell_surplus(p.available, p.total, self.ctx.hold_vol))
                    .unwrap_or(0);
                if vol == 0 {
                    slot.runtime.sell_flag = 1;
                    continue;
                }
                let Some(snap) = snap else { continue };
                refresh_limits(&mut slot.runtime, &snap);
                let bid1 = snap.bid1();
                let zt = slot.runtime.zt_price;

                // 涨停在买一、买二无量、卖二有量：封板不牢，半仓挂涨停下一分
                if at_limit_up(bid1, zt)
                    && snap.bid2_vol() == 0
                    && snap.ask2_vol() > 0
                    && slot.runtime.limit_sell == 0
                {
                    let half = to_lot(vol / 2);
                    if half > 0 {
                        planned.push(PlannedSell {
                            symbol,
                            price: ceil_round(zt - 0.01),
                            volume: half,
                            mark_sell_flag: false,
                            mark_limit_sell: true,
                            reset_call_back: false,
                            tag: "P3-涨停",
                        });
                    }
                    continue;
                }

                if self.sell_to_mkt_ratio > 0.0 {
                    let cap = snap.ask1_vol() as f64 * self.sell_to_mkt_ratio;
                    let used = slot.runtime.total_sell as f64 / 100.0;
                    if used > cap {
                        continue;
                    }
                    let allow = ((cap - used) as i64) * 100;
                    vol = vol.min(allow);
                }

                // 涨停且卖二无量：封死，不卖
                if at_limit_up(bid1, zt) && snap.ask2_vol() <= 0 {
                    continue;
                }
                if vol <= 0 {
                    continue;
                }
                let Some((price, _)) =
                    Self::conditional_price(&slot.params, bid1, snap.ask1_vol())
                else {
                    continue;
                };
                planned.push(PlannedSell {
                    symbol,
                    price,
                    volume: vol,
                    mark_sell_flag: true,
                    mark_limit_sell: false,
                    reset_call_back: false,
                    tag: "P3",
                });
            }
        }
        self.submit_planned(planned).await;
    }

    /// 09:25:13 撤掉竞价阶段没吃掉的委托；台账优先，remark 兜底
    async fn cancel_auction_orders(&self) {
        let mut cancelled = 0;
        let open_orders = self
            .ctx
            .order_book
            .active_orders_with_remark(AUCTION_REMARK_PREFIX);
        for order in open_orders {
            if order.status == OrderStatus::Canceling {
                continue;
            }
            if self.ctx.gateway.cancel_order(&order.local_id).await {
                cancelled += 1;
                info!("[竞价-撤单] {} local_id={}", order.symbol, order.local_id);
            }
        }
        if cancelled == 0 {
            // 台账没命中：回退到柜台全量单按 remark 匹配
            let orders = self.ctx.gateway.query_orders().await;
            for order in orders {
                if order.remark.starts_with(AUCTION_REMARK_PREFIX)
                    && order.is_active()
                    && order.status != OrderStatus::Canceling
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
        if cancelled > 0 {
            info!("[竞价-撤单] 共撤 {} 笔", cancelled);
        }
    }

    /// 09:26 起锁定开盘价与集合竞价成交额，重置 sell_flag 备开盘跟卖
    fn collect_auction_data(&self) {
        let mut state = self.lock_state();
        let symbols = state.symbols.clone();
        for symbol in symbols {
            let (open, jjamt) = self.ctx.cache.auction(&symbol, 92700);
            if let Some(slot) = state.stocks.get_mut(&symbol) {
                slot.runtime.open_price = open;
                slot.runtime.jjamt = jjamt;
                slot.runtime.sell_flag = 0;
                info!("[竞价-采集] {} open={:.2} jjamt={:.0}", symbol, open, jjamt);
            }
        }
    }

    /// 开盘后 3 秒一次的跟卖：小量高开、盘前没卖完的票，按 1% 滑点追价
    async fn after_open_sell(&self) {
        {
            let mut state = self.lock_state();
            state.kaipan_timer += 1;
            if state.kaipan_timer % 6 != 0 {
                return;
            }
        }
        let positions = Self::position_map(self.ctx.gateway.query_positions().await);
        let mut planned = Vec::new();
        {
            let mut state = self.lock_state();
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
                let mut vol = positions
                    .get(&symbol)
                    .map(|p| sell_surplus(p.available, p.total, self.ctx.hold_vol))
                    .unwrap_or(0);
                if vol == 0 {
                    slot.runtime.sell_flag = 1;
                    continue;
                }
                let Some(snap) = snap else { continue };
                refresh_limits(&mut slot.runtime, &snap);
                let bid1 = snap.bid1();
                if at_limit_up(bid1, slot.runtime.zt_price) {
                    continue;
                }
                let pre_close = slot.params.pre_close;
                if pre_close <= 0.0 {
                    continue;
                }
                vol = randomized_volume_wide(&mut state.rng, &self.pacing, bid1, vol);
                if vol <= 0 {
                    continue;
                }

                let open = slot.runtime.open_price;
                let open_ratio = open / pre_close;
                let loss_price = ceil_round(pre_close * (open_ratio - 0.01));

                let fb_case = slot.params.fb_flag == 1
                    && slot.params.zb_flag == 0
                    && open >= ceil_round(pre_close * 1.015)
                    && slot.runtime.jjamt < 1.5e7;
                let zb_case = slot.params.fb_flag == 0
                    && slot.params.zb_flag == 1
                    && open >= ceil_round(pre_close * 1.01)
                    && slot.runtime.jjamt < 3e6;

                let (base_price, tag) = if fb_case {
                    (ceil_round(pre_close * 1.015), "开盘-fb")
                } else if zb_case {
                    (ceil_round(pre_close * 1.01), "开盘-zb")
                } else {
                    continue;
                };
                planned.push(PlannedSell {
                    symbol,
                    price: base_price.max(loss_price),
                    volume: vol,
                    mark_sell_flag: false,
                    mark_limit_sell: false,
                    reset_call_back: true,
                    tag,
                });
            }
        }
        self.submit_planned(planned).await;
    }
}

#[async_trait]
impl SellModule for AuctionSellStrategy {
    fn name(&self) -> &'static str {
        "auction_sell"
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    async fn init(&self) -> anyhow::Result<()> {
        let positions = Self::position_map(self.ctx.gateway.query_positions().await);
        let mut state = self.lock_state();
        let symbols = state.symbols.clone();
        for symbol in symbols {
            let (zt, dt) = self.ctx.cache.limits(&symbol);
            if let Some(slot) = state.stocks.get_mut(&symbol) {
                if let Some(pos) = positions.get(&symbol) {
                    slot.params.avail_vol = pos.available;
                    slot.params.total_vol = pos.total;
                }
                slot.runtime.zt_price = zt;
                slot.runtime.dt_price = dt;
                info!(
                    "[竞价-INIT] {} avail={} total={} zt={:.2} dt={:.2} pre_close={:.2}",
                    symbol,
                    slot.params.avail_vol,
                    slot.params.total_vol,
                    zt,
                    dt,
                    slot.params.pre_close
                );
            }
        }
        info!("[竞价-INIT] 共 {} 只标的", state.symbols.len());
        Ok(())
    }

    async fn tick(&self, now: u32) -> anyhow::Result<()> {
        // 行情检查 (09:20:05 - 09:23:00)，只做一次
        if time_in_range(now, 92005, 92300) && !self.lock_state().hangqin_check {
            self.check_market_data();
            self.lock_state().hangqin_check = true;
        }

        // 卖出阶段共用一份持仓快照，每拍最多查一次
        if time_in_range(now, 92330, 92500) {
            let positions = Self::position_map(self.ctx.gateway.query_positions().await);

            // P1 无条件一成 (09:23:30 - 09:25:00)
            self.phase1_decile_sell(&positions).await;

            // P2 条件加仓 (09:23:40 - 09:24:45)
            if time_in_range(now, 92340, 92445) {
                self.phase2_conditional_sell(&positions).await;
            }

            // P3 最后冲刺 (09:24:50 - 09:25:00)
            if time_in_range(now, 92450, 92500) {
                self.phase3_final_sell(&positions).await;
            }
        }

        // 撤单扫尾 (09:25:13 - 09:25:23)
        if time_in_range(now, 92513, 92523) {
            self.cancel_auction_orders().await;
        }

        // 竞价数据采集 (09:26:00 - 09:28:10)，只做一次
        if time_in_range(now, 92600, 92810) && !self.lock_state().before_check {
            self.collect_auction_data();
            self.lock_state().before_check = true;
        }

        // 开盘跟卖 (09:29:55 - 09:30:40)
        if time_in_range(now, 92955, 93040) {
            self.after_open_sell().await;
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
        let intended = state.stocks.values().map(|s| s.runtime.total_sell).sum();
        ModuleStatus {
            tracked: state.stocks.len(),
            done,
            intended_sell_vol: intended,
        }
    }
}

#[async_trait]
impl OrderEventSink for AuctionSellStrategy {
    async fn on_order_event(&self, evt: &OrderEvent) {
        // 撤单回报把对应票标记为扫尾完成；成交仅记日志
        if evt.kind == crate::trading::model::NotifyKind::Cancelled {
            let mut state = self.lock_state();
            if let Some(slot) = state.stocks.get_mut(&evt.symbol) {
                slot.runtime.call_back = 1;
            }
        }
    }
}
