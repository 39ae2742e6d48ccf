use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::market::cache::limit_prices_from_pre_close;
use crate::market::types::{round2, Transaction, TxSide};
use crate::strategy::common::to_lot;
use crate::strategy::{ModuleStatus, SellModule, StrategyContext};
use crate::time_util::time_in_range;
use crate::trading::dispatcher::OrderEventSink;
use crate::trading::model::{
    extract_code, pass_code_filter, NotifyKind, OrderEvent, OrderRequest, OrderSide, OrderType,
    Position,
};
use crate::trading::watchlist::load_buy_list;

pub const BASE_CANCEL_REMARK_PREFIX: &str = "qh2h_base_cancel_";

/// 每 100 笔委托歇 1 秒
const BATCH_SIZE: usize = 100;
const BATCH_SLEEP_MS: u64 = 1000;
/// 盘前排队每 150 笔歇 1 秒
const PANQIAN_BATCH_SIZE: usize = 150;
/// 09:15 前最多先排这么多只
const PANQIAN_EARLY_LIMIT: usize = 270;

struct GuardState {
    buy_symbols: Vec<String>,
    buy_list_path: Option<PathBuf>,
    holding_symbols: Vec<String>,
    zt_cache: HashMap<String, f64>,
    preclose_cache: HashMap<String, f64>,
    /// 第二单（被守护的排队单）
    second_order_ids: HashSet<String>,
    second_order_symbol: HashMap<String, String>,
    second_order_by_symbol: HashMap<String, String>,
    /// 触发后待撤
    second_ready: HashSet<String>,
    second_canceled: HashSet<String>,
    buy_list_done: bool,
    panqian_done: bool,
    second_done: bool,
    panqian_index: usize,
    queued_vol: i64,
}

/// 排撤模块
///
/// 盘前给每只持仓在涨停价排 100 股卖单占位，09:24:20 再排一张"第二单"。
/// 盘中只要看到外部同价 100 股的涨停卖单（回报流或逐笔任一来源），
/// 立刻把该票的第二单撤掉；14:54 另带一个底仓补齐买入的小工具。
pub struct BaseCancelModule {
    ctx: StrategyContext,
    code_min: Option<String>,
    code_max: Option<String>,
    order_dir: PathBuf,
    state: Mutex<GuardState>,
}

impl BaseCancelModule {
    pub fn new(
        ctx: StrategyContext,
        code_min: Option<String>,
        code_max: Option<String>,
        order_dir: PathBuf,
    ) -> Self {
        Self {
            ctx,
            code_min,
            code_max,
            order_dir,
            state: Mutex::new(GuardState {
                buy_symbols: Vec::new(),
                buy_list_path: None,
                holding_symbols: Vec::new(),
                zt_cache: HashMap::new(),
                preclose_cache: HashMap::new(),
                second_order_ids: HashSet::new(),
                second_order_symbol: HashMap::new(),
                second_order_by_symbol: HashMap::new(),
                second_ready: HashSet::new(),
                second_canceled: HashSet::new(),
                buy_list_done: false,
                panqian_done: false,
                second_done: false,
                panqian_index: 0,
                queued_vol: 0,
            }),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remark(kind: &str, symbol: &str, now: u32) -> String {
        format!("{BASE_CANCEL_REMARK_PREFIX}{kind}_{symbol}_{now}")
    }

    fn position_map(&self, positions: Vec<Position>) -> HashMap<String, Position> {
        positions
            .into_iter()
            .filter(|p| {
                pass_code_filter(
                    extract_code(&p.symbol),
                    self.code_min.as_deref(),
                    self.code_max.as_deref(),
                )
            })
            .map(|p| (p.symbol.clone(), p))
            .collect()
    }

    /// 涨停价：缓存 -> 行情 -> 昨收推算
    fn resolve_zt(&self, symbol: &str) -> f64 {
        {
            let state = self.lock_state();
            if let Some(zt) = state.zt_cache.get(symbol) {
                return *zt;
            }
        }
        let (up, _) = self.ctx.cache.limits(symbol);
        let mut zt = round2(up);
        if zt <= 0.0 {
            let pre_close = self
                .ctx
                .cache
                .snapshot(symbol)
                .map(|s| s.pre_close)
                .filter(|p| *p > 0.0)
                .or_else(|| self.lock_state().preclose_cache.get(symbol).copied());
            if let Some(pre_close) = pre_close {
                let code = extract_code(symbol);
                let ratio = if code.starts_with("30") || code.starts_with("68") {
                    0.20
                } else {
                    0.10
                };
                zt = limit_prices_from_pre_close(pre_close, ratio).0;
                self.lock_state()
                    .preclose_cache
                    .insert(symbol.to_string(), pre_close);
            }
        }
        if zt > 0.0 {
            self.lock_state().zt_cache.insert(symbol.to_string(), zt);
        }
        zt
    }

    /// 14:54 底仓补齐：按清单把持仓买到 hold_vol，市价单挂跌停价
    async fn do_base_buy(&self, now: u32) {
        let buy_symbols = self.lock_state().buy_symbols.clone();
        if buy_symbols.is_empty() {
            warn!("[排撤-BUY] 买入清单为空，跳过");
            return;
        }
        let pos_map = self.position_map(self.ctx.gateway.query_positions().await);
        let mut buy_count = 0usize;

        for symbol in &buy_symbols {
            let current = pos_map.get(symbol).map(|p| p.total).unwrap_or(0);
            if current >= self.ctx.hold_vol {
                continue;
            }
            let vol = to_lot(self.ctx.hold_vol - current);
            if vol <= 0 {
                continue;
            }

            if buy_count > 0 && buy_count % BATCH_SIZE == 0 {
                info!("[排撤-BUY] 批次歇 1s ({} 笔)", buy_count);
                tokio::time::sleep(Duration::from_millis(BATCH_SLEEP_MS)).await;
            }

            let (_, down_limit) = self.ctx.cache.limits(symbol);
            let buy_price = if down_limit > 0.0 {
                round2(down_limit)
            } else {
                match self.ctx.cache.snapshot(symbol) {
                    Some(snap) if snap.pre_close > 0.0 => round2(snap.pre_close * 0.9),
                    _ => {
                        warn!("[排撤-BUY] {} 没有跌停价/昨收，跳过", symbol);
                        continue;
                    }
                }
            };

            let req = OrderRequest {
                account_id: self.ctx.account_id.clone(),
                symbol: symbol.clone(),
                side: OrderSide::Buy,
                price: buy_price,
                volume: vol,
                is_market: true,
                remark: Self::remark("base_buy", symbol, now),
            };
            let local_id = self.ctx.gateway.place_order(req).await;
            if !local_id.is_empty() {
                buy_count += 1;
                info!(
                    "[排撤-BUY] {} vol={} price={:.2} local_id={}",
                    symbol, vol, buy_price, local_id
                );
            }
        }
        info!("[排撤-BUY] 完成，共 {} 笔", buy_count);
    }

    /// 09:10:20 盘前排队：每只持仓 100 股挂涨停
    async fn do_pre_orders(&self, now: u32) {
        let (symbols, start_idx) = {
            let state = self.lock_state();
            (state.holding_symbols.clone(), state.panqian_index)
        };
        let pos_map = self.position_map(self.ctx.gateway.query_positions().await);

        let mut idx = start_idx;
        let mut placed = 0usize;
        while idx < symbols.len() {
            // 09:15 前先只排一部分，剩下的等正式时段
            if idx >= PANQIAN_EARLY_LIMIT && now < 91500 {
                break;
            }
            let symbol = symbols[idx].clone();
            idx += 1;

            let available = pos_map.get(&symbol).map(|p| p.available).unwrap_or(0);
            if available < 100 {
                continue;
            }
            let zt = self.resolve_zt(&symbol);
            if zt <= 0.0 {
                continue;
            }

            let req = OrderRequest {
                account_id: self.ctx.account_id.clone(),
                symbol: symbol.clone(),
                side: OrderSide::Sell,
                price: zt,
                volume: 100,
                is_market: false,
                remark: Self::remark("pre", &symbol, now),
            };
            let local_id = self.ctx.gateway.place_order(req).await;
            if !local_id.is_empty() {
                info!("[排撤-PRE] {} zt={:.2} local_id={}", symbol, zt, local_id);
            }

            placed += 1;
            if placed % PANQIAN_BATCH_SIZE == 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        let mut state = self.lock_state();
        state.panqian_index = idx;
        if idx >= symbols.len() {
            state.panqian_done = true;
            info!("[排撤-PRE] 完成");
        }
    }

    /// 09:24:20 第二单：再排一张被守护的 100 股涨停卖单
    async fn do_second_orders(&self, now: u32) {
        let symbols = self.lock_state().holding_symbols.clone();
        let pos_map = self.position_map(self.ctx.gateway.query_positions().await);
        let mut queue_count = 0usize;

        for symbol in &symbols {
            let available = pos_map.get(symbol).map(|p| p.available).unwrap_or(0);
            if available < 100 {
                continue;
            }
            let zt = self.resolve_zt(symbol);
            if zt <= 0.0 {
                continue;
            }

            if queue_count > 0 && queue_count % BATCH_SIZE == 0 {
                tokio::time::sleep(Duration::from_millis(BATCH_SLEEP_MS)).await;
            }

            let req = OrderRequest {
                account_id: self.ctx.account_id.clone(),
                symbol: symbol.clone(),
                side: OrderSide::Sell,
                price: zt,
                volume: 100,
                is_market: false,
                remark: Self::remark("queue", symbol, now),
            };
            let local_id = self.ctx.gateway.place_order(req).await;
            if local_id.is_empty() {
                continue;
            }
            queue_count += 1;
            let mut state = self.lock_state();
            state.second_order_ids.insert(local_id.clone());
            state
                .second_order_symbol
                .insert(local_id.clone(), symbol.clone());
            state
                .second_order_by_symbol
                .insert(symbol.clone(), local_id.clone());
            state.queued_vol += 100;
            info!("[排撤-QUEUE] {} zt={:.2} local_id={}", symbol, zt, local_id);
        }
        info!("[排撤-QUEUE] 完成，共 {} 笔", queue_count);
    }

    /// 盘中执行触发的撤单；每张第二单只撤一次
    async fn do_cancel(&self) {
        let to_cancel: Vec<String> = {
            let state = self.lock_state();
            state
                .second_ready
                .iter()
                .filter(|id| {
                    state.second_order_ids.contains(*id) && !state.second_canceled.contains(*id)
                })
                .cloned()
                .collect()
        };

        for local_id in to_cancel {
            // 先占坑再发撤单，保证只发一次
            {
                let mut state = self.lock_state();
                if !state.second_canceled.insert(local_id.clone()) {
                    continue;
                }
            }
            if self.ctx.gateway.cancel_order(&local_id).await {
                let symbol = self
                    .lock_state()
                    .second_order_symbol
                    .get(&local_id)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                info!("[排撤-CANCEL] {} local_id={}", symbol, local_id);
            } else {
                // 提交失败，放回去下个 tick 重试
                let mut state = self.lock_state();
                state.second_canceled.remove(&local_id);
                warn!("[排撤-CANCEL] 撤单提交失败 local_id={}", local_id);
            }
        }
    }

    /// 外部探针命中：把该票的第二单标记待撤
    fn arm_cancel(&self, symbol: &str, price: f64) {
        let mut state = self.lock_state();
        // 回报里的代码形式可能不带市场后缀，补一次规范化再查
        let (symbol, zt) = match state.zt_cache.get(symbol) {
            Some(zt) => (symbol.to_string(), *zt),
            None => {
                let Ok(alt) = crate::trading::model::normalize_symbol(extract_code(symbol)) else {
                    return;
                };
                match state.zt_cache.get(&alt) {
                    Some(zt) => {
                        let zt = *zt;
                        (alt, zt)
                    }
                    None => return,
                }
            }
        };
        let symbol = symbol.as_str();
        if (price - zt).abs() >= 0.01 {
            return;
        }
        let Some(second_id) = state.second_order_by_symbol.get(symbol).cloned() else {
            return;
        };
        if state.second_canceled.contains(&second_id) {
            return;
        }
        if state.second_ready.insert(second_id.clone()) {
            info!("[排撤-触发] {} second={}", symbol, second_id);
        }
    }

    /// 逐笔成交探针（行情线程直调，必须轻量）
    pub fn on_transaction(&self, tx: &Transaction) {
        if tx.side != TxSide::Sell || tx.volume != 100 || tx.function_code == 'C' {
            return;
        }
        self.arm_cancel(&tx.symbol, tx.price);
    }
}

#[async_trait]
impl SellModule for BaseCancelModule {
    fn name(&self) -> &'static str {
        "base_cancel"
    }

    fn tick_interval(&self) -> Duration {
        Duration::from_millis(500)
    }

    async fn init(&self) -> anyhow::Result<()> {
        let (buy_symbols, buy_list_path) = load_buy_list(
            &self.order_dir,
            self.code_min.as_deref(),
            self.code_max.as_deref(),
        );
        match (&buy_list_path, buy_symbols.len()) {
            (None, _) => warn!("[排撤-INIT] {} 下没有清单 csv", self.order_dir.display()),
            (Some(path), 0) => warn!("[排撤-INIT] 清单无有效代码: {}", path.display()),
            (Some(path), n) => info!("[排撤-INIT] 清单 {} 只: {}", n, path.display()),
        }

        let positions = self.ctx.gateway.query_positions().await;
        let holding: Vec<String> = positions
            .iter()
            .filter(|p| {
                pass_code_filter(
                    extract_code(&p.symbol),
                    self.code_min.as_deref(),
                    self.code_max.as_deref(),
                )
            })
            .map(|p| p.symbol.clone())
            .collect();
        info!("[排撤-INIT] 持仓 {} 只", holding.len());

        let mut state = self.lock_state();
        state.buy_symbols = buy_symbols;
        state.buy_list_path = buy_list_path;
        state.holding_symbols = holding;
        Ok(())
    }

    async fn tick(&self, now: u32) -> anyhow::Result<()> {
        // 底仓买入 (14:54 - 14:55)，一轮
        if time_in_range(now, 145400, 145500) && !self.lock_state().buy_list_done {
            self.lock_state().buy_list_done = true;
            self.do_base_buy(now).await;
        }

        // 盘前排队 (09:10:20 - 09:17:00)
        if time_in_range(now, 91020, 91700) && !self.lock_state().panqian_done {
            self.do_pre_orders(now).await;
        }

        // 第二单 (09:24:20 - 09:24:50)，一轮
        if time_in_range(now, 92420, 92450) && !self.lock_state().second_done {
            self.lock_state().second_done = true;
            self.do_second_orders(now).await;
        }

        // 盘中守护撤单 (09:29:00 - 14:55:00)
        if time_in_range(now, 92900, 145500) {
            self.do_cancel().await;
        }

        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        let state = self.lock_state();
        ModuleStatus {
            tracked: state.holding_symbols.len(),
            done: state.second_canceled.len(),
            intended_sell_vol: state.queued_vol,
        }
    }
}

#[async_trait]
impl OrderEventSink for BaseCancelModule {
    async fn on_order_event(&self, evt: &OrderEvent) {
        // 自己第二单的撤单确认：从守护集合摘掉
        if evt.kind == NotifyKind::Cancelled {
            let mut state = self.lock_state();
            if state.second_order_ids.remove(&evt.local_id) {
                state.second_ready.remove(&evt.local_id);
                state.second_canceled.insert(evt.local_id.clone());
                if let Some(symbol) = state.second_order_symbol.get(&evt.local_id) {
                    debug!("[排撤] 第二单已撤 {} local_id={}", symbol, evt.local_id);
                }
                if let Some(symbol) = state.second_order_symbol.remove(&evt.local_id) {
                    state.second_order_by_symbol.remove(&symbol);
                }
            }
            return;
        }

        // 触发只看委托确认回报，不等成交
        if evt.kind != NotifyKind::Accepted {
            return;
        }
        // 只有外部单触发；忽略本地单（包括第二单自己）
        if evt.is_local || self.lock_state().second_order_ids.contains(&evt.local_id) {
            return;
        }
        if evt.side != OrderSide::Sell || evt.order_type != OrderType::Limit || evt.volume != 100 {
            return;
        }
        self.arm_cancel(&evt.symbol, evt.price);
    }
}
