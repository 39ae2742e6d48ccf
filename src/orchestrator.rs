use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::app_config::settings::AppConfig;
use crate::market::{MarketCache, MarketFeed};
use crate::strategy::auction_sell::AUCTION_REMARK_PREFIX;
use crate::strategy::base_cancel::BASE_CANCEL_REMARK_PREFIX;
use crate::strategy::close_sell::CLOSE_REMARK_PREFIX;
use crate::strategy::common::Pacing;
use crate::strategy::intraday_sell::INTRADAY_REMARK_PREFIX;
use crate::strategy::{
    AuctionSellStrategy, BaseCancelModule, CloseSellStrategy, IntradaySellStrategy, SellModule,
    StrategyContext,
};
use crate::time_util::now_hhmmss;
use crate::trading::api::TradingSession;
use crate::trading::model::{extract_code, pass_code_filter, StockParams};
use crate::trading::watchlist::{find_latest_csv, load_buy_list, load_watchlist};
use crate::trading::{Dispatcher, OrderBook, TradingGateway};

/// 行情连接失败的本地重试
const MARKET_CONNECT_ATTEMPTS: u32 = 3;

/// 组装好的引擎，跑到停止信号为止
pub struct Orchestrator {
    config: AppConfig,
    session: Arc<dyn TradingSession>,
    feed: Arc<dyn MarketFeed>,
    cache: Arc<MarketCache>,
    stop: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        session: Arc<dyn TradingSession>,
        feed: Arc<dyn MarketFeed>,
        cache: Arc<MarketCache>,
    ) -> Self {
        Self {
            config,
            session,
            feed,
            cache,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// 启动全部组件并阻塞到停止信号。配置/连接失败直接返回错误（退出码 1）。
    pub async fn run(self) -> anyhow::Result<()> {
        let config = &self.config;
        let section = config.trading.effective_section().to_string();
        if section.is_empty() || config.trading.account.is_empty() {
            return Err(anyhow!("缺少 trading.config_section/account 配置"));
        }

        let enable_trio = config.modules.sell == 1 || config.modules.usage_example == 1;
        let enable_base_cancel = config.modules.base_cancel == 1;
        info!(
            "[CONFIG] modules sell={} base_cancel={} usage_example={}",
            config.modules.sell, config.modules.base_cancel, config.modules.usage_example
        );

        // 交易通道
        let order_book = Arc::new(OrderBook::new());
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (gateway, gateway_handle) = TradingGateway::start(
            self.session.clone(),
            order_book.clone(),
            self.cache.clone(),
            event_tx,
            config.dry_run,
            self.stop.clone(),
        );
        gateway
            .connect(
                &section,
                config.trading.port,
                &config.trading.account,
                &config.trading.password,
            )
            .await
            .context("交易会话连接失败")?;
        info!("交易已连接");

        let positions = gateway.query_positions().await;
        let code_min = config.strategy.code_min.as_deref();
        let code_max = config.strategy.code_max.as_deref();

        // watchlist：优先 modules_config 目录里最新的 csv，退回 strategy.csv_path
        let watchlist = if enable_trio {
            match self.resolve_watchlist_path() {
                Some(path) => match load_watchlist(&path) {
                    Ok(list) => {
                        info!("[SUB] watchlist: {} ({} 只)", path.display(), list.len());
                        list
                    }
                    Err(e) => return Err(anyhow!(e)).context("watchlist 加载失败"),
                },
                None => {
                    warn!("[INIT] 卖出策略已启用但找不到 watchlist csv，跳过策略组");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        let watchlist: Vec<StockParams> = watchlist
            .into_iter()
            .filter(|s| pass_code_filter(extract_code(&s.symbol), code_min, code_max))
            .collect();

        // 订阅集合：一次合并，行情会话不支持运行期变更
        let mut subscribe: BTreeSet<String> = BTreeSet::new();
        if enable_trio {
            for pos in &positions {
                if !pass_code_filter(extract_code(&pos.symbol), code_min, code_max) {
                    continue;
                }
                if pos.available > config.strategy.hold_vol {
                    subscribe.insert(pos.symbol.clone());
                }
            }
            for stock in &watchlist {
                subscribe.insert(stock.symbol.clone());
            }
        }
        let base_cancel_dir = self.base_cancel_dir();
        if enable_base_cancel {
            for pos in &positions {
                if pass_code_filter(extract_code(&pos.symbol), code_min, code_max) {
                    subscribe.insert(pos.symbol.clone());
                }
            }
            let (buy_symbols, list_path) = load_buy_list(&base_cancel_dir, code_min, code_max);
            if let Some(path) = list_path {
                info!("[SUB] base_cancel 清单: {}", path.display());
            }
            subscribe.extend(buy_symbols);
        }
        let subscribe: Vec<String> = subscribe.into_iter().collect();
        info!("[SUB] 合并订阅 {} 只", subscribe.len());

        // 行情连接：有限重试 + 退避
        self.feed.set_watchlist(&subscribe);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .feed
                .connect(
                    &config.market.host,
                    config.market.port,
                    &config.market.user,
                    &config.market.password,
                )
                .await
            {
                Ok(()) => break,
                Err(e) if attempt < MARKET_CONNECT_ATTEMPTS => {
                    warn!("行情连接失败({}/{}): {}，重试", attempt, MARKET_CONNECT_ATTEMPTS, e);
                    tokio::time::sleep(Duration::from_secs(attempt as u64 * 3)).await;
                }
                Err(e) => return Err(anyhow!(e)).context("行情会话连接失败"),
            }
        }
        info!("行情已连接");

        // 模块组装
        let ctx = StrategyContext {
            gateway: gateway.clone(),
            cache: self.cache.clone(),
            order_book: order_book.clone(),
            account_id: config.strategy.account_id.clone(),
            hold_vol: config.strategy.hold_vol,
        };
        let seed = config.strategy.rand_seed;

        let mut dispatcher = Dispatcher::new();
        let mut modules: Vec<Arc<dyn SellModule>> = Vec::new();

        if enable_base_cancel {
            let guard = Arc::new(BaseCancelModule::new(
                ctx.clone(),
                config.strategy.code_min.clone(),
                config.strategy.code_max.clone(),
                base_cancel_dir,
            ));
            dispatcher.add_route(BASE_CANCEL_REMARK_PREFIX, guard.clone());
            dispatcher.set_external_sink(guard.clone());
            // 逐笔探针直通守护模块
            let tx_guard = guard.clone();
            self.cache
                .set_transaction_consumer(move |tx| tx_guard.on_transaction(tx));
            modules.push(guard);
        }

        if enable_trio && !watchlist.is_empty() {
            let auction_pacing = config
                .strategy
                .auction_amt
                .map(|p| Pacing {
                    single_amt: p.single_amt,
                    rand_amt1: p.rand_amt1,
                    rand_amt2: p.rand_amt2,
                })
                .unwrap_or_else(|| Pacing::auction_from_input(config.strategy.input_amt));
            let close_pacing = config
                .strategy
                .close_amt
                .map(|p| Pacing {
                    single_amt: p.single_amt,
                    rand_amt1: p.rand_amt1,
                    rand_amt2: p.rand_amt2,
                })
                .unwrap_or_else(|| Pacing::close_from_input(config.strategy.input_amt));

            let auction = Arc::new(AuctionSellStrategy::new(
                ctx.clone(),
                watchlist.clone(),
                config.strategy.sell_to_mkt_ratio,
                config.strategy.phase1_sell_ratio,
                auction_pacing,
                seed,
            ));
            let intraday = Arc::new(IntradaySellStrategy::new(
                ctx.clone(),
                watchlist.clone(),
                config.strategy.input_amt,
                seed,
            ));
            let close = Arc::new(CloseSellStrategy::new(ctx.clone(), close_pacing, seed));

            // 长前缀先挂，竞价单不落进盘中的路由
            dispatcher.add_route(AUCTION_REMARK_PREFIX, auction.clone());
            dispatcher.add_route(INTRADAY_REMARK_PREFIX, intraday.clone());
            dispatcher.add_route("qh2h_sell_", intraday.clone());
            dispatcher.add_route(CLOSE_REMARK_PREFIX, close.clone());

            modules.push(auction);
            modules.push(intraday);
            modules.push(close);
        }

        if modules.is_empty() {
            return Err(anyhow!("没有启用任何模块"));
        }

        // 分发器
        let dispatcher_handle = tokio::spawn(dispatcher.run(event_rx, self.stop.clone()));

        // 模块初始化（失败的跳过，不拖垮其他模块）
        let mut running: Vec<Arc<dyn SellModule>> = Vec::new();
        for module in modules {
            match module.init().await {
                Ok(()) => running.push(module),
                Err(e) => error!("[INIT] 模块 {} 初始化失败: {:#}", module.name(), e),
            }
        }
        if running.is_empty() {
            return Err(anyhow!("所有模块初始化失败"));
        }

        // tick 循环
        let mut module_handles: Vec<JoinHandle<()>> = Vec::new();
        for module in &running {
            module_handles.push(spawn_module_loop(module.clone(), self.stop.clone()));
        }

        // 每分钟一条状态快照
        let status_handle = tokio::spawn(status_reporter(running.clone(), self.stop.clone()));

        info!("[RUN] {} 个模块已启动，Ctrl+C 停止", running.len());
        tokio::select! {
            name = wait_for_stop_signal() => warn!("[STOP] 收到 {}，开始停机", name),
            _ = wait_for_flag(self.stop.clone()) => warn!("[STOP] 停止位已拉起，开始停机"),
        }
        self.stop.store(true, Ordering::Release);

        for handle in module_handles {
            let _ = handle.await;
        }
        let _ = tokio::time::timeout(Duration::from_secs(2), dispatcher_handle).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), gateway_handle).await;
        status_handle.abort();

        self.feed.disconnect().await;
        self.session.disconnect().await;
        info!("[EXIT] 停机完成");
        Ok(())
    }

    fn resolve_watchlist_path(&self) -> Option<PathBuf> {
        let dir = &self.config.modules_config.usage_example.csv_path;
        if !dir.is_empty() {
            if let Some(path) = find_latest_csv(&PathBuf::from(dir)) {
                return Some(path);
            }
            warn!("[INIT] {} 下没有 csv", dir);
        }
        let file = &self.config.strategy.csv_path;
        if !file.is_empty() {
            let path = PathBuf::from(file);
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }

    fn base_cancel_dir(&self) -> PathBuf {
        let dir = &self.config.modules_config.base_cancel.order_dir;
        if dir.is_empty() {
            PathBuf::from("./data/base_cancel")
        } else {
            PathBuf::from(dir)
        }
    }
}

fn spawn_module_loop(module: Arc<dyn SellModule>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(module.tick_interval());
        // 落后时重新基线，不追帧
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if stop.load(Ordering::Acquire) {
                break;
            }
            let now = now_hhmmss();
            if let Err(e) = module.tick(now).await {
                error!("模块 {} tick 异常: {:#}", module.name(), e);
            }
        }
        info!("模块 {} 退出", module.name());
    })
}

async fn status_reporter(modules: Vec<Arc<dyn SellModule>>, stop: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if stop.load(Ordering::Acquire) {
            break;
        }
        let now = now_hhmmss();
        let session = crate::time_util::session_of(now);
        for module in &modules {
            let s = module.status();
            info!(
                "[STATUS] {:?} {} tracked={} done={} intended_sell_vol={}",
                session,
                module.name(),
                s.tracked,
                s.done,
                s.intended_sell_vol
            );
        }
    }
}

/// 停止位也可能由进程内其他地方拉起（测试、上层托管）
async fn wait_for_flag(flag: Arc<AtomicBool>) {
    while !flag.load(Ordering::Acquire) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_for_stop_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("注册 SIGTERM 失败: {}", e);
                tokio::signal::ctrl_c().await.ok();
                return "CTRL+C";
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!("注册 SIGINT 失败: {}", e);
                tokio::signal::ctrl_c().await.ok();
                return "CTRL+C";
            }
        };
        let mut sigquit = match signal(SignalKind::quit()) {
            Ok(s) => s,
            Err(e) => {
                error!("注册 SIGQUIT 失败: {}", e);
                tokio::signal::ctrl_c().await.ok();
                return "CTRL+C";
            }
        };

        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            _ = sigquit.recv() => "SIGQUIT",
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        "CTRL+C"
    }
}
