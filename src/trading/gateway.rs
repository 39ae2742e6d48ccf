use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::market::types::round2;
use crate::market::MarketCache;
use crate::trading::api::TradingSession;
use crate::trading::model::{Order, OrderEvent, OrderRequest, OrderSide, Position};
use crate::trading::order_book::OrderBook;

enum TradeCommand {
    Connect {
        section: String,
        port: i32,
        account: String,
        password: String,
        resp: oneshot::Sender<Result<(), AppError>>,
    },
    Disconnect {
        resp: oneshot::Sender<()>,
    },
    PlaceOrder {
        req: OrderRequest,
        resp: oneshot::Sender<String>,
    },
    CancelOrder {
        local_id: String,
        resp: oneshot::Sender<bool>,
    },
    QueryPositions {
        resp: oneshot::Sender<Vec<Position>>,
    },
    QueryOrders {
        resp: oneshot::Sender<Vec<Order>>,
    },
    QueryOrder {
        local_id: String,
        resp: oneshot::Sender<Option<Order>>,
    },
    WaitOrder {
        local_id: String,
        timeout_ms: u64,
        resp: oneshot::Sender<Option<Order>>,
    },
    IsConnected {
        resp: oneshot::Sender<bool>,
    },
}

/// 串行化交易网关的调用句柄（可克隆，发给各模块）
///
/// 所有交易操作进同一条 FIFO，由唯一 worker 依次执行，
/// 跨线程的调用顺序即入队顺序。
#[derive(Clone)]
pub struct TradingGateway {
    cmd_tx: mpsc::Sender<TradeCommand>,
    stop: Arc<AtomicBool>,
}

impl TradingGateway {
    /// 启动网关 worker。回报回调在这里挂上：
    /// SDK 线程 -> 台账落账 -> 分发队列。
    pub fn start(
        session: Arc<dyn TradingSession>,
        order_book: Arc<OrderBook>,
        cache: Arc<MarketCache>,
        event_tx: mpsc::Sender<OrderEvent>,
        dry_run: bool,
        stop: Arc<AtomicBool>,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel::<TradeCommand>(256);

        {
            let order_book = order_book.clone();
            session.set_order_callback(Arc::new(move |mut evt: OrderEvent| {
                order_book.update_from_event(&mut evt);
                // 满了只丢并告警，绝不阻塞 SDK 回调线程
                if let Err(e) = event_tx.try_send(evt) {
                    warn!("回报分发队列已满，丢弃: {}", e);
                }
            }));
        }

        let worker_stop = stop.clone();
        let handle = tokio::spawn(worker_loop(
            session,
            order_book,
            cache,
            cmd_rx,
            dry_run,
            worker_stop,
        ));

        (Self { cmd_tx, stop }, handle)
    }

    async fn submit<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> TradeCommand, default: T) -> T {
        if self.stop.load(Ordering::Acquire) {
            return default;
        }
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(make(tx)).await.is_err() {
            return default;
        }
        rx.await.unwrap_or(default)
    }

    pub async fn connect(
        &self,
        section: &str,
        port: i32,
        account: &str,
        password: &str,
    ) -> Result<(), AppError> {
        let section = section.to_string();
        let account = account.to_string();
        let password = password.to_string();
        self.submit(
            move |resp| TradeCommand::Connect {
                section,
                port,
                account,
                password,
                resp,
            },
            Err(AppError::ConnectError("网关已停止".to_string())),
        )
        .await
    }

    pub async fn disconnect(&self) {
        self.submit(|resp| TradeCommand::Disconnect { resp }, ()).await
    }

    /// 下单；失败返回空 local_id
    pub async fn place_order(&self, req: OrderRequest) -> String {
        self.submit(move |resp| TradeCommand::PlaceOrder { req, resp }, String::new())
            .await
    }

    pub async fn cancel_order(&self, local_id: &str) -> bool {
        let local_id = local_id.to_string();
        self.submit(move |resp| TradeCommand::CancelOrder { local_id, resp }, false)
            .await
    }

    pub async fn query_positions(&self) -> Vec<Position> {
        self.submit(|resp| TradeCommand::QueryPositions { resp }, Vec::new())
            .await
    }

    pub async fn query_orders(&self) -> Vec<Order> {
        self.submit(|resp| TradeCommand::QueryOrders { resp }, Vec::new())
            .await
    }

    pub async fn query_order(&self, local_id: &str) -> Option<Order> {
        let local_id = local_id.to_string();
        self.submit(move |resp| TradeCommand::QueryOrder { local_id, resp }, None)
            .await
    }

    /// 等单到终态；和其他操作一样占用 worker，按入队顺序执行
    pub async fn wait_order(&self, local_id: &str, timeout_ms: u64) -> Option<Order> {
        let local_id = local_id.to_string();
        self.submit(
            move |resp| TradeCommand::WaitOrder {
                local_id,
                timeout_ms,
                resp,
            },
            None,
        )
        .await
    }

    pub async fn is_connected(&self) -> bool {
        self.submit(|resp| TradeCommand::IsConnected { resp }, false)
            .await
    }
}

async fn worker_loop(
    session: Arc<dyn TradingSession>,
    order_book: Arc<OrderBook>,
    cache: Arc<MarketCache>,
    mut cmd_rx: mpsc::Receiver<TradeCommand>,
    dry_run: bool,
    stop: Arc<AtomicBool>,
) {
    if dry_run {
        session.set_dry_run(true);
        info!("交易网关运行在 dry-run 模式");
    }

    loop {
        let cmd = tokio::select! {
            cmd = cmd_rx.recv() => cmd,
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                if stop.load(Ordering::Acquire) && cmd_rx.is_empty() {
                    break;
                }
                continue;
            }
        };
        let Some(cmd) = cmd else { break };
        match cmd {
            TradeCommand::Connect {
                section,
                port,
                account,
                password,
                resp,
            } => {
                let result = session.connect(&section, port, &account, &password).await;
                let _ = resp.send(result);
            }
            TradeCommand::Disconnect { resp } => {
                session.disconnect().await;
                let _ = resp.send(());
            }
            TradeCommand::PlaceOrder { req, resp } => {
                let local_id =
                    place_order_inner(&session, &order_book, &cache, req, dry_run).await;
                let _ = resp.send(local_id);
            }
            TradeCommand::CancelOrder { local_id, resp } => {
                let ok = session.cancel_order(&local_id).await;
                if ok {
                    order_book.mark_canceling(&local_id);
                }
                let _ = resp.send(ok);
            }
            TradeCommand::QueryPositions { resp } => {
                let _ = resp.send(session.query_positions().await);
            }
            TradeCommand::QueryOrders { resp } => {
                let _ = resp.send(session.query_orders().await);
            }
            TradeCommand::QueryOrder { local_id, resp } => {
                let _ = resp.send(session.query_order(&local_id).await);
            }
            TradeCommand::WaitOrder {
                local_id,
                timeout_ms,
                resp,
            } => {
                let _ = resp.send(session.wait_order(&local_id, timeout_ms).await);
            }
            TradeCommand::IsConnected { resp } => {
                let _ = resp.send(session.is_connected());
            }
        }

        if stop.load(Ordering::Acquire) && cmd_rx.is_empty() {
            break;
        }
    }
    info!("交易网关 worker 退出");
}

/// dry-run 把卖单改写成远离盘口的 100 股跌停价买单并随即撤掉，
/// 只验证链路不留下意图
async fn place_order_inner(
    session: &Arc<dyn TradingSession>,
    order_book: &Arc<OrderBook>,
    cache: &Arc<MarketCache>,
    req: OrderRequest,
    dry_run: bool,
) -> String {
    let transformed = dry_run && req.side == OrderSide::Sell;
    let req = if transformed {
        let (_, down_limit) = cache.limits(&req.symbol);
        let price = if down_limit > 0.0 {
            down_limit
        } else {
            round2(req.price * 0.9)
        };
        OrderRequest {
            side: OrderSide::Buy,
            price,
            volume: 100,
            is_market: false,
            ..req
        }
    } else {
        req
    };

    let local_id = session.place_order(&req).await;
    if local_id.is_empty() {
        error!(
            "下单失败 {} {:?} vol={} remark={}",
            req.symbol, req.side, req.volume, req.remark
        );
        return local_id;
    }
    order_book.register(&local_id, &req);

    if transformed {
        let ok = session.cancel_order(&local_id).await;
        if ok {
            order_book.mark_canceling(&local_id);
        }
    }

    local_id
}
