mod common;

use std::sync::atomic::Ordering;

use common::{position, settle, setup_engine, snapshot};

use qh2h_runner::trading::model::{OrderRequest, OrderSide, OrderStatus};

fn sell_req(symbol: &str, price: f64, volume: i64) -> OrderRequest {
    OrderRequest {
        account_id: "10001".to_string(),
        symbol: symbol.to_string(),
        side: OrderSide::Sell,
        price,
        volume,
        is_market: false,
        remark: format!("qh2h_sell_intraday_{symbol}"),
    }
}

/// dry-run：卖单变成 100 股跌停价买单并随即撤掉
#[tokio::test]
async fn dry_run_transforms_sell_into_cancelled_probe_buy() {
    let harness = setup_engine(true);
    harness
        .session
        .set_positions(vec![position("600000.SH", 1000, 1000)]);
    harness
        .cache
        .on_tick(snapshot("600000.SH", 10.0, 10.2, 10.22, 93100000));

    let local_id = harness
        .gateway
        .place_order(sell_req("600000.SH", 10.21, 500))
        .await;
    assert!(!local_id.is_empty());
    settle().await;

    let order = harness.session.order(&local_id).unwrap();
    assert_eq!(order.side, OrderSide::Buy);
    assert_eq!(order.volume, 100);
    // 行情里有跌停价就用跌停价
    assert_eq!(order.price, 9.00);
    assert_eq!(order.status, OrderStatus::Cancelled);
}

/// dry-run 没有行情时退回 0.9 × 委托价
#[tokio::test]
async fn dry_run_falls_back_to_ninety_percent() {
    let harness = setup_engine(true);
    harness
        .session
        .set_positions(vec![position("600000.SH", 1000, 1000)]);

    let local_id = harness
        .gateway
        .place_order(sell_req("600000.SH", 10.0, 500))
        .await;
    settle().await;
    let order = harness.session.order(&local_id).unwrap();
    assert_eq!(order.price, 9.00);
    assert_eq!(order.volume, 100);
}

/// 调用顺序 = 柜台看到的顺序
#[tokio::test]
async fn operations_reach_broker_in_submission_order() {
    let harness = setup_engine(false);
    harness
        .session
        .set_positions(vec![position("600000.SH", 100000, 100000)]);

    let mut submitted = Vec::new();
    for i in 1..=20 {
        let id = harness
            .gateway
            .place_order(sell_req("600000.SH", 10.0 + i as f64 * 0.01, 100))
            .await;
        submitted.push(id);
    }
    assert_eq!(harness.session.placed_order_ids(), submitted);
}

/// 回报落账：确认、部分成交、全成的状态与加权均价
#[tokio::test]
async fn events_reconcile_into_order_book() {
    let harness = setup_engine(false);
    harness
        .session
        .set_positions(vec![position("600000.SH", 1000, 1000)]);

    let local_id = harness
        .gateway
        .place_order(sell_req("600000.SH", 10.0, 500))
        .await;
    settle().await;
    assert_eq!(
        harness.order_book.find_by_local(&local_id).unwrap().status,
        OrderStatus::Accepted
    );

    harness.session.fill(&local_id, 200, 10.00);
    settle().await;
    let order = harness.order_book.find_by_local(&local_id).unwrap();
    assert_eq!(order.status, OrderStatus::PartialFilled);
    assert_eq!(order.filled_volume, 200);

    harness.session.fill(&local_id, 300, 10.10);
    settle().await;
    let order = harness.order_book.find_by_local(&local_id).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_volume, 500);
    assert!((order.filled_price - 10.06).abs() < 1e-9);
    assert_eq!(order.last_fill_price, 10.10);
}

/// 停止位拉起后网关拒绝新任务
#[tokio::test]
async fn gateway_refuses_after_stop() {
    let harness = setup_engine(false);
    harness
        .session
        .set_positions(vec![position("600000.SH", 1000, 1000)]);

    harness.stop.store(true, Ordering::Release);
    let local_id = harness
        .gateway
        .place_order(sell_req("600000.SH", 10.0, 100))
        .await;
    assert!(local_id.is_empty());
    assert!(harness.session.placed_order_ids().is_empty());
    assert!(harness.gateway.query_positions().await.is_empty());
}
