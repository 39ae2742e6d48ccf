mod common;

use common::{position, settle, setup_engine, snapshot};

use qh2h_runner::strategy::common::Pacing;
use qh2h_runner::strategy::{AuctionSellStrategy, SellModule};
use qh2h_runner::trading::model::{OrderSide, StockParams};

fn watch(symbol: &str, pre_close: f64, fb: i32, zb: i32, second: i32) -> StockParams {
    StockParams {
        shortname: symbol.to_string(),
        symbol: symbol.to_string(),
        trading_date: "2026-07-31".to_string(),
        avail_vol: 0,
        total_vol: 0,
        fb_flag: fb,
        zb_flag: zb,
        second_flag: second,
        pre_close,
    }
}

/// 封死票小量高开：P2 在 09:24 命中后按 ceil2(昨收×1.015) 挂单。
/// 用默认配置推导出的竞价档（input_amt=600000）跑，高价股也必须
/// 出得了一手
#[tokio::test]
async fn phase2_fb_sells_at_gaokai_price_with_default_pacing() {
    let harness = setup_engine(false);
    harness
        .session
        .set_positions(vec![position("600519.SH", 600, 600)]);

    // bid1×ask1量×100 = 9.14e6 < 1.5e7，且 bid1 >= 1827.00
    let mut snap = snapshot("600519.SH", 1800.0, 1827.05, 1827.10, 92400000);
    snap.ask_volume[0] = 50;
    snap.ask_volume[1] = 0;
    harness.cache.on_tick(snap);

    let strategy = AuctionSellStrategy::new(
        harness.context("10001", 300),
        vec![watch("600519.SH", 1800.0, 1, 0, 0)],
        0.5,
        0.1,
        Pacing::auction_from_input(600_000.0),
        20260731,
    );
    strategy.init().await.unwrap();

    // 每拍 12.5% 概率，多打几拍必然触发
    for _ in 0..400 {
        strategy.tick(92400).await.unwrap();
        if !harness.session.placed_order_ids().is_empty() {
            break;
        }
    }
    settle().await;

    let ids = harness.session.placed_order_ids();
    assert!(!ids.is_empty(), "P2 没有触发");
    let order = harness.session.order(&ids[0]).unwrap();
    assert_eq!(order.symbol, "600519.SH");
    assert_eq!(order.side, OrderSide::Sell);
    assert_eq!(order.price, 1827.00);
    // 包络装不下一手，放行的正好是一手
    assert_eq!(order.volume, 100);
    assert!(order.remark.starts_with("qh2h_sell_auction_"));

    let status = strategy.status();
    assert_eq!(status.intended_sell_vol, order.volume);
}

/// P1 整百向下取整：余量 300、比例 10% 凑不出一手，不下单
#[tokio::test]
async fn phase1_decile_floors_to_lot() {
    let harness = setup_engine(false);
    harness
        .session
        .set_positions(vec![position("000001.SZ", 600, 600)]);
    harness
        .cache
        .on_tick(snapshot("000001.SZ", 10.0, 10.10, 10.12, 92340000));

    let strategy = AuctionSellStrategy::new(
        harness.context("10001", 300),
        vec![watch("000001.SZ", 10.0, 1, 0, 0)],
        0.0,
        0.1,
        Pacing::auction_from_input(600_000.0),
        7,
    );
    strategy.init().await.unwrap();
    strategy.tick(92335).await.unwrap();
    settle().await;
    assert!(harness.session.placed_order_ids().is_empty());
}

/// P1 够一手时挂跌停价卖出一成
#[tokio::test]
async fn phase1_decile_sells_at_down_limit() {
    let harness = setup_engine(false);
    harness
        .session
        .set_positions(vec![position("000001.SZ", 10300, 10300)]);
    harness
        .cache
        .on_tick(snapshot("000001.SZ", 10.0, 10.10, 10.12, 92340000));

    let strategy = AuctionSellStrategy::new(
        harness.context("10001", 300),
        vec![watch("000001.SZ", 10.0, 1, 0, 0)],
        0.0,
        0.1,
        Pacing::auction_from_input(600_000.0),
        7,
    );
    strategy.init().await.unwrap();
    strategy.tick(92335).await.unwrap();
    settle().await;

    let ids = harness.session.placed_order_ids();
    assert_eq!(ids.len(), 1);
    let order = harness.session.order(&ids[0]).unwrap();
    // 跌停价 = 10 × 0.9
    assert_eq!(order.price, 9.0);
    // surplus 10000 的一成
    assert_eq!(order.volume, 1000);

    // 窗口内不重复下 P1 单
    strategy.tick(92336).await.unwrap();
    settle().await;
    assert_eq!(harness.session.placed_order_ids().len(), 1);
}

/// P3 涨停封板不牢：半仓挂 zt−0.01
#[tokio::test]
async fn phase3_limit_up_probe_sells_half_one_tick_below() {
    let harness = setup_engine(false);
    harness
        .session
        .set_positions(vec![position("000001.SZ", 2300, 2300)]);

    // 买一=涨停 11.00，买二无量，卖二有量
    let mut snap = snapshot("000001.SZ", 10.0, 11.0, 11.0, 92450000);
    snap.bid_volume[1] = 0;
    snap.ask_volume[1] = 500;
    harness.cache.on_tick(snap);

    let strategy = AuctionSellStrategy::new(
        harness.context("10001", 300),
        vec![watch("000001.SZ", 10.0, 1, 0, 0)],
        0.0,
        0.1,
        Pacing::auction_from_input(600_000.0),
        7,
    );
    strategy.init().await.unwrap();
    strategy.tick(92455).await.unwrap();
    settle().await;

    let ids = harness.session.placed_order_ids();
    assert_eq!(ids.len(), 1);
    let order = harness.session.order(&ids[0]).unwrap();
    assert_eq!(order.price, 10.99);
    assert_eq!(order.volume, 1000); // 2000 的一半
}

/// 窗口之外一根毛都不动
#[tokio::test]
async fn no_orders_outside_windows() {
    let harness = setup_engine(false);
    harness
        .session
        .set_positions(vec![position("000001.SZ", 10300, 10300)]);
    harness
        .cache
        .on_tick(snapshot("000001.SZ", 10.0, 10.10, 10.12, 92340000));

    let strategy = AuctionSellStrategy::new(
        harness.context("10001", 300),
        vec![watch("000001.SZ", 10.0, 1, 0, 0)],
        0.0,
        0.1,
        Pacing::auction_from_input(600_000.0),
        7,
    );
    strategy.init().await.unwrap();
    // 午休、盘前、收盘后
    for now in [91000, 120000, 150100, 92510] {
        strategy.tick(now).await.unwrap();
    }
    settle().await;
    assert!(harness.session.placed_order_ids().is_empty());
}

/// 09:26 采集后锁定 jjamt / 开盘价；快照晚于 09:27 时 jjamt 记 0
#[tokio::test]
async fn auction_data_latch_is_idempotent() {
    let harness = setup_engine(false);
    harness
        .session
        .set_positions(vec![position("000001.SZ", 600, 600)]);

    let mut snap = snapshot("000001.SZ", 10.0, 10.10, 10.12, 92650000);
    snap.open = 10.15;
    snap.turnover = 2.0e6;
    harness.cache.on_tick(snap);

    let strategy = AuctionSellStrategy::new(
        harness.context("10001", 300),
        vec![watch("000001.SZ", 10.0, 1, 0, 0)],
        0.0,
        0.1,
        Pacing::auction_from_input(600_000.0),
        7,
    );
    strategy.init().await.unwrap();
    strategy.tick(92700).await.unwrap();

    // 采集后更新快照不改变已锁定的值
    let mut later = snapshot("000001.SZ", 10.0, 10.2, 10.22, 93100000);
    later.open = 10.15;
    later.turnover = 9.9e7;
    harness.cache.on_tick(later);
    strategy.tick(92705).await.unwrap();

    let status = strategy.status();
    assert_eq!(status.tracked, 1);
    // sell_flag 被重置，等待开盘跟卖
    assert_eq!(status.done, 0);
}
