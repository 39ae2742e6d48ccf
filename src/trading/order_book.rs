use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::trading::model::{NotifyKind, Order, OrderEvent, OrderRequest, OrderStatus};

struct Inner {
    /// local_id -> 订单记录
    orders: HashMap<String, Order>,
    /// 系统单号 -> local_id
    system_to_local: HashMap<String, String>,
    /// 外部单的本地编号计数
    external_seq: u64,
}

/// 本进程的订单台账
///
/// 所有访问走一把锁；撤单扫尾以这里为权威，优先按 local_id 撤，
/// remark 匹配只做兜底。
pub struct OrderBook {
    inner: Mutex<Inner>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                orders: HashMap::new(),
                system_to_local: HashMap::new(),
                external_seq: 0,
            }),
        }
    }

    /// 网关下单成功后登记本地订单
    pub fn register(&self, local_id: &str, req: &OrderRequest) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .orders
            .insert(local_id.to_string(), Order::from_request(local_id.to_string(), req));
    }

    pub fn find_by_local(&self, local_id: &str) -> Option<Order> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.orders.get(local_id).cloned()
    }

    pub fn find_by_system(&self, system_id: &str) -> Option<Order> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let local = inner.system_to_local.get(system_id)?;
        inner.orders.get(local).cloned()
    }

    pub fn active_orders_for(&self, symbol: &str) -> Vec<Order> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .orders
            .values()
            .filter(|o| o.is_local && o.symbol == symbol && o.is_active())
            .cloned()
            .collect()
    }

    /// remark 前缀匹配的在途本地单（撤单扫尾的兜底路径）
    pub fn active_orders_with_remark(&self, remark_prefix: &str) -> Vec<Order> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .orders
            .values()
            .filter(|o| o.is_local && o.is_active() && o.remark.starts_with(remark_prefix))
            .cloned()
            .collect()
    }

    /// 撤单提交成功后置 Canceling；不在可撤状态则保持原状
    pub fn mark_canceling(&self, local_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(order) = inner.orders.get_mut(local_id) {
            if let Ok(next) = order.status.transition(OrderStatus::Canceling) {
                order.status = next;
            }
        }
    }

    /// 回报落账：补全 local_id / is_local，套状态机，返回更新后的记录。
    /// 找不到本地单的系统单号按外部单建档（is_local=false）。
    pub fn update_from_event(&self, evt: &mut OrderEvent) -> Option<Order> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // 关联：优先 local_id，其次系统单号
        let local_id = if !evt.local_id.is_empty() && inner.orders.contains_key(&evt.local_id) {
            evt.local_id.clone()
        } else if let Some(local) = inner.system_to_local.get(&evt.system_id) {
            local.clone()
        } else if evt.is_local && !evt.local_id.is_empty() {
            // 本地单号未登记（理论上不该发生），按外部处理
            warn!("回报带未登记的本地单号: {}", evt.local_id);
            evt.is_local = false;
            self::register_external(&mut inner, evt)
        } else {
            evt.is_local = false;
            self::register_external(&mut inner, evt)
        };

        evt.local_id = local_id.clone();

        // 先绑定系统单号（首个回报即携带）
        if !evt.system_id.is_empty() {
            inner
                .system_to_local
                .insert(evt.system_id.clone(), local_id.clone());
        }

        let order = inner.orders.get_mut(&local_id)?;
        if order.system_id.is_none() && !evt.system_id.is_empty() {
            order.system_id = Some(evt.system_id.clone());
        }
        evt.is_local = order.is_local;

        let target = match evt.kind {
            NotifyKind::Accepted => OrderStatus::Accepted,
            NotifyKind::Match => {
                order.apply_fill(evt.fill_volume, evt.fill_price);
                if order.filled_volume >= order.volume {
                    OrderStatus::Filled
                } else {
                    OrderStatus::PartialFilled
                }
            }
            NotifyKind::Cancelled => OrderStatus::Cancelled,
            NotifyKind::Rejected => OrderStatus::Rejected,
        };

        match order.status.transition(target) {
            Ok(next) => order.status = next,
            Err(e) => {
                // 乱序/重复回报：台账保持原状，事件照常分发
                debug!("忽略状态迁移 {}: {}", local_id, e);
            }
        }

        Some(order.clone())
    }
}

fn register_external(inner: &mut Inner, evt: &OrderEvent) -> String {
    inner.external_seq += 1;
    let local_id = if evt.system_id.is_empty() {
        format!("ext-{}", inner.external_seq)
    } else {
        format!("ext-{}", evt.system_id)
    };
    let order = Order {
        local_id: local_id.clone(),
        symbol: evt.symbol.clone(),
        side: evt.side,
        order_type: evt.order_type,
        price: evt.price,
        volume: evt.volume,
        remark: evt.remark.clone(),
        status: OrderStatus::Submitted,
        filled_volume: 0,
        filled_price: 0.0,
        last_fill_price: 0.0,
        system_id: if evt.system_id.is_empty() {
            None
        } else {
            Some(evt.system_id.clone())
        },
        is_local: false,
    };
    inner.orders.insert(local_id.clone(), order);
    local_id
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::model::{OrderSide, OrderType};

    fn sell_req(symbol: &str, remark: &str) -> OrderRequest {
        OrderRequest {
            account_id: "a".into(),
            symbol: symbol.into(),
            side: OrderSide::Sell,
            price: 10.0,
            volume: 500,
            is_market: false,
            remark: remark.into(),
        }
    }

    fn event(kind: NotifyKind, local: &str, system: &str) -> OrderEvent {
        OrderEvent {
            kind,
            local_id: local.into(),
            system_id: system.into(),
            symbol: "600000.SH".into(),
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            price: 10.0,
            volume: 500,
            fill_volume: 0,
            fill_price: 0.0,
            remark: "qh2h_sell_intraday_600000.SH".into(),
            is_local: true,
            err_msg: String::new(),
        }
    }

    #[test]
    fn correlates_system_id_after_first_confirm() {
        let book = OrderBook::new();
        book.register("L1", &sell_req("600000.SH", "qh2h_sell_intraday_600000.SH"));

        let mut acc = event(NotifyKind::Accepted, "L1", "SYS9");
        book.update_from_event(&mut acc).unwrap();
        assert_eq!(book.find_by_system("SYS9").unwrap().local_id, "L1");

        // 后续回报只带系统单号也能回到本地单
        let mut fill = event(NotifyKind::Match, "", "SYS9");
        fill.fill_volume = 200;
        fill.fill_price = 10.1;
        let order = book.update_from_event(&mut fill).unwrap();
        assert_eq!(order.local_id, "L1");
        assert_eq!(order.status, OrderStatus::PartialFilled);
        assert_eq!(order.filled_volume, 200);
        assert!(fill.is_local);
    }

    #[test]
    fn fills_reach_terminal() {
        let book = OrderBook::new();
        book.register("L1", &sell_req("600000.SH", "qh2h_sell_intraday_600000.SH"));
        let mut acc = event(NotifyKind::Accepted, "L1", "SYS1");
        book.update_from_event(&mut acc);

        let mut f1 = event(NotifyKind::Match, "L1", "SYS1");
        f1.fill_volume = 300;
        f1.fill_price = 10.0;
        assert_eq!(
            book.update_from_event(&mut f1).unwrap().status,
            OrderStatus::PartialFilled
        );

        let mut f2 = event(NotifyKind::Match, "L1", "SYS1");
        f2.fill_volume = 200;
        f2.fill_price = 10.2;
        let done = book.update_from_event(&mut f2).unwrap();
        assert_eq!(done.status, OrderStatus::Filled);
        assert_eq!(done.filled_volume, 500);
        assert!((done.filled_price - 10.08).abs() < 1e-9);
    }

    #[test]
    fn unknown_system_id_becomes_external() {
        let book = OrderBook::new();
        let mut evt = event(NotifyKind::Accepted, "", "SYS_X");
        evt.volume = 100;
        let order = book.update_from_event(&mut evt).unwrap();
        assert!(!order.is_local);
        assert!(!evt.is_local);
        assert_eq!(order.volume, 100);
        assert_eq!(book.find_by_system("SYS_X").unwrap().local_id, order.local_id);
    }

    #[test]
    fn canceling_only_from_live_states() {
        let book = OrderBook::new();
        book.register("L1", &sell_req("600000.SH", "r"));
        // Submitted 不可直接 Canceling
        book.mark_canceling("L1");
        assert_eq!(book.find_by_local("L1").unwrap().status, OrderStatus::Submitted);

        let mut acc = event(NotifyKind::Accepted, "L1", "S1");
        book.update_from_event(&mut acc);
        book.mark_canceling("L1");
        assert_eq!(book.find_by_local("L1").unwrap().status, OrderStatus::Canceling);

        let mut cancelled = event(NotifyKind::Cancelled, "L1", "S1");
        book.update_from_event(&mut cancelled);
        assert_eq!(book.find_by_local("L1").unwrap().status, OrderStatus::Cancelled);
        assert!(book.active_orders_for("600000.SH").is_empty());
    }

    #[test]
    fn remark_prefix_lookup() {
        let book = OrderBook::new();
        book.register("L1", &sell_req("600000.SH", "qh2h_close_600000.SH"));
        book.register("L2", &sell_req("000001.SZ", "qh2h_sell_intraday_000001.SZ"));
        let hits = book.active_orders_with_remark("qh2h_close_");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].local_id, "L1");
    }
}
