use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

/// 订单状态机，非法迁移由 transition 拒绝
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    Accepted,
    PartialFilled,
    Filled,
    Canceling,
    Cancelled,
    Rejected,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("非法订单状态迁移: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// 沿许可的 DAG 迁移；重复回报（同状态）按幂等处理
    pub fn transition(self, to: OrderStatus) -> Result<OrderStatus, IllegalTransition> {
        use OrderStatus::*;
        let ok = match (self, to) {
            (from, next) if from == next && !from.is_terminal() => true,
            (Submitted, Accepted) | (Submitted, Rejected) => true,
            (Accepted, PartialFilled)
            | (Accepted, Filled)
            | (Accepted, Canceling)
            | (Accepted, Cancelled)
            | (Accepted, Rejected) => true,
            (PartialFilled, Filled) | (PartialFilled, Canceling) | (PartialFilled, Cancelled) => {
                true
            }
            // 撤单在途时仍可能有成交回报落地
            (Canceling, Cancelled) | (Canceling, PartialFilled) | (Canceling, Filled) => true,
            _ => false,
        };
        if ok {
            Ok(to)
        } else {
            Err(IllegalTransition { from: self, to })
        }
    }
}

/// 下单请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub volume: i64,
    pub is_market: bool,
    /// 路由键，必填；撤单与回报追踪都靠它
    pub remark: String,
}

/// 券商回报类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyKind {
    /// 委托确认
    Accepted,
    /// 成交
    Match,
    /// 撤单确认
    Cancelled,
    /// 废单
    Rejected,
}

/// 券商回报（经网关补全 local_id 后进入分发队列）
#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub kind: NotifyKind,
    /// 本地单号；外部单为空
    pub local_id: String,
    /// 交易所/柜台系统单号
    pub system_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: f64,
    pub volume: i64,
    /// 本笔成交量（仅 Match）
    pub fill_volume: i64,
    /// 本笔成交价（仅 Match）
    pub fill_price: f64,
    pub remark: String,
    /// 是否本进程发出的单
    pub is_local: bool,
    pub err_msg: String,
}

impl OrderEvent {
    pub fn route_remark(&self) -> &str {
        &self.remark
    }
}

/// 本地订单记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub local_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: f64,
    pub volume: i64,
    pub remark: String,
    pub status: OrderStatus,
    pub filled_volume: i64,
    /// 成交量加权均价
    pub filled_price: f64,
    pub last_fill_price: f64,
    /// 首次委托确认回报带回
    pub system_id: Option<String>,
    pub is_local: bool,
}

impl Order {
    pub fn from_request(local_id: String, req: &OrderRequest) -> Self {
        Self {
            local_id,
            symbol: req.symbol.clone(),
            side: req.side,
            order_type: if req.is_market {
                OrderType::Market
            } else {
                OrderType::Limit
            },
            price: req.price,
            volume: req.volume,
            remark: req.remark.clone(),
            status: OrderStatus::Submitted,
            filled_volume: 0,
            filled_price: 0.0,
            last_fill_price: 0.0,
            system_id: None,
            is_local: true,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// 套用一笔成交回报，重算加权均价与状态
    pub fn apply_fill(&mut self, fill_volume: i64, fill_price: f64) {
        if fill_volume <= 0 {
            return;
        }
        let prev_amt = self.filled_price * self.filled_volume as f64;
        self.filled_volume += fill_volume;
        if self.filled_volume > 0 {
            self.filled_price =
                (prev_amt + fill_price * fill_volume as f64) / self.filled_volume as f64;
        }
        self.last_fill_price = fill_price;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_dag() {
        use OrderStatus::*;
        assert_eq!(Submitted.transition(Accepted), Ok(Accepted));
        assert_eq!(Submitted.transition(Rejected), Ok(Rejected));
        assert_eq!(Accepted.transition(PartialFilled), Ok(PartialFilled));
        assert_eq!(PartialFilled.transition(Filled), Ok(Filled));
        assert_eq!(Accepted.transition(Canceling), Ok(Canceling));
        assert_eq!(Canceling.transition(Cancelled), Ok(Cancelled));

        assert!(Submitted.transition(Filled).is_err());
        assert!(Filled.transition(Cancelled).is_err());
        assert!(Cancelled.transition(Accepted).is_err());
        assert!(Submitted.transition(Canceling).is_err());
        // 重复回报幂等
        assert_eq!(Accepted.transition(Accepted), Ok(Accepted));
        assert!(Filled.transition(Filled).is_err());
    }

    #[test]
    fn weighted_fill_price() {
        let req = OrderRequest {
            account_id: "a".into(),
            symbol: "600000.SH".into(),
            side: OrderSide::Sell,
            price: 10.0,
            volume: 300,
            is_market: false,
            remark: "qh2h_sell_intraday_600000.SH".into(),
        };
        let mut order = Order::from_request("L1".into(), &req);
        order.apply_fill(100, 10.0);
        order.apply_fill(200, 10.3);
        assert_eq!(order.filled_volume, 300);
        assert!((order.filled_price - 10.2).abs() < 1e-9);
        assert_eq!(order.last_fill_price, 10.3);
    }
}
