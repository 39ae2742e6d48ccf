use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AppError;
use crate::trading::model::{Order, OrderEvent, OrderRequest, Position};

/// 券商回报回调（SDK 线程调用，必须轻量）
pub type OrderEventCallback = Arc<dyn Fn(OrderEvent) + Send + Sync>;

/// 券商交易会话能力接口
///
/// 实现不要求线程安全的串行化，上层统一经 TradingGateway 的单 worker 调用。
#[async_trait]
pub trait TradingSession: Send + Sync {
    async fn connect(
        &self,
        section: &str,
        port: i32,
        account: &str,
        password: &str,
    ) -> Result<(), AppError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// 下单。失败返回空 local_id，错误信息由实现记录
    async fn place_order(&self, req: &OrderRequest) -> String;

    /// 撤单。false 仅表示提交失败，订单状态不变；
    /// 成功与否以 Cancelled 回报为准
    async fn cancel_order(&self, local_id: &str) -> bool;

    async fn query_positions(&self) -> Vec<Position>;

    async fn query_orders(&self) -> Vec<Order>;

    async fn query_order(&self, local_id: &str) -> Option<Order>;

    /// 等待订单到达终态；超时返回当前状态
    async fn wait_order(&self, local_id: &str, timeout_ms: u64) -> Option<Order>;

    fn set_dry_run(&self, enable: bool);

    fn set_order_callback(&self, callback: OrderEventCallback);
}
