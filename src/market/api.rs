use async_trait::async_trait;

use crate::error::AppError;

/// 行情会话能力接口
///
/// SDK 绑定把收到的快照 / 逐笔推进 MarketCache；查询一律走缓存。
/// 订阅清单在会话期内固定，变更只能断开重连。
#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: i32,
        user: &str,
        password: &str,
    ) -> Result<(), AppError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// 设置订阅清单（connect 之前调用）
    fn set_watchlist(&self, symbols: &[String]);
}
