pub mod api;
pub mod cache;
pub mod types;

pub use api::MarketFeed;
pub use cache::MarketCache;
pub use types::{MarketSnapshot, RawMarketData, Transaction, TxSide};
