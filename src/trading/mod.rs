pub mod api;
pub mod dispatcher;
pub mod gateway;
pub mod model;
pub mod order_book;
pub mod watchlist;

pub use api::{OrderEventCallback, TradingSession};
pub use dispatcher::{Dispatcher, OrderEventSink};
pub use gateway::TradingGateway;
pub use order_book::OrderBook;
