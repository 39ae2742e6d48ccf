pub mod order;
pub mod stock;

pub use order::{
    IllegalTransition, NotifyKind, Order, OrderEvent, OrderRequest, OrderSide, OrderStatus,
    OrderType,
};
pub use stock::{
    extract_code, normalize_symbol, pass_code_filter, Position, StockParams, StockRuntime,
};
