pub mod paper;

pub use paper::{LoopbackMarketFeed, PaperTradingSession};
