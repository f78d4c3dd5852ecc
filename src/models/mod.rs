pub mod candle;
pub mod direction;
pub mod timeframe;
pub mod trade;

pub use candle::{calc_atr, Candle, CandleSeries};
pub use direction::*;
pub use timeframe::Timeframe;
pub use trade::AggTrade;
