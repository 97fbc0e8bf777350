//! Data management module
//!
//! Candle model, rolling dataframes, the historical replay store and the
//! market data multiplexer.

pub mod candle;
pub mod storage;
pub mod subscription;

pub use candle::*;
pub use storage::*;
pub use subscription::*;
