//! Strategy implementations

pub mod ema_cross;

pub use ema_cross::*;
