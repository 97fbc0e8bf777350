//! Strategy engine module
//!
//! Strategy contract, capability tagging and per-pair dispatch.

pub mod base;
pub mod controller;
pub mod implementations;

pub use base::*;
pub use controller::*;
pub use implementations::*;
