//! Order lifecycle module
//!
//! Order creation and reconciliation, position accounting, trade statistics
//! and the order event feed.

pub mod controller;
pub mod feed;
pub mod position;
pub mod summary;

pub use controller::*;
pub use feed::*;
pub use position::*;
pub use summary::*;
