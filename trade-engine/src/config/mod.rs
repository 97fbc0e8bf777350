//! Configuration module

pub mod engine;

pub use engine::*;
