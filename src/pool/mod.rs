// src/pool/mod.rs

pub mod params;
pub mod reader;

pub use params::{PoolParams, PoolStatus};
pub use reader::PoolReader;
