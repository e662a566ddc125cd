// src/storage/mod.rs

pub mod db;
pub mod schema;

pub use db::{connect, Ledger};

/// Default retention window for the cleanup sweep, in days.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;
