//! Headless core for a Solana copy-trading dashboard.
//!
//! The crate owns two live WebSocket streams (a per-token price feed and the
//! wallet tracker), a typed REST client for the trading backend, and the
//! shared stores a frontend reads its state from. Prices are validated and
//! smoothed before display, and aggregated into a bounded candle series.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod state;
pub mod stores;
pub mod tracker;

pub use config::DashboardConfig;
pub use error::AppError;
pub use state::Session;
