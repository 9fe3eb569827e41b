//! Binance REST driver.

mod client;
pub mod models;

pub use client::{Binance, BINANCE_API_URL};
