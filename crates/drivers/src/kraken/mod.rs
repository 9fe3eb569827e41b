//! Kraken REST driver.

mod client;
pub mod models;

pub use client::{normalize_asset, parse_pair_key, Kraken, KRAKEN_API_URL};
