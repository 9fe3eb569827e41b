//! Liqui REST driver.

mod client;
pub mod models;

pub use client::{Liqui, LIQUI_API_URL};
