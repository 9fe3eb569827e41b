//! REST drivers implementing [`exchange_core::Exchange`] for Binance, Gemini,
//! Kraken and Liqui.

pub mod binance;
pub mod factory;
pub mod gemini;
pub mod http;
pub mod kraken;
pub mod liqui;
pub mod utils;

pub use binance::Binance;
pub use factory::{build_exchange, build_registry, SUPPORTED_EXCHANGES};
pub use gemini::{CancelScope, Gemini, SessionRole};
pub use http::RestClient;
pub use kraken::Kraken;
pub use liqui::Liqui;
