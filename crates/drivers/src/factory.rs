//! Builds drivers from configuration.

use std::sync::Arc;

use exchange_core::{
    AppConfig, Exchange, ExchangeConfig, ExchangeError, ExchangeRegistry, MarketDataCache, Result,
};
use tracing::warn;

use crate::binance::Binance;
use crate::gemini::Gemini;
use crate::kraken::Kraken;
use crate::liqui::Liqui;

pub const SUPPORTED_EXCHANGES: [&str; 4] = ["Binance", "Gemini", "Kraken", "Liqui"];

/// Driver for `config.name`, matched case-insensitively.
pub fn build_exchange(config: &ExchangeConfig, cache: Arc<MarketDataCache>) -> Result<Arc<dyn Exchange>> {
    let exchange: Arc<dyn Exchange> = match config.name.trim().to_ascii_lowercase().as_str() {
        "binance" => Arc::new(Binance::new(config, cache)?),
        "gemini" => Arc::new(Gemini::new(config, cache)?),
        "kraken" => Arc::new(Kraken::new(config, cache)?),
        "liqui" => Arc::new(Liqui::new(config, cache)?),
        other => {
            return Err(ExchangeError::Config(format!(
                "unknown exchange '{other}', expected one of {}",
                SUPPORTED_EXCHANGES.join(", ")
            )))
        }
    };
    Ok(exchange)
}

/// Registers a driver for every enabled exchange. Any construction failure
/// aborts startup.
pub fn build_registry(config: &AppConfig, cache: Arc<MarketDataCache>) -> Result<ExchangeRegistry> {
    let registry = ExchangeRegistry::new(Arc::clone(&cache));
    for exchange in &config.exchanges {
        if !exchange.enabled {
            warn!(exchange = %exchange.name, "exchange disabled, skipping");
            continue;
        }
        registry.register(build_exchange(exchange, Arc::clone(&cache))?)?;
    }
    Ok(registry)
}
