use std::collections::HashMap;

use exchange_core::{ExchangeError, Result};
use serde_json::Value;

const RATE_LIMIT_ERRORS: [&str; 2] = ["EAPI:Rate limit exceeded", "EOrder:Rate limit exceeded"];

/// Every Kraken endpoint wraps its payload as `{"error": [...], "result": ...}`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct KrakenResponse<T> {
    #[serde(default)]
    pub error: Vec<String>,
    pub result: Option<T>,
}

impl<T> KrakenResponse<T> {
    pub fn into_result(self, exchange: &str) -> Result<T> {
        if self
            .error
            .iter()
            .any(|err| RATE_LIMIT_ERRORS.iter().any(|limit| err.starts_with(limit)))
        {
            return Err(ExchangeError::RateLimited);
        }
        if !self.error.is_empty() {
            return Err(ExchangeError::business(exchange, self.error.join(", ")));
        }
        self.result
            .ok_or_else(|| ExchangeError::EmptyResponse(exchange.to_string()))
    }
}

/// Arrays are `[price, whole lot volume, lot volume]` for `a`/`b`, and
/// `[today, last 24 hours]` for `v`, `l`, `h`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TickerEntry {
    pub a: Vec<String>,
    pub b: Vec<String>,
    pub c: Vec<String>,
    pub v: Vec<String>,
    pub l: Vec<String>,
    pub h: Vec<String>,
    #[serde(default)]
    pub o: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DepthEntry {
    pub asks: Vec<Vec<Value>>,
    pub bids: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AssetPair {
    pub altname: String,
    pub base: String,
    pub quote: String,
    pub pair_decimals: i32,
    pub lot_decimals: i32,
    #[serde(default)]
    pub ordermin: Option<String>,
    #[serde(default)]
    pub costmin: Option<String>,
}

pub type Balances = HashMap<String, String>;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AddOrderResult {
    pub txid: Vec<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CancelOrderResult {
    pub count: i64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct OpenOrders {
    #[serde(default)]
    pub open: HashMap<String, KrakenOrder>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct KrakenOrder {
    pub status: String,
    pub opentm: f64,
    pub descr: OrderDescription,
    pub vol: String,
    pub vol_exec: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct OrderDescription {
    pub pair: String,
    #[serde(rename = "type")]
    pub side: String,
    pub ordertype: String,
    pub price: String,
}
