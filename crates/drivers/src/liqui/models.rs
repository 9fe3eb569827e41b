use std::collections::HashMap;

use exchange_core::{ExchangeError, Result};
use serde_json::Value;

/// Trade API envelope: `{"success": 1, "return": ...}` or
/// `{"success": 0, "error": "..."}`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TapiResponse<T> {
    pub success: i64,
    #[serde(rename = "return")]
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> TapiResponse<T> {
    pub fn into_result(self, exchange: &str) -> Result<T> {
        if self.success != 1 {
            let message = self.error.unwrap_or_else(|| "request failed".to_string());
            return Err(ExchangeError::business(exchange, message));
        }
        self.result
            .ok_or_else(|| ExchangeError::EmptyResponse(exchange.to_string()))
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Info {
    pub server_time: i64,
    pub pairs: HashMap<String, PairInfo>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PairInfo {
    pub decimal_places: i32,
    pub min_price: f64,
    pub max_price: f64,
    pub min_amount: f64,
    pub max_amount: f64,
    pub min_total: f64,
    #[serde(default)]
    pub hidden: i64,
    pub fee: f64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TickerEntry {
    pub high: f64,
    pub low: f64,
    pub avg: f64,
    pub vol: f64,
    pub vol_cur: f64,
    pub last: f64,
    pub buy: f64,
    pub sell: f64,
    pub updated: i64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DepthEntry {
    #[serde(default)]
    pub asks: Vec<Vec<Value>>,
    #[serde(default)]
    pub bids: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AccountFunds {
    pub funds: HashMap<String, f64>,
    #[serde(default)]
    pub open_orders: i64,
    #[serde(default)]
    pub server_time: i64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TradeResult {
    pub received: f64,
    pub remains: f64,
    pub order_id: i64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CancelResult {
    pub order_id: i64,
}

/// `amount` is what is left on the book, not the original size.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ActiveOrder {
    pub pair: String,
    #[serde(rename = "type")]
    pub side: String,
    pub amount: f64,
    pub rate: f64,
    pub timestamp_created: i64,
    pub status: i64,
}
