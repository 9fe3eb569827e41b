use std::collections::HashMap;

use serde_json::Value;

/// Shape of every Gemini failure: `{"result": "error", "reason": ..., "message": ...}`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ErrorCapture {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorCapture {
    /// `Some(message)` when `value` is an error envelope rather than a payload.
    pub fn from_value(value: &Value) -> Option<String> {
        let object = value.as_object()?;
        if !object.contains_key("result") && !object.contains_key("reason") {
            return None;
        }
        let capture: ErrorCapture = serde_json::from_value(value.clone()).ok()?;
        if capture.result == "ok" || (capture.result.is_empty() && capture.reason.is_empty()) {
            return None;
        }
        Some(if capture.message.is_empty() {
            capture.reason
        } else {
            capture.message
        })
    }
}

/// `/v1/pubticker/{symbol}`. The volume map is keyed by currency code plus a
/// `timestamp` in milliseconds.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PubTicker {
    pub ask: String,
    pub bid: String,
    pub last: String,
    #[serde(default)]
    pub volume: HashMap<String, Value>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BookEntry {
    pub price: String,
    pub amount: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Book {
    pub bids: Vec<BookEntry>,
    pub asks: Vec<BookEntry>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Balance {
    pub currency: String,
    pub amount: String,
    pub available: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct GeminiOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub price: String,
    pub original_amount: String,
    pub executed_amount: String,
    pub remaining_amount: String,
    pub is_live: bool,
    pub is_cancelled: bool,
    pub timestampms: i64,
}

impl GeminiOrder {
    /// Gemini reports state as flags; this folds them into one word.
    pub fn status_word(&self) -> &'static str {
        if self.is_live {
            "live"
        } else if self.is_cancelled {
            "cancelled"
        } else {
            "closed"
        }
    }
}

/// Reply to `order/cancel/session` and `order/cancel/all`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CancelAllResult {
    pub result: String,
    pub details: CancelDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelDetails {
    #[serde(default)]
    pub cancelled_orders: Vec<i64>,
    #[serde(default)]
    pub cancel_rejects: Vec<i64>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Heartbeat {
    pub result: String,
}
