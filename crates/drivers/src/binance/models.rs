use serde_json::Value;

/// Error body Binance sends alongside a 4xx status.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BinanceError {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "filterType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolFilter {
    #[serde(rename_all = "camelCase")]
    PriceFilter { tick_size: String },
    #[serde(rename_all = "camelCase")]
    LotSize { min_qty: String, step_size: String },
    #[serde(rename_all = "camelCase")]
    MinNotional { min_notional: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    pub last_price: String,
    pub bid_price: String,
    pub ask_price: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    pub close_time: i64,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Depth {
    pub last_update_id: i64,
    pub bids: Vec<Vec<Value>>,
    pub asks: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Account {
    pub balances: Vec<Balance>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

/// `newOrderRespType=ACK` response.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub symbol: String,
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceOrder {
    pub symbol: String,
    pub order_id: i64,
    pub price: String,
    pub orig_qty: String,
    pub executed_qty: String,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    /// Milliseconds.
    pub time: i64,
}
