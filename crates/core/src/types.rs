use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pair::CurrencyPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    /// Accepts the spellings exchanges use in order payloads (`buy`, `BUY`, `bid`, ...).
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "bid" => Some(OrderSide::Buy),
            "sell" | "ask" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => f.write_str("limit"),
            OrderType::Market => f.write_str("market"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Spot,
    Futures,
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetType::Spot => f.write_str("SPOT"),
            AssetType::Futures => f.write_str("FUTURES"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, amount: Decimal) -> Self {
        Self { price, amount }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub exchange: String,
    pub pair: CurrencyPair,
    pub asset_type: AssetType,
    /// Descending by price.
    pub bids: Vec<BookLevel>,
    /// Ascending by price.
    pub asks: Vec<BookLevel>,
    pub updated_at: DateTime<Utc>,
}

impl OrderBook {
    /// Builds a book stamped with the current time, sorting both sides into
    /// canonical order whatever order the exchange sent them in.
    pub fn new(
        exchange: impl Into<String>,
        pair: CurrencyPair,
        asset_type: AssetType,
        mut bids: Vec<BookLevel>,
        mut asks: Vec<BookLevel>,
    ) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            exchange: exchange.into(),
            pair,
            asset_type,
            bids,
            asks,
            updated_at: Utc::now(),
        }
    }

    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub exchange: String,
    pub pair: CurrencyPair,
    pub asset_type: AssetType,
    pub ask: Decimal,
    pub bid: Decimal,
    pub last: Decimal,
    /// Daily range; `None` when the exchange's ticker does not report one.
    pub low: Option<Decimal>,
    pub high: Option<Decimal>,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCurrency {
    pub currency: String,
    pub total: Decimal,
    pub available: Decimal,
    pub hold: Decimal,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    pub exchange: String,
    pub currencies: Vec<AccountCurrency>,
}
