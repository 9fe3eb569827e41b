//! Canonical order records and the raw-status vocabularies that feed them.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pair::CurrencyPair;
use crate::types::{OrderSide, OrderType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Active,
    Filled,
    Aborted,
    Unknown,
}

impl OrderStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Active)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrderStatus::Active => "active",
            OrderStatus::Filled => "filled",
            OrderStatus::Aborted => "aborted",
            OrderStatus::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Raw status words mapped onto [`OrderStatus`].
///
/// Lookup is total: anything not in the table is `Unknown`, never `Active`.
#[derive(Debug, Clone, Default)]
pub struct StatusVocabulary {
    entries: HashMap<String, OrderStatus>,
}

impl StatusVocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared words every exchange uses in some spelling.
    pub fn standard() -> Self {
        Self::new()
            .with(["new", "partially-filled", "open"], OrderStatus::Active)
            .with(["filled"], OrderStatus::Filled)
            .with(
                ["canceled", "pending-cancel", "expired", "rejected"],
                OrderStatus::Aborted,
            )
    }

    pub fn with<I, S>(mut self, raw: I, status: OrderStatus) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in raw {
            self.entries.insert(normalize_word(word.as_ref()), status);
        }
        self
    }

    /// `PARTIALLY_FILLED`, `partially filled` and `partially-filled` are the
    /// same word.
    pub fn status(&self, raw: &str) -> OrderStatus {
        self.entries
            .get(&normalize_word(raw))
            .copied()
            .unwrap_or(OrderStatus::Unknown)
    }
}

fn normalize_word(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '_' | ' ' => '-',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub pair: CurrencyPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub amount: Decimal,
    pub filled_amount: Decimal,
    pub remaining_amount: Decimal,
    pub rate: Decimal,
    pub created_at: DateTime<Utc>,
}

/// What a caller asks a driver to place. `price` is `None` for market orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub pair: CurrencyPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Option<Decimal>,
}

impl OrderRequest {
    pub fn limit(pair: CurrencyPair, side: OrderSide, amount: Decimal, price: Decimal) -> Self {
        Self {
            pair,
            side,
            order_type: OrderType::Limit,
            amount,
            price: Some(price),
        }
    }

    pub fn market(pair: CurrencyPair, side: OrderSide, amount: Decimal) -> Self {
        Self {
            pair,
            side,
            order_type: OrderType::Market,
            amount,
            price: None,
        }
    }
}

/// An order as a driver decoded it, before status normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOrder {
    pub id: String,
    pub pair: CurrencyPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub raw_status: String,
    pub amount: Decimal,
    pub filled_amount: Decimal,
    /// Set when the exchange reports it directly instead of leaving it to be
    /// derived from amount and fill.
    pub remaining_amount: Option<Decimal>,
    pub rate: Decimal,
    pub created_at: DateTime<Utc>,
}

impl RawOrder {
    pub fn normalize(self, vocabulary: &StatusVocabulary) -> Order {
        let remaining = self
            .remaining_amount
            .unwrap_or(self.amount - self.filled_amount)
            .max(Decimal::ZERO);

        // A fully consumed order is filled whatever the exchange still says.
        let status = if remaining.is_zero() {
            OrderStatus::Filled
        } else {
            vocabulary.status(&self.raw_status)
        };

        Order {
            id: self.id,
            pair: self.pair,
            side: self.side,
            order_type: self.order_type,
            status,
            amount: self.amount,
            filled_amount: self.filled_amount,
            remaining_amount: remaining,
            rate: self.rate,
            created_at: self.created_at,
        }
    }
}
