use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, Result};
use crate::pair::CurrencyPair;

/// Reported for decimal places the exchange does not declare. Zero is a real
/// answer ("whole units only"), so absence needs its own value.
pub const UNDEFINED_DECIMAL_PLACES: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairLimits {
    pub price_decimal_places: i32,
    pub amount_decimal_places: i32,
    pub min_amount: Option<Decimal>,
    /// Minimum `amount * price`.
    pub min_total: Option<Decimal>,
}

impl Default for PairLimits {
    fn default() -> Self {
        Self {
            price_decimal_places: UNDEFINED_DECIMAL_PLACES,
            amount_decimal_places: UNDEFINED_DECIMAL_PLACES,
            min_amount: None,
            min_total: None,
        }
    }
}

impl PairLimits {
    pub fn new(price_decimal_places: i32, amount_decimal_places: i32) -> Self {
        Self {
            price_decimal_places,
            amount_decimal_places,
            ..Self::default()
        }
    }

    pub fn with_min_amount(mut self, min_amount: Decimal) -> Self {
        self.min_amount = Some(min_amount);
        self
    }

    pub fn with_min_total(mut self, min_total: Decimal) -> Self {
        self.min_total = Some(min_total);
        self
    }
}

/// Decimal places implied by an increment such as a tick or lot size:
/// `0.01000000` -> 2, `1.00000000` -> 0.
pub fn decimal_places_of_step(step: Decimal) -> i32 {
    if step.is_zero() {
        return UNDEFINED_DECIMAL_PLACES;
    }
    step.normalize().scale() as i32
}

/// Per-pair precision and minimums for one exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencyLimits {
    exchange: String,
    pairs: HashMap<CurrencyPair, PairLimits>,
}

impl CurrencyLimits {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            pairs: HashMap::new(),
        }
    }

    pub fn with(mut self, pair: CurrencyPair, limits: PairLimits) -> Self {
        self.insert(pair, limits);
        self
    }

    pub fn insert(&mut self, pair: CurrencyPair, limits: PairLimits) {
        self.pairs.insert(pair, limits);
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn get(&self, pair: &CurrencyPair) -> Option<&PairLimits> {
        self.pairs.get(pair)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&CurrencyPair, &PairLimits)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// [`UNDEFINED_DECIMAL_PLACES`] when the pair or the field is unknown.
    pub fn price_decimal_places(&self, pair: &CurrencyPair) -> i32 {
        self.get(pair)
            .map_or(UNDEFINED_DECIMAL_PLACES, |limits| limits.price_decimal_places)
    }

    pub fn amount_decimal_places(&self, pair: &CurrencyPair) -> i32 {
        self.get(pair)
            .map_or(UNDEFINED_DECIMAL_PLACES, |limits| limits.amount_decimal_places)
    }

    pub fn min_amount(&self, pair: &CurrencyPair) -> Option<Decimal> {
        self.get(pair).and_then(|limits| limits.min_amount)
    }

    pub fn min_total(&self, pair: &CurrencyPair) -> Option<Decimal> {
        self.get(pair).and_then(|limits| limits.min_total)
    }

    /// Rounds to the nearest allowed price; unchanged when precision is undeclared.
    pub fn round_price(&self, pair: &CurrencyPair, price: Decimal) -> Decimal {
        match u32::try_from(self.price_decimal_places(pair)) {
            Ok(dp) => price.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
            Err(_) => price,
        }
    }

    /// Truncates, so a rounded amount never exceeds what the caller holds.
    pub fn round_amount(&self, pair: &CurrencyPair, amount: Decimal) -> Decimal {
        match u32::try_from(self.amount_decimal_places(pair)) {
            Ok(dp) => amount.round_dp_with_strategy(dp, RoundingStrategy::ToZero),
            Err(_) => amount,
        }
    }

    /// Checks declared precision and minimums. Undeclared constraints pass.
    pub fn validate_order(&self, pair: &CurrencyPair, amount: Decimal, price: Decimal) -> Result<()> {
        let Some(limits) = self.get(pair) else {
            return Ok(());
        };

        if exceeds_places(price, limits.price_decimal_places) {
            return Err(self.violation(pair, format!(
                "price {price} has more than {} decimal places",
                limits.price_decimal_places
            )));
        }
        if exceeds_places(amount, limits.amount_decimal_places) {
            return Err(self.violation(pair, format!(
                "amount {amount} has more than {} decimal places",
                limits.amount_decimal_places
            )));
        }
        if let Some(min_amount) = limits.min_amount {
            if amount < min_amount {
                return Err(self.violation(pair, format!("amount {amount} is below minimum {min_amount}")));
            }
        }
        if let Some(min_total) = limits.min_total {
            let total = amount * price;
            if total < min_total {
                return Err(self.violation(pair, format!("total {total} is below minimum {min_total}")));
            }
        }
        Ok(())
    }

    fn violation(&self, pair: &CurrencyPair, detail: String) -> ExchangeError {
        ExchangeError::Limits(format!("{} {pair}: {detail}", self.exchange))
    }
}

fn exceeds_places(value: Decimal, places: i32) -> bool {
    match u32::try_from(places) {
        Ok(places) => value.normalize().scale() > places,
        Err(_) => false,
    }
}
