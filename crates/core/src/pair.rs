//! Canonical currency pairs and the per-exchange spelling rules used to render
//! and parse them.
//!
//! A [`CurrencyPair`] is the identity used everywhere inside the core, including
//! as the market data cache key. Exchange symbols such as `ETHBTC`, `eth_btc`
//! or `ETH/BTC` are only produced and consumed at the edges through a
//! [`PairFormat`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ExchangeError, Result};

const DEFAULT_LIST_SEPARATOR: &str = ",";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyPair {
    base: String,
    quote: String,
}

impl CurrencyPair {
    /// Codes are trimmed and upper-cased, so `eth`/`ETH` build the same pair.
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self {
            base: base.as_ref().trim().to_ascii_uppercase(),
            quote: quote.as_ref().trim().to_ascii_uppercase(),
        }
    }

    /// Amount currency.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Price currency.
    pub fn quote(&self) -> &str {
        &self.quote
    }

    pub fn display(&self, delimiter: &str, uppercase: bool) -> String {
        let rendered = format!("{}{}{}", self.base, delimiter, self.quote);
        if uppercase {
            rendered
        } else {
            rendered.to_ascii_lowercase()
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Parses the human spellings `ETH/BTC`, `ETH-BTC` and `eth_btc`.
impl FromStr for CurrencyPair {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        for delimiter in ["/", "-", "_"] {
            if s.contains(delimiter) {
                return PairFormat::new(delimiter, true).parse(s, &CurrencyCatalog::open());
            }
        }
        PairFormat::new("", true).parse(s, &CurrencyCatalog::open())
    }
}

impl TryFrom<String> for CurrencyPair {
    type Error = ExchangeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CurrencyPair> for String {
    fn from(pair: CurrencyPair) -> Self {
        pair.to_string()
    }
}

/// Spelling rules for one direction of traffic with an exchange (outbound
/// requests or persisted config).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PairFormat {
    pub delimiter: String,
    pub uppercase: bool,
    /// Joins several pairs in one request, e.g. Kraken's `XETHZUSD,XXBTZUSD`.
    pub separator: String,
}

impl PairFormat {
    pub fn new(delimiter: impl Into<String>, uppercase: bool) -> Self {
        Self {
            delimiter: delimiter.into(),
            uppercase,
            separator: String::new(),
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn format(&self, pair: &CurrencyPair) -> String {
        pair.display(&self.delimiter, self.uppercase)
    }

    pub fn format_list(&self, pairs: &[CurrencyPair]) -> String {
        pairs
            .iter()
            .map(|pair| self.format(pair))
            .collect::<Vec<_>>()
            .join(self.list_separator())
    }

    /// Inverse of [`PairFormat::format`]. Matching is case-insensitive; the
    /// symbol must split into exactly two codes known to `catalog`.
    pub fn parse(&self, symbol: &str, catalog: &CurrencyCatalog) -> Result<CurrencyPair> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(ExchangeError::Format("empty currency pair".into()));
        }

        if !self.delimiter.is_empty() {
            let parts: Vec<&str> = symbol.split(self.delimiter.as_str()).collect();
            if parts.len() != 2 {
                return Err(ExchangeError::Format(format!(
                    "'{symbol}' does not split into two currencies on '{}'",
                    self.delimiter
                )));
            }
            let (base, quote) = (parts[0], parts[1]);
            if !catalog.accepts(base) || !catalog.accepts(quote) {
                return Err(ExchangeError::Format(format!(
                    "'{symbol}' contains an unknown currency code"
                )));
            }
            return Ok(CurrencyPair::new(base, quote));
        }

        if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ExchangeError::Format(format!(
                "'{symbol}' contains invalid characters"
            )));
        }
        catalog.split(symbol)
    }

    pub fn parse_list(&self, symbols: &str, catalog: &CurrencyCatalog) -> Result<Vec<CurrencyPair>> {
        symbols
            .split(self.list_separator())
            .map(str::trim)
            .filter(|symbol| !symbol.is_empty())
            .map(|symbol| self.parse(symbol, catalog))
            .collect()
    }

    fn list_separator(&self) -> &str {
        if self.separator.is_empty() {
            DEFAULT_LIST_SEPARATOR
        } else {
            &self.separator
        }
    }
}

/// Set of currency codes an exchange is known to trade.
///
/// An open catalog accepts any well-formed code. Its codes, if any, are only
/// hints for splitting delimiter-less symbols; with no usable hint the first
/// three characters are taken as the base.
#[derive(Debug, Clone, Default)]
pub struct CurrencyCatalog {
    codes: HashSet<String>,
    open: bool,
}

impl CurrencyCatalog {
    pub fn open() -> Self {
        Self {
            codes: HashSet::new(),
            open: true,
        }
    }

    /// Open catalog that prefers splitting on `codes`.
    pub fn hinted<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = Self::open();
        catalog.extend(codes);
        catalog
    }

    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = Self::default();
        catalog.extend(codes);
        catalog
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a CurrencyPair>) -> Self {
        let mut catalog = Self::default();
        for pair in pairs {
            catalog.insert(pair.base());
            catalog.insert(pair.quote());
        }
        catalog
    }

    pub fn insert(&mut self, code: impl AsRef<str>) {
        let code = code.as_ref().trim();
        if !code.is_empty() {
            self.codes.insert(code.to_ascii_uppercase());
        }
    }

    pub fn extend<I, S>(&mut self, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for code in codes {
            self.insert(code);
        }
    }

    pub fn is_open(&self) -> bool {
        self.open || self.codes.is_empty()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(&code.to_ascii_uppercase())
    }

    fn accepts(&self, code: &str) -> bool {
        let well_formed = !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric());
        well_formed && (self.is_open() || self.contains(code))
    }

    fn split(&self, symbol: &str) -> Result<CurrencyPair> {
        let known = self.split_points(symbol, |base, quote| self.contains(base) && self.contains(quote));
        match known.as_slice() {
            [idx] => return Ok(split_at(symbol, *idx)),
            [] => {}
            _ => {
                return Err(ExchangeError::Format(format!(
                    "'{symbol}' splits ambiguously into known currency codes"
                )))
            }
        }

        if !self.is_open() {
            return Err(ExchangeError::Format(format!(
                "'{symbol}' is not made of two known currency codes"
            )));
        }

        // Hints are usually quote currencies, so a known suffix wins.
        for hint in [
            self.split_points(symbol, |_, quote| self.contains(quote)),
            self.split_points(symbol, |base, _| self.contains(base)),
        ] {
            if let [idx] = hint.as_slice() {
                return Ok(split_at(symbol, *idx));
            }
        }

        if symbol.len() > 3 {
            return Ok(split_at(symbol, 3));
        }
        Err(ExchangeError::Format(format!(
            "cannot split '{symbol}' into two currencies"
        )))
    }

    fn split_points(&self, symbol: &str, matches: impl Fn(&str, &str) -> bool) -> Vec<usize> {
        (1..symbol.len())
            .filter(|&idx| matches(&symbol[..idx], &symbol[idx..]))
            .collect()
    }
}

fn split_at(symbol: &str, idx: usize) -> CurrencyPair {
    CurrencyPair::new(&symbol[..idx], &symbol[idx..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn catalog() -> CurrencyCatalog {
        CurrencyCatalog::from_codes(["ETH", "BTC", "USD", "LTC", "USDT"])
    }

    #[test]
    fn pairs_compare_case_insensitively() {
        assert_eq!(CurrencyPair::new("eth", "btc"), CurrencyPair::new("ETH", "BTC"));
        assert_ne!(CurrencyPair::new("ETH", "BTC"), CurrencyPair::new("BTC", "ETH"));
    }

    #[rstest]
    #[case(PairFormat::new("/", true), "ETH/BTC")]
    #[case(PairFormat::new("", true), "ETHBTC")]
    #[case(PairFormat::new("_", false), "eth_btc")]
    #[case(PairFormat::new("-", false), "eth-btc")]
    fn display_follows_format(#[case] format: PairFormat, #[case] expected: &str) {
        assert_eq!(format.format(&CurrencyPair::new("ETH", "BTC")), expected);
    }

    #[rstest]
    #[case("ETHBTC", "ETH", "BTC")]
    #[case("ethusd", "ETH", "USD")]
    #[case("ETHUSDT", "ETH", "USDT")]
    #[case("LTCBTC", "LTC", "BTC")]
    fn delimiterless_symbols_split_on_known_codes(
        #[case] symbol: &str,
        #[case] base: &str,
        #[case] quote: &str,
    ) {
        let pair = PairFormat::new("", true).parse(symbol, &catalog()).unwrap();
        assert_eq!(pair, CurrencyPair::new(base, quote));
    }

    #[rstest]
    #[case("", "/")]
    #[case("ETH/BTC/USD", "/")]
    #[case("ETH/", "/")]
    #[case("XRPBTC", "")]
    #[case("ETH-BTC", "")]
    fn malformed_symbols_are_format_errors(#[case] symbol: &str, #[case] delimiter: &str) {
        let err = PairFormat::new(delimiter, true)
            .parse(symbol, &catalog())
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Format(_)), "{err:?}");
    }

    #[rstest]
    #[case("ETHUSDT", "ETH", "USDT")]
    #[case("DASHBTC", "DASH", "BTC")]
    #[case("USDTBTC", "USDT", "BTC")]
    #[case("ETHBTC", "ETH", "BTC")]
    #[case("XMREUR", "XMR", "EUR")]
    fn hinted_catalog_splits_unknown_bases(
        #[case] symbol: &str,
        #[case] base: &str,
        #[case] quote: &str,
    ) {
        let catalog = CurrencyCatalog::hinted(["BTC", "USD", "USDT"]);
        let pair = PairFormat::new("", true).parse(symbol, &catalog).unwrap();
        assert_eq!(pair, CurrencyPair::new(base, quote));
    }

    #[test]
    fn open_catalog_takes_three_letter_base() {
        let open = CurrencyCatalog::open();
        let format = PairFormat::new("", true);
        assert_eq!(format.parse("ETHUSDT", &open).unwrap(), CurrencyPair::new("ETH", "USDT"));
        assert!(format.parse("ETH", &open).is_err());
        assert!(CurrencyCatalog::hinted(["BTC"]).is_open());
        assert!(!catalog().is_open());
    }

    #[test]
    fn ambiguous_split_is_rejected() {
        let catalog = CurrencyCatalog::from_codes(["AB", "ABC", "CD", "D"]);
        let err = PairFormat::new("", true).parse("ABCD", &catalog).unwrap_err();
        assert!(err.to_string().contains("ambiguously"));
    }

    #[test]
    fn list_round_trips_with_separator() {
        let format = PairFormat::new("_", false).with_separator("-");
        let pairs = vec![CurrencyPair::new("ETH", "BTC"), CurrencyPair::new("LTC", "BTC")];
        let rendered = format.format_list(&pairs);
        assert_eq!(rendered, "eth_btc-ltc_btc");
        assert_eq!(format.parse_list(&rendered, &catalog()).unwrap(), pairs);
    }

    #[test]
    fn from_str_accepts_common_spellings() {
        let expected = CurrencyPair::new("ETH", "BTC");
        for raw in ["ETH/BTC", "eth-btc", "eth_btc", "ETHBTC"] {
            assert_eq!(raw.parse::<CurrencyPair>().unwrap(), expected, "{raw}");
        }
    }

    #[test]
    fn serializes_as_slash_string() {
        let json = serde_json::to_string(&CurrencyPair::new("eth", "usd")).unwrap();
        assert_eq!(json, "\"ETH/USD\"");
        let back: CurrencyPair = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CurrencyPair::new("ETH", "USD"));
    }

    fn code() -> impl Strategy<Value = String> {
        "[A-Z0-9]{2,5}"
    }

    fn format() -> impl Strategy<Value = PairFormat> {
        (prop_oneof![Just(""), Just("/"), Just("-"), Just("_")], any::<bool>())
            .prop_map(|(delimiter, uppercase)| PairFormat::new(delimiter, uppercase))
    }

    proptest! {
        #[test]
        fn parse_inverts_display(base in code(), quote in code(), format in format()) {
            prop_assume!(format!("{base}{quote}") != format!("{quote}{base}"));
            let catalog = CurrencyCatalog::from_codes([&base, &quote]);
            let pair = CurrencyPair::new(&base, &quote);
            let rendered = format.format(&pair);
            prop_assert_eq!(format.parse(&rendered, &catalog).unwrap(), pair);
        }
    }
}
