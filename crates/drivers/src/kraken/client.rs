use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use exchange_core::limits::PairLimits;
use exchange_core::nonce::NonceSeed;
use exchange_core::signer::{HashAlgorithm, PathDigestPayload, SecretEncoding, SignatureEncoding};
use exchange_core::{
    AccountCurrency, AccountInfo, AssetType, CurrencyCatalog, CurrencyLimits, CurrencyPair, Exchange,
    ExchangeBase, ExchangeConfig, ExchangeDefaults, ExchangeError, MarketDataCache, Order,
    OrderBook, OrderRequest, OrderSide, OrderStatus, OrderType, PairFormat, Params, RawOrder,
    RequestSigner, Result, StatusVocabulary, Ticker,
};
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, instrument};

use super::models::{
    AddOrderResult, AssetPair, Balances, CancelOrderResult, DepthEntry, KrakenOrder, KrakenResponse,
    OpenOrders, TickerEntry,
};
use crate::http::{headers, RestClient};
use crate::utils::{from_unix_seconds_f64, parse_decimal, parse_levels};

pub const KRAKEN_API_URL: &str = "https://api.kraken.com";
const API_VERSION: &str = "0";

pub struct Kraken {
    base: ExchangeBase,
    rest: RestClient,
    vocabulary: StatusVocabulary,
    limits: RwLock<Option<CurrencyLimits>>,
}

impl Kraken {
    pub fn defaults() -> ExchangeDefaults {
        ExchangeDefaults::new("Kraken", PairFormat::new("", true).with_separator(","))
            .with_nonce_seed(NonceSeed::UnixNanos)
    }

    /// HMAC-SHA512 over `path || sha256(nonce || body)` keyed by the
    /// base64-decoded secret.
    pub fn signer() -> RequestSigner {
        RequestSigner::new(HashAlgorithm::Sha512, SignatureEncoding::Base64, PathDigestPayload)
            .with_secret_encoding(SecretEncoding::Base64)
    }

    pub fn vocabulary() -> StatusVocabulary {
        StatusVocabulary::standard()
            .with(["pending"], OrderStatus::Active)
            .with(["closed"], OrderStatus::Filled)
    }

    pub fn new(config: &ExchangeConfig, cache: Arc<MarketDataCache>) -> Result<Self> {
        let base = ExchangeBase::from_config(config, Self::defaults(), Self::signer(), cache)?;
        let url = config
            .api_url
            .clone()
            .unwrap_or_else(|| KRAKEN_API_URL.to_string());
        let rest = RestClient::for_exchange(config, base.name(), url)?;
        Ok(Self {
            base,
            rest,
            vocabulary: Self::vocabulary(),
            limits: RwLock::new(None),
        })
    }

    fn symbol(&self, pair: &CurrencyPair) -> String {
        self.base.format_pair(&to_kraken_pair(pair))
    }

    fn parse_key(&self, key: &str) -> Result<CurrencyPair> {
        let mut catalog = self.base.catalog();
        if !catalog.is_open() {
            catalog.extend(["XBT", "XDG"]);
        }
        parse_pair_key(key, &catalog)
    }

    async fn public<T>(&self, method: &str, query: &[(&str, &str)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let path = format!("/{API_VERSION}/public/{method}");
        let builder = self.rest.request(Method::GET, &path).query(query);
        let response: KrakenResponse<T> = self.rest.execute(builder).await?;
        response.into_result(self.base.name())
    }

    async fn private<T>(&self, method: &str, params: Params) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let path = format!("/{API_VERSION}/private/{method}");
        let signed = self.base.auth().sign(&path, &params)?;
        let headers = headers([
            ("api-key", signed.api_key.as_str()),
            ("api-sign", signed.signature.as_str()),
        ])?;
        let builder = self
            .rest
            .request(Method::POST, &path)
            .headers(headers)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(signed.body);
        let response: KrakenResponse<T> = self.rest.execute(builder).await?;
        response.into_result(self.base.name())
    }

    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    pub async fn asset_pairs(&self) -> Result<HashMap<String, AssetPair>> {
        self.public("AssetPairs", &[]).await
    }

    /// One request for several pairs; every ticker returned is stored.
    #[instrument(skip(self, pairs), fields(exchange = %self.base.name(), count = pairs.len()))]
    pub async fn update_tickers(&self, pairs: &[CurrencyPair]) -> Result<Vec<Arc<Ticker>>> {
        let kraken_pairs: Vec<CurrencyPair> = pairs.iter().map(to_kraken_pair).collect();
        let symbols = self.base.request_format().format_list(&kraken_pairs);
        let entries: HashMap<String, TickerEntry> =
            self.public("Ticker", &[("pair", symbols.as_str())]).await?;

        entries
            .iter()
            .map(|(key, entry)| {
                let ticker = self.convert_ticker(self.parse_key(key)?, AssetType::Spot, entry)?;
                Ok(self.base.cache().put_ticker(ticker))
            })
            .collect()
    }

    fn convert_ticker(&self, pair: CurrencyPair, asset_type: AssetType, entry: &TickerEntry) -> Result<Ticker> {
        Ok(Ticker {
            exchange: self.base.name().to_string(),
            pair,
            asset_type,
            ask: parse_decimal("ask", first(&entry.a, "ask")?)?,
            bid: parse_decimal("bid", first(&entry.b, "bid")?)?,
            last: parse_decimal("last", first(&entry.c, "last")?)?,
            low: Some(parse_decimal("low", rolling(&entry.l, "low")?)?),
            high: Some(parse_decimal("high", rolling(&entry.h, "high")?)?),
            volume: parse_decimal("volume", rolling(&entry.v, "volume")?)?,
            timestamp: Utc::now(),
        })
    }

    fn convert_order(&self, id: String, order: KrakenOrder) -> Result<Order> {
        let side = OrderSide::from_raw(&order.descr.side)
            .ok_or_else(|| ExchangeError::Format(format!("unknown order side '{}'", order.descr.side)))?;
        let order_type = match order.descr.ordertype.as_str() {
            "market" => OrderType::Market,
            _ => OrderType::Limit,
        };
        Ok(RawOrder {
            id,
            pair: self.parse_key(&order.descr.pair)?,
            side,
            order_type,
            raw_status: order.status,
            amount: parse_decimal("vol", &order.vol)?,
            filled_amount: parse_decimal("vol_exec", &order.vol_exec)?,
            remaining_amount: None,
            rate: parse_decimal("price", &order.descr.price)?,
            created_at: from_unix_seconds_f64(order.opentm)?,
        }
        .normalize(&self.vocabulary))
    }

    fn convert_limits(&self, asset_pairs: &HashMap<String, AssetPair>) -> Result<CurrencyLimits> {
        let mut limits = CurrencyLimits::new(self.base.name());
        for info in asset_pairs.values() {
            // Dark pool books share the underlying pair's limits.
            if info.altname.ends_with(".d") {
                continue;
            }
            let pair = CurrencyPair::new(normalize_asset(&info.base), normalize_asset(&info.quote));
            let mut entry = PairLimits::new(info.pair_decimals, info.lot_decimals);
            if let Some(min) = &info.ordermin {
                entry = entry.with_min_amount(parse_decimal("ordermin", min)?);
            }
            if let Some(min) = &info.costmin {
                entry = entry.with_min_total(parse_decimal("costmin", min)?);
            }
            limits.insert(pair, entry);
        }
        Ok(limits)
    }
}

#[async_trait]
impl Exchange for Kraken {
    fn base(&self) -> &ExchangeBase {
        &self.base
    }

    async fn setup(&self) -> Result<()> {
        let asset_pairs = self.asset_pairs().await?;
        let limits = self.convert_limits(&asset_pairs)?;
        let mut pairs: Vec<CurrencyPair> = limits.pairs().map(|(pair, _)| pair.clone()).collect();
        pairs.sort();
        self.base.update_available_pairs(pairs);
        *self.limits.write() = Some(limits);
        info!(exchange = self.name(), "loaded asset pairs");
        Ok(())
    }

    #[instrument(skip(self, pair), fields(exchange = %self.base.name(), pair = %pair))]
    async fn fetch_ticker(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<Ticker> {
        let symbol = self.symbol(pair);
        let entries: HashMap<String, TickerEntry> =
            self.public("Ticker", &[("pair", symbol.as_str())]).await?;
        let entry = entries
            .values()
            .next()
            .ok_or_else(|| ExchangeError::EmptyResponse(format!("{} ticker {symbol}", self.base.name())))?;
        self.convert_ticker(pair.clone(), asset_type, entry)
    }

    #[instrument(skip(self, pair), fields(exchange = %self.base.name(), pair = %pair))]
    async fn fetch_orderbook(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<OrderBook> {
        let symbol = self.symbol(pair);
        let entries: HashMap<String, DepthEntry> =
            self.public("Depth", &[("pair", symbol.as_str())]).await?;
        let depth = entries
            .into_values()
            .next()
            .ok_or_else(|| ExchangeError::EmptyResponse(format!("{} depth {symbol}", self.base.name())))?;
        Ok(OrderBook::new(
            self.base.name(),
            pair.clone(),
            asset_type,
            parse_levels(&depth.bids)?,
            parse_levels(&depth.asks)?,
        ))
    }

    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    async fn account_info(&self) -> Result<AccountInfo> {
        let balances: Balances = self.private("Balance", Params::new()).await?;
        let mut currencies = balances
            .iter()
            .map(|(code, amount)| {
                let amount = parse_decimal("balance", amount)?;
                Ok(AccountCurrency {
                    currency: normalize_asset(code),
                    total: amount,
                    available: amount,
                    hold: Decimal::ZERO,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        currencies.sort_by(|a, b| a.currency.cmp(&b.currency));
        Ok(AccountInfo {
            exchange: self.base.name().to_string(),
            currencies,
        })
    }

    #[instrument(skip(self, request), fields(exchange = %self.base.name(), pair = %request.pair))]
    async fn new_order(&self, request: &OrderRequest) -> Result<String> {
        let mut params = Params::new();
        params.insert("pair".into(), Value::from(self.symbol(&request.pair)));
        params.insert("type".into(), Value::from(request.side.as_str()));
        params.insert("ordertype".into(), Value::from(request.order_type.to_string()));
        params.insert("volume".into(), Value::from(request.amount.to_string()));
        match (request.order_type, request.price) {
            (OrderType::Limit, Some(price)) => {
                params.insert("price".into(), Value::from(price.to_string()));
            }
            (OrderType::Limit, None) => {
                return Err(ExchangeError::Format("limit order without a price".into()));
            }
            (OrderType::Market, _) => {}
        }

        let result: AddOrderResult = self.private("AddOrder", params).await?;
        result
            .txid
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::EmptyResponse(format!("{} AddOrder", self.base.name())))
    }

    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    async fn cancel_order(&self, order_id: &str, _pair: &CurrencyPair) -> Result<()> {
        let mut params = Params::new();
        params.insert("txid".into(), Value::from(order_id));
        let result: CancelOrderResult = self.private("CancelOrder", params).await?;
        if result.count == 0 {
            return Err(ExchangeError::business(
                self.base.name(),
                format!("order {order_id} was not cancelled"),
            ));
        }
        Ok(())
    }

    #[instrument(skip(self, pairs), fields(exchange = %self.base.name()))]
    async fn orders(&self, pairs: &[CurrencyPair]) -> Result<Vec<Order>> {
        let open: OpenOrders = self.private("OpenOrders", Params::new()).await?;
        let mut orders = Vec::with_capacity(open.open.len());
        for (id, order) in open.open {
            let order = self.convert_order(id, order)?;
            if pairs.is_empty() || pairs.contains(&order.pair) {
                orders.push(order);
            }
        }
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    async fn limits(&self) -> Result<CurrencyLimits> {
        if let Some(limits) = self.limits.read().clone() {
            return Ok(limits);
        }
        let limits = self.convert_limits(&self.asset_pairs().await?)?;
        *self.limits.write() = Some(limits.clone());
        Ok(limits)
    }
}

fn first<'a>(values: &'a [String], field: &str) -> Result<&'a str> {
    values
        .first()
        .map(String::as_str)
        .ok_or_else(|| ExchangeError::Format(format!("ticker field {field} is empty")))
}

/// Second element: the rolling 24 hour value.
fn rolling<'a>(values: &'a [String], field: &str) -> Result<&'a str> {
    values
        .get(1)
        .map(String::as_str)
        .ok_or_else(|| ExchangeError::Format(format!("ticker field {field} lacks a 24h value")))
}

/// Kraken pads legacy codes with an `X` (crypto) or `Z` (fiat) prefix and
/// calls bitcoin `XBT`.
pub fn normalize_asset(code: &str) -> String {
    let code = code.trim().to_ascii_uppercase();
    let code = if code.len() == 4 && (code.starts_with('X') || code.starts_with('Z')) {
        code[1..].to_string()
    } else {
        code
    };
    match code.as_str() {
        "XBT" => "BTC".to_string(),
        "XDG" => "DOGE".to_string(),
        _ => code,
    }
}

fn to_kraken_pair(pair: &CurrencyPair) -> CurrencyPair {
    let kraken_code = |code: &str| match code {
        "BTC" => "XBT".to_string(),
        "DOGE" => "XDG".to_string(),
        other => other.to_string(),
    };
    CurrencyPair::new(kraken_code(pair.base()), kraken_code(pair.quote()))
}

/// Canonical pair for a Kraken pair key such as `XETHZUSD`, `XBTUSD` or
/// `DASHEUR`.
pub fn parse_pair_key(key: &str, catalog: &CurrencyCatalog) -> Result<CurrencyPair> {
    let key = key.trim().to_ascii_uppercase();
    let padded = |idx: usize| matches!(key.as_bytes().get(idx), Some(b'X') | Some(b'Z'));
    if key.len() == 8 && padded(0) && padded(4) {
        return Ok(CurrencyPair::new(normalize_asset(&key[..4]), normalize_asset(&key[4..])));
    }

    let plain = PairFormat::new("", true);
    let pair = plain
        .parse(&key, catalog)
        .or_else(|err| {
            if key.len() == 6 {
                plain.parse(&key, &CurrencyCatalog::open())
            } else {
                Err(err)
            }
        })?;
    Ok(CurrencyPair::new(normalize_asset(pair.base()), normalize_asset(pair.quote())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
    use wiremock::matchers::{body_string_contains, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[rstest]
    #[case("XETHZUSD", "ETH", "USD")]
    #[case("XXBTZUSD", "BTC", "USD")]
    #[case("XETHXXBT", "ETH", "BTC")]
    #[case("XBTUSD", "BTC", "USD")]
    #[case("DASHEUR", "DASH", "EUR")]
    fn pair_keys_resolve_to_canonical_pairs(#[case] key: &str, #[case] base: &str, #[case] quote: &str) {
        let catalog = CurrencyCatalog::from_codes(["DASH", "EUR", "BTC", "USD"]);
        assert_eq!(parse_pair_key(key, &catalog).unwrap(), CurrencyPair::new(base, quote));
    }

    #[rstest]
    #[case("XXBT", "BTC")]
    #[case("ZEUR", "EUR")]
    #[case("XDG", "DOGE")]
    #[case("DASH", "DASH")]
    #[case("USDT", "USDT")]
    fn asset_codes_drop_padding(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_asset(raw), expected);
    }

    fn config(server: &MockServer, authenticated: bool) -> ExchangeConfig {
        let mut config = ExchangeConfig::new("Kraken");
        config.api_url = Some(server.uri());
        config.available_pairs = "BTCUSD,ETHUSD".into();
        config.authenticated_api_support = authenticated;
        config.api_key = "key".into();
        // base64 of "secret"
        config.api_secret = "c2VjcmV0".into();
        config
    }

    fn kraken(server: &MockServer, authenticated: bool) -> Kraken {
        Kraken::new(&config(server, authenticated), Arc::new(MarketDataCache::new())).unwrap()
    }

    fn ticker_entry() -> serde_json::Value {
        json!({
            "a": ["2601.10", "1", "1.000"],
            "b": ["2600.90", "2", "2.000"],
            "c": ["2601.00", "0.5"],
            "v": ["100.0", "1234.5"],
            "l": ["2500.0", "2450.0"],
            "h": ["2650.0", "2700.0"],
            "o": "2550.0"
        })
    }

    #[tokio::test]
    async fn fetch_ticker_uses_rolling_values_and_kraken_symbol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .and(query_param("pair", "XBTUSD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"error": [], "result": {"XXBTZUSD": ticker_entry()}})),
            )
            .mount(&server)
            .await;

        let ticker = kraken(&server, false)
            .fetch_ticker(&CurrencyPair::new("BTC", "USD"), AssetType::Spot)
            .await
            .unwrap();
        assert_eq!(ticker.ask, dec!(2601.10));
        assert_eq!(ticker.bid, dec!(2600.90));
        assert_eq!(ticker.last, dec!(2601.00));
        assert_eq!(ticker.volume, dec!(1234.5));
        assert_eq!(ticker.low, Some(dec!(2450.0)));
        assert_eq!(ticker.high, Some(dec!(2700.0)));
        assert_eq!(ticker.exchange, "Kraken");
    }

    #[tokio::test]
    async fn configured_proxy_carries_public_calls() {
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"error": [], "result": {"XXBTZUSD": ticker_entry()}})),
            )
            .expect(1)
            .mount(&proxy)
            .await;

        let mut config = config(&proxy, false);
        config.api_url = Some("http://kraken.invalid".into());
        config.http_proxy = Some(proxy.uri());
        let exchange = Kraken::new(&config, Arc::new(MarketDataCache::new())).unwrap();

        let ticker = exchange
            .fetch_ticker(&CurrencyPair::new("BTC", "USD"), AssetType::Spot)
            .await
            .unwrap();
        assert_eq!(ticker.last, dec!(2601.00));
    }

    /// Collects the `exchange` field of every span opened while installed.
    struct ExchangeSpans(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> Layer<S> for ExchangeSpans {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            struct ExchangeField<'a>(&'a mut Vec<String>);
            impl Visit for ExchangeField<'_> {
                fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                    if field.name() == "exchange" {
                        self.0.push(format!("{value:?}"));
                    }
                }
            }
            let mut seen = self.0.lock();
            attrs.record(&mut ExchangeField(&mut *seen));
        }
    }

    #[tokio::test]
    async fn spans_carry_configured_name() {
        let server = MockServer::start().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(ExchangeSpans(Arc::clone(&seen))),
        );

        let mut config = config(&server, false);
        config.name = "KRAKEN".into();
        let exchange = Kraken::new(&config, Arc::new(MarketDataCache::new())).unwrap();
        let _ = exchange
            .fetch_ticker(&CurrencyPair::new("BTC", "USD"), AssetType::Spot)
            .await;

        let seen = seen.lock();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|name| name == "KRAKEN"), "{seen:?}");
    }

    #[tokio::test]
    async fn batch_ticker_update_fills_the_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .and(query_param("pair", "XBTUSD,ETHUSD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {"XXBTZUSD": ticker_entry(), "XETHZUSD": ticker_entry()}
            })))
            .mount(&server)
            .await;

        let exchange = kraken(&server, false);
        let pairs = [CurrencyPair::new("BTC", "USD"), CurrencyPair::new("ETH", "USD")];
        let tickers = exchange.update_tickers(&pairs).await.unwrap();
        assert_eq!(tickers.len(), 2);
        for pair in &pairs {
            assert!(exchange.base().cache().ticker("Kraken", pair, AssetType::Spot).is_some());
        }
    }

    #[tokio::test]
    async fn orderbook_levels_are_sorted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Depth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {"XETHZUSD": {
                    "asks": [["101.0", "1.0", 1499040000], ["100.5", "2.0", 1499040000]],
                    "bids": [["99.0", "1.0", 1499040000], ["99.5", "3.0", 1499040000]]
                }}
            })))
            .mount(&server)
            .await;

        let book = kraken(&server, false)
            .fetch_orderbook(&CurrencyPair::new("ETH", "USD"), AssetType::Spot)
            .await
            .unwrap();
        assert_eq!(book.best_ask().unwrap().price, dec!(100.5));
        assert_eq!(book.best_bid().unwrap().price, dec!(99.5));
    }

    #[tokio::test]
    async fn private_calls_without_credentials_never_reach_the_wire() {
        let server = MockServer::start().await;
        let exchange = kraken(&server, false);

        let err = exchange.account_info().await.unwrap_err();
        assert_eq!(err, ExchangeError::CredentialsMissing("Kraken".into()));
        assert_eq!(exchange.base().auth().nonce().current(), 0);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn balances_are_signed_and_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/Balance"))
            .and(header_exists("api-key"))
            .and(header_exists("api-sign"))
            .and(body_string_contains("nonce="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {"XXBT": "1.5", "ZUSD": "250.25"}
            })))
            .mount(&server)
            .await;

        let info = kraken(&server, true).account_info().await.unwrap();
        let codes: Vec<&str> = info.currencies.iter().map(|c| c.currency.as_str()).collect();
        assert_eq!(codes, ["BTC", "USD"]);
        assert_eq!(info.currencies[0].available, dec!(1.5));
        assert_eq!(info.currencies[1].hold, Decimal::ZERO);
    }

    #[tokio::test]
    async fn new_order_returns_first_txid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/AddOrder"))
            .and(body_string_contains("ordertype=limit"))
            .and(body_string_contains("pair=XBTUSD"))
            .and(body_string_contains("price=30000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {"descr": {"order": "buy 1 XBTUSD @ limit 30000"}, "txid": ["OABC-123"]}
            })))
            .mount(&server)
            .await;

        let request = OrderRequest::limit(CurrencyPair::new("BTC", "USD"), OrderSide::Buy, dec!(1), dec!(30000));
        let id = kraken(&server, true).new_order(&request).await.unwrap();
        assert_eq!(id, "OABC-123");
    }

    #[tokio::test]
    async fn business_errors_keep_the_exchange_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/CancelOrder"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": ["EOrder:Unknown order"]
            })))
            .mount(&server)
            .await;

        let err = kraken(&server, true)
            .cancel_order("OXYZ", &CurrencyPair::new("BTC", "USD"))
            .await
            .unwrap_err();
        assert_eq!(err, ExchangeError::business("Kraken", "EOrder:Unknown order"));
    }

    #[tokio::test]
    async fn open_orders_are_normalized_and_filtered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/0/private/OpenOrders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {"open": {
                    "O1": {
                        "status": "open", "opentm": 1499827319.559,
                        "descr": {"pair": "XBTUSD", "type": "buy", "ordertype": "limit", "price": "30000.0"},
                        "vol": "2.0", "vol_exec": "0.5"
                    },
                    "O2": {
                        "status": "open", "opentm": 1499827320.0,
                        "descr": {"pair": "ETHUSD", "type": "sell", "ordertype": "limit", "price": "2000.0"},
                        "vol": "1.0", "vol_exec": "1.0"
                    }
                }}
            })))
            .mount(&server)
            .await;

        let exchange = kraken(&server, true);
        let all = exchange.orders(&[]).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "O1");
        assert_eq!(all[0].status, OrderStatus::Active);
        assert_eq!(all[0].remaining_amount, dec!(1.5));
        assert_eq!(all[1].status, OrderStatus::Filled);

        let btc_only = exchange.orders(&[CurrencyPair::new("BTC", "USD")]).await.unwrap();
        assert_eq!(btc_only.len(), 1);
        assert_eq!(btc_only[0].side, OrderSide::Buy);
    }

    #[tokio::test]
    async fn setup_loads_pairs_and_limits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/AssetPairs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": [],
                "result": {
                    "XXBTZUSD": {"altname": "XBTUSD", "base": "XXBT", "quote": "ZUSD",
                                 "pair_decimals": 1, "lot_decimals": 8, "ordermin": "0.0001", "costmin": "0.5"},
                    "XXBTZUSD.d": {"altname": "XBTUSD.d", "base": "XXBT", "quote": "ZUSD",
                                   "pair_decimals": 1, "lot_decimals": 8},
                    "XETHZUSD": {"altname": "ETHUSD", "base": "XETH", "quote": "ZUSD",
                                 "pair_decimals": 2, "lot_decimals": 8}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = kraken(&server, false);
        exchange.setup().await.unwrap();

        let btc = CurrencyPair::new("BTC", "USD");
        assert_eq!(exchange.base().available_pairs().len(), 2);
        let limits = exchange.limits().await.unwrap();
        assert_eq!(limits.price_decimal_places(&btc), 1);
        assert_eq!(limits.amount_decimal_places(&btc), 8);
        assert_eq!(limits.min_amount(&btc), Some(dec!(0.0001)));
        assert_eq!(limits.min_total(&btc), Some(dec!(0.5)));
    }

    #[tokio::test]
    async fn rate_limited_refresh_serves_cached_ticker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"error": [], "result": {"XXBTZUSD": ticker_entry()}})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/0/public/Ticker"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": ["EAPI:Rate limit exceeded"]})),
            )
            .mount(&server)
            .await;

        let exchange = kraken(&server, false);
        let pair = CurrencyPair::new("BTC", "USD");
        let first = exchange.update_ticker(&pair, AssetType::Spot).await.unwrap();
        let second = exchange.refresh_ticker(&pair, AssetType::Spot).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
