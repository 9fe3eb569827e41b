use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use exchange_core::limits::PairLimits;
use exchange_core::nonce::NonceSeed;
use exchange_core::signer::{HashAlgorithm, QueryStringPayload, SignatureEncoding};
use exchange_core::{
    AccountCurrency, AccountInfo, AssetType, CurrencyCatalog, CurrencyLimits, CurrencyPair, Exchange, ExchangeBase,
    ExchangeConfig, ExchangeDefaults, ExchangeError, MarketDataCache, Order, OrderBook, OrderRequest,
    OrderSide, OrderStatus, OrderType, PairFormat, Params, RawOrder, RequestSigner, Result,
    StatusVocabulary, Ticker,
};
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::models::{
    AccountFunds, ActiveOrder, CancelResult, DepthEntry, Info, TapiResponse, TickerEntry, TradeResult,
};
use crate::http::{headers, RestClient};
use crate::utils::{decimal_from_f64, from_unix_seconds, parse_levels};

pub const LIQUI_API_URL: &str = "https://api.liqui.io";
const API_VERSION: &str = "3";
const TRADE_PATH: &str = "/tapi";
/// Liqui does not publish an amount increment.
const AMOUNT_DECIMAL_PLACES: i32 = 8;
const NO_ORDERS: &str = "no orders";

pub struct Liqui {
    base: ExchangeBase,
    rest: RestClient,
    vocabulary: StatusVocabulary,
    limits: RwLock<Option<CurrencyLimits>>,
}

impl Liqui {
    /// Nonces must fit in 32 bits, hence the seconds seed.
    pub fn defaults() -> ExchangeDefaults {
        ExchangeDefaults::new("Liqui", PairFormat::new("_", false).with_separator("-"))
            .with_config_format(PairFormat::new("_", false))
            .with_nonce_seed(NonceSeed::UnixSeconds)
    }

    pub fn signer() -> RequestSigner {
        RequestSigner::new(HashAlgorithm::Sha512, SignatureEncoding::Hex, QueryStringPayload)
    }

    /// Numeric status codes of `ActiveOrders`.
    pub fn vocabulary() -> StatusVocabulary {
        StatusVocabulary::new()
            .with(["0"], OrderStatus::Active)
            .with(["1"], OrderStatus::Filled)
            .with(["2", "3"], OrderStatus::Aborted)
    }

    pub fn new(config: &ExchangeConfig, cache: Arc<MarketDataCache>) -> Result<Self> {
        let base = ExchangeBase::from_config(config, Self::defaults(), Self::signer(), cache)?;
        let url = config
            .api_url
            .clone()
            .unwrap_or_else(|| LIQUI_API_URL.to_string());
        let rest = RestClient::for_exchange(config, base.name(), url)?;
        Ok(Self {
            base,
            rest,
            vocabulary: Self::vocabulary(),
            limits: RwLock::new(None),
        })
    }

    async fn public<T>(&self, method: &str, pairs: Option<&str>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let path = match pairs {
            Some(pairs) => format!("/api/{API_VERSION}/{method}/{pairs}"),
            None => format!("/api/{API_VERSION}/{method}"),
        };
        self.rest.get(&path).await
    }

    async fn trade_api<T>(&self, method: &str, mut params: Params) -> Result<T>
    where
        T: DeserializeOwned,
    {
        params.insert("method".into(), Value::from(method));
        let signed = self.base.auth().sign(TRADE_PATH, &params)?;
        let headers = headers([
            ("key", signed.api_key.as_str()),
            ("sign", signed.signature.as_str()),
        ])?;
        let builder = self
            .rest
            .request(Method::POST, TRADE_PATH)
            .headers(headers)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(signed.body);
        let response: TapiResponse<T> = self.rest.execute(builder).await?;
        response.into_result(self.base.name())
    }

    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    pub async fn info(&self) -> Result<Info> {
        self.public("info", None).await
    }

    fn convert_limits(&self, info: &Info) -> Result<(Vec<CurrencyPair>, CurrencyLimits)> {
        let format = self.base.request_format();
        let catalog = CurrencyCatalog::open();
        let mut pairs = Vec::with_capacity(info.pairs.len());
        let mut limits = CurrencyLimits::new(self.base.name());
        for (symbol, details) in &info.pairs {
            let pair = format.parse(symbol, &catalog)?;
            if details.hidden == 0 {
                pairs.push(pair.clone());
            }
            limits.insert(
                pair,
                PairLimits::new(details.decimal_places, AMOUNT_DECIMAL_PLACES)
                    .with_min_amount(decimal_from_f64("min_amount", details.min_amount)?)
                    .with_min_total(decimal_from_f64("min_total", details.min_total)?),
            );
        }
        pairs.sort();
        Ok((pairs, limits))
    }

    fn convert_ticker(&self, pair: CurrencyPair, asset_type: AssetType, entry: &TickerEntry) -> Result<Ticker> {
        Ok(Ticker {
            exchange: self.base.name().to_string(),
            pair,
            asset_type,
            ask: decimal_from_f64("sell", entry.sell)?,
            bid: decimal_from_f64("buy", entry.buy)?,
            last: decimal_from_f64("last", entry.last)?,
            low: Some(decimal_from_f64("low", entry.low)?),
            high: Some(decimal_from_f64("high", entry.high)?),
            volume: decimal_from_f64("vol_cur", entry.vol_cur)?,
            timestamp: from_unix_seconds(entry.updated)?,
        })
    }

    fn convert_order(&self, id: String, order: ActiveOrder) -> Result<Order> {
        let side = OrderSide::from_raw(&order.side)
            .ok_or_else(|| ExchangeError::Format(format!("unknown order side '{}'", order.side)))?;
        let remaining = decimal_from_f64("amount", order.amount)?;
        Ok(RawOrder {
            id,
            pair: self.base.parse_pair(&order.pair)?,
            side,
            order_type: OrderType::Limit,
            raw_status: order.status.to_string(),
            amount: remaining,
            filled_amount: Decimal::ZERO,
            remaining_amount: Some(remaining),
            rate: decimal_from_f64("rate", order.rate)?,
            created_at: from_unix_seconds(order.timestamp_created)?,
        }
        .normalize(&self.vocabulary))
    }
}

#[async_trait]
impl Exchange for Liqui {
    fn base(&self) -> &ExchangeBase {
        &self.base
    }

    async fn setup(&self) -> Result<()> {
        let info = self.info().await?;
        let (pairs, limits) = self.convert_limits(&info)?;
        self.base.update_available_pairs(pairs);
        *self.limits.write() = Some(limits);
        info!(exchange = self.name(), "loaded pair info");
        Ok(())
    }

    /// Liqui serves every enabled pair in one ticker call; the pairs that were
    /// not asked for are cached as a side effect.
    #[instrument(skip(self, pair), fields(exchange = %self.base.name(), pair = %pair))]
    async fn fetch_ticker(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<Ticker> {
        let mut pairs = self.base.enabled_pairs().to_vec();
        if !pairs.contains(pair) {
            pairs.push(pair.clone());
        }
        let symbols = self.base.request_format().format_list(&pairs);
        let entries: HashMap<String, TickerEntry> = self.public("ticker", Some(&symbols)).await?;

        let mut requested = None;
        for other in pairs {
            let symbol = self.base.format_pair(&other);
            let Some(entry) = entries.get(&symbol) else {
                debug!(%symbol, "no ticker returned");
                continue;
            };
            let ticker = self.convert_ticker(other.clone(), asset_type, entry)?;
            if &other == pair {
                requested = Some(ticker);
            } else {
                self.base.cache().put_ticker(ticker);
            }
        }
        requested.ok_or_else(|| ExchangeError::EmptyResponse(format!("{} ticker {pair}", self.base.name())))
    }

    #[instrument(skip(self, pair), fields(exchange = %self.base.name(), pair = %pair))]
    async fn fetch_orderbook(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<OrderBook> {
        let symbol = self.base.format_pair(pair);
        let mut entries: HashMap<String, DepthEntry> = self.public("depth", Some(&symbol)).await?;
        let depth = entries
            .remove(&symbol)
            .ok_or_else(|| ExchangeError::EmptyResponse(format!("{} depth {symbol}", self.base.name())))?;
        Ok(OrderBook::new(
            self.base.name(),
            pair.clone(),
            asset_type,
            parse_levels(&depth.bids)?,
            parse_levels(&depth.asks)?,
        ))
    }

    /// Liqui reports only spendable funds, so totals equal availability and
    /// nothing shows as held.
    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    async fn account_info(&self) -> Result<AccountInfo> {
        let funds: AccountFunds = self.trade_api("getInfo", Params::new()).await?;
        let mut currencies = funds
            .funds
            .iter()
            .map(|(code, amount)| {
                let amount = decimal_from_f64("funds", *amount)?;
                Ok(AccountCurrency {
                    currency: code.to_ascii_uppercase(),
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
        let price = match (request.order_type, request.price) {
            (OrderType::Limit, Some(price)) => price,
            (OrderType::Limit, None) => {
                return Err(ExchangeError::Format("limit order without a price".into()))
            }
            (OrderType::Market, _) => {
                return Err(ExchangeError::unsupported(self.base.name(), "market orders"))
            }
        };

        let mut params = Params::new();
        params.insert("pair".into(), Value::from(self.base.format_pair(&request.pair)));
        params.insert("type".into(), Value::from(request.side.as_str()));
        params.insert("rate".into(), Value::from(price.to_string()));
        params.insert("amount".into(), Value::from(request.amount.to_string()));

        let result: TradeResult = self.trade_api("Trade", params).await?;
        if result.order_id == 0 {
            debug!(received = result.received, "order filled immediately");
        }
        Ok(result.order_id.to_string())
    }

    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    async fn cancel_order(&self, order_id: &str, _pair: &CurrencyPair) -> Result<()> {
        let id: i64 = order_id
            .trim()
            .parse()
            .map_err(|_| ExchangeError::Format(format!("invalid Liqui order id '{order_id}'")))?;
        let mut params = Params::new();
        params.insert("order_id".into(), Value::from(id));
        let _: CancelResult = self.trade_api("CancelOrder", params).await?;
        Ok(())
    }

    #[instrument(skip(self, pairs), fields(exchange = %self.base.name()))]
    async fn orders(&self, pairs: &[CurrencyPair]) -> Result<Vec<Order>> {
        let active: HashMap<String, ActiveOrder> =
            match self.trade_api("ActiveOrders", Params::new()).await {
                Ok(active) => active,
                Err(ExchangeError::Exchange { message, .. }) if message == NO_ORDERS => {
                    HashMap::new()
                }
                Err(err) => return Err(err),
            };

        let mut orders = Vec::with_capacity(active.len());
        for (id, order) in active {
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
        let (_, limits) = self.convert_limits(&self.info().await?)?;
        if limits.is_empty() {
            warn!(exchange = self.name(), "info returned no pairs");
        }
        *self.limits.write() = Some(limits.clone());
        Ok(limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn liqui(server: &MockServer) -> Liqui {
        let mut config = ExchangeConfig::new("Liqui");
        config.api_url = Some(server.uri());
        config.available_pairs = "eth_btc,ltc_btc".into();
        config.authenticated_api_support = true;
        config.api_key = "key".into();
        config.api_secret = "secret".into();
        Liqui::new(&config, Arc::new(MarketDataCache::new())).unwrap()
    }

    fn ticker_entry(last: f64) -> Value {
        json!({
            "high": 0.0801, "low": 0.0702, "avg": 0.075, "vol": 120.5, "vol_cur": 1600.25,
            "last": last, "buy": 0.0749, "sell": 0.0751, "updated": 1499827319
        })
    }

    #[tokio::test]
    async fn ticker_fetches_all_enabled_pairs_at_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/3/ticker/eth_btc-ltc_btc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "eth_btc": ticker_entry(0.075),
                "ltc_btc": ticker_entry(0.012)
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = liqui(&server);
        let eth = CurrencyPair::new("ETH", "BTC");
        let ltc = CurrencyPair::new("LTC", "BTC");
        let ticker = exchange.update_ticker(&eth, AssetType::Spot).await.unwrap();
        assert_eq!(ticker.last, dec!(0.075));
        assert_eq!(ticker.ask, dec!(0.0751));
        assert_eq!(ticker.volume, dec!(1600.25));

        // Served from the cache without another request.
        let cached = exchange.ticker(&ltc, AssetType::Spot).await.unwrap();
        assert_eq!(cached.last, dec!(0.012));
    }

    #[tokio::test]
    async fn setup_reads_pairs_and_limits_from_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/3/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "server_time": 1499827319,
                "pairs": {
                    "eth_btc": {"decimal_places": 8, "min_price": 0.00000001, "max_price": 10.0,
                                "min_amount": 0.01, "max_amount": 100000.0, "min_total": 0.0001,
                                "hidden": 0, "fee": 0.25},
                    "old_btc": {"decimal_places": 6, "min_price": 0.000001, "max_price": 1.0,
                                "min_amount": 1.0, "max_amount": 1000.0, "min_total": 0.001,
                                "hidden": 1, "fee": 0.25}
                }
            })))
            .mount(&server)
            .await;

        let exchange = liqui(&server);
        exchange.setup().await.unwrap();

        let eth = CurrencyPair::new("ETH", "BTC");
        assert_eq!(exchange.base().available_pairs(), vec![eth.clone()]);
        let limits = exchange.limits().await.unwrap();
        assert_eq!(limits.price_decimal_places(&eth), 8);
        assert_eq!(limits.amount_decimal_places(&eth), 8);
        assert_eq!(limits.min_amount(&eth), Some(dec!(0.01)));
        assert_eq!(limits.min_total(&eth), Some(dec!(0.0001)));
    }

    #[tokio::test]
    async fn trade_api_signs_form_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tapi"))
            .and(header("key", "key"))
            .and(header_exists("sign"))
            .and(body_string_contains("method=getInfo"))
            .and(body_string_contains("nonce="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": 1,
                "return": {"funds": {"eth": 325.0, "btc": 23.998}, "open_orders": 1, "server_time": 1499827319}
            })))
            .mount(&server)
            .await;

        let info = liqui(&server).account_info().await.unwrap();
        assert_eq!(info.currencies[0].currency, "BTC");
        assert_eq!(info.currencies[0].total, dec!(23.998));
        assert_eq!(info.currencies[1].available, dec!(325));
    }

    #[tokio::test]
    async fn no_orders_error_is_an_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tapi"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": 0, "error": "no orders"})))
            .mount(&server)
            .await;

        assert!(liqui(&server).orders(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_orders_use_numeric_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tapi"))
            .and(body_string_contains("method=ActiveOrders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": 1,
                "return": {
                    "343152": {"pair": "eth_btc", "type": "sell", "amount": 12.1, "rate": 0.07,
                               "timestamp_created": 1342448420, "status": 0},
                    "343153": {"pair": "ltc_btc", "type": "buy", "amount": 1.0, "rate": 0.01,
                               "timestamp_created": 1342448421, "status": 3}
                }
            })))
            .mount(&server)
            .await;

        let orders = liqui(&server).orders(&[]).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, "343152");
        assert_eq!(orders[0].status, OrderStatus::Active);
        assert_eq!(orders[0].remaining_amount, dec!(12.1));
        assert_eq!(orders[1].status, OrderStatus::Aborted);
    }

    #[tokio::test]
    async fn trade_returns_order_id_and_business_errors_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tapi"))
            .and(body_string_contains("method=Trade"))
            .and(body_string_contains("pair=eth_btc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": 1,
                "return": {"received": 0.1, "remains": 0.0, "order_id": 12345, "funds": {}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tapi"))
            .and(body_string_contains("method=CancelOrder"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": 0, "error": "bad status"
            })))
            .mount(&server)
            .await;

        let exchange = liqui(&server);
        let pair = CurrencyPair::new("ETH", "BTC");
        let request = OrderRequest::limit(pair.clone(), OrderSide::Buy, dec!(0.1), dec!(0.07));
        assert_eq!(exchange.new_order(&request).await.unwrap(), "12345");

        let err = exchange.cancel_order("12345", &pair).await.unwrap_err();
        assert_eq!(err, ExchangeError::business("Liqui", "bad status"));
        assert!(exchange.base().auth().nonce().current() > 0);
    }
}
