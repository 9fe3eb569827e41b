use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use exchange_core::limits::{decimal_places_of_step, PairLimits};
use exchange_core::signer::{HashAlgorithm, QueryStringPayload, SignatureEncoding};
use exchange_core::{
    AccountCurrency, AccountInfo, AssetType, CurrencyLimits, CurrencyPair, Exchange, ExchangeBase,
    ExchangeConfig, ExchangeDefaults, ExchangeError, MarketDataCache, Order, OrderBook, OrderRequest,
    OrderSide, OrderType, PairFormat, Params, RawOrder, RequestSigner, Result, StatusVocabulary,
    Ticker,
};
use parking_lot::{Mutex, RwLock};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::models::{
    Account, BinanceError, BinanceOrder, Depth, ExchangeInfo, OrderAck, SymbolFilter, SymbolInfo,
    Ticker24h,
};
use crate::http::{headers, RestClient};
use crate::utils::{from_unix_millis, parse_decimal, parse_levels};

pub const BINANCE_API_URL: &str = "https://api.binance.com";

const DEPTH_LIMIT: &str = "100";
const RECV_WINDOW_MS: i64 = 5_000;
/// `-1003 TOO_MANY_REQUESTS`
const RATE_LIMIT_CODE: i64 = -1003;
/// Key under which an unfiltered open-orders fetch is remembered.
const ALL_SYMBOLS: &str = "";

pub struct Binance {
    base: ExchangeBase,
    rest: RestClient,
    vocabulary: StatusVocabulary,
    symbols: RwLock<HashMap<String, CurrencyPair>>,
    limits: RwLock<Option<CurrencyLimits>>,
    last_open_orders: Mutex<HashMap<String, Vec<Order>>>,
}

impl Binance {
    pub fn defaults() -> ExchangeDefaults {
        ExchangeDefaults::new("Binance", PairFormat::new("", true))
    }

    /// HMAC-SHA256 over the query string, which carries a `timestamp` in
    /// place of a nonce.
    pub fn signer() -> RequestSigner {
        RequestSigner::new(HashAlgorithm::Sha256, SignatureEncoding::Hex, QueryStringPayload)
    }

    pub fn new(config: &ExchangeConfig, cache: Arc<MarketDataCache>) -> Result<Self> {
        let base = ExchangeBase::from_config(config, Self::defaults(), Self::signer(), cache)?;
        let url = config
            .api_url
            .clone()
            .unwrap_or_else(|| BINANCE_API_URL.to_string());
        let rest = RestClient::for_exchange(config, base.name(), url)?;
        Ok(Self {
            base,
            rest,
            vocabulary: StatusVocabulary::standard(),
            symbols: RwLock::new(HashMap::new()),
            limits: RwLock::new(None),
            last_open_orders: Mutex::new(HashMap::new()),
        })
    }

    fn symbol(&self, pair: &CurrencyPair) -> String {
        self.base.format_pair(pair)
    }

    fn symbol_to_pair(&self, symbol: &str) -> Result<CurrencyPair> {
        if let Some(pair) = self.symbols.read().get(symbol) {
            return Ok(pair.clone());
        }
        self.base.parse_pair(symbol)
    }

    async fn send<T>(&self, builder: RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.rest
            .execute(builder)
            .await
            .map_err(|err| map_error(self.base.name(), err))
    }

    async fn public<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.send(self.rest.request(Method::GET, path).query(query)).await
    }

    async fn signed<T>(&self, method: Method, path: &str, mut params: Params) -> Result<T>
    where
        T: DeserializeOwned,
    {
        params.insert("timestamp".into(), Value::from(Utc::now().timestamp_millis()));
        params.insert("recvWindow".into(), Value::from(RECV_WINDOW_MS));
        let signed = self.base.auth().sign_without_nonce(path, &params)?;
        let headers = headers([("x-mbx-apikey", signed.api_key.as_str())])?;
        let path_and_query = format!("{path}?{}&signature={}", signed.body, signed.signature);
        self.send(self.rest.request(method, &path_and_query).headers(headers))
            .await
    }

    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    pub async fn exchange_info(&self) -> Result<ExchangeInfo> {
        self.public("/api/v1/exchangeInfo", &[]).await
    }

    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>> {
        let mut params = Params::new();
        if let Some(symbol) = symbol {
            params.insert("symbol".into(), Value::from(symbol));
        }
        let orders: Vec<BinanceOrder> = self.signed(Method::GET, "/api/v3/openOrders", params).await?;
        orders
            .into_iter()
            .map(|order| self.convert_order(order))
            .collect()
    }

    /// Fetches and remembers; a throttled fetch returns what was remembered,
    /// or `None` when nothing was.
    async fn open_orders_or_last(&self, symbol: Option<&str>) -> Result<Option<Vec<Order>>> {
        let key = symbol.unwrap_or(ALL_SYMBOLS).to_string();
        match self.fetch_open_orders(symbol).await {
            Ok(orders) => {
                self.last_open_orders.lock().insert(key, orders.clone());
                Ok(Some(orders))
            }
            Err(err) if err.is_rate_limited() => {
                let last = self.last_open_orders.lock().get(&key).cloned();
                warn!(
                    exchange = self.name(),
                    symbol = %key,
                    remembered = last.is_some(),
                    "open orders rate limited"
                );
                Ok(last)
            }
            Err(err) => Err(err),
        }
    }

    fn parse_order_id(&self, order_id: &str) -> Result<i64> {
        order_id
            .trim()
            .parse()
            .map_err(|_| ExchangeError::Format(format!("invalid Binance order id '{order_id}'")))
    }

    fn convert_order(&self, order: BinanceOrder) -> Result<Order> {
        let side = OrderSide::from_raw(&order.side)
            .ok_or_else(|| ExchangeError::Format(format!("unknown order side '{}'", order.side)))?;
        let order_type = match order.order_type.as_str() {
            "MARKET" => OrderType::Market,
            "LIMIT" => OrderType::Limit,
            other => {
                debug!(exchange = self.name(), order_type = other, "unexpected order type");
                OrderType::Limit
            }
        };
        Ok(RawOrder {
            id: order.order_id.to_string(),
            pair: self.symbol_to_pair(&order.symbol)?,
            side,
            order_type,
            raw_status: order.status,
            amount: parse_decimal("origQty", &order.orig_qty)?,
            filled_amount: parse_decimal("executedQty", &order.executed_qty)?,
            remaining_amount: None,
            rate: parse_decimal("price", &order.price)?,
            created_at: from_unix_millis(order.time)?,
        }
        .normalize(&self.vocabulary))
    }

    fn load_exchange_info(&self, info: &ExchangeInfo) -> Result<CurrencyLimits> {
        let mut symbols = HashMap::new();
        let mut limits = CurrencyLimits::new(self.base.name());
        for symbol in info.symbols.iter().filter(|symbol| symbol.status == "TRADING") {
            let pair = CurrencyPair::new(&symbol.base_asset, &symbol.quote_asset);
            limits.insert(pair.clone(), symbol_limits(symbol)?);
            symbols.insert(symbol.symbol.clone(), pair);
        }
        *self.symbols.write() = symbols;
        Ok(limits)
    }
}

#[async_trait]
impl Exchange for Binance {
    fn base(&self) -> &ExchangeBase {
        &self.base
    }

    async fn setup(&self) -> Result<()> {
        let info = self.exchange_info().await?;
        let limits = self.load_exchange_info(&info)?;
        let mut pairs: Vec<CurrencyPair> = limits.pairs().map(|(pair, _)| pair.clone()).collect();
        pairs.sort();
        self.base.update_available_pairs(pairs);
        *self.limits.write() = Some(limits);
        info!(exchange = self.name(), "loaded exchange info");
        Ok(())
    }

    #[instrument(skip(self, pair), fields(exchange = %self.base.name(), pair = %pair))]
    async fn fetch_ticker(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<Ticker> {
        let symbol = self.symbol(pair);
        let ticker: Ticker24h = self
            .public("/api/v1/ticker/24hr", &[("symbol", symbol.as_str())])
            .await?;
        Ok(Ticker {
            exchange: self.base.name().to_string(),
            pair: pair.clone(),
            asset_type,
            ask: parse_decimal("askPrice", &ticker.ask_price)?,
            bid: parse_decimal("bidPrice", &ticker.bid_price)?,
            last: parse_decimal("lastPrice", &ticker.last_price)?,
            low: Some(parse_decimal("lowPrice", &ticker.low_price)?),
            high: Some(parse_decimal("highPrice", &ticker.high_price)?),
            volume: parse_decimal("volume", &ticker.volume)?,
            timestamp: from_unix_millis(ticker.close_time)?,
        })
    }

    #[instrument(skip(self, pair), fields(exchange = %self.base.name(), pair = %pair))]
    async fn fetch_orderbook(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<OrderBook> {
        let symbol = self.symbol(pair);
        let depth: Depth = self
            .public("/api/v1/depth", &[("symbol", symbol.as_str()), ("limit", DEPTH_LIMIT)])
            .await?;
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
        let account: Account = self.signed(Method::GET, "/api/v3/account", Params::new()).await?;
        let currencies = account
            .balances
            .iter()
            .map(|balance| {
                let available = parse_decimal("free", &balance.free)?;
                let hold = parse_decimal("locked", &balance.locked)?;
                Ok(AccountCurrency {
                    currency: balance.asset.to_ascii_uppercase(),
                    total: available + hold,
                    available,
                    hold,
                })
            })
            .collect::<Result<Vec<_>>>()?;
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
        params.insert("symbol".into(), Value::from(self.symbol(&request.pair)));
        params.insert("side".into(), Value::from(request.side.as_str().to_ascii_uppercase()));
        params.insert("type".into(), Value::from("LIMIT"));
        params.insert("timeInForce".into(), Value::from("GTC"));
        params.insert("quantity".into(), Value::from(request.amount.to_string()));
        params.insert("price".into(), Value::from(price.to_string()));
        params.insert("newOrderRespType".into(), Value::from("ACK"));

        let ack: OrderAck = self.signed(Method::POST, "/api/v3/order", params).await?;
        Ok(ack.order_id.to_string())
    }

    #[instrument(skip(self, pair), fields(exchange = %self.base.name(), pair = %pair))]
    async fn cancel_order(&self, order_id: &str, pair: &CurrencyPair) -> Result<()> {
        let mut params = Params::new();
        params.insert("symbol".into(), Value::from(self.symbol(pair)));
        params.insert("orderId".into(), Value::from(self.parse_order_id(order_id)?));
        let _: Value = self.signed(Method::DELETE, "/api/v3/order", params).await?;
        Ok(())
    }

    #[instrument(skip(self, pair), fields(exchange = %self.base.name(), pair = %pair))]
    async fn order(&self, order_id: &str, pair: &CurrencyPair) -> Result<Order> {
        let mut params = Params::new();
        params.insert("symbol".into(), Value::from(self.symbol(pair)));
        params.insert("orderId".into(), Value::from(self.parse_order_id(order_id)?));
        let order: BinanceOrder = self.signed(Method::GET, "/api/v3/order", params).await?;
        self.convert_order(order)
    }

    /// One fetch per pair, or a single unfiltered fetch when `pairs` is empty.
    /// Throttled pairs fall back to their last successful result.
    #[instrument(skip(self, pairs), fields(exchange = %self.base.name(), count = pairs.len()))]
    async fn orders(&self, pairs: &[CurrencyPair]) -> Result<Vec<Order>> {
        if pairs.is_empty() {
            return self
                .open_orders_or_last(None)
                .await?
                .ok_or(ExchangeError::RateLimited);
        }

        let mut orders = Vec::new();
        let mut served = 0;
        for pair in pairs {
            let symbol = self.symbol(pair);
            if let Some(found) = self.open_orders_or_last(Some(&symbol)).await? {
                served += 1;
                orders.extend(found);
            }
        }
        if served == 0 {
            return Err(ExchangeError::RateLimited);
        }
        Ok(orders)
    }

    async fn limits(&self) -> Result<CurrencyLimits> {
        if let Some(limits) = self.limits.read().clone() {
            return Ok(limits);
        }
        let limits = self.load_exchange_info(&self.exchange_info().await?)?;
        *self.limits.write() = Some(limits.clone());
        Ok(limits)
    }
}

fn symbol_limits(symbol: &SymbolInfo) -> Result<PairLimits> {
    let mut limits = PairLimits::default();
    for filter in &symbol.filters {
        match filter {
            SymbolFilter::PriceFilter { tick_size } => {
                limits.price_decimal_places = decimal_places_of_step(parse_decimal("tickSize", tick_size)?);
            }
            SymbolFilter::LotSize { min_qty, step_size } => {
                limits.amount_decimal_places = decimal_places_of_step(parse_decimal("stepSize", step_size)?);
                let min_qty = parse_decimal("minQty", min_qty)?;
                if !min_qty.is_zero() {
                    limits.min_amount = Some(min_qty);
                }
            }
            SymbolFilter::MinNotional { min_notional } => {
                limits.min_total = Some(parse_decimal("minNotional", min_notional)?);
            }
            SymbolFilter::Other => {}
        }
    }
    Ok(limits)
}

/// Binance reports failures as `{code, msg}` with a 4xx status.
fn map_error(exchange: &str, err: ExchangeError) -> ExchangeError {
    let ExchangeError::HttpStatus { body, .. } = &err else {
        return err;
    };
    match serde_json::from_str::<BinanceError>(body) {
        Ok(payload) if payload.code == RATE_LIMIT_CODE => ExchangeError::RateLimited,
        Ok(payload) => ExchangeError::business(exchange, payload.msg),
        Err(_) => err,
    }
}
