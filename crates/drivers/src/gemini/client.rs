use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use exchange_core::nonce::NonceSeed;
use exchange_core::signer::{EncodedJsonPayload, HashAlgorithm, SignatureEncoding};
use exchange_core::{
    AccountCurrency, AccountInfo, AssetType, BookLevel, CurrencyCatalog, CurrencyLimits, CurrencyPair,
    Exchange, ExchangeBase, ExchangeConfig, ExchangeDefaults, ExchangeError, MarketDataCache, Order,
    OrderBook, OrderRequest, OrderSide, OrderStatus, OrderType, PairFormat, PairLimits, Params, RawOrder,
    RequestSigner, Result, SessionRegistry, StatusVocabulary, Ticker,
};
use once_cell::sync::Lazy;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::models::{
    Balance, Book, BookEntry, CancelAllResult, CancelDetails, ErrorCapture, GeminiOrder, Heartbeat,
    PubTicker,
};
use crate::http::{headers, RestClient};
use crate::utils::{decimal_from_value, from_unix_millis, parse_decimal};

pub const GEMINI_API_URL: &str = "https://api.gemini.com";
pub const GEMINI_SANDBOX_API_URL: &str = "https://api.sandbox.gemini.com";
const API_VERSION: &str = "1";

/// Published minimums; Gemini does not declare a minimum notional.
static STATIC_LIMITS: Lazy<Vec<(CurrencyPair, PairLimits)>> = Lazy::new(|| {
    vec![
        (
            CurrencyPair::new("BTC", "USD"),
            PairLimits::new(2, 8).with_min_amount(Decimal::new(1, 5)),
        ),
        (
            CurrencyPair::new("ETH", "USD"),
            PairLimits::new(2, 6).with_min_amount(Decimal::new(1, 3)),
        ),
        (
            CurrencyPair::new("ETH", "BTC"),
            PairLimits::new(5, 6).with_min_amount(Decimal::new(1, 3)),
        ),
    ]
});

/// Permission attached to a Gemini API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionRole {
    #[default]
    Trader,
    FundManager,
}

impl SessionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionRole::Trader => "trader",
            SessionRole::FundManager => "fundmanager",
        }
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which orders a bulk cancel reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelScope {
    /// Orders placed with this session's API key.
    Session,
    /// Every order on the account, including ones placed through the UI.
    Account,
}

impl CancelScope {
    fn endpoint(&self) -> &'static str {
        match self {
            CancelScope::Session => "order/cancel/session",
            CancelScope::Account => "order/cancel/all",
        }
    }
}

pub struct Gemini {
    base: ExchangeBase,
    rest: RestClient,
    vocabulary: StatusVocabulary,
    role: SessionRole,
    requires_heartbeat: bool,
}

impl Gemini {
    pub fn defaults() -> ExchangeDefaults {
        ExchangeDefaults::new("Gemini", PairFormat::new("", false))
            .with_config_format(PairFormat::new("", true))
            .with_nonce_seed(NonceSeed::UnixMillis)
    }

    /// HMAC-SHA384 over the base64 JSON payload, hex encoded.
    pub fn signer() -> RequestSigner {
        RequestSigner::new(HashAlgorithm::Sha384, SignatureEncoding::Hex, EncodedJsonPayload)
    }

    pub fn vocabulary() -> StatusVocabulary {
        StatusVocabulary::new()
            .with(["live"], OrderStatus::Active)
            .with(["cancelled"], OrderStatus::Aborted)
            .with(["closed"], OrderStatus::Filled)
    }

    pub fn new(config: &ExchangeConfig, cache: Arc<MarketDataCache>) -> Result<Self> {
        let base = ExchangeBase::from_config(config, Self::defaults(), Self::signer(), cache)?;
        let url = match (&config.api_url, config.use_sandbox) {
            (Some(url), _) => url.clone(),
            (None, true) => GEMINI_SANDBOX_API_URL.to_string(),
            (None, false) => GEMINI_API_URL.to_string(),
        };
        let rest = RestClient::for_exchange(config, base.name(), url)?;
        Ok(Self {
            base,
            rest,
            vocabulary: Self::vocabulary(),
            role: SessionRole::default(),
            requires_heartbeat: false,
        })
    }

    pub fn with_session(mut self, role: SessionRole, requires_heartbeat: bool) -> Self {
        self.role = role;
        self.requires_heartbeat = requires_heartbeat;
        self
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn requires_heartbeat(&self) -> bool {
        self.requires_heartbeat
    }

    pub fn api_url(&self) -> &str {
        self.rest.base_url()
    }

    fn symbol(&self, pair: &CurrencyPair) -> String {
        self.base.format_pair(pair)
    }

    fn ensure_role(&self, role: SessionRole) -> Result<()> {
        if self.role != role {
            return Err(ExchangeError::business(
                self.base.name(),
                format!("api key role '{}' cannot perform '{role}' calls", self.role),
            ));
        }
        Ok(())
    }

    /// Decodes a response, turning a Gemini error envelope into a business
    /// error whether it arrived with a 2xx or a 4xx status.
    async fn send<T>(&self, builder: RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let value: Value = match self.rest.execute(builder).await {
            Ok(value) => value,
            Err(ExchangeError::HttpStatus { status, body }) => {
                let message = serde_json::from_str::<Value>(&body)
                    .ok()
                    .and_then(|value| ErrorCapture::from_value(&value));
                return Err(match message {
                    Some(message) => ExchangeError::business(self.base.name(), message),
                    None => ExchangeError::HttpStatus { status, body },
                });
            }
            Err(err) => return Err(err),
        };
        if let Some(message) = ErrorCapture::from_value(&value) {
            return Err(ExchangeError::business(self.base.name(), message));
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn public<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.send(self.rest.request(Method::GET, path)).await
    }

    /// The signed payload travels in headers; the body stays empty.
    async fn private<T>(&self, endpoint: &str, params: Params) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let path = format!("/v{API_VERSION}/{endpoint}");
        let signed = self.base.auth().sign(&path, &params)?;
        let headers = headers([
            ("x-gemini-apikey", signed.api_key.as_str()),
            ("x-gemini-payload", signed.body.as_str()),
            ("x-gemini-signature", signed.signature.as_str()),
        ])?;
        let builder = self
            .rest
            .request(Method::POST, &path)
            .headers(headers)
            .header(CONTENT_TYPE, "text/plain")
            .body(String::new());
        self.send(builder).await
    }

    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    pub async fn symbols(&self) -> Result<Vec<String>> {
        self.public(&format!("/v{API_VERSION}/symbols")).await
    }

    /// Keeps sessions that asked for heartbeats from having their orders
    /// cancelled by the exchange.
    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    pub async fn heartbeat(&self) -> Result<()> {
        let response: Heartbeat = self.private("heartbeat", Params::new()).await?;
        debug!(result = %response.result, "heartbeat acknowledged");
        Ok(())
    }

    /// Cancels every order in `scope` and reports which ids went and which
    /// the exchange refused.
    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    pub async fn cancel_all_orders(&self, scope: CancelScope) -> Result<CancelDetails> {
        self.ensure_role(SessionRole::Trader)?;
        let response: CancelAllResult = self.private(scope.endpoint(), Params::new()).await?;
        info!(
            result = %response.result,
            cancelled = response.details.cancelled_orders.len(),
            rejected = response.details.cancel_rejects.len(),
            "bulk cancel finished"
        );
        Ok(response.details)
    }

    fn parse_order_id(&self, order_id: &str) -> Result<i64> {
        order_id
            .trim()
            .parse()
            .map_err(|_| ExchangeError::Format(format!("invalid Gemini order id '{order_id}'")))
    }

    fn convert_order(&self, order: GeminiOrder) -> Result<Order> {
        let side = OrderSide::from_raw(&order.side)
            .ok_or_else(|| ExchangeError::Format(format!("unknown order side '{}'", order.side)))?;
        let order_type = if order.order_type.contains("market") {
            OrderType::Market
        } else {
            OrderType::Limit
        };
        Ok(RawOrder {
            id: order.order_id.clone(),
            pair: self.base.parse_pair(&order.symbol)?,
            side,
            order_type,
            raw_status: order.status_word().to_string(),
            amount: parse_decimal("original_amount", &order.original_amount)?,
            filled_amount: parse_decimal("executed_amount", &order.executed_amount)?,
            remaining_amount: Some(parse_decimal("remaining_amount", &order.remaining_amount)?),
            rate: parse_decimal("price", &order.price)?,
            created_at: from_unix_millis(order.timestampms)?,
        }
        .normalize(&self.vocabulary))
    }
}

/// Registers a keyed Gemini session. Each session carries its own credentials
/// and role, so several API keys can be driven side by side.
pub fn add_session(
    sessions: &SessionRegistry<Gemini>,
    id: u32,
    config: &ExchangeConfig,
    cache: Arc<MarketDataCache>,
    role: SessionRole,
    requires_heartbeat: bool,
) -> Result<Arc<Gemini>> {
    let session = Gemini::new(config, cache)?.with_session(role, requires_heartbeat);
    sessions.create(id, session)
}

#[async_trait]
impl Exchange for Gemini {
    fn base(&self) -> &ExchangeBase {
        &self.base
    }

    async fn setup(&self) -> Result<()> {
        let open = CurrencyCatalog::open();
        let format = self.base.request_format();
        let mut pairs: Vec<CurrencyPair> = self
            .symbols()
            .await?
            .iter()
            .filter_map(|symbol| format.parse(symbol, &open).ok())
            .collect();
        pairs.sort();
        pairs.dedup();
        self.base.update_available_pairs(pairs);
        info!(exchange = self.name(), "loaded symbols");
        Ok(())
    }

    #[instrument(skip(self, pair), fields(exchange = %self.base.name(), pair = %pair))]
    async fn fetch_ticker(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<Ticker> {
        let path = format!("/v{API_VERSION}/pubticker/{}", self.symbol(pair));
        let ticker: PubTicker = self.public(&path).await?;
        let volume = match ticker.volume.get(pair.base()) {
            Some(value) => decimal_from_value("volume", value)?,
            None => Decimal::ZERO,
        };
        let timestamp = match ticker.volume.get("timestamp").and_then(Value::as_i64) {
            Some(millis) => from_unix_millis(millis)?,
            None => Utc::now(),
        };
        // v1 tickers carry no daily range.
        Ok(Ticker {
            exchange: self.base.name().to_string(),
            pair: pair.clone(),
            asset_type,
            ask: parse_decimal("ask", &ticker.ask)?,
            bid: parse_decimal("bid", &ticker.bid)?,
            last: parse_decimal("last", &ticker.last)?,
            low: None,
            high: None,
            volume,
            timestamp,
        })
    }

    #[instrument(skip(self, pair), fields(exchange = %self.base.name(), pair = %pair))]
    async fn fetch_orderbook(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<OrderBook> {
        let path = format!("/v{API_VERSION}/book/{}", self.symbol(pair));
        let book: Book = self.public(&path).await?;
        Ok(OrderBook::new(
            self.base.name(),
            pair.clone(),
            asset_type,
            book_levels(&book.bids)?,
            book_levels(&book.asks)?,
        ))
    }

    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    async fn account_info(&self) -> Result<AccountInfo> {
        let balances: Vec<Balance> = self.private("balances", Params::new()).await?;
        let currencies = balances
            .iter()
            .map(|balance| {
                let total = parse_decimal("amount", &balance.amount)?;
                let available = parse_decimal("available", &balance.available)?;
                Ok(AccountCurrency {
                    currency: balance.currency.to_ascii_uppercase(),
                    total,
                    available,
                    hold: (total - available).max(Decimal::ZERO),
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
        self.ensure_role(SessionRole::Trader)?;
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
        params.insert("amount".into(), Value::from(request.amount.to_string()));
        params.insert("price".into(), Value::from(price.to_string()));
        params.insert("side".into(), Value::from(request.side.as_str()));
        params.insert("type".into(), Value::from("exchange limit"));

        let order: GeminiOrder = self.private("order/new", params).await?;
        Ok(order.order_id)
    }

    #[instrument(skip(self), fields(exchange = %self.base.name()))]
    async fn cancel_order(&self, order_id: &str, _pair: &CurrencyPair) -> Result<()> {
        self.ensure_role(SessionRole::Trader)?;
        let mut params = Params::new();
        params.insert("order_id".into(), Value::from(self.parse_order_id(order_id)?));
        let _: GeminiOrder = self.private("order/cancel", params).await?;
        Ok(())
    }

    /// Any order created by this account, cancelled and filled ones included.
    #[instrument(skip(self, _pair), fields(exchange = %self.base.name()))]
    async fn order(&self, order_id: &str, _pair: &CurrencyPair) -> Result<Order> {
        let mut params = Params::new();
        params.insert("order_id".into(), Value::from(self.parse_order_id(order_id)?));
        let order: GeminiOrder = self.private("order/status", params).await?;
        self.convert_order(order)
    }

    #[instrument(skip(self, pairs), fields(exchange = %self.base.name()))]
    async fn orders(&self, pairs: &[CurrencyPair]) -> Result<Vec<Order>> {
        let raw: Vec<GeminiOrder> = self.private("orders", Params::new()).await?;
        let mut orders = Vec::with_capacity(raw.len());
        for order in raw {
            let order = self.convert_order(order)?;
            if pairs.is_empty() || pairs.contains(&order.pair) {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    async fn limits(&self) -> Result<CurrencyLimits> {
        let mut limits = CurrencyLimits::new(self.base.name());
        for (pair, entry) in STATIC_LIMITS.iter() {
            limits.insert(pair.clone(), *entry);
        }
        Ok(limits)
    }
}

fn book_levels(entries: &[BookEntry]) -> Result<Vec<BookLevel>> {
    entries
        .iter()
        .map(|entry| {
            Ok(BookLevel::new(
                parse_decimal("price", &entry.price)?,
                parse_decimal("amount", &entry.amount)?,
            ))
        })
        .collect()
}
