//! The capability contract every exchange driver implements, and the shared
//! state each driver composes instead of inheriting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::cache::MarketDataCache;
use crate::config::ExchangeConfig;
use crate::error::{ExchangeError, Result};
use crate::limits::CurrencyLimits;
use crate::nonce::{NonceSeed, NonceSequencer};
use crate::order::{Order, OrderRequest};
use crate::pair::{CurrencyCatalog, CurrencyPair, PairFormat};
use crate::signer::{Authenticator, RequestSigner};
use crate::types::{AccountInfo, AssetType, OrderBook, Ticker};

/// Driver-declared values used where the configuration is silent.
#[derive(Debug, Clone)]
pub struct ExchangeDefaults {
    pub name: &'static str,
    pub request_format: PairFormat,
    pub config_format: PairFormat,
    pub nonce_seed: NonceSeed,
    pub asset_types: Vec<AssetType>,
}

impl ExchangeDefaults {
    pub fn new(name: &'static str, request_format: PairFormat) -> Self {
        Self {
            name,
            config_format: request_format.clone(),
            request_format,
            nonce_seed: NonceSeed::default(),
            asset_types: vec![AssetType::Spot],
        }
    }

    pub fn with_config_format(mut self, config_format: PairFormat) -> Self {
        self.config_format = config_format;
        self
    }

    pub fn with_nonce_seed(mut self, nonce_seed: NonceSeed) -> Self {
        self.nonce_seed = nonce_seed;
        self
    }
}

/// State shared by every driver: identity, pair bookkeeping, the credential's
/// authenticator and a handle on the process-wide market data cache.
#[derive(Debug)]
pub struct ExchangeBase {
    name: String,
    enabled: bool,
    verbose: bool,
    websocket: bool,
    polling_delay: Duration,
    request_format: PairFormat,
    config_format: PairFormat,
    base_currencies: Vec<String>,
    available_pairs: RwLock<Vec<CurrencyPair>>,
    enabled_pairs: Vec<CurrencyPair>,
    asset_types: Vec<AssetType>,
    auth: Authenticator,
    cache: Arc<MarketDataCache>,
}

impl ExchangeBase {
    /// Fails with `Config` when persisted pairs do not parse or enabled pairs
    /// are not available. These are startup errors and are never retried.
    pub fn from_config(
        config: &ExchangeConfig,
        defaults: ExchangeDefaults,
        signer: RequestSigner,
        cache: Arc<MarketDataCache>,
    ) -> Result<Self> {
        let request_format = config
            .request_currency_pair_format
            .clone()
            .unwrap_or(defaults.request_format);
        let config_format = config
            .config_currency_pair_format
            .clone()
            .unwrap_or(defaults.config_format);

        let base_currencies: Vec<String> = config
            .base_currencies
            .split(',')
            .map(|code| code.trim().to_ascii_uppercase())
            .filter(|code| !code.is_empty())
            .collect();

        let catalog = CurrencyCatalog::hinted(&base_currencies);
        let available_pairs = config_format
            .parse_list(&config.available_pairs, &catalog)
            .map_err(|err| startup_error(&config.name, "available_pairs", err))?;
        let mut enabled_pairs = config_format
            .parse_list(&config.enabled_pairs, &catalog)
            .map_err(|err| startup_error(&config.name, "enabled_pairs", err))?;

        if enabled_pairs.is_empty() {
            enabled_pairs = available_pairs.clone();
        } else if !available_pairs.is_empty() {
            if let Some(missing) = enabled_pairs.iter().find(|pair| !available_pairs.contains(pair)) {
                return Err(ExchangeError::Config(format!(
                    "{}: enabled pair {missing} is not an available pair",
                    config.name
                )));
            }
        }

        let name = if config.name.trim().is_empty() {
            defaults.name.to_string()
        } else {
            config.name.clone()
        };
        let auth = Authenticator::new(
            name.clone(),
            config.credentials(),
            NonceSequencer::new(defaults.nonce_seed),
            signer,
        );

        Ok(Self {
            name,
            enabled: config.enabled,
            verbose: config.verbose,
            websocket: config.websocket,
            polling_delay: Duration::from_secs(config.polling_delay_secs.max(1)),
            request_format,
            config_format,
            base_currencies,
            available_pairs: RwLock::new(available_pairs),
            enabled_pairs,
            asset_types: defaults.asset_types,
            auth,
            cache,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn websocket(&self) -> bool {
        self.websocket
    }

    pub fn polling_delay(&self) -> Duration {
        self.polling_delay
    }

    pub fn request_format(&self) -> &PairFormat {
        &self.request_format
    }

    pub fn config_format(&self) -> &PairFormat {
        &self.config_format
    }

    pub fn base_currencies(&self) -> &[String] {
        &self.base_currencies
    }

    pub fn available_pairs(&self) -> Vec<CurrencyPair> {
        self.available_pairs.read().clone()
    }

    pub fn enabled_pairs(&self) -> &[CurrencyPair] {
        &self.enabled_pairs
    }

    pub fn asset_types(&self) -> &[AssetType] {
        &self.asset_types
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn cache(&self) -> &Arc<MarketDataCache> {
        &self.cache
    }

    /// Renders `pair` the way this exchange's REST API spells it.
    pub fn format_pair(&self, pair: &CurrencyPair) -> String {
        self.request_format.format(pair)
    }

    /// Inverse of [`ExchangeBase::format_pair`], resolved against the codes
    /// of every known pair.
    pub fn parse_pair(&self, symbol: &str) -> Result<CurrencyPair> {
        self.request_format.parse(symbol, &self.catalog())
    }

    pub fn catalog(&self) -> CurrencyCatalog {
        let available = self.available_pairs.read();
        let mut catalog = CurrencyCatalog::from_pairs(available.iter().chain(self.enabled_pairs.iter()));
        catalog.extend(&self.base_currencies);
        catalog
    }

    /// Replaces the available pairs with the exchange's own product listing.
    pub fn update_available_pairs(&self, pairs: Vec<CurrencyPair>) {
        for pair in &self.enabled_pairs {
            if !pairs.contains(pair) {
                warn!(exchange = %self.name, %pair, "enabled pair is no longer offered");
            }
        }
        info!(exchange = %self.name, count = pairs.len(), "updated available pairs");
        *self.available_pairs.write() = pairs;
    }
}

fn startup_error(exchange: &str, field: &str, err: ExchangeError) -> ExchangeError {
    ExchangeError::Config(format!("{exchange}: invalid {field}: {err}"))
}

/// One implementation per exchange. Market data writes go through the cache
/// via the provided `update_*` methods; authenticated calls go through
/// [`ExchangeBase::auth`].
#[async_trait]
pub trait Exchange: Send + Sync {
    fn base(&self) -> &ExchangeBase;

    fn name(&self) -> &str {
        self.base().name()
    }

    /// One-off startup work such as loading product listings.
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_ticker(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<Ticker>;

    async fn fetch_orderbook(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<OrderBook>;

    async fn account_info(&self) -> Result<AccountInfo> {
        Err(ExchangeError::unsupported(self.name(), "account_info"))
    }

    /// Returns the exchange-assigned order id.
    async fn new_order(&self, _request: &OrderRequest) -> Result<String> {
        Err(ExchangeError::unsupported(self.name(), "new_order"))
    }

    async fn cancel_order(&self, _order_id: &str, _pair: &CurrencyPair) -> Result<()> {
        Err(ExchangeError::unsupported(self.name(), "cancel_order"))
    }

    /// One order by exchange id, including orders that are no longer open.
    async fn order(&self, _order_id: &str, _pair: &CurrencyPair) -> Result<Order> {
        Err(ExchangeError::unsupported(self.name(), "order"))
    }

    /// Open orders for `pairs`.
    async fn orders(&self, _pairs: &[CurrencyPair]) -> Result<Vec<Order>> {
        Err(ExchangeError::unsupported(self.name(), "orders"))
    }

    async fn limits(&self) -> Result<CurrencyLimits> {
        Err(ExchangeError::unsupported(self.name(), "limits"))
    }

    /// Fetches and stores a fresh ticker.
    async fn update_ticker(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<Arc<Ticker>> {
        let ticker = self.fetch_ticker(pair, asset_type).await?;
        Ok(self.base().cache().put_ticker(ticker))
    }

    async fn update_orderbook(
        &self,
        pair: &CurrencyPair,
        asset_type: AssetType,
    ) -> Result<Arc<OrderBook>> {
        let book = self.fetch_orderbook(pair, asset_type).await?;
        Ok(self.base().cache().put_orderbook(book))
    }

    /// Cached ticker, fetched on a miss.
    async fn ticker(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<Arc<Ticker>> {
        if let Some(ticker) = self.base().cache().ticker(self.name(), pair, asset_type) {
            return Ok(ticker);
        }
        self.update_ticker(pair, asset_type).await
    }

    async fn orderbook(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<Arc<OrderBook>> {
        if let Some(book) = self.base().cache().orderbook(self.name(), pair, asset_type) {
            return Ok(book);
        }
        self.update_orderbook(pair, asset_type).await
    }

    /// Always fetches; a rate-limited fetch serves the cached snapshot when
    /// there is one.
    async fn refresh_ticker(&self, pair: &CurrencyPair, asset_type: AssetType) -> Result<Arc<Ticker>> {
        match self.update_ticker(pair, asset_type).await {
            Err(err) if err.is_rate_limited() => {
                let cached = self.base().cache().ticker(self.name(), pair, asset_type);
                match cached {
                    Some(ticker) => {
                        debug!(exchange = self.name(), %pair, "rate limited, serving cached ticker");
                        Ok(ticker)
                    }
                    None => Err(err),
                }
            }
            other => other,
        }
    }

    async fn refresh_orderbook(
        &self,
        pair: &CurrencyPair,
        asset_type: AssetType,
    ) -> Result<Arc<OrderBook>> {
        match self.update_orderbook(pair, asset_type).await {
            Err(err) if err.is_rate_limited() => {
                let cached = self.base().cache().orderbook(self.name(), pair, asset_type);
                match cached {
                    Some(book) => {
                        debug!(exchange = self.name(), %pair, "rate limited, serving cached order book");
                        Ok(book)
                    }
                    None => Err(err),
                }
            }
            other => other,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedExchange;
    use super::*;
    use crate::signer::{HashAlgorithm, QueryStringPayload, SignatureEncoding};
    use rust_decimal_macros::dec;

    fn eth_usd() -> CurrencyPair {
        CurrencyPair::new("ETH", "USD")
    }

    fn signer() -> RequestSigner {
        RequestSigner::new(HashAlgorithm::Sha256, SignatureEncoding::Hex, QueryStringPayload)
    }

    #[tokio::test]
    async fn rate_limited_refresh_serves_cached_snapshot() {
        let exchange = ScriptedExchange::new("Scripted", Arc::new(MarketDataCache::new()), "ETH/USD");
        exchange.push_ticker(Ok(dec!(100)));
        exchange.push_ticker(Err(ExchangeError::RateLimited));

        let first = exchange.refresh_ticker(&eth_usd(), AssetType::Spot).await.unwrap();
        let second = exchange.refresh_ticker(&eth_usd(), AssetType::Spot).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.last, dec!(100));
    }

    #[tokio::test]
    async fn rate_limited_refresh_without_cache_fails() {
        let exchange = ScriptedExchange::new("Scripted", Arc::new(MarketDataCache::new()), "ETH/USD");
        exchange.push_ticker(Err(ExchangeError::RateLimited));

        let err = exchange.refresh_ticker(&eth_usd(), AssetType::Spot).await.unwrap_err();
        assert_eq!(err, ExchangeError::RateLimited);
    }

    #[tokio::test]
    async fn other_errors_are_not_downgraded() {
        let exchange = ScriptedExchange::new("Scripted", Arc::new(MarketDataCache::new()), "ETH/USD");
        exchange.push_ticker(Ok(dec!(100)));
        exchange.push_ticker(Err(ExchangeError::Transport("reset".into())));

        exchange.refresh_ticker(&eth_usd(), AssetType::Spot).await.unwrap();
        let err = exchange.refresh_ticker(&eth_usd(), AssetType::Spot).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Transport(_)));
    }

    #[tokio::test]
    async fn get_or_update_fetches_only_on_miss() {
        let exchange = ScriptedExchange::new("Scripted", Arc::new(MarketDataCache::new()), "ETH/USD");
        exchange.push_ticker(Ok(dec!(7)));

        assert_eq!(exchange.ticker(&eth_usd(), AssetType::Spot).await.unwrap().last, dec!(7));
        assert_eq!(exchange.ticker(&eth_usd(), AssetType::Spot).await.unwrap().last, dec!(7));
        assert_eq!(exchange.fetches(), 1);

        exchange.orderbook(&eth_usd(), AssetType::Spot).await.unwrap();
        exchange.orderbook(&eth_usd(), AssetType::Spot).await.unwrap();
        assert_eq!(exchange.fetches(), 2);
    }

    #[tokio::test]
    async fn unimplemented_capabilities_are_unsupported() {
        let exchange = ScriptedExchange::new("Scripted", Arc::new(MarketDataCache::new()), "");
        let err = exchange.account_info().await.unwrap_err();
        assert_eq!(err, ExchangeError::unsupported("Scripted", "account_info"));
        assert!(matches!(exchange.limits().await, Err(ExchangeError::Unsupported { .. })));
        let pair = CurrencyPair::new("ETH", "BTC");
        assert_eq!(
            exchange.order("42", &pair).await.unwrap_err(),
            ExchangeError::unsupported("Scripted", "order")
        );
    }

    #[test]
    fn base_parses_config_pairs() {
        let mut config = ExchangeConfig::new("Liqui");
        config.available_pairs = "eth_btc,ltc_btc".into();
        config.enabled_pairs = "ltc_btc".into();
        config.base_currencies = "btc, usd".into();
        config.config_currency_pair_format = Some(PairFormat::new("_", false));

        let base = ExchangeBase::from_config(
            &config,
            ExchangeDefaults::new("Liqui", PairFormat::new("_", false).with_separator("-")),
            signer(),
            Arc::new(MarketDataCache::new()),
        )
        .unwrap();

        assert_eq!(base.enabled_pairs(), &[CurrencyPair::new("LTC", "BTC")]);
        assert_eq!(base.available_pairs().len(), 2);
        assert_eq!(base.base_currencies(), &["BTC".to_string(), "USD".to_string()]);
        assert_eq!(base.format_pair(&CurrencyPair::new("ETH", "BTC")), "eth_btc");
        assert_eq!(base.parse_pair("ltc_btc").unwrap(), CurrencyPair::new("LTC", "BTC"));
        assert!(!base.auth().has_credentials());
    }

    #[test]
    fn base_splits_config_pairs_on_base_currencies() {
        let mut config = ExchangeConfig::new("Binance");
        config.available_pairs = "ETHUSDT,DASHBTC,LTCBTC".into();
        config.enabled_pairs = "ETHUSDT,DASHBTC".into();
        config.base_currencies = "USDT,BTC".into();

        let base = ExchangeBase::from_config(
            &config,
            ExchangeDefaults::new("Binance", PairFormat::new("", true)),
            signer(),
            Arc::new(MarketDataCache::new()),
        )
        .unwrap();

        assert_eq!(
            base.enabled_pairs(),
            &[CurrencyPair::new("ETH", "USDT"), CurrencyPair::new("DASH", "BTC")]
        );
        assert_eq!(base.parse_pair("DASHBTC").unwrap(), CurrencyPair::new("DASH", "BTC"));
    }

    #[test]
    fn enabled_pairs_must_be_available() {
        let mut config = ExchangeConfig::new("Kraken");
        config.available_pairs = "ETH/USD".into();
        config.enabled_pairs = "BTC/USD".into();

        let err = ExchangeBase::from_config(
            &config,
            ExchangeDefaults::new("Kraken", PairFormat::new("/", true)),
            signer(),
            Arc::new(MarketDataCache::new()),
        )
        .unwrap_err();
        assert!(matches!(err, ExchangeError::Config(_)), "{err}");
    }

    #[test]
    fn malformed_persisted_pair_is_fatal() {
        let mut config = ExchangeConfig::new("Kraken");
        config.available_pairs = "ETH/USD/BTC".into();

        let err = ExchangeBase::from_config(
            &config,
            ExchangeDefaults::new("Kraken", PairFormat::new("/", true)),
            signer(),
            Arc::new(MarketDataCache::new()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("available_pairs"));
    }

    #[test]
    fn delimiterless_symbols_resolve_against_known_pairs() {
        let mut config = ExchangeConfig::new("Binance");
        config.available_pairs = "ETH/USDT,BTC/USDT".into();
        config.config_currency_pair_format = Some(PairFormat::new("/", true));

        let base = ExchangeBase::from_config(
            &config,
            ExchangeDefaults::new("Binance", PairFormat::new("", true)),
            signer(),
            Arc::new(MarketDataCache::new()),
        )
        .unwrap();
        assert_eq!(base.parse_pair("ETHUSDT").unwrap(), CurrencyPair::new("ETH", "USDT"));

        base.update_available_pairs(vec![CurrencyPair::new("LTC", "USDT")]);
        assert_eq!(base.available_pairs(), vec![CurrencyPair::new("LTC", "USDT")]);
    }
}
