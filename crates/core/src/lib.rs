pub mod cache;
pub mod config;
pub mod error;
pub mod exchange;
pub mod limits;
pub mod nonce;
pub mod order;
pub mod pair;
pub mod poller;
pub mod registry;
pub mod signer;
pub mod telemetry;
pub mod types;

pub use cache::{MarketDataCache, MarketKey, MarketUpdate, SnapshotKind};
pub use config::{AppConfig, ConfigError, ExchangeConfig};
pub use error::{ExchangeError, Result};
pub use exchange::{Exchange, ExchangeBase, ExchangeDefaults};
pub use limits::{CurrencyLimits, PairLimits, UNDEFINED_DECIMAL_PLACES};
pub use nonce::{NonceSeed, NonceSequencer};
pub use order::{Order, OrderRequest, OrderStatus, RawOrder, StatusVocabulary};
pub use pair::{CurrencyCatalog, CurrencyPair, PairFormat};
pub use registry::{ExchangeRegistry, SessionRegistry};
pub use signer::{Authenticator, Credentials, Params, RequestSigner};
pub use types::{AccountCurrency, AccountInfo, AssetType, BookLevel, OrderBook, OrderSide, OrderType, Ticker};
