//! Latest order book and ticker per `(exchange, pair, asset type)`.
//!
//! Each key owns its own slot, so writers for one market never contend with
//! readers of another. A put swaps an `Arc` under the slot lock; readers clone
//! the `Arc` out and never see a half-written snapshot.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use crate::pair::CurrencyPair;
use crate::types::{AssetType, OrderBook, Ticker};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarketKey {
    pub exchange: String,
    pub pair: CurrencyPair,
    pub asset_type: AssetType,
}

impl MarketKey {
    pub fn new(exchange: impl Into<String>, pair: &CurrencyPair, asset_type: AssetType) -> Self {
        Self {
            exchange: exchange.into(),
            pair: pair.clone(),
            asset_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    OrderBook,
    Ticker,
}

/// Sent to subscribers after every successful put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketUpdate {
    pub key: MarketKey,
    pub kind: SnapshotKind,
}

type Slot<T> = Arc<RwLock<Arc<T>>>;

#[derive(Debug)]
struct SnapshotStore<T> {
    slots: DashMap<MarketKey, Slot<T>>,
}

impl<T> Default for SnapshotStore<T> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<T> SnapshotStore<T> {
    fn get(&self, key: &MarketKey) -> Option<Arc<T>> {
        let slot = self.slots.get(key).map(|entry| Arc::clone(entry.value()))?;
        let snapshot = Arc::clone(&slot.read());
        Some(snapshot)
    }

    fn put(&self, key: MarketKey, snapshot: Arc<T>) {
        // Clone the slot handle first so the map shard is released before the
        // per-key write lock is taken.
        let existing = self.slots.get(&key).map(|entry| Arc::clone(entry.value()));
        match existing {
            Some(slot) => *slot.write() = snapshot,
            None => {
                let slot = self
                    .slots
                    .entry(key)
                    .or_insert_with(|| Arc::new(RwLock::new(Arc::clone(&snapshot))))
                    .value()
                    .clone();
                *slot.write() = snapshot;
            }
        }
    }

    fn evict_exchange(&self, exchange: &str) -> usize {
        let before = self.slots.len();
        self.slots.retain(|key, _| key.exchange != exchange);
        before - self.slots.len()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Shared between every driver of one process; drivers are the only writers.
#[derive(Debug, Default)]
pub struct MarketDataCache {
    orderbooks: SnapshotStore<OrderBook>,
    tickers: SnapshotStore<Ticker>,
    tx: Option<broadcast::Sender<MarketUpdate>>,
}

impl MarketDataCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache that also publishes a [`MarketUpdate`] per put.
    #[must_use]
    pub fn with_notifications(capacity: usize) -> (Self, broadcast::Receiver<MarketUpdate>) {
        let (tx, rx) = broadcast::channel(capacity);
        let cache = Self {
            tx: Some(tx),
            ..Self::default()
        };
        (cache, rx)
    }

    /// `None` if the cache was built without notifications.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<MarketUpdate>> {
        self.tx.as_ref().map(broadcast::Sender::subscribe)
    }

    /// `None` until a book has been put for the key; never an empty book.
    pub fn orderbook(
        &self,
        exchange: &str,
        pair: &CurrencyPair,
        asset_type: AssetType,
    ) -> Option<Arc<OrderBook>> {
        self.orderbooks.get(&MarketKey::new(exchange, pair, asset_type))
    }

    /// Replaces the snapshot for the book's own key wholesale.
    pub fn put_orderbook(&self, book: OrderBook) -> Arc<OrderBook> {
        let key = MarketKey::new(book.exchange.as_str(), &book.pair, book.asset_type);
        let book = Arc::new(book);
        self.orderbooks.put(key.clone(), Arc::clone(&book));
        self.notify(key, SnapshotKind::OrderBook);
        book
    }

    pub fn ticker(
        &self,
        exchange: &str,
        pair: &CurrencyPair,
        asset_type: AssetType,
    ) -> Option<Arc<Ticker>> {
        self.tickers.get(&MarketKey::new(exchange, pair, asset_type))
    }

    pub fn put_ticker(&self, ticker: Ticker) -> Arc<Ticker> {
        let key = MarketKey::new(ticker.exchange.as_str(), &ticker.pair, ticker.asset_type);
        let ticker = Arc::new(ticker);
        self.tickers.put(key.clone(), Arc::clone(&ticker));
        self.notify(key, SnapshotKind::Ticker);
        ticker
    }

    /// Drops every snapshot owned by `exchange`. Only called when that
    /// exchange's driver is torn down.
    pub fn evict_exchange(&self, exchange: &str) -> usize {
        let removed = self.orderbooks.evict_exchange(exchange) + self.tickers.evict_exchange(exchange);
        trace!(exchange, removed, "evicted market data");
        removed
    }

    pub fn len(&self) -> usize {
        self.orderbooks.len() + self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, key: MarketKey, kind: SnapshotKind) {
        if let Some(tx) = &self.tx {
            // No subscribers is fine.
            let _ = tx.send(MarketUpdate { key, kind });
        }
    }
}
