//! Explicit registries created at startup and torn down at shutdown, handed to
//! callers instead of living in process-wide statics.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::cache::MarketDataCache;
use crate::error::{ExchangeError, Result};
use crate::exchange::Exchange;

/// Exchange drivers keyed by lower-cased name, sharing one market data cache.
pub struct ExchangeRegistry {
    cache: Arc<MarketDataCache>,
    exchanges: RwLock<BTreeMap<String, Arc<dyn Exchange>>>,
}

impl ExchangeRegistry {
    pub fn new(cache: Arc<MarketDataCache>) -> Self {
        Self {
            cache,
            exchanges: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<MarketDataCache> {
        &self.cache
    }

    pub fn register(&self, exchange: Arc<dyn Exchange>) -> Result<()> {
        let key = exchange.name().to_ascii_lowercase();
        let mut exchanges = self.exchanges.write();
        if exchanges.contains_key(&key) {
            return Err(ExchangeError::Config(format!(
                "exchange {} is already registered",
                exchange.name()
            )));
        }
        info!(exchange = exchange.name(), "registered exchange");
        exchanges.insert(key, exchange);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Exchange>> {
        self.exchanges.read().get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.exchanges
            .read()
            .values()
            .map(|exchange| exchange.name().to_string())
            .collect()
    }

    pub fn enabled(&self) -> Vec<Arc<dyn Exchange>> {
        self.exchanges
            .read()
            .values()
            .filter(|exchange| exchange.base().is_enabled())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.exchanges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes one driver and the snapshots it owns.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Exchange>> {
        let removed = self.exchanges.write().remove(&name.to_ascii_lowercase())?;
        self.cache.evict_exchange(removed.name());
        info!(exchange = removed.name(), "removed exchange");
        Some(removed)
    }

    /// Drops every driver and its cached snapshots.
    pub fn teardown(&self) {
        let drained = std::mem::take(&mut *self.exchanges.write());
        for exchange in drained.values() {
            self.cache.evict_exchange(exchange.name());
        }
        info!(count = drained.len(), "exchange registry torn down");
    }
}

/// Per-account sessions keyed by a caller-chosen id.
#[derive(Debug)]
pub struct SessionRegistry<V> {
    sessions: RwLock<BTreeMap<u32, Arc<V>>>,
}

impl<V> Default for SessionRegistry<V> {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<V> SessionRegistry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, id: u32, session: V) -> Result<Arc<V>> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&id) {
            return Err(ExchangeError::Config(format!("session {id} already exists")));
        }
        let session = Arc::new(session);
        sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    pub fn get(&self, id: u32) -> Option<Arc<V>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn remove(&self, id: u32) -> Option<Arc<V>> {
        self.sessions.write().remove(&id)
    }

    pub fn ids(&self) -> Vec<u32> {
        self.sessions.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn teardown(&self) {
        self.sessions.write().clear();
    }
}
