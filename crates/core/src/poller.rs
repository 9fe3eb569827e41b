use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::exchange::Exchange;
use crate::registry::ExchangeRegistry;

/// Starts one polling task per enabled exchange. Tasks stop between polls once
/// `shutdown` flips to `true`; an in-flight request is left to finish.
pub fn spawn_pollers(
    registry: &ExchangeRegistry,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    registry
        .enabled()
        .into_iter()
        .map(|exchange| tokio::spawn(run_poller(exchange, shutdown.clone())))
        .collect()
}

async fn run_poller(exchange: Arc<dyn Exchange>, mut shutdown: watch::Receiver<bool>) {
    let name = exchange.name().to_string();
    let delay = exchange.base().polling_delay();
    info!(
        exchange = %name,
        delay_secs = delay.as_secs(),
        pairs = exchange.base().enabled_pairs().len(),
        "poller started"
    );

    if *shutdown.borrow() {
        info!(exchange = %name, "poller stopped before first poll");
        return;
    }

    if let Err(err) = exchange.setup().await {
        warn!(exchange = %name, error = ?err, "exchange setup failed");
    }

    loop {
        poll_once(exchange.as_ref()).await;

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                // A dropped sender also ends the loop.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }
    }
    info!(exchange = %name, "poller stopped");
}

/// Refreshes ticker and order book for every enabled pair and asset type.
/// Failures are logged and the poll moves on to the next market.
pub async fn poll_once(exchange: &dyn Exchange) {
    let base = exchange.base();
    for pair in base.enabled_pairs() {
        for &asset_type in base.asset_types() {
            match exchange.refresh_ticker(pair, asset_type).await {
                Ok(ticker) => {
                    debug!(exchange = exchange.name(), %pair, last = %ticker.last, "ticker updated")
                }
                Err(err) => {
                    warn!(exchange = exchange.name(), %pair, %asset_type, error = ?err, "ticker poll failed")
                }
            }
            match exchange.refresh_orderbook(pair, asset_type).await {
                Ok(book) => debug!(
                    exchange = exchange.name(),
                    %pair,
                    bids = book.bids.len(),
                    asks = book.asks.len(),
                    "order book updated"
                ),
                Err(err) => {
                    warn!(exchange = exchange.name(), %pair, %asset_type, error = ?err, "order book poll failed")
                }
            }
        }
    }
}
