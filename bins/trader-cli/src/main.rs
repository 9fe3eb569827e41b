use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use exchange_core::poller::spawn_pollers;
use exchange_core::telemetry::init_tracing;
use exchange_core::{
    AppConfig, AssetType, CurrencyPair, Exchange, ExchangeRegistry, MarketDataCache, OrderRequest,
    OrderSide,
};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "trader-cli", about = "Query and poll cryptocurrency exchanges", version)]
struct Cli {
    /// YAML exchange configuration; falls back to EXCHANGE_CONFIG_PATH
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,
    /// Also write daily rolling logs here
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Latest ticker for a pair
    Ticker(MarketArgs),
    /// Order book for a pair
    Orderbook {
        #[command(flatten)]
        market: MarketArgs,
        /// Levels printed per side
        #[arg(long, default_value_t = 10)]
        depth: usize,
    },
    /// Account balances
    Balance(ExchangeArgs),
    /// Open orders, optionally restricted to some pairs
    Orders {
        #[command(flatten)]
        exchange: ExchangeArgs,
        #[arg(long = "pair", short = 'p')]
        pairs: Vec<CurrencyPair>,
    },
    /// Price and amount constraints
    Limits {
        #[command(flatten)]
        exchange: ExchangeArgs,
        #[arg(long, short = 'p')]
        pair: Option<CurrencyPair>,
    },
    /// Place a limit order, or a market order when no price is given
    Place {
        #[command(flatten)]
        market: MarketArgs,
        #[arg(long, value_parser = parse_side)]
        side: OrderSide,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        price: Option<Decimal>,
    },
    /// Look up one order by id, open or not
    Order {
        #[command(flatten)]
        market: MarketArgs,
        #[arg(long)]
        id: String,
    },
    /// Cancel an open order
    Cancel {
        #[command(flatten)]
        market: MarketArgs,
        #[arg(long)]
        id: String,
    },
    /// Poll every enabled exchange until interrupted
    Run,
}

#[derive(Debug, Args)]
struct ExchangeArgs {
    /// Exchange name as configured, e.g. kraken
    #[arg(long, short = 'e')]
    exchange: String,
}

#[derive(Debug, Args)]
struct MarketArgs {
    #[command(flatten)]
    exchange: ExchangeArgs,
    /// Pair such as ETH/BTC, eth_btc or ETHBTC
    #[arg(long, short = 'p')]
    pair: CurrencyPair,
    /// Refresh even when a cached snapshot exists
    #[arg(long, default_value_t = false)]
    fresh: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("trader-cli", cli.log_dir.as_deref());

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load exchange configuration")?;
    let cache = Arc::new(MarketDataCache::new());
    let registry = drivers::build_registry(&config, cache).context("failed to build exchange drivers")?;

    let outcome = dispatch(cli.command, &registry).await;
    registry.teardown();
    outcome
}

async fn dispatch(command: Commands, registry: &ExchangeRegistry) -> Result<()> {
    match command {
        Commands::Ticker(market) => {
            let exchange = lookup(registry, &market.exchange)?;
            let ticker = if market.fresh {
                exchange.refresh_ticker(&market.pair, AssetType::Spot).await?
            } else {
                exchange.ticker(&market.pair, AssetType::Spot).await?
            };
            print_json(ticker.as_ref())?;
        }
        Commands::Orderbook { market, depth } => {
            let exchange = lookup(registry, &market.exchange)?;
            let book = if market.fresh {
                exchange.refresh_orderbook(&market.pair, AssetType::Spot).await?
            } else {
                exchange.orderbook(&market.pair, AssetType::Spot).await?
            };
            let mut book = book.as_ref().clone();
            book.bids.truncate(depth);
            book.asks.truncate(depth);
            print_json(&book)?;
        }
        Commands::Balance(args) => {
            let exchange = lookup(registry, &args)?;
            print_json(&exchange.account_info().await?)?;
        }
        Commands::Orders { exchange, pairs } => {
            let exchange = lookup(registry, &exchange)?;
            print_json(&exchange.orders(&pairs).await?)?;
        }
        Commands::Limits { exchange, pair } => {
            let exchange = lookup(registry, &exchange)?;
            let limits = exchange.limits().await?;
            match pair {
                Some(pair) => {
                    let entry = limits
                        .get(&pair)
                        .ok_or_else(|| anyhow!("{} declares no limits for {pair}", exchange.name()))?;
                    print_json(entry)?;
                }
                None => print_json(&limits)?,
            }
        }
        Commands::Place {
            market,
            side,
            amount,
            price,
        } => {
            let exchange = lookup(registry, &market.exchange)?;
            let request = match price {
                Some(price) => OrderRequest::limit(market.pair, side, amount, price),
                None => OrderRequest::market(market.pair, side, amount),
            };
            let id = exchange.new_order(&request).await?;
            println!("{id}");
        }
        Commands::Order { market, id } => {
            let exchange = lookup(registry, &market.exchange)?;
            print_json(&exchange.order(&id, &market.pair).await?)?;
        }
        Commands::Cancel { market, id } => {
            let exchange = lookup(registry, &market.exchange)?;
            exchange.cancel_order(&id, &market.pair).await?;
            println!("cancelled {id}");
        }
        Commands::Run => run(registry).await?,
    }
    Ok(())
}

async fn run(registry: &ExchangeRegistry) -> Result<()> {
    if registry.is_empty() {
        warn!("no enabled exchanges configured");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = spawn_pollers(registry, shutdown_rx);
    info!(exchanges = ?registry.names(), "polling started, press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down pollers");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(err) = handle.await {
            warn!(error = ?err, "poller task failed");
        }
    }
    Ok(())
}

fn lookup(registry: &ExchangeRegistry, args: &ExchangeArgs) -> Result<Arc<dyn Exchange>> {
    registry.get(&args.exchange).ok_or_else(|| {
        anyhow!(
            "exchange '{}' is not configured or not enabled (available: {})",
            args.exchange,
            registry.names().join(", ")
        )
    })
}

fn parse_side(raw: &str) -> Result<OrderSide, String> {
    OrderSide::from_raw(raw).ok_or_else(|| format!("'{raw}' is not buy or sell"))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
