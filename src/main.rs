//! Paper Broker - Main Entry Point
//!
//! Streams live (or synthetic) market data into the simulated broker and
//! logs fills, cancels, and account equity as they happen.

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use paper_broker::broker::snapshot::BalanceCheckpoint;
use paper_broker::broker::{
    AccountListener, AccountUpdate, OrderEvent, OrderEventListener, PaperBroker,
};
use paper_broker::config::Config;
use paper_broker::exchange::{DydxQuoteFeed, QuoteEvent, QuoteFeed, SyntheticQuoteFeed, Venue};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Paper Broker CLI
#[derive(Parser)]
#[command(name = "paper-broker")]
#[command(version, about = "Paper-trading simulator driven by live venue quotes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulator against a live or synthetic quote feed
    Run {
        /// Instrument symbol, e.g. BTC-USD
        #[arg(short, long)]
        symbol: Option<String>,

        /// Use the synthetic random-walk feed instead of the venue feed
        #[arg(long)]
        synthetic: bool,
    },

    /// Show the persisted balance for an instrument
    Status {
        /// Instrument symbol, e.g. BTC-USD
        #[arg(short, long)]
        symbol: Option<String>,
    },
}

/// Logs broker events as they arrive.
struct EventLogger;

#[async_trait]
impl OrderEventListener for EventLogger {
    async fn on_order_event(&self, event: OrderEvent) -> Result<()> {
        match event {
            OrderEvent::Filled { order, fill } => {
                info!(
                    "✅ [FILL] {} {} {} @ {} | fee: {}",
                    order.side, fill.size, order.symbol, fill.price, fill.fee
                );
            }
            OrderEvent::Canceled { order, reason } => {
                info!("🚫 [CANCEL] {} ({})", order.id, reason);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AccountListener for EventLogger {
    async fn on_account_update(&self, update: AccountUpdate) -> Result<()> {
        info!(
            balance = %update.balance,
            equity = %update.equity,
            realized = %update.realized_pnl,
            unrealized = %update.unrealized_pnl,
            "Account update"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load configuration, using defaults: {e:#}");
        Config::default()
    });

    match cli.command {
        Some(Commands::Status { symbol }) => {
            if let Some(symbol) = symbol {
                config.market.symbol = symbol;
            }
            return show_status(&config);
        }
        Some(Commands::Run { symbol, synthetic }) => {
            if let Some(symbol) = symbol {
                config.market.symbol = symbol;
            }
            config.feed.synthetic |= synthetic;
        }
        None => {}
    }

    config.validate()?;
    run(config).await
}

async fn run(config: Config) -> Result<()> {
    info!(
        "📝 Paper Broker v{} | {} on {}",
        env!("CARGO_PKG_VERSION"),
        config.market.symbol,
        config.market.venue
    );

    let broker = PaperBroker::new(&config)?;
    let logger = Arc::new(EventLogger);
    broker.register_order_listener(logger.clone()).await;
    broker.register_account_listener(logger).await;

    let scheduler = broker.start();

    // Feed selection: Paradex has no live feed yet, fall back to synthetic.
    let synthetic = config.feed.synthetic || config.market.venue == Venue::Paradex;
    if synthetic && !config.feed.synthetic {
        warn!("No live feed for {}, using synthetic quotes", config.market.venue);
    }

    let (tx, mut rx) = mpsc::channel::<QuoteEvent>(1024);
    let feed_config = config.clone();
    tokio::spawn(async move {
        loop {
            let feed: Box<dyn QuoteFeed> = if synthetic {
                Box::new(SyntheticQuoteFeed::new(
                    feed_config.feed.synthetic_start_price,
                    Duration::from_millis(feed_config.feed.synthetic_tick_interval_ms),
                ))
            } else {
                Box::new(DydxQuoteFeed::new(feed_config.market.symbol.clone()))
            };

            if let Err(e) = feed.run(tx.clone()).await {
                error!("Quote feed failed: {e:#}");
            }
            if tx.is_closed() {
                return;
            }
            warn!("Quote feed ended, reconnecting in {RECONNECT_DELAY:?}");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    });

    info!("🚀 Simulator running, press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    QuoteEvent::BestBid { price, size, ts } => {
                        broker.on_best_bid(price, size, ts).await;
                    }
                    QuoteEvent::BestAsk { price, size, ts } => {
                        broker.on_best_ask(price, size, ts).await;
                    }
                    QuoteEvent::MarkPrice { price, ts } => {
                        broker.on_mark_price(price, ts).await;
                    }
                    QuoteEvent::FundingRate { annual_rate_pct, ts } => {
                        broker.on_funding_rate(annual_rate_pct, ts).await;
                    }
                    QuoteEvent::Connected => info!("📡 Quote feed connected"),
                    QuoteEvent::Disconnected => warn!("📡 Quote feed disconnected"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown signal received");
                break;
            }
        }
    }

    broker.cancel_all_orders().await;
    broker.shutdown();
    scheduler.await.ok();

    if let Some(status) = broker.status().await {
        info!(
            "Final: balance {} | realized {} | fees {} | funding {} | volume {}",
            status.account.balance,
            status.account.realized_pnl,
            status.account.total_fees_paid,
            status.account.funding_accrued,
            status.account.dollar_volume
        );
    }

    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "paper-broker.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("paper_broker=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Print the persisted balance without starting the simulator.
fn show_status(config: &Config) -> Result<()> {
    let checkpoint = BalanceCheckpoint::new(
        &config.data.dir,
        &config.market.symbol,
        config.market.venue.code(),
    );

    println!(
        "Paper broker status for {} on {}",
        config.market.symbol, config.market.venue
    );

    match checkpoint.load() {
        Some(balance) => {
            let pnl = balance - config.simulator.starting_balance;
            let pnl_pct = if config.simulator.starting_balance > Decimal::ZERO {
                pnl / config.simulator.starting_balance * Decimal::ONE_HUNDRED
            } else {
                Decimal::ZERO
            };
            println!("   ├─ Checkpoint:        {}", checkpoint.path().display());
            println!("   ├─ Persisted balance: ${balance:.2}");
            println!("   └─ vs configured start: ${pnl:.2} ({pnl_pct:+.2}%)");
        }
        None => {
            println!("   └─ No checkpoint found; the simulator has not run yet.");
        }
    }

    Ok(())
}
