use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};

use whalebot::clock::{Clock, SystemClock};
use whalebot::commands::Responder;
use whalebot::config::AppConfig;
use whalebot::db::FlairStore;
use whalebot::execution::{ConstantRateLimiter, ExponentialRateLimiter, FlairLedger};
use whalebot::ingestion::ticker_poller::{run_ticker_poller, TickerClient};
use whalebot::ingestion::ws_listener::run_ws_listener;
use whalebot::ingestion::{FeedHandler, OrderBookTracker};
use whalebot::intelligence::WhaleDetector;
use whalebot::metrics::init_metrics;
use whalebot::services::whale_scanner::run_whale_scanner;
use whalebot::services::{AlertSink, BroadcastSink, FanoutSink, Notifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // reqwest and tokio-tungstenite both pull in rustls; pin one provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = AppConfig::from_env()?;
    init_metrics(config.metrics_addr)?;

    tracing::info!("Opening flair store...");
    let store = FlairStore::open(&config.database_url).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tracker = Arc::new(OrderBookTracker::new(config.quote_freshness(), clock.clone()));

    // --- Alerts: terminal always, Telegram when configured ---
    let console = Arc::new(BroadcastSink::new(64));
    let mut alerts_rx = console.subscribe();
    let mut sinks = FanoutSink::new().with(console);
    if let Some((bot_token, chat_id)) = config.telegram() {
        tracing::info!("Telegram alert relay enabled");
        sinks = sinks.with(Arc::new(Notifier::new(bot_token, chat_id)));
    }
    let sink: Arc<dyn AlertSink> = Arc::new(sinks);

    let detector = Arc::new(WhaleDetector::new(config.whale_config(), sink));
    let feed = Arc::new(FeedHandler::new(tracker.clone(), detector.clone(), clock.clone()));

    // --- Flair game ---
    let flair_limiter = Arc::new(ConstantRateLimiter::new(
        config.flair_change_delay(),
        clock.clone(),
    ));
    let ledger = Arc::new(FlairLedger::new(
        store.clone(),
        tracker.clone(),
        flair_limiter,
        clock.clone(),
    ));
    let reply_limiter = Arc::new(ExponentialRateLimiter::new(config.reply_limits(), clock.clone()));
    let responder = Responder::new(config.responder_config(), ledger, reply_limiter);

    // --- Background tasks ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(run_ws_listener(
        config.feed_ws_url.clone(),
        config.feed_pair.clone(),
        feed,
        shutdown_rx.clone(),
    )));

    if let Some(url) = config.ticker_url.clone() {
        tracing::info!(url = %url, every_secs = config.ticker_poll_secs, "Ticker polling enabled");
        tasks.push(tokio::spawn(run_ticker_poller(
            TickerClient::new(reqwest::Client::new(), url),
            tracker.clone(),
            Duration::from_secs(config.ticker_poll_secs),
            shutdown_rx.clone(),
        )));
    }

    tasks.push(tokio::spawn(run_whale_scanner(
        detector,
        config.whale_scan_interval_secs,
        shutdown_rx,
    )));

    tokio::spawn(async move {
        loop {
            match alerts_rx.recv().await {
                Ok(alert) => println!("{alert}"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Alert printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // --- Terminal front-end ---
    println!(
        "Watching {} on {}. Type {}help for commands.",
        config.feed_pair, config.feed_ws_url, config.command_prefix
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Some(reply) = responder.dispatch(&config.terminal_user, &line).await {
                        println!("{reply}");
                    }
                }
                Ok(None) => {
                    tracing::info!("stdin closed, running until Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }

    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let drain = async {
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        store.close().await;
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed");
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
