use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::sync::watch;

use crate::errors::FeedError;
use crate::ingestion::orderbook::OrderBookTracker;
use crate::models::TickerPayload;

#[derive(Debug, Error)]
pub enum TickerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// REST ticker client for venues that expose `{"bid": .., "ask": ..}`.
#[derive(Debug, Clone)]
pub struct TickerClient {
    http: Client,
    url: String,
}

impl TickerClient {
    pub fn new(http: Client, url: String) -> Self {
        Self { http, url }
    }

    pub async fn fetch(&self) -> Result<TickerPayload, TickerError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;

        let ticker: TickerPayload = resp.json().await?;
        Ok(ticker)
    }
}

/// Poll the ticker every `every` and feed the tracker, until shutdown.
///
/// Used as a fallback quote source alongside the websocket orderbook.
pub async fn run_ticker_poller(
    client: TickerClient,
    tracker: Arc<OrderBookTracker>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let result = client
            .fetch()
            .await
            .and_then(|t| tracker.update_ticker(t.bid, t.ask).map_err(TickerError::from));

        if let Err(e) = result {
            tracing::warn!(url = %client.url, error = %e, "Ticker poll failed");
        }
    }

    tracing::info!("Ticker poller stopped");
}
