use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use tokio::sync::broadcast;

use crate::models::TradeSide;

/// Destination for plain-text whale alerts.
pub trait AlertSink: Send + Sync {
    fn broadcast(&self, message: &str);
}

/// Format a whale alert, e.g. `Alert | ▲ BUY 12.5 BTC at $643.21`.
pub fn format_whale_alert(label: &str, side: TradeSide, amount: Decimal, price: Decimal) -> String {
    format!(
        "{} | {}{} BTC at ${:.2}",
        label,
        side.glyph(),
        truncate_amount(amount),
        price.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
    )
}

/// At most two decimals, trailing zeros (and a bare point) removed.
pub fn truncate_amount(amount: Decimal) -> String {
    amount.round_dp(2).normalize().to_string()
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Fans alerts out to in-process subscribers (terminal printer, tests).
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<String>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl AlertSink for BroadcastSink {
    fn broadcast(&self, message: &str) {
        if self.tx.send(message.to_string()).is_err() {
            tracing::debug!("No alert subscribers, alert dropped");
        }
    }
}

/// Telegram relay. Failures are logged but never block the caller.
#[derive(Debug, Clone)]
pub struct Notifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl Notifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_id,
        }
    }

    /// Send a Telegram message. Failures are logged as warnings.
    pub async fn send(&self, message: &str) {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.bot_token
        );

        let body = json!({
            "chat_id": self.chat_id,
            "text": message,
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) => {
                if !resp.status().is_success() {
                    tracing::warn!(
                        status = %resp.status(),
                        "Telegram sendMessage returned non-2xx"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send Telegram notification");
            }
        }
    }
}

impl AlertSink for Notifier {
    fn broadcast(&self, message: &str) {
        let notifier = self.clone();
        let message = message.to_string();
        tokio::spawn(async move {
            notifier.send(&message).await;
        });
    }
}

/// Delivers every alert to each inner sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AlertSink for FanoutSink {
    fn broadcast(&self, message: &str) {
        for sink in &self.sinks {
            sink.broadcast(message);
        }
    }
}
