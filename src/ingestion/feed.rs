use std::sync::Arc;

use metrics::counter;
use serde::Deserialize;
use serde_json::Value;

use crate::clock::Clock;
use crate::errors::FeedError;
use crate::ingestion::orderbook::OrderBookTracker;
use crate::intelligence::{TradeClassifier, WhaleAlert, WhaleDetector};
use crate::models::{OrderBookSnapshot, PriceQuote, TradePayload};

/// Entry point for market-data callbacks.
///
/// Orderbook snapshots refresh the tracker; trades are classified against the
/// tracker's quote and handed to the whale detector. Bad payloads are logged,
/// counted and dropped so a single malformed message never stops ingestion.
pub struct FeedHandler {
    tracker: Arc<OrderBookTracker>,
    classifier: TradeClassifier,
    detector: Arc<WhaleDetector>,
}

impl FeedHandler {
    pub fn new(
        tracker: Arc<OrderBookTracker>,
        detector: Arc<WhaleDetector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let classifier = TradeClassifier::new(tracker.clone(), clock);
        Self {
            tracker,
            classifier,
            detector,
        }
    }

    pub fn tracker(&self) -> &Arc<OrderBookTracker> {
        &self.tracker
    }

    /// Returns the new quote if the snapshot was accepted.
    pub fn on_orderbook(&self, payload: &Value) -> Option<PriceQuote> {
        let result = OrderBookSnapshot::deserialize(payload)
            .map_err(FeedError::from)
            .and_then(|snapshot| self.tracker.update(&snapshot));

        match result {
            Ok(quote) => Some(quote),
            Err(e) => {
                rejected("orderbook", &e, payload);
                None
            }
        }
    }

    /// Returns an alert if this trade alone was a whale.
    pub fn on_trade(&self, payload: &Value) -> Option<WhaleAlert> {
        let trade = match TradePayload::deserialize(payload)
            .map_err(FeedError::from)
            .and_then(|t| t.validate().map(|_| t))
        {
            Ok(trade) => trade,
            Err(e) => {
                rejected("trade", &e, payload);
                return None;
            }
        };

        let event = self.classifier.classify(&trade);
        tracing::debug!(
            side = %event.side,
            amount = %event.amount,
            price = %event.price,
            "Trade classified"
        );
        self.detector.on_trade(event)
    }
}

fn rejected(kind: &'static str, error: &FeedError, payload: &Value) {
    counter!("feed_payloads_rejected_total", "kind" => kind).increment(1);
    tracing::warn!(kind, error = %error, raw = %payload, "Bad feed payload dropped");
}
