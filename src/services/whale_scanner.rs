use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::intelligence::WhaleDetector;

/// Run the aggregate whale scan every `interval_secs` until shutdown.
pub async fn run_whale_scanner(
    detector: Arc<WhaleDetector>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        if detector.check_aggregate().is_none() {
            tracing::trace!(window = detector.window_len(), "Whale scan: nothing to report");
        }
    }

    tracing::info!("Whale scanner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    use crate::intelligence::WhaleConfig;
    use crate::models::{TradeEvent, TradeSide};
    use crate::services::notifier::BroadcastSink;

    #[tokio::test]
    async fn test_scanner_flushes_dominant_window() {
        let sink = Arc::new(BroadcastSink::new(8));
        let mut alerts = sink.subscribe();
        let config = WhaleConfig { trigger_volume: dec!(10), ..WhaleConfig::default() };
        let detector = Arc::new(WhaleDetector::new(config, sink));

        let at: DateTime<Utc> = DateTime::UNIX_EPOCH;
        for amount in [dec!(6), dec!(6)] {
            detector.on_trade(TradeEvent { amount, price: dec!(100), side: TradeSide::Sell, observed_at: at });
        }

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_whale_scanner(detector.clone(), 1, rx));

        let alert = alerts.recv().await.unwrap();
        assert!(alert.contains("SELL 12 BTC"));
        assert_eq!(detector.window_len(), 0);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
