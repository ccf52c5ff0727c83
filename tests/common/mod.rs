use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;

use whalebot::clock::ManualClock;
use whalebot::commands::{Responder, ResponderConfig};
use whalebot::db::FlairStore;
use whalebot::execution::{ConstantRateLimiter, ExponentialParams, ExponentialRateLimiter, FlairLedger};
use whalebot::ingestion::OrderBookTracker;

/// Open a fresh in-memory flair store.
#[allow(dead_code)]
pub async fn setup_test_store() -> FlairStore {
    FlairStore::open("sqlite::memory:")
        .await
        .expect("Failed to open in-memory store")
}

/// A ledger on a manual clock, with its tracker so tests can move the market.
#[allow(dead_code)]
pub struct TestMarket {
    pub clock: Arc<ManualClock>,
    pub tracker: Arc<OrderBookTracker>,
    pub limiter: Arc<ConstantRateLimiter>,
    pub ledger: Arc<FlairLedger>,
}

#[allow(dead_code)]
impl TestMarket {
    pub async fn new(change_delay_secs: i64) -> Self {
        let clock = Arc::new(ManualClock::at_epoch());
        clock.advance_secs(1_700_000_000);

        let tracker = Arc::new(OrderBookTracker::new(Duration::seconds(60), clock.clone()));
        let limiter = Arc::new(ConstantRateLimiter::new(
            Duration::seconds(change_delay_secs),
            clock.clone(),
        ));
        let ledger = Arc::new(FlairLedger::new(
            setup_test_store().await,
            tracker.clone(),
            limiter.clone(),
            clock.clone(),
        ));

        Self {
            clock,
            tracker,
            limiter,
            ledger,
        }
    }

    pub fn quote(&self, bid: Decimal, ask: Decimal) {
        self.tracker
            .update_ticker(bid, ask)
            .expect("Test quote should be accepted");
    }

    pub fn responder(&self, config: ResponderConfig) -> Responder {
        let reply_limiter = Arc::new(ExponentialRateLimiter::new(
            ExponentialParams::default(),
            self.clock.clone(),
        ));
        Responder::new(config, self.ledger.clone(), reply_limiter)
    }
}

/// Rows stored for `user`, newest first.
#[allow(dead_code)]
pub async fn row_count(market: &TestMarket, user: &str) -> usize {
    market
        .ledger
        .history(user, 1_000)
        .await
        .expect("History query should succeed")
        .len()
}
