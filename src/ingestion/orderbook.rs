use std::sync::Arc;

use chrono::Duration;
use metrics::counter;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::clock::Clock;
use crate::errors::FeedError;
use crate::models::{OrderBookSnapshot, PriceQuote};

pub const DEFAULT_FRESHNESS_SECS: i64 = 60;

/// Read side of the live market: whoever needs a price asks a `QuoteSource`.
pub trait QuoteSource: Send + Sync {
    /// The latest quote, or `None` if there is none or it has gone stale.
    fn fresh_quote(&self) -> Option<PriceQuote>;

    fn current_bid(&self) -> Option<Decimal> {
        self.fresh_quote().map(|q| q.bid)
    }

    fn current_ask(&self) -> Option<Decimal> {
        self.fresh_quote().map(|q| q.ask)
    }
}

/// Holds the best bid/ask from the most recent valid orderbook or ticker update.
///
/// The quote is swapped as a whole under a write lock, so readers see either the
/// previous quote or the new one, never a bid from one and an ask from the other.
pub struct OrderBookTracker {
    quote: RwLock<Option<PriceQuote>>,
    freshness: Duration,
    clock: Arc<dyn Clock>,
}

impl OrderBookTracker {
    pub fn new(freshness: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            quote: RwLock::new(None),
            freshness,
            clock,
        }
    }

    /// Ingest an orderbook snapshot. On error the previous quote is kept.
    pub fn update(&self, snapshot: &OrderBookSnapshot) -> Result<PriceQuote, FeedError> {
        let (bid, ask) = snapshot.best_bid_ask()?;
        self.update_ticker(bid, ask)
    }

    /// Ingest a bare best bid/ask pair, e.g. from a REST ticker.
    pub fn update_ticker(&self, bid: Decimal, ask: Decimal) -> Result<PriceQuote, FeedError> {
        if bid <= Decimal::ZERO {
            return Err(FeedError::NonPositivePrice(bid));
        }
        if bid > ask {
            return Err(FeedError::CrossedBook { bid, ask });
        }

        let quote = PriceQuote {
            bid,
            ask,
            observed_at: self.clock.now(),
        };
        *self.quote.write() = Some(quote);

        counter!("quotes_updated_total").increment(1);
        tracing::trace!(bid = %bid, ask = %ask, "Quote updated");
        Ok(quote)
    }

    /// The stored quote regardless of age.
    pub fn last_quote(&self) -> Option<PriceQuote> {
        *self.quote.read()
    }
}

impl QuoteSource for OrderBookTracker {
    fn fresh_quote(&self) -> Option<PriceQuote> {
        let quote = self.last_quote()?;
        if self.clock.now() - quote.observed_at > self.freshness {
            tracing::debug!(
                observed_at = %quote.observed_at,
                "Quote is stale, treating as absent"
            );
            return None;
        }
        Some(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::PriceLevel;
    use rust_decimal_macros::dec;

    fn level(price: Decimal) -> PriceLevel {
        PriceLevel { price, amount: dec!(1) }
    }

    fn snapshot(bids: &[Decimal], asks: &[Decimal]) -> OrderBookSnapshot {
        OrderBookSnapshot {
            bids: Some(bids.iter().copied().map(level).collect()),
            asks: Some(asks.iter().copied().map(level).collect()),
        }
    }

    fn tracker(clock: &Arc<ManualClock>) -> OrderBookTracker {
        OrderBookTracker::new(Duration::seconds(DEFAULT_FRESHNESS_SECS), clock.clone())
    }

    #[test]
    fn test_update_picks_best_levels() {
        let clock = Arc::new(ManualClock::at_epoch());
        let tracker = tracker(&clock);

        tracker
            .update(&snapshot(&[dec!(99), dec!(100)], &[dec!(102), dec!(101)]))
            .unwrap();

        assert_eq!(tracker.current_bid(), Some(dec!(100)));
        assert_eq!(tracker.current_ask(), Some(dec!(101)));
    }

    #[test]
    fn test_quote_goes_stale_after_freshness_window() {
        let clock = Arc::new(ManualClock::at_epoch());
        let tracker = tracker(&clock);
        tracker.update(&snapshot(&[dec!(100)], &[dec!(101)])).unwrap();

        clock.advance_secs(60);
        assert_eq!(tracker.current_bid(), Some(dec!(100)));

        clock.advance_millis(1);
        assert_eq!(tracker.current_bid(), None);
        assert_eq!(tracker.current_ask(), None);
        assert!(tracker.last_quote().is_some());
    }

    #[test]
    fn test_malformed_snapshot_keeps_previous_quote() {
        let clock = Arc::new(ManualClock::at_epoch());
        let tracker = tracker(&clock);
        tracker.update(&snapshot(&[dec!(100)], &[dec!(101)])).unwrap();

        let empty = snapshot(&[], &[dec!(105)]);
        assert!(tracker.update(&empty).is_err());
        assert!(tracker.update(&OrderBookSnapshot::default()).is_err());

        assert!(matches!(
            tracker.update_ticker(dec!(0), dec!(1)),
            Err(FeedError::NonPositivePrice(_))
        ));

        let crossed = snapshot(&[dec!(110)], &[dec!(105)]);
        assert!(matches!(
            tracker.update(&crossed),
            Err(FeedError::CrossedBook { .. })
        ));

        assert_eq!(tracker.current_bid(), Some(dec!(100)));
        assert_eq!(tracker.current_ask(), Some(dec!(101)));
    }

    #[test]
    fn test_no_quote_before_first_update() {
        let clock = Arc::new(ManualClock::at_epoch());
        assert!(tracker(&clock).fresh_quote().is_none());
    }

    #[test]
    fn test_bid_never_exceeds_ask() {
        let clock = Arc::new(ManualClock::at_epoch());
        let tracker = tracker(&clock);
        let books = [
            (dec!(100), dec!(101)),
            (dec!(105), dec!(104)),
            (dec!(103), dec!(103)),
            (dec!(120), dec!(90)),
        ];
        for (bid, ask) in books {
            let _ = tracker.update_ticker(bid, ask);
            let quote = tracker.fresh_quote().unwrap();
            assert!(quote.bid <= quote.ask);
        }
    }
}
