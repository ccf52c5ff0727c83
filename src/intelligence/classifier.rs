use std::sync::Arc;

use rust_decimal::Decimal;

use crate::clock::Clock;
use crate::ingestion::orderbook::QuoteSource;
use crate::models::{PriceQuote, TradeEvent, TradePayload, TradeSide};

/// Label a trade price against the spread.
///
/// Rules:
/// - **Sell**: printed at or below the bid.
/// - **Buy**: printed at or above the ask. Checked after the bid test, so on a
///   locked book (`bid == ask == price`) the trade is a buy.
/// - **Unknown**: strictly inside the spread, or no fresh quote.
pub fn classify_price(price: Decimal, quote: Option<&PriceQuote>) -> TradeSide {
    let Some(quote) = quote else {
        return TradeSide::Unknown;
    };

    let mut side = TradeSide::Unknown;
    if price <= quote.bid {
        side = TradeSide::Sell;
    }
    if price >= quote.ask {
        side = TradeSide::Buy;
    }
    side
}

/// Tags raw trades with a side using the tracker's current quote.
pub struct TradeClassifier {
    quotes: Arc<dyn QuoteSource>,
    clock: Arc<dyn Clock>,
}

impl TradeClassifier {
    pub fn new(quotes: Arc<dyn QuoteSource>, clock: Arc<dyn Clock>) -> Self {
        Self { quotes, clock }
    }

    pub fn classify(&self, trade: &TradePayload) -> TradeEvent {
        let quote = self.quotes.fresh_quote();
        TradeEvent {
            amount: trade.amount,
            price: trade.price,
            side: classify_price(trade.price, quote.as_ref()),
            observed_at: self.clock.now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
