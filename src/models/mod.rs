pub mod feed;
pub mod flair;

pub use feed::{OrderBookSnapshot, PriceLevel, TickerPayload, TradePayload};
pub use flair::{FlairPosition, FlairRow};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TradeSide
// ---------------------------------------------------------------------------

/// Which side initiated a trade, as inferred from the spread at the time it printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
    Unknown,
}

impl TradeSide {
    /// Arrow and label used in alert text.
    pub fn glyph(&self) -> &'static str {
        match self {
            TradeSide::Buy => "\u{25B2} BUY ",
            TradeSide::Sell => "\u{25BC} SELL ",
            TradeSide::Unknown => "",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
            TradeSide::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// PriceQuote: best bid/ask at a point in time
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

// ---------------------------------------------------------------------------
// TradeEvent: a classified trade print
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub amount: Decimal,
    pub price: Decimal,
    pub side: TradeSide,
    pub observed_at: DateTime<Utc>,
}

impl fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trade: side={} amount={} price={}",
            self.side, self.amount, self.price,
        )
    }
}
