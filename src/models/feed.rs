use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::FeedError;

/// One level of an orderbook side.
///
/// Exchanges disagree on the wire shape: some send `{"price": .., "amount": ..}`,
/// Bitstamp sends `["price", "amount"]`. Both decode to the same struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "RawLevel")]
pub struct PriceLevel {
    pub price: Decimal,
    pub amount: Decimal,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Object { price: Decimal, amount: Decimal },
    Pair(Decimal, Decimal),
}

impl From<RawLevel> for PriceLevel {
    fn from(raw: RawLevel) -> Self {
        match raw {
            RawLevel::Object { price, amount } | RawLevel::Pair(price, amount) => {
                PriceLevel { price, amount }
            }
        }
    }
}

/// Orderbook snapshot as delivered by the feed. Missing sides decode as `None`
/// so the tracker can reject them explicitly instead of failing deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderBookSnapshot {
    #[serde(default)]
    pub bids: Option<Vec<PriceLevel>>,
    #[serde(default)]
    pub asks: Option<Vec<PriceLevel>>,
}

impl OrderBookSnapshot {
    /// Highest bid and lowest ask. Levels are not assumed to be sorted.
    pub fn best_bid_ask(&self) -> Result<(Decimal, Decimal), FeedError> {
        let bid = self
            .bids
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|l| l.price)
            .max()
            .ok_or(FeedError::MissingLevels("bids"))?;
        let ask = self
            .asks
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|l| l.price)
            .min()
            .ok_or(FeedError::MissingLevels("asks"))?;
        Ok((bid, ask))
    }
}

/// REST ticker response (`{"bid": .., "ask": .., ...}`).
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPayload {
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Raw trade print before classification.
#[derive(Debug, Clone, Deserialize)]
pub struct TradePayload {
    pub amount: Decimal,
    pub price: Decimal,
}

impl TradePayload {
    pub fn validate(&self) -> Result<(), FeedError> {
        if self.amount.is_sign_negative() {
            return Err(FeedError::InvalidTrade(format!(
                "negative amount {}",
                self.amount
            )));
        }
        if self.price <= Decimal::ZERO {
            return Err(FeedError::InvalidTrade(format!(
                "non-positive price {}",
                self.price
            )));
        }
        Ok(())
    }
}
