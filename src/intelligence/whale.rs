use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Duration;
use metrics::counter;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::models::{TradeEvent, TradeSide};
use crate::services::notifier::{format_whale_alert, AlertSink};

/// Whale detection thresholds.
#[derive(Debug, Clone)]
pub struct WhaleConfig {
    /// BTC volume that triggers an alert, for a single trade or a window side.
    pub trigger_volume: Decimal,
    /// Maximum age of a windowed trade relative to the newest one.
    pub time_limit: Duration,
    /// Share of window volume one side must exceed to count as directional.
    pub dominance: Decimal,
    /// Prefix for alert text.
    pub label: String,
}

impl Default for WhaleConfig {
    fn default() -> Self {
        Self {
            trigger_volume: Decimal::from(100),
            time_limit: Duration::milliseconds(15_000),
            dominance: Decimal::new(8, 1), // 0.8
            label: "Alert".to_string(),
        }
    }
}

/// What an alert reports: a single trade, or the dominant side of the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhaleAlert {
    pub amount: Decimal,
    pub price: Decimal,
    pub side: TradeSide,
}

// ---------------------------------------------------------------------------
// TradeWindow
// ---------------------------------------------------------------------------

/// Recent trades, newest at the front.
#[derive(Debug, Default)]
pub struct TradeWindow {
    trades: VecDeque<TradeEvent>,
}

/// Volume per side over a window pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WindowTotals {
    pub total_volume: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub highest_buy: Option<Decimal>,
    pub lowest_sell: Option<Decimal>,
}

impl TradeWindow {
    pub fn push_front(&mut self, trade: TradeEvent) {
        self.trades.push_front(trade);
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn clear(&mut self) {
        self.trades.clear();
    }

    /// Drop trades from the tail that are more than `limit` older than the newest trade.
    pub fn evict_older_than(&mut self, limit: Duration) -> usize {
        let Some(newest) = self.trades.front().map(|t| t.observed_at) else {
            return 0;
        };
        let mut evicted = 0;
        while let Some(oldest) = self.trades.back() {
            if newest - oldest.observed_at <= limit {
                break;
            }
            self.trades.pop_back();
            evicted += 1;
        }
        evicted
    }

    pub fn totals(&self) -> WindowTotals {
        let mut totals = WindowTotals::default();
        for trade in &self.trades {
            totals.total_volume += trade.amount;
            match trade.side {
                TradeSide::Buy => {
                    totals.buy_volume += trade.amount;
                    if totals.highest_buy.map_or(true, |high| trade.price > high) {
                        totals.highest_buy = Some(trade.price);
                    }
                }
                TradeSide::Sell => {
                    totals.sell_volume += trade.amount;
                    if totals.lowest_sell.map_or(true, |low| trade.price < low) {
                        totals.lowest_sell = Some(trade.price);
                    }
                }
                TradeSide::Unknown => {}
            }
        }
        totals
    }
}

// ---------------------------------------------------------------------------
// WhaleDetector
// ---------------------------------------------------------------------------

/// Spots whale activity in a stream of classified trades.
///
/// Trades above `trigger_volume` alert on arrival. Smaller trades are buffered and
/// `check_aggregate` alerts when one side of the window is both large and dominant.
/// The window lock is held for a whole append or aggregation pass, never across
/// the alert sink call.
pub struct WhaleDetector {
    config: WhaleConfig,
    window: Mutex<TradeWindow>,
    sink: Arc<dyn AlertSink>,
}

impl WhaleDetector {
    pub fn new(config: WhaleConfig, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            config,
            window: Mutex::new(TradeWindow::default()),
            sink,
        }
    }

    pub fn config(&self) -> &WhaleConfig {
        &self.config
    }

    pub fn window_len(&self) -> usize {
        self.window.lock().len()
    }

    /// Handle one classified trade. Returns the alert if the trade alone is a whale.
    pub fn on_trade(&self, trade: TradeEvent) -> Option<WhaleAlert> {
        if trade.side == TradeSide::Unknown {
            tracing::debug!(
                amount = %trade.amount,
                price = %trade.price,
                "Untagged trade dropped"
            );
            return None;
        }

        if trade.amount > self.config.trigger_volume {
            let alert = WhaleAlert {
                amount: trade.amount,
                price: trade.price,
                side: trade.side,
            };
            tracing::debug!(
                amount = %trade.amount,
                price = %trade.price,
                side = %trade.side,
                "Single whale trade"
            );
            self.emit(&alert, "single");
            return Some(alert);
        }

        self.window.lock().push_front(trade);
        None
    }

    /// One aggregation pass over the window.
    pub fn check_aggregate(&self) -> Option<WhaleAlert> {
        let alert = {
            let mut window = self.window.lock();
            let evicted = window.evict_older_than(self.config.time_limit);
            let totals = window.totals();

            tracing::trace!(
                evicted,
                total = %totals.total_volume,
                buy = %totals.buy_volume,
                sell = %totals.sell_volume,
                "Whale window pass"
            );

            let alert = self.evaluate(&totals);
            if alert.is_some() {
                window.clear();
            }
            alert
        };

        if let Some(alert) = &alert {
            self.emit(alert, "aggregate");
        }
        alert
    }

    fn evaluate(&self, totals: &WindowTotals) -> Option<WhaleAlert> {
        let trigger = self.config.trigger_volume;
        if totals.total_volume <= trigger {
            return None;
        }

        let directional = totals.buy_volume + totals.sell_volume;
        let dominant = |volume: Decimal| volume > trigger && volume > self.config.dominance * directional;

        if dominant(totals.buy_volume) {
            Some(WhaleAlert {
                amount: totals.buy_volume,
                price: totals.highest_buy.unwrap_or_default(),
                side: TradeSide::Buy,
            })
        } else if dominant(totals.sell_volume) {
            Some(WhaleAlert {
                amount: totals.sell_volume,
                price: totals.lowest_sell.unwrap_or_default(),
                side: TradeSide::Sell,
            })
        } else {
            None
        }
    }

    fn emit(&self, alert: &WhaleAlert, trigger: &'static str) {
        let message = format_whale_alert(&self.config.label, alert.side, alert.amount, alert.price);
        tracing::info!(trigger, side = %alert.side, amount = %alert.amount, "{message}");
        counter!("whale_alerts_total", "trigger" => trigger).increment(1);
        self.sink.broadcast(&message);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
