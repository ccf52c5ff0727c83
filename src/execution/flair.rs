use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use metrics::counter;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::db::{flair_repo, quantize, FlairStore};
use crate::errors::FlairError;
use crate::execution::rate_limiter::RateLimiter;
use crate::ingestion::orderbook::QuoteSource;
use crate::models::{FlairPosition, FlairRow, PriceQuote};

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// Price a position change fills at, simulating crossing the spread.
///
/// Going long (or covering a short) buys at the ask; going short (or selling a
/// long) sells at the bid; re-stating flat marks at the mid. Re-stating long or
/// short is not a trade and returns `None`. A user with no flair starts from flat.
pub fn execution_price(
    target: FlairPosition,
    previous: Option<FlairPosition>,
    quote: &PriceQuote,
) -> Option<Decimal> {
    let previous = previous.unwrap_or(FlairPosition::Flat);
    match (previous, target) {
        (FlairPosition::Flat, FlairPosition::Flat) => Some(quote.mid()),
        (prev, target) if prev == target => None,
        (_, FlairPosition::Long) | (FlairPosition::Short, FlairPosition::Flat) => Some(quote.ask),
        (_, FlairPosition::Short) | (FlairPosition::Long, FlairPosition::Flat) => Some(quote.bid),
    }
}

/// Price an open position is valued at without closing it: the side it would close on.
pub fn mark_price(position: FlairPosition, quote: &PriceQuote) -> Decimal {
    match position {
        FlairPosition::Long => quote.bid,
        FlairPosition::Short => quote.ask,
        FlairPosition::Flat => quote.mid(),
    }
}

/// Value `row`'s stake at `close_price`. Returns `(profit_loss, new_balance)`.
///
/// A long holds `balance / price` BTC. A short owes that much BTC against a USD
/// balance, so it gains what the long would lose. Flat is immune to price.
pub fn mark_to_market(row: &FlairRow, close_price: Decimal) -> (Decimal, Decimal) {
    let new_balance = match row.position {
        FlairPosition::Flat => row.balance,
        FlairPosition::Long => row.btc_amount() * close_price,
        FlairPosition::Short => {
            let short_pl = row.balance - row.btc_amount() * close_price;
            row.balance + short_pl
        }
    };
    (new_balance - row.balance, new_balance)
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a successful position change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// First flair for this user.
    Welcome {
        user: String,
        position: FlairPosition,
        price: Decimal,
    },
    Changed {
        user: String,
        position: FlairPosition,
        price: Decimal,
        balance: Decimal,
        margin_called: bool,
    },
}

impl fmt::Display for ChangeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOutcome::Welcome { user, position, price } => write!(
                f,
                "{user}, welcome to the flair game! You are now {position} from ${}.",
                usd(*price)
            ),
            ChangeOutcome::Changed {
                user,
                position,
                price,
                balance,
                margin_called,
            } => {
                let margin = if *margin_called { "were margin called and " } else { "" };
                write!(
                    f,
                    "{user}, you {margin}are now {position}{} from ${} with ${}",
                    btc_suffix(*position, *balance, *price),
                    usd(*price),
                    usd(*balance),
                )
            }
        }
    }
}

/// A user's flair valued against the live quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlairStatus {
    NotPlaying { user: String },
    Holding {
        user: String,
        row: FlairRow,
        profit_loss: Decimal,
        net_worth: Decimal,
        held_for: Duration,
    },
}

impl fmt::Display for FlairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlairStatus::NotPlaying { user } => write!(
                f,
                "No flair found for user {user}. Join the game by picking long, short or flat."
            ),
            FlairStatus::Holding {
                user,
                row,
                profit_loss,
                net_worth,
                held_for,
            } => {
                let pl = if row.position == FlairPosition::Flat {
                    String::new()
                } else {
                    let ratio = profit_loss.checked_div(row.balance).unwrap_or_default();
                    format!(" (P/L {})", signed_percent(ratio))
                };
                let held = match format_elapsed(*held_for) {
                    s if s.is_empty() => s,
                    s => format!(" for {s}"),
                };
                write!(
                    f,
                    "{user} is {}{} from {}{pl}{held} with a net worth of ${}.",
                    row.position,
                    btc_suffix(row.position, row.balance, row.price),
                    usd(row.price),
                    usd(*net_worth),
                )
            }
        }
    }
}

/// One leaderboard entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub user: String,
    pub position: FlairPosition,
    pub net_worth: Decimal,
}

pub fn render_top(standings: &[Standing]) -> String {
    if standings.is_empty() {
        return "Nobody has joined the flair game yet.".to_string();
    }
    let entries: Vec<String> = standings
        .iter()
        .map(|s| format!("{} ({} with ${})", s.user, s.position, usd(s.net_worth)))
        .collect();
    format!("Top flair users: {}", entries.join(", "))
}

fn usd(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

fn btc_suffix(position: FlairPosition, balance: Decimal, price: Decimal) -> String {
    if position == FlairPosition::Flat {
        String::new()
    } else {
        let btc = balance.checked_div(price).unwrap_or_default();
        format!(" {:.4} BTC", btc.round_dp(4))
    }
}

fn signed_percent(ratio: Decimal) -> String {
    let pct = (ratio * Decimal::ONE_HUNDRED).round_dp(2);
    if pct.is_sign_negative() && !pct.is_zero() {
        format!("-{:.2}%", pct.abs())
    } else {
        format!("+{:.2}%", pct.abs())
    }
}

/// `"2 days and 3 hours and 1 min"`; empty under a minute.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_mins = elapsed.num_minutes().abs();
    let parts = [
        (total_mins / (24 * 60), "day"),
        (total_mins / 60 % 24, "hour"),
        (total_mins % 60, "min"),
    ];
    parts
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{n} {unit}{}", if *n > 1 { "s" } else { "" }))
        .collect::<Vec<_>>()
        .join(" and ")
}

// ---------------------------------------------------------------------------
// FlairLedger
// ---------------------------------------------------------------------------

/// Paper-trading ledger: one append-only row per position change.
///
/// Changes for the same user run one at a time under a per-user lock, so two
/// concurrent commands cannot both pass the rate limiter or both build on the
/// same "latest row". Different users never contend.
pub struct FlairLedger {
    store: FlairStore,
    quotes: Arc<dyn QuoteSource>,
    limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FlairLedger {
    pub fn new(
        store: FlairStore,
        quotes: Arc<dyn QuoteSource>,
        limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            quotes,
            limiter,
            clock,
            user_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &FlairStore {
        &self.store
    }

    /// Move `user` to the position named by `token`.
    pub async fn change_position(&self, user: &str, token: &str) -> Result<ChangeOutcome, FlairError> {
        let target: FlairPosition = token.parse().inspect_err(|_| {
            tracing::debug!(user = %user, token = %token, "Invalid flair change command");
        })?;

        // ASCII folding, matching the NOCASE collation of the user column.
        let key = user.to_ascii_lowercase();
        let lock = self.user_locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.apply_change(user, target).await
        };

        // Drop the entry unless another change for this user is queued on it.
        drop(lock);
        self.user_locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn apply_change(
        &self,
        user: &str,
        target: FlairPosition,
    ) -> Result<ChangeOutcome, FlairError> {
        if self.limiter.is_limited(user) {
            return Err(FlairError::RateLimited(user.to_string()));
        }

        let previous = flair_repo::latest_for_user(self.store.pool(), user).await?;
        let quote = self.quotes.fresh_quote().ok_or_else(|| {
            tracing::error!(user = %user, "No fresh exchange price data for flair change");
            FlairError::NoQuoteAvailable
        })?;

        let price = execution_price(target, previous.as_ref().map(|r| r.position), &quote)
            .map(quantize)
            .ok_or_else(|| FlairError::AlreadyPositioned {
                user: user.to_string(),
                position: target,
            })?;
        if price <= Decimal::ZERO {
            tracing::error!(
                user = %user,
                bid = %quote.bid,
                ask = %quote.ask,
                "Quote rounds to zero at storage scale"
            );
            return Err(FlairError::NoQuoteAvailable);
        }

        let (outcome, balance) = match &previous {
            None => {
                tracing::debug!(
                    user = %user,
                    position = %target,
                    price = %price,
                    "Initializing flair"
                );
                let outcome = ChangeOutcome::Welcome {
                    user: user.to_string(),
                    position: target,
                    price,
                };
                (outcome, price)
            }
            Some(old) => {
                let (_, closed) = mark_to_market(old, price);
                let closed = quantize(closed);
                let margin_called = closed <= Decimal::ZERO;
                let balance = if margin_called { price } else { closed };

                if margin_called {
                    counter!("flair_margin_calls_total").increment(1);
                    tracing::info!(
                        user = %user,
                        from = %old.position,
                        closed_balance = %closed,
                        "Flair margin call, stake reset"
                    );
                }
                let outcome = ChangeOutcome::Changed {
                    user: user.to_string(),
                    position: target,
                    price,
                    balance,
                    margin_called,
                };
                (outcome, balance)
            }
        };

        let row = FlairRow {
            user: user.to_string(),
            position: target,
            price,
            balance,
            recorded_at: self.clock.now(),
        };
        flair_repo::insert_row(self.store.pool(), &row).await?;
        self.limiter.record_event(user);

        counter!("flair_changes_total").increment(1);
        tracing::info!(
            user = %user,
            position = %target,
            price = %price,
            balance = %balance,
            "Flair changed"
        );

        Ok(outcome)
    }

    /// `user`'s current flair valued at the closing side of the live quote.
    pub async fn status(&self, user: &str) -> Result<FlairStatus, FlairError> {
        let Some(row) = flair_repo::latest_for_user(self.store.pool(), user).await? else {
            tracing::debug!(user = %user, "No flair found");
            return Ok(FlairStatus::NotPlaying {
                user: user.to_string(),
            });
        };

        let quote = self.quotes.fresh_quote().ok_or(FlairError::NoQuoteAvailable)?;
        let (profit_loss, net_worth) = mark_to_market(&row, mark_price(row.position, &quote));
        let held_for = self.clock.now() - row.recorded_at;

        Ok(FlairStatus::Holding {
            user: user.to_string(),
            row,
            profit_loss,
            net_worth,
            held_for,
        })
    }

    /// The `n` richest players, by net worth then user name, both descending.
    pub async fn top(&self, n: usize) -> Result<Vec<Standing>, FlairError> {
        let rows = flair_repo::latest_per_user(self.store.pool()).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let quote = self.quotes.fresh_quote().ok_or(FlairError::NoQuoteAvailable)?;
        let mut standings: Vec<Standing> = rows
            .into_iter()
            .map(|row| {
                let (_, net_worth) = mark_to_market(&row, mark_price(row.position, &quote));
                Standing {
                    user: row.user,
                    position: row.position,
                    net_worth,
                }
            })
            .collect();

        standings.sort_by(|a, b| (b.net_worth, &b.user).cmp(&(a.net_worth, &a.user)));
        standings.truncate(n);
        Ok(standings)
    }

    /// A user's rows, newest first.
    pub async fn history(&self, user: &str, limit: i64) -> Result<Vec<FlairRow>, FlairError> {
        Ok(flair_repo::history_for_user(self.store.pool(), user, limit).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    fn quote(bid: Decimal, ask: Decimal) -> PriceQuote {
        PriceQuote { bid, ask, observed_at: Utc::now() }
    }

    fn row(position: FlairPosition, price: Decimal, balance: Decimal) -> FlairRow {
        FlairRow {
            user: "alice".into(),
            position,
            price,
            balance,
            recorded_at: DateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_execution_price_crosses_spread() {
        use FlairPosition::*;
        let q = quote(dec!(99), dec!(101));

        assert_eq!(execution_price(Long, None, &q), Some(dec!(101)));
        assert_eq!(execution_price(Short, None, &q), Some(dec!(99)));
        assert_eq!(execution_price(Flat, None, &q), Some(dec!(100)));
        assert_eq!(execution_price(Flat, Some(Short), &q), Some(dec!(101)));
        assert_eq!(execution_price(Flat, Some(Long), &q), Some(dec!(99)));
        assert_eq!(execution_price(Long, Some(Short), &q), Some(dec!(101)));
        assert_eq!(execution_price(Short, Some(Long), &q), Some(dec!(99)));
        assert_eq!(execution_price(Flat, Some(Flat), &q), Some(dec!(100)));
        assert_eq!(execution_price(Long, Some(Long), &q), None);
        assert_eq!(execution_price(Short, Some(Short), &q), None);
    }

    #[test]
    fn test_mark_to_market_long() {
        let (pl, balance) = mark_to_market(&row(FlairPosition::Long, dec!(100), dec!(100)), dec!(90));
        assert_eq!(pl, dec!(-10));
        assert_eq!(balance, dec!(90));
    }

    #[test]
    fn test_mark_to_market_short() {
        let (pl, balance) = mark_to_market(&row(FlairPosition::Short, dec!(100), dec!(100)), dec!(90));
        assert_eq!(pl, dec!(10));
        assert_eq!(balance, dec!(110));

        let (_, wiped) = mark_to_market(&row(FlairPosition::Short, dec!(100), dec!(100)), dec!(250));
        assert_eq!(wiped, dec!(-50));
    }

    #[test]
    fn test_mark_to_market_unpriced_row_does_not_panic() {
        let (pl, balance) = mark_to_market(&row(FlairPosition::Long, dec!(0), dec!(0)), dec!(90));
        assert_eq!((pl, balance), (dec!(0), dec!(0)));

        let (pl, balance) = mark_to_market(&row(FlairPosition::Short, dec!(0), dec!(0)), dec!(90));
        assert_eq!((pl, balance), (dec!(0), dec!(0)));
    }

    #[test]
    fn test_status_text_for_unpriced_row() {
        let status = FlairStatus::Holding {
            user: "alice".into(),
            row: row(FlairPosition::Short, dec!(0), dec!(0)),
            profit_loss: dec!(0),
            net_worth: dec!(0),
            held_for: Duration::zero(),
        };
        assert_eq!(
            status.to_string(),
            "alice is short 0.0000 BTC from 0.00 (P/L +0.00%) with a net worth of $0.00."
        );
    }

    #[tokio::test]
    async fn test_user_locks_are_released_after_change() {
        use crate::clock::ManualClock;
        use crate::execution::rate_limiter::ConstantRateLimiter;
        use crate::ingestion::orderbook::OrderBookTracker;

        let clock = Arc::new(ManualClock::at_epoch());
        let tracker = Arc::new(OrderBookTracker::new(Duration::seconds(60), clock.clone()));
        tracker.update_ticker(dec!(99), dec!(100)).unwrap();
        let limiter = Arc::new(ConstantRateLimiter::new(Duration::zero(), clock.clone()));
        let store = FlairStore::open("sqlite::memory:").await.unwrap();
        let ledger = FlairLedger::new(store, tracker, limiter, clock);

        ledger.change_position("alice", "long").await.unwrap();
        ledger.change_position("Bob", "short").await.unwrap();
        assert!(ledger.change_position("ALICE", "bull").await.is_err());

        assert!(ledger.user_locks.is_empty());
    }

    #[test]
    fn test_mark_to_market_flat_ignores_price() {
        let (pl, balance) = mark_to_market(&row(FlairPosition::Flat, dec!(100), dec!(100)), dec!(5));
        assert_eq!(pl, dec!(0));
        assert_eq!(balance, dec!(100));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::seconds(59)), "");
        assert_eq!(format_elapsed(Duration::minutes(1)), "1 min");
        assert_eq!(
            format_elapsed(Duration::days(2) + Duration::hours(3) + Duration::minutes(5)),
            "2 days and 3 hours and 5 mins"
        );
        assert_eq!(format_elapsed(Duration::hours(1)), "1 hour");
    }

    #[test]
    fn test_status_text() {
        let status = FlairStatus::Holding {
            user: "alice".into(),
            row: row(FlairPosition::Long, dec!(100), dec!(100)),
            profit_loss: dec!(-10),
            net_worth: dec!(90),
            held_for: Duration::hours(2),
        };
        assert_eq!(
            status.to_string(),
            "alice is long 1.0000 BTC from 100.00 (P/L -10.00%) for 2 hours with a net worth of $90.00."
        );
    }

    #[test]
    fn test_change_text() {
        let outcome = ChangeOutcome::Changed {
            user: "bob".into(),
            position: FlairPosition::Flat,
            price: dec!(250),
            balance: dec!(250),
            margin_called: true,
        };
        assert_eq!(
            outcome.to_string(),
            "bob, you were margin called and are now flat from $250.00 with $250.00"
        );
    }

    #[test]
    fn test_render_top() {
        let standings = vec![
            Standing { user: "carol".into(), position: FlairPosition::Short, net_worth: dec!(120) },
            Standing { user: "alice".into(), position: FlairPosition::Long, net_worth: dec!(95.5) },
        ];
        assert_eq!(
            render_top(&standings),
            "Top flair users: carol (short with $120.00), alice (long with $95.50)"
        );
    }
}
