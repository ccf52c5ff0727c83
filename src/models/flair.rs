use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::FlairError;

/// A simulated position in the flair game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlairPosition {
    Long,
    Short,
    Flat,
}

impl FlairPosition {
    /// Canonical name, also the value stored in the `side` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlairPosition::Long => "long",
            FlairPosition::Short => "short",
            FlairPosition::Flat => "flat",
        }
    }

    /// Parse a user-supplied token. Accepts the game's nicknames case-insensitively.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "long" | "bull" => Some(FlairPosition::Long),
            "short" | "bear" => Some(FlairPosition::Short),
            "flat" | "fiat" => Some(FlairPosition::Flat),
            _ => None,
        }
    }
}

impl FromStr for FlairPosition {
    type Err = FlairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s).ok_or_else(|| FlairError::InvalidPositionToken(s.to_string()))
    }
}

impl fmt::Display for FlairPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger entry. Rows are append-only; a user's current flair is their newest row.
///
/// `balance` is the USD value of the user's stake at `price` when the row was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlairRow {
    pub user: String,
    pub position: FlairPosition,
    pub price: Decimal,
    pub balance: Decimal,
    pub recorded_at: DateTime<Utc>,
}

impl FlairRow {
    /// BTC held when the row was written, for long and short stakes.
    ///
    /// A row without a price holds nothing.
    pub fn btc_amount(&self) -> Decimal {
        self.balance.checked_div(self.price).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_tokens() {
        assert_eq!(FlairPosition::from_token("BULL"), Some(FlairPosition::Long));
        assert_eq!(FlairPosition::from_token(" long "), Some(FlairPosition::Long));
        assert_eq!(FlairPosition::from_token("Bear"), Some(FlairPosition::Short));
        assert_eq!(FlairPosition::from_token("short"), Some(FlairPosition::Short));
        assert_eq!(FlairPosition::from_token("fiat"), Some(FlairPosition::Flat));
        assert_eq!(FlairPosition::from_token("FLAT"), Some(FlairPosition::Flat));
        assert_eq!(FlairPosition::from_token("moon"), None);
    }

    #[test]
    fn test_btc_amount_of_unpriced_row_is_zero() {
        use rust_decimal_macros::dec;

        let mut row = FlairRow {
            user: "alice".into(),
            position: FlairPosition::Long,
            price: dec!(200),
            balance: dec!(100),
            recorded_at: DateTime::UNIX_EPOCH,
        };
        assert_eq!(row.btc_amount(), dec!(0.5));

        row.price = Decimal::ZERO;
        assert_eq!(row.btc_amount(), Decimal::ZERO);
    }

    #[test]
    fn test_from_str_reports_invalid_token() {
        let err = "sideways".parse::<FlairPosition>().unwrap_err();
        assert!(matches!(err, FlairError::InvalidPositionToken(t) if t == "sideways"));
    }
}
