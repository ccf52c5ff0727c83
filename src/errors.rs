use rust_decimal::Decimal;

use crate::models::FlairPosition;

/// A feed payload that could not be turned into a quote or a trade.
///
/// These never leave the ingestion layer: they are logged, counted and dropped.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("orderbook snapshot has no {0}")]
    MissingLevels(&'static str),

    #[error("non-positive price {0}")]
    NonPositivePrice(Decimal),

    #[error("crossed book: bid {bid} > ask {ask}")]
    CrossedBook { bid: Decimal, ask: Decimal },

    #[error("invalid trade: {0}")]
    InvalidTrade(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Why a flair command did not produce a normal result.
#[derive(Debug, thiserror::Error)]
pub enum FlairError {
    #[error("invalid position token '{0}'")]
    InvalidPositionToken(String),

    #[error("{user} is already {position}")]
    AlreadyPositioned {
        user: String,
        position: FlairPosition,
    },

    #[error("{0} is rate limited")]
    RateLimited(String),

    #[error("no fresh quote available")]
    NoQuoteAvailable,

    #[error("flair storage unavailable: {0}")]
    Persistence(#[from] sqlx::Error),
}

pub const MSG_NO_QUOTE: &str = "I have no recent orderbook data. Please try again later.";

impl FlairError {
    /// The reply a chat user sees, or `None` when the command is silently ignored.
    pub fn user_message(&self) -> Option<String> {
        match self {
            FlairError::InvalidPositionToken(_) => None,
            FlairError::AlreadyPositioned { user, position } => {
                Some(format!("{user}, you are already {position}."))
            }
            FlairError::RateLimited(user) => Some(format!(
                "I'm sorry {user}, I'm afraid I can't do that. Wait a few minutes first."
            )),
            FlairError::NoQuoteAvailable => Some(MSG_NO_QUOTE.to_string()),
            FlairError::Persistence(e) => {
                tracing::error!(error = %e, "Flair storage operation failed");
                Some("Flair storage is unavailable right now. Please try again later.".to_string())
            }
        }
    }
}
