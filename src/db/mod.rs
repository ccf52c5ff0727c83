pub mod flair_repo;

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Monetary values are stored as integers scaled by `10^PRICE_SCALE`.
pub const PRICE_SCALE: u32 = 4;

const CREATE_FLAIR_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS flair (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    user      TEXT    NOT NULL COLLATE NOCASE,
    side      TEXT    NOT NULL CHECK (side IN ('long', 'short', 'flat')),
    price     INTEGER NOT NULL,
    balance   INTEGER NOT NULL,
    timestamp INTEGER NOT NULL
)
"#;

const CREATE_FLAIR_USER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS flair_user_id ON flair (user COLLATE NOCASE, id)";

/// Durable home of the flair ledger.
///
/// `open` fails if the database cannot be reached or the schema cannot be created;
/// callers treat that as fatal. `close` waits for in-flight queries to finish.
#[derive(Debug, Clone)]
pub struct FlairStore {
    pool: SqlitePool,
}

impl FlairStore {
    pub async fn open(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `sqlite::memory:` is its own database, so keep exactly one alive.
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;

        sqlx::query(CREATE_FLAIR_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_FLAIR_USER_INDEX).execute(&pool).await?;

        tracing::info!(url = %database_url, "Flair store opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Flair store closed");
    }
}

/// Drop precision below the storage scale, toward zero.
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PRICE_SCALE, RoundingStrategy::ToZero)
}

pub fn to_pips(value: Decimal) -> Result<i64, sqlx::Error> {
    quantize(value)
        .checked_mul(Decimal::from(10i64.pow(PRICE_SCALE)))
        .and_then(|scaled| scaled.to_i64())
        .ok_or_else(|| sqlx::Error::Encode(format!("{value} does not fit the pip scale").into()))
}

pub fn from_pips(pips: i64) -> Decimal {
    Decimal::new(pips, PRICE_SCALE)
}
