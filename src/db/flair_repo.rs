use chrono::DateTime;
use sqlx::{FromRow, SqlitePool};

use crate::db::{from_pips, to_pips};
use crate::models::{FlairPosition, FlairRow};

/// Raw `flair` table row.
#[derive(Debug, Clone, FromRow)]
struct FlairRecord {
    user: String,
    side: String,
    price: i64,
    balance: i64,
    timestamp: i64,
}

impl TryFrom<FlairRecord> for FlairRow {
    type Error = sqlx::Error;

    fn try_from(record: FlairRecord) -> Result<Self, Self::Error> {
        let position = FlairPosition::from_token(&record.side).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown flair side '{}'", record.side).into())
        })?;
        let recorded_at = DateTime::from_timestamp(record.timestamp, 0).ok_or_else(|| {
            sqlx::Error::Decode(format!("timestamp {} out of range", record.timestamp).into())
        })?;

        Ok(FlairRow {
            user: record.user,
            position,
            price: from_pips(record.price),
            balance: from_pips(record.balance),
            recorded_at,
        })
    }
}

fn into_rows(records: Vec<FlairRecord>) -> Result<Vec<FlairRow>, sqlx::Error> {
    records.into_iter().map(FlairRow::try_from).collect()
}

/// Append a ledger row.
pub async fn insert_row(pool: &SqlitePool, row: &FlairRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO flair (user, side, price, balance, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(&row.user)
    .bind(row.position.as_str())
    .bind(to_pips(row.price)?)
    .bind(to_pips(row.balance)?)
    .bind(row.recorded_at.timestamp())
    .execute(pool)
    .await?;

    Ok(())
}

/// A user's current flair: their newest row, matched case-insensitively.
pub async fn latest_for_user(
    pool: &SqlitePool,
    user: &str,
) -> Result<Option<FlairRow>, sqlx::Error> {
    let record = sqlx::query_as::<_, FlairRecord>(
        r#"
        SELECT user, side, price, balance, timestamp
        FROM flair
        WHERE user = ?1
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(user)
    .fetch_optional(pool)
    .await?;

    record.map(FlairRow::try_from).transpose()
}

/// The newest row of every user who has ever played.
pub async fn latest_per_user(pool: &SqlitePool) -> Result<Vec<FlairRow>, sqlx::Error> {
    let records = sqlx::query_as::<_, FlairRecord>(
        r#"
        SELECT f.user, f.side, f.price, f.balance, f.timestamp
        FROM flair f
        JOIN (SELECT MAX(id) AS id FROM flair GROUP BY user) latest ON latest.id = f.id
        ORDER BY f.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    into_rows(records)
}

/// A user's rows, newest first.
pub async fn history_for_user(
    pool: &SqlitePool,
    user: &str,
    limit: i64,
) -> Result<Vec<FlairRow>, sqlx::Error> {
    let records = sqlx::query_as::<_, FlairRecord>(
        r#"
        SELECT user, side, price, balance, timestamp
        FROM flair
        WHERE user = ?1
        ORDER BY id DESC
        LIMIT ?2
        "#,
    )
    .bind(user)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    into_rows(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FlairStore;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn row(user: &str, position: FlairPosition, price: Decimal, balance: Decimal, secs: i64) -> FlairRow {
        FlairRow {
            user: user.to_string(),
            position,
            price,
            balance,
            recorded_at: DateTime::UNIX_EPOCH + Duration::seconds(secs),
        }
    }

    #[tokio::test]
    async fn test_latest_row_wins_and_lookup_ignores_case() {
        let store = FlairStore::open("sqlite::memory:").await.unwrap();
        let pool = store.pool();

        insert_row(pool, &row("Alice", FlairPosition::Long, dec!(100), dec!(100), 10)).await.unwrap();
        insert_row(pool, &row("alice", FlairPosition::Short, dec!(90), dec!(90), 10)).await.unwrap();

        let latest = latest_for_user(pool, "ALICE").await.unwrap().unwrap();
        assert_eq!(latest.position, FlairPosition::Short);
        assert_eq!(latest.price, dec!(90));
        assert_eq!(latest.recorded_at.timestamp(), 10);

        let history = history_for_user(pool, "alice", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].position, FlairPosition::Long);

        assert!(latest_for_user(pool, "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_per_user_groups_case_insensitively() {
        let store = FlairStore::open("sqlite::memory:").await.unwrap();
        let pool = store.pool();
        let now = Utc::now().timestamp();

        insert_row(pool, &row("alice", FlairPosition::Long, dec!(100), dec!(100), now)).await.unwrap();
        insert_row(pool, &row("bob", FlairPosition::Flat, dec!(100.5), dec!(100.5), now)).await.unwrap();
        insert_row(pool, &row("ALICE", FlairPosition::Flat, dec!(110), dec!(110), now)).await.unwrap();

        let rows = latest_per_user(pool).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user, "bob");
        assert_eq!(rows[1].user, "ALICE");
        assert_eq!(rows[1].balance, dec!(110));
    }

    #[tokio::test]
    async fn test_balances_keep_four_decimals() {
        let store = FlairStore::open("sqlite::memory:").await.unwrap();
        let pool = store.pool();

        insert_row(pool, &row("carol", FlairPosition::Long, dec!(643.21), dec!(12.345678), 0)).await.unwrap();

        let latest = latest_for_user(pool, "carol").await.unwrap().unwrap();
        assert_eq!(latest.balance, dec!(12.3456));
        assert_eq!(latest.price, dec!(643.21));
    }
}
