//! Balance and transaction persistence operations.
//!
//! Balances are upserted; transaction rows are append-only inserts,
//! mirroring the ledger's own discipline. Monetary columns are BIGINT
//! minor units alongside the full JSONB record.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use mmkt_ledger::{BalanceTransaction, PublisherBalance};

use super::{from_json, to_json};

/// Insert or update a publisher balance record.
pub async fn upsert_balance(pool: &PgPool, balance: &PublisherBalance) -> Result<(), sqlx::Error> {
    let record = to_json(balance)?;

    sqlx::query(
        "INSERT INTO publisher_balances
            (publisher_id, available_cents, pending_cents, reserved_cents, record, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (publisher_id) DO UPDATE SET
            available_cents = EXCLUDED.available_cents,
            pending_cents = EXCLUDED.pending_cents,
            reserved_cents = EXCLUDED.reserved_cents,
            record = EXCLUDED.record,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(balance.publisher.as_uuid())
    .bind(balance.available.cents())
    .bind(balance.pending.cents())
    .bind(balance.reserved.cents())
    .bind(&record)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Append transaction rows. Rows are immutable; conflicts (a re-mirror
/// of an already-written row) are ignored.
pub async fn insert_transactions(
    pool: &PgPool,
    transactions: &[BalanceTransaction],
) -> Result<(), sqlx::Error> {
    for txn in transactions {
        let record = to_json(txn)?;
        sqlx::query(
            "INSERT INTO balance_transactions
                (id, publisher_id, transaction_type, amount_cents, record, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(txn.id.as_uuid())
        .bind(txn.publisher.as_uuid())
        .bind(txn.transaction_type.to_string())
        .bind(txn.amount.cents())
        .bind(&record)
        .bind(txn.created_at)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Load all balances for startup hydration.
pub async fn load_balances(pool: &PgPool) -> Result<Vec<PublisherBalance>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RecordRow>("SELECT publisher_id AS id, record FROM publisher_balances")
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(|r| from_json(r.record)).collect()
}

/// Load the full transaction log, oldest first, for startup hydration.
pub async fn load_transactions(pool: &PgPool) -> Result<Vec<BalanceTransaction>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RecordRow>(
        "SELECT id, record FROM balance_transactions ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(|r| from_json(r.record)).collect()
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct RecordRow {
    #[allow(dead_code)]
    id: Uuid,
    record: serde_json::Value,
}
