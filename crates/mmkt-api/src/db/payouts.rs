//! Payout batch, adjustment, and schedule persistence operations.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use mmkt_ledger::Adjustment;
use mmkt_payout::{PayoutBatch, PayoutItem, PayoutSchedule};

use super::{from_json, to_json};

/// Insert or update a batch together with its items.
pub async fn upsert_batch(
    pool: &PgPool,
    batch: &PayoutBatch,
    items: &[PayoutItem],
) -> Result<(), sqlx::Error> {
    let record = to_json(batch)?;
    let item_rows = to_json(&items)?;

    sqlx::query(
        "INSERT INTO payout_batches (id, status, record, items, updated_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            record = EXCLUDED.record,
            items = EXCLUDED.items,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(batch.id.as_uuid())
    .bind(batch.status.to_string())
    .bind(&record)
    .bind(&item_rows)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert or update an adjustment.
pub async fn upsert_adjustment(pool: &PgPool, adjustment: &Adjustment) -> Result<(), sqlx::Error> {
    let record = to_json(adjustment)?;

    sqlx::query(
        "INSERT INTO payout_adjustments (id, publisher_id, status, record, updated_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            record = EXCLUDED.record,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(adjustment.id.as_uuid())
    .bind(adjustment.publisher.as_uuid())
    .bind(adjustment.status.to_string())
    .bind(&record)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Upsert the (single) payout schedule.
pub async fn upsert_schedule(pool: &PgPool, schedule: &PayoutSchedule) -> Result<(), sqlx::Error> {
    let record = to_json(schedule)?;

    sqlx::query(
        "INSERT INTO payout_schedule (id, record, updated_at)
         VALUES (1, $1, $2)
         ON CONFLICT (id) DO UPDATE SET
            record = EXCLUDED.record,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(&record)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load all batches with their items for startup hydration.
pub async fn load_batches(
    pool: &PgPool,
) -> Result<Vec<(PayoutBatch, Vec<PayoutItem>)>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BatchRow>(
        "SELECT id, record, items FROM payout_batches ORDER BY updated_at",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(BatchRow::into_pair).collect()
}

/// Load all adjustments for startup hydration.
pub async fn load_adjustments(pool: &PgPool) -> Result<Vec<Adjustment>, sqlx::Error> {
    let rows =
        sqlx::query_as::<_, RecordRow>("SELECT id, record FROM payout_adjustments")
            .fetch_all(pool)
            .await?;
    rows.into_iter().map(|r| from_json(r.record)).collect()
}

/// Load the schedule, if one has been configured.
pub async fn load_schedule(pool: &PgPool) -> Result<Option<PayoutSchedule>, sqlx::Error> {
    let row = sqlx::query_as::<_, ScheduleRow>("SELECT record FROM payout_schedule WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    row.map(|r| from_json(r.record)).transpose()
}

/// Internal row types for SQLx mapping.
#[derive(sqlx::FromRow)]
struct BatchRow {
    #[allow(dead_code)]
    id: Uuid,
    record: serde_json::Value,
    items: serde_json::Value,
}

impl BatchRow {
    fn into_pair(self) -> Result<(PayoutBatch, Vec<PayoutItem>), sqlx::Error> {
        let batch: PayoutBatch = from_json(self.record)?;
        let items: Vec<PayoutItem> = from_json(self.items)?;
        Ok((batch, items))
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    #[allow(dead_code)]
    id: Uuid,
    record: serde_json::Value,
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    record: serde_json::Value,
}
