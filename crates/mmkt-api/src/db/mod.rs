//! # Persistence Mirror
//!
//! Optional Postgres mirror of the in-memory core. Each aggregate gets
//! key columns for querying plus a `record` JSONB column carrying the
//! full serialized struct; monetary columns are BIGINT minor units.
//! Writers are called by handlers after the core mutation commits under
//! its lock; loaders hydrate the core at startup.
//!
//! When `DATABASE_URL` is unset the server runs in-memory only.

pub mod ledger;
pub mod licenses;
pub mod payouts;

use sqlx::PgPool;

/// Connect to Postgres if `DATABASE_URL` is set and ensure the schema
/// exists. Returns `None` (in-memory mode) when unset.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        tracing::warn!("DATABASE_URL not set; running without persistence");
        return Ok(None);
    };

    let pool = PgPool::connect(&url).await?;
    migrate(&pool).await?;
    tracing::info!("database connected and migrated");
    Ok(Some(pool))
}

/// Create the mirror tables if they do not exist. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS licenses (
            id UUID PRIMARY KEY,
            license_key TEXT NOT NULL UNIQUE,
            owner_id UUID NOT NULL,
            module_id UUID NOT NULL,
            license_type TEXT NOT NULL,
            status TEXT NOT NULL,
            record JSONB NOT NULL,
            activations JSONB NOT NULL DEFAULT '[]',
            updated_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS ix_licenses_owner ON licenses (owner_id, module_id)",
        "CREATE TABLE IF NOT EXISTS publisher_balances (
            publisher_id UUID PRIMARY KEY,
            available_cents BIGINT NOT NULL,
            pending_cents BIGINT NOT NULL,
            reserved_cents BIGINT NOT NULL,
            record JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS balance_transactions (
            id UUID PRIMARY KEY,
            publisher_id UUID NOT NULL,
            transaction_type TEXT NOT NULL,
            amount_cents BIGINT NOT NULL,
            record JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS ix_transactions_publisher
            ON balance_transactions (publisher_id, created_at)",
        "CREATE TABLE IF NOT EXISTS payout_batches (
            id UUID PRIMARY KEY,
            status TEXT NOT NULL,
            record JSONB NOT NULL,
            items JSONB NOT NULL DEFAULT '[]',
            updated_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS payout_adjustments (
            id UUID PRIMARY KEY,
            publisher_id UUID NOT NULL,
            status TEXT NOT NULL,
            record JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS payout_schedule (
            id SMALLINT PRIMARY KEY DEFAULT 1 CHECK (id = 1),
            record JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Serialize a record for its JSONB column, mapping failure onto
/// `sqlx::Error` instead of silently writing a default.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "failed to serialize record for persistence");
        sqlx::Error::Encode(Box::new(e))
    })
}

/// Deserialize a JSONB column back into its record, mapping failure
/// onto `sqlx::Error` — a corrupt row must fail hydration loudly, not
/// vanish.
pub(crate) fn from_json<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, sqlx::Error> {
    serde_json::from_value(value).map_err(|e| {
        tracing::error!(error = %e, "failed to deserialize persisted record");
        sqlx::Error::Decode(Box::new(e))
    })
}
