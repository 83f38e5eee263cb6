//! License persistence operations.
//!
//! One row per license; the activation rows travel in the same row's
//! `activations` JSONB column since they are only ever read through
//! their license.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use mmkt_license::{Activation, License};

use super::{from_json, to_json};

/// Insert or update a license and its activation rows.
pub async fn upsert(
    pool: &PgPool,
    license: &License,
    activations: &[Activation],
) -> Result<(), sqlx::Error> {
    let record = to_json(license)?;
    let rows = to_json(&activations)?;

    sqlx::query(
        "INSERT INTO licenses
            (id, license_key, owner_id, module_id, license_type, status, record, activations, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            record = EXCLUDED.record,
            activations = EXCLUDED.activations,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(license.id.as_uuid())
    .bind(license.key.as_str())
    .bind(license.owner.as_uuid())
    .bind(license.module.as_uuid())
    .bind(license.license_type.to_string())
    .bind(license.status.to_string())
    .bind(&record)
    .bind(&rows)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load every license with its activation rows for startup hydration.
pub async fn load_all(pool: &PgPool) -> Result<Vec<(License, Vec<Activation>)>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LicenseRow>(
        "SELECT id, record, activations FROM licenses ORDER BY updated_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(LicenseRow::into_pair).collect()
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct LicenseRow {
    #[allow(dead_code)]
    id: Uuid,
    record: serde_json::Value,
    activations: serde_json::Value,
}

impl LicenseRow {
    fn into_pair(self) -> Result<(License, Vec<Activation>), sqlx::Error> {
        let license: License = from_json(self.record)?;
        let activations: Vec<Activation> = from_json(self.activations)?;
        Ok((license, activations))
    }
}
