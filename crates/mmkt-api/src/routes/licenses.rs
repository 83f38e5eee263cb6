//! # License API
//!
//! Two planes share this module:
//!
//! - **Public** (no auth, consumed by remote deployments):
//!   - `POST /v1/licenses/verify` — never errors; every failure mode is
//!     a structured `{valid: false, error, message}` payload.
//!   - `POST /v1/licenses/activate` / `POST /v1/licenses/deactivate`
//! - **Authenticated** (license holders): list own licenses, license
//!   detail with activations, create free/trial licenses, per-instance
//!   deactivate, cancel.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use mmkt_core::{LicenseId, ModuleId};
use mmkt_license::{
    Activation, ActivationMetadata, License, LicenseKey, LicenseStatus, LicenseType, Verification,
};

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Request to verify a license key for one instance.
#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyRequest {
    /// The license key, exactly 19 characters (`XXXX-XXXX-XXXX-XXXX`).
    pub license_key: String,
    /// Stable instance identifier, 8–64 characters.
    pub instance_id: String,
    /// Domain the module runs on, checked against the allow-list.
    pub domain: Option<String>,
}

fn validate_key_and_instance(license_key: &str, instance_id: &str) -> Result<(), String> {
    if license_key.len() != LicenseKey::LEN {
        return Err(format!(
            "license_key must be exactly {} characters",
            LicenseKey::LEN
        ));
    }
    if instance_id.len() < 8 || instance_id.len() > 64 {
        return Err("instance_id must be 8-64 characters".to_string());
    }
    Ok(())
}

impl Validate for VerifyRequest {
    fn validate(&self) -> Result<(), String> {
        validate_key_and_instance(&self.license_key, &self.instance_id)?;
        if let Some(domain) = &self.domain {
            if domain.is_empty() || domain.len() > 200 {
                return Err("domain must be 1-200 characters".to_string());
            }
        }
        Ok(())
    }
}

/// Verification outcome payload. `valid: false` carries `error` and
/// `message`; `valid: true` carries the license facts.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_trial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_ends_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<Verification> for VerifyResponse {
    fn from(v: Verification) -> Self {
        match (v.license, v.failure) {
            (Some(license), _) => Self {
                valid: true,
                license_type: Some(license.license_type.to_string()),
                module_id: Some(*license.module.as_uuid()),
                expires_at: license.expires_at,
                is_trial: Some(license.is_trial),
                trial_ends_at: license.trial_ends_at,
                error: None,
                message: None,
            },
            (None, failure) => {
                let (error, message) = failure
                    .map(|f| (f.code().to_string(), f.message()))
                    .unwrap_or_else(|| ("invalid_license".to_string(), "invalid".to_string()));
                Self {
                    valid: false,
                    license_type: None,
                    module_id: None,
                    expires_at: None,
                    is_trial: None,
                    trial_ends_at: None,
                    error: Some(error),
                    message: Some(message),
                }
            }
        }
    }
}

/// Request to activate an instance.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ActivateRequest {
    pub license_key: String,
    pub instance_id: String,
    pub domain: Option<String>,
    pub instance_name: Option<String>,
    pub ip_address: Option<String>,
    pub server_info: Option<serde_json::Value>,
}

impl Validate for ActivateRequest {
    fn validate(&self) -> Result<(), String> {
        validate_key_and_instance(&self.license_key, &self.instance_id)
    }
}

/// Request to deactivate an instance by key.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeactivateRequest {
    pub license_key: String,
    pub instance_id: String,
}

impl Validate for DeactivateRequest {
    fn validate(&self) -> Result<(), String> {
        validate_key_and_instance(&self.license_key, &self.instance_id)
    }
}

/// An activation row as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActivationResponse {
    pub id: Uuid,
    pub instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub status: String,
    pub activated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,
    pub check_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

impl From<&Activation> for ActivationResponse {
    fn from(a: &Activation) -> Self {
        Self {
            id: *a.id.as_uuid(),
            instance_id: a.instance_id.clone(),
            instance_name: a.metadata.instance_name.clone(),
            domain: a.metadata.domain.clone(),
            status: a.status.to_string(),
            activated_at: a.activated_at,
            deactivated_at: a.deactivated_at,
            check_count: a.check_count,
            last_check: a.last_check,
        }
    }
}

/// A license as returned by the API. The key is only exposed to its
/// owner.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LicenseResponse {
    pub id: Uuid,
    pub license_key: String,
    pub license_type: String,
    pub status: String,
    pub module_id: Uuid,
    pub issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_trial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub converted_from_trial: bool,
    pub max_instances: u32,
    pub active_instances: u32,
}

impl From<&License> for LicenseResponse {
    fn from(l: &License) -> Self {
        Self {
            id: *l.id.as_uuid(),
            license_key: l.key.to_string(),
            license_type: l.license_type.to_string(),
            status: l.status.to_string(),
            module_id: *l.module.as_uuid(),
            issued_at: l.issued_at,
            activated_at: l.activated_at,
            expires_at: l.expires_at,
            is_trial: l.is_trial,
            trial_ends_at: l.trial_ends_at,
            converted_from_trial: l.converted_from_trial,
            max_instances: l.max_instances,
            active_instances: l.active_instances,
        }
    }
}

/// License detail: the license plus its activation rows.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LicenseDetailResponse {
    #[serde(flatten)]
    pub license: LicenseResponse,
    pub activations: Vec<ActivationResponse>,
}

/// Request to create a free or trial license for the calling user.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateLicenseRequest {
    pub module_id: Uuid,
    /// `"free"` or `"trial"` — paid licenses are issued by the order
    /// subsystem, not this endpoint.
    pub license_type: String,
    /// Trial length; defaults to 14 days.
    pub trial_days: Option<i64>,
}

impl Validate for CreateLicenseRequest {
    fn validate(&self) -> Result<(), String> {
        if !matches!(self.license_type.as_str(), "free" | "trial") {
            return Err("license_type must be one of: free, trial".to_string());
        }
        if let Some(days) = self.trial_days {
            if !(1..=90).contains(&days) {
                return Err("trial_days must be 1-90".to_string());
            }
        }
        Ok(())
    }
}

/// Request to cancel a license.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelLicenseRequest {
    pub reason: Option<String>,
}

/// Request to deactivate one instance of an owned license.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeactivateInstanceRequest {
    pub instance_id: String,
}

/// Query parameters for the license list.
#[derive(Debug, Default, Deserialize)]
pub struct LicenseListQuery {
    /// Filter by status (`active`, `expired`, ...).
    pub status: Option<String>,
}

fn parse_status(s: &str) -> Result<LicenseStatus, AppError> {
    match s {
        "active" => Ok(LicenseStatus::Active),
        "expired" => Ok(LicenseStatus::Expired),
        "cancelled" => Ok(LicenseStatus::Cancelled),
        "suspended" => Ok(LicenseStatus::Suspended),
        "revoked" => Ok(LicenseStatus::Revoked),
        other => Err(AppError::Validation(format!("unknown status: {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Public routes: verification and activation, no auth.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/v1/licenses/verify", post(verify_license))
        .route("/v1/licenses/activate", post(activate_license))
        .route("/v1/licenses/deactivate", post(deactivate_license))
}

/// Authenticated license-management routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/licenses", get(list_licenses).post(create_license))
        .route("/v1/licenses/{id}", get(get_license))
        .route("/v1/licenses/{id}/cancel", post(cancel_license))
        .route("/v1/licenses/{id}/deactivate", post(deactivate_instance))
}

// ---------------------------------------------------------------------------
// Public handlers
// ---------------------------------------------------------------------------

/// POST /v1/licenses/verify — verify a key for one instance.
///
/// Always returns 200 with a structured payload once the request shape
/// is valid; remote deployments branch on `valid` without exception
/// handling. A well-formed but unknown or malformed-beyond-length key
/// reports `invalid_license` rather than an HTTP error.
#[utoipa::path(
    post,
    path = "/v1/licenses/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Verification outcome", body = VerifyResponse),
        (status = 422, description = "Malformed request shape")
    ),
    tag = "licenses"
)]
pub async fn verify_license(
    State(state): State<AppState>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let now = Utc::now();

    let Ok(key) = LicenseKey::parse(&req.license_key) else {
        return Ok(Json(VerifyResponse {
            valid: false,
            license_type: None,
            module_id: None,
            expires_at: None,
            is_trial: None,
            trial_ends_at: None,
            error: Some("invalid_license".to_string()),
            message: Some("License key not found".to_string()),
        }));
    };

    let (verification, mirror) = {
        let mut core = state.core.write();
        let verification = core
            .registry
            .verify(&key, &req.instance_id, req.domain.as_deref(), now);
        let mirror = core
            .registry
            .get_by_key(&key)
            .map(|l| (l.clone(), core.registry.activations(l.id).to_vec()));
        (verification, mirror)
    };

    if let (Some(pool), Some((license, rows))) = (&state.db, mirror) {
        if let Err(e) = crate::db::licenses::upsert(pool, &license, &rows).await {
            tracing::error!(error = %e, license = %license.id, "license mirror write failed");
        }
    }

    Ok(Json(verification.into()))
}

/// POST /v1/licenses/activate — explicitly activate an instance.
#[utoipa::path(
    post,
    path = "/v1/licenses/activate",
    request_body = ActivateRequest,
    responses(
        (status = 200, description = "The activation", body = ActivationResponse),
        (status = 404, description = "Unknown license key"),
        (status = 409, description = "Cap reached or license invalid")
    ),
    tag = "licenses"
)]
pub async fn activate_license(
    State(state): State<AppState>,
    body: Result<Json<ActivateRequest>, JsonRejection>,
) -> Result<Json<ActivationResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let key = LicenseKey::parse(&req.license_key)
        .map_err(|_| AppError::NotFound("license not found".to_string()))?;
    let metadata = ActivationMetadata {
        instance_name: req.instance_name,
        domain: req.domain,
        ip_address: req.ip_address,
        server_info: req.server_info,
    };

    let (activation, mirror) = {
        let mut core = state.core.write();
        let activation = core
            .registry
            .activate(&key, &req.instance_id, metadata, Utc::now())?;
        let mirror = core
            .registry
            .get_by_key(&key)
            .map(|l| (l.clone(), core.registry.activations(l.id).to_vec()));
        (activation, mirror)
    };

    if let (Some(pool), Some((license, rows))) = (&state.db, mirror) {
        if let Err(e) = crate::db::licenses::upsert(pool, &license, &rows).await {
            tracing::error!(error = %e, license = %license.id, "license mirror write failed");
        }
    }

    Ok(Json(ActivationResponse::from(&activation)))
}

/// POST /v1/licenses/deactivate — release an instance's slot.
#[utoipa::path(
    post,
    path = "/v1/licenses/deactivate",
    request_body = DeactivateRequest,
    responses(
        (status = 200, description = "Deactivated"),
        (status = 404, description = "No matching active activation")
    ),
    tag = "licenses"
)]
pub async fn deactivate_license(
    State(state): State<AppState>,
    body: Result<Json<DeactivateRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req = extract_validated_json(body)?;
    let key = LicenseKey::parse(&req.license_key)
        .map_err(|_| AppError::NotFound("license not found".to_string()))?;

    let mirror = {
        let mut core = state.core.write();
        if !core.registry.deactivate(&key, &req.instance_id, Utc::now()) {
            return Err(AppError::NotFound(
                "no active activation for this instance".to_string(),
            ));
        }
        core.registry
            .get_by_key(&key)
            .map(|l| (l.clone(), core.registry.activations(l.id).to_vec()))
    };

    if let (Some(pool), Some((license, rows))) = (&state.db, mirror) {
        if let Err(e) = crate::db::licenses::upsert(pool, &license, &rows).await {
            tracing::error!(error = %e, license = %license.id, "license mirror write failed");
        }
    }

    Ok(Json(serde_json::json!({ "status": "deactivated" })))
}

// ---------------------------------------------------------------------------
// Authenticated handlers
// ---------------------------------------------------------------------------

/// GET /v1/licenses — list the caller's licenses.
async fn list_licenses(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<LicenseListQuery>,
) -> Result<Json<Vec<LicenseResponse>>, AppError> {
    let owner = caller.user_id()?;
    let status = query.status.as_deref().map(parse_status).transpose()?;

    let core = state.core.read();
    let licenses = core
        .registry
        .licenses_for_owner(owner, status)
        .into_iter()
        .map(LicenseResponse::from)
        .collect();
    Ok(Json(licenses))
}

/// GET /v1/licenses/{id} — license detail with activations.
async fn get_license(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<LicenseDetailResponse>, AppError> {
    let owner = caller.user_id()?;
    let id = LicenseId::from_uuid(id);

    let core = state.core.read();
    let license = core
        .registry
        .get(id)
        .filter(|l| l.owner == owner)
        .ok_or_else(|| AppError::NotFound(format!("license {id}")))?;
    let activations = core
        .registry
        .activations(id)
        .iter()
        .map(ActivationResponse::from)
        .collect();

    Ok(Json(LicenseDetailResponse {
        license: LicenseResponse::from(license),
        activations,
    }))
}

/// POST /v1/licenses — create a free or trial license for the caller.
async fn create_license(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<CreateLicenseRequest>, JsonRejection>,
) -> Result<Json<LicenseResponse>, AppError> {
    let owner = caller.user_id()?;
    let req = extract_validated_json(body)?;
    let module = ModuleId::from_uuid(req.module_id);
    let now = Utc::now();

    let (license, rows) = {
        let mut core = state.core.write();
        let license = match req.license_type.as_str() {
            "free" => core.registry.create_free(owner, module, now)?,
            _ => core
                .registry
                .create_trial(owner, module, req.trial_days.unwrap_or(14), now)?,
        };
        let rows = core.registry.activations(license.id).to_vec();
        (license, rows)
    };

    if let Some(pool) = &state.db {
        if let Err(e) = crate::db::licenses::upsert(pool, &license, &rows).await {
            tracing::error!(error = %e, license = %license.id, "license mirror write failed");
        }
    }

    Ok(Json(LicenseResponse::from(&license)))
}

/// POST /v1/licenses/{id}/cancel — cancel an owned trial or
/// subscription license. Purchases are cancelled through support.
async fn cancel_license(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Result<Json<CancelLicenseRequest>, JsonRejection>,
) -> Result<Json<LicenseResponse>, AppError> {
    let owner = caller.user_id()?;
    let req = crate::extractors::extract_json(body).unwrap_or_default();
    let id = LicenseId::from_uuid(id);

    let (license, rows) = {
        let mut core = state.core.write();
        let existing = core
            .registry
            .get(id)
            .filter(|l| l.owner == owner)
            .ok_or_else(|| AppError::NotFound(format!("license {id}")))?;
        if !matches!(
            existing.license_type,
            LicenseType::Trial | LicenseType::Subscription
        ) {
            return Err(AppError::Validation(
                "only trial and subscription licenses can be cancelled here".to_string(),
            ));
        }
        let license = core
            .registry
            .cancel(id, req.reason.as_deref(), Utc::now())?;
        let rows = core.registry.activations(id).to_vec();
        (license, rows)
    };

    if let Some(pool) = &state.db {
        if let Err(e) = crate::db::licenses::upsert(pool, &license, &rows).await {
            tracing::error!(error = %e, license = %license.id, "license mirror write failed");
        }
    }

    Ok(Json(LicenseResponse::from(&license)))
}

/// POST /v1/licenses/{id}/deactivate — release one instance of an
/// owned license.
async fn deactivate_instance(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Result<Json<DeactivateInstanceRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let owner = caller.user_id()?;
    let req = crate::extractors::extract_json(body)?;
    let id = LicenseId::from_uuid(id);

    let mirror = {
        let mut core = state.core.write();
        let key = core
            .registry
            .get(id)
            .filter(|l| l.owner == owner)
            .map(|l| l.key.clone())
            .ok_or_else(|| AppError::NotFound(format!("license {id}")))?;
        if !core.registry.deactivate(&key, &req.instance_id, Utc::now()) {
            return Err(AppError::NotFound(
                "no active activation for this instance".to_string(),
            ));
        }
        core.registry
            .get(id)
            .map(|l| (l.clone(), core.registry.activations(id).to_vec()))
    };

    if let (Some(pool), Some((license, rows))) = (&state.db, mirror) {
        if let Err(e) = crate::db::licenses::upsert(pool, &license, &rows).await {
            tracing::error!(error = %e, license = %license.id, "license mirror write failed");
        }
    }

    Ok(Json(serde_json::json!({ "status": "deactivated" })))
}
