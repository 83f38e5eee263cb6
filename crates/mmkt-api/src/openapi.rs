//! # OpenAPI Specification Assembly
//!
//! Assembles the utoipa-documented routes into an OpenAPI spec served
//! at `/openapi.json`. The public license plane is fully annotated —
//! it is the surface remote deployments integrate against; the admin
//! plane is documented by its DTO schemas.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI spec.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Marketplace Settlement Core API",
        version = "0.1.0",
        description = "License verification and activation, license management, publisher balance ledger, and payout batch administration.",
        license(name = "AGPL-3.0-or-later")
    ),
    paths(
        crate::routes::licenses::verify_license,
        crate::routes::licenses::activate_license,
        crate::routes::licenses::deactivate_license,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        crate::routes::licenses::VerifyRequest,
        crate::routes::licenses::VerifyResponse,
        crate::routes::licenses::ActivateRequest,
        crate::routes::licenses::DeactivateRequest,
        crate::routes::licenses::ActivationResponse,
        crate::routes::licenses::LicenseResponse,
        crate::routes::payouts::BalanceResponse,
        crate::routes::payouts::TransactionResponse,
        crate::routes::payouts::BatchResponse,
        crate::routes::payouts::ItemResponse,
        crate::routes::payouts::AdjustmentResponse,
        crate::routes::payouts::ScheduleResponse,
    ))
)]
pub struct ApiDoc;

/// Serve the spec at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
