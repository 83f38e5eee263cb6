//! # mmkt-api — HTTP Surface for the Marketplace Settlement Core
//!
//! ## API Surface
//!
//! | Prefix                      | Module                 | Auth    |
//! |-----------------------------|------------------------|---------|
//! | `/v1/licenses/verify`       | [`routes::licenses`]   | none    |
//! | `/v1/licenses/activate`     | [`routes::licenses`]   | none    |
//! | `/v1/licenses/deactivate`   | [`routes::licenses`]   | none    |
//! | `/v1/licenses/*`            | [`routes::licenses`]   | bearer  |
//! | `/v1/payouts/*`             | [`routes::payouts`]    | bearer  |
//! | `/openapi.json`             | [`openapi`]            | none    |
//! | `/health/*`                 | here                   | none    |
//!
//! The verification/activation plane is public by design: it is called
//! by remote, unattended deployments that hold nothing but a license
//! key. Everything else sits behind the bearer-token middleware.

pub mod auth;
pub mod db;
pub mod error;
pub mod extractors;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::middleware::from_fn;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::state::AppState;

/// Assemble the full application router.
///
/// Health probes and the public license plane are mounted outside the
/// auth middleware.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };

    // Authenticated API routes.
    let api = Router::new()
        .merge(routes::licenses::router())
        .merge(routes::payouts::router())
        .layer(from_fn(auth::auth_middleware))
        .layer(axum::Extension(auth_config));

    // Public plane: verification/activation and the spec.
    let public = Router::new()
        .merge(routes::licenses::public_router())
        .merge(openapi::router());

    // Unauthenticated health probes.
    let health = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));

    Router::new()
        .merge(health)
        .merge(public)
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe — 200 whenever the process runs.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe — 200 when the application can serve.
async fn readiness() -> &'static str {
    "ready"
}
