//! # Authentication Middleware
//!
//! Bearer-token middleware for the authenticated planes. Verification,
//! activation, and deactivation are public by design and mounted
//! outside this middleware.
//!
//! ## Token Format
//!
//! ```text
//! Bearer {secret}                 — admin (payout administration)
//! Bearer user:{user_id}:{secret}  — license holder (own licenses)
//! ```
//!
//! Comparison against the configured secret is constant-time. When no
//! secret is configured the server runs open (development mode) and
//! every caller is an admin.

use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use mmkt_core::UserId;

use crate::error::{AppError, ErrorBody, ErrorDetail};

// ─── Role & caller ───────────────────────────────────────────────────

/// Caller roles, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Can manage their own licenses.
    User,
    /// Full access to license management and payout administration.
    Admin,
}

/// Identity of the authenticated caller, injected into request
/// extensions by the middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// The caller's role.
    pub role: Role,
    /// The caller's user id (set for `Role::User`).
    pub user: Option<UserId>,
}

impl Caller {
    /// Require admin privileges.
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role >= Role::Admin {
            Ok(())
        } else {
            Err(AppError::Forbidden("admin access required".to_string()))
        }
    }

    /// The user id this caller manages licenses for. Admins without a
    /// user binding are rejected on owner-scoped endpoints.
    pub fn user_id(&self) -> Result<UserId, AppError> {
        self.user
            .ok_or_else(|| AppError::Forbidden("endpoint requires a user identity".to_string()))
    }
}

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

// ─── Token handling ──────────────────────────────────────────────────

/// The configured API secret. `Debug` redacts the value.
#[derive(Clone)]
pub struct SecretToken(String);

impl SecretToken {
    /// Wrap a secret.
    pub fn new(secret: String) -> Self {
        Self(secret)
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken([REDACTED])")
    }
}

/// Auth configuration injected into request extensions.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// The expected secret; `None` disables authentication.
    pub token: Option<SecretToken>,
}

/// Constant-time token comparison. A length mismatch still performs a
/// dummy comparison so timing does not leak the configured length.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Parse a bearer token into a caller identity.
///
/// `{secret}` is an anonymous admin; `user:{uuid}:{secret}` a license
/// holder; `admin:{uuid}:{secret}` an admin with a recorded identity
/// (used as the approver on adjustments and batches).
pub fn parse_bearer_token(provided: &str, expected: &str) -> Result<Caller, String> {
    let role_prefixed = |rest: &str, role: Role| -> Result<Caller, String> {
        let (user_str, secret) = rest
            .split_once(':')
            .ok_or_else(|| "malformed token".to_string())?;
        if !constant_time_token_eq(secret, expected) {
            return Err("invalid bearer token".to_string());
        }
        let user = Uuid::parse_str(user_str)
            .map_err(|_| "malformed user id in token".to_string())?;
        Ok(Caller {
            role,
            user: Some(UserId::from_uuid(user)),
        })
    };

    if let Some(rest) = provided.strip_prefix("user:") {
        role_prefixed(rest, Role::User)
    } else if let Some(rest) = provided.strip_prefix("admin:") {
        role_prefixed(rest, Role::Admin)
    } else if constant_time_token_eq(provided, expected) {
        Ok(Caller {
            role: Role::Admin,
            user: None,
        })
    } else {
        Err("invalid bearer token".to_string())
    }
}

fn unauthorized(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// The middleware: checks the bearer token and injects [`Caller`].
pub async fn auth_middleware(mut req: Request, next: Next) -> Response {
    let config = req
        .extensions()
        .get::<AuthConfig>()
        .cloned()
        .unwrap_or_default();

    let caller = match &config.token {
        // Development mode: no secret configured, everyone is admin.
        None => Caller {
            role: Role::Admin,
            user: None,
        },
        Some(SecretToken(expected)) => {
            let provided = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "));
            match provided {
                None => return unauthorized("missing bearer token"),
                Some(token) => match parse_bearer_token(token, expected) {
                    Ok(caller) => caller,
                    Err(message) => return unauthorized(&message),
                },
            }
        }
    };

    req.extensions_mut().insert(caller);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_secret_is_admin() {
        let caller = parse_bearer_token("s3cret", "s3cret").unwrap();
        assert_eq!(caller.role, Role::Admin);
        assert!(caller.user.is_none());
        assert!(caller.require_admin().is_ok());
    }

    #[test]
    fn user_token_carries_identity() {
        let id = Uuid::new_v4();
        let caller = parse_bearer_token(&format!("user:{id}:s3cret"), "s3cret").unwrap();
        assert_eq!(caller.role, Role::User);
        assert_eq!(caller.user, Some(UserId::from_uuid(id)));
        assert!(caller.require_admin().is_err());
        assert!(caller.user_id().is_ok());
    }

    #[test]
    fn wrong_secret_rejected() {
        assert!(parse_bearer_token("nope", "s3cret").is_err());
        let id = Uuid::new_v4();
        assert!(parse_bearer_token(&format!("user:{id}:nope"), "s3cret").is_err());
    }

    #[test]
    fn malformed_user_token_rejected() {
        assert!(parse_bearer_token("user:not-a-uuid:s3cret", "s3cret").is_err());
        assert!(parse_bearer_token("user:s3cret", "s3cret").is_err());
    }

    #[test]
    fn secret_token_debug_is_redacted() {
        let token = SecretToken::new("super-secret".to_string());
        assert_eq!(format!("{token:?}"), "SecretToken([REDACTED])");
    }
}
