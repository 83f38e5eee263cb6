//! # Request Validation
//!
//! The [`Validate`] trait covers the business rules serde cannot check
//! (length bounds, amount formats, enum tags). Handlers take
//! `Result<Json<T>, JsonRejection>` and run both layers through
//! [`extract_validated_json`]: malformed JSON is a 400, a rule
//! violation a 422.

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::AppError;

/// Business-rule validation for request DTOs.
pub trait Validate {
    /// Validate; return an error message on failure.
    fn validate(&self) -> Result<(), String>;
}

/// Extract a JSON body, mapping deserialization errors to 400.
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and run [`Validate`] on it.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}
