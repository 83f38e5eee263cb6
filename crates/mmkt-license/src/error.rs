//! License domain errors.
//!
//! Domain-rule violations only — deterministic, reported to the caller,
//! never retried. The verification path does not use this type at all;
//! it returns a structured payload instead (see `registry::Verification`).

use mmkt_core::{LicenseId, ModuleId, UserId};
use thiserror::Error;

use crate::license::LicenseStatus;

/// Errors from license registry operations.
#[derive(Error, Debug)]
pub enum LicenseError {
    /// No license with the given id or key.
    #[error("license not found: {0}")]
    NotFound(String),

    /// The key string is not in `XXXX-XXXX-XXXX-XXXX` form.
    #[error("malformed license key: {0:?}")]
    MalformedKey(String),

    /// Key generation kept colliding with existing keys.
    #[error("license key space exhausted after {attempts} attempts")]
    KeyCollision {
        /// How many generation attempts were made.
        attempts: u32,
    },

    /// An active license of this type, or a prior trial, already exists
    /// for this (owner, module).
    #[error("owner {owner} already licensed for module {module}: {reason}")]
    AlreadyLicensed {
        /// The license owner.
        owner: UserId,
        /// The target module.
        module: ModuleId,
        /// Which uniqueness rule was violated.
        reason: String,
    },

    /// The license cannot accept a new activation.
    #[error("cannot activate license {license}: {reason}")]
    CannotActivate {
        /// The license that rejected the activation.
        license: LicenseId,
        /// Why activation was refused.
        reason: String,
    },

    /// Attempted status transition is not in the allowed-transition table.
    #[error("invalid license transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: LicenseStatus,
        /// Attempted target status.
        to: LicenseStatus,
    },

    /// The operation requires a trial license.
    #[error("license {0} is not a trial")]
    NotATrial(LicenseId),
}
