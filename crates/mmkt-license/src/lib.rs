//! # mmkt-license — License Registry & Activation Tracker
//!
//! Owns the entitlement half of the marketplace core: license issuance
//! and key generation, per-license lifecycle (status, expiry, trial),
//! and per-instance activation records with the active-instance counter
//! invariant.
//!
//! ## Invariants
//!
//! - `active_instances ≤ max_instances` at all times.
//! - `active_instances` equals the number of activation rows with status
//!   `Active` for that license, re-established at every mutation point.
//! - At most one non-expired license per (owner, module, license type).
//! - Trials are one-time per (owner, module), ever.
//! - Licenses are never deleted; all lifecycle ends are status flips.
//!
//! ## Verification never raises
//!
//! [`LicenseRegistry::verify`] is called by remote, unattended
//! deployments. Every failure mode (unknown key, wrong status, expiry,
//! domain, instance cap) is a structured [`Verification`] payload, not an
//! error.

pub mod activation;
pub mod error;
pub mod key;
pub mod license;
pub mod registry;

pub use activation::{Activation, ActivationMetadata, ActivationStatus};
pub use error::LicenseError;
pub use key::LicenseKey;
pub use license::{License, LicenseStatus, LicenseType, Subscription};
pub use registry::{
    IssueRequest, LicenseRegistry, LicenseStats, Verification, VerifiedLicense, VerifyFailure,
    VerifyPolicy,
};
