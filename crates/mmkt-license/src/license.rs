//! # License Records & Lifecycle
//!
//! The [`License`] record and its two closed enums: [`LicenseType`]
//! (what was granted) and [`LicenseStatus`] (where the grant is in its
//! lifecycle). Status changes go through an explicit allowed-transition
//! table — there is no way to flip a status string ad hoc.
//!
//! ## States
//!
//! ```text
//! Active ──▶ Expired ──▶ Active (extension)
//!   │
//!   ├──▶ Suspended ──▶ Active (reinstatement)
//!   │        │
//!   │        └──▶ Revoked / Cancelled (terminal)
//!   │
//!   └──▶ Cancelled / Revoked (terminal)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mmkt_core::{LicenseId, ModuleId, UserId};

use crate::error::LicenseError;
use crate::key::LicenseKey;

// ─── LicenseType ─────────────────────────────────────────────────────

/// What kind of grant a license represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseType {
    /// Free module, effectively unlimited instances.
    Free,
    /// One-time purchase, perpetual.
    Purchase,
    /// Recurring subscription, expiry tracks the billing period.
    Subscription,
    /// Time-boxed trial, one per (owner, module), ever.
    Trial,
    /// Developer license for the module's own publisher.
    Dev,
}

impl std::fmt::Display for LicenseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::Purchase => "purchase",
            Self::Subscription => "subscription",
            Self::Trial => "trial",
            Self::Dev => "dev",
        };
        f.write_str(s)
    }
}

// ─── LicenseStatus ───────────────────────────────────────────────────

/// Lifecycle status of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    /// Valid for verification and activation.
    Active,
    /// Past its expiry; revivable by extension.
    Expired,
    /// Ended by the owner or an admin (terminal).
    Cancelled,
    /// Temporarily disabled by an admin.
    Suspended,
    /// Permanently invalidated (terminal).
    Revoked,
}

impl LicenseStatus {
    /// Whether this status ends the license for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Revoked)
    }

    /// Whether `self -> to` is an allowed transition.
    pub fn can_transition(&self, to: LicenseStatus) -> bool {
        use LicenseStatus::*;
        matches!(
            (self, to),
            (Active, Expired)
                | (Active, Cancelled)
                | (Active, Suspended)
                | (Active, Revoked)
                | (Expired, Active)
                | (Expired, Cancelled)
                | (Suspended, Active)
                | (Suspended, Cancelled)
                | (Suspended, Revoked)
        )
    }
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Suspended => "suspended",
            Self::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

// ─── Subscription linkage ────────────────────────────────────────────

/// Link to an external subscription driving this license's expiry.
///
/// The subscription id is an opaque reference into the billing
/// collaborator; this core records it but never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// External subscription identifier.
    pub external_id: String,
    /// External subscription status as last reported.
    pub external_status: String,
    /// Current billing period start.
    pub period_start: DateTime<Utc>,
    /// Current billing period end — mirrored into the license expiry.
    pub period_end: DateTime<Utc>,
    /// When the owner requested cancellation, if they have.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Whether cancellation takes effect at period end.
    pub cancel_at_period_end: bool,
}

// ─── License ─────────────────────────────────────────────────────────

/// A grant of usage rights for one module to one owner.
///
/// Mutation happens only through [`crate::registry::LicenseRegistry`]
/// methods, which enforce the transition table and keep
/// `active_instances` in lock-step with the activation rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    /// Unique identifier.
    pub id: LicenseId,
    /// The unique key presented by deployments.
    pub key: LicenseKey,
    /// The user holding the grant.
    pub owner: UserId,
    /// The licensed module.
    pub module: ModuleId,
    /// What kind of grant this is.
    pub license_type: LicenseType,
    /// Lifecycle status.
    pub status: LicenseStatus,
    /// When the license was issued.
    pub issued_at: DateTime<Utc>,
    /// When the first instance activated, set once.
    pub activated_at: Option<DateTime<Utc>>,
    /// When the license expires; `None` is perpetual.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the license was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Whether this is (or started as) a trial grant.
    pub is_trial: bool,
    /// Trial end, when `is_trial`.
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Set when a trial was upgraded to a purchase.
    pub converted_from_trial: bool,
    /// Instance cap.
    pub max_instances: u32,
    /// Cached count of activation rows with status `Active`.
    pub active_instances: u32,
    /// Last successful verification.
    pub last_verified_at: Option<DateTime<Utc>>,
    /// Domain allow-list; empty means unrestricted.
    pub allowed_domains: Vec<String>,
    /// External subscription linkage, for subscription licenses.
    pub subscription: Option<Subscription>,
    /// Order reference recorded at purchase/conversion time.
    pub order_ref: Option<String>,
    /// Internal notes (cancellation reasons and the like); never shown
    /// to license holders.
    pub internal_notes: Option<String>,
}

impl License {
    /// Whether the license is valid for use at `now`: status Active and
    /// not past expiry.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.status != LicenseStatus::Active {
            return false;
        }
        match self.expires_at {
            Some(expires) => now <= expires,
            None => true,
        }
    }

    /// Whether the license can accept a new activation at `now`.
    pub fn can_activate(&self, now: DateTime<Utc>) -> bool {
        self.is_valid(now) && self.active_instances < self.max_instances
    }

    /// Whether `domain` passes the allow-list. An empty allow-list or an
    /// absent domain always passes.
    pub fn domain_allowed(&self, domain: Option<&str>) -> bool {
        match domain {
            Some(d) if !self.allowed_domains.is_empty() => {
                self.allowed_domains.iter().any(|allowed| allowed == d)
            }
            _ => true,
        }
    }

    /// Apply a status transition, enforcing the transition table.
    pub(crate) fn transition(&mut self, to: LicenseStatus) -> Result<(), LicenseError> {
        if !self.status.can_transition(to) {
            return Err(LicenseError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
