//! # Activation Records
//!
//! An activation binds a license to one running instance. Rows are
//! unique per (license, instance_id): deactivating and reactivating the
//! same instance reuses the row instead of creating a duplicate, so the
//! activation history of an instance stays in one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mmkt_core::{ActivationId, LicenseId};

/// Status of an activation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    /// The instance currently holds a slot on the license.
    Active,
    /// The slot was released; the row is retained for reactivation.
    Deactivated,
}

impl std::fmt::Display for ActivationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Deactivated => f.write_str("deactivated"),
        }
    }
}

/// Caller-supplied facts about the instance being activated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivationMetadata {
    /// Friendly name for the instance.
    pub instance_name: Option<String>,
    /// Domain the module is installed on.
    pub domain: Option<String>,
    /// Server IP address.
    pub ip_address: Option<String>,
    /// Free-form server facts (platform, runtime version, …).
    pub server_info: Option<serde_json::Value>,
}

/// A live (or released) binding of a license to one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    /// Unique identifier.
    pub id: ActivationId,
    /// The license this activation belongs to.
    pub license: LicenseId,
    /// Caller-supplied stable identifier for the deployment (8–64 chars,
    /// validated at the API boundary).
    pub instance_id: String,
    /// Instance facts captured at activation time.
    pub metadata: ActivationMetadata,
    /// Row status.
    pub status: ActivationStatus,
    /// When the slot was (last) taken.
    pub activated_at: DateTime<Utc>,
    /// When the slot was released, if it has been.
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Number of successful verifications against this row.
    pub check_count: u64,
    /// Last successful verification.
    pub last_check: Option<DateTime<Utc>>,
}

impl Activation {
    /// Create a fresh active row for `instance_id`.
    pub fn new(
        license: LicenseId,
        instance_id: String,
        metadata: ActivationMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActivationId::new(),
            license,
            instance_id,
            metadata,
            status: ActivationStatus::Active,
            activated_at: now,
            deactivated_at: None,
            check_count: 0,
            last_check: None,
        }
    }

    /// Record one successful verification.
    pub fn record_check(&mut self, now: DateTime<Utc>) {
        self.check_count += 1;
        self.last_check = Some(now);
    }
}
