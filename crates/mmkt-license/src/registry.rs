//! # License Registry
//!
//! The owning service for licenses and their activation rows. All
//! mutation goes through `&mut self` methods here, which is what lets
//! the registry re-establish the counter invariant
//! (`active_instances == count of Active rows`) at every mutation point.
//! Callers serialize concurrent access (the API layer holds a write
//! lock for the duration of each call).
//!
//! ## Verification
//!
//! [`LicenseRegistry::verify`] is the public, unauthenticated path used
//! by remote deployments. It never returns an error: every failure mode
//! becomes a structured [`Verification`] with a machine-readable code.
//! When [`VerifyPolicy::auto_activate`] is set (the default), verifying
//! an unseen `instance_id` on a license with a free slot implicitly
//! activates that instance. The flag isolates this policy so it can be
//! toggled without touching the verification algorithm.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use mmkt_core::{LicenseId, ModuleId, UserId};

use crate::activation::{Activation, ActivationMetadata, ActivationStatus};
use crate::error::LicenseError;
use crate::key::LicenseKey;
use crate::license::{License, LicenseStatus, LicenseType, Subscription};

/// How many random keys to try before declaring the key space exhausted.
const MAX_KEY_ATTEMPTS: u32 = 32;

/// Instance cap used for free licenses (effectively unbounded).
const FREE_MAX_INSTANCES: u32 = 999;

// ─── Policy ──────────────────────────────────────────────────────────

/// Tunable verification behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyPolicy {
    /// Whether verification of an unseen instance consumes an activation
    /// slot. When disabled, activation must be an explicit call and
    /// verification of an unactivated instance is rejected.
    pub auto_activate: bool,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            auto_activate: true,
        }
    }
}

// ─── Verification result ─────────────────────────────────────────────

/// Why a verification was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum VerifyFailure {
    /// No license with this key.
    UnknownKey,
    /// The license exists but its status is not Active.
    Inactive {
        /// The actual status.
        status: LicenseStatus,
    },
    /// The license is past its expiry.
    Expired {
        /// When it expired.
        expired_at: DateTime<Utc>,
    },
    /// The presented domain is not on the allow-list.
    DomainNotAllowed {
        /// The rejected domain.
        domain: String,
    },
    /// All activation slots are taken.
    InstanceCapReached {
        /// The cap.
        max_instances: u32,
        /// Current slot usage.
        active_instances: u32,
    },
    /// The instance has no activation and auto-activation is disabled.
    NotActivated,
}

impl VerifyFailure {
    /// Machine-readable error code for the wire payload.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownKey => "invalid_license",
            Self::Inactive { .. } => "license_inactive",
            Self::Expired { .. } => "license_expired",
            Self::DomainNotAllowed { .. } => "domain_not_allowed",
            Self::InstanceCapReached { .. } => "max_instances_reached",
            Self::NotActivated => "not_activated",
        }
    }

    /// Human-readable message for the wire payload.
    pub fn message(&self) -> String {
        match self {
            Self::UnknownKey => "License key not found".to_string(),
            Self::Inactive { status } => format!("License is {status}"),
            Self::Expired { .. } => "License has expired".to_string(),
            Self::DomainNotAllowed { domain } => format!("Domain {domain} not allowed"),
            Self::InstanceCapReached { max_instances, .. } => {
                format!("Maximum {max_instances} instances allowed")
            }
            Self::NotActivated => "Instance is not activated for this license".to_string(),
        }
    }
}

/// Facts returned for a valid license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedLicense {
    /// The grant type.
    pub license_type: LicenseType,
    /// The licensed module.
    pub module: ModuleId,
    /// Expiry, if any.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether this is a trial grant.
    pub is_trial: bool,
    /// Trial end, for trials.
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// The instance that was verified.
    pub instance_id: String,
}

/// Outcome of a verification call. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    /// Whether the license is valid for this instance.
    pub valid: bool,
    /// License facts, when valid.
    pub license: Option<VerifiedLicense>,
    /// Rejection cause, when invalid.
    pub failure: Option<VerifyFailure>,
}

impl Verification {
    fn ok(license: VerifiedLicense) -> Self {
        Self {
            valid: true,
            license: Some(license),
            failure: None,
        }
    }

    fn rejected(failure: VerifyFailure) -> Self {
        Self {
            valid: false,
            license: None,
            failure: Some(failure),
        }
    }
}

// ─── Issue request ───────────────────────────────────────────────────

/// Parameters for issuing a license.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    /// The user receiving the grant.
    pub owner: UserId,
    /// The module being licensed.
    pub module: ModuleId,
    /// Grant type.
    pub license_type: LicenseType,
    /// Instance cap.
    pub max_instances: u32,
    /// Explicit expiry; for trials, defaults to the trial end.
    pub expires_at: Option<DateTime<Utc>>,
    /// Trial length in days; only meaningful for `LicenseType::Trial`.
    pub trial_days: Option<i64>,
    /// Domain allow-list; empty means unrestricted.
    pub allowed_domains: Vec<String>,
    /// Order reference for purchases.
    pub order_ref: Option<String>,
}

impl IssueRequest {
    /// A one-instance purchase request with no expiry.
    pub fn purchase(owner: UserId, module: ModuleId) -> Self {
        Self {
            owner,
            module,
            license_type: LicenseType::Purchase,
            max_instances: 1,
            expires_at: None,
            trial_days: None,
            allowed_domains: Vec::new(),
            order_ref: None,
        }
    }
}

/// License counts for one module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseStats {
    /// All licenses ever issued for the module.
    pub total: usize,
    /// Licenses currently in status Active.
    pub active: usize,
    /// Counts by grant type.
    pub by_type: HashMap<LicenseType, usize>,
}

/// How to extend a license.
#[derive(Debug, Clone, Copy)]
pub enum Extension {
    /// Push expiry forward by this many days (from current expiry, or
    /// from now if the license had none).
    Days(i64),
    /// Set an explicit new expiry.
    Until(DateTime<Utc>),
}

// ─── Registry ────────────────────────────────────────────────────────

/// The owning store for licenses and activations.
#[derive(Debug, Default)]
pub struct LicenseRegistry {
    licenses: HashMap<LicenseId, License>,
    key_index: HashMap<LicenseKey, LicenseId>,
    activations: HashMap<LicenseId, Vec<Activation>>,
    policy: VerifyPolicy,
}

impl LicenseRegistry {
    /// Create an empty registry with the default verification policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry with an explicit verification policy.
    pub fn with_policy(policy: VerifyPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// The active verification policy.
    pub fn policy(&self) -> VerifyPolicy {
        self.policy
    }

    // ── Issuance ─────────────────────────────────────────────────────

    /// Issue a new license.
    ///
    /// Enforces both uniqueness rules: one non-expired license per
    /// (owner, module, type), and trials once per (owner, module) ever.
    /// The generated key is collision-checked against the key index.
    pub fn issue(&mut self, req: IssueRequest, now: DateTime<Utc>) -> Result<License, LicenseError> {
        if req.license_type == LicenseType::Trial {
            let prior_trial = self
                .licenses
                .values()
                .any(|l| l.owner == req.owner && l.module == req.module && l.is_trial);
            if prior_trial {
                return Err(LicenseError::AlreadyLicensed {
                    owner: req.owner,
                    module: req.module,
                    reason: "trial already used".to_string(),
                });
            }
        }

        let duplicate = self.licenses.values().any(|l| {
            l.owner == req.owner
                && l.module == req.module
                && l.license_type == req.license_type
                && matches!(l.status, LicenseStatus::Active | LicenseStatus::Suspended)
        });
        if duplicate {
            return Err(LicenseError::AlreadyLicensed {
                owner: req.owner,
                module: req.module,
                reason: format!("non-expired {} license exists", req.license_type),
            });
        }

        let key = self.generate_unique_key()?;

        let is_trial = req.license_type == LicenseType::Trial;
        let trial_ends_at = match (is_trial, req.trial_days) {
            (true, Some(days)) => Some(now + Duration::days(days)),
            _ => None,
        };
        let expires_at = req.expires_at.or(trial_ends_at);

        let license = License {
            id: LicenseId::new(),
            key: key.clone(),
            owner: req.owner,
            module: req.module,
            license_type: req.license_type,
            status: LicenseStatus::Active,
            issued_at: now,
            activated_at: None,
            expires_at,
            cancelled_at: None,
            is_trial,
            trial_ends_at,
            converted_from_trial: false,
            max_instances: req.max_instances,
            active_instances: 0,
            last_verified_at: None,
            allowed_domains: req.allowed_domains,
            subscription: None,
            order_ref: req.order_ref,
            internal_notes: None,
        };

        tracing::info!(
            license = %license.id,
            owner = %license.owner,
            module = %license.module,
            license_type = %license.license_type,
            "license issued"
        );

        self.key_index.insert(key, license.id);
        self.activations.insert(license.id, Vec::new());
        let id = license.id;
        self.licenses.insert(id, license.clone());
        Ok(license)
    }

    /// Create a free license, or return the owner's existing active
    /// license for the module if one exists (idempotent).
    pub fn create_free(
        &mut self,
        owner: UserId,
        module: ModuleId,
        now: DateTime<Utc>,
    ) -> Result<License, LicenseError> {
        if let Some(existing) = self.get_for_owner_module(owner, module) {
            return Ok(existing.clone());
        }
        self.issue(
            IssueRequest {
                owner,
                module,
                license_type: LicenseType::Free,
                max_instances: FREE_MAX_INSTANCES,
                expires_at: None,
                trial_days: None,
                allowed_domains: Vec::new(),
                order_ref: None,
            },
            now,
        )
    }

    /// Create a trial license. One trial per (owner, module), ever.
    pub fn create_trial(
        &mut self,
        owner: UserId,
        module: ModuleId,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<License, LicenseError> {
        self.issue(
            IssueRequest {
                owner,
                module,
                license_type: LicenseType::Trial,
                max_instances: 1,
                expires_at: None,
                trial_days: Some(days),
                allowed_domains: Vec::new(),
                order_ref: None,
            },
            now,
        )
    }

    fn generate_unique_key(&self) -> Result<LicenseKey, LicenseError> {
        for _ in 0..MAX_KEY_ATTEMPTS {
            let key = LicenseKey::generate();
            if !self.key_index.contains_key(&key) {
                return Ok(key);
            }
        }
        Err(LicenseError::KeyCollision {
            attempts: MAX_KEY_ATTEMPTS,
        })
    }

    // ── Read accessors ───────────────────────────────────────────────

    /// Get a license by id.
    pub fn get(&self, id: LicenseId) -> Option<&License> {
        self.licenses.get(&id)
    }

    /// Get a license by key.
    pub fn get_by_key(&self, key: &LicenseKey) -> Option<&License> {
        self.key_index.get(key).and_then(|id| self.licenses.get(id))
    }

    /// The owner's Active license for a module, if any.
    pub fn get_for_owner_module(&self, owner: UserId, module: ModuleId) -> Option<&License> {
        self.licenses.values().find(|l| {
            l.owner == owner && l.module == module && l.status == LicenseStatus::Active
        })
    }

    /// All licenses for an owner, newest first, optionally filtered by
    /// status.
    pub fn licenses_for_owner(
        &self,
        owner: UserId,
        status: Option<LicenseStatus>,
    ) -> Vec<&License> {
        let mut out: Vec<&License> = self
            .licenses
            .values()
            .filter(|l| l.owner == owner && status.map_or(true, |s| l.status == s))
            .collect();
        out.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        out
    }

    /// Activation rows for a license (active and released).
    pub fn activations(&self, license: LicenseId) -> &[Activation] {
        self.activations
            .get(&license)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// License counts for a module.
    pub fn stats(&self, module: ModuleId) -> LicenseStats {
        let mut stats = LicenseStats::default();
        for l in self.licenses.values().filter(|l| l.module == module) {
            stats.total += 1;
            if l.status == LicenseStatus::Active {
                stats.active += 1;
            }
            *stats.by_type.entry(l.license_type).or_insert(0) += 1;
        }
        stats
    }

    /// Active licenses expiring within `days` of `now` (but not yet
    /// expired). Read-only; feeds notification collaborators.
    pub fn expiring_within(&self, days: i64, now: DateTime<Utc>) -> Vec<&License> {
        let threshold = now + Duration::days(days);
        self.licenses
            .values()
            .filter(|l| {
                l.status == LicenseStatus::Active
                    && l.expires_at
                        .map(|e| e > now && e <= threshold)
                        .unwrap_or(false)
            })
            .collect()
    }

    // ── Verification ─────────────────────────────────────────────────

    /// Verify a license key for one instance. Never errors.
    ///
    /// On success, updates `check_count`/`last_check` on the activation
    /// row and `last_verified_at` on the license. With
    /// `policy.auto_activate`, an unseen instance on a license with a
    /// free slot is activated as part of verification.
    pub fn verify(
        &mut self,
        key: &LicenseKey,
        instance_id: &str,
        domain: Option<&str>,
        now: DateTime<Utc>,
    ) -> Verification {
        let Some(&license_id) = self.key_index.get(key) else {
            return Verification::rejected(VerifyFailure::UnknownKey);
        };
        let license = &self.licenses[&license_id];

        if license.status != LicenseStatus::Active {
            return Verification::rejected(VerifyFailure::Inactive {
                status: license.status,
            });
        }
        if let Some(expires_at) = license.expires_at {
            if now > expires_at {
                return Verification::rejected(VerifyFailure::Expired {
                    expired_at: expires_at,
                });
            }
        }
        if !license.domain_allowed(domain) {
            return Verification::rejected(VerifyFailure::DomainNotAllowed {
                domain: domain.unwrap_or_default().to_string(),
            });
        }

        let has_active_row = self
            .activations(license_id)
            .iter()
            .any(|a| a.instance_id == instance_id && a.status == ActivationStatus::Active);

        if !has_active_row {
            if !self.policy.auto_activate {
                return Verification::rejected(VerifyFailure::NotActivated);
            }
            let license = &self.licenses[&license_id];
            if license.active_instances >= license.max_instances {
                return Verification::rejected(VerifyFailure::InstanceCapReached {
                    max_instances: license.max_instances,
                    active_instances: license.active_instances,
                });
            }
            // The slot check above makes this infallible.
            let metadata = ActivationMetadata {
                domain: domain.map(str::to_string),
                ..ActivationMetadata::default()
            };
            self.take_slot(license_id, instance_id, metadata, now);
        }

        if let Some(row) = self
            .activations
            .entry(license_id)
            .or_default()
            .iter_mut()
            .find(|a| a.instance_id == instance_id && a.status == ActivationStatus::Active)
        {
            row.record_check(now);
        }

        let Some(license) = self.licenses.get_mut(&license_id) else {
            // Unreachable: the id came from the key index.
            return Verification::rejected(VerifyFailure::UnknownKey);
        };
        license.last_verified_at = Some(now);

        Verification::ok(VerifiedLicense {
            license_type: license.license_type,
            module: license.module,
            expires_at: license.expires_at,
            is_trial: license.is_trial,
            trial_ends_at: license.trial_ends_at,
            instance_id: instance_id.to_string(),
        })
    }

    // ── Activation ───────────────────────────────────────────────────

    /// Explicitly activate an instance on a license.
    ///
    /// Activating an already-active instance is a no-op returning the
    /// existing row. Reactivating a released instance reuses its row.
    /// Fails if the license is not valid or the cap is reached.
    pub fn activate(
        &mut self,
        key: &LicenseKey,
        instance_id: &str,
        metadata: ActivationMetadata,
        now: DateTime<Utc>,
    ) -> Result<Activation, LicenseError> {
        let license_id = *self
            .key_index
            .get(key)
            .ok_or_else(|| LicenseError::NotFound(key.to_string()))?;

        // Idempotent path: the instance already holds a slot.
        if let Some(existing) = self
            .activations(license_id)
            .iter()
            .find(|a| a.instance_id == instance_id && a.status == ActivationStatus::Active)
        {
            return Ok(existing.clone());
        }

        let license = &self.licenses[&license_id];
        if !license.is_valid(now) {
            return Err(LicenseError::CannotActivate {
                license: license_id,
                reason: format!("license is not valid (status {})", license.status),
            });
        }
        if license.active_instances >= license.max_instances {
            return Err(LicenseError::CannotActivate {
                license: license_id,
                reason: format!("maximum {} instances reached", license.max_instances),
            });
        }

        Ok(self.take_slot(license_id, instance_id, metadata, now))
    }

    /// Take a slot for `instance_id`: reuse its released row or create a
    /// fresh one, then re-establish the counter invariant.
    ///
    /// Callers must have checked validity and the cap.
    fn take_slot(
        &mut self,
        license_id: LicenseId,
        instance_id: &str,
        metadata: ActivationMetadata,
        now: DateTime<Utc>,
    ) -> Activation {
        let rows = self.activations.entry(license_id).or_default();
        let activation = if let Some(row) = rows
            .iter_mut()
            .find(|a| a.instance_id == instance_id && a.status == ActivationStatus::Deactivated)
        {
            row.status = ActivationStatus::Active;
            row.activated_at = now;
            row.deactivated_at = None;
            row.metadata = metadata;
            row.clone()
        } else {
            let row = Activation::new(license_id, instance_id.to_string(), metadata, now);
            rows.push(row.clone());
            row
        };

        let active_rows = rows
            .iter()
            .filter(|a| a.status == ActivationStatus::Active)
            .count() as u32;
        if let Some(license) = self.licenses.get_mut(&license_id) {
            license.active_instances = active_rows;
            if license.activated_at.is_none() {
                license.activated_at = Some(now);
            }
            debug_assert!(license.active_instances <= license.max_instances);
        }

        tracing::info!(
            license = %license_id,
            instance_id,
            active_instances = active_rows,
            "instance activated"
        );
        activation
    }

    /// Release an instance's slot. Returns `false` if no matching active
    /// row exists.
    pub fn deactivate(&mut self, key: &LicenseKey, instance_id: &str, now: DateTime<Utc>) -> bool {
        let Some(&license_id) = self.key_index.get(key) else {
            return false;
        };
        let Some(rows) = self.activations.get_mut(&license_id) else {
            return false;
        };
        let Some(row) = rows
            .iter_mut()
            .find(|a| a.instance_id == instance_id && a.status == ActivationStatus::Active)
        else {
            return false;
        };

        row.status = ActivationStatus::Deactivated;
        row.deactivated_at = Some(now);

        let active_rows = rows
            .iter()
            .filter(|a| a.status == ActivationStatus::Active)
            .count() as u32;
        if let Some(license) = self.licenses.get_mut(&license_id) {
            license.active_instances = active_rows;
        }

        tracing::info!(
            license = %license_id,
            instance_id,
            active_instances = active_rows,
            "instance deactivated"
        );
        true
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Cancel a license: status to Cancelled, all active rows released,
    /// counter reset — one atomic step.
    pub fn cancel(
        &mut self,
        id: LicenseId,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<License, LicenseError> {
        let license = self
            .licenses
            .get_mut(&id)
            .ok_or_else(|| LicenseError::NotFound(id.to_string()))?;
        license.transition(LicenseStatus::Cancelled)?;
        license.cancelled_at = Some(now);
        if let Some(reason) = reason {
            license.internal_notes = Some(reason.to_string());
        }
        license.active_instances = 0;
        let cancelled = license.clone();

        if let Some(rows) = self.activations.get_mut(&id) {
            for row in rows
                .iter_mut()
                .filter(|a| a.status == ActivationStatus::Active)
            {
                row.status = ActivationStatus::Deactivated;
                row.deactivated_at = Some(now);
            }
        }

        tracing::info!(license = %id, reason = reason.unwrap_or(""), "license cancelled");
        Ok(cancelled)
    }

    /// Push expiry forward. Reactivates a license that had lapsed to
    /// Expired.
    pub fn extend(
        &mut self,
        id: LicenseId,
        extension: Extension,
        now: DateTime<Utc>,
    ) -> Result<License, LicenseError> {
        let license = self
            .licenses
            .get_mut(&id)
            .ok_or_else(|| LicenseError::NotFound(id.to_string()))?;

        license.expires_at = Some(match extension {
            Extension::Until(date) => date,
            Extension::Days(days) => license.expires_at.unwrap_or(now) + Duration::days(days),
        });

        if license.status == LicenseStatus::Expired {
            license.transition(LicenseStatus::Active)?;
        }
        Ok(license.clone())
    }

    /// Convert a trial into a perpetual purchase.
    pub fn convert_trial(&mut self, id: LicenseId, order_ref: &str) -> Result<License, LicenseError> {
        let license = self
            .licenses
            .get_mut(&id)
            .ok_or_else(|| LicenseError::NotFound(id.to_string()))?;
        if !license.is_trial {
            return Err(LicenseError::NotATrial(id));
        }

        license.license_type = LicenseType::Purchase;
        license.is_trial = false;
        license.trial_ends_at = None;
        license.converted_from_trial = true;
        license.expires_at = None;
        license.order_ref = Some(order_ref.to_string());
        if license.status == LicenseStatus::Expired {
            license.transition(LicenseStatus::Active)?;
        }

        tracing::info!(license = %id, order_ref, "trial converted to purchase");
        Ok(license.clone())
    }

    /// Sync subscription state reported by the billing collaborator.
    /// Expiry tracks the period end; external `active` revives an
    /// Expired license, external `cancelled`/`unpaid` expires it.
    pub fn update_subscription(
        &mut self,
        id: LicenseId,
        external_id: &str,
        external_status: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<License, LicenseError> {
        let license = self
            .licenses
            .get_mut(&id)
            .ok_or_else(|| LicenseError::NotFound(id.to_string()))?;

        let prior = license.subscription.take();
        license.subscription = Some(Subscription {
            external_id: external_id.to_string(),
            external_status: external_status.to_string(),
            period_start,
            period_end,
            cancelled_at: prior.as_ref().and_then(|s| s.cancelled_at),
            cancel_at_period_end: prior.map(|s| s.cancel_at_period_end).unwrap_or(false),
        });
        license.expires_at = Some(period_end);

        match external_status {
            "active" if license.status == LicenseStatus::Expired => {
                license.transition(LicenseStatus::Active)?;
            }
            "cancelled" | "unpaid" if license.status == LicenseStatus::Active => {
                license.transition(LicenseStatus::Expired)?;
            }
            _ => {}
        }
        Ok(license.clone())
    }

    /// Record a subscription cancellation. Immediate cancellation also
    /// cancels the license (releasing all slots).
    pub fn cancel_subscription(
        &mut self,
        id: LicenseId,
        at_period_end: bool,
        now: DateTime<Utc>,
    ) -> Result<License, LicenseError> {
        let license = self
            .licenses
            .get_mut(&id)
            .ok_or_else(|| LicenseError::NotFound(id.to_string()))?;
        if let Some(sub) = license.subscription.as_mut() {
            sub.cancelled_at = Some(now);
            sub.cancel_at_period_end = at_period_end;
        }
        if at_period_end {
            Ok(license.clone())
        } else {
            self.cancel(id, Some("subscription cancelled"), now)
        }
    }

    /// Flip every Active license past its expiry to Expired. Idempotent;
    /// returns the number of licenses flipped this run.
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> usize {
        let due: Vec<LicenseId> = self
            .licenses
            .values()
            .filter(|l| {
                l.status == LicenseStatus::Active
                    && l.expires_at.map(|e| e < now).unwrap_or(false)
            })
            .map(|l| l.id)
            .collect();

        for id in &due {
            if let Some(license) = self.licenses.get_mut(id) {
                // Active -> Expired is always in the table.
                let _ = license.transition(LicenseStatus::Expired);
            }
        }
        if !due.is_empty() {
            tracing::info!(count = due.len(), "expired due licenses");
        }
        due.len()
    }

    /// All licenses, for persistence mirroring.
    pub fn iter(&self) -> impl Iterator<Item = &License> {
        self.licenses.values()
    }

    /// Restore a license (and its rows) from the persistence mirror.
    /// Used only during startup hydration.
    pub fn restore(&mut self, license: License, rows: Vec<Activation>) {
        self.key_index.insert(license.key.clone(), license.id);
        self.activations.insert(license.id, rows);
        self.licenses.insert(license.id, license);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn issue_purchase(reg: &mut LicenseRegistry, max_instances: u32) -> License {
        reg.issue(
            IssueRequest {
                max_instances,
                ..IssueRequest::purchase(UserId::new(), ModuleId::new())
            },
            now(),
        )
        .unwrap()
    }

    // ── Issuance ─────────────────────────────────────────────────────

    #[test]
    fn issue_creates_active_license_with_unique_key() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        assert_eq!(lic.status, LicenseStatus::Active);
        assert_eq!(reg.get_by_key(&lic.key).unwrap().id, lic.id);
        assert_eq!(reg.get(lic.id).unwrap().active_instances, 0);
    }

    #[test]
    fn duplicate_active_license_rejected() {
        let mut reg = LicenseRegistry::new();
        let owner = UserId::new();
        let module = ModuleId::new();
        reg.issue(IssueRequest::purchase(owner, module), now()).unwrap();
        let err = reg
            .issue(IssueRequest::purchase(owner, module), now())
            .unwrap_err();
        assert!(matches!(err, LicenseError::AlreadyLicensed { .. }));
    }

    #[test]
    fn cancelled_license_can_be_reissued() {
        let mut reg = LicenseRegistry::new();
        let owner = UserId::new();
        let module = ModuleId::new();
        let lic = reg.issue(IssueRequest::purchase(owner, module), now()).unwrap();
        reg.cancel(lic.id, Some("refunded"), now()).unwrap();
        assert!(reg.issue(IssueRequest::purchase(owner, module), now()).is_ok());
    }

    #[test]
    fn trial_sets_trial_end_and_expiry() {
        let mut reg = LicenseRegistry::new();
        let lic = reg
            .create_trial(UserId::new(), ModuleId::new(), 14, now())
            .unwrap();
        let expected_end = now() + Duration::days(14);
        assert!(lic.is_trial);
        assert_eq!(lic.trial_ends_at, Some(expected_end));
        assert_eq!(lic.expires_at, Some(expected_end));
        assert_eq!(lic.max_instances, 1);
    }

    #[test]
    fn second_trial_for_same_owner_module_rejected() {
        let mut reg = LicenseRegistry::new();
        let owner = UserId::new();
        let module = ModuleId::new();
        reg.create_trial(owner, module, 14, now()).unwrap();
        let err = reg.create_trial(owner, module, 14, now()).unwrap_err();
        match err {
            LicenseError::AlreadyLicensed { reason, .. } => {
                assert!(reason.contains("trial already used"));
            }
            other => panic!("expected AlreadyLicensed, got {other:?}"),
        }
    }

    #[test]
    fn trial_block_survives_cancellation() {
        let mut reg = LicenseRegistry::new();
        let owner = UserId::new();
        let module = ModuleId::new();
        let lic = reg.create_trial(owner, module, 14, now()).unwrap();
        reg.cancel(lic.id, None, now()).unwrap();
        assert!(reg.create_trial(owner, module, 14, now()).is_err());
    }

    #[test]
    fn create_free_is_idempotent() {
        let mut reg = LicenseRegistry::new();
        let owner = UserId::new();
        let module = ModuleId::new();
        let first = reg.create_free(owner, module, now()).unwrap();
        let second = reg.create_free(owner, module, now()).unwrap();
        assert_eq!(first.id, second.id);
    }

    // ── Verification ─────────────────────────────────────────────────

    #[test]
    fn verify_unknown_key_is_invalid_not_error() {
        let mut reg = LicenseRegistry::new();
        let v = reg.verify(&LicenseKey::generate(), "instance-001", None, now());
        assert!(!v.valid);
        assert_eq!(v.failure.unwrap().code(), "invalid_license");
    }

    #[test]
    fn verify_auto_activates_unseen_instance() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        let v = reg.verify(&lic.key, "instance-001", None, now());
        assert!(v.valid);
        assert_eq!(reg.get(lic.id).unwrap().active_instances, 1);
        assert_eq!(reg.activations(lic.id).len(), 1);
        assert_eq!(reg.activations(lic.id)[0].check_count, 1);
        assert_eq!(reg.get(lic.id).unwrap().last_verified_at, Some(now()));
    }

    #[test]
    fn verify_trial_reports_trial_facts() {
        let mut reg = LicenseRegistry::new();
        let lic = reg
            .create_trial(UserId::new(), ModuleId::new(), 14, now())
            .unwrap();
        let v = reg.verify(&lic.key, "instance-001", None, now());
        assert!(v.valid);
        let facts = v.license.unwrap();
        assert!(facts.is_trial);
        assert_eq!(facts.trial_ends_at, Some(now() + Duration::days(14)));
        assert_eq!(reg.activations(lic.id).len(), 1);
    }

    #[test]
    fn verify_rejects_over_cap_without_activating() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        assert!(reg.verify(&lic.key, "instance-001", None, now()).valid);
        let v = reg.verify(&lic.key, "instance-002", None, now());
        assert!(!v.valid);
        assert_eq!(v.failure.unwrap().code(), "max_instances_reached");
        assert_eq!(reg.get(lic.id).unwrap().active_instances, 1);
        assert_eq!(reg.activations(lic.id).len(), 1);
    }

    #[test]
    fn verify_known_instance_does_not_consume_slot() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        reg.verify(&lic.key, "instance-001", None, now());
        reg.verify(&lic.key, "instance-001", None, now());
        assert_eq!(reg.get(lic.id).unwrap().active_instances, 1);
        assert_eq!(reg.activations(lic.id)[0].check_count, 2);
    }

    #[test]
    fn verify_expired_by_clock() {
        let mut reg = LicenseRegistry::new();
        let lic = reg
            .issue(
                IssueRequest {
                    expires_at: Some(now() - Duration::days(1)),
                    ..IssueRequest::purchase(UserId::new(), ModuleId::new())
                },
                now() - Duration::days(30),
            )
            .unwrap();
        let v = reg.verify(&lic.key, "instance-001", None, now());
        assert!(!v.valid);
        assert_eq!(v.failure.unwrap().code(), "license_expired");
    }

    #[test]
    fn verify_cancelled_license_reports_status() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        reg.cancel(lic.id, None, now()).unwrap();
        let v = reg.verify(&lic.key, "instance-001", None, now());
        assert!(!v.valid);
        match v.failure.unwrap() {
            VerifyFailure::Inactive { status } => assert_eq!(status, LicenseStatus::Cancelled),
            other => panic!("expected Inactive, got {other:?}"),
        }
    }

    #[test]
    fn verify_domain_allowlist() {
        let mut reg = LicenseRegistry::new();
        let lic = reg
            .issue(
                IssueRequest {
                    allowed_domains: vec!["shop.example.com".to_string()],
                    ..IssueRequest::purchase(UserId::new(), ModuleId::new())
                },
                now(),
            )
            .unwrap();
        let bad = reg.verify(&lic.key, "instance-001", Some("evil.example.com"), now());
        assert_eq!(bad.failure.unwrap().code(), "domain_not_allowed");
        let good = reg.verify(&lic.key, "instance-001", Some("shop.example.com"), now());
        assert!(good.valid);
    }

    #[test]
    fn verify_without_auto_activate_requires_explicit_activation() {
        let mut reg = LicenseRegistry::with_policy(VerifyPolicy {
            auto_activate: false,
        });
        let lic = issue_purchase(&mut reg, 1);

        let v = reg.verify(&lic.key, "instance-001", None, now());
        assert!(!v.valid);
        assert_eq!(v.failure.unwrap().code(), "not_activated");
        assert_eq!(reg.get(lic.id).unwrap().active_instances, 0);

        reg.activate(&lic.key, "instance-001", ActivationMetadata::default(), now())
            .unwrap();
        assert!(reg.verify(&lic.key, "instance-001", None, now()).valid);
    }

    // ── Activation ───────────────────────────────────────────────────

    #[test]
    fn activate_increments_counter_and_sets_activated_at_once() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 2);
        reg.activate(&lic.key, "a", ActivationMetadata::default(), now())
            .unwrap();
        let later = now() + Duration::hours(1);
        reg.activate(&lic.key, "b", ActivationMetadata::default(), later)
            .unwrap();

        let lic = reg.get(lic.id).unwrap();
        assert_eq!(lic.active_instances, 2);
        assert_eq!(lic.activated_at, Some(now()));
    }

    #[test]
    fn activate_already_active_instance_is_noop() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        let first = reg
            .activate(&lic.key, "a", ActivationMetadata::default(), now())
            .unwrap();
        let second = reg
            .activate(&lic.key, "a", ActivationMetadata::default(), now())
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(reg.get(lic.id).unwrap().active_instances, 1);
    }

    #[test]
    fn activate_over_cap_fails() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        reg.activate(&lic.key, "a", ActivationMetadata::default(), now())
            .unwrap();
        let err = reg
            .activate(&lic.key, "b", ActivationMetadata::default(), now())
            .unwrap_err();
        assert!(matches!(err, LicenseError::CannotActivate { .. }));
        assert_eq!(reg.get(lic.id).unwrap().active_instances, 1);
    }

    #[test]
    fn reactivation_reuses_row() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        let first = reg
            .activate(&lic.key, "a", ActivationMetadata::default(), now())
            .unwrap();
        assert!(reg.deactivate(&lic.key, "a", now()));
        let again = reg
            .activate(&lic.key, "a", ActivationMetadata::default(), now())
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(reg.activations(lic.id).len(), 1);
        assert_eq!(reg.get(lic.id).unwrap().active_instances, 1);
    }

    #[test]
    fn deactivate_unknown_instance_returns_false() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        assert!(!reg.deactivate(&lic.key, "never-activated", now()));
        assert!(!reg.deactivate(&LicenseKey::generate(), "a", now()));
    }

    #[test]
    fn counter_always_matches_active_rows() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 3);
        for instance in ["a", "b", "c"] {
            reg.activate(&lic.key, instance, ActivationMetadata::default(), now())
                .unwrap();
        }
        reg.deactivate(&lic.key, "b", now());
        reg.activate(&lic.key, "b", ActivationMetadata::default(), now())
            .unwrap();
        reg.deactivate(&lic.key, "a", now());

        let active_rows = reg
            .activations(lic.id)
            .iter()
            .filter(|a| a.status == ActivationStatus::Active)
            .count() as u32;
        assert_eq!(reg.get(lic.id).unwrap().active_instances, active_rows);
        assert_eq!(active_rows, 2);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    #[test]
    fn cancel_releases_all_slots_atomically() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 3);
        reg.activate(&lic.key, "a", ActivationMetadata::default(), now())
            .unwrap();
        reg.activate(&lic.key, "b", ActivationMetadata::default(), now())
            .unwrap();

        let cancelled = reg.cancel(lic.id, Some("chargeback"), now()).unwrap();
        assert_eq!(cancelled.status, LicenseStatus::Cancelled);
        assert_eq!(cancelled.active_instances, 0);
        assert_eq!(cancelled.internal_notes.as_deref(), Some("chargeback"));
        assert!(reg
            .activations(lic.id)
            .iter()
            .all(|a| a.status == ActivationStatus::Deactivated));
    }

    #[test]
    fn cancel_twice_fails() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        reg.cancel(lic.id, None, now()).unwrap();
        assert!(reg.cancel(lic.id, None, now()).is_err());
    }

    #[test]
    fn extend_pushes_expiry_and_revives_expired() {
        let mut reg = LicenseRegistry::new();
        let lic = reg
            .issue(
                IssueRequest {
                    expires_at: Some(now() - Duration::days(1)),
                    ..IssueRequest::purchase(UserId::new(), ModuleId::new())
                },
                now() - Duration::days(30),
            )
            .unwrap();
        assert_eq!(reg.expire_due(now()), 1);
        assert_eq!(reg.get(lic.id).unwrap().status, LicenseStatus::Expired);

        let extended = reg.extend(lic.id, Extension::Days(30), now()).unwrap();
        assert_eq!(extended.status, LicenseStatus::Active);
        assert_eq!(
            extended.expires_at,
            Some(now() - Duration::days(1) + Duration::days(30))
        );
    }

    #[test]
    fn extend_license_without_expiry_starts_from_now() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        let extended = reg.extend(lic.id, Extension::Days(7), now()).unwrap();
        assert_eq!(extended.expires_at, Some(now() + Duration::days(7)));
    }

    #[test]
    fn convert_trial_clears_trial_state() {
        let mut reg = LicenseRegistry::new();
        let lic = reg
            .create_trial(UserId::new(), ModuleId::new(), 14, now())
            .unwrap();
        let converted = reg.convert_trial(lic.id, "order-1829").unwrap();
        assert_eq!(converted.license_type, LicenseType::Purchase);
        assert!(!converted.is_trial);
        assert!(converted.converted_from_trial);
        assert_eq!(converted.expires_at, None);
        assert_eq!(converted.trial_ends_at, None);
        assert_eq!(converted.order_ref.as_deref(), Some("order-1829"));
    }

    #[test]
    fn convert_non_trial_fails() {
        let mut reg = LicenseRegistry::new();
        let lic = issue_purchase(&mut reg, 1);
        assert!(matches!(
            reg.convert_trial(lic.id, "order-1"),
            Err(LicenseError::NotATrial(_))
        ));
    }

    #[test]
    fn expire_due_is_idempotent() {
        let mut reg = LicenseRegistry::new();
        for _ in 0..3 {
            reg.issue(
                IssueRequest {
                    expires_at: Some(now() - Duration::days(1)),
                    ..IssueRequest::purchase(UserId::new(), ModuleId::new())
                },
                now() - Duration::days(30),
            )
            .unwrap();
        }
        issue_purchase(&mut reg, 1); // perpetual, untouched

        assert_eq!(reg.expire_due(now()), 3);
        assert_eq!(reg.expire_due(now()), 0);
    }

    #[test]
    fn subscription_sync_drives_expiry_and_status() {
        let mut reg = LicenseRegistry::new();
        let lic = reg
            .issue(
                IssueRequest {
                    license_type: LicenseType::Subscription,
                    ..IssueRequest::purchase(UserId::new(), ModuleId::new())
                },
                now(),
            )
            .unwrap();

        let period_end = now() + Duration::days(30);
        let updated = reg
            .update_subscription(lic.id, "sub_123", "active", now(), period_end)
            .unwrap();
        assert_eq!(updated.expires_at, Some(period_end));

        let lapsed = reg
            .update_subscription(lic.id, "sub_123", "unpaid", now(), period_end)
            .unwrap();
        assert_eq!(lapsed.status, LicenseStatus::Expired);

        let revived = reg
            .update_subscription(lic.id, "sub_123", "active", now(), period_end)
            .unwrap();
        assert_eq!(revived.status, LicenseStatus::Active);
    }

    #[test]
    fn cancel_subscription_at_period_end_keeps_license_active() {
        let mut reg = LicenseRegistry::new();
        let lic = reg
            .issue(
                IssueRequest {
                    license_type: LicenseType::Subscription,
                    ..IssueRequest::purchase(UserId::new(), ModuleId::new())
                },
                now(),
            )
            .unwrap();
        reg.update_subscription(lic.id, "sub_1", "active", now(), now() + Duration::days(30))
            .unwrap();

        let updated = reg.cancel_subscription(lic.id, true, now()).unwrap();
        assert_eq!(updated.status, LicenseStatus::Active);
        assert!(updated.subscription.unwrap().cancel_at_period_end);

        let cancelled = reg.cancel_subscription(lic.id, false, now()).unwrap();
        assert_eq!(cancelled.status, LicenseStatus::Cancelled);
    }

    // ── Queries ──────────────────────────────────────────────────────

    #[test]
    fn licenses_for_owner_filters_by_status() {
        let mut reg = LicenseRegistry::new();
        let owner = UserId::new();
        let a = reg
            .issue(IssueRequest::purchase(owner, ModuleId::new()), now())
            .unwrap();
        let b = reg
            .issue(IssueRequest::purchase(owner, ModuleId::new()), now())
            .unwrap();
        reg.cancel(b.id, None, now()).unwrap();

        assert_eq!(reg.licenses_for_owner(owner, None).len(), 2);
        let active = reg.licenses_for_owner(owner, Some(LicenseStatus::Active));
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
    }

    #[test]
    fn expiring_within_excludes_already_expired() {
        let mut reg = LicenseRegistry::new();
        reg.issue(
            IssueRequest {
                expires_at: Some(now() + Duration::days(3)),
                ..IssueRequest::purchase(UserId::new(), ModuleId::new())
            },
            now(),
        )
        .unwrap();
        reg.issue(
            IssueRequest {
                expires_at: Some(now() - Duration::days(1)),
                ..IssueRequest::purchase(UserId::new(), ModuleId::new())
            },
            now() - Duration::days(30),
        )
        .unwrap();

        assert_eq!(reg.expiring_within(7, now()).len(), 1);
    }

    #[test]
    fn stats_count_by_type() {
        let mut reg = LicenseRegistry::new();
        let module = ModuleId::new();
        reg.issue(IssueRequest::purchase(UserId::new(), module), now())
            .unwrap();
        reg.create_trial(UserId::new(), module, 14, now()).unwrap();
        let cancelled = reg
            .issue(IssueRequest::purchase(UserId::new(), module), now())
            .unwrap();
        reg.cancel(cancelled.id, None, now()).unwrap();

        let stats = reg.stats(module);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.by_type[&LicenseType::Purchase], 2);
        assert_eq!(stats.by_type[&LicenseType::Trial], 1);
    }
}
