//! # Manual Adjustments
//!
//! Audited corrections to publisher balances: refunds, chargebacks,
//! bonuses, corrections, fees. An adjustment is created pending and
//! touches no balance; approving it applies the signed amount to
//! available through the ledger in the same call as the status flip.
//! Cancelling is only legal while pending and never touches the ledger.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mmkt_core::{AdjustmentId, Amount, PublisherId, UserId};

use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::transaction::Reference;

/// What kind of correction an adjustment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    /// Money returned to a buyer, debited from the publisher.
    Refund,
    /// A disputed charge reversed by the settlement rail.
    Chargeback,
    /// Discretionary credit to the publisher.
    Bonus,
    /// Correction of an earlier bookkeeping mistake.
    Correction,
    /// A fee charged to the publisher.
    Fee,
}

impl std::fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Refund => "refund",
            Self::Chargeback => "chargeback",
            Self::Bonus => "bonus",
            Self::Correction => "correction",
            Self::Fee => "fee",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of an adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    /// Created, awaiting approval; no ledger effect yet.
    Pending,
    /// Approved and applied to the ledger (terminal).
    Applied,
    /// Withdrawn before approval (terminal).
    Cancelled,
}

impl std::fmt::Display for AdjustmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Applied => f.write_str("applied"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A manually authorized balance correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjustment {
    /// Unique identifier.
    pub id: AdjustmentId,
    /// The publisher whose balance this corrects.
    pub publisher: PublisherId,
    /// What kind of correction.
    pub adjustment_type: AdjustmentType,
    /// Signed amount: positive credits, negative debits.
    pub amount: Amount,
    /// Public description, shown to the publisher.
    pub description: String,
    /// Internal notes; never shown to the publisher.
    pub internal_notes: Option<String>,
    /// What caused the correction, if attributable.
    pub reference: Option<Reference>,
    /// Lifecycle status.
    pub status: AdjustmentStatus,
    /// Who created the adjustment.
    pub created_by: UserId,
    /// When it was created.
    pub created_at: DateTime<Utc>,
    /// Who approved it.
    pub approved_by: Option<UserId>,
    /// When it was approved.
    pub approved_at: Option<DateTime<Utc>>,
    /// When it hit the ledger.
    pub applied_at: Option<DateTime<Utc>>,
}

/// Filters for adjustment listings.
#[derive(Debug, Clone, Default)]
pub struct AdjustmentFilter {
    /// Only this publisher's adjustments.
    pub publisher: Option<PublisherId>,
    /// Only this status.
    pub status: Option<AdjustmentStatus>,
    /// Only this type.
    pub adjustment_type: Option<AdjustmentType>,
}

// ─── Manager ─────────────────────────────────────────────────────────

/// The owning store for adjustments.
#[derive(Debug, Default)]
pub struct AdjustmentManager {
    adjustments: HashMap<AdjustmentId, Adjustment>,
}

impl AdjustmentManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending adjustment. Never touches the ledger.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        publisher: PublisherId,
        adjustment_type: AdjustmentType,
        amount: Amount,
        description: String,
        created_by: UserId,
        reference: Option<Reference>,
        internal_notes: Option<String>,
        now: DateTime<Utc>,
    ) -> &Adjustment {
        let adjustment = Adjustment {
            id: AdjustmentId::new(),
            publisher,
            adjustment_type,
            amount,
            description,
            internal_notes,
            reference,
            status: AdjustmentStatus::Pending,
            created_by,
            created_at: now,
            approved_by: None,
            approved_at: None,
            applied_at: None,
        };
        tracing::info!(
            adjustment = %adjustment.id,
            publisher = %publisher,
            %amount,
            kind = %adjustment_type,
            "adjustment created"
        );
        let id = adjustment.id;
        self.adjustments.entry(id).or_insert(adjustment)
    }

    /// Get an adjustment by id.
    pub fn get(&self, id: AdjustmentId) -> Option<&Adjustment> {
        self.adjustments.get(&id)
    }

    /// List adjustments, newest first.
    pub fn list(&self, filter: &AdjustmentFilter) -> Vec<&Adjustment> {
        let mut out: Vec<&Adjustment> = self
            .adjustments
            .values()
            .filter(|a| filter.publisher.map_or(true, |p| a.publisher == p))
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .filter(|a| {
                filter
                    .adjustment_type
                    .map_or(true, |t| a.adjustment_type == t)
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Sum of a publisher's pending adjustments (for payout previews).
    pub fn pending_total(&self, publisher: PublisherId) -> Amount {
        let cents = self
            .adjustments
            .values()
            .filter(|a| a.publisher == publisher && a.status == AdjustmentStatus::Pending)
            .map(|a| a.amount.cents())
            .sum();
        Amount::from_cents(cents)
    }

    /// Approve a pending adjustment and apply it to the ledger.
    ///
    /// The ledger application and the status flip happen in the same
    /// call: if the ledger declines (a debit that would push available
    /// negative), the adjustment stays pending and the error propagates.
    pub fn approve(
        &mut self,
        id: AdjustmentId,
        approved_by: UserId,
        ledger: &mut Ledger,
        now: DateTime<Utc>,
    ) -> Result<Adjustment, LedgerError> {
        let adjustment = self
            .adjustments
            .get_mut(&id)
            .ok_or(LedgerError::AdjustmentNotFound(id))?;
        if adjustment.status != AdjustmentStatus::Pending {
            return Err(LedgerError::AdjustmentNotPending {
                id,
                status: adjustment.status,
            });
        }

        ledger.apply_adjustment(
            adjustment.publisher,
            adjustment.amount,
            Reference::new("adjustment", id),
            format!("{}: {}", adjustment.adjustment_type, adjustment.description),
            now,
        )?;

        adjustment.status = AdjustmentStatus::Applied;
        adjustment.approved_by = Some(approved_by);
        adjustment.approved_at = Some(now);
        adjustment.applied_at = Some(now);
        tracing::info!(adjustment = %id, approved_by = %approved_by, "adjustment applied");
        Ok(adjustment.clone())
    }

    /// Cancel a pending adjustment. No ledger effect.
    pub fn cancel(&mut self, id: AdjustmentId) -> Result<Adjustment, LedgerError> {
        let adjustment = self
            .adjustments
            .get_mut(&id)
            .ok_or(LedgerError::AdjustmentNotFound(id))?;
        if adjustment.status != AdjustmentStatus::Pending {
            return Err(LedgerError::AdjustmentNotPending {
                id,
                status: adjustment.status,
            });
        }
        adjustment.status = AdjustmentStatus::Cancelled;
        tracing::info!(adjustment = %id, "adjustment cancelled");
        Ok(adjustment.clone())
    }

    /// All adjustments, for persistence mirroring.
    pub fn iter(&self) -> impl Iterator<Item = &Adjustment> {
        self.adjustments.values()
    }

    /// Restore an adjustment from the persistence mirror.
    pub fn restore(&mut self, adjustment: Adjustment) {
        self.adjustments.insert(adjustment.id, adjustment);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mmkt_core::FeeRate;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn amount(s: &str) -> Amount {
        Amount::parse(s).unwrap()
    }

    fn funded_ledger(publisher: PublisherId, available: &str) -> Ledger {
        let mut ledger = Ledger::new();
        ledger
            .add_earning(
                publisher,
                amount(available),
                FeeRate::ZERO,
                None,
                None,
                false,
                now(),
            )
            .unwrap();
        ledger
    }

    #[test]
    fn create_is_pending_and_touches_no_ledger() {
        let mut manager = AdjustmentManager::new();
        let publisher = PublisherId::new();
        let ledger = Ledger::new();

        let adj = manager
            .create(
                publisher,
                AdjustmentType::Bonus,
                amount("25.00"),
                "launch bonus".to_string(),
                UserId::new(),
                None,
                None,
                now(),
            )
            .clone();
        assert_eq!(adj.status, AdjustmentStatus::Pending);
        assert!(ledger.balance(publisher).is_none());
    }

    #[test]
    fn approve_applies_and_flips_status() {
        let mut manager = AdjustmentManager::new();
        let publisher = PublisherId::new();
        let mut ledger = funded_ledger(publisher, "100.00");
        let approver = UserId::new();

        let adj = manager
            .create(
                publisher,
                AdjustmentType::Refund,
                amount("-20.00"),
                "order refund".to_string(),
                UserId::new(),
                Some(Reference::new("order", "ord-1")),
                None,
                now(),
            )
            .clone();

        let approved = manager.approve(adj.id, approver, &mut ledger, now()).unwrap();
        assert_eq!(approved.status, AdjustmentStatus::Applied);
        assert_eq!(approved.approved_by, Some(approver));
        assert_eq!(approved.applied_at, Some(now()));
        assert_eq!(ledger.balance(publisher).unwrap().available, amount("80.00"));
    }

    #[test]
    fn approve_twice_fails_without_double_applying() {
        let mut manager = AdjustmentManager::new();
        let publisher = PublisherId::new();
        let mut ledger = funded_ledger(publisher, "100.00");

        let adj = manager
            .create(
                publisher,
                AdjustmentType::Bonus,
                amount("10.00"),
                "bonus".to_string(),
                UserId::new(),
                None,
                None,
                now(),
            )
            .clone();
        manager.approve(adj.id, UserId::new(), &mut ledger, now()).unwrap();

        let err = manager
            .approve(adj.id, UserId::new(), &mut ledger, now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::AdjustmentNotPending { .. }));
        assert_eq!(ledger.balance(publisher).unwrap().available, amount("110.00"));
    }

    #[test]
    fn declined_ledger_application_keeps_adjustment_pending() {
        let mut manager = AdjustmentManager::new();
        let publisher = PublisherId::new();
        let mut ledger = Ledger::new();

        let adj = manager
            .create(
                publisher,
                AdjustmentType::Chargeback,
                amount("-50.00"),
                "chargeback".to_string(),
                UserId::new(),
                None,
                None,
                now(),
            )
            .clone();

        let err = manager
            .approve(adj.id, UserId::new(), &mut ledger, now())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(manager.get(adj.id).unwrap().status, AdjustmentStatus::Pending);
    }

    #[test]
    fn cancel_only_while_pending_and_leaves_ledger_alone() {
        let mut manager = AdjustmentManager::new();
        let publisher = PublisherId::new();
        let mut ledger = funded_ledger(publisher, "100.00");

        let adj = manager
            .create(
                publisher,
                AdjustmentType::Fee,
                amount("-5.00"),
                "listing fee".to_string(),
                UserId::new(),
                None,
                None,
                now(),
            )
            .clone();
        let cancelled = manager.cancel(adj.id).unwrap();
        assert_eq!(cancelled.status, AdjustmentStatus::Cancelled);
        assert_eq!(ledger.balance(publisher).unwrap().available, amount("100.00"));

        // Cancelling an applied adjustment fails and leaves the ledger
        // untouched.
        let applied = manager
            .create(
                publisher,
                AdjustmentType::Bonus,
                amount("10.00"),
                "bonus".to_string(),
                UserId::new(),
                None,
                None,
                now(),
            )
            .clone();
        manager
            .approve(applied.id, UserId::new(), &mut ledger, now())
            .unwrap();
        let err = manager.cancel(applied.id).unwrap_err();
        assert!(matches!(err, LedgerError::AdjustmentNotPending { .. }));
        assert_eq!(ledger.balance(publisher).unwrap().available, amount("110.00"));
    }

    #[test]
    fn list_filters_and_pending_total() {
        let mut manager = AdjustmentManager::new();
        let publisher = PublisherId::new();
        let other = PublisherId::new();

        manager.create(
            publisher,
            AdjustmentType::Bonus,
            amount("10.00"),
            "a".to_string(),
            UserId::new(),
            None,
            None,
            now(),
        );
        manager.create(
            publisher,
            AdjustmentType::Refund,
            amount("-4.00"),
            "b".to_string(),
            UserId::new(),
            None,
            None,
            now(),
        );
        manager.create(
            other,
            AdjustmentType::Bonus,
            amount("99.00"),
            "c".to_string(),
            UserId::new(),
            None,
            None,
            now(),
        );

        let mine = manager.list(&AdjustmentFilter {
            publisher: Some(publisher),
            ..AdjustmentFilter::default()
        });
        assert_eq!(mine.len(), 2);

        let bonuses = manager.list(&AdjustmentFilter {
            adjustment_type: Some(AdjustmentType::Bonus),
            ..AdjustmentFilter::default()
        });
        assert_eq!(bonuses.len(), 2);

        assert_eq!(manager.pending_total(publisher), amount("6.00"));
    }
}
