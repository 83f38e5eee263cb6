//! # Payout Batches & Items
//!
//! A [`PayoutBatch`] groups settlement for a period; a [`PayoutItem`]
//! is one publisher's payout inside it. Both carry closed status enums
//! with explicit transition checks — there is no way to push a batch
//! into `Processing` twice or resurrect a cancelled item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mmkt_core::{Amount, BatchId, PayoutItemId, PublisherId, UserId};

use crate::orders::ModuleBreakdown;
use crate::rail::SettlementReceipt;

// ─── BatchStatus ─────────────────────────────────────────────────────

/// Lifecycle status of a payout batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Being assembled; items may be populated.
    Draft,
    /// Approved, awaiting processing.
    Pending,
    /// Items are being settled. Entering this state is the
    /// double-processing lock.
    Processing,
    /// All items resolved; zero or some failures (terminal).
    Completed,
    /// Every item failed (terminal).
    Failed,
    /// Abandoned before processing (terminal).
    Cancelled,
}

impl BatchStatus {
    /// Whether this status ends the batch.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> to` is an allowed transition.
    ///
    /// `Draft -> Completed` exists only for empty scheduled batches,
    /// which have nothing to process.
    pub fn can_transition(&self, to: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, to),
            (Draft, Pending)
                | (Draft, Cancelled)
                | (Draft, Completed)
                | (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How a batch came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    /// Created by the payout schedule.
    Regular,
    /// Created by an administrator.
    Manual,
}

impl std::fmt::Display for BatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Regular => f.write_str("regular"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

// ─── ItemStatus ──────────────────────────────────────────────────────

/// Lifecycle status of one payout item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Awaiting settlement.
    Pending,
    /// Being settled right now.
    Processing,
    /// Settled; the ledger debit and rail receipt are recorded.
    Completed,
    /// Settlement failed; `last_error` says why.
    Failed,
    /// Cancelled with its batch.
    Cancelled,
    /// Held back by an administrator; skipped during processing.
    OnHold,
}

impl ItemStatus {
    /// Whether this status ends the item.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::OnHold => "on_hold",
        };
        f.write_str(s)
    }
}

// ─── PayoutBatch ─────────────────────────────────────────────────────

/// A grouped settlement run for a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutBatch {
    /// Unique identifier.
    pub id: BatchId,
    /// How the batch came to exist.
    pub batch_type: BatchType,
    /// Period start (inclusive).
    pub period_start: DateTime<Utc>,
    /// Period end (exclusive).
    pub period_end: DateTime<Utc>,
    /// Lifecycle status.
    pub status: BatchStatus,
    /// Number of items.
    pub total_payouts: usize,
    /// Sum of item gross amounts.
    pub total_gross: Amount,
    /// Sum of item platform fees. Zero by design: fees come off at the
    /// point of sale, not at settlement.
    pub total_fees: Amount,
    /// Sum of item net amounts.
    pub total_net: Amount,
    /// Items settled so far.
    pub success_count: usize,
    /// Items failed so far.
    pub failed_count: usize,
    /// Items not yet attempted.
    pub pending_count: usize,
    /// Per-publisher error summary after processing; empty on a clean
    /// run.
    pub error_summary: Vec<BatchItemError>,
    /// Operator notes (cancellation reason, empty-run note).
    pub processing_notes: Option<String>,
    /// Who created the batch; `None` for the schedule runner.
    pub created_by: Option<UserId>,
    /// When the batch was created.
    pub created_at: DateTime<Utc>,
    /// Who approved it; `None` for schedule auto-approval.
    pub approved_by: Option<UserId>,
    /// When it was approved.
    pub approved_at: Option<DateTime<Utc>>,
    /// When processing started.
    pub started_at: Option<DateTime<Utc>>,
    /// When processing finished.
    pub completed_at: Option<DateTime<Utc>>,
}

/// One failed item in the batch error summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemError {
    /// The failing publisher.
    pub publisher: PublisherId,
    /// What went wrong.
    pub error: String,
}

impl PayoutBatch {
    /// Create a draft batch for a period.
    pub fn new(
        batch_type: BatchType,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        created_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BatchId::new(),
            batch_type,
            period_start,
            period_end,
            status: BatchStatus::Draft,
            total_payouts: 0,
            total_gross: Amount::ZERO,
            total_fees: Amount::ZERO,
            total_net: Amount::ZERO,
            success_count: 0,
            failed_count: 0,
            pending_count: 0,
            error_summary: Vec::new(),
            processing_notes: None,
            created_by,
            created_at: now,
            approved_by: None,
            approved_at: None,
            started_at: None,
            completed_at: None,
        }
    }
}

// ─── PayoutItem ──────────────────────────────────────────────────────

/// One publisher's payout inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutItem {
    /// Unique identifier.
    pub id: PayoutItemId,
    /// The owning batch.
    pub batch: BatchId,
    /// The publisher being paid.
    pub publisher: PublisherId,
    /// Gross amount. Equals net: fees were deducted at earning time.
    pub gross_amount: Amount,
    /// Platform fee at settlement time. Zero by design.
    pub platform_fee: Amount,
    /// Adjustments folded into this item.
    pub adjustments: Amount,
    /// Amount actually settled.
    pub net_amount: Amount,
    /// Distinct completed orders in the period.
    pub order_count: usize,
    /// Their ids, snapshotted from the order feed.
    pub order_ids: Vec<String>,
    /// Per-module breakdown, snapshotted from the order feed.
    pub module_breakdown: Vec<ModuleBreakdown>,
    /// Lifecycle status.
    pub status: ItemStatus,
    /// Payout method snapshot from the publisher directory.
    pub payout_method: Option<String>,
    /// Destination snapshot from the publisher directory.
    pub payout_destination: Option<String>,
    /// Receipt from the settlement rail, once settled.
    pub settlement: Option<SettlementReceipt>,
    /// Failed settlement attempts so far.
    pub retry_count: u32,
    /// Attempt ceiling before the item needs manual intervention.
    pub max_retries: u32,
    /// Error from the last failed attempt.
    pub last_error: Option<String>,
    /// When the item settled.
    pub processed_at: Option<DateTime<Utc>>,
    /// Why the item is on hold, if it is.
    pub on_hold_reason: Option<String>,
}

impl PayoutItem {
    /// Default attempt ceiling.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_can_approve_cancel_or_complete_empty() {
        assert!(BatchStatus::Draft.can_transition(BatchStatus::Pending));
        assert!(BatchStatus::Draft.can_transition(BatchStatus::Cancelled));
        assert!(BatchStatus::Draft.can_transition(BatchStatus::Completed));
        assert!(!BatchStatus::Draft.can_transition(BatchStatus::Processing));
    }

    #[test]
    fn pending_to_processing_is_the_only_way_in() {
        assert!(BatchStatus::Pending.can_transition(BatchStatus::Processing));
        assert!(!BatchStatus::Processing.can_transition(BatchStatus::Processing));
        assert!(!BatchStatus::Completed.can_transition(BatchStatus::Processing));
        assert!(!BatchStatus::Cancelled.can_transition(BatchStatus::Processing));
    }

    #[test]
    fn processing_only_ends_in_completed_or_failed() {
        assert!(BatchStatus::Processing.can_transition(BatchStatus::Completed));
        assert!(BatchStatus::Processing.can_transition(BatchStatus::Failed));
        assert!(!BatchStatus::Processing.can_transition(BatchStatus::Cancelled));
    }

    #[test]
    fn terminal_statuses() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(!BatchStatus::Processing.is_terminal());
    }

    #[test]
    fn status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&ItemStatus::OnHold).unwrap(),
            "\"on_hold\""
        );
        assert_eq!(
            serde_json::to_string(&BatchStatus::Processing).unwrap(),
            "\"processing\""
        );
    }

    #[test]
    fn new_batch_is_empty_draft() {
        let now = chrono::Utc::now();
        let batch = PayoutBatch::new(BatchType::Manual, now, now, None, now);
        assert_eq!(batch.status, BatchStatus::Draft);
        assert_eq!(batch.total_payouts, 0);
        assert!(batch.total_net.is_zero());
        assert!(batch.error_summary.is_empty());
    }
}
