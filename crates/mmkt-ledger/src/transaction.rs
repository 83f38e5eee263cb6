//! # Balance Transactions
//!
//! Immutable records of balance changes. Each row carries the bucket it
//! touched, the signed delta, and the bucket's value before and after —
//! `balance_after == balance_before + amount` for every row, which makes
//! the log independently auditable without trusting the balance table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mmkt_core::{Amount, PublisherId, TransactionId};

use crate::balance::BalanceType;

/// What kind of balance change a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Net earning credited from a completed sale.
    Sale,
    /// Funds moved out of hold (pending → available) or unfrozen
    /// (reserved → available).
    Release,
    /// Funds frozen against chargeback risk (available → reserved).
    Reserve,
    /// Reserved funds forfeited on a confirmed chargeback.
    Forfeit,
    /// Funds settled out to the publisher.
    Payout,
    /// Manually authorized correction.
    Adjustment,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Sale => "sale",
            Self::Release => "release",
            Self::Reserve => "reserve",
            Self::Forfeit => "forfeit",
            Self::Payout => "payout",
            Self::Adjustment => "adjustment",
        };
        f.write_str(s)
    }
}

/// A typed pointer at the record that caused a transaction.
///
/// The kind is a short tag (`"order"`, `"payout_item"`, `"adjustment"`),
/// the id the referenced record's identifier in string form. The ledger
/// records references verbatim and never dereferences them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// What kind of record is referenced.
    pub kind: String,
    /// The referenced record's id.
    pub id: String,
}

impl Reference {
    /// Build a reference from a kind tag and any displayable id.
    pub fn new(kind: &str, id: impl std::fmt::Display) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

/// One immutable balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceTransaction {
    /// Unique identifier.
    pub id: TransactionId,
    /// The publisher whose balance changed.
    pub publisher: PublisherId,
    /// What kind of change this is.
    pub transaction_type: TransactionType,
    /// Signed delta applied to the bucket.
    pub amount: Amount,
    /// Which bucket changed.
    pub balance_type: BalanceType,
    /// Bucket value before the change.
    pub balance_before: Amount,
    /// Bucket value after the change.
    pub balance_after: Amount,
    /// What caused the change, if attributable.
    pub reference: Option<Reference>,
    /// Human-readable description.
    pub description: String,
    /// Audit metadata (gross/fee/rate for sales), never interpreted.
    pub metadata: Option<serde_json::Value>,
    /// When the change was recorded.
    pub created_at: DateTime<Utc>,
}

impl BalanceTransaction {
    /// Check the row's internal consistency:
    /// `balance_after == balance_before + amount`.
    pub fn reconciles(&self) -> bool {
        self.balance_before
            .checked_add(self.amount)
            .map(|sum| sum == self.balance_after)
            .unwrap_or(false)
    }
}
