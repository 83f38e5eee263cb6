//! # The Balance Ledger
//!
//! The owning service for publisher balances and the append-only
//! transaction log. Every mutation is one `&mut self` call that applies
//! the delta and appends the matching rows together; callers serialize
//! concurrent access (the API layer holds a write lock per call).
//!
//! Operations that move money between two buckets (release from hold,
//! reserve, unfreeze) write one row per bucket so that per-bucket sums
//! stay equal to the bucket values and a from-zero replay reproduces
//! the balances. Single-bucket operations (earning, payout, forfeit,
//! adjustment) write exactly one row.
//!
//! Declined outcomes — insufficient pending to release, insufficient
//! available to reserve — return `None` and leave no trace. They are
//! business outcomes, not faults.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mmkt_core::{Amount, FeeRate, PublisherId, TransactionId};

use crate::balance::{BalanceType, PublisherBalance};
use crate::error::LedgerError;
use crate::transaction::{BalanceTransaction, Reference, TransactionType};

/// Filters for transaction history queries.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    /// Only rows of this type.
    pub transaction_type: Option<TransactionType>,
    /// Only rows at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only rows strictly before this instant.
    pub to: Option<DateTime<Utc>>,
    /// Maximum rows to return.
    pub limit: Option<usize>,
    /// Rows to skip (after sorting newest first).
    pub offset: usize,
}

/// Earnings totals over a reporting window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsSummary {
    /// Net sale earnings credited in the window.
    pub earnings: Amount,
    /// Total settled out in the window (positive).
    pub payouts: Amount,
    /// Net adjustments applied in the window.
    pub adjustments: Amount,
    /// `earnings - payouts + adjustments`.
    pub net_change: Amount,
    /// Rows considered.
    pub transaction_count: usize,
}

/// Bucket values recomputed from the transaction log alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplayedBalances {
    /// Sum of rows against the available bucket.
    pub available: Amount,
    /// Sum of rows against the pending bucket.
    pub pending: Amount,
    /// Sum of rows against the reserved bucket.
    pub reserved: Amount,
}

// ─── Ledger ──────────────────────────────────────────────────────────

/// The owning store for balances and the transaction log.
#[derive(Debug, Default)]
pub struct Ledger {
    balances: HashMap<PublisherId, PublisherBalance>,
    /// Append-only, in recording order.
    transactions: Vec<BalanceTransaction>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the publisher's balance record, creating a zeroed one if this
    /// is the first touch.
    pub fn get_or_create(&mut self, publisher: PublisherId) -> &PublisherBalance {
        self.balances
            .entry(publisher)
            .or_insert_with(|| PublisherBalance::new(publisher))
    }

    /// Read a balance record without creating it.
    pub fn balance(&self, publisher: PublisherId) -> Option<&PublisherBalance> {
        self.balances.get(&publisher)
    }

    /// Update auto-payout settings, creating the record if needed.
    pub fn set_auto_payout(
        &mut self,
        publisher: PublisherId,
        enabled: bool,
        threshold: Option<Amount>,
    ) -> &PublisherBalance {
        let balance = self
            .balances
            .entry(publisher)
            .or_insert_with(|| PublisherBalance::new(publisher));
        balance.auto_payout_enabled = enabled;
        balance.payout_threshold = threshold;
        balance
    }

    /// Publishers eligible for an automatic payout: auto-payout enabled
    /// and available at or above the effective minimum (their own
    /// threshold override, or the batch minimum).
    pub fn eligible_for_payout(&self, minimum: Amount) -> Vec<&PublisherBalance> {
        self.balances
            .values()
            .filter(|b| {
                b.auto_payout_enabled && b.available >= b.payout_threshold.unwrap_or(minimum)
            })
            .collect()
    }

    // ── Earnings ─────────────────────────────────────────────────────

    /// Credit a completed sale.
    ///
    /// The platform fee comes off at this point: `net = gross - fee` is
    /// credited to pending (or directly to available), and the single
    /// transaction row records gross/fee/rate in its metadata for audit
    /// even though only net moves the balance.
    #[allow(clippy::too_many_arguments)]
    pub fn add_earning(
        &mut self,
        publisher: PublisherId,
        gross: Amount,
        fee_rate: FeeRate,
        reference: Option<Reference>,
        description: Option<String>,
        to_pending: bool,
        now: DateTime<Utc>,
    ) -> Result<BalanceTransaction, LedgerError> {
        if !gross.is_positive() {
            return Err(LedgerError::InvalidAmount {
                amount: gross,
                operation: "add_earning",
            });
        }
        let fee = fee_rate.fee_of(gross)?;
        let net = gross.checked_sub(fee)?;

        let bucket = if to_pending {
            BalanceType::Pending
        } else {
            BalanceType::Available
        };

        let balance = self
            .balances
            .entry(publisher)
            .or_insert_with(|| PublisherBalance::new(publisher));
        let before = balance.bucket(bucket);
        let after = before.checked_add(net)?;
        if to_pending {
            balance.pending = after;
        } else {
            balance.available = after;
        }
        balance.lifetime_earnings = balance.lifetime_earnings.checked_add(net)?;
        balance.last_earning_at = Some(now);

        let metadata = serde_json::json!({
            "gross_amount": gross.to_string(),
            "platform_fee": fee.to_string(),
            "platform_fee_rate": fee_rate.to_string(),
        });
        let txn = self.push_row(
            publisher,
            TransactionType::Sale,
            net,
            bucket,
            before,
            after,
            reference,
            description.unwrap_or_else(|| {
                format!("Sale earning: {gross} - {fee} fee = {net}")
            }),
            Some(metadata),
            now,
        );
        tracing::info!(publisher = %publisher, %net, %fee, "earning credited");
        Ok(txn)
    }

    // ── Bucket moves ─────────────────────────────────────────────────

    /// Release funds from hold: pending → available.
    ///
    /// `amount` of `None` releases the full pending balance. Returns
    /// `None` (no-op, nothing recorded) if pending is zero or the
    /// requested amount exceeds it. The returned row is the available
    /// credit; a paired pending debit row is recorded alongside it.
    pub fn move_pending_to_available(
        &mut self,
        publisher: PublisherId,
        amount: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Option<BalanceTransaction> {
        let balance = self
            .balances
            .entry(publisher)
            .or_insert_with(|| PublisherBalance::new(publisher));
        let amount = amount.unwrap_or(balance.pending);
        if !amount.is_positive() || balance.pending < amount {
            return None;
        }

        let pending_before = balance.pending;
        let pending_after = pending_before.checked_sub(amount).ok()?;
        let available_before = balance.available;
        let available_after = available_before.checked_add(amount).ok()?;
        balance.pending = pending_after;
        balance.available = available_after;

        self.push_row(
            publisher,
            TransactionType::Release,
            amount.checked_neg().ok()?,
            BalanceType::Pending,
            pending_before,
            pending_after,
            None,
            format!("Released {amount} from pending"),
            None,
            now,
        );
        let credit = self.push_row(
            publisher,
            TransactionType::Release,
            amount,
            BalanceType::Available,
            available_before,
            available_after,
            None,
            format!("Released {amount} from pending to available"),
            None,
            now,
        );
        Some(credit)
    }

    /// Freeze funds against chargeback risk: available → reserved.
    ///
    /// Returns `None` if available is insufficient — a declined outcome,
    /// not an error.
    pub fn reserve(
        &mut self,
        publisher: PublisherId,
        amount: Amount,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<BalanceTransaction> {
        let balance = self
            .balances
            .entry(publisher)
            .or_insert_with(|| PublisherBalance::new(publisher));
        if !amount.is_positive() || balance.available < amount {
            return None;
        }

        let available_before = balance.available;
        let available_after = available_before.checked_sub(amount).ok()?;
        let reserved_before = balance.reserved;
        let reserved_after = reserved_before.checked_add(amount).ok()?;
        balance.available = available_after;
        balance.reserved = reserved_after;

        self.push_row(
            publisher,
            TransactionType::Reserve,
            amount.checked_neg().ok()?,
            BalanceType::Available,
            available_before,
            available_after,
            None,
            format!("Reserved {amount}: {reason}"),
            None,
            now,
        );
        let credit = self.push_row(
            publisher,
            TransactionType::Reserve,
            amount,
            BalanceType::Reserved,
            reserved_before,
            reserved_after,
            None,
            format!("Reserved {amount}: {reason}"),
            None,
            now,
        );
        tracing::info!(publisher = %publisher, %amount, reason, "funds reserved");
        Some(credit)
    }

    /// Unfreeze reserved funds back to available, or forfeit them on a
    /// confirmed chargeback. The amount is clamped to what is actually
    /// reserved; returns `None` if nothing is reserved.
    pub fn release_reserved(
        &mut self,
        publisher: PublisherId,
        amount: Amount,
        to_available: bool,
        now: DateTime<Utc>,
    ) -> Option<BalanceTransaction> {
        let balance = self
            .balances
            .entry(publisher)
            .or_insert_with(|| PublisherBalance::new(publisher));
        let amount = amount.min(balance.reserved);
        if !amount.is_positive() {
            return None;
        }

        let reserved_before = balance.reserved;
        let reserved_after = reserved_before.checked_sub(amount).ok()?;
        balance.reserved = reserved_after;

        if to_available {
            let available_before = balance.available;
            let available_after = available_before.checked_add(amount).ok()?;
            balance.available = available_after;

            self.push_row(
                publisher,
                TransactionType::Release,
                amount.checked_neg().ok()?,
                BalanceType::Reserved,
                reserved_before,
                reserved_after,
                None,
                format!("Released {amount} from reserved"),
                None,
                now,
            );
            let credit = self.push_row(
                publisher,
                TransactionType::Release,
                amount,
                BalanceType::Available,
                available_before,
                available_after,
                None,
                format!("Released {amount} from reserved to available"),
                None,
                now,
            );
            Some(credit)
        } else {
            let debit = self.push_row(
                publisher,
                TransactionType::Forfeit,
                amount.checked_neg().ok()?,
                BalanceType::Reserved,
                reserved_before,
                reserved_after,
                None,
                format!("Forfeited {amount} from reserved (chargeback)"),
                None,
                now,
            );
            tracing::warn!(publisher = %publisher, %amount, "reserved funds forfeited");
            Some(debit)
        }
    }

    // ── Settlement & adjustments ─────────────────────────────────────

    /// Debit a settled payout from available.
    ///
    /// The batch processor calls this once per successfully settled
    /// item. Insufficient available is a typed error so the item can be
    /// marked failed without touching the balance.
    pub fn settle_payout(
        &mut self,
        publisher: PublisherId,
        amount: Amount,
        reference: Reference,
        description: String,
        now: DateTime<Utc>,
    ) -> Result<BalanceTransaction, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount {
                amount,
                operation: "settle_payout",
            });
        }
        let balance = self
            .balances
            .entry(publisher)
            .or_insert_with(|| PublisherBalance::new(publisher));
        if balance.available < amount {
            return Err(LedgerError::InsufficientBalance {
                publisher,
                balance_type: BalanceType::Available,
                requested: amount,
                held: balance.available,
            });
        }

        let before = balance.available;
        let after = before.checked_sub(amount)?;
        balance.available = after;
        balance.lifetime_payouts = balance.lifetime_payouts.checked_add(amount)?;
        balance.last_payout_at = Some(now);

        let txn = self.push_row(
            publisher,
            TransactionType::Payout,
            amount.checked_neg()?,
            BalanceType::Available,
            before,
            after,
            Some(reference),
            description,
            None,
            now,
        );
        tracing::info!(publisher = %publisher, %amount, "payout settled");
        Ok(txn)
    }

    /// Apply an approved adjustment's signed amount to available.
    ///
    /// A debit adjustment that would push available negative is
    /// rejected — buckets are never negative.
    pub fn apply_adjustment(
        &mut self,
        publisher: PublisherId,
        amount: Amount,
        reference: Reference,
        description: String,
        now: DateTime<Utc>,
    ) -> Result<BalanceTransaction, LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount {
                amount,
                operation: "apply_adjustment",
            });
        }
        let balance = self
            .balances
            .entry(publisher)
            .or_insert_with(|| PublisherBalance::new(publisher));

        let before = balance.available;
        let after = before.checked_add(amount)?;
        if after.is_negative() {
            return Err(LedgerError::InsufficientBalance {
                publisher,
                balance_type: BalanceType::Available,
                requested: amount.abs(),
                held: before,
            });
        }
        balance.available = after;
        balance.lifetime_adjustments = balance.lifetime_adjustments.checked_add(amount)?;

        let txn = self.push_row(
            publisher,
            TransactionType::Adjustment,
            amount,
            BalanceType::Available,
            before,
            after,
            Some(reference),
            description,
            None,
            now,
        );
        tracing::info!(publisher = %publisher, %amount, "adjustment applied");
        Ok(txn)
    }

    // ── History & audit ──────────────────────────────────────────────

    /// Transaction history for a publisher, newest first.
    pub fn transactions(
        &self,
        publisher: PublisherId,
        filter: &TransactionFilter,
    ) -> Vec<&BalanceTransaction> {
        let mut rows: Vec<&BalanceTransaction> = self
            .transactions
            .iter()
            .filter(|t| t.publisher == publisher)
            .filter(|t| {
                filter
                    .transaction_type
                    .map_or(true, |ty| t.transaction_type == ty)
            })
            .filter(|t| filter.from.map_or(true, |from| t.created_at >= from))
            .filter(|t| filter.to.map_or(true, |to| t.created_at < to))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Earnings totals over `[since, until)`.
    pub fn earnings_summary(
        &self,
        publisher: PublisherId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> EarningsSummary {
        let mut earnings = 0i64;
        let mut payouts = 0i64;
        let mut adjustments = 0i64;
        let mut count = 0usize;

        for t in self.transactions.iter().filter(|t| {
            t.publisher == publisher && t.created_at >= since && t.created_at < until
        }) {
            count += 1;
            match t.transaction_type {
                TransactionType::Sale => earnings += t.amount.cents(),
                TransactionType::Payout => payouts += t.amount.cents().abs(),
                TransactionType::Adjustment => adjustments += t.amount.cents(),
                _ => {}
            }
        }

        EarningsSummary {
            earnings: Amount::from_cents(earnings),
            payouts: Amount::from_cents(payouts),
            adjustments: Amount::from_cents(adjustments),
            net_change: Amount::from_cents(earnings - payouts + adjustments),
            transaction_count: count,
        }
    }

    /// Recompute the publisher's buckets from the transaction log alone.
    pub fn replay(&self, publisher: PublisherId) -> ReplayedBalances {
        let mut out = ReplayedBalances::default();
        for t in self.transactions.iter().filter(|t| t.publisher == publisher) {
            let cents = t.amount.cents();
            match t.balance_type {
                BalanceType::Available => {
                    out.available = Amount::from_cents(out.available.cents() + cents)
                }
                BalanceType::Pending => {
                    out.pending = Amount::from_cents(out.pending.cents() + cents)
                }
                BalanceType::Reserved => {
                    out.reserved = Amount::from_cents(out.reserved.cents() + cents)
                }
            }
        }
        out
    }

    /// Audit check: every row reconciles and the replayed buckets match
    /// the live balance record.
    pub fn verify_consistency(&self, publisher: PublisherId) -> bool {
        let rows_ok = self
            .transactions
            .iter()
            .filter(|t| t.publisher == publisher)
            .all(BalanceTransaction::reconciles);
        let replayed = self.replay(publisher);
        let balance_ok = match self.balances.get(&publisher) {
            Some(b) => {
                replayed.available == b.available
                    && replayed.pending == b.pending
                    && replayed.reserved == b.reserved
            }
            None => {
                replayed.available.is_zero()
                    && replayed.pending.is_zero()
                    && replayed.reserved.is_zero()
            }
        };
        rows_ok && balance_ok
    }

    // ── Persistence support ──────────────────────────────────────────

    /// All balance records, for persistence mirroring.
    pub fn iter_balances(&self) -> impl Iterator<Item = &PublisherBalance> {
        self.balances.values()
    }

    /// The full transaction log, in recording order.
    pub fn iter_transactions(&self) -> impl Iterator<Item = &BalanceTransaction> {
        self.transactions.iter()
    }

    /// Restore state from the persistence mirror during startup
    /// hydration.
    pub fn restore(&mut self, balance: PublisherBalance, rows: Vec<BalanceTransaction>) {
        self.balances.insert(balance.publisher, balance);
        self.transactions.extend(rows);
    }

    #[allow(clippy::too_many_arguments)]
    fn push_row(
        &mut self,
        publisher: PublisherId,
        transaction_type: TransactionType,
        amount: Amount,
        balance_type: BalanceType,
        balance_before: Amount,
        balance_after: Amount,
        reference: Option<Reference>,
        description: String,
        metadata: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> BalanceTransaction {
        let txn = BalanceTransaction {
            id: TransactionId::new(),
            publisher,
            transaction_type,
            amount,
            balance_type,
            balance_before,
            balance_after,
            reference,
            description,
            metadata,
            created_at: now,
        };
        debug_assert!(txn.reconciles());
        self.transactions.push(txn.clone());
        txn
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
