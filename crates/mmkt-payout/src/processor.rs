//! # Batch Processor
//!
//! Owns batches and their items and drives the settlement loop. Items
//! settle independently: each attempt is a `Result` — rail settlement
//! then ledger debit — and the per-item results are aggregated into a
//! [`BatchOutcome`]. A failing publisher marks its own item failed and
//! the loop moves on.
//!
//! Items are processed in bounded chunks with the batch counters
//! checkpointed after each chunk, so a restart resumes from the
//! checkpoint instead of reprocessing settled items.
//!
//! The rail is invoked before the ledger debit: a rail failure leaves
//! the publisher's balance untouched. A ledger failure after rail
//! acceptance is recorded on the item and surfaces in the error summary
//! for manual reconciliation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mmkt_core::{Amount, BatchId, FeeRate, PayoutItemId, PublisherId, UserId};
use mmkt_ledger::{AdjustmentManager, Ledger, LedgerError, Reference};

use crate::batch::{
    BatchItemError, BatchStatus, BatchType, ItemStatus, PayoutBatch, PayoutItem,
};
use crate::error::PayoutError;
use crate::orders::{ModuleBreakdown, OrderFeed};
use crate::rail::{PublisherDirectory, SettlementRail, SettlementReceipt};

/// Items settled per checkpoint.
const DEFAULT_CHUNK_SIZE: usize = 50;

// ─── Outcome types ───────────────────────────────────────────────────

/// One successfully settled item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledItem {
    /// The item.
    pub item: PayoutItemId,
    /// The publisher paid.
    pub publisher: PublisherId,
    /// The settled amount.
    pub amount: Amount,
    /// The rail receipt.
    pub receipt: SettlementReceipt,
}

/// One failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// The item.
    pub item: PayoutItemId,
    /// The publisher whose settlement failed.
    pub publisher: PublisherId,
    /// What went wrong.
    pub error: String,
}

/// Aggregated result of one processing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// The batch.
    pub batch: BatchId,
    /// Final batch status.
    pub status: BatchStatus,
    /// Items settled.
    pub success_count: usize,
    /// Items failed.
    pub failed_count: usize,
    /// The settled items.
    pub settled: Vec<SettledItem>,
    /// The failures.
    pub failures: Vec<ItemFailure>,
}

/// Read-side payout projection for one publisher over a period.
///
/// Combines current balances with the order collaborator's completed
/// totals. Never mutates anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutCalculation {
    /// The publisher.
    pub publisher: PublisherId,
    /// Period start.
    pub period_start: DateTime<Utc>,
    /// Period end.
    pub period_end: DateTime<Utc>,
    /// Gross completed-order value in the period.
    pub gross_amount: Amount,
    /// Platform fee on that gross at the given rate.
    pub platform_fee: Amount,
    /// Sum of the publisher's pending adjustments.
    pub adjustments: Amount,
    /// `gross - fee + adjustments`.
    pub net_amount: Amount,
    /// Distinct completed orders.
    pub order_count: usize,
    /// Their ids.
    pub order_ids: Vec<String>,
    /// Per-module breakdown.
    pub module_breakdown: Vec<ModuleBreakdown>,
    /// Current available balance.
    pub available_balance: Amount,
    /// Current pending balance.
    pub pending_balance: Amount,
}

/// Pure payout projection for one publisher over a period.
pub fn calculate_payout(
    publisher: PublisherId,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    fee_rate: FeeRate,
    ledger: &Ledger,
    adjustments: &AdjustmentManager,
    orders: &dyn OrderFeed,
) -> Result<PayoutCalculation, PayoutError> {
    let period = orders.completed_orders(publisher, period_start, period_end);
    let fee = fee_rate
        .fee_of(period.gross_amount)
        .map_err(LedgerError::from)?;
    let pending_adjustments = adjustments.pending_total(publisher);
    let net = Amount::from_cents(
        period.gross_amount.cents() - fee.cents() + pending_adjustments.cents(),
    );

    let (available, pending) = ledger
        .balance(publisher)
        .map(|b| (b.available, b.pending))
        .unwrap_or((Amount::ZERO, Amount::ZERO));

    Ok(PayoutCalculation {
        publisher,
        period_start,
        period_end,
        gross_amount: period.gross_amount,
        platform_fee: fee,
        adjustments: pending_adjustments,
        net_amount: net,
        order_count: period.order_count(),
        order_ids: period.order_ids,
        module_breakdown: period.module_breakdown,
        available_balance: available,
        pending_balance: pending,
    })
}

// ─── PayoutBook ──────────────────────────────────────────────────────

/// The owning store for batches and items, and the settlement driver.
#[derive(Debug)]
pub struct PayoutBook {
    batches: HashMap<BatchId, PayoutBatch>,
    items: HashMap<BatchId, Vec<PayoutItem>>,
    chunk_size: usize,
}

impl Default for PayoutBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PayoutBook {
    /// Create an empty book with the default chunk size.
    pub fn new() -> Self {
        Self {
            batches: HashMap::new(),
            items: HashMap::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Override the checkpoint chunk size (tests, tuning).
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ..Self::new()
        }
    }

    // ── Batch lifecycle ──────────────────────────────────────────────

    /// Create a draft batch for a period.
    pub fn create_batch(
        &mut self,
        batch_type: BatchType,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        created_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> PayoutBatch {
        let batch = PayoutBatch::new(batch_type, period_start, period_end, created_by, now);
        tracing::info!(batch = %batch.id, kind = %batch_type, "payout batch created");
        self.items.insert(batch.id, Vec::new());
        let out = batch.clone();
        self.batches.insert(batch.id, batch);
        out
    }

    /// Get a batch by id.
    pub fn get(&self, id: BatchId) -> Option<&PayoutBatch> {
        self.batches.get(&id)
    }

    /// List batches, newest first, optionally filtered by status.
    pub fn list(&self, status: Option<BatchStatus>) -> Vec<&PayoutBatch> {
        let mut out: Vec<&PayoutBatch> = self
            .batches
            .values()
            .filter(|b| status.map_or(true, |s| b.status == s))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Items of a batch.
    pub fn items(&self, batch: BatchId) -> &[PayoutItem] {
        self.items.get(&batch).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Populate a draft batch with one item per eligible publisher.
    ///
    /// Eligible means auto-payout enabled with available at or above the
    /// minimum (or their own threshold). Each item carries the
    /// publisher's entire available balance as net — fees were deducted
    /// at earning time, so item and batch fee fields stay zero.
    /// Repopulating a draft replaces its items.
    pub fn populate(
        &mut self,
        batch_id: BatchId,
        minimum: Amount,
        ledger: &Ledger,
        orders: &dyn OrderFeed,
        directory: &dyn PublisherDirectory,
    ) -> Result<Vec<PayoutItem>, PayoutError> {
        let batch = self
            .batches
            .get(&batch_id)
            .ok_or(PayoutError::BatchNotFound(batch_id))?;
        if batch.status != BatchStatus::Draft {
            return Err(PayoutError::InvalidBatchState {
                batch: batch_id,
                status: batch.status,
                operation: "populate",
            });
        }
        let (period_start, period_end) = (batch.period_start, batch.period_end);

        let eligible: Vec<(PublisherId, Amount)> = ledger
            .eligible_for_payout(minimum)
            .into_iter()
            .filter(|b| b.available.is_positive())
            .map(|b| (b.publisher, b.available))
            .collect();

        let mut items = Vec::with_capacity(eligible.len());
        let mut total_net = 0i64;
        for (publisher, available) in eligible {
            let period = orders.completed_orders(publisher, period_start, period_end);
            let destination = directory.payout_destination(publisher);
            items.push(PayoutItem {
                id: PayoutItemId::new(),
                batch: batch_id,
                publisher,
                gross_amount: available,
                platform_fee: Amount::ZERO,
                adjustments: Amount::ZERO,
                net_amount: available,
                order_count: period.order_count(),
                order_ids: period.order_ids,
                module_breakdown: period.module_breakdown,
                status: ItemStatus::Pending,
                payout_method: destination.as_ref().map(|d| d.method.clone()),
                payout_destination: destination.map(|d| d.destination),
                settlement: None,
                retry_count: 0,
                max_retries: PayoutItem::DEFAULT_MAX_RETRIES,
                last_error: None,
                processed_at: None,
                on_hold_reason: None,
            });
            total_net += available.cents();
        }

        if let Some(batch) = self.batches.get_mut(&batch_id) {
            batch.total_payouts = items.len();
            batch.total_gross = Amount::from_cents(total_net);
            batch.total_fees = Amount::ZERO;
            batch.total_net = Amount::from_cents(total_net);
            batch.success_count = 0;
            batch.failed_count = 0;
            batch.pending_count = items.len();
        }
        tracing::info!(
            batch = %batch_id,
            items = items.len(),
            total_net = %Amount::from_cents(total_net),
            "batch populated"
        );
        self.items.insert(batch_id, items.clone());
        Ok(items)
    }

    /// Approve a draft batch for processing. `approved_by` of `None`
    /// records schedule auto-approval.
    pub fn approve(
        &mut self,
        batch_id: BatchId,
        approved_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<PayoutBatch, PayoutError> {
        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or(PayoutError::BatchNotFound(batch_id))?;
        if !batch.status.can_transition(BatchStatus::Pending) {
            return Err(PayoutError::InvalidBatchState {
                batch: batch_id,
                status: batch.status,
                operation: "approve",
            });
        }
        batch.status = BatchStatus::Pending;
        batch.approved_by = approved_by;
        batch.approved_at = Some(now);
        tracing::info!(batch = %batch_id, "batch approved");
        Ok(batch.clone())
    }

    /// Cancel a batch before processing. Cascades to all its items.
    pub fn cancel(
        &mut self,
        batch_id: BatchId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<PayoutBatch, PayoutError> {
        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or(PayoutError::BatchNotFound(batch_id))?;
        if !batch.status.can_transition(BatchStatus::Cancelled) {
            return Err(PayoutError::InvalidBatchState {
                batch: batch_id,
                status: batch.status,
                operation: "cancel",
            });
        }
        batch.status = BatchStatus::Cancelled;
        batch.processing_notes = Some(reason.to_string());
        batch.completed_at = Some(now);
        let out = batch.clone();

        if let Some(items) = self.items.get_mut(&batch_id) {
            for item in items.iter_mut() {
                item.status = ItemStatus::Cancelled;
            }
        }
        tracing::info!(batch = %batch_id, reason, "batch cancelled");
        Ok(out)
    }

    /// Put a pending item on hold so processing skips it.
    pub fn hold_item(
        &mut self,
        batch_id: BatchId,
        item_id: PayoutItemId,
        reason: &str,
    ) -> bool {
        if let Some(items) = self.items.get_mut(&batch_id) {
            if let Some(item) = items
                .iter_mut()
                .find(|i| i.id == item_id && i.status == ItemStatus::Pending)
            {
                item.status = ItemStatus::OnHold;
                item.on_hold_reason = Some(reason.to_string());
                return true;
            }
        }
        false
    }

    /// Release a held item back to pending.
    pub fn release_item(&mut self, batch_id: BatchId, item_id: PayoutItemId) -> bool {
        if let Some(items) = self.items.get_mut(&batch_id) {
            if let Some(item) = items
                .iter_mut()
                .find(|i| i.id == item_id && i.status == ItemStatus::OnHold)
            {
                item.status = ItemStatus::Pending;
                item.on_hold_reason = None;
                return true;
            }
        }
        false
    }

    // ── Processing ───────────────────────────────────────────────────

    /// Process an approved batch.
    ///
    /// The `Pending -> Processing` transition here is the
    /// double-processing guard: any other starting status is rejected
    /// without side effects.
    pub fn process(
        &mut self,
        batch_id: BatchId,
        ledger: &mut Ledger,
        rail: &dyn SettlementRail,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, PayoutError> {
        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or(PayoutError::BatchNotFound(batch_id))?;
        if !batch.status.can_transition(BatchStatus::Processing) {
            return Err(PayoutError::InvalidBatchState {
                batch: batch_id,
                status: batch.status,
                operation: "process",
            });
        }
        batch.status = BatchStatus::Processing;
        batch.started_at = Some(now);

        let (settled, failures) = self.run_items(batch_id, ledger, rail, now);
        Ok(self.finish(batch_id, settled, failures, now))
    }

    /// Resume a batch stranded in `Processing` after a crash.
    ///
    /// Already-settled items are skipped; items caught mid-attempt are
    /// marked failed for manual reconciliation; remaining pending items
    /// are settled normally.
    pub fn resume(
        &mut self,
        batch_id: BatchId,
        ledger: &mut Ledger,
        rail: &dyn SettlementRail,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, PayoutError> {
        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or(PayoutError::BatchNotFound(batch_id))?;
        if batch.status != BatchStatus::Processing {
            return Err(PayoutError::InvalidBatchState {
                batch: batch_id,
                status: batch.status,
                operation: "resume",
            });
        }

        if let Some(items) = self.items.get_mut(&batch_id) {
            for item in items
                .iter_mut()
                .filter(|i| i.status == ItemStatus::Processing)
            {
                item.status = ItemStatus::Failed;
                item.retry_count += 1;
                item.last_error =
                    Some("settlement interrupted; requires manual reconciliation".to_string());
            }
        }

        let (settled, failures) = self.run_items(batch_id, ledger, rail, now);
        Ok(self.finish(batch_id, settled, failures, now))
    }

    /// Settle every pending item, checkpointing counters between
    /// chunks. Failures are isolated per item.
    fn run_items(
        &mut self,
        batch_id: BatchId,
        ledger: &mut Ledger,
        rail: &dyn SettlementRail,
        now: DateTime<Utc>,
    ) -> (Vec<SettledItem>, Vec<ItemFailure>) {
        let total = self.items.get(&batch_id).map(Vec::len).unwrap_or(0);
        let mut settled = Vec::new();
        let mut failures = Vec::new();

        let mut index = 0;
        while index < total {
            let end = (index + self.chunk_size).min(total);
            for i in index..end {
                let Some((item_id, publisher, net, destination)) =
                    self.items.get_mut(&batch_id).and_then(|items| {
                        let item = items.get_mut(i)?;
                        if item.status != ItemStatus::Pending {
                            return None;
                        }
                        item.status = ItemStatus::Processing;
                        Some((
                            item.id,
                            item.publisher,
                            item.net_amount,
                            item.payout_destination.clone(),
                        ))
                    })
                else {
                    continue;
                };

                // Rail first: a rail failure must leave the balance
                // untouched.
                let attempt = rail
                    .settle(publisher, net, destination.as_deref())
                    .map_err(|e| e.to_string())
                    .and_then(|receipt| {
                        ledger
                            .settle_payout(
                                publisher,
                                net,
                                Reference::new("payout_item", item_id),
                                format!("Payout batch {batch_id}"),
                                now,
                            )
                            .map(|_| receipt)
                            .map_err(|e| e.to_string())
                    });

                if let Some(items) = self.items.get_mut(&batch_id) {
                    if let Some(item) = items.get_mut(i) {
                        match attempt {
                            Ok(receipt) => {
                                item.status = ItemStatus::Completed;
                                item.processed_at = Some(now);
                                item.settlement = Some(receipt.clone());
                                settled.push(SettledItem {
                                    item: item_id,
                                    publisher,
                                    amount: net,
                                    receipt,
                                });
                            }
                            Err(error) => {
                                item.status = ItemStatus::Failed;
                                item.retry_count += 1;
                                item.last_error = Some(error.clone());
                                tracing::warn!(
                                    batch = %batch_id,
                                    item = %item_id,
                                    publisher = %publisher,
                                    error,
                                    "payout item failed"
                                );
                                failures.push(ItemFailure {
                                    item: item_id,
                                    publisher,
                                    error,
                                });
                            }
                        }
                    }
                }
            }
            index = end;
            self.checkpoint(batch_id);
        }

        (settled, failures)
    }

    /// Persist derived counters onto the batch between chunks.
    fn checkpoint(&mut self, batch_id: BatchId) {
        let (success, failed, pending) = self
            .items
            .get(&batch_id)
            .map(|items| {
                let mut counts = (0usize, 0usize, 0usize);
                for item in items {
                    match item.status {
                        ItemStatus::Completed => counts.0 += 1,
                        ItemStatus::Failed => counts.1 += 1,
                        ItemStatus::Pending | ItemStatus::Processing => counts.2 += 1,
                        _ => {}
                    }
                }
                counts
            })
            .unwrap_or((0, 0, 0));

        if let Some(batch) = self.batches.get_mut(&batch_id) {
            batch.success_count = success;
            batch.failed_count = failed;
            batch.pending_count = pending;
            tracing::debug!(batch = %batch_id, success, failed, pending, "chunk checkpoint");
        }
    }

    /// Derive the final batch status and outcome from item results.
    fn finish(
        &mut self,
        batch_id: BatchId,
        settled: Vec<SettledItem>,
        failures: Vec<ItemFailure>,
        now: DateTime<Utc>,
    ) -> BatchOutcome {
        self.checkpoint(batch_id);

        let (status, success_count, failed_count) = {
            let batch = match self.batches.get_mut(&batch_id) {
                Some(b) => b,
                None => {
                    // Unreachable: callers verified the batch exists.
                    return BatchOutcome {
                        batch: batch_id,
                        status: BatchStatus::Failed,
                        success_count: 0,
                        failed_count: 0,
                        settled,
                        failures,
                    };
                }
            };
            batch.pending_count = 0;
            batch.error_summary = failures
                .iter()
                .map(|f| BatchItemError {
                    publisher: f.publisher,
                    error: f.error.clone(),
                })
                .collect();

            // Partial success still completes; only a total wipeout
            // fails the batch.
            let status = if batch.failed_count > 0 && batch.success_count == 0 {
                BatchStatus::Failed
            } else {
                BatchStatus::Completed
            };
            batch.status = status;
            batch.completed_at = Some(now);
            (status, batch.success_count, batch.failed_count)
        };

        tracing::info!(
            batch = %batch_id,
            %status,
            success_count,
            failed_count,
            "batch processing finished"
        );
        BatchOutcome {
            batch: batch_id,
            status,
            success_count,
            failed_count,
            settled,
            failures,
        }
    }

    /// Mark an empty scheduled batch completed with a note.
    pub fn complete_empty(
        &mut self,
        batch_id: BatchId,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<PayoutBatch, PayoutError> {
        let batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or(PayoutError::BatchNotFound(batch_id))?;
        if batch.status != BatchStatus::Draft || batch.total_payouts != 0 {
            return Err(PayoutError::InvalidBatchState {
                batch: batch_id,
                status: batch.status,
                operation: "complete_empty",
            });
        }
        batch.status = BatchStatus::Completed;
        batch.processing_notes = Some(note.to_string());
        batch.completed_at = Some(now);
        Ok(batch.clone())
    }

    // ── Persistence support ──────────────────────────────────────────

    /// All batches, for persistence mirroring.
    pub fn iter_batches(&self) -> impl Iterator<Item = &PayoutBatch> {
        self.batches.values()
    }

    /// Restore a batch and its items from the persistence mirror.
    pub fn restore(&mut self, batch: PayoutBatch, items: Vec<PayoutItem>) {
        self.items.insert(batch.id, items);
        self.batches.insert(batch.id, batch);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mmkt_ledger::TransactionFilter;

    use crate::orders::InMemoryOrderFeed;
    use crate::rail::{InMemoryDirectory, RailError, StubRail};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 9, 0, 0).unwrap()
    }

    fn amount(s: &str) -> Amount {
        Amount::parse(s).unwrap()
    }

    /// Rail that rejects settlements for chosen publishers.
    struct FlakyRail {
        failing: Vec<PublisherId>,
    }

    impl SettlementRail for FlakyRail {
        fn name(&self) -> &str {
            "flaky"
        }

        fn settle(
            &self,
            publisher: PublisherId,
            _amount: Amount,
            _destination: Option<&str>,
        ) -> Result<SettlementReceipt, RailError> {
            if self.failing.contains(&publisher) {
                return Err(RailError::Network("connection reset".to_string()));
            }
            Ok(SettlementReceipt {
                method: "flaky".to_string(),
                reference: format!("flaky-{publisher}"),
            })
        }
    }

    fn funded_publisher(ledger: &mut Ledger, available: &str) -> PublisherId {
        let publisher = PublisherId::new();
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
        publisher
    }

    fn draft_batch(book: &mut PayoutBook) -> BatchId {
        book.create_batch(
            BatchType::Manual,
            now() - chrono::Duration::days(30),
            now(),
            Some(UserId::new()),
            now(),
        )
        .id
    }

    // ── Populate ─────────────────────────────────────────────────────

    #[test]
    fn populate_selects_eligible_and_snapshots_orders() {
        let mut ledger = Ledger::new();
        let mut book = PayoutBook::new();
        let mut feed = InMemoryOrderFeed::new();
        let mut directory = InMemoryDirectory::new();

        let rich = funded_publisher(&mut ledger, "120.00");
        funded_publisher(&mut ledger, "10.00"); // below the minimum
        directory.set(rich, "stripe", "acct_rich");
        let module = mmkt_core::ModuleId::new();
        feed.add_line(rich, "ord-1", module, amount("120.00"), now() - chrono::Duration::days(3));

        let batch_id = draft_batch(&mut book);
        let items = book
            .populate(batch_id, amount("50.00"), &ledger, &feed, &directory)
            .unwrap();

        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.publisher, rich);
        assert_eq!(item.net_amount, amount("120.00"));
        assert_eq!(item.gross_amount, amount("120.00"));
        assert!(item.platform_fee.is_zero());
        assert_eq!(item.order_count, 1);
        assert_eq!(item.payout_method.as_deref(), Some("stripe"));
        assert_eq!(item.payout_destination.as_deref(), Some("acct_rich"));

        let batch = book.get(batch_id).unwrap();
        assert_eq!(batch.total_payouts, 1);
        assert_eq!(batch.total_net, amount("120.00"));
        assert!(batch.total_fees.is_zero());
        assert_eq!(batch.pending_count, 1);
    }

    #[test]
    fn populate_requires_draft() {
        let ledger = Ledger::new();
        let mut book = PayoutBook::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let batch_id = draft_batch(&mut book);
        book.approve(batch_id, None, now()).unwrap();
        let err = book
            .populate(batch_id, amount("50.00"), &ledger, &feed, &directory)
            .unwrap_err();
        assert!(matches!(err, PayoutError::InvalidBatchState { .. }));
    }

    // ── Approve / cancel ─────────────────────────────────────────────

    #[test]
    fn approve_records_approver_and_requires_draft() {
        let mut book = PayoutBook::new();
        let batch_id = draft_batch(&mut book);
        let approver = UserId::new();

        let approved = book.approve(batch_id, Some(approver), now()).unwrap();
        assert_eq!(approved.status, BatchStatus::Pending);
        assert_eq!(approved.approved_by, Some(approver));
        assert_eq!(approved.approved_at, Some(now()));

        assert!(matches!(
            book.approve(batch_id, Some(approver), now()),
            Err(PayoutError::InvalidBatchState { .. })
        ));
    }

    #[test]
    fn cancel_cascades_to_items_from_draft_or_pending_only() {
        let mut ledger = Ledger::new();
        let mut book = PayoutBook::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        funded_publisher(&mut ledger, "100.00");
        let batch_id = draft_batch(&mut book);
        book.populate(batch_id, amount("50.00"), &ledger, &feed, &directory)
            .unwrap();

        let cancelled = book.cancel(batch_id, "wrong period", now()).unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);
        assert_eq!(cancelled.processing_notes.as_deref(), Some("wrong period"));
        assert!(book
            .items(batch_id)
            .iter()
            .all(|i| i.status == ItemStatus::Cancelled));

        // Terminal: cannot cancel again.
        assert!(matches!(
            book.cancel(batch_id, "again", now()),
            Err(PayoutError::InvalidBatchState { .. })
        ));
    }

    // ── Process ──────────────────────────────────────────────────────

    #[test]
    fn process_settles_items_and_debits_ledger() {
        let mut ledger = Ledger::new();
        let mut book = PayoutBook::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let publisher = funded_publisher(&mut ledger, "80.00");
        let batch_id = draft_batch(&mut book);
        book.populate(batch_id, amount("50.00"), &ledger, &feed, &directory)
            .unwrap();
        book.approve(batch_id, None, now()).unwrap();

        let outcome = book.process(batch_id, &mut ledger, &StubRail, now()).unwrap();
        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.failed_count, 0);
        assert_eq!(outcome.settled[0].amount, amount("80.00"));

        assert!(ledger.balance(publisher).unwrap().available.is_zero());
        let item = &book.items(batch_id)[0];
        assert_eq!(item.status, ItemStatus::Completed);
        assert!(item.settlement.is_some());
        assert_eq!(item.processed_at, Some(now()));
        assert!(ledger.verify_consistency(publisher));
    }

    #[test]
    fn partial_failure_completes_with_error_summary() {
        let mut ledger = Ledger::new();
        let mut book = PayoutBook::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let good = funded_publisher(&mut ledger, "100.00");
        let bad = funded_publisher(&mut ledger, "60.00");
        let batch_id = draft_batch(&mut book);
        book.populate(batch_id, amount("50.00"), &ledger, &feed, &directory)
            .unwrap();
        book.approve(batch_id, None, now()).unwrap();

        let rail = FlakyRail { failing: vec![bad] };
        let outcome = book.process(batch_id, &mut ledger, &rail, now()).unwrap();

        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.failed_count, 1);

        let batch = book.get(batch_id).unwrap();
        assert_eq!(batch.success_count, 1);
        assert_eq!(batch.failed_count, 1);
        assert_eq!(batch.pending_count, 0);
        assert_eq!(batch.error_summary.len(), 1);
        assert_eq!(batch.error_summary[0].publisher, bad);

        // The failing publisher's balance is untouched.
        assert_eq!(ledger.balance(bad).unwrap().available, amount("60.00"));
        assert!(ledger.balance(good).unwrap().available.is_zero());

        let failed_item = book
            .items(batch_id)
            .iter()
            .find(|i| i.publisher == bad)
            .unwrap();
        assert_eq!(failed_item.status, ItemStatus::Failed);
        assert_eq!(failed_item.retry_count, 1);
        assert!(failed_item.last_error.as_deref().unwrap().contains("connection reset"));
    }

    #[test]
    fn total_wipeout_fails_the_batch() {
        let mut ledger = Ledger::new();
        let mut book = PayoutBook::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let a = funded_publisher(&mut ledger, "100.00");
        let b = funded_publisher(&mut ledger, "60.00");
        let batch_id = draft_batch(&mut book);
        book.populate(batch_id, amount("50.00"), &ledger, &feed, &directory)
            .unwrap();
        book.approve(batch_id, None, now()).unwrap();

        let rail = FlakyRail {
            failing: vec![a, b],
        };
        let outcome = book.process(batch_id, &mut ledger, &rail, now()).unwrap();
        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.success_count, 0);
        assert_eq!(outcome.failed_count, 2);
    }

    #[test]
    fn process_rejects_wrong_state_without_side_effects() {
        let mut ledger = Ledger::new();
        let mut book = PayoutBook::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let publisher = funded_publisher(&mut ledger, "100.00");
        let batch_id = draft_batch(&mut book);
        book.populate(batch_id, amount("50.00"), &ledger, &feed, &directory)
            .unwrap();

        // Draft: not approved yet.
        assert!(matches!(
            book.process(batch_id, &mut ledger, &StubRail, now()),
            Err(PayoutError::InvalidBatchState { .. })
        ));

        book.approve(batch_id, None, now()).unwrap();
        book.process(batch_id, &mut ledger, &StubRail, now()).unwrap();

        // Terminal: double-processing is rejected and the ledger sees
        // no second debit.
        let before = ledger
            .transactions(publisher, &TransactionFilter::default())
            .len();
        assert!(matches!(
            book.process(batch_id, &mut ledger, &StubRail, now()),
            Err(PayoutError::InvalidBatchState { .. })
        ));
        let after = ledger
            .transactions(publisher, &TransactionFilter::default())
            .len();
        assert_eq!(before, after);
    }

    #[test]
    fn insufficient_balance_at_settlement_is_an_item_failure() {
        let mut ledger = Ledger::new();
        let mut book = PayoutBook::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let publisher = funded_publisher(&mut ledger, "100.00");
        let batch_id = draft_batch(&mut book);
        book.populate(batch_id, amount("50.00"), &ledger, &feed, &directory)
            .unwrap();
        book.approve(batch_id, None, now()).unwrap();

        // Balance drops between populate and process.
        ledger.reserve(publisher, amount("70.00"), "risk hold", now());

        let outcome = book.process(batch_id, &mut ledger, &StubRail, now()).unwrap();
        assert_eq!(outcome.failed_count, 1);
        assert_eq!(outcome.status, BatchStatus::Failed);
        let item = &book.items(batch_id)[0];
        assert!(item.last_error.as_deref().unwrap().contains("insufficient"));
    }

    #[test]
    fn on_hold_items_are_skipped() {
        let mut ledger = Ledger::new();
        let mut book = PayoutBook::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let held = funded_publisher(&mut ledger, "100.00");
        let paid = funded_publisher(&mut ledger, "60.00");
        let batch_id = draft_batch(&mut book);
        book.populate(batch_id, amount("50.00"), &ledger, &feed, &directory)
            .unwrap();
        let held_item = book
            .items(batch_id)
            .iter()
            .find(|i| i.publisher == held)
            .unwrap()
            .id;
        assert!(book.hold_item(batch_id, held_item, "fraud review"));
        book.approve(batch_id, None, now()).unwrap();

        let outcome = book.process(batch_id, &mut ledger, &StubRail, now()).unwrap();
        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.failed_count, 0);
        assert_eq!(ledger.balance(held).unwrap().available, amount("100.00"));
        assert!(ledger.balance(paid).unwrap().available.is_zero());

        let item = book
            .items(batch_id)
            .iter()
            .find(|i| i.id == held_item)
            .unwrap();
        assert_eq!(item.status, ItemStatus::OnHold);
    }

    #[test]
    fn chunked_processing_checkpoints_every_chunk() {
        let mut ledger = Ledger::new();
        let mut book = PayoutBook::with_chunk_size(2);
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        for _ in 0..5 {
            funded_publisher(&mut ledger, "60.00");
        }
        let batch_id = draft_batch(&mut book);
        book.populate(batch_id, amount("50.00"), &ledger, &feed, &directory)
            .unwrap();
        book.approve(batch_id, None, now()).unwrap();

        let outcome = book.process(batch_id, &mut ledger, &StubRail, now()).unwrap();
        assert_eq!(outcome.success_count, 5);
        assert_eq!(book.get(batch_id).unwrap().pending_count, 0);
    }

    #[test]
    fn resume_skips_settled_and_fails_interrupted_items() {
        let mut ledger = Ledger::new();
        let mut book = PayoutBook::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let done = funded_publisher(&mut ledger, "100.00");
        let interrupted = funded_publisher(&mut ledger, "60.00");
        let untouched = funded_publisher(&mut ledger, "70.00");
        let batch_id = draft_batch(&mut book);
        book.populate(batch_id, amount("50.00"), &ledger, &feed, &directory)
            .unwrap();
        book.approve(batch_id, None, now()).unwrap();

        // Simulate a crash mid-run: batch Processing, one item settled,
        // one caught mid-attempt, one still pending.
        {
            let batch = book.batches.get_mut(&batch_id).unwrap();
            batch.status = BatchStatus::Processing;
            let items = book.items.get_mut(&batch_id).unwrap();
            for item in items.iter_mut() {
                if item.publisher == done {
                    item.status = ItemStatus::Completed;
                } else if item.publisher == interrupted {
                    item.status = ItemStatus::Processing;
                }
            }
        }
        ledger
            .settle_payout(
                done,
                amount("100.00"),
                Reference::new("payout_item", "pre-crash"),
                "Payout batch".to_string(),
                now(),
            )
            .unwrap();

        let outcome = book.resume(batch_id, &mut ledger, &StubRail, now()).unwrap();

        // The settled item was not re-debited.
        assert!(ledger.balance(done).unwrap().available.is_zero());
        // The interrupted item is failed for manual reconciliation.
        let item = book
            .items(batch_id)
            .iter()
            .find(|i| i.publisher == interrupted)
            .unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.last_error.as_deref().unwrap().contains("interrupted"));
        // The untouched item settled normally.
        assert!(ledger.balance(untouched).unwrap().available.is_zero());
        assert_eq!(outcome.status, BatchStatus::Completed);

        // Resume on a non-processing batch is rejected.
        assert!(matches!(
            book.resume(batch_id, &mut ledger, &StubRail, now()),
            Err(PayoutError::InvalidBatchState { .. })
        ));
    }

    #[test]
    fn complete_empty_requires_empty_draft() {
        let mut book = PayoutBook::new();
        let batch_id = draft_batch(&mut book);
        let completed = book
            .complete_empty(batch_id, "No eligible publishers", now())
            .unwrap();
        assert_eq!(completed.status, BatchStatus::Completed);
        assert_eq!(
            completed.processing_notes.as_deref(),
            Some("No eligible publishers")
        );

        assert!(matches!(
            book.complete_empty(batch_id, "again", now()),
            Err(PayoutError::InvalidBatchState { .. })
        ));
    }

    // ── calculate_payout ─────────────────────────────────────────────

    #[test]
    fn calculate_payout_is_a_pure_projection() {
        let mut ledger = Ledger::new();
        let mut adjustments = AdjustmentManager::new();
        let mut feed = InMemoryOrderFeed::new();

        let publisher = funded_publisher(&mut ledger, "40.00");
        let module = mmkt_core::ModuleId::new();
        feed.add_line(publisher, "ord-1", module, amount("100.00"), now() - chrono::Duration::days(2));
        adjustments.create(
            publisher,
            mmkt_ledger::AdjustmentType::Bonus,
            amount("5.00"),
            "bonus".to_string(),
            UserId::new(),
            None,
            None,
            now(),
        );

        let calc = calculate_payout(
            publisher,
            now() - chrono::Duration::days(30),
            now(),
            FeeRate::from_bps(3000).unwrap(),
            &ledger,
            &adjustments,
            &feed,
        )
        .unwrap();

        assert_eq!(calc.gross_amount, amount("100.00"));
        assert_eq!(calc.platform_fee, amount("30.00"));
        assert_eq!(calc.adjustments, amount("5.00"));
        assert_eq!(calc.net_amount, amount("75.00"));
        assert_eq!(calc.order_count, 1);
        assert_eq!(calc.available_balance, amount("40.00"));

        // Nothing moved.
        assert_eq!(ledger.balance(publisher).unwrap().available, amount("40.00"));
    }
}
