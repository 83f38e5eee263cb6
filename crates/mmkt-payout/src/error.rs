//! Payout domain errors.

use mmkt_core::BatchId;
use thiserror::Error;

use crate::batch::BatchStatus;

/// Errors from batch and schedule operations.
///
/// Per-item settlement failures are NOT errors at this level — they are
/// captured on the item and aggregated into the batch outcome. These
/// variants are the deterministic domain-rule violations.
#[derive(Error, Debug)]
pub enum PayoutError {
    /// No batch with this id.
    #[error("payout batch not found: {0}")]
    BatchNotFound(BatchId),

    /// The batch is in the wrong state for the requested operation.
    /// This is also the double-processing guard: `process` on a batch
    /// already `Processing` or terminal lands here.
    #[error("batch {batch} is {status}, cannot {operation}")]
    InvalidBatchState {
        /// The batch.
        batch: BatchId,
        /// Its actual status.
        status: BatchStatus,
        /// The rejected operation.
        operation: &'static str,
    },

    /// Ledger rejected an operation outside the per-item loop.
    #[error(transparent)]
    Ledger(#[from] mmkt_ledger::LedgerError),
}
