//! Ledger domain errors.

use mmkt_core::{AdjustmentId, Amount, MoneyError, PublisherId};
use thiserror::Error;

use crate::adjustment::AdjustmentStatus;
use crate::balance::BalanceType;

/// Errors from ledger and adjustment operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The amount is not usable for this operation (zero or wrong sign).
    #[error("invalid amount {amount} for {operation}")]
    InvalidAmount {
        /// The offending amount.
        amount: Amount,
        /// Which operation rejected it.
        operation: &'static str,
    },

    /// The bucket does not hold enough to cover the debit.
    #[error("insufficient {balance_type} balance for {publisher}: requested {requested}, held {held}")]
    InsufficientBalance {
        /// The publisher.
        publisher: PublisherId,
        /// The bucket that came up short.
        balance_type: BalanceType,
        /// What the operation asked for.
        requested: Amount,
        /// What the bucket holds.
        held: Amount,
    },

    /// Monetary arithmetic failed (overflow).
    #[error(transparent)]
    Money(#[from] MoneyError),

    /// No adjustment with this id.
    #[error("adjustment not found: {0}")]
    AdjustmentNotFound(AdjustmentId),

    /// The adjustment is not pending, so it can be neither approved nor
    /// cancelled.
    #[error("adjustment {id} already {status}")]
    AdjustmentNotPending {
        /// The adjustment.
        id: AdjustmentId,
        /// Its actual status.
        status: AdjustmentStatus,
    },
}
