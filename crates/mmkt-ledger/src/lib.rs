//! # mmkt-ledger — Publisher Balance Ledger
//!
//! Owns the money half of the marketplace core: one balance record per
//! publisher (available / pending / reserved), the append-only
//! transaction log, and manually authorized adjustments.
//!
//! ## Ledger discipline
//!
//! Every balance mutation happens inside one `&mut self` call that
//! computes before/after, applies the delta, and appends the matching
//! transaction rows — a balance can never move without its row, and a
//! row is never written without its balance move. Operations that shift
//! money between two balance buckets write one row per bucket, so the
//! sum of a publisher's rows against any bucket always equals that
//! bucket's current value and replaying the log from zero reproduces
//! the balances exactly.
//!
//! No bucket may go negative. Insufficient funds is a recoverable
//! "declined" outcome (`None`) on the reserve path and a typed error on
//! the settlement path — never a panic, never a negative balance.

pub mod adjustment;
pub mod balance;
pub mod error;
pub mod ledger;
pub mod transaction;

pub use adjustment::{Adjustment, AdjustmentFilter, AdjustmentManager, AdjustmentStatus, AdjustmentType};
pub use balance::{BalanceType, PublisherBalance};
pub use error::LedgerError;
pub use ledger::{EarningsSummary, Ledger, ReplayedBalances, TransactionFilter};
pub use transaction::{BalanceTransaction, Reference, TransactionType};
