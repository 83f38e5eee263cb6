//! # mmkt-payout — Payout Batch Processor & Schedule Runner
//!
//! Settles publisher earnings in auditable batches. A batch groups one
//! payout item per eligible publisher for a period; items settle
//! independently against the external rail and the balance ledger, so
//! one failing publisher never blocks the rest of the batch.
//!
//! ## Batch state machine
//!
//! ```text
//! Draft ──▶ Pending ──▶ Processing ──▶ Completed
//!   │          │                  └──▶ Failed
//!   │          └──▶ Cancelled
//!   └──▶ Cancelled
//!   └──▶ Completed (empty scheduled batches only)
//! ```
//!
//! The `Pending → Processing` transition is the double-processing
//! guard: a second caller observing `Processing` or later is rejected.
//! Partial failure is a first-class outcome: per-item results are
//! aggregated into a [`BatchOutcome`] rather than mutated counters.
//!
//! ## Collaborators
//!
//! - [`OrderFeed`] — read-only completed-order totals per publisher for
//!   a period, snapshotted onto payout items.
//! - [`SettlementRail`] — the opaque external money rail; this crate
//!   records the returned reference and never interprets it.
//! - [`PublisherDirectory`] — payout method/destination snapshots.

pub mod batch;
pub mod error;
pub mod orders;
pub mod processor;
pub mod rail;
pub mod schedule;

pub use batch::{BatchStatus, BatchType, ItemStatus, PayoutBatch, PayoutItem};
pub use error::PayoutError;
pub use orders::{InMemoryOrderFeed, ModuleBreakdown, OrderFeed, PeriodOrders};
pub use processor::{BatchOutcome, ItemFailure, PayoutBook, PayoutCalculation, SettledItem};
pub use rail::{
    InMemoryDirectory, PayoutDestination, PublisherDirectory, RailError, SettlementReceipt,
    SettlementRail, StubRail,
};
pub use schedule::{Cadence, PayoutSchedule, ScheduleOutcome};
