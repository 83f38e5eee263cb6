//! # mmkt-core — Shared Primitives for the Marketplace Settlement Core
//!
//! Foundation crate for the module-marketplace entitlement and settlement
//! stack. Provides the two things every other crate needs and none may
//! reinvent:
//!
//! - [`money`] — fixed-point monetary arithmetic. All amounts are `i64`
//!   minor units (cents); fee rates are basis points. Floating point is
//!   banned from every money path.
//! - [`id`] — typed identifiers for publishers, users, modules, licenses,
//!   and settlement records. Each is a UUID newtype with a prefixed
//!   display form, so a batch id can never be passed where an adjustment
//!   id is expected.

pub mod id;
pub mod money;

pub use id::{
    ActivationId, AdjustmentId, BatchId, LicenseId, ModuleId, PayoutItemId, PublisherId,
    TransactionId, UserId,
};
pub use money::{Amount, FeeRate, MoneyError};
