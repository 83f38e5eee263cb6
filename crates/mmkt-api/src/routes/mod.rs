//! Route modules.

pub mod licenses;
pub mod payouts;
