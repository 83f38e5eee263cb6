//! # Publisher Balances
//!
//! One record per publisher, created lazily on first earning or query.
//! Money sits in exactly one of three buckets: `available` (withdrawable),
//! `pending` (held after sale), `reserved` (frozen against chargeback
//! risk). Buckets are individually non-negative at all times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mmkt_core::{Amount, PublisherId};

/// Which balance bucket a transaction touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceType {
    /// Withdrawable funds.
    Available,
    /// Earnings in the hold period.
    Pending,
    /// Frozen against chargeback/refund risk.
    Reserved,
}

impl std::fmt::Display for BalanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::Pending => f.write_str("pending"),
            Self::Reserved => f.write_str("reserved"),
        }
    }
}

/// A publisher's money, split into the three buckets, plus lifetime
/// counters and auto-payout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherBalance {
    /// The publisher this record belongs to.
    pub publisher: PublisherId,
    /// Withdrawable funds.
    pub available: Amount,
    /// Earnings still in the hold period.
    pub pending: Amount,
    /// Funds frozen against chargeback risk.
    pub reserved: Amount,
    /// Net earnings credited over the account's lifetime.
    pub lifetime_earnings: Amount,
    /// Total settled out over the account's lifetime.
    pub lifetime_payouts: Amount,
    /// Net manual adjustments over the account's lifetime.
    pub lifetime_adjustments: Amount,
    /// Last time an earning was credited.
    pub last_earning_at: Option<DateTime<Utc>>,
    /// Last time a payout was settled.
    pub last_payout_at: Option<DateTime<Utc>>,
    /// Whether this publisher is selected into automatic payout batches.
    pub auto_payout_enabled: bool,
    /// Per-publisher minimum payout override, if set.
    pub payout_threshold: Option<Amount>,
}

impl PublisherBalance {
    /// A fresh zeroed record with auto-payout enabled.
    pub fn new(publisher: PublisherId) -> Self {
        Self {
            publisher,
            available: Amount::ZERO,
            pending: Amount::ZERO,
            reserved: Amount::ZERO,
            lifetime_earnings: Amount::ZERO,
            lifetime_payouts: Amount::ZERO,
            lifetime_adjustments: Amount::ZERO,
            last_earning_at: None,
            last_payout_at: None,
            auto_payout_enabled: true,
            payout_threshold: None,
        }
    }

    /// Read one bucket.
    pub fn bucket(&self, balance_type: BalanceType) -> Amount {
        match balance_type {
            BalanceType::Available => self.available,
            BalanceType::Pending => self.pending,
            BalanceType::Reserved => self.reserved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_balance_is_zeroed_with_auto_payout() {
        let balance = PublisherBalance::new(PublisherId::new());
        assert!(balance.available.is_zero());
        assert!(balance.pending.is_zero());
        assert!(balance.reserved.is_zero());
        assert!(balance.auto_payout_enabled);
        assert!(balance.payout_threshold.is_none());
    }

    #[test]
    fn bucket_reads_the_right_field() {
        let mut balance = PublisherBalance::new(PublisherId::new());
        balance.available = Amount::from_cents(100);
        balance.pending = Amount::from_cents(200);
        balance.reserved = Amount::from_cents(300);
        assert_eq!(balance.bucket(BalanceType::Available), Amount::from_cents(100));
        assert_eq!(balance.bucket(BalanceType::Pending), Amount::from_cents(200));
        assert_eq!(balance.bucket(BalanceType::Reserved), Amount::from_cents(300));
    }
}
