//! # Fixed-Point Money
//!
//! All monetary amounts in the settlement core are expressed in the
//! smallest currency unit (cents) as an `i64` wrapped in [`Amount`].
//! This avoids floating-point representation issues in ledger arithmetic:
//! a balance that survives thousands of credits and debits must reproduce
//! to the cent when replayed from its transaction log.
//!
//! Fee rates are basis points ([`FeeRate`]), so a 30% platform fee is
//! `FeeRate::from_bps(3000)` and fee computation stays in integer space.
//!
//! Amounts cross the API boundary as 2-decimal strings (`"70.00"`),
//! parsed and formatted here. Parsing uses checked arithmetic and rejects
//! overflow rather than silently capping.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from monetary parsing and arithmetic.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MoneyError {
    /// The input string is not a parseable decimal amount.
    #[error("invalid amount: {0:?}")]
    InvalidAmount(String),

    /// The amount overflows the representable range of i64 cents.
    #[error("amount out of range: {0:?}")]
    OutOfRange(String),

    /// Arithmetic on two amounts overflowed.
    #[error("amount arithmetic overflow")]
    Overflow,
}

// ─── Amount ──────────────────────────────────────────────────────────

/// A signed monetary amount in minor units (cents).
///
/// `Amount` is `Copy` and totally ordered. Arithmetic is checked: the
/// ledger must fail loudly on overflow, never wrap.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    /// The zero amount.
    pub const ZERO: Amount = Amount(0);

    /// Construct from raw minor units (cents).
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// The raw value in minor units.
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Whether this amount is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Whether this amount is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Whether this amount is strictly negative.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Amount) -> Result<Amount, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(MoneyError::Overflow)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Amount) -> Result<Amount, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or(MoneyError::Overflow)
    }

    /// Negation. `i64::MIN` is unrepresentable when negated and maps to
    /// an overflow error.
    pub fn checked_neg(self) -> Result<Amount, MoneyError> {
        self.0.checked_neg().map(Amount).ok_or(MoneyError::Overflow)
    }

    /// Absolute value, saturating at `i64::MAX`.
    pub fn abs(self) -> Amount {
        Amount(self.0.saturating_abs())
    }

    /// The smaller of two amounts.
    pub fn min(self, other: Amount) -> Amount {
        Amount(self.0.min(other.0))
    }

    /// Parse a 2-decimal amount string into minor units.
    ///
    /// `"100.50"` → 10050 cents, `"100"` → 10000 cents, `"-0.01"` → -1.
    /// Fractional digits beyond two are truncated; overflow is rejected
    /// rather than capped.
    pub fn parse(s: &str) -> Result<Amount, MoneyError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MoneyError::InvalidAmount(s.to_string()));
        }

        if let Some(dot_pos) = s.find('.') {
            let integer_part = s[..dot_pos]
                .parse::<i64>()
                .map_err(|_| MoneyError::InvalidAmount(s.to_string()))?;
            let frac_str = &s[dot_pos + 1..];
            if !frac_str.chars().all(|c| c.is_ascii_digit()) {
                return Err(MoneyError::InvalidAmount(s.to_string()));
            }

            // Pad or truncate to exactly 2 decimal places.
            let frac_cents = match frac_str.len() {
                0 => 0i64,
                1 => {
                    frac_str
                        .parse::<i64>()
                        .map_err(|_| MoneyError::InvalidAmount(s.to_string()))?
                        * 10
                }
                2 => frac_str
                    .parse::<i64>()
                    .map_err(|_| MoneyError::InvalidAmount(s.to_string()))?,
                _ => frac_str[..2]
                    .parse::<i64>()
                    .map_err(|_| MoneyError::InvalidAmount(s.to_string()))?,
            };

            let sign: i64 = if integer_part < 0 || s.starts_with('-') {
                -1
            } else {
                1
            };

            integer_part
                .abs()
                .checked_mul(100)
                .and_then(|v| v.checked_add(frac_cents))
                .map(|v| Amount(sign * v))
                .ok_or_else(|| MoneyError::OutOfRange(s.to_string()))
        } else {
            // No decimal point — whole units.
            s.parse::<i64>()
                .map_err(|_| MoneyError::InvalidAmount(s.to_string()))?
                .checked_mul(100)
                .map(Amount)
                .ok_or_else(|| MoneyError::OutOfRange(s.to_string()))
        }
    }
}

impl std::fmt::Display for Amount {
    /// Render as a 2-decimal string: 10050 → `100.50`, -1 → `-0.01`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

// ─── FeeRate ─────────────────────────────────────────────────────────

/// A platform fee rate in basis points (1 bps = 0.01%).
///
/// A 30% platform fee is 3000 bps. Rates are bounded to [0, 10000] at
/// construction so a fee can never exceed the gross it is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeRate(u32);

impl FeeRate {
    /// The zero rate.
    pub const ZERO: FeeRate = FeeRate(0);

    /// Construct from basis points. Values above 10000 (100%) are rejected.
    pub fn from_bps(bps: u32) -> Result<FeeRate, MoneyError> {
        if bps > 10_000 {
            return Err(MoneyError::OutOfRange(format!("{bps} bps")));
        }
        Ok(FeeRate(bps))
    }

    /// The raw basis-point value.
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Compute the fee this rate takes from a gross amount.
    ///
    /// `fee = gross × bps / 10000`, truncated toward zero in integer
    /// cents. `fee_of` on a negative gross is a caller bug and returns
    /// an overflow error rather than a negative fee.
    pub fn fee_of(&self, gross: Amount) -> Result<Amount, MoneyError> {
        if gross.is_negative() {
            return Err(MoneyError::OutOfRange(gross.to_string()));
        }
        gross
            .cents()
            .checked_mul(i64::from(self.0))
            .map(|v| Amount(v / 10_000))
            .ok_or(MoneyError::Overflow)
    }
}

impl std::fmt::Display for FeeRate {
    /// Render as a percentage: 3000 bps → `30.00%`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
