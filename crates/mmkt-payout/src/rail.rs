//! # Settlement Rail Adapters
//!
//! Defines the [`SettlementRail`] trait for external payment rail
//! integrations. The batch processor is rail-agnostic: it hands an
//! amount and a destination to the rail and records the returned
//! [`SettlementReceipt`] verbatim. The reference string is opaque to
//! this core — reconciliation against the rail happens elsewhere.
//!
//! Methods are synchronous: no adapter in this workspace performs I/O
//! directly; production adapters wrap their own client and block the
//! calling worker, which processes items one at a time by design.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mmkt_core::{Amount, PublisherId};

/// Errors from settlement rail operations.
///
/// These are the per-item infrastructure failures of the error model:
/// caught by the processor, recorded on the item, never propagated as a
/// batch-level error.
#[derive(Error, Debug)]
pub enum RailError {
    /// The rail adapter has not been configured for this environment.
    #[error("settlement rail not configured: {0}")]
    NotConfigured(String),

    /// The rail rejected the instruction (invalid account, sanctions
    /// hit, destination closed).
    #[error("settlement rejected by {rail}: {reason}")]
    Rejected {
        /// Which rail rejected the instruction.
        rail: String,
        /// Human-readable rejection reason.
        reason: String,
    },

    /// Network or connectivity failure talking to the rail.
    #[error("settlement rail network error: {0}")]
    Network(String),
}

/// The opaque proof of settlement returned by a rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// Rail/method name (e.g. `"stripe"`, `"bank_transfer"`).
    pub method: String,
    /// External reference on the rail. Recorded, never interpreted.
    pub reference: String,
}

/// One external payment rail.
pub trait SettlementRail {
    /// The rail's name, used as the receipt method.
    fn name(&self) -> &str;

    /// Push `amount` to the publisher's destination on this rail.
    fn settle(
        &self,
        publisher: PublisherId,
        amount: Amount,
        destination: Option<&str>,
    ) -> Result<SettlementReceipt, RailError>;
}

/// Always-succeeding rail for development and internal-ledger-only
/// deployments. Mints a fresh reference per settlement.
#[derive(Debug, Default)]
pub struct StubRail;

impl SettlementRail for StubRail {
    fn name(&self) -> &str {
        "internal"
    }

    fn settle(
        &self,
        publisher: PublisherId,
        amount: Amount,
        _destination: Option<&str>,
    ) -> Result<SettlementReceipt, RailError> {
        let reference = format!("internal-{}", uuid::Uuid::new_v4());
        tracing::debug!(publisher = %publisher, %amount, reference, "stub settlement");
        Ok(SettlementReceipt {
            method: self.name().to_string(),
            reference,
        })
    }
}

// ─── Publisher directory ─────────────────────────────────────────────

/// A publisher's payout method and destination, snapshotted onto items
/// at batch population time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutDestination {
    /// Method tag (e.g. `"stripe"`, `"paypal"`, `"bank_transfer"`).
    pub method: String,
    /// Account id, IBAN, or email on that method.
    pub destination: String,
}

/// Lookup of publisher payout settings. The publisher profile itself
/// is an external collaborator; this core only needs the destination.
pub trait PublisherDirectory {
    /// The publisher's configured payout destination, if any.
    fn payout_destination(&self, publisher: PublisherId) -> Option<PayoutDestination>;
}

/// In-memory [`PublisherDirectory`].
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    destinations: std::collections::HashMap<PublisherId, PayoutDestination>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a publisher's destination.
    pub fn set(&mut self, publisher: PublisherId, method: &str, destination: &str) {
        self.destinations.insert(
            publisher,
            PayoutDestination {
                method: method.to_string(),
                destination: destination.to_string(),
            },
        );
    }
}

impl PublisherDirectory for InMemoryDirectory {
    fn payout_destination(&self, publisher: PublisherId) -> Option<PayoutDestination> {
        self.destinations.get(&publisher).cloned()
    }
}
