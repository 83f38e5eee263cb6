//! # Application State
//!
//! [`AppState`] is shared with every handler via the `State` extractor.
//! It holds the in-memory core behind a single `parking_lot::RwLock`
//! and an optional Postgres pool used as a write-through mirror.
//!
//! ## Atomicity model
//!
//! The in-memory [`MarketCore`] is the runtime system of record. Every
//! logical operation is one write-locked call into the core, which
//! makes multi-record updates (balance + transaction rows, activation
//! + license counter, batch + items) atomic and serializes racing
//! callers — the write lock is the row-lock analogue for the instance
//! counter and the batch `Pending → Processing` guard.
//!
//! The lock is never held across an `.await`: handlers mutate the core
//! synchronously, release the lock, then mirror the returned records
//! into Postgres.

use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::PgPool;

use mmkt_core::FeeRate;
use mmkt_ledger::{AdjustmentManager, Ledger};
use mmkt_license::LicenseRegistry;
use mmkt_payout::{
    InMemoryDirectory, InMemoryOrderFeed, PayoutBook, PayoutSchedule, SettlementRail, StubRail,
};

use crate::auth::SecretToken;

/// Server configuration built from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen port.
    pub port: u16,
    /// API secret; `None` runs the server open (development mode).
    pub auth_token: Option<SecretToken>,
    /// Platform fee rate applied when recording earnings.
    pub fee_rate: FeeRate,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            // 30% platform fee unless configured otherwise.
            fee_rate: FeeRate::from_bps(3000).unwrap_or(FeeRate::ZERO),
        }
    }
}

/// The in-memory core: every domain service plus its collaborators.
pub struct MarketCore {
    /// License registry and activation tracker.
    pub registry: LicenseRegistry,
    /// Balance ledger.
    pub ledger: Ledger,
    /// Manual adjustments.
    pub adjustments: AdjustmentManager,
    /// Payout batches and items.
    pub book: PayoutBook,
    /// The single payout schedule, if configured.
    pub schedule: Option<PayoutSchedule>,
    /// Completed-order feed collaborator.
    pub orders: InMemoryOrderFeed,
    /// Publisher payout destinations.
    pub directory: InMemoryDirectory,
    /// The settlement rail.
    pub rail: Box<dyn SettlementRail + Send + Sync>,
}

impl Default for MarketCore {
    fn default() -> Self {
        Self {
            registry: LicenseRegistry::new(),
            ledger: Ledger::new(),
            adjustments: AdjustmentManager::new(),
            book: PayoutBook::new(),
            schedule: None,
            orders: InMemoryOrderFeed::new(),
            directory: InMemoryDirectory::new(),
            rail: Box::new(StubRail),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The in-memory core behind its single write lock.
    pub core: Arc<RwLock<MarketCore>>,
    /// Optional Postgres mirror.
    pub db: Option<PgPool>,
    /// Server configuration.
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build state from configuration, an optional pool, and a core.
    pub fn new(config: AppConfig, db: Option<PgPool>, core: MarketCore) -> Self {
        Self {
            core: Arc::new(RwLock::new(core)),
            db,
            config: Arc::new(config),
        }
    }

    /// Hydrate the in-memory core from the Postgres mirror. No-op when
    /// no pool is configured.
    pub async fn hydrate_from_db(&self) -> Result<(), sqlx::Error> {
        let Some(pool) = &self.db else {
            return Ok(());
        };

        let licenses = crate::db::licenses::load_all(pool).await?;
        let balances = crate::db::ledger::load_balances(pool).await?;
        let transactions = crate::db::ledger::load_transactions(pool).await?;
        let batches = crate::db::payouts::load_batches(pool).await?;
        let adjustments = crate::db::payouts::load_adjustments(pool).await?;
        let schedule = crate::db::payouts::load_schedule(pool).await?;

        let mut core = self.core.write();
        for (license, rows) in licenses {
            core.registry.restore(license, rows);
        }
        let mut by_publisher: std::collections::HashMap<_, Vec<_>> =
            std::collections::HashMap::new();
        for txn in transactions {
            by_publisher.entry(txn.publisher).or_default().push(txn);
        }
        for balance in balances {
            let rows = by_publisher.remove(&balance.publisher).unwrap_or_default();
            core.ledger.restore(balance, rows);
        }
        for (batch, items) in batches {
            core.book.restore(batch, items);
        }
        for adjustment in adjustments {
            core.adjustments.restore(adjustment);
        }
        core.schedule = schedule;

        tracing::info!("in-memory core hydrated from database");
        Ok(())
    }
}
