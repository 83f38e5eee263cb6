//! # Completed-Order Feed
//!
//! The payout processor never owns order data. It consumes a read-only
//! feed of completed orders grouped by publisher for a period, and
//! snapshots the result onto payout items so every settlement records
//! what it paid for. The trait seam keeps the order subsystem an
//! external collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mmkt_core::{Amount, ModuleId, PublisherId};

/// Per-module share of a publisher's completed orders in a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleBreakdown {
    /// The module.
    pub module: ModuleId,
    /// Gross order value attributed to the module.
    pub amount: Amount,
    /// Number of order lines.
    pub count: usize,
}

/// A publisher's completed orders for a period, as reported by the
/// order subsystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodOrders {
    /// Distinct completed order ids.
    pub order_ids: Vec<String>,
    /// Total gross order value.
    pub gross_amount: Amount,
    /// Gross value and line counts per module.
    pub module_breakdown: Vec<ModuleBreakdown>,
}

impl PeriodOrders {
    /// Number of distinct orders.
    pub fn order_count(&self) -> usize {
        self.order_ids.len()
    }
}

/// Read-only view of the order subsystem.
pub trait OrderFeed {
    /// Completed orders for `publisher` with completion time in
    /// `[period_start, period_end)`.
    fn completed_orders(
        &self,
        publisher: PublisherId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> PeriodOrders;
}

// ─── In-memory feed ──────────────────────────────────────────────────

/// An order line as fed into the in-memory feed.
#[derive(Debug, Clone)]
struct FeedLine {
    publisher: PublisherId,
    order_id: String,
    module: ModuleId,
    amount: Amount,
    completed_at: DateTime<Utc>,
}

/// In-memory [`OrderFeed`] used by tests and by deployments where the
/// order subsystem pushes completed lines into this process.
#[derive(Debug, Default)]
pub struct InMemoryOrderFeed {
    lines: Vec<FeedLine>,
}

impl InMemoryOrderFeed {
    /// Create an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed order line.
    pub fn add_line(
        &mut self,
        publisher: PublisherId,
        order_id: &str,
        module: ModuleId,
        amount: Amount,
        completed_at: DateTime<Utc>,
    ) {
        self.lines.push(FeedLine {
            publisher,
            order_id: order_id.to_string(),
            module,
            amount,
            completed_at,
        });
    }
}

impl OrderFeed for InMemoryOrderFeed {
    fn completed_orders(
        &self,
        publisher: PublisherId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> PeriodOrders {
        let mut out = PeriodOrders::default();
        let mut gross = 0i64;

        for line in self.lines.iter().filter(|l| {
            l.publisher == publisher
                && l.completed_at >= period_start
                && l.completed_at < period_end
        }) {
            gross += line.amount.cents();
            if !out.order_ids.contains(&line.order_id) {
                out.order_ids.push(line.order_id.clone());
            }
            match out
                .module_breakdown
                .iter_mut()
                .find(|b| b.module == line.module)
            {
                Some(entry) => {
                    entry.amount = Amount::from_cents(entry.amount.cents() + line.amount.cents());
                    entry.count += 1;
                }
                None => out.module_breakdown.push(ModuleBreakdown {
                    module: line.module,
                    amount: line.amount,
                    count: 1,
                }),
            }
        }

        out.gross_amount = Amount::from_cents(gross);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn groups_by_module_and_dedupes_orders() {
        let publisher = PublisherId::new();
        let module_a = ModuleId::new();
        let module_b = ModuleId::new();
        let mut feed = InMemoryOrderFeed::new();

        feed.add_line(publisher, "ord-1", module_a, Amount::parse("10.00").unwrap(), at(5));
        feed.add_line(publisher, "ord-1", module_b, Amount::parse("5.00").unwrap(), at(5));
        feed.add_line(publisher, "ord-2", module_a, Amount::parse("10.00").unwrap(), at(10));

        let orders = feed.completed_orders(publisher, at(1), at(30));
        assert_eq!(orders.order_count(), 2);
        assert_eq!(orders.gross_amount, Amount::parse("25.00").unwrap());
        assert_eq!(orders.module_breakdown.len(), 2);
        let a = orders
            .module_breakdown
            .iter()
            .find(|b| b.module == module_a)
            .unwrap();
        assert_eq!(a.amount, Amount::parse("20.00").unwrap());
        assert_eq!(a.count, 2);
    }

    #[test]
    fn period_bounds_are_half_open() {
        let publisher = PublisherId::new();
        let module = ModuleId::new();
        let mut feed = InMemoryOrderFeed::new();
        feed.add_line(publisher, "ord-1", module, Amount::parse("10.00").unwrap(), at(1));
        feed.add_line(publisher, "ord-2", module, Amount::parse("10.00").unwrap(), at(15));

        let orders = feed.completed_orders(publisher, at(1), at(15));
        assert_eq!(orders.order_ids, vec!["ord-1".to_string()]);
    }

    #[test]
    fn other_publishers_are_invisible() {
        let mut feed = InMemoryOrderFeed::new();
        feed.add_line(
            PublisherId::new(),
            "ord-1",
            ModuleId::new(),
            Amount::parse("10.00").unwrap(),
            at(5),
        );
        let orders = feed.completed_orders(PublisherId::new(), at(1), at(30));
        assert_eq!(orders.order_count(), 0);
        assert!(orders.gross_amount.is_zero());
    }
}
