//! # Payout Schedule
//!
//! Decides when an unattended payout batch should be created and run.
//! At most one schedule is active; the runner is invoked by an external
//! trigger (cron, admin endpoint) and is not a self-driving loop.
//!
//! A due run creates a batch for the period since the last run (30-day
//! lookback on the first run), populates it with the schedule's
//! minimum, and — if any items resulted — approves and processes it
//! immediately. The run markers (`last_run_at`, `next_run_at`) advance
//! on every due invocation regardless of settlement outcome: a failed
//! run must not wedge the schedule.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use mmkt_core::Amount;
use mmkt_ledger::Ledger;

use crate::batch::BatchType;
use crate::error::PayoutError;
use crate::orders::OrderFeed;
use crate::processor::{BatchOutcome, PayoutBook};
use crate::rail::{PublisherDirectory, SettlementRail};

/// How often scheduled payouts run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Every week on `day_of_week`.
    Weekly,
    /// Every two weeks on `day_of_week`.
    Biweekly,
    /// Every month on `day_of_month`.
    Monthly,
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weekly => f.write_str("weekly"),
            Self::Biweekly => f.write_str("biweekly"),
            Self::Monthly => f.write_str("monthly"),
        }
    }
}

/// Result of a due schedule run.
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    /// The batch created by this run.
    pub batch: mmkt_core::BatchId,
    /// The processing outcome; `None` when the batch was empty.
    pub outcome: Option<BatchOutcome>,
    /// When the schedule will fire next.
    pub next_run_at: DateTime<Utc>,
}

/// The (single) payout schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutSchedule {
    /// Run cadence.
    pub cadence: Cadence,
    /// Day of week for weekly/biweekly runs (0 = Monday … 6 = Sunday).
    pub day_of_week: u32,
    /// Day of month for monthly runs; clamped to 1..=28 so every month
    /// has the day.
    pub day_of_month: u32,
    /// Minimum available balance for a publisher to be selected.
    pub minimum_amount: Amount,
    /// UTC hour at which runs fire.
    pub processing_hour: u32,
    /// Whether the schedule fires at all.
    pub active: bool,
    /// Last due run.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next due run.
    pub next_run_at: Option<DateTime<Utc>>,
}

impl PayoutSchedule {
    /// Create an active schedule and compute its first `next_run_at`.
    pub fn new(
        cadence: Cadence,
        day_of_week: u32,
        day_of_month: u32,
        minimum_amount: Amount,
        processing_hour: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let mut schedule = Self {
            cadence,
            day_of_week: day_of_week.min(6),
            day_of_month: day_of_month.clamp(1, 28),
            minimum_amount,
            processing_hour: processing_hour.min(23),
            active: true,
            last_run_at: None,
            next_run_at: None,
        };
        schedule.next_run_at = Some(schedule.next_run_after(now));
        schedule
    }

    /// Compute the next run strictly after `now`.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let next_date = match self.cadence {
            Cadence::Weekly | Cadence::Biweekly => {
                let today = now.weekday().num_days_from_monday() as i64;
                let target = i64::from(self.day_of_week);
                let mut days_ahead = target - today;
                if days_ahead <= 0 {
                    days_ahead += match self.cadence {
                        Cadence::Weekly => 7,
                        _ => 14,
                    };
                }
                (now + Duration::days(days_ahead)).date_naive()
            }
            Cadence::Monthly => {
                let dom = self.day_of_month;
                if now.day() < dom {
                    now.date_naive().with_day(dom).unwrap_or(now.date_naive())
                } else {
                    let (year, month) = if now.month() == 12 {
                        (now.year() + 1, 1)
                    } else {
                        (now.year(), now.month() + 1)
                    };
                    chrono::NaiveDate::from_ymd_opt(year, month, dom)
                        .unwrap_or(now.date_naive())
                }
            }
        };

        // Hour is clamped to a valid value, so and_hms_opt cannot fail.
        next_date
            .and_hms_opt(self.processing_hour.min(23), 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(now)
    }

    /// Whether a run is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_run_at.map_or(true, |next| now >= next)
    }

    /// Run the schedule if due.
    ///
    /// Returns `None` when inactive or not yet due. On a due run the
    /// run markers always advance, even when every settlement fails —
    /// the failures live on the batch, not the schedule.
    pub fn run_if_due(
        &mut self,
        book: &mut PayoutBook,
        ledger: &mut Ledger,
        rail: &dyn SettlementRail,
        orders: &dyn OrderFeed,
        directory: &dyn PublisherDirectory,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleOutcome>, PayoutError> {
        if !self.is_due(now) {
            return Ok(None);
        }

        let period_start = self
            .last_run_at
            .unwrap_or_else(|| now - Duration::days(30));
        let batch = book.create_batch(BatchType::Regular, period_start, now, None, now);

        let run: Result<Option<BatchOutcome>, PayoutError> = (|| {
            let items = book.populate(batch.id, self.minimum_amount, ledger, orders, directory)?;
            if items.is_empty() {
                book.complete_empty(batch.id, "No eligible publishers", now)?;
                return Ok(None);
            }
            book.approve(batch.id, None, now)?;
            Ok(Some(book.process(batch.id, ledger, rail, now)?))
        })();

        // Advance the run markers before surfacing any error.
        self.last_run_at = Some(now);
        let next_run_at = self.next_run_after(now);
        self.next_run_at = Some(next_run_at);

        tracing::info!(
            batch = %batch.id,
            next_run_at = %next_run_at,
            "scheduled payout run finished"
        );
        run.map(|outcome| {
            Some(ScheduleOutcome {
                batch: batch.id,
                outcome,
                next_run_at,
            })
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mmkt_core::{FeeRate, PublisherId};

    use crate::batch::BatchStatus;
    use crate::orders::InMemoryOrderFeed;
    use crate::rail::{InMemoryDirectory, RailError, SettlementReceipt, StubRail};

    fn amount(s: &str) -> Amount {
        Amount::parse(s).unwrap()
    }

    /// 2026-06-15 is a Monday.
    fn monday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    fn weekly_friday() -> PayoutSchedule {
        // Friday = 4, 09:00 UTC, $50 minimum.
        PayoutSchedule::new(Cadence::Weekly, 4, 1, amount("50.00"), 9, monday_noon())
    }

    // ── next_run_after ───────────────────────────────────────────────

    #[test]
    fn weekly_next_run_is_upcoming_friday() {
        let schedule = weekly_friday();
        let next = schedule.next_run_after(monday_noon());
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 6, 19, 9, 0, 0).unwrap());
    }

    #[test]
    fn weekly_on_the_day_rolls_a_full_week() {
        let schedule = weekly_friday();
        let friday = Utc.with_ymd_and_hms(2026, 6, 19, 9, 0, 0).unwrap();
        assert_eq!(
            schedule.next_run_after(friday),
            Utc.with_ymd_and_hms(2026, 6, 26, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn biweekly_rolls_two_weeks() {
        let schedule =
            PayoutSchedule::new(Cadence::Biweekly, 0, 1, amount("50.00"), 9, monday_noon());
        // Monday noon, target Monday: on/past the day, so two weeks out.
        assert_eq!(
            schedule.next_run_after(monday_noon()),
            Utc.with_ymd_and_hms(2026, 6, 29, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn monthly_this_month_when_day_ahead() {
        let schedule =
            PayoutSchedule::new(Cadence::Monthly, 0, 20, amount("50.00"), 9, monday_noon());
        assert_eq!(
            schedule.next_run_after(monday_noon()),
            Utc.with_ymd_and_hms(2026, 6, 20, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn monthly_rolls_to_next_month_and_year() {
        let schedule =
            PayoutSchedule::new(Cadence::Monthly, 0, 10, amount("50.00"), 9, monday_noon());
        assert_eq!(
            schedule.next_run_after(monday_noon()),
            Utc.with_ymd_and_hms(2026, 7, 10, 9, 0, 0).unwrap()
        );

        let december = Utc.with_ymd_and_hms(2026, 12, 20, 12, 0, 0).unwrap();
        assert_eq!(
            schedule.next_run_after(december),
            Utc.with_ymd_and_hms(2027, 1, 10, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn day_of_month_is_clamped_to_28() {
        let schedule =
            PayoutSchedule::new(Cadence::Monthly, 0, 31, amount("50.00"), 9, monday_noon());
        assert_eq!(schedule.day_of_month, 28);
    }

    // ── run_if_due ───────────────────────────────────────────────────

    fn funded_publisher(ledger: &mut Ledger, available: &str, now: DateTime<Utc>) -> PublisherId {
        let publisher = PublisherId::new();
        ledger
            .add_earning(
                publisher,
                amount(available),
                FeeRate::ZERO,
                None,
                None,
                false,
                now,
            )
            .unwrap();
        publisher
    }

    #[test]
    fn not_due_does_nothing() {
        let mut schedule = weekly_friday();
        let mut book = PayoutBook::new();
        let mut ledger = Ledger::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let result = schedule
            .run_if_due(
                &mut book,
                &mut ledger,
                &StubRail,
                &feed,
                &directory,
                monday_noon(),
            )
            .unwrap();
        assert!(result.is_none());
        assert!(book.list(None).is_empty());
        assert!(schedule.last_run_at.is_none());
    }

    #[test]
    fn inactive_schedule_never_fires() {
        let mut schedule = weekly_friday();
        schedule.active = false;
        schedule.next_run_at = None; // would otherwise be immediately due
        let mut book = PayoutBook::new();
        let mut ledger = Ledger::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let result = schedule
            .run_if_due(
                &mut book,
                &mut ledger,
                &StubRail,
                &feed,
                &directory,
                monday_noon(),
            )
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn due_run_creates_populates_and_processes() {
        let mut schedule = weekly_friday();
        let due_at = schedule.next_run_at.unwrap();
        let mut book = PayoutBook::new();
        let mut ledger = Ledger::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let publisher = funded_publisher(&mut ledger, "80.00", monday_noon());

        let outcome = schedule
            .run_if_due(&mut book, &mut ledger, &StubRail, &feed, &directory, due_at)
            .unwrap()
            .unwrap();

        let batch = book.get(outcome.batch).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.success_count, 1);
        // First run looks back 30 days.
        assert_eq!(batch.period_start, due_at - Duration::days(30));
        assert!(ledger.balance(publisher).unwrap().available.is_zero());

        assert_eq!(schedule.last_run_at, Some(due_at));
        assert_eq!(schedule.next_run_at, Some(schedule.next_run_after(due_at)));
        assert_eq!(outcome.outcome.unwrap().success_count, 1);
    }

    #[test]
    fn empty_run_completes_batch_with_note_and_advances() {
        let mut schedule = weekly_friday();
        let due_at = schedule.next_run_at.unwrap();
        let mut book = PayoutBook::new();
        let mut ledger = Ledger::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        let outcome = schedule
            .run_if_due(&mut book, &mut ledger, &StubRail, &feed, &directory, due_at)
            .unwrap()
            .unwrap();

        assert!(outcome.outcome.is_none());
        let batch = book.get(outcome.batch).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(
            batch.processing_notes.as_deref(),
            Some("No eligible publishers")
        );
        assert_eq!(schedule.last_run_at, Some(due_at));
    }

    #[test]
    fn failed_settlements_do_not_wedge_the_schedule() {
        struct DeadRail;
        impl crate::rail::SettlementRail for DeadRail {
            fn name(&self) -> &str {
                "dead"
            }
            fn settle(
                &self,
                _publisher: PublisherId,
                _amount: Amount,
                _destination: Option<&str>,
            ) -> Result<SettlementReceipt, RailError> {
                Err(RailError::NotConfigured("no credentials".to_string()))
            }
        }

        let mut schedule = weekly_friday();
        let due_at = schedule.next_run_at.unwrap();
        let mut book = PayoutBook::new();
        let mut ledger = Ledger::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();
        funded_publisher(&mut ledger, "80.00", monday_noon());

        let outcome = schedule
            .run_if_due(&mut book, &mut ledger, &DeadRail, &feed, &directory, due_at)
            .unwrap()
            .unwrap();

        let batch_outcome = outcome.outcome.unwrap();
        assert_eq!(batch_outcome.status, BatchStatus::Failed);
        assert_eq!(batch_outcome.failed_count, 1);

        // Markers advanced anyway.
        assert_eq!(schedule.last_run_at, Some(due_at));
        assert!(schedule.next_run_at.unwrap() > due_at);
    }

    #[test]
    fn second_run_uses_last_run_as_period_start() {
        let mut schedule = weekly_friday();
        let first_due = schedule.next_run_at.unwrap();
        let mut book = PayoutBook::new();
        let mut ledger = Ledger::new();
        let feed = InMemoryOrderFeed::new();
        let directory = InMemoryDirectory::new();

        schedule
            .run_if_due(&mut book, &mut ledger, &StubRail, &feed, &directory, first_due)
            .unwrap();

        let second_due = schedule.next_run_at.unwrap();
        let outcome = schedule
            .run_if_due(
                &mut book,
                &mut ledger,
                &StubRail,
                &feed,
                &directory,
                second_due,
            )
            .unwrap()
            .unwrap();

        let batch = book.get(outcome.batch).unwrap();
        assert_eq!(batch.period_start, first_due);
        assert_eq!(batch.period_end, second_due);
    }
}
