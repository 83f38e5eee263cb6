//! # Payout Administration API
//!
//! Authenticated (admin) surface over the balance ledger, adjustment
//! manager, batch processor, and payout schedule. Monetary values cross
//! this boundary as 2-decimal strings and are parsed with the
//! fixed-point parser — no floats anywhere.
//!
//! Every mutating handler follows the same shape: one write-locked call
//! into the core, then a mirror write to Postgres from the records the
//! core returned.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use mmkt_core::{AdjustmentId, Amount, BatchId, FeeRate, ModuleId, PublisherId};
use mmkt_ledger::{
    Adjustment, AdjustmentFilter, AdjustmentStatus, AdjustmentType, BalanceTransaction,
    PublisherBalance, Reference, TransactionFilter, TransactionType,
};
use mmkt_payout::{
    processor, BatchStatus, BatchType, Cadence, ModuleBreakdown, PayoutBatch, PayoutItem,
    PayoutSchedule,
};

use crate::auth::Caller;
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, Validate};
use crate::state::AppState;

/// Default minimum payout when a batch is populated without one.
const DEFAULT_MINIMUM_PAYOUT: &str = "50.00";

fn parse_amount_field(value: &str, field: &str) -> Result<Amount, AppError> {
    Amount::parse(value).map_err(|e| AppError::Validation(format!("{field}: {e}")))
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A publisher balance as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub publisher_id: Uuid,
    pub available: String,
    pub pending: String,
    pub reserved: String,
    /// available + pending.
    pub total: String,
    pub lifetime_earnings: String,
    pub lifetime_payouts: String,
    pub lifetime_adjustments: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_earning_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_payout_at: Option<DateTime<Utc>>,
    pub auto_payout_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_threshold: Option<String>,
}

impl From<&PublisherBalance> for BalanceResponse {
    fn from(b: &PublisherBalance) -> Self {
        let total = Amount::from_cents(b.available.cents() + b.pending.cents());
        Self {
            publisher_id: *b.publisher.as_uuid(),
            available: b.available.to_string(),
            pending: b.pending.to_string(),
            reserved: b.reserved.to_string(),
            total: total.to_string(),
            lifetime_earnings: b.lifetime_earnings.to_string(),
            lifetime_payouts: b.lifetime_payouts.to_string(),
            lifetime_adjustments: b.lifetime_adjustments.to_string(),
            last_earning_at: b.last_earning_at,
            last_payout_at: b.last_payout_at,
            auto_payout_enabled: b.auto_payout_enabled,
            payout_threshold: b.payout_threshold.map(|a| a.to_string()),
        }
    }
}

/// A balance transaction as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub publisher_id: Uuid,
    pub transaction_type: String,
    pub amount: String,
    pub balance_type: String,
    pub balance_before: String,
    pub balance_after: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceDto>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Reference tag on a transaction or adjustment.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReferenceDto {
    pub kind: String,
    pub id: String,
}

impl From<&BalanceTransaction> for TransactionResponse {
    fn from(t: &BalanceTransaction) -> Self {
        Self {
            id: *t.id.as_uuid(),
            publisher_id: *t.publisher.as_uuid(),
            transaction_type: t.transaction_type.to_string(),
            amount: t.amount.to_string(),
            balance_type: t.balance_type.to_string(),
            balance_before: t.balance_before.to_string(),
            balance_after: t.balance_after.to_string(),
            reference: t.reference.as_ref().map(|r| ReferenceDto {
                kind: r.kind.clone(),
                id: r.id.clone(),
            }),
            description: t.description.clone(),
            created_at: t.created_at,
        }
    }
}

/// A payout batch as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BatchResponse {
    pub id: Uuid,
    pub batch_type: String,
    pub status: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_payouts: usize,
    pub total_gross: String,
    pub total_fees: String,
    pub total_net: String,
    pub success_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,
    pub error_summary: Vec<BatchErrorDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One entry of a batch error summary.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BatchErrorDto {
    pub publisher_id: Uuid,
    pub error: String,
}

impl From<&PayoutBatch> for BatchResponse {
    fn from(b: &PayoutBatch) -> Self {
        Self {
            id: *b.id.as_uuid(),
            batch_type: b.batch_type.to_string(),
            status: b.status.to_string(),
            period_start: b.period_start,
            period_end: b.period_end,
            total_payouts: b.total_payouts,
            total_gross: b.total_gross.to_string(),
            total_fees: b.total_fees.to_string(),
            total_net: b.total_net.to_string(),
            success_count: b.success_count,
            failed_count: b.failed_count,
            pending_count: b.pending_count,
            error_summary: b
                .error_summary
                .iter()
                .map(|e| BatchErrorDto {
                    publisher_id: *e.publisher.as_uuid(),
                    error: e.error.clone(),
                })
                .collect(),
            processing_notes: b.processing_notes.clone(),
            created_at: b.created_at,
            approved_at: b.approved_at,
            started_at: b.started_at,
            completed_at: b.completed_at,
        }
    }
}

/// A payout item as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ItemResponse {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub publisher_id: Uuid,
    pub gross_amount: String,
    pub platform_fee: String,
    pub net_amount: String,
    pub status: String,
    pub order_count: usize,
    pub order_ids: Vec<String>,
    pub module_breakdown: Vec<BreakdownDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_reference: Option<String>,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

/// Per-module share of a payout item.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BreakdownDto {
    pub module_id: Uuid,
    pub amount: String,
    pub count: usize,
}

impl From<&ModuleBreakdown> for BreakdownDto {
    fn from(b: &ModuleBreakdown) -> Self {
        Self {
            module_id: *b.module.as_uuid(),
            amount: b.amount.to_string(),
            count: b.count,
        }
    }
}

impl From<&PayoutItem> for ItemResponse {
    fn from(i: &PayoutItem) -> Self {
        Self {
            id: *i.id.as_uuid(),
            batch_id: *i.batch.as_uuid(),
            publisher_id: *i.publisher.as_uuid(),
            gross_amount: i.gross_amount.to_string(),
            platform_fee: i.platform_fee.to_string(),
            net_amount: i.net_amount.to_string(),
            status: i.status.to_string(),
            order_count: i.order_count,
            order_ids: i.order_ids.clone(),
            module_breakdown: i.module_breakdown.iter().map(BreakdownDto::from).collect(),
            payout_method: i.payout_method.clone(),
            payout_destination: i.payout_destination.clone(),
            settlement_method: i.settlement.as_ref().map(|s| s.method.clone()),
            settlement_reference: i.settlement.as_ref().map(|s| s.reference.clone()),
            retry_count: i.retry_count,
            last_error: i.last_error.clone(),
            processed_at: i.processed_at,
        }
    }
}

/// An adjustment as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AdjustmentResponse {
    pub id: Uuid,
    pub publisher_id: Uuid,
    pub adjustment_type: String,
    pub amount: String,
    pub description: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceDto>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

impl From<&Adjustment> for AdjustmentResponse {
    fn from(a: &Adjustment) -> Self {
        Self {
            id: *a.id.as_uuid(),
            publisher_id: *a.publisher.as_uuid(),
            adjustment_type: a.adjustment_type.to_string(),
            amount: a.amount.to_string(),
            description: a.description.clone(),
            status: a.status.to_string(),
            reference: a.reference.as_ref().map(|r| ReferenceDto {
                kind: r.kind.clone(),
                id: r.id.clone(),
            }),
            created_by: *a.created_by.as_uuid(),
            created_at: a.created_at,
            approved_by: a.approved_by.map(|u| *u.as_uuid()),
            approved_at: a.approved_at,
            applied_at: a.applied_at,
        }
    }
}

/// The payout schedule as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ScheduleResponse {
    pub cadence: String,
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub minimum_amount: String,
    pub processing_hour: u32,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl From<&PayoutSchedule> for ScheduleResponse {
    fn from(s: &PayoutSchedule) -> Self {
        Self {
            cadence: s.cadence.to_string(),
            day_of_week: s.day_of_week,
            day_of_month: s.day_of_month,
            minimum_amount: s.minimum_amount.to_string(),
            processing_hour: s.processing_hour,
            active: s.active,
            last_run_at: s.last_run_at,
            next_run_at: s.next_run_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Request to credit a completed sale into a publisher's balance.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordEarningRequest {
    pub publisher_id: Uuid,
    /// Gross sale amount; the platform fee comes off here.
    pub gross_amount: String,
    /// Fee override in basis points; defaults to the configured rate.
    pub fee_rate_bps: Option<u32>,
    /// Completed order reference, recorded on the transaction and in
    /// the period order feed.
    pub order_ref: Option<String>,
    /// Module the sale was for (enables the per-module breakdown).
    pub module_id: Option<Uuid>,
    /// Credit pending (hold period, default) or directly to available.
    pub to_pending: Option<bool>,
}

impl Validate for RecordEarningRequest {
    fn validate(&self) -> Result<(), String> {
        Amount::parse(&self.gross_amount)
            .map_err(|e| format!("gross_amount: {e}"))
            .and_then(|a| {
                if a.is_positive() {
                    Ok(())
                } else {
                    Err("gross_amount must be positive".to_string())
                }
            })?;
        if let Some(bps) = self.fee_rate_bps {
            FeeRate::from_bps(bps).map_err(|e| format!("fee_rate_bps: {e}"))?;
        }
        Ok(())
    }
}

/// Request to release pending funds.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReleaseRequest {
    /// Amount to release; omitted releases the full pending balance.
    pub amount: Option<String>,
}

/// Query parameters for transaction history.
#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    pub transaction_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Query parameters for the earnings summary.
#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    /// `day`, `week`, `month` (default), or `year`.
    pub period: Option<String>,
}

/// Request to create a payout batch.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBatchRequest {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl Validate for CreateBatchRequest {
    fn validate(&self) -> Result<(), String> {
        if self.period_end <= self.period_start {
            return Err("period_end must be after period_start".to_string());
        }
        Ok(())
    }
}

/// Query parameters for the batch list.
#[derive(Debug, Default, Deserialize)]
pub struct BatchListQuery {
    pub status: Option<String>,
}

/// Request to populate a batch.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PopulateRequest {
    /// Minimum available balance for selection; defaults to 50.00.
    pub minimum_amount: Option<String>,
}

/// Request to cancel a batch.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelBatchRequest {
    pub reason: String,
}

/// Query parameters for the payout preview.
#[derive(Debug, Deserialize)]
pub struct CalculateQuery {
    pub publisher_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Request to create an adjustment.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAdjustmentRequest {
    pub publisher_id: Uuid,
    /// `refund`, `chargeback`, `bonus`, `correction`, or `fee`.
    pub adjustment_type: String,
    /// Signed amount: positive credits, negative debits.
    pub amount: String,
    pub description: String,
    pub reference_kind: Option<String>,
    pub reference_id: Option<String>,
    pub internal_notes: Option<String>,
}

impl Validate for CreateAdjustmentRequest {
    fn validate(&self) -> Result<(), String> {
        let amount = Amount::parse(&self.amount).map_err(|e| format!("amount: {e}"))?;
        if amount.is_zero() {
            return Err("amount must not be zero".to_string());
        }
        if parse_adjustment_type(&self.adjustment_type).is_none() {
            return Err(
                "adjustment_type must be one of: refund, chargeback, bonus, correction, fee"
                    .to_string(),
            );
        }
        if self.description.trim().is_empty() {
            return Err("description must not be empty".to_string());
        }
        Ok(())
    }
}

/// Query parameters for the adjustment list.
#[derive(Debug, Default, Deserialize)]
pub struct AdjustmentListQuery {
    pub publisher_id: Option<Uuid>,
    pub status: Option<String>,
    pub adjustment_type: Option<String>,
}

/// Request to create (replace) the payout schedule.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateScheduleRequest {
    /// `weekly`, `biweekly`, or `monthly`.
    pub cadence: String,
    /// 0 = Monday … 6 = Sunday; weekly/biweekly cadences.
    pub day_of_week: Option<u32>,
    /// 1–28; monthly cadence.
    pub day_of_month: Option<u32>,
    /// Minimum payout; defaults to 50.00.
    pub minimum_amount: Option<String>,
    /// UTC hour runs fire at; defaults to 9.
    pub processing_hour: Option<u32>,
}

impl Validate for CreateScheduleRequest {
    fn validate(&self) -> Result<(), String> {
        if parse_cadence(&self.cadence).is_none() {
            return Err("cadence must be one of: weekly, biweekly, monthly".to_string());
        }
        if let Some(dow) = self.day_of_week {
            if dow > 6 {
                return Err("day_of_week must be 0-6".to_string());
            }
        }
        if let Some(dom) = self.day_of_month {
            if !(1..=28).contains(&dom) {
                return Err("day_of_month must be 1-28".to_string());
            }
        }
        if let Some(hour) = self.processing_hour {
            if hour > 23 {
                return Err("processing_hour must be 0-23".to_string());
            }
        }
        if let Some(amount) = &self.minimum_amount {
            Amount::parse(amount).map_err(|e| format!("minimum_amount: {e}"))?;
        }
        Ok(())
    }
}

/// Result of a manual schedule run.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ScheduleRunResponse {
    /// Whether a run was due and executed.
    pub ran: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Ledger audit result for one publisher.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuditResponse {
    pub consistent: bool,
    pub replayed_available: String,
    pub replayed_pending: String,
    pub replayed_reserved: String,
    pub current_available: String,
    pub current_pending: String,
    pub current_reserved: String,
}

fn parse_adjustment_type(s: &str) -> Option<AdjustmentType> {
    match s {
        "refund" => Some(AdjustmentType::Refund),
        "chargeback" => Some(AdjustmentType::Chargeback),
        "bonus" => Some(AdjustmentType::Bonus),
        "correction" => Some(AdjustmentType::Correction),
        "fee" => Some(AdjustmentType::Fee),
        _ => None,
    }
}

fn parse_adjustment_status(s: &str) -> Option<AdjustmentStatus> {
    match s {
        "pending" => Some(AdjustmentStatus::Pending),
        "applied" => Some(AdjustmentStatus::Applied),
        "cancelled" => Some(AdjustmentStatus::Cancelled),
        _ => None,
    }
}

fn parse_batch_status(s: &str) -> Option<BatchStatus> {
    match s {
        "draft" => Some(BatchStatus::Draft),
        "pending" => Some(BatchStatus::Pending),
        "processing" => Some(BatchStatus::Processing),
        "completed" => Some(BatchStatus::Completed),
        "failed" => Some(BatchStatus::Failed),
        "cancelled" => Some(BatchStatus::Cancelled),
        _ => None,
    }
}

fn parse_cadence(s: &str) -> Option<Cadence> {
    match s {
        "weekly" => Some(Cadence::Weekly),
        "biweekly" => Some(Cadence::Biweekly),
        "monthly" => Some(Cadence::Monthly),
        _ => None,
    }
}

fn parse_transaction_type(s: &str) -> Option<TransactionType> {
    match s {
        "sale" => Some(TransactionType::Sale),
        "release" => Some(TransactionType::Release),
        "reserve" => Some(TransactionType::Reserve),
        "forfeit" => Some(TransactionType::Forfeit),
        "payout" => Some(TransactionType::Payout),
        "adjustment" => Some(TransactionType::Adjustment),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Construct the payout administration router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/payouts/earnings", post(record_earning))
        .route("/v1/payouts/balance/{publisher}", get(get_balance))
        .route("/v1/payouts/balance/{publisher}/release", post(release_pending))
        .route(
            "/v1/payouts/balance/{publisher}/transactions",
            get(list_transactions),
        )
        .route("/v1/payouts/balance/{publisher}/summary", get(earnings_summary))
        .route("/v1/payouts/balance/{publisher}/audit", get(audit_balance))
        .route("/v1/payouts/batches", get(list_batches).post(create_batch))
        .route("/v1/payouts/batches/{id}", get(get_batch))
        .route("/v1/payouts/batches/{id}/items", get(list_batch_items))
        .route("/v1/payouts/batches/{id}/populate", post(populate_batch))
        .route("/v1/payouts/batches/{id}/approve", post(approve_batch))
        .route("/v1/payouts/batches/{id}/process", post(process_batch))
        .route("/v1/payouts/batches/{id}/cancel", post(cancel_batch))
        .route("/v1/payouts/calculate", get(calculate_payout))
        .route(
            "/v1/payouts/adjustments",
            get(list_adjustments).post(create_adjustment),
        )
        .route(
            "/v1/payouts/adjustments/{id}/approve",
            post(approve_adjustment),
        )
        .route(
            "/v1/payouts/adjustments/{id}/cancel",
            post(cancel_adjustment),
        )
        .route(
            "/v1/payouts/schedule",
            get(get_schedule).post(create_schedule),
        )
        .route("/v1/payouts/schedule/run", post(run_schedule))
}

// ---------------------------------------------------------------------------
// Mirror helpers
// ---------------------------------------------------------------------------

async fn mirror_ledger(
    state: &AppState,
    balance: Option<PublisherBalance>,
    transactions: Vec<BalanceTransaction>,
) {
    let Some(pool) = &state.db else { return };
    if let Some(balance) = balance {
        if let Err(e) = crate::db::ledger::upsert_balance(pool, &balance).await {
            tracing::error!(error = %e, publisher = %balance.publisher, "balance mirror write failed");
        }
    }
    if let Err(e) = crate::db::ledger::insert_transactions(pool, &transactions).await {
        tracing::error!(error = %e, "transaction mirror write failed");
    }
}

async fn mirror_batch(state: &AppState, batch: Option<(PayoutBatch, Vec<PayoutItem>)>) {
    let (Some(pool), Some((batch, items))) = (&state.db, batch) else {
        return;
    };
    if let Err(e) = crate::db::payouts::upsert_batch(pool, &batch, &items).await {
        tracing::error!(error = %e, batch = %batch.id, "batch mirror write failed");
    }
}

async fn mirror_adjustment(state: &AppState, adjustment: &Adjustment) {
    let Some(pool) = &state.db else { return };
    if let Err(e) = crate::db::payouts::upsert_adjustment(pool, adjustment).await {
        tracing::error!(error = %e, adjustment = %adjustment.id, "adjustment mirror write failed");
    }
}

async fn mirror_schedule(state: &AppState, schedule: &PayoutSchedule) {
    let Some(pool) = &state.db else { return };
    if let Err(e) = crate::db::payouts::upsert_schedule(pool, schedule).await {
        tracing::error!(error = %e, "schedule mirror write failed");
    }
}

/// Snapshot a publisher's balance and the tail of the transaction log
/// after a mutation, for mirroring.
fn ledger_snapshot(
    core: &crate::state::MarketCore,
    publisher: PublisherId,
    since: usize,
) -> (Option<PublisherBalance>, Vec<BalanceTransaction>) {
    let balance = core.ledger.balance(publisher).cloned();
    let transactions = core
        .ledger
        .iter_transactions()
        .skip(since)
        .filter(|t| t.publisher == publisher)
        .cloned()
        .collect();
    (balance, transactions)
}

// ---------------------------------------------------------------------------
// Balance handlers
// ---------------------------------------------------------------------------

/// POST /v1/payouts/earnings — credit a completed sale.
///
/// The ingestion point for the order collaborator: fee comes off at
/// the configured (or overridden) rate and the net lands in pending.
async fn record_earning(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<RecordEarningRequest>, JsonRejection>,
) -> Result<Json<TransactionResponse>, AppError> {
    caller.require_admin()?;
    let req = extract_validated_json(body)?;
    let publisher = PublisherId::from_uuid(req.publisher_id);
    let gross = parse_amount_field(&req.gross_amount, "gross_amount")?;
    let fee_rate = match req.fee_rate_bps {
        Some(bps) => FeeRate::from_bps(bps)
            .map_err(|e| AppError::Validation(format!("fee_rate_bps: {e}")))?,
        None => state.config.fee_rate,
    };
    let reference = req
        .order_ref
        .as_deref()
        .map(|id| Reference::new("order", id));
    let now = Utc::now();

    let (txn, balance, transactions) = {
        let mut core = state.core.write();
        let mark = core.ledger.iter_transactions().count();
        let txn = core.ledger.add_earning(
            publisher,
            gross,
            fee_rate,
            reference,
            None,
            req.to_pending.unwrap_or(true),
            now,
        )?;
        // Feed the order line into the period snapshot collaborator.
        if let (Some(order_ref), Some(module)) = (&req.order_ref, req.module_id) {
            core.orders.add_line(
                publisher,
                order_ref,
                ModuleId::from_uuid(module),
                gross,
                now,
            );
        }
        let (balance, transactions) = ledger_snapshot(&core, publisher, mark);
        (txn, balance, transactions)
    };

    mirror_ledger(&state, balance, transactions).await;
    Ok(Json(TransactionResponse::from(&txn)))
}

/// GET /v1/payouts/balance/{publisher} — balance summary.
async fn get_balance(
    State(state): State<AppState>,
    caller: Caller,
    Path(publisher): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    caller.require_admin()?;
    let publisher = PublisherId::from_uuid(publisher);
    let mut core = state.core.write();
    let balance = core.ledger.get_or_create(publisher);
    Ok(Json(BalanceResponse::from(balance)))
}

/// POST /v1/payouts/balance/{publisher}/release — pending → available.
async fn release_pending(
    State(state): State<AppState>,
    caller: Caller,
    Path(publisher): Path<Uuid>,
    body: Result<Json<ReleaseRequest>, JsonRejection>,
) -> Result<Json<TransactionResponse>, AppError> {
    caller.require_admin()?;
    let req = extract_json(body).unwrap_or_default();
    let publisher = PublisherId::from_uuid(publisher);
    let amount = req
        .amount
        .as_deref()
        .map(|a| parse_amount_field(a, "amount"))
        .transpose()?;

    let (txn, balance, transactions) = {
        let mut core = state.core.write();
        let mark = core.ledger.iter_transactions().count();
        let txn = core
            .ledger
            .move_pending_to_available(publisher, amount, Utc::now())
            .ok_or_else(|| {
                AppError::Conflict("insufficient pending balance to release".to_string())
            })?;
        let (balance, transactions) = ledger_snapshot(&core, publisher, mark);
        (txn, balance, transactions)
    };

    mirror_ledger(&state, balance, transactions).await;
    Ok(Json(TransactionResponse::from(&txn)))
}

/// GET /v1/payouts/balance/{publisher}/transactions — history.
async fn list_transactions(
    State(state): State<AppState>,
    caller: Caller,
    Path(publisher): Path<Uuid>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    caller.require_admin()?;
    let publisher = PublisherId::from_uuid(publisher);
    let transaction_type = query
        .transaction_type
        .as_deref()
        .map(|s| {
            parse_transaction_type(s)
                .ok_or_else(|| AppError::Validation(format!("unknown transaction type: {s}")))
        })
        .transpose()?;

    let filter = TransactionFilter {
        transaction_type,
        limit: Some(query.limit.unwrap_or(100).min(1000)),
        offset: query.offset.unwrap_or(0),
        ..TransactionFilter::default()
    };

    let core = state.core.read();
    let rows = core
        .ledger
        .transactions(publisher, &filter)
        .into_iter()
        .map(TransactionResponse::from)
        .collect();
    Ok(Json(rows))
}

/// GET /v1/payouts/balance/{publisher}/summary — earnings over a window.
async fn earnings_summary(
    State(state): State<AppState>,
    caller: Caller,
    Path(publisher): Path<Uuid>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    caller.require_admin()?;
    let publisher = PublisherId::from_uuid(publisher);
    let now = Utc::now();
    let period = query.period.as_deref().unwrap_or("month");
    let since = match period {
        "day" => now - Duration::days(1),
        "week" => now - Duration::weeks(1),
        "month" => now - Duration::days(30),
        "year" => now - Duration::days(365),
        other => {
            return Err(AppError::Validation(format!(
                "period must be day/week/month/year, got {other}"
            )))
        }
    };

    let core = state.core.read();
    let summary = core.ledger.earnings_summary(publisher, since, now);
    Ok(Json(serde_json::json!({
        "period": period,
        "start_date": since,
        "end_date": now,
        "earnings": summary.earnings.to_string(),
        "payouts": summary.payouts.to_string(),
        "adjustments": summary.adjustments.to_string(),
        "net_change": summary.net_change.to_string(),
        "transaction_count": summary.transaction_count,
    })))
}

/// GET /v1/payouts/balance/{publisher}/audit — replay the transaction
/// log and compare against the live balances.
async fn audit_balance(
    State(state): State<AppState>,
    caller: Caller,
    Path(publisher): Path<Uuid>,
) -> Result<Json<AuditResponse>, AppError> {
    caller.require_admin()?;
    let publisher = PublisherId::from_uuid(publisher);

    let core = state.core.read();
    let replayed = core.ledger.replay(publisher);
    let consistent = core.ledger.verify_consistency(publisher);
    let (available, pending, reserved) = core
        .ledger
        .balance(publisher)
        .map(|b| (b.available, b.pending, b.reserved))
        .unwrap_or((Amount::ZERO, Amount::ZERO, Amount::ZERO));

    Ok(Json(AuditResponse {
        consistent,
        replayed_available: replayed.available.to_string(),
        replayed_pending: replayed.pending.to_string(),
        replayed_reserved: replayed.reserved.to_string(),
        current_available: available.to_string(),
        current_pending: pending.to_string(),
        current_reserved: reserved.to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Batch handlers
// ---------------------------------------------------------------------------

/// POST /v1/payouts/batches — create a draft batch.
async fn create_batch(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<CreateBatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, AppError> {
    caller.require_admin()?;
    let req = extract_validated_json(body)?;

    let batch = {
        let mut core = state.core.write();
        core.book.create_batch(
            BatchType::Manual,
            req.period_start,
            req.period_end,
            caller.user,
            Utc::now(),
        )
    };

    mirror_batch(&state, Some((batch.clone(), Vec::new()))).await;
    Ok(Json(BatchResponse::from(&batch)))
}

/// GET /v1/payouts/batches — list batches.
async fn list_batches(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<BatchListQuery>,
) -> Result<Json<Vec<BatchResponse>>, AppError> {
    caller.require_admin()?;
    let status = query
        .status
        .as_deref()
        .map(|s| {
            parse_batch_status(s)
                .ok_or_else(|| AppError::Validation(format!("unknown batch status: {s}")))
        })
        .transpose()?;

    let core = state.core.read();
    let batches = core
        .book
        .list(status)
        .into_iter()
        .map(BatchResponse::from)
        .collect();
    Ok(Json(batches))
}

/// GET /v1/payouts/batches/{id} — batch detail.
async fn get_batch(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchResponse>, AppError> {
    caller.require_admin()?;
    let id = BatchId::from_uuid(id);
    let core = state.core.read();
    let batch = core
        .book
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("batch {id}")))?;
    Ok(Json(BatchResponse::from(batch)))
}

/// GET /v1/payouts/batches/{id}/items — the batch's items.
async fn list_batch_items(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ItemResponse>>, AppError> {
    caller.require_admin()?;
    let id = BatchId::from_uuid(id);
    let core = state.core.read();
    if core.book.get(id).is_none() {
        return Err(AppError::NotFound(format!("batch {id}")));
    }
    let items = core.book.items(id).iter().map(ItemResponse::from).collect();
    Ok(Json(items))
}

/// POST /v1/payouts/batches/{id}/populate — select eligible publishers.
async fn populate_batch(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Result<Json<PopulateRequest>, JsonRejection>,
) -> Result<Json<Vec<ItemResponse>>, AppError> {
    caller.require_admin()?;
    let req = extract_json(body).unwrap_or_default();
    let id = BatchId::from_uuid(id);
    let minimum = parse_amount_field(
        req.minimum_amount.as_deref().unwrap_or(DEFAULT_MINIMUM_PAYOUT),
        "minimum_amount",
    )?;

    let (items, mirror) = {
        let mut core = state.core.write();
        let crate::state::MarketCore {
            book,
            ledger,
            orders,
            directory,
            ..
        } = &mut *core;
        let items = book.populate(id, minimum, &*ledger, &*orders, &*directory)?;
        let mirror = book.get(id).map(|b| (b.clone(), book.items(id).to_vec()));
        (items, mirror)
    };

    mirror_batch(&state, mirror).await;
    Ok(Json(items.iter().map(ItemResponse::from).collect()))
}

/// POST /v1/payouts/batches/{id}/approve — draft → pending.
async fn approve_batch(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchResponse>, AppError> {
    caller.require_admin()?;
    let id = BatchId::from_uuid(id);

    let (batch, mirror) = {
        let mut core = state.core.write();
        let batch = core.book.approve(id, caller.user, Utc::now())?;
        let mirror = Some((batch.clone(), core.book.items(id).to_vec()));
        (batch, mirror)
    };

    mirror_batch(&state, mirror).await;
    Ok(Json(BatchResponse::from(&batch)))
}

/// POST /v1/payouts/batches/{id}/process — settle every item.
///
/// Rejected with 409 unless the batch is pending; this is the
/// double-processing guard surfaced over HTTP.
async fn process_batch(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchResponse>, AppError> {
    caller.require_admin()?;
    let id = BatchId::from_uuid(id);

    let (batch, mirror, balances, transactions) = {
        let mut core = state.core.write();
        let mark = core.ledger.iter_transactions().count();
        let crate::state::MarketCore {
            book,
            ledger,
            rail,
            ..
        } = &mut *core;
        book.process(id, ledger, &**rail, Utc::now())?;

        let batch = core
            .book
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("batch {id}")))?;
        let items = core.book.items(id).to_vec();
        let transactions: Vec<BalanceTransaction> = core
            .ledger
            .iter_transactions()
            .skip(mark)
            .cloned()
            .collect();
        let balances: Vec<PublisherBalance> = items
            .iter()
            .filter_map(|i| core.ledger.balance(i.publisher).cloned())
            .collect();
        (batch.clone(), Some((batch, items)), balances, transactions)
    };

    mirror_batch(&state, mirror).await;
    for balance in balances {
        mirror_ledger(&state, Some(balance), Vec::new()).await;
    }
    mirror_ledger(&state, None, transactions).await;

    Ok(Json(BatchResponse::from(&batch)))
}

/// POST /v1/payouts/batches/{id}/cancel — draft/pending only.
async fn cancel_batch(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    body: Result<Json<CancelBatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, AppError> {
    caller.require_admin()?;
    let req = extract_json(body)?;
    let id = BatchId::from_uuid(id);

    let (batch, mirror) = {
        let mut core = state.core.write();
        let batch = core.book.cancel(id, &req.reason, Utc::now())?;
        let mirror = Some((batch.clone(), core.book.items(id).to_vec()));
        (batch, mirror)
    };

    mirror_batch(&state, mirror).await;
    Ok(Json(BatchResponse::from(&batch)))
}

/// GET /v1/payouts/calculate — payout preview, mutates nothing.
async fn calculate_payout(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<CalculateQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    caller.require_admin()?;
    let publisher = PublisherId::from_uuid(query.publisher_id);

    let core = state.core.read();
    let calc = processor::calculate_payout(
        publisher,
        query.period_start,
        query.period_end,
        state.config.fee_rate,
        &core.ledger,
        &core.adjustments,
        &core.orders,
    )?;

    Ok(Json(serde_json::json!({
        "publisher_id": query.publisher_id,
        "period_start": calc.period_start,
        "period_end": calc.period_end,
        "gross_amount": calc.gross_amount.to_string(),
        "platform_fee": calc.platform_fee.to_string(),
        "adjustments": calc.adjustments.to_string(),
        "net_amount": calc.net_amount.to_string(),
        "order_count": calc.order_count,
        "order_ids": calc.order_ids,
        "module_breakdown": calc
            .module_breakdown
            .iter()
            .map(|b| serde_json::json!({
                "module_id": b.module.as_uuid(),
                "amount": b.amount.to_string(),
                "count": b.count,
            }))
            .collect::<Vec<_>>(),
        "available_balance": calc.available_balance.to_string(),
        "pending_balance": calc.pending_balance.to_string(),
    })))
}

// ---------------------------------------------------------------------------
// Adjustment handlers
// ---------------------------------------------------------------------------

/// POST /v1/payouts/adjustments — create a pending adjustment.
async fn create_adjustment(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<CreateAdjustmentRequest>, JsonRejection>,
) -> Result<Json<AdjustmentResponse>, AppError> {
    caller.require_admin()?;
    let created_by = caller.user.ok_or_else(|| {
        AppError::Forbidden("adjustment creation requires an identified admin token".to_string())
    })?;
    let req = extract_validated_json(body)?;
    let publisher = PublisherId::from_uuid(req.publisher_id);
    let amount = parse_amount_field(&req.amount, "amount")?;
    let adjustment_type = parse_adjustment_type(&req.adjustment_type)
        .ok_or_else(|| AppError::Validation("unknown adjustment_type".to_string()))?;
    let reference = match (&req.reference_kind, &req.reference_id) {
        (Some(kind), Some(id)) => Some(Reference::new(kind, id)),
        _ => None,
    };

    let adjustment = {
        let mut core = state.core.write();
        core.adjustments
            .create(
                publisher,
                adjustment_type,
                amount,
                req.description,
                created_by,
                reference,
                req.internal_notes,
                Utc::now(),
            )
            .clone()
    };

    mirror_adjustment(&state, &adjustment).await;
    Ok(Json(AdjustmentResponse::from(&adjustment)))
}

/// GET /v1/payouts/adjustments — list with filters.
async fn list_adjustments(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<AdjustmentListQuery>,
) -> Result<Json<Vec<AdjustmentResponse>>, AppError> {
    caller.require_admin()?;
    let status = query
        .status
        .as_deref()
        .map(|s| {
            parse_adjustment_status(s)
                .ok_or_else(|| AppError::Validation(format!("unknown status: {s}")))
        })
        .transpose()?;
    let adjustment_type = query
        .adjustment_type
        .as_deref()
        .map(|s| {
            parse_adjustment_type(s)
                .ok_or_else(|| AppError::Validation(format!("unknown adjustment type: {s}")))
        })
        .transpose()?;

    let filter = AdjustmentFilter {
        publisher: query.publisher_id.map(PublisherId::from_uuid),
        status,
        adjustment_type,
    };

    let core = state.core.read();
    let adjustments = core
        .adjustments
        .list(&filter)
        .into_iter()
        .map(AdjustmentResponse::from)
        .collect();
    Ok(Json(adjustments))
}

/// POST /v1/payouts/adjustments/{id}/approve — apply to the ledger.
async fn approve_adjustment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<AdjustmentResponse>, AppError> {
    caller.require_admin()?;
    let approved_by = caller.user.ok_or_else(|| {
        AppError::Forbidden("adjustment approval requires an identified admin token".to_string())
    })?;
    let id = AdjustmentId::from_uuid(id);

    let (adjustment, balance, transactions) = {
        let mut core = state.core.write();
        let mark = core.ledger.iter_transactions().count();
        let crate::state::MarketCore {
            adjustments,
            ledger,
            ..
        } = &mut *core;
        let adjustment = adjustments.approve(id, approved_by, ledger, Utc::now())?;
        let (balance, transactions) = ledger_snapshot(&core, adjustment.publisher, mark);
        (adjustment, balance, transactions)
    };

    mirror_adjustment(&state, &adjustment).await;
    mirror_ledger(&state, balance, transactions).await;
    Ok(Json(AdjustmentResponse::from(&adjustment)))
}

/// POST /v1/payouts/adjustments/{id}/cancel — pending only.
async fn cancel_adjustment(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<AdjustmentResponse>, AppError> {
    caller.require_admin()?;
    let id = AdjustmentId::from_uuid(id);

    let adjustment = {
        let mut core = state.core.write();
        core.adjustments.cancel(id)?
    };

    mirror_adjustment(&state, &adjustment).await;
    Ok(Json(AdjustmentResponse::from(&adjustment)))
}

// ---------------------------------------------------------------------------
// Schedule handlers
// ---------------------------------------------------------------------------

/// GET /v1/payouts/schedule — the active schedule.
async fn get_schedule(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<ScheduleResponse>, AppError> {
    caller.require_admin()?;
    let core = state.core.read();
    let schedule = core
        .schedule
        .as_ref()
        .ok_or_else(|| AppError::NotFound("no payout schedule configured".to_string()))?;
    Ok(Json(ScheduleResponse::from(schedule)))
}

/// POST /v1/payouts/schedule — create (replace) the schedule.
async fn create_schedule(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<CreateScheduleRequest>, JsonRejection>,
) -> Result<Json<ScheduleResponse>, AppError> {
    caller.require_admin()?;
    let req = extract_validated_json(body)?;
    let cadence = parse_cadence(&req.cadence)
        .ok_or_else(|| AppError::Validation("unknown cadence".to_string()))?;
    let minimum = parse_amount_field(
        req.minimum_amount.as_deref().unwrap_or(DEFAULT_MINIMUM_PAYOUT),
        "minimum_amount",
    )?;

    let schedule = {
        let mut core = state.core.write();
        let schedule = PayoutSchedule::new(
            cadence,
            req.day_of_week.unwrap_or(0),
            req.day_of_month.unwrap_or(1),
            minimum,
            req.processing_hour.unwrap_or(9),
            Utc::now(),
        );
        core.schedule = Some(schedule.clone());
        schedule
    };

    mirror_schedule(&state, &schedule).await;
    Ok(Json(ScheduleResponse::from(&schedule)))
}

/// POST /v1/payouts/schedule/run — trigger the schedule runner.
///
/// The unattended entry point: external cron calls this. Not due is a
/// successful no-op.
async fn run_schedule(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<ScheduleRunResponse>, AppError> {
    caller.require_admin()?;
    let now = Utc::now();

    let (response, schedule, mirror, transactions) = {
        let mut core = state.core.write();
        let mark = core.ledger.iter_transactions().count();
        let crate::state::MarketCore {
            schedule,
            book,
            ledger,
            rail,
            orders,
            directory,
            ..
        } = &mut *core;
        let Some(schedule) = schedule.as_mut() else {
            return Err(AppError::NotFound(
                "no payout schedule configured".to_string(),
            ));
        };

        let outcome =
            schedule.run_if_due(book, ledger, &**rail, &*orders, &*directory, now)?;
        let schedule_copy = schedule.clone();

        match outcome {
            None => (
                ScheduleRunResponse {
                    ran: false,
                    batch: None,
                    next_run_at: schedule_copy.next_run_at,
                },
                schedule_copy,
                None,
                Vec::new(),
            ),
            Some(run) => {
                let batch = core.book.get(run.batch).cloned();
                let items = core.book.items(run.batch).to_vec();
                let transactions: Vec<BalanceTransaction> =
                    core.ledger.iter_transactions().skip(mark).cloned().collect();
                (
                    ScheduleRunResponse {
                        ran: true,
                        batch: batch.as_ref().map(BatchResponse::from),
                        next_run_at: Some(run.next_run_at),
                    },
                    schedule_copy,
                    batch.map(|b| (b, items)),
                    transactions,
                )
            }
        }
    };

    mirror_schedule(&state, &schedule).await;
    mirror_batch(&state, mirror).await;
    mirror_ledger(&state, None, transactions).await;

    Ok(Json(response))
}
