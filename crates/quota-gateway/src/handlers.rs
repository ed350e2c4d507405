use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use quota_common::{AdmissionResult, Category, PlanFeature, SubscriptionStatus};
use quota_ledger::{Account, BatchOutcome, FeatureCheck, Plan, Reservation, UsageStats};
use std::sync::atomic::Ordering;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::types::{
    BatchRequest, ChangePlanRequest, CheckRequest, ConsumeRequest, ConsumeResponse,
    CreditBalanceResponse, FeatureRequest, OpenAccountRequest, PurchaseCreditsRequest,
    SubscriptionRequest,
};
use crate::AppState;

type ApiResult<T> = Result<T, ApiError>;

fn count_request(state: &AppState) {
    state.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
}

pub(crate) async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<Plan>>> {
    count_request(&state);
    Ok(Json(state.ledger.list_plans().await?))
}

pub(crate) async fn open_account(
    State(state): State<AppState>,
    Json(req): Json<OpenAccountRequest>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    count_request(&state);
    let account = state
        .ledger
        .open_account(req.account_id, req.plan.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub(crate) async fn usage_stats(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<UsageStats>> {
    count_request(&state);
    Ok(Json(state.ledger.usage_stats(&account_id).await?))
}

pub(crate) async fn change_plan(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<Plan>> {
    count_request(&state);
    Ok(Json(state.ledger.change_plan(&account_id, &req.plan).await?))
}

pub(crate) async fn set_subscription(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<SubscriptionRequest>,
) -> ApiResult<Json<Account>> {
    count_request(&state);
    let status: SubscriptionStatus = req.status.parse()?;
    Ok(Json(
        state
            .ledger
            .set_subscription_status(&account_id, status)
            .await?,
    ))
}

pub(crate) async fn purchase_credits(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<PurchaseCreditsRequest>,
) -> ApiResult<Json<CreditBalanceResponse>> {
    count_request(&state);
    let category: Category = req.category.parse()?;
    let balance = state
        .ledger
        .purchase_credits(&account_id, category, req.amount)
        .await?;
    Ok(Json(CreditBalanceResponse {
        account_id,
        category,
        balance,
    }))
}

/// Always 200: a denial is reported in the body, not as an error status.
pub(crate) async fn check(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<CheckRequest>,
) -> ApiResult<Json<AdmissionResult>> {
    count_request(&state);
    state.metrics.checks.fetch_add(1, Ordering::Relaxed);

    let category: Category = req.category.parse()?;
    let result = state
        .ledger
        .check(&account_id, category, req.requested_bytes)
        .await?;
    if !result.allowed {
        state.metrics.denials.fetch_add(1, Ordering::Relaxed);
    }
    debug!(%account_id, %category, allowed = result.allowed, "check served");
    Ok(Json(result))
}

pub(crate) async fn check_feature(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<FeatureRequest>,
) -> ApiResult<Json<FeatureCheck>> {
    count_request(&state);
    let feature: PlanFeature = req.feature.parse()?;
    let result = state.ledger.check_feature(&account_id, feature).await?;
    if !result.allowed {
        state.metrics.denials.fetch_add(1, Ordering::Relaxed);
    }
    Ok(Json(result))
}

fn record_denial<T>(state: &AppState, result: &Result<T, quota_ledger::LedgerError>) {
    if matches!(result, Err(err) if err.denial().is_some()) {
        state.metrics.denials.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) async fn consume(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<ConsumeRequest>,
) -> ApiResult<Json<ConsumeResponse>> {
    count_request(&state);
    let category: Category = req.category.parse()?;

    let result = state
        .ledger
        .consume(&account_id, category, req.count.unwrap_or(1))
        .await;
    record_denial(&state, &result);
    let breakdown = result?;

    state.metrics.consumes.fetch_add(1, Ordering::Relaxed);
    state
        .metrics
        .units_from_plan
        .fetch_add(breakdown.from_plan, Ordering::Relaxed);
    state
        .metrics
        .units_from_credits
        .fetch_add(breakdown.from_credits, Ordering::Relaxed);
    Ok(Json(breakdown.into()))
}

pub(crate) async fn consume_batch(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<BatchRequest>,
) -> ApiResult<Json<BatchOutcome>> {
    count_request(&state);
    let operations = req.into_operations()?;

    let result = state.ledger.consume_batch(&account_id, &operations).await;
    record_denial(&state, &result);
    let outcome = result?;

    state.metrics.consumes.fetch_add(1, Ordering::Relaxed);
    for breakdown in &outcome.breakdowns {
        state
            .metrics
            .units_from_plan
            .fetch_add(breakdown.from_plan, Ordering::Relaxed);
        state
            .metrics
            .units_from_credits
            .fetch_add(breakdown.from_credits, Ordering::Relaxed);
    }
    info!(%account_id, operations = outcome.breakdowns.len(), "batch served");
    Ok(Json(outcome))
}

pub(crate) async fn reserve(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<ConsumeRequest>,
) -> ApiResult<(StatusCode, Json<Reservation>)> {
    count_request(&state);
    let category: Category = req.category.parse()?;

    let result = state
        .ledger
        .reserve(&account_id, category, req.count.unwrap_or(1))
        .await;
    record_denial(&state, &result);
    Ok((StatusCode::CREATED, Json(result?)))
}

pub(crate) async fn commit(
    State(state): State<AppState>,
    Path((account_id, reservation_id)): Path<(String, Uuid)>,
) -> ApiResult<Json<Reservation>> {
    count_request(&state);
    let reservation = state.ledger.commit(&account_id, reservation_id).await?;

    state.metrics.consumes.fetch_add(1, Ordering::Relaxed);
    state
        .metrics
        .units_from_plan
        .fetch_add(reservation.from_plan, Ordering::Relaxed);
    state
        .metrics
        .units_from_credits
        .fetch_add(reservation.from_credits, Ordering::Relaxed);
    Ok(Json(reservation))
}

pub(crate) async fn refund(
    State(state): State<AppState>,
    Path((account_id, reservation_id)): Path<(String, Uuid)>,
) -> ApiResult<Json<ConsumeResponse>> {
    count_request(&state);
    let refunded = state.ledger.refund(&account_id, reservation_id).await?;
    Ok(Json(refunded.into()))
}

pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = &state.metrics;
    Json(serde_json::json!({
        "total_requests": metrics.total_requests.load(Ordering::Relaxed),
        "checks": metrics.checks.load(Ordering::Relaxed),
        "denials": metrics.denials.load(Ordering::Relaxed),
        "consumes": metrics.consumes.load(Ordering::Relaxed),
        "units_from_plan": metrics.units_from_plan.load(Ordering::Relaxed),
        "units_from_credits": metrics.units_from_credits.load(Ordering::Relaxed),
    }))
}

pub(crate) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "quota-gateway",
        "cycle_days": state.ledger.config().cycle_days,
        "default_plan": state.ledger.config().default_plan_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
