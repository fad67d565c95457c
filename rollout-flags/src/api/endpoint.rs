use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::{debug_handler, Json};
use serde::de::DeserializeOwned;

use crate::api::errors::FlagError;
use crate::api::types::{
    AuditLogResponse, EvaluateAllResponse, EvaluateFlagResponse, EvaluateQueryParams,
    FlagConfigResponse, FlagMetricsResponse, IncreaseRolloutRequest, IncreaseRolloutResponse,
    RollbackRequest,
};
use crate::flags::flag_models::{FlagConfigUpdate, FlagKey, FlagMetricsUpdate};
use crate::rollout::controller::{ProgressOutcome, RolloutStatus};
use crate::rollout::rollback::AuditRecord;
use crate::router;

// Bodies are parsed by hand so malformed JSON comes back as our 400 error
// shape instead of axum's plain-text rejection.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, FlagError> {
    Ok(serde_json::from_slice(body)?)
}

fn require_user_id(params: EvaluateQueryParams) -> Result<String, FlagError> {
    match params.user_id {
        Some(user_id) if !user_id.is_empty() => Ok(user_id),
        _ => Err(FlagError::BadRequest("user_id is required".to_string())),
    }
}

#[debug_handler]
pub async fn evaluate_all(
    State(state): State<router::State>,
    Query(params): Query<EvaluateQueryParams>,
) -> Result<Json<EvaluateAllResponse>, FlagError> {
    let user_id = require_user_id(params)?;
    let flags = state
        .flag_service
        .evaluate_all(&user_id)
        .await
        .into_iter()
        .map(|(flag, result)| (flag, result.into()))
        .collect();

    Ok(Json(EvaluateAllResponse { user_id, flags }))
}

/// Unknown flag names evaluate to off rather than 404, so clients can ship
/// checks for flags before they exist here.
#[debug_handler]
pub async fn evaluate_flag(
    State(state): State<router::State>,
    Path(flag): Path<String>,
    Query(params): Query<EvaluateQueryParams>,
) -> Result<Json<EvaluateFlagResponse>, FlagError> {
    let user_id = require_user_id(params)?;
    let result = state.flag_service.evaluate_by_name(&user_id, &flag).await;

    Ok(Json(EvaluateFlagResponse {
        flag,
        user_id,
        evaluation: result.into(),
    }))
}

pub async fn get_flag(
    State(state): State<router::State>,
    Path(flag): Path<String>,
) -> Result<Json<FlagConfigResponse>, FlagError> {
    let flag = FlagKey::parse(&flag)?;
    let config = state.store.get(flag).await?;
    Ok(Json(FlagConfigResponse { flag, config }))
}

pub async fn update_flag(
    State(state): State<router::State>,
    Path(flag): Path<String>,
    body: Bytes,
) -> Result<Json<FlagConfigResponse>, FlagError> {
    let flag = FlagKey::parse(&flag)?;
    let update: FlagConfigUpdate = parse_body(&body)?;
    let config = state.store.update(flag, update).await?;
    Ok(Json(FlagConfigResponse { flag, config }))
}

pub async fn get_metrics(
    State(state): State<router::State>,
    Path(flag): Path<String>,
) -> Result<Json<FlagMetricsResponse>, FlagError> {
    let flag = FlagKey::parse(&flag)?;
    let metrics = state.metrics_store.get(flag).await?;
    Ok(Json(FlagMetricsResponse { flag, metrics }))
}

pub async fn update_metrics(
    State(state): State<router::State>,
    Path(flag): Path<String>,
    body: Bytes,
) -> Result<Json<FlagMetricsResponse>, FlagError> {
    let flag = FlagKey::parse(&flag)?;
    let update: FlagMetricsUpdate = parse_body(&body)?;
    let metrics = state.metrics_store.update(flag, update).await?;
    Ok(Json(FlagMetricsResponse {
        flag,
        metrics: Some(metrics),
    }))
}

pub async fn rollout_status(
    State(state): State<router::State>,
    Path(flag): Path<String>,
) -> Result<Json<RolloutStatus>, FlagError> {
    let flag = FlagKey::parse(&flag)?;
    Ok(Json(state.controller.status(flag).await?))
}

pub async fn start_rollout(
    State(state): State<router::State>,
    Path(flag): Path<String>,
) -> Result<Json<RolloutStatus>, FlagError> {
    let flag = FlagKey::parse(&flag)?;
    Ok(Json(state.controller.start_rollout(flag).await?))
}

pub async fn progress_rollout(
    State(state): State<router::State>,
    Path(flag): Path<String>,
) -> Result<Json<ProgressOutcome>, FlagError> {
    let flag = FlagKey::parse(&flag)?;
    Ok(Json(state.controller.progress(flag).await?))
}

pub async fn increase_rollout(
    State(state): State<router::State>,
    Path(flag): Path<String>,
    body: Bytes,
) -> Result<Json<IncreaseRolloutResponse>, FlagError> {
    let flag = FlagKey::parse(&flag)?;
    let request: IncreaseRolloutRequest = parse_body(&body)?;
    let increased = state
        .controller
        .increase_rollout(flag, request.percentage)
        .await?;
    let config = state.store.get_durable(flag).await?;

    Ok(Json(IncreaseRolloutResponse {
        flag,
        increased,
        rollout_percentage: config.rollout_percentage,
    }))
}

pub async fn rollback(
    State(state): State<router::State>,
    Path(flag): Path<String>,
    body: Bytes,
) -> Result<Json<AuditRecord>, FlagError> {
    let flag = FlagKey::parse(&flag)?;
    let request: RollbackRequest = parse_body(&body)?;
    if request.reason.trim().is_empty() || request.admin_user_id.trim().is_empty() {
        return Err(FlagError::BadRequest(
            "reason and admin_user_id are required".to_string(),
        ));
    }

    let record = state
        .controller
        .rollback(flag, &request.reason, &request.admin_user_id)
        .await?;
    Ok(Json(record))
}

pub async fn audit_log(
    State(state): State<router::State>,
    Path(flag): Path<String>,
) -> Result<Json<AuditLogResponse>, FlagError> {
    let flag = FlagKey::parse(&flag)?;
    let records = state.controller.audit_log(flag).await?;
    Ok(Json(AuditLogResponse { flag, records }))
}
