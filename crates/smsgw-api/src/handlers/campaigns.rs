//! Campaign handlers

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use smsgw_common::types::CampaignId;
use smsgw_core::NewCampaign;
use smsgw_storage::CampaignCriteria;
use std::sync::Arc;
use tracing::info;

use crate::auth::{AppState, AuthUser};
use crate::error::ApiResult;
use crate::response::{ok, Affected, Created};

/// Body or query naming a campaign
#[derive(Debug, Deserialize)]
pub struct CampaignRef {
    #[serde(rename = "CampaignID")]
    pub campaign_id: CampaignId,
}

/// POST /campaign
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<NewCampaign>,
) -> ApiResult<impl IntoResponse> {
    let id = state.ctx.campaign_engine().start(&user, req).await?;
    info!(campaign_id = id, username = %user.username, "Campaign started");
    Ok(ok(Created { id }))
}

/// POST /campaign/stop
pub async fn stop_campaign(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<CampaignRef>,
) -> ApiResult<impl IntoResponse> {
    let count = state.ctx.campaign_engine().stop(&user, req.campaign_id).await?;
    Ok(ok(Affected { count }))
}

/// POST /campaign/retry: failed messages go back on the queue
pub async fn retry_campaign(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<CampaignRef>,
) -> ApiResult<impl IntoResponse> {
    let count = state.ctx.campaign_engine().retry(&user, req.campaign_id).await?;
    Ok(ok(Affected { count }))
}

/// POST /campaign/retry/queued: republish messages stuck in Queued
pub async fn retry_queued(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<CampaignRef>,
) -> ApiResult<impl IntoResponse> {
    let count = state
        .ctx
        .campaign_engine()
        .retry_queued(&user, req.campaign_id)
        .await?;
    Ok(ok(Affected { count }))
}

/// GET /campaign/progress
pub async fn progress(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(req): Query<CampaignRef>,
) -> ApiResult<impl IntoResponse> {
    let progress = state
        .ctx
        .campaign_engine()
        .progress(&user, req.campaign_id)
        .await?;
    Ok(ok(progress))
}

/// GET /campaign/report
pub async fn report(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(req): Query<CampaignRef>,
) -> ApiResult<impl IntoResponse> {
    let report = state.ctx.campaign_engine().report(&user, req.campaign_id).await?;
    Ok(ok(report))
}

/// GET /campaign/filter
pub async fn filter_campaigns(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(criteria): Query<CampaignCriteria>,
) -> ApiResult<impl IntoResponse> {
    let campaigns = state.ctx.campaign_engine().list(&user, criteria).await?;
    Ok(ok(campaigns))
}
