//! 转发规则 API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use std::sync::Arc;

use crate::domain::{RuleDraft, RuleId, RuleView};
use crate::error::ApiResult;
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 创建规则路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/rules", get(list_rules).post(create_rule))
        .route("/api/rules/:id", put(update_rule).delete(delete_rule))
}

/// GET /api/rules
pub(crate) async fn list_rules(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<RuleView>>> {
    Ok(Json(state.store.list_rule_views().await?))
}

/// POST /api/rules
pub(crate) async fn create_rule(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(draft): Json<RuleDraft>,
) -> ApiResult<(StatusCode, Json<RuleView>)> {
    let view = state.store.create_rule(&draft).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// PUT /api/rules/:id
pub(crate) async fn update_rule(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<RuleId>,
    Json(draft): Json<RuleDraft>,
) -> ApiResult<Json<RuleView>> {
    Ok(Json(state.store.update_rule(id, &draft).await?))
}

/// DELETE /api/rules/:id
pub(crate) async fn delete_rule(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<RuleId>,
) -> ApiResult<StatusCode> {
    state.store.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
