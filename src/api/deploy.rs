//! 部署 API
//!
//! 包含 /api/deploy 和 /api/deploy/cancel 端点

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::domain::ProvisionResult;
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 部署响应
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub message: String,
    pub run_id: String,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ProvisionResult>,
}

/// 取消响应
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
    pub message: String,
}

/// 创建部署路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/deploy", post(trigger_deploy))
        .route("/api/deploy/cancel", post(cancel_deploy))
}

/// 触发一次全量部署并等待结果
///
/// POST /api/deploy
/// 需要 API Key
///
/// 部署在独立任务中执行，客户端断开不会中断进行中的主机。
/// 已有部署在运行时返回 409。
pub(crate) async fn trigger_deploy(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DeployResponse>> {
    let guard = state.begin_deploy()?;
    let cancel = guard.token();

    let worker = state.clone();
    let handle = tokio::spawn(async move {
        let _guard = guard;
        worker.orchestrator.run(cancel).await
    });

    let report = handle
        .await
        .map_err(|e| ApiError::internal(format!("deployment task failed: {}", e)))??;

    Ok(Json(DeployResponse {
        message: "Deployment process finished.".to_string(),
        succeeded: report.succeeded(),
        failed: report.failed(),
        run_id: report.run_id,
        results: report.results,
    }))
}

/// 取消进行中的部署，尚未开始的主机不再部署
///
/// POST /api/deploy/cancel
/// 需要 API Key
pub(crate) async fn cancel_deploy(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> Json<CancelResponse> {
    let cancelled = state.cancel_deploy();
    let message = if cancelled {
        "Cancellation requested; hosts already in progress will finish.".to_string()
    } else {
        "No deployment is running.".to_string()
    };
    tracing::info!(cancelled, "Deployment cancel requested");
    Json(CancelResponse { cancelled, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HostDraft, HostRole, ProvisionStatus, RuleDraft, RuleType};
    use crate::testing::{app_state, MockConnector};

    async fn seed_fleet(state: &AppState) {
        let mut ids = Vec::new();
        for (hostname, role) in [("s1", HostRole::Server), ("c1", HostRole::Client), ("idle", HostRole::Both)] {
            let host = state
                .store
                .create_host(&HostDraft {
                    alias: hostname.to_string(),
                    hostname: hostname.to_string(),
                    ssh_user: "root".to_string(),
                    ssh_port: 22,
                    ssh_password: Some("secret".to_string()),
                    role,
                })
                .await
                .unwrap();
            ids.push(host.id);
        }
        state
            .store
            .create_rule(&RuleDraft {
                name: "web".to_string(),
                rule_type: RuleType::Tcp,
                local_port: 8080,
                remote_port: 9000,
                client_id: ids[1],
                server_id: ids[0],
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deploy_reports_partial_failure() {
        let connector = MockConnector::new().unreachable("c1");
        let state = app_state(&connector).await;
        seed_fleet(&state).await;

        let Json(response) = trigger_deploy(RequireApiKey, State(state.clone()))
            .await
            .unwrap();
        assert_eq!(response.message, "Deployment process finished.");
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].hostname, "s1");
        assert_eq!(response.results[0].status, ProvisionStatus::Success);
        assert_eq!(response.results[1].status, ProvisionStatus::Failed);
        assert_eq!((response.succeeded, response.failed), (1, 1));

        // 部署结束后槽位已释放
        assert!(!state.deploy_running());
        assert_eq!(connector.connect_attempts("idle"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_deploy_is_rejected() {
        let state = app_state(&MockConnector::new()).await;
        let _running = state.begin_deploy().unwrap();

        let err = trigger_deploy(RequireApiKey, State(state.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let Json(response) = cancel_deploy(RequireApiKey, State(state)).await;
        assert!(response.cancelled);
    }

    #[tokio::test]
    async fn test_cancel_without_deploy() {
        let state = app_state(&MockConnector::new()).await;
        let Json(response) = cancel_deploy(RequireApiKey, State(state)).await;
        assert!(!response.cancelled);
    }
}
