//! 主机管理 API
//!
//! 包含主机增删改查，以及单主机的状态 / 日志 / 卸载

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::domain::{
    Host, HostDraft, HostId, HostInfo, HostLogs, HostStatus, ServiceRole, UninstallReport,
};
use crate::error::{ApiError, ApiResult};
use crate::infra::FleetStore;
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 日志查询参数
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub service_role: String,
}

/// 创建主机路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/hosts", get(list_hosts).post(create_host))
        .route("/api/hosts/:id", put(update_host).delete(delete_host))
        .route("/api/hosts/:id/status", get(host_status))
        .route("/api/hosts/:id/logs", get(host_logs))
        .route("/api/hosts/:id/uninstall", post(uninstall_host))
}

/// GET /api/hosts
pub(crate) async fn list_hosts(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<HostInfo>>> {
    let hosts = state.store.list_hosts().await?;
    Ok(Json(hosts.iter().map(HostInfo::from).collect()))
}

/// POST /api/hosts
pub(crate) async fn create_host(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(draft): Json<HostDraft>,
) -> ApiResult<(StatusCode, Json<HostInfo>)> {
    let host = state.store.create_host(&draft).await?;
    Ok((StatusCode::CREATED, Json(HostInfo::from(&host))))
}

/// PUT /api/hosts/:id
pub(crate) async fn update_host(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<HostId>,
    Json(draft): Json<HostDraft>,
) -> ApiResult<Json<HostInfo>> {
    let host = state.store.update_host(id, &draft).await?;
    Ok(Json(HostInfo::from(&host)))
}

/// DELETE /api/hosts/:id
///
/// 同时删除引用该主机的所有规则
pub(crate) async fn delete_host(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<HostId>,
) -> ApiResult<StatusCode> {
    state.store.delete_host(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/hosts/:id/status
pub(crate) async fn host_status(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<HostId>,
) -> ApiResult<Json<HostStatus>> {
    let host = find_host(&state, id).await?;
    Ok(Json(state.probes.status(&host).await))
}

/// GET /api/hosts/:id/logs?service_role=server|client
pub(crate) async fn host_logs(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<HostId>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<HostLogs>> {
    let role = ServiceRole::parse(&query.service_role).ok_or_else(|| {
        ApiError::bad_request(format!(
            "Invalid service_role '{}', expected 'server' or 'client'",
            query.service_role
        ))
    })?;
    let host = find_host(&state, id).await?;
    Ok(Json(state.probes.logs(&host, role).await))
}

/// POST /api/hosts/:id/uninstall
///
/// 连接失败返回 500；单条命令的失败在 `errors` 中返回
pub(crate) async fn uninstall_host(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<HostId>,
) -> ApiResult<Json<UninstallReport>> {
    let host = find_host(&state, id).await?;
    info!(host_id = id, hostname = %host.hostname, "Uninstall requested");
    let report = state.probes.uninstall(&host).await?;
    Ok(Json(report))
}

async fn find_host(state: &AppState, id: HostId) -> ApiResult<Host> {
    state
        .store
        .get_host(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Host {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HostRole;
    use crate::testing::{app_state, MockConnector};

    fn draft(alias: &str, hostname: &str, role: HostRole) -> HostDraft {
        HostDraft {
            alias: alias.to_string(),
            hostname: hostname.to_string(),
            ssh_user: "root".to_string(),
            ssh_port: 22,
            ssh_password: Some("secret".to_string()),
            role,
        }
    }

    #[tokio::test]
    async fn test_host_crud() {
        let state = app_state(&MockConnector::new()).await;

        let (status, Json(created)) = create_host(
            RequireApiKey,
            State(state.clone()),
            Json(draft("relay", "s1", HostRole::Server)),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.hostname, "s1");

        let Json(updated) = update_host(
            RequireApiKey,
            State(state.clone()),
            Path(created.id),
            Json(draft("relay", "s1.example.com", HostRole::Both)),
        )
        .await
        .unwrap();
        assert_eq!(updated.role, HostRole::Both);

        let Json(hosts) = list_hosts(State(state.clone())).await.unwrap();
        assert_eq!(hosts, vec![updated]);

        let status = delete_host(RequireApiKey, State(state.clone()), Path(created.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(matches!(
            delete_host(RequireApiKey, State(state), Path(created.id)).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_hostname_conflicts() {
        let state = app_state(&MockConnector::new()).await;
        let (status, _) =
            create_host(RequireApiKey, State(state.clone()), Json(draft("a", "s1", HostRole::Server)))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        let err = create_host(RequireApiKey, State(state), Json(draft("b", "s1", HostRole::Server)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(msg) if msg == "Hostname already exists"));
    }

    #[tokio::test]
    async fn test_status_and_logs() {
        let connector = MockConnector::new();
        let state = app_state(&connector).await;
        let (_, Json(host)) = create_host(
            RequireApiKey,
            State(state.clone()),
            Json(draft("relay", "s1", HostRole::Server)),
        )
        .await
        .unwrap();

        let Json(status) = host_status(RequireApiKey, State(state.clone()), Path(host.id))
            .await
            .unwrap();
        assert_eq!(status.server_status.as_deref(), Some("inactive"));
        assert!(status.client_status.is_none());

        let err = host_logs(
            RequireApiKey,
            State(state.clone()),
            Path(host.id),
            Query(LogsQuery {
                service_role: "relay".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let Json(logs) = host_logs(
            RequireApiKey,
            State(state),
            Path(host.id),
            Query(LogsQuery {
                service_role: "server".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(logs.logs, "No logs found for rathole-server.service.");
    }

    #[tokio::test]
    async fn test_uninstall_unreachable_is_internal_error() {
        let connector = MockConnector::new().unreachable("s1");
        let state = app_state(&connector).await;
        let (_, Json(host)) = create_host(
            RequireApiKey,
            State(state.clone()),
            Json(draft("relay", "s1", HostRole::Server)),
        )
        .await
        .unwrap();

        let err = uninstall_host(RequireApiKey, State(state.clone()), Path(host.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));

        assert!(matches!(
            uninstall_host(RequireApiKey, State(state), Path(999)).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
