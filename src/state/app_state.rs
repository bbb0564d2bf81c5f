//! 应用状态

use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::env::EnvConfig;
use crate::infra::{
    AesCipher, CredentialCipher, FleetStore, RemoteConnector, RusshConnector, SqliteStore,
    TemplateEngine,
};
use crate::services::{
    ConfigRenderer, DeployError, DeploymentOrchestrator, Probes, Provisioner, SessionFactory,
};

/// 应用状态
pub struct AppState {
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,
    /// 主机与规则存储
    pub store: Arc<SqliteStore>,
    pub orchestrator: DeploymentOrchestrator,
    pub probes: Probes,
    /// 当前运行中的部署（同一时间最多一个）
    running_deploy: Mutex<Option<CancellationToken>>,
}

/// 部署占用期间持有，drop 时释放部署槽位
pub struct DeployGuard {
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl DeployGuard {
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for DeployGuard {
    fn drop(&mut self) {
        *self.state.deploy_slot() = None;
    }
}

impl AppState {
    /// 按环境配置创建：连接数据库、加载模板、创建 SSH 连接器
    pub async fn new(config: EnvConfig) -> anyhow::Result<Self> {
        let cipher: Arc<dyn CredentialCipher> = match &config.credential_key {
            Some(key) => Arc::new(AesCipher::from_base64(key).context("invalid CREDENTIAL_KEY")?),
            None => {
                warn!("CREDENTIAL_KEY is not set, stored passwords will not survive a restart");
                Arc::new(AesCipher::ephemeral())
            }
        };

        let store = SqliteStore::connect(&config.database_url, cipher.clone())
            .await
            .with_context(|| format!("failed to open database {}", config.database_url))?;

        let templates = match &config.engine.template_dir {
            Some(dir) => TemplateEngine::with_overrides(dir)
                .with_context(|| format!("failed to load templates from {}", dir.display()))?,
            None => TemplateEngine::embedded().context("failed to load embedded templates")?,
        };

        let connector = Arc::new(RusshConnector::new(config.engine.command_timeout));

        Ok(Self::with_components(
            config,
            Arc::new(store),
            connector,
            cipher,
            Arc::new(templates),
        ))
    }

    /// 用现成的组件装配（测试可注入自定义连接器）
    pub fn with_components(
        config: EnvConfig,
        store: Arc<SqliteStore>,
        connector: Arc<dyn RemoteConnector>,
        cipher: Arc<dyn CredentialCipher>,
        templates: Arc<TemplateEngine>,
    ) -> Self {
        let engine = config.engine.clone();
        let sessions = Arc::new(SessionFactory::new(connector, cipher));
        let renderer = Arc::new(ConfigRenderer::new(templates.clone(), engine.rathole_bind_port));
        let provisioner = Arc::new(Provisioner::new(sessions.clone(), templates, engine.clone()));
        let fleet: Arc<dyn FleetStore> = store.clone();

        info!(
            concurrency = engine.concurrency,
            bind_port = engine.rathole_bind_port,
            "Deployment engine ready"
        );

        Self {
            orchestrator: DeploymentOrchestrator::new(
                fleet,
                renderer,
                provisioner,
                engine.concurrency,
            ),
            probes: Probes::new(sessions, engine),
            config,
            started_at: Utc::now(),
            store,
            running_deploy: Mutex::new(None),
        }
    }

    /// 占用部署槽位；已有部署在运行时返回 `AlreadyRunning`
    pub fn begin_deploy(self: &Arc<Self>) -> Result<DeployGuard, DeployError> {
        let mut slot = self.deploy_slot();
        if slot.is_some() {
            return Err(DeployError::AlreadyRunning);
        }
        let cancel = CancellationToken::new();
        *slot = Some(cancel.clone());
        Ok(DeployGuard {
            state: Arc::clone(self),
            cancel,
        })
    }

    /// 取消当前部署，返回是否有部署在运行
    pub fn cancel_deploy(&self) -> bool {
        match self.deploy_slot().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn deploy_running(&self) -> bool {
        self.deploy_slot().is_some()
    }

    fn deploy_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.running_deploy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_state, MockConnector};

    #[tokio::test]
    async fn test_single_deploy_slot() {
        let state = app_state(&MockConnector::new()).await;

        let guard = state.begin_deploy().unwrap();
        assert!(state.deploy_running());
        assert!(matches!(state.begin_deploy(), Err(DeployError::AlreadyRunning)));

        assert!(state.cancel_deploy());
        assert!(guard.token().is_cancelled());

        drop(guard);
        assert!(!state.deploy_running());
        assert!(!state.cancel_deploy());
        assert!(state.begin_deploy().is_ok());
    }
}
