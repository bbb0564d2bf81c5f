//! 部署编排
//!
//! 读取主机/规则快照 → 一次性渲染 → 逐台（或有限并发）部署，汇总每台主机的结果。

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{DeploymentReport, DeploymentToken, Host, ProvisionResult, RenderedConfig};
use crate::infra::store::{FleetStore, StoreError};
use crate::services::provision::Provisioner;
use crate::services::render::{ConfigRenderer, RenderError};

pub const CANCELLED_MESSAGE: &str = "deployment cancelled before provisioning started";

/// 在开始逐台部署之前发生、导致整次运行失败的错误
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to load fleet: {0}")]
    Store(#[from] StoreError),

    #[error("failed to render configs: {0}")]
    Render(#[from] RenderError),

    #[error("a deployment is already running")]
    AlreadyRunning,
}

pub struct DeploymentOrchestrator {
    store: Arc<dyn FleetStore>,
    renderer: Arc<ConfigRenderer>,
    provisioner: Arc<Provisioner>,
    concurrency: usize,
}

impl DeploymentOrchestrator {
    pub fn new(
        store: Arc<dyn FleetStore>,
        renderer: Arc<ConfigRenderer>,
        provisioner: Arc<Provisioner>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            renderer,
            provisioner,
            concurrency: concurrency.max(1),
        }
    }

    /// 执行一次完整部署
    ///
    /// 结果顺序与主机快照顺序一致；没有配置的主机不出现在结果中。
    /// 取消后尚未开始的主机记为失败，已开始的主机会执行完自己的步骤。
    pub async fn run(&self, cancel: CancellationToken) -> Result<DeploymentReport, DeployError> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        let hosts = self.store.list_hosts().await?;
        let rules = self.store.list_rules().await?;

        let token = DeploymentToken::generate();
        let mut rendered = self.renderer.render(&hosts, &rules, &token)?;

        let jobs: Vec<(Host, Vec<RenderedConfig>)> = hosts
            .into_iter()
            .filter_map(|host| rendered.remove(&host.id).map(|configs| (host, configs)))
            .collect();

        info!(
            run_id = %run_id,
            hosts = jobs.len(),
            rules = rules.len(),
            concurrency = self.concurrency,
            "Starting deployment"
        );

        let results: Vec<ProvisionResult> = stream::iter(jobs)
            .map(|(host, configs)| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        warn!(hostname = %host.hostname, "Skipping host, deployment cancelled");
                        return ProvisionResult::failed(&host.hostname, CANCELLED_MESSAGE);
                    }
                    self.provisioner.provision(&host, &configs).await
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let report = DeploymentReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            results,
        };
        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Deployment finished"
        );
        Ok(report)
    }
}
