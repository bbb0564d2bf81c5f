//! 单主机部署
//!
//! 步骤：连接 → 安装 rathole（尽力而为）→ 创建配置目录 → 逐个角色上传配置与 unit 并重启服务 → 关闭会话。
//! 任何错误都只影响当前主机，转换为 failed 结果返回。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tera::Context;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::constants::{RATHOLE_BIN_PATH, RATHOLE_CONFIG_DIR, SYSTEMD_UNIT_DIR};
use crate::config::EngineConfig;
use crate::domain::{Host, ProvisionResult, RenderedConfig, ServiceRole};
use crate::infra::remote::{shell_quote, RemoteCommand, RemoteError, RemoteSession};
use crate::infra::templates::{TemplateEngine, UNIT_TEMPLATE};
use crate::services::session::SessionFactory;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("failed to render unit file for {role}: {source}")]
    Unit {
        role: ServiceRole,
        #[source]
        source: tera::Error,
    },
}

/// 远程配置文件路径，例如 `/etc/rathole/server.toml`
pub fn config_path(role: ServiceRole) -> String {
    format!("{}/{}", RATHOLE_CONFIG_DIR, role.config_filename())
}

/// systemd unit 路径，例如 `/etc/systemd/system/rathole-server.service`
pub fn unit_path(role: ServiceRole) -> String {
    format!("{}/{}", SYSTEMD_UNIT_DIR, role.unit_name())
}

pub struct Provisioner {
    sessions: Arc<SessionFactory>,
    templates: Arc<TemplateEngine>,
    config: EngineConfig,
}

impl Provisioner {
    pub fn new(
        sessions: Arc<SessionFactory>,
        templates: Arc<TemplateEngine>,
        config: EngineConfig,
    ) -> Self {
        Self {
            sessions,
            templates,
            config,
        }
    }

    /// 部署一台主机，永不返回错误
    pub async fn provision(&self, host: &Host, configs: &[RenderedConfig]) -> ProvisionResult {
        let roles: Vec<ServiceRole> = configs.iter().map(|c| c.role).collect();
        info!(hostname = %host.hostname, port = host.ssh_port, roles = ?roles, "Provisioning host");

        let mut session = match self.sessions.open(host, self.config.connect_timeout).await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    hostname = %host.hostname,
                    port = host.ssh_port,
                    user = %host.ssh_user,
                    step = "connect",
                    error = %e,
                    "Provisioning failed"
                );
                return ProvisionResult::failed(&host.hostname, e.to_string());
            }
        };

        let outcome = AssertUnwindSafe(self.run_steps(host, session.as_mut(), configs))
            .catch_unwind()
            .await;
        session.close().await;

        match outcome {
            Ok(Ok(())) => {
                info!(hostname = %host.hostname, roles = ?roles, "Host provisioned");
                ProvisionResult::success(&host.hostname, roles)
            }
            Ok(Err(e)) => {
                error!(
                    hostname = %host.hostname,
                    port = host.ssh_port,
                    roles = ?roles,
                    error = %e,
                    detail = ?e,
                    "Provisioning failed"
                );
                ProvisionResult::failed(&host.hostname, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(hostname = %host.hostname, panic = %message, "Provisioning panicked");
                ProvisionResult::failed(&host.hostname, format!("provisioning aborted: {}", message))
            }
        }
    }

    async fn run_steps(
        &self,
        host: &Host,
        session: &mut dyn RemoteSession,
        configs: &[RenderedConfig],
    ) -> Result<(), ProvisionError> {
        let install = RemoteCommand::best_effort(self.install_command());
        let output = install.run(session).await?;
        if !output.success() {
            warn!(
                hostname = %host.hostname,
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "rathole install command failed, assuming the binary is already present"
            );
        }

        RemoteCommand::fire_and_forget(format!("mkdir -p {}", RATHOLE_CONFIG_DIR))
            .run(session)
            .await?;

        for config in configs {
            let role = config.role;
            upload(session, &config_path(role), config.content.as_bytes()).await?;

            let unit = self.render_unit(role)?;
            upload(session, &unit_path(role), unit.as_bytes()).await?;

            let unit_name = role.unit_name();
            for command in [
                "systemctl daemon-reload".to_string(),
                format!("systemctl enable {}", unit_name),
                format!("systemctl restart {}", unit_name),
            ] {
                let output = RemoteCommand::fire_and_forget(command).run(session).await?;
                if !output.success() {
                    debug!(
                        hostname = %host.hostname,
                        role = %role,
                        exit_code = output.exit_code,
                        stderr = %output.stderr.trim(),
                        "systemctl returned non-zero"
                    );
                }
            }
            info!(hostname = %host.hostname, role = %role, unit = %unit_name, "Service restarted");
        }
        Ok(())
    }

    fn install_command(&self) -> String {
        let url = shell_quote(&self.config.rathole_download_url);
        format!(
            "wget -q {url} -O /tmp/rathole.zip && unzip -o /tmp/rathole.zip -d /tmp \
             && mv /tmp/rathole {bin} && chmod +x {bin}",
            url = url,
            bin = RATHOLE_BIN_PATH
        )
    }

    fn render_unit(&self, role: ServiceRole) -> Result<String, ProvisionError> {
        let mut ctx = Context::new();
        ctx.insert("role", role.as_str());
        ctx.insert("bin_path", RATHOLE_BIN_PATH);
        ctx.insert("config_dir", RATHOLE_CONFIG_DIR);
        ctx.insert("config_filename", &role.config_filename());
        self.templates
            .render(UNIT_TEMPLATE, &ctx)
            .map_err(|source| ProvisionError::Unit { role, source })
    }
}

/// 先写临时文件再改名，中断时保留旧文件
async fn upload(
    session: &mut dyn RemoteSession,
    path: &str,
    contents: &[u8],
) -> Result<(), RemoteError> {
    let staging = format!("{}.tmp", path);
    session.put_file(&staging, contents).await?;
    RemoteCommand::checked(format!("mv -f {} {}", shell_quote(&staging), shell_quote(path)))
        .run(session)
        .await?;
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
