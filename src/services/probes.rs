//! 状态 / 日志 / 卸载
//!
//! 单主机的独立远程操作，与部署共用会话建立方式。

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::constants::{RATHOLE_BIN_PATH, RATHOLE_CONFIG_DIR};
use crate::config::EngineConfig;
use crate::domain::{Host, HostLogs, HostStatus, ServiceRole, UninstallReport};
use crate::infra::remote::{RemoteCommand, RemoteSession};
use crate::services::provision::unit_path;
use crate::services::session::{SessionError, SessionFactory};

/// 重复卸载时的正常输出
const BENIGN_STDERR: [&str; 4] = [
    "not loaded",
    "No such file or directory",
    "not found",
    "does not exist",
];

pub const STATUS_UNKNOWN: &str = "unknown";

pub struct Probes {
    sessions: Arc<SessionFactory>,
    config: EngineConfig,
}

impl Probes {
    pub fn new(sessions: Arc<SessionFactory>, config: EngineConfig) -> Self {
        Self { sessions, config }
    }

    /// 查询主机各角色服务的 active 状态，失败时为 "unknown"
    pub async fn status(&self, host: &Host) -> HostStatus {
        let roles = host.role.service_roles();
        let mut status = HostStatus::default();

        let mut session = match self
            .sessions
            .open(host, self.config.status_connect_timeout)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(hostname = %host.hostname, error = %e, "Status probe could not connect");
                for role in roles {
                    status.set(role, STATUS_UNKNOWN);
                }
                return status;
            }
        };

        for role in &roles {
            let command = format!("systemctl is-active {}", role.unit_name());
            match session.exec(&command).await {
                Ok(output) => {
                    let state = output.stdout.trim();
                    if state.is_empty() {
                        status.set(*role, "inactive");
                    } else {
                        status.set(*role, state);
                    }
                }
                Err(e) => {
                    warn!(hostname = %host.hostname, role = %role, error = %e, "Status query failed");
                    for role in &roles {
                        status.set(*role, STATUS_UNKNOWN);
                    }
                    break;
                }
            }
        }
        session.close().await;
        status
    }

    /// 最近的服务日志；失败信息作为日志内容返回
    pub async fn logs(&self, host: &Host, role: ServiceRole) -> HostLogs {
        let unit = role.unit_name();
        let mut session = match self.sessions.open(host, self.config.connect_timeout).await {
            Ok(session) => session,
            Err(e) => {
                warn!(hostname = %host.hostname, role = %role, error = %e, "Log fetch could not connect");
                return HostLogs {
                    logs: format!("Failed to fetch logs from {}: {}", host.hostname, e),
                };
            }
        };

        let command = format!(
            "journalctl -u {} -n {} --no-pager",
            unit, self.config.log_tail_lines
        );
        let logs = match session.exec(&command).await {
            Ok(output) if !output.stdout.trim().is_empty() => output.stdout,
            Ok(output) if !output.stderr.trim().is_empty() => output.stderr,
            Ok(_) => format!("No logs found for {}.", unit),
            Err(e) => format!("Failed to fetch logs from {}: {}", host.hostname, e),
        };
        session.close().await;
        HostLogs { logs }
    }

    /// 卸载 rathole：停止并禁用服务、删除 unit/配置/二进制
    ///
    /// 只有连接失败才返回错误；单条命令的失败作为警告收集。
    pub async fn uninstall(&self, host: &Host) -> Result<UninstallReport, SessionError> {
        info!(hostname = %host.hostname, "Uninstalling rathole");
        let mut session = self.sessions.open(host, self.config.connect_timeout).await?;
        let errors = run_teardown(session.as_mut(), &host.hostname).await;
        session.close().await;

        if errors.is_empty() {
            info!(hostname = %host.hostname, "Uninstall completed");
            Ok(UninstallReport {
                message: format!("Successfully uninstalled services from {}.", host.hostname),
                errors,
            })
        } else {
            warn!(hostname = %host.hostname, warnings = errors.len(), "Uninstall completed with warnings");
            Ok(UninstallReport {
                message: "Uninstall process completed with some warnings.".to_string(),
                errors,
            })
        }
    }
}

/// 卸载命令，顺序固定
pub fn teardown_commands() -> Vec<RemoteCommand> {
    let mut commands = Vec::new();
    for action in ["stop", "disable"] {
        for role in ServiceRole::ALL {
            commands.push(format!("systemctl {} {}", action, role.unit_name()));
        }
    }
    for role in ServiceRole::ALL {
        commands.push(format!("rm -f {}", unit_path(role)));
    }
    commands.push("systemctl daemon-reload".to_string());
    commands.push(format!("rm -rf {}", RATHOLE_CONFIG_DIR));
    commands.push(format!("rm -f {}", RATHOLE_BIN_PATH));

    commands.into_iter().map(RemoteCommand::best_effort).collect()
}

async fn run_teardown(session: &mut dyn RemoteSession, hostname: &str) -> Vec<String> {
    let mut errors = Vec::new();
    for command in teardown_commands() {
        match command.run(session).await {
            Ok(output) => {
                let stderr = output.stderr.trim();
                if !stderr.is_empty() && !is_benign(stderr) {
                    warn!(hostname = %hostname, command = %command.command, stderr = %stderr, "Teardown command reported an error");
                    errors.push(format!("CMD: `{}`\nError: {}", command.command, stderr));
                }
            }
            Err(e) => {
                warn!(hostname = %hostname, command = %command.command, error = %e, "Teardown command failed");
                errors.push(format!("{}: {}", command.command, e));
            }
        }
    }
    errors
}

fn is_benign(stderr: &str) -> bool {
    BENIGN_STDERR.iter().any(|pattern| stderr.contains(pattern))
}
