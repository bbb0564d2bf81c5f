//! 远程执行接口
//!
//! 部署引擎只依赖这里的 trait，具体实现见 [`crate::infra::ssh`]。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// 远程操作错误
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("authentication rejected for {user}@{target}")]
    Auth { target: String, user: String },

    #[error("{operation} timed out after {}s", .timeout.as_secs())]
    Timeout { operation: String, timeout: Duration },

    #[error("command `{command}` exited with {exit_code}: {stderr}")]
    Command {
        command: String,
        exit_code: u32,
        stderr: String,
    },

    #[error("failed to upload {path}: {reason}")]
    Transfer { path: String, reason: String },

    #[error("ssh protocol error: {0}")]
    Protocol(String),
}

/// 连接目标（密码已解密）
#[derive(Clone)]
pub struct SshTarget {
    pub hostname: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl SshTarget {
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// 远程命令输出
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: u32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// 建立远程会话
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(
        &self,
        target: &SshTarget,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// 已认证的远程会话
#[async_trait]
pub trait RemoteSession: Send {
    /// 执行命令并等待退出；非零退出码不视为错误
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError>;

    /// 写入远程文件（覆盖）
    async fn put_file(&mut self, path: &str, contents: &[u8]) -> Result<(), RemoteError>;

    /// 关闭会话，可重复调用
    async fn close(&mut self);
}

/// 命令的结果处理策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandPolicy {
    /// 非零退出即失败
    Checked,
    /// 非零退出记录警告后继续
    BestEffort,
    /// 不检查退出码
    FireAndForget,
}

/// 带策略的远程命令
#[derive(Clone, Debug)]
pub struct RemoteCommand {
    pub command: String,
    pub policy: CommandPolicy,
}

impl RemoteCommand {
    pub fn checked(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            policy: CommandPolicy::Checked,
        }
    }

    pub fn best_effort(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            policy: CommandPolicy::BestEffort,
        }
    }

    pub fn fire_and_forget(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            policy: CommandPolicy::FireAndForget,
        }
    }

    /// 按策略执行：Checked 的非零退出转为 [`RemoteError::Command`]
    pub async fn run(&self, session: &mut dyn RemoteSession) -> Result<CommandOutput, RemoteError> {
        let output = session.exec(&self.command).await?;
        if self.policy == CommandPolicy::Checked && !output.success() {
            return Err(RemoteError::Command {
                command: self.command.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// 单引号 shell 转义
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
