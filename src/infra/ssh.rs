//! 基于 russh 的 SSH 客户端
//!
//! 文件上传通过 `cat > path` 通道写入，不依赖远程 sftp 子系统。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tracing::{debug, warn};

use super::remote::{shell_quote, CommandOutput, RemoteConnector, RemoteError, RemoteSession, SshTarget};

/// 没有收到 exit-status 时使用的退出码（例如进程被信号终止）
const UNKNOWN_EXIT_CODE: u32 = 255;

/// SSH 连接器
pub struct RusshConnector {
    config: Arc<client::Config>,
    command_timeout: Duration,
}

impl RusshConnector {
    pub fn new(command_timeout: Duration) -> Self {
        let config = client::Config {
            inactivity_timeout: Some(command_timeout + Duration::from_secs(30)),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
            command_timeout,
        }
    }
}

#[async_trait]
impl RemoteConnector for RusshConnector {
    async fn connect(
        &self,
        target: &SshTarget,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let address = target.address();
        debug!(target = %address, user = %target.user, "Opening SSH session");

        let handler = HostKeyHandler {
            address: address.clone(),
        };
        let connect = client::connect(
            self.config.clone(),
            (target.hostname.as_str(), target.port),
            handler,
        );

        let mut handle = match tokio::time::timeout(timeout, connect).await {
            Err(_) => {
                return Err(RemoteError::Timeout {
                    operation: format!("connect to {}", address),
                    timeout,
                })
            }
            Ok(Err(e)) => {
                return Err(RemoteError::Connect {
                    target: address,
                    reason: e.to_string(),
                })
            }
            Ok(Ok(handle)) => handle,
        };

        let authenticated = tokio::time::timeout(
            timeout,
            handle.authenticate_password(&target.user, &target.password),
        )
        .await
        .map_err(|_| RemoteError::Timeout {
            operation: format!("authenticate to {}", address),
            timeout,
        })?
        .map_err(|e| RemoteError::Connect {
            target: address.clone(),
            reason: e.to_string(),
        })?;

        if !authenticated {
            return Err(RemoteError::Auth {
                target: address,
                user: target.user.clone(),
            });
        }

        Ok(Box::new(RusshSession {
            handle: Some(handle),
            address,
            command_timeout: self.command_timeout,
        }))
    }
}

/// 接受任意主机密钥并记录指纹
struct HostKeyHandler {
    address: String,
}

#[async_trait]
impl client::Handler for HostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            target = %self.address,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting SSH host key"
        );
        Ok(true)
    }
}

/// 已认证的 SSH 会话
pub struct RusshSession {
    handle: Option<Handle<HostKeyHandler>>,
    address: String,
    command_timeout: Duration,
}

impl RusshSession {
    async fn open_channel(&self) -> Result<Channel<client::Msg>, RemoteError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| RemoteError::Protocol(format!("session to {} is closed", self.address)))?;
        handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Protocol(e.to_string()))
    }

    async fn with_timeout<T>(
        &self,
        operation: String,
        fut: impl std::future::Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        tokio::time::timeout(self.command_timeout, fut)
            .await
            .map_err(|_| RemoteError::Timeout {
                operation,
                timeout: self.command_timeout,
            })?
    }
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        let operation = format!("`{}` on {}", command, self.address);
        self.with_timeout(operation, async {
            let mut channel = self.open_channel().await?;
            channel
                .exec(true, command)
                .await
                .map_err(|e| RemoteError::Protocol(e.to_string()))?;
            Ok(collect_output(&mut channel).await)
        })
        .await
    }

    async fn put_file(&mut self, path: &str, contents: &[u8]) -> Result<(), RemoteError> {
        let operation = format!("upload of {} to {}", path, self.address);
        let transfer_error = |reason: String| RemoteError::Transfer {
            path: path.to_string(),
            reason,
        };

        self.with_timeout(operation, async {
            let mut channel = self.open_channel().await?;
            channel
                .exec(true, format!("cat > {}", shell_quote(path)))
                .await
                .map_err(|e| transfer_error(e.to_string()))?;
            channel
                .data(contents)
                .await
                .map_err(|e| transfer_error(e.to_string()))?;
            channel
                .eof()
                .await
                .map_err(|e| transfer_error(e.to_string()))?;

            let output = collect_output(&mut channel).await;
            if !output.success() {
                return Err(transfer_error(format!(
                    "exit {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                )));
            }
            Ok(())
        })
        .await
    }

    async fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            warn!(target = %self.address, error = %e, "SSH disconnect failed");
        }
        debug!(target = %self.address, "SSH session closed");
    }
}

/// 读取通道直到关闭
async fn collect_output(channel: &mut Channel<client::Msg>) -> CommandOutput {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                stderr.extend_from_slice(data)
            }
            ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
            _ => {}
        }
    }

    CommandOutput {
        exit_code: exit_code.unwrap_or(UNKNOWN_EXIT_CODE),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    }
}
