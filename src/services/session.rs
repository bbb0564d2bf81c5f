//! 远程会话建立
//!
//! 部署与探测共用：解密凭据后通过 [`RemoteConnector`] 建立会话。

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::domain::Host;
use crate::infra::cipher::{CipherError, CredentialCipher};
use crate::infra::remote::{RemoteConnector, RemoteError, RemoteSession, SshTarget};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to decrypt credentials for {hostname}: {source}")]
    Credential {
        hostname: String,
        #[source]
        source: CipherError,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub struct SessionFactory {
    connector: Arc<dyn RemoteConnector>,
    cipher: Arc<dyn CredentialCipher>,
}

impl SessionFactory {
    pub fn new(connector: Arc<dyn RemoteConnector>, cipher: Arc<dyn CredentialCipher>) -> Self {
        Self { connector, cipher }
    }

    /// 解密凭据并构造连接目标
    pub fn target(&self, host: &Host) -> Result<SshTarget, SessionError> {
        let password = self
            .cipher
            .decrypt(&host.encrypted_password)
            .map_err(|source| SessionError::Credential {
                hostname: host.hostname.clone(),
                source,
            })?;
        Ok(SshTarget {
            hostname: host.hostname.clone(),
            port: host.ssh_port,
            user: host.ssh_user.clone(),
            password,
        })
    }

    /// 建立已认证的会话，调用方负责 `close()`
    pub async fn open(
        &self,
        host: &Host,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, SessionError> {
        let target = self.target(host)?;
        debug!(hostname = %host.hostname, port = host.ssh_port, user = %host.ssh_user, "Opening SSH session");
        Ok(self.connector.connect(&target, timeout).await?)
    }
}
