//! 测试辅助：脚本化的远程传输、内存存储和数据构造

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{EngineConfig, EnvConfig};
use crate::domain::{ForwardingRule, Host, HostId, HostRole, RuleId, RuleType};
use crate::infra::cipher::{AesCipher, CredentialCipher};
use crate::infra::remote::{CommandOutput, RemoteConnector, RemoteError, RemoteSession, SshTarget};
use crate::infra::store::{FleetStore, SqliteStore, StoreError};
use crate::infra::templates::TemplateEngine;
use crate::services::{ConfigRenderer, Probes, Provisioner, SessionFactory};
use crate::state::AppState;

pub(crate) const TEST_KEY: [u8; 32] = [7u8; 32];
pub(crate) const TEST_PASSWORD: &str = "secret";
pub(crate) const TEST_API_KEY: &str = "test-key";

pub(crate) fn test_cipher() -> Arc<dyn CredentialCipher> {
    Arc::new(AesCipher::new(TEST_KEY))
}

pub(crate) fn host(id: HostId, hostname: &str, role: HostRole) -> Host {
    Host {
        id,
        alias: format!("{}-alias", hostname),
        hostname: hostname.to_string(),
        ssh_user: "root".to_string(),
        ssh_port: 22,
        encrypted_password: AesCipher::new(TEST_KEY).encrypt(TEST_PASSWORD).unwrap(),
        role,
    }
}

pub(crate) fn rule(
    id: RuleId,
    client_id: HostId,
    server_id: HostId,
    local_port: u16,
    remote_port: u16,
) -> ForwardingRule {
    ForwardingRule {
        id,
        name: "web".to_string(),
        rule_type: RuleType::Tcp,
        local_port,
        remote_port,
        client_id,
        server_id,
    }
}

pub(crate) fn templates() -> Arc<TemplateEngine> {
    Arc::new(TemplateEngine::embedded().unwrap())
}

pub(crate) fn renderer() -> ConfigRenderer {
    ConfigRenderer::new(templates(), 2333)
}

pub(crate) fn sessions(connector: &MockConnector) -> Arc<SessionFactory> {
    Arc::new(SessionFactory::new(Arc::new(connector.clone()), test_cipher()))
}

pub(crate) fn provisioner(connector: &MockConnector) -> Provisioner {
    Provisioner::new(sessions(connector), templates(), EngineConfig::default())
}

pub(crate) fn probes(connector: &MockConnector) -> Probes {
    Probes::new(sessions(connector), EngineConfig::default())
}

/// 内存数据库 + 脚本化传输的完整应用状态
pub(crate) async fn app_state(connector: &MockConnector) -> Arc<AppState> {
    let config = EnvConfig {
        api_key: TEST_API_KEY.to_string(),
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        credential_key: None,
        engine: EngineConfig::default(),
    };
    let store = SqliteStore::connect(&config.database_url, test_cipher())
        .await
        .unwrap();
    Arc::new(AppState::with_components(
        config,
        Arc::new(store),
        Arc::new(connector.clone()),
        test_cipher(),
        templates(),
    ))
}

// ========== 远程传输 ==========

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MockEvent {
    Exec(String),
    Put { path: String, contents: String },
    Close,
}

#[derive(Default)]
struct MockState {
    unreachable: HashSet<String>,
    delays: HashMap<String, Duration>,
    cancel_on_connect: HashMap<String, CancellationToken>,
    responses: Vec<(String, String, CommandOutput)>,
    failing_uploads: Vec<(String, String)>,
    failing_exec: Vec<(String, String)>,
    panicking_exec: Vec<(String, String)>,
    attempts: HashMap<String, usize>,
    events: HashMap<String, Vec<MockEvent>>,
}

/// 按主机名脚本化的远程传输，记录所有命令与上传
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn unreachable(self, hostname: &str) -> Self {
        self.state.lock().unwrap().unreachable.insert(hostname.to_string());
        self
    }

    pub(crate) fn delay(self, hostname: &str, delay: Duration) -> Self {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(hostname.to_string(), delay);
        self
    }

    pub(crate) fn cancel_on_connect(self, hostname: &str, cancel: CancellationToken) -> Self {
        self.state
            .lock()
            .unwrap()
            .cancel_on_connect
            .insert(hostname.to_string(), cancel);
        self
    }

    /// 命令包含 `pattern` 时返回 `output`，先注册的优先
    pub(crate) fn respond(self, hostname: &str, pattern: &str, output: CommandOutput) -> Self {
        self.state.lock().unwrap().responses.push((
            hostname.to_string(),
            pattern.to_string(),
            output,
        ));
        self
    }

    pub(crate) fn fail_upload(self, hostname: &str, pattern: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_uploads
            .push((hostname.to_string(), pattern.to_string()));
        self
    }

    /// 命令包含 `pattern` 时返回传输错误
    pub(crate) fn fail_exec(self, hostname: &str, pattern: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_exec
            .push((hostname.to_string(), pattern.to_string()));
        self
    }

    /// 命令包含 `pattern` 时 panic
    pub(crate) fn panic_on_exec(self, hostname: &str, pattern: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .panicking_exec
            .push((hostname.to_string(), pattern.to_string()));
        self
    }

    pub(crate) fn connect_attempts(&self, hostname: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(hostname)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn events(&self, hostname: &str) -> Vec<MockEvent> {
        self.state
            .lock()
            .unwrap()
            .events
            .get(hostname)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn commands(&self, hostname: &str) -> Vec<String> {
        self.events(hostname)
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Exec(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    /// 每个路径最后一次上传的内容
    pub(crate) fn uploads(&self, hostname: &str) -> HashMap<String, String> {
        self.events(hostname)
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Put { path, contents } => Some((path, contents)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RemoteConnector for MockConnector {
    async fn connect(
        &self,
        target: &SshTarget,
        _timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            *state.attempts.entry(target.hostname.clone()).or_default() += 1;
            if let Some(cancel) = state.cancel_on_connect.get(&target.hostname) {
                cancel.cancel();
            }
            if state.unreachable.contains(&target.hostname) {
                return Err(RemoteError::Connect {
                    target: target.address(),
                    reason: "connection refused".to_string(),
                });
            }
            state.delays.get(&target.hostname).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        assert_eq!(target.password, TEST_PASSWORD);

        Ok(Box::new(MockSession {
            hostname: target.hostname.clone(),
            state: self.state.clone(),
            closed: false,
        }))
    }
}

struct MockSession {
    hostname: String,
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl MockSession {
    fn record(&self, event: MockEvent) {
        self.state
            .lock()
            .unwrap()
            .events
            .entry(self.hostname.clone())
            .or_default()
            .push(event);
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.record(MockEvent::Exec(command.to_string()));
        let matches = |rules: &[(String, String)]| {
            rules
                .iter()
                .any(|(host, pattern)| *host == self.hostname && command.contains(pattern.as_str()))
        };
        let (fails, panics) = {
            let state = self.state.lock().unwrap();
            (matches(&state.failing_exec), matches(&state.panicking_exec))
        };
        if panics {
            panic!("scripted panic on `{}`", command);
        }
        if fails {
            return Err(RemoteError::Protocol(format!("channel closed while running `{}`", command)));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .responses
            .iter()
            .find(|(host, pattern, _)| *host == self.hostname && command.contains(pattern.as_str()))
            .map(|(_, _, output)| output.clone())
            .unwrap_or_default())
    }

    async fn put_file(&mut self, path: &str, contents: &[u8]) -> Result<(), RemoteError> {
        let failing = self
            .state
            .lock()
            .unwrap()
            .failing_uploads
            .iter()
            .any(|(host, pattern)| *host == self.hostname && path.contains(pattern.as_str()));
        if failing {
            return Err(RemoteError::Transfer {
                path: path.to_string(),
                reason: "permission denied".to_string(),
            });
        }
        self.record(MockEvent::Put {
            path: path.to_string(),
            contents: String::from_utf8_lossy(contents).into_owned(),
        });
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.record(MockEvent::Close);
        }
    }
}

// ========== 存储 ==========

/// 固定快照的内存存储
pub(crate) struct MemoryStore {
    hosts: Vec<Host>,
    rules: Vec<ForwardingRule>,
    fail: bool,
}

impl MemoryStore {
    pub(crate) fn new(hosts: Vec<Host>, rules: Vec<ForwardingRule>) -> Self {
        Self {
            hosts,
            rules,
            fail: false,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            hosts: Vec::new(),
            rules: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl FleetStore for MemoryStore {
    async fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        if self.fail {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(self.hosts.clone())
    }

    async fn list_rules(&self) -> Result<Vec<ForwardingRule>, StoreError> {
        if self.fail {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(self.rules.clone())
    }

    async fn get_host(&self, id: HostId) -> Result<Option<Host>, StoreError> {
        Ok(self.hosts.iter().find(|h| h.id == id).cloned())
    }
}
