//! 部署相关领域模型

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::host::ServiceRole;

/// 单次部署共享的 rathole token
///
/// 每次编排运行生成一次，不持久化；重新部署会轮换整个集群的 token。
#[derive(Clone, PartialEq, Eq)]
pub struct DeploymentToken(String);

impl DeploymentToken {
    /// 生成 16 字节随机 token（32 位十六进制）
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeploymentToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Debug for DeploymentToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DeploymentToken(***)")
    }
}

/// 渲染后的配置（仅存在于内存）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedConfig {
    pub role: ServiceRole,
    pub content: String,
}

/// 单主机部署状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStatus {
    Success,
    Failed,
}

/// 单主机部署结果
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProvisionResult {
    pub hostname: String,
    pub status: ProvisionStatus,
    /// 成功时部署的角色，与输入配置一一对应
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<ServiceRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProvisionResult {
    pub fn success(hostname: impl Into<String>, roles: Vec<ServiceRole>) -> Self {
        Self {
            hostname: hostname.into(),
            status: ProvisionStatus::Success,
            roles,
            error: None,
        }
    }

    pub fn failed(hostname: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            status: ProvisionStatus::Failed,
            roles: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ProvisionStatus::Success
    }
}

/// 一次编排运行的汇总
#[derive(Clone, Debug, Serialize)]
pub struct DeploymentReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ProvisionResult>,
}

impl DeploymentReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// 服务状态探测结果；主机不承担的角色为 None
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HostStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_status: Option<String>,
}

impl HostStatus {
    pub fn set(&mut self, role: ServiceRole, status: impl Into<String>) {
        match role {
            ServiceRole::Server => self.server_status = Some(status.into()),
            ServiceRole::Client => self.client_status = Some(status.into()),
        }
    }

    pub fn get(&self, role: ServiceRole) -> Option<&str> {
        match role {
            ServiceRole::Server => self.server_status.as_deref(),
            ServiceRole::Client => self.client_status.as_deref(),
        }
    }
}

/// 日志抓取结果；失败时 logs 为描述性错误信息
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HostLogs {
    pub logs: String,
}

/// 卸载结果
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UninstallReport {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_32_hex_chars() {
        let token = DeploymentToken::generate();
        assert_eq!(token.as_str().len(), 32);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_rotate() {
        assert_ne!(DeploymentToken::generate(), DeploymentToken::generate());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = DeploymentToken::from("abc123");
        assert!(!format!("{:?}", token).contains("abc123"));
    }

    #[test]
    fn test_provision_result_json_shape() {
        let ok = ProvisionResult::success("s1", vec![ServiceRole::Server]);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["roles"][0], "server");
        assert!(json.get("error").is_none());

        let failed = ProvisionResult::failed("c1", "connection refused");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "connection refused");
        assert!(json.get("roles").is_none());
    }

    #[test]
    fn test_host_status_set_get() {
        let mut status = HostStatus::default();
        status.set(ServiceRole::Client, "active");
        assert_eq!(status.get(ServiceRole::Client), Some("active"));
        assert_eq!(status.get(ServiceRole::Server), None);
    }
}
