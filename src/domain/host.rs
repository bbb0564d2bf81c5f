//! 主机相关领域模型
//!
//! 纯数据类型，无 tokio/axum 依赖

use serde::{Deserialize, Serialize};

/// 主机 ID（由存储层分配）
pub type HostId = i64;

/// 默认 SSH 端口
pub const DEFAULT_SSH_PORT: u16 = 22;

/// 主机在 rathole 拓扑中扮演的角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    /// 公网中继，暴露服务端口
    Server,
    /// 内网节点，主动连接中继
    Client,
    /// 同时运行两种角色
    Both,
}

impl HostRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostRole::Server => "server",
            HostRole::Client => "client",
            HostRole::Both => "both",
        }
    }

    /// 从字符串解析，大小写不敏感
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "server" => Some(HostRole::Server),
            "client" => Some(HostRole::Client),
            "both" => Some(HostRole::Both),
            _ => None,
        }
    }

    /// 是否运行 rathole 服务端
    pub fn serves(&self) -> bool {
        matches!(self, HostRole::Server | HostRole::Both)
    }

    /// 是否运行 rathole 客户端
    pub fn connects(&self) -> bool {
        matches!(self, HostRole::Client | HostRole::Both)
    }

    /// 该主机上会存在的服务角色（顺序固定：server 在前）
    pub fn service_roles(&self) -> Vec<ServiceRole> {
        let mut roles = Vec::with_capacity(2);
        if self.serves() {
            roles.push(ServiceRole::Server);
        }
        if self.connects() {
            roles.push(ServiceRole::Client);
        }
        roles
    }
}

/// 单个 rathole 进程的角色，对应一份配置和一个 systemd unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    Server,
    Client,
}

impl ServiceRole {
    pub const ALL: [ServiceRole; 2] = [ServiceRole::Server, ServiceRole::Client];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRole::Server => "server",
            ServiceRole::Client => "client",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "server" => Some(ServiceRole::Server),
            "client" => Some(ServiceRole::Client),
            _ => None,
        }
    }

    /// 配置文件名，例如 `server.toml`
    pub fn config_filename(&self) -> String {
        format!("{}.toml", self.as_str())
    }

    /// systemd unit 名，例如 `rathole-server.service`
    pub fn unit_name(&self) -> String {
        format!("rathole-{}.service", self.as_str())
    }
}

impl std::fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 托管主机
///
/// `encrypted_password` 是不透明密文，只在建立 SSH 会话前解密。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    /// 唯一别名
    pub alias: String,
    /// 唯一网络地址
    pub hostname: String,
    pub ssh_user: String,
    pub ssh_port: u16,
    #[serde(skip_serializing)]
    pub encrypted_password: String,
    pub role: HostRole,
}

/// 对外返回的主机信息（不含凭据）
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HostInfo {
    pub id: HostId,
    pub alias: String,
    pub hostname: String,
    pub ssh_user: String,
    pub ssh_port: u16,
    pub role: HostRole,
}

impl From<&Host> for HostInfo {
    fn from(host: &Host) -> Self {
        Self {
            id: host.id,
            alias: host.alias.clone(),
            hostname: host.hostname.clone(),
            ssh_user: host.ssh_user.clone(),
            ssh_port: host.ssh_port,
            role: host.role,
        }
    }
}

/// 创建或更新主机的请求体
#[derive(Clone, Debug, Deserialize)]
pub struct HostDraft {
    pub alias: String,
    pub hostname: String,
    pub ssh_user: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// 明文密码；更新时为空表示保留原密码
    #[serde(default)]
    pub ssh_password: Option<String>,
    pub role: HostRole,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_role_parse() {
        assert_eq!(HostRole::parse("server"), Some(HostRole::Server));
        assert_eq!(HostRole::parse("BOTH"), Some(HostRole::Both));
        assert_eq!(HostRole::parse("relay"), None);
    }

    #[test]
    fn test_host_role_service_roles() {
        assert_eq!(HostRole::Server.service_roles(), vec![ServiceRole::Server]);
        assert_eq!(HostRole::Client.service_roles(), vec![ServiceRole::Client]);
        assert_eq!(
            HostRole::Both.service_roles(),
            vec![ServiceRole::Server, ServiceRole::Client]
        );
    }

    #[test]
    fn test_service_role_names() {
        assert_eq!(ServiceRole::Server.config_filename(), "server.toml");
        assert_eq!(ServiceRole::Client.unit_name(), "rathole-client.service");
    }

    #[test]
    fn test_host_draft_defaults() {
        let draft: HostDraft = serde_json::from_str(
            r#"{"alias":"edge","hostname":"10.0.0.1","ssh_user":"root","role":"client"}"#,
        )
        .unwrap();
        assert_eq!(draft.ssh_port, 22);
        assert!(draft.ssh_password.is_none());
        assert_eq!(draft.role, HostRole::Client);
    }

    #[test]
    fn test_host_serialization_hides_password() {
        let host = Host {
            id: 1,
            alias: "edge".to_string(),
            hostname: "10.0.0.1".to_string(),
            ssh_user: "root".to_string(),
            ssh_port: 22,
            encrypted_password: "secret".to_string(),
            role: HostRole::Server,
        };
        let json = serde_json::to_string(&host).unwrap();
        assert!(!json.contains("secret"));
    }
}
