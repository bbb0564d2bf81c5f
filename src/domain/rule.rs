//! 转发规则领域模型

use serde::{Deserialize, Serialize};

use super::host::HostId;

pub type RuleId = i64;

/// 转发协议
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    #[default]
    Tcp,
    Udp,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Tcp => "tcp",
            RuleType::Udp => "udp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Some(RuleType::Tcp),
            "udp" => Some(RuleType::Udp),
            _ => None,
        }
    }
}

/// 转发规则：client 主机的 local_port 通过 server 主机的 remote_port 暴露
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForwardingRule {
    pub id: RuleId,
    pub name: String,
    pub rule_type: RuleType,
    pub local_port: u16,
    pub remote_port: u16,
    pub client_id: HostId,
    pub server_id: HostId,
}

impl ForwardingRule {
    /// rathole 服务名，服务端与客户端两侧必须一致
    ///
    /// 规则名可以是任意文本，这里只保留 `[a-z0-9_]` 并追加规则 ID 保证唯一。
    pub fn service_name(&self) -> String {
        let mut slug = String::with_capacity(self.name.len());
        let mut last_underscore = false;
        for c in self.name.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
                last_underscore = false;
            } else if !last_underscore && !slug.is_empty() {
                slug.push('_');
                last_underscore = true;
            }
        }
        let slug = slug.trim_end_matches('_');
        if slug.is_empty() {
            format!("rule_{}", self.id)
        } else {
            format!("{}_{}", slug, self.id)
        }
    }
}

/// 创建或更新规则的请求体
#[derive(Clone, Debug, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    #[serde(default)]
    pub rule_type: RuleType,
    pub local_port: u16,
    pub remote_port: u16,
    pub client_id: HostId,
    pub server_id: HostId,
}

/// 带主机名/别名的规则视图（用于列表展示）
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RuleView {
    #[serde(flatten)]
    pub rule: ForwardingRule,
    pub client_hostname: String,
    pub server_hostname: String,
    pub client_alias: String,
    pub server_alias: String,
}
