//! rathole 配置渲染
//!
//! 纯函数：主机 + 规则快照 → 每台主机的配置列表。不做任何 I/O。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tera::Context;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{
    DeploymentToken, ForwardingRule, Host, HostId, RenderedConfig, RuleId, ServiceRole,
};
use crate::infra::templates::{TemplateEngine, CLIENT_TEMPLATE, SERVER_TEMPLATE};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("rule {rule_id} references unknown {side} host {host_id}")]
    Consistency {
        rule_id: RuleId,
        side: &'static str,
        host_id: HostId,
    },

    #[error("remote port {remote_port} is used by rules {first} and {second} on server host {server_id}")]
    DuplicateRemotePort {
        server_id: HostId,
        remote_port: u16,
        first: RuleId,
        second: RuleId,
    },
}

/// 模板上下文中的单个 rathole 服务
#[derive(Debug, Serialize)]
struct ServiceContext<'a> {
    name: String,
    rule_name: String,
    rule_type: &'static str,
    token: &'a str,
    local_port: u16,
    remote_port: u16,
}

/// 客户端分组结果：选中的服务端及其规则
struct ClientGroup<'a> {
    server: &'a Host,
    rules: Vec<&'a ForwardingRule>,
}

pub struct ConfigRenderer {
    templates: Arc<TemplateEngine>,
    bind_port: u16,
}

impl ConfigRenderer {
    pub fn new(templates: Arc<TemplateEngine>, bind_port: u16) -> Self {
        Self {
            templates,
            bind_port,
        }
    }

    /// 渲染整个集群的配置
    ///
    /// 返回值只包含至少有一份配置的主机；每台主机的配置顺序为 server 在前、client 在后。
    /// 任何悬空的主机引用或服务端口冲突都会使整个调用失败。
    pub fn render(
        &self,
        hosts: &[Host],
        rules: &[ForwardingRule],
        token: &DeploymentToken,
    ) -> Result<BTreeMap<HostId, Vec<RenderedConfig>>, RenderError> {
        let by_id: HashMap<HostId, &Host> = hosts.iter().map(|h| (h.id, h)).collect();
        check_references(rules, &by_id)?;

        let mut out = BTreeMap::new();
        for host in hosts {
            let mut configs = Vec::with_capacity(2);

            if host.role.serves() {
                let served: Vec<&ForwardingRule> =
                    rules.iter().filter(|r| r.server_id == host.id).collect();
                if !served.is_empty() {
                    check_remote_ports(host.id, &served)?;
                    configs.push(self.render_server(&served, token)?);
                }
            }

            if host.role.connects() {
                if let Some(group) = first_server_group(host, rules, &by_id) {
                    configs.push(self.render_client(&group, token)?);
                }
            }

            if !configs.is_empty() {
                debug!(
                    hostname = %host.hostname,
                    roles = ?configs.iter().map(|c| c.role).collect::<Vec<_>>(),
                    "Rendered host configs"
                );
                out.insert(host.id, configs);
            }
        }
        Ok(out)
    }

    fn render_server(
        &self,
        rules: &[&ForwardingRule],
        token: &DeploymentToken,
    ) -> Result<RenderedConfig, RenderError> {
        let mut ctx = Context::new();
        ctx.insert("bind_port", &self.bind_port);
        ctx.insert("services", &services(rules, token));
        Ok(RenderedConfig {
            role: ServiceRole::Server,
            content: self.templates.render(SERVER_TEMPLATE, &ctx)?,
        })
    }

    fn render_client(
        &self,
        group: &ClientGroup<'_>,
        token: &DeploymentToken,
    ) -> Result<RenderedConfig, RenderError> {
        let mut ctx = Context::new();
        ctx.insert("bind_port", &self.bind_port);
        ctx.insert("remote_server_addr", &remote_host(&group.server.hostname));
        ctx.insert("services", &services(&group.rules, token));
        Ok(RenderedConfig {
            role: ServiceRole::Client,
            content: self.templates.render(CLIENT_TEMPLATE, &ctx)?,
        })
    }
}

fn services<'a>(rules: &[&ForwardingRule], token: &'a DeploymentToken) -> Vec<ServiceContext<'a>> {
    rules
        .iter()
        .map(|rule| ServiceContext {
            name: rule.service_name(),
            // 规则名写在 TOML 注释里，不能跨行
            rule_name: rule.name.replace(['\r', '\n'], " "),
            rule_type: rule.rule_type.as_str(),
            token: token.as_str(),
            local_port: rule.local_port,
            remote_port: rule.remote_port,
        })
        .collect()
}

fn check_references(
    rules: &[ForwardingRule],
    hosts: &HashMap<HostId, &Host>,
) -> Result<(), RenderError> {
    for rule in rules {
        for (side, host_id) in [("client", rule.client_id), ("server", rule.server_id)] {
            if !hosts.contains_key(&host_id) {
                return Err(RenderError::Consistency {
                    rule_id: rule.id,
                    side,
                    host_id,
                });
            }
        }
    }
    Ok(())
}

fn check_remote_ports(server_id: HostId, rules: &[&ForwardingRule]) -> Result<(), RenderError> {
    let mut seen: HashMap<u16, RuleId> = HashMap::new();
    for rule in rules {
        if let Some(first) = seen.insert(rule.remote_port, rule.id) {
            return Err(RenderError::DuplicateRemotePort {
                server_id,
                remote_port: rule.remote_port,
                first,
                second: rule.id,
            });
        }
    }
    Ok(())
}

/// 客户端只能连接一个中继：取该客户端最早一条规则指向的服务端，其余服务端的规则本次不下发
fn first_server_group<'a>(
    client: &Host,
    rules: &'a [ForwardingRule],
    hosts: &HashMap<HostId, &'a Host>,
) -> Option<ClientGroup<'a>> {
    let own: Vec<&ForwardingRule> = rules.iter().filter(|r| r.client_id == client.id).collect();
    let server_id = own.first()?.server_id;
    let server = *hosts.get(&server_id)?;

    let (kept, dropped): (Vec<&ForwardingRule>, Vec<&ForwardingRule>) =
        own.into_iter().partition(|r| r.server_id == server_id);

    if !dropped.is_empty() {
        let skipped_servers: HashSet<HostId> = dropped.iter().map(|r| r.server_id).collect();
        warn!(
            hostname = %client.hostname,
            server = %server.hostname,
            dropped_rules = ?dropped.iter().map(|r| r.id).collect::<Vec<_>>(),
            skipped_servers = ?skipped_servers,
            "Client has rules for several servers, only the first server is deployed"
        );
    }

    Some(ClientGroup {
        server,
        rules: kept,
    })
}

/// IPv6 字面量需要方括号才能拼接端口
fn remote_host(hostname: &str) -> String {
    if hostname.contains(':') && !hostname.starts_with('[') {
        format!("[{}]", hostname)
    } else {
        hostname.to_string()
    }
}
