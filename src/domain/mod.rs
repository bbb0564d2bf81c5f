//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod deploy;
pub mod host;
pub mod rule;

// Re-exports for convenience
pub use deploy::{
    DeploymentReport, DeploymentToken, HostLogs, HostStatus, ProvisionResult, ProvisionStatus,
    RenderedConfig, UninstallReport,
};
pub use host::{Host, HostDraft, HostId, HostInfo, HostRole, ServiceRole, DEFAULT_SSH_PORT};
pub use rule::{ForwardingRule, RuleDraft, RuleId, RuleType, RuleView};
