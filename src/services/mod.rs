//! 服务层模块
//!
//! 部署引擎：配置渲染、单主机部署、编排，以及状态/日志/卸载探测

pub mod orchestrator;
pub mod probes;
pub mod provision;
pub mod render;
pub mod session;

pub use orchestrator::{DeployError, DeploymentOrchestrator, CANCELLED_MESSAGE};
pub use probes::Probes;
pub use provision::{ProvisionError, Provisioner};
pub use render::{ConfigRenderer, RenderError};
pub use session::{SessionError, SessionFactory};
