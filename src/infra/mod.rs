//! 基础设施模块
//!
//! 封装外部依赖（SSH、SQLite、模板引擎、凭据加密）

pub mod cipher;
pub mod remote;
pub mod ssh;
pub mod store;
pub mod templates;

pub use cipher::{AesCipher, CipherError, CredentialCipher};
pub use remote::{
    shell_quote, CommandOutput, CommandPolicy, RemoteCommand, RemoteConnector, RemoteError,
    RemoteSession, SshTarget,
};
pub use ssh::RusshConnector;
pub use store::{FleetStore, SqliteStore, StoreError};
pub use templates::TemplateEngine;
