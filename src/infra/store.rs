//! 主机与转发规则存储（SQLite）
//!
//! 部署引擎只通过 [`FleetStore`] 读取快照；管理接口的增删改在 [`SqliteStore`] 上完成，
//! 并在写入前校验唯一性与角色约束。

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::info;

use crate::domain::{
    ForwardingRule, Host, HostDraft, HostId, HostRole, RuleDraft, RuleId, RuleType, RuleView,
};
use crate::infra::cipher::{CipherError, CredentialCipher};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// 部署引擎读取的存储接口
#[async_trait]
pub trait FleetStore: Send + Sync {
    /// 全部主机，按 id 升序
    async fn list_hosts(&self) -> Result<Vec<Host>, StoreError>;

    /// 全部规则，按 id 升序
    async fn list_rules(&self) -> Result<Vec<ForwardingRule>, StoreError>;

    async fn get_host(&self, id: HostId) -> Result<Option<Host>, StoreError>;
}

const SCHEMA: [&str; 2] = [
    r#"CREATE TABLE IF NOT EXISTS hosts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        alias TEXT NOT NULL UNIQUE,
        hostname TEXT NOT NULL UNIQUE,
        ssh_user TEXT NOT NULL,
        ssh_port INTEGER NOT NULL DEFAULT 22,
        encrypted_password TEXT NOT NULL,
        role TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS forwarding_rules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        rule_type TEXT NOT NULL DEFAULT 'tcp',
        local_port INTEGER NOT NULL,
        remote_port INTEGER NOT NULL,
        client_id INTEGER NOT NULL REFERENCES hosts(id),
        server_id INTEGER NOT NULL REFERENCES hosts(id)
    )"#,
];

const HOST_COLUMNS: &str = "id, alias, hostname, ssh_user, ssh_port, encrypted_password, role";
const RULE_COLUMNS: &str = "id, name, rule_type, local_port, remote_port, client_id, server_id";

#[derive(sqlx::FromRow)]
struct HostRow {
    id: i64,
    alias: String,
    hostname: String,
    ssh_user: String,
    ssh_port: i64,
    encrypted_password: String,
    role: String,
}

impl TryFrom<HostRow> for Host {
    type Error = StoreError;

    fn try_from(row: HostRow) -> Result<Self, Self::Error> {
        let role = HostRole::parse(&row.role)
            .ok_or_else(|| StoreError::Invalid(format!("host {} has unknown role '{}'", row.id, row.role)))?;
        let ssh_port = u16::try_from(row.ssh_port)
            .map_err(|_| StoreError::Invalid(format!("host {} has invalid ssh_port {}", row.id, row.ssh_port)))?;
        Ok(Host {
            id: row.id,
            alias: row.alias,
            hostname: row.hostname,
            ssh_user: row.ssh_user,
            ssh_port,
            encrypted_password: row.encrypted_password,
            role,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: i64,
    name: String,
    rule_type: String,
    local_port: i64,
    remote_port: i64,
    client_id: i64,
    server_id: i64,
}

impl TryFrom<RuleRow> for ForwardingRule {
    type Error = StoreError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let invalid = |field: &str, value: &dyn std::fmt::Display| {
            StoreError::Invalid(format!("rule {} has invalid {} '{}'", row.id, field, value))
        };
        let rule_type = RuleType::parse(&row.rule_type).ok_or_else(|| invalid("rule_type", &row.rule_type))?;
        let local_port = u16::try_from(row.local_port).map_err(|_| invalid("local_port", &row.local_port))?;
        let remote_port = u16::try_from(row.remote_port).map_err(|_| invalid("remote_port", &row.remote_port))?;
        Ok(ForwardingRule {
            id: row.id,
            name: row.name,
            rule_type,
            local_port,
            remote_port,
            client_id: row.client_id,
            server_id: row.server_id,
        })
    }
}

/// SQLite 存储
pub struct SqliteStore {
    pool: SqlitePool,
    cipher: Arc<dyn CredentialCipher>,
}

impl SqliteStore {
    /// 连接数据库并建表
    pub async fn connect(url: &str, cipher: Arc<dyn CredentialCipher>) -> Result<Self, StoreError> {
        // 内存数据库每个连接独立，只能用单连接
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!(url = %url, "Database ready");

        Ok(Self { pool, cipher })
    }

    // ========== 主机 ==========

    pub async fn create_host(&self, draft: &HostDraft) -> Result<Host, StoreError> {
        validate_host_draft(draft)?;
        let password = draft
            .ssh_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| StoreError::Invalid("ssh_password is required".to_string()))?;

        self.ensure_unique_host(draft, None).await?;
        let encrypted = self.cipher.encrypt(password)?;

        let result = sqlx::query(
            "INSERT INTO hosts (alias, hostname, ssh_user, ssh_port, encrypted_password, role) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&draft.alias)
        .bind(&draft.hostname)
        .bind(&draft.ssh_user)
        .bind(i64::from(draft.ssh_port))
        .bind(&encrypted)
        .bind(draft.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        let id = result.last_insert_rowid();
        info!(host_id = id, alias = %draft.alias, hostname = %draft.hostname, "Host created");
        self.require_host(id).await
    }

    pub async fn update_host(&self, id: HostId, draft: &HostDraft) -> Result<Host, StoreError> {
        validate_host_draft(draft)?;
        let existing = self.require_host(id).await?;
        self.ensure_unique_host(draft, Some(id)).await?;
        self.ensure_role_change_allowed(&existing, draft.role).await?;

        let encrypted = match draft.ssh_password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => self.cipher.encrypt(password)?,
            None => existing.encrypted_password,
        };

        sqlx::query(
            "UPDATE hosts SET alias = ?, hostname = ?, ssh_user = ?, ssh_port = ?, \
             encrypted_password = ?, role = ? WHERE id = ?",
        )
        .bind(&draft.alias)
        .bind(&draft.hostname)
        .bind(&draft.ssh_user)
        .bind(i64::from(draft.ssh_port))
        .bind(&encrypted)
        .bind(draft.role.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        info!(host_id = id, alias = %draft.alias, "Host updated");
        self.require_host(id).await
    }

    /// 删除主机，同时删除所有引用它的规则
    pub async fn delete_host(&self, id: HostId) -> Result<u64, StoreError> {
        self.require_host(id).await?;

        let mut tx = self.pool.begin().await?;
        let removed_rules = sqlx::query("DELETE FROM forwarding_rules WHERE client_id = ? OR server_id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM hosts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(host_id = id, removed_rules, "Host deleted");
        Ok(removed_rules)
    }

    async fn require_host(&self, id: HostId) -> Result<Host, StoreError> {
        self.get_host(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Host {}", id)))
    }

    async fn ensure_unique_host(&self, draft: &HostDraft, exclude: Option<HostId>) -> Result<(), StoreError> {
        let conflict: Option<(String, String)> = sqlx::query_as(
            "SELECT alias, hostname FROM hosts WHERE (alias = ? OR hostname = ?) AND id != ? LIMIT 1",
        )
        .bind(&draft.alias)
        .bind(&draft.hostname)
        .bind(exclude.unwrap_or(-1))
        .fetch_optional(&self.pool)
        .await?;

        match conflict {
            Some((_, hostname)) if hostname == draft.hostname => {
                Err(StoreError::Conflict("Hostname already exists".to_string()))
            }
            Some(_) => Err(StoreError::Conflict("Alias already exists".to_string())),
            None => Ok(()),
        }
    }

    /// 角色变更不能让已有规则失效
    async fn ensure_role_change_allowed(&self, existing: &Host, new_role: HostRole) -> Result<(), StoreError> {
        if existing.role.connects() && !new_role.connects() {
            let count = self.count_rules("client_id", existing.id).await?;
            if count > 0 {
                return Err(StoreError::Conflict(format!(
                    "Host is the client of {} rule(s); role must stay client or both",
                    count
                )));
            }
        }
        if existing.role.serves() && !new_role.serves() {
            let count = self.count_rules("server_id", existing.id).await?;
            if count > 0 {
                return Err(StoreError::Conflict(format!(
                    "Host is the server of {} rule(s); role must stay server or both",
                    count
                )));
            }
        }
        Ok(())
    }

    async fn count_rules(&self, column: &'static str, host_id: HostId) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM forwarding_rules WHERE {} = ?", column);
        Ok(sqlx::query_scalar::<_, i64>(&sql).bind(host_id).fetch_one(&self.pool).await?)
    }

    // ========== 规则 ==========

    pub async fn create_rule(&self, draft: &RuleDraft) -> Result<RuleView, StoreError> {
        self.validate_rule(draft, None).await?;

        let result = sqlx::query(
            "INSERT INTO forwarding_rules (name, rule_type, local_port, remote_port, client_id, server_id) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&draft.name)
        .bind(draft.rule_type.as_str())
        .bind(i64::from(draft.local_port))
        .bind(i64::from(draft.remote_port))
        .bind(draft.client_id)
        .bind(draft.server_id)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        info!(rule_id = id, name = %draft.name, remote_port = draft.remote_port, "Rule created");
        self.require_rule_view(id).await
    }

    pub async fn update_rule(&self, id: RuleId, draft: &RuleDraft) -> Result<RuleView, StoreError> {
        self.require_rule(id).await?;
        self.validate_rule(draft, Some(id)).await?;

        sqlx::query(
            "UPDATE forwarding_rules SET name = ?, rule_type = ?, local_port = ?, remote_port = ?, \
             client_id = ?, server_id = ? WHERE id = ?",
        )
        .bind(&draft.name)
        .bind(draft.rule_type.as_str())
        .bind(i64::from(draft.local_port))
        .bind(i64::from(draft.remote_port))
        .bind(draft.client_id)
        .bind(draft.server_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        info!(rule_id = id, "Rule updated");
        self.require_rule_view(id).await
    }

    pub async fn delete_rule(&self, id: RuleId) -> Result<(), StoreError> {
        let affected = sqlx::query("DELETE FROM forwarding_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound(format!("Rule {}", id)));
        }
        info!(rule_id = id, "Rule deleted");
        Ok(())
    }

    /// 规则列表，附带两端主机名与别名
    pub async fn list_rule_views(&self) -> Result<Vec<RuleView>, StoreError> {
        let hosts = self.list_hosts().await?;
        let rules = self.list_rules().await?;
        rules
            .into_iter()
            .map(|rule| join_rule(rule, &hosts))
            .collect()
    }

    async fn require_rule(&self, id: RuleId) -> Result<ForwardingRule, StoreError> {
        let sql = format!("SELECT {} FROM forwarding_rules WHERE id = ?", RULE_COLUMNS);
        sqlx::query_as::<_, RuleRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Rule {}", id)))?
            .try_into()
    }

    async fn require_rule_view(&self, id: RuleId) -> Result<RuleView, StoreError> {
        let rule = self.require_rule(id).await?;
        let hosts = self.list_hosts().await?;
        join_rule(rule, &hosts)
    }

    async fn validate_rule(&self, draft: &RuleDraft, exclude: Option<RuleId>) -> Result<(), StoreError> {
        if draft.name.trim().is_empty() {
            return Err(StoreError::Invalid("Rule name must not be empty".to_string()));
        }
        if draft.local_port == 0 || draft.remote_port == 0 {
            return Err(StoreError::Invalid("Ports must be between 1 and 65535".to_string()));
        }

        let client = self.get_host(draft.client_id).await?;
        if !client.is_some_and(|h| h.role.connects()) {
            return Err(StoreError::NotFound(format!("Client host {}", draft.client_id)));
        }
        let server = self.get_host(draft.server_id).await?;
        if !server.is_some_and(|h| h.role.serves()) {
            return Err(StoreError::NotFound(format!("Server host {}", draft.server_id)));
        }

        let taken: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM forwarding_rules WHERE server_id = ? AND remote_port = ? AND id != ? LIMIT 1",
        )
        .bind(draft.server_id)
        .bind(i64::from(draft.remote_port))
        .bind(exclude.unwrap_or(-1))
        .fetch_optional(&self.pool)
        .await?;
        if taken.is_some() {
            return Err(StoreError::Conflict(format!(
                "Remote port {} is already in use.",
                draft.remote_port
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FleetStore for SqliteStore {
    async fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        let sql = format!("SELECT {} FROM hosts ORDER BY id", HOST_COLUMNS);
        sqlx::query_as::<_, HostRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Host::try_from)
            .collect()
    }

    async fn list_rules(&self) -> Result<Vec<ForwardingRule>, StoreError> {
        let sql = format!("SELECT {} FROM forwarding_rules ORDER BY id", RULE_COLUMNS);
        sqlx::query_as::<_, RuleRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ForwardingRule::try_from)
            .collect()
    }

    async fn get_host(&self, id: HostId) -> Result<Option<Host>, StoreError> {
        let sql = format!("SELECT {} FROM hosts WHERE id = ?", HOST_COLUMNS);
        sqlx::query_as::<_, HostRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Host::try_from)
            .transpose()
    }
}

fn join_rule(rule: ForwardingRule, hosts: &[Host]) -> Result<RuleView, StoreError> {
    let find = |id: HostId| {
        hosts
            .iter()
            .find(|h| h.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("Host {} referenced by rule {}", id, rule.id)))
    };
    let client = find(rule.client_id)?;
    let server = find(rule.server_id)?;
    Ok(RuleView {
        client_hostname: client.hostname.clone(),
        server_hostname: server.hostname.clone(),
        client_alias: client.alias.clone(),
        server_alias: server.alias.clone(),
        rule,
    })
}

fn validate_host_draft(draft: &HostDraft) -> Result<(), StoreError> {
    if draft.alias.trim().is_empty() {
        return Err(StoreError::Invalid("Alias must not be empty".to_string()));
    }
    if draft.ssh_user.trim().is_empty() {
        return Err(StoreError::Invalid("ssh_user must not be empty".to_string()));
    }
    if draft.ssh_port == 0 {
        return Err(StoreError::Invalid("ssh_port must be between 1 and 65535".to_string()));
    }
    // hostname 会被写入 TOML 字符串和 shell 命令
    let hostname_ok = !draft.hostname.is_empty()
        && !draft
            .hostname
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | '`' | '$' | ';'));
    if !hostname_ok {
        return Err(StoreError::Invalid(format!("Invalid hostname '{}'", draft.hostname)));
    }
    Ok(())
}

fn map_unique_violation(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict("Alias or hostname already exists".to_string())
        }
        _ => StoreError::Database(err),
    }
}
