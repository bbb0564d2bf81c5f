//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::config::constants;

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// API 密钥（x-api-key）
    pub api_key: String,
    /// HTTP 监听端口
    pub port: u16,
    /// SQLite 连接串
    pub database_url: String,
    /// 凭据加密密钥（base64 编码的 32 字节），未设置时使用临时密钥
    pub credential_key: Option<String>,
    /// 部署引擎配置
    pub engine: EngineConfig,
}

/// 部署引擎配置
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// rathole 二进制下载地址
    pub rathole_download_url: String,
    /// rathole 服务端控制通道端口
    pub rathole_bind_port: u16,
    /// 部署/卸载/日志的 SSH 连接超时
    pub connect_timeout: Duration,
    /// 状态探测的 SSH 连接超时
    pub status_connect_timeout: Duration,
    /// 单条远程命令超时
    pub command_timeout: Duration,
    /// 并发部署的主机数，1 表示逐台执行
    pub concurrency: usize,
    /// journalctl 输出行数
    pub log_tail_lines: usize,
    /// 自定义模板目录
    pub template_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rathole_download_url: constants::RATHOLE_DOWNLOAD_URL.to_string(),
            rathole_bind_port: constants::RATHOLE_BIND_PORT,
            connect_timeout: Duration::from_secs(10),
            status_connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(120),
            concurrency: 1,
            log_tail_lines: 50,
            template_dir: None,
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let api_key = load_with_fallback("API_KEY", "RATHOLE_FLEET_API_KEY")
            .unwrap_or_else(|| "change-me-in-production".to_string());
        if api_key == "change-me-in-production" {
            warn!("API_KEY is not set, using the default key");
        }

        let port = parse_var("PORT").unwrap_or(8000);

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://rathole_manager.db?mode=rwc".to_string());

        let credential_key = env::var("CREDENTIAL_KEY").ok().filter(|s| !s.is_empty());

        Self {
            api_key,
            port,
            database_url,
            credential_key,
            engine: EngineConfig::from_env(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let rathole_download_url =
            env::var("RATHOLE_DOWNLOAD_URL").unwrap_or(defaults.rathole_download_url);

        let rathole_bind_port = parse_var("RATHOLE_BIND_PORT").unwrap_or(defaults.rathole_bind_port);

        let connect_timeout = parse_var("SSH_CONNECT_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout);

        let status_connect_timeout = parse_var("STATUS_CONNECT_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.status_connect_timeout);

        let command_timeout = parse_var("SSH_COMMAND_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.command_timeout);

        let concurrency = parse_var::<usize>("DEPLOY_CONCURRENCY")
            .unwrap_or(defaults.concurrency)
            .max(1);

        let log_tail_lines = parse_var::<usize>("LOG_TAIL_LINES")
            .unwrap_or(defaults.log_tail_lines)
            .clamp(1, 5000);

        let template_dir = env::var("TEMPLATE_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Self {
            rathole_download_url,
            rathole_bind_port,
            connect_timeout,
            status_connect_timeout,
            command_timeout,
            concurrency,
            log_tail_lines,
            template_dir,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_fallback() {
        env::set_var("RF_TEST_PRIMARY", "primary_value");
        env::set_var("RF_TEST_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("RF_TEST_PRIMARY", "RF_TEST_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("RF_TEST_PRIMARY");
        assert_eq!(
            load_with_fallback("RF_TEST_PRIMARY", "RF_TEST_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("RF_TEST_FALLBACK");
        assert_eq!(load_with_fallback("RF_TEST_PRIMARY", "RF_TEST_FALLBACK"), None);
    }

    #[test]
    fn test_parse_var() {
        env::set_var("RF_TEST_NUMBER", " 42 ");
        assert_eq!(parse_var::<u16>("RF_TEST_NUMBER"), Some(42));
        env::set_var("RF_TEST_NUMBER", "not-a-number");
        assert_eq!(parse_var::<u16>("RF_TEST_NUMBER"), None);
        env::remove_var("RF_TEST_NUMBER");
    }

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.rathole_bind_port, 2333);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.status_connect_timeout, Duration::from_secs(5));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.log_tail_lines, 50);
    }
}
