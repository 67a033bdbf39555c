//! Relay configuration

use std::time::Duration;

/// 打印中继配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | RELAY_HTTP_PORT | 5000 | HTTP 服务端口 |
/// | RELAY_CONNECT_TIMEOUT_MS | 10000 | 打印时连接打印机超时 |
/// | RELAY_PROBE_TIMEOUT_MS | 5000 | 可达性检测超时 |
/// | RELAY_CHUNK_SIZE | 1024 | 单次写入字节数 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_JSON | false | JSON 格式日志 |
/// | LOG_DIR | (无) | 日志文件目录，不设置则只输出到控制台 |
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub http_port: u16,
    /// 打印时连接超时
    pub connect_timeout: Duration,
    /// 可达性检测超时
    pub probe_timeout: Duration,
    pub chunk_size: usize,
    pub log_level: String,
    pub log_json: bool,
    pub log_dir: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_port: 5000,
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            chunk_size: 1024,
            log_level: "info".to_string(),
            log_json: false,
            log_dir: None,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl RelayConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_port: env_or("RELAY_HTTP_PORT", defaults.http_port),
            connect_timeout: Duration::from_millis(env_or("RELAY_CONNECT_TIMEOUT_MS", 10_000)),
            probe_timeout: Duration::from_millis(env_or("RELAY_PROBE_TIMEOUT_MS", 5_000)),
            chunk_size: env_or("RELAY_CHUNK_SIZE", defaults.chunk_size).max(1),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: env_or("LOG_JSON", false),
            log_dir: std::env::var("LOG_DIR").ok().filter(|d| !d.is_empty()),
        }
    }
}
