//! Link manager configuration

use crab_printer::{Framing, RADIO_CHUNK_SIZE, TextEncoding};
use std::time::Duration;

/// 打印机链路配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | LINK_TIMEOUT_MS | 10000 | 建立链路超时 |
/// | LINK_REACHABILITY_TIMEOUT_MS | 5000 | 网络打印机可达性超时 |
/// | LINK_CHUNK_SIZE | 244 | 无线链路单次写入上限 (字节) |
/// | LINK_CHUNK_PACING_MS | 8 | 分块之间的间隔 |
/// | LINK_AUTO_RECONNECT | 0 | 自动重连次数上限 (0 = 关闭) |
/// | LINK_RECONNECT_DELAY_MS | 5000 | 掉线后重连等待 |
/// | LINK_RECONNECT_STAGGER_MS | 300 | 批量重连逐台递增延迟 |
/// | LINK_RECONNECT_JITTER_MS | 200 | 批量重连随机抖动上限 |
/// | LINK_LIVENESS_INTERVAL_MS | 30000 | 存活检测周期 |
/// | LINK_VISIBILITY_DEBOUNCE_MS | 2000 | 可见性检测防抖 |
/// | LINK_METRICS_WINDOW | 50 | 指标滚动窗口 |
/// | LINK_SNAPSHOT_KEY | crab.printers | 持久化键 |
/// | LINK_CONTEXT_TOPIC | crab.printer-links | 跨上下文主题 |
/// | LINK_RELAY_URL | http://127.0.0.1:5000 | 打印中继地址 |
/// | LINK_PAPER_WIDTH | 32 | 每行字符数 |
/// | LINK_TEXT_ENCODING | gbk | 打印机代码页 |
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// 建立链路超时 (不含用户选择设备的时间)
    pub link_timeout: Duration,
    /// 网络打印机可达性超时
    pub reachability_timeout: Duration,
    /// Upper bound for chunks on transports that report a limit
    pub radio_chunk_size: usize,
    /// Delay between consecutive chunks, never after the last
    pub chunk_pacing: Duration,
    /// 自动重连次数上限，0 表示关闭
    pub auto_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub reconnect_stagger: Duration,
    pub reconnect_jitter: Duration,
    pub liveness_interval: Duration,
    pub visibility_debounce: Duration,
    pub metrics_window: usize,
    pub snapshot_key: String,
    pub context_topic: String,
    pub relay_url: String,
    pub framing: Framing,
    /// Status event channel capacity
    pub event_capacity: usize,
}

fn env_ms(key: &str, default: u64) -> Duration {
    Duration::from_millis(
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl LinkConfig {
    /// 从环境变量加载配置
    ///
    /// 未设置或无法解析的变量使用默认值
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            link_timeout: env_ms("LINK_TIMEOUT_MS", 10_000),
            reachability_timeout: env_ms("LINK_REACHABILITY_TIMEOUT_MS", 5_000),
            radio_chunk_size: env_parse("LINK_CHUNK_SIZE", RADIO_CHUNK_SIZE).max(1),
            chunk_pacing: env_ms("LINK_CHUNK_PACING_MS", 8),
            auto_reconnect_attempts: env_parse("LINK_AUTO_RECONNECT", 0),
            reconnect_delay: env_ms("LINK_RECONNECT_DELAY_MS", 5_000),
            reconnect_stagger: env_ms("LINK_RECONNECT_STAGGER_MS", 300),
            reconnect_jitter: env_ms("LINK_RECONNECT_JITTER_MS", 200),
            liveness_interval: env_ms("LINK_LIVENESS_INTERVAL_MS", 30_000),
            visibility_debounce: env_ms("LINK_VISIBILITY_DEBOUNCE_MS", 2_000),
            metrics_window: env_parse("LINK_METRICS_WINDOW", 50usize).max(1),
            snapshot_key: std::env::var("LINK_SNAPSHOT_KEY").unwrap_or(defaults.snapshot_key),
            context_topic: std::env::var("LINK_CONTEXT_TOPIC").unwrap_or(defaults.context_topic),
            relay_url: std::env::var("LINK_RELAY_URL").unwrap_or(defaults.relay_url),
            framing: Framing {
                width: env_parse("LINK_PAPER_WIDTH", defaults.framing.width),
                encoding: env_parse::<TextEncoding>("LINK_TEXT_ENCODING", defaults.framing.encoding),
                feed_lines: defaults.framing.feed_lines,
            },
            event_capacity: defaults.event_capacity,
        }
    }

    /// Enable automatic reconnection after a link drop
    pub fn with_auto_reconnect(mut self, attempts: u32, delay: Duration) -> Self {
        self.auto_reconnect_attempts = attempts;
        self.reconnect_delay = delay;
        self
    }

    pub fn with_link_timeout(mut self, timeout: Duration) -> Self {
        self.link_timeout = timeout;
        self
    }

    pub fn with_chunking(mut self, max_chunk: usize, pacing: Duration) -> Self {
        self.radio_chunk_size = max_chunk.max(1);
        self.chunk_pacing = pacing;
        self
    }

    /// Stagger step and jitter for `reconnect_all`
    pub fn with_stagger(mut self, step: Duration, jitter: Duration) -> Self {
        self.reconnect_stagger = step;
        self.reconnect_jitter = jitter;
        self
    }

    pub fn with_liveness(mut self, interval: Duration, debounce: Duration) -> Self {
        self.liveness_interval = interval;
        self.visibility_debounce = debounce;
        self
    }

    pub fn with_snapshot_key(mut self, key: impl Into<String>) -> Self {
        self.snapshot_key = key.into();
        self
    }

    pub fn with_context_topic(mut self, topic: impl Into<String>) -> Self {
        self.context_topic = topic.into();
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Whether a drop schedules an unattended reconnection
    pub fn auto_reconnect_enabled(&self) -> bool {
        self.auto_reconnect_attempts > 0
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            link_timeout: Duration::from_secs(10),
            reachability_timeout: Duration::from_secs(5),
            radio_chunk_size: RADIO_CHUNK_SIZE,
            chunk_pacing: Duration::from_millis(8),
            auto_reconnect_attempts: 0,
            reconnect_delay: Duration::from_secs(5),
            reconnect_stagger: Duration::from_millis(300),
            reconnect_jitter: Duration::from_millis(200),
            liveness_interval: Duration::from_secs(30),
            visibility_debounce: Duration::from_secs(2),
            metrics_window: 50,
            snapshot_key: "crab.printers".to_string(),
            context_topic: "crab.printer-links".to_string(),
            relay_url: "http://127.0.0.1:5000".to_string(),
            framing: Framing::default(),
            event_capacity: 256,
        }
    }
}
