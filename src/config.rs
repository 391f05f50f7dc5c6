//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE_CHAIN__*` 覆盖（双下划线表示嵌套，如 `BEE_CHAIN__EVENTS__SECRET=xxx`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::health::HealthConfig;
use crate::provider::CostTier;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub chain: ChainSection,
    pub health: HealthSection,
    pub events: EventsSection,
    pub providers: Vec<ProviderSection>,
}

/// [chain] 段：默认预算、单次尝试上限、Adaptive 阈值
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSection {
    #[serde(default = "default_deadline_ms")]
    pub default_deadline_ms: u64,
    /// 单次尝试超时上限（毫秒），不设则只受整条链预算约束
    pub attempt_timeout_ms: Option<u64>,
    #[serde(default = "default_adaptive_prompt_chars")]
    pub adaptive_prompt_chars: usize,
}

fn default_deadline_ms() -> u64 {
    60_000
}

fn default_adaptive_prompt_chars() -> usize {
    crate::reasoning::DEFAULT_ADAPTIVE_PROMPT_CHARS
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            default_deadline_ms: default_deadline_ms(),
            attempt_timeout_ms: None,
            adaptive_prompt_chars: default_adaptive_prompt_chars(),
        }
    }
}

impl ChainSection {
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

/// [health] 段：熔断阈值与退避曲线
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub window_size: usize,
    pub latency_smoothing: f64,
    pub degrade_after_failures: u32,
    pub degraded_failure_rate: f64,
    pub min_samples_for_rate: usize,
    pub cooldown_after_failures: u32,
    pub base_cooldown_secs: u64,
    pub max_cooldown_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        let defaults = HealthConfig::default();
        Self {
            window_size: defaults.window_size,
            latency_smoothing: defaults.latency_smoothing,
            degrade_after_failures: defaults.degrade_after_failures,
            degraded_failure_rate: defaults.degraded_failure_rate,
            min_samples_for_rate: defaults.min_samples_for_rate,
            cooldown_after_failures: defaults.cooldown_after_failures,
            base_cooldown_secs: defaults.base_cooldown.as_secs(),
            max_cooldown_secs: defaults.max_cooldown.as_secs(),
        }
    }
}

impl HealthSection {
    pub fn to_health_config(&self) -> HealthConfig {
        HealthConfig {
            window_size: self.window_size.max(1),
            latency_smoothing: self.latency_smoothing.clamp(0.0, 1.0),
            degrade_after_failures: self.degrade_after_failures.max(1),
            degraded_failure_rate: self.degraded_failure_rate.clamp(0.0, 1.0),
            min_samples_for_rate: self.min_samples_for_rate,
            cooldown_after_failures: self.cooldown_after_failures.max(1),
            base_cooldown: Duration::from_secs(self.base_cooldown_secs),
            max_cooldown: Duration::from_secs(self.max_cooldown_secs),
        }
    }
}

/// [events] 段：签名密钥、Webhook 地址与投递重试
#[derive(Debug, Clone, Deserialize)]
pub struct EventsSection {
    #[serde(default = "default_secret")]
    pub secret: String,
    /// 未设置时事件写入日志
    pub webhook_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_secret() -> String {
    "bee-chain-dev-secret".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    200
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            webhook_url: None,
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI 兼容 API（OpenAI / DeepSeek / 自建代理）
    Openai,
    /// 脚本化 Provider，用于演示与测试
    Mock,
}

/// [[providers]] 段：一个候选后端
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    pub id: String,
    pub label: Option<String>,
    #[serde(default)]
    pub cost_tier: CostTier,
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub order: u32,
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// High 推理深度时使用的模型
    pub reasoning_model: Option<String>,
    /// 读取 API Key 的环境变量名
    pub api_key_env: Option<String>,
    /// mock：成功时返回的内容；不设则总是失败
    pub mock_response: Option<String>,
    /// mock：模拟延迟（毫秒）
    #[serde(default)]
    pub mock_latency_ms: u64,
}

fn default_capabilities() -> Vec<String> {
    vec!["text".to_string()]
}

/// 从 config 目录加载配置，环境变量 BEE_CHAIN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE_CHAIN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE_CHAIN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 只从指定文件加载（不查找默认文件），环境变量仍可覆盖
pub fn load_config_file(path: &std::path::Path) -> Result<AppConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path.to_path_buf()))
        .add_source(
            config::Environment::with_prefix("BEE_CHAIN")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

/// 重新从磁盘与环境变量加载配置；Provider 列表在注册表加载后不可变，调用方需重建引擎才能生效
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.chain.default_deadline(), Duration::from_secs(60));
        assert!(config.chain.attempt_timeout().is_none());
        assert_eq!(config.health.to_health_config(), HealthConfig::default());
        assert!(config.providers.is_empty());
        assert!(config.events.webhook_url.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[chain]
default_deadline_ms = 5000
attempt_timeout_ms = 1500

[health]
cooldown_after_failures = 4
max_cooldown_secs = 120

[events]
secret = "s3cret"

[[providers]]
id = "free-model"
cost_tier = "free"
order = 1
kind = "mock"
mock_response = "hello"

[[providers]]
id = "premium-model"
cost_tier = "premium"
capabilities = ["text", "code"]
order = 2
kind = "openai"
model = "deepseek-chat"
reasoning_model = "deepseek-reasoner"
"#
        )
        .unwrap();

        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.chain.default_deadline_ms, 5000);
        assert_eq!(config.chain.attempt_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.health.cooldown_after_failures, 4);
        assert_eq!(config.health.degrade_after_failures, 3);
        assert_eq!(config.events.secret, "s3cret");
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].capabilities, vec!["text"]);
        assert_eq!(config.providers[0].kind, ProviderKind::Mock);
        assert_eq!(config.providers[1].cost_tier, CostTier::Premium);
        assert_eq!(
            config.providers[1].reasoning_model.as_deref(),
            Some("deepseek-reasoner")
        );
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(load_config_file(std::path::Path::new("/nonexistent/bee-chain.toml")).is_err());
    }

    #[test]
    fn test_reload_reads_bundled_default() {
        let config = reload_config().unwrap();
        let ids: Vec<&str> = config.providers.iter().map(|p| p.id.as_str()).collect();
        assert!(ids.contains(&"free-tier"));
        assert!(ids.contains(&"standard-tier"));
    }

    #[test]
    fn test_health_section_clamps() {
        let section = HealthSection {
            window_size: 0,
            degraded_failure_rate: 3.0,
            ..HealthSection::default()
        };
        let config = section.to_health_config();
        assert_eq!(config.window_size, 1);
        assert_eq!(config.degraded_failure_rate, 1.0);
    }
}
