//! 健康状态与阈值配置

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 熔断状态机：Healthy → Degraded（软信号，仍可选）→ CoolingDown（暂时剔除）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    CoolingDown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::CoolingDown => "cooling_down",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个 Provider 的健康快照（对外只读副本）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealthState {
    pub provider_id: String,
    pub consecutive_failures: u32,
    /// 滑动窗口内失败比例（0.0–1.0）
    pub rolling_failure_rate: f64,
    /// 延迟指数移动平均
    pub avg_latency_ms: f64,
    pub status: HealthStatus,
    /// 仅在 CoolingDown 时有值
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl ProviderHealthState {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            consecutive_failures: 0,
            rolling_failure_rate: 0.0,
            avg_latency_ms: 0.0,
            status: HealthStatus::Healthy,
            cooldown_until: None,
        }
    }
}

/// 健康跟踪阈值；全部可配置
#[derive(Debug, Clone, PartialEq)]
pub struct HealthConfig {
    /// 滑动窗口大小（最近 N 次尝试）
    pub window_size: usize,
    /// 延迟 EMA 平滑系数
    pub latency_smoothing: f64,
    /// 连续失败达到该值进入 Degraded
    pub degrade_after_failures: u32,
    /// 窗口失败率达到该值进入 Degraded
    pub degraded_failure_rate: f64,
    /// 窗口样本数不足时不按失败率判定
    pub min_samples_for_rate: usize,
    /// 连续失败达到该值进入 CoolingDown
    pub cooldown_after_failures: u32,
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            latency_smoothing: 0.2,
            degrade_after_failures: 3,
            degraded_failure_rate: 0.5,
            min_samples_for_rate: 10,
            cooldown_after_failures: 6,
            base_cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(600),
        }
    }
}

impl HealthConfig {
    /// 冷却时长：从熔断阈值起按 2 的幂增长，封顶 max_cooldown
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(self.cooldown_after_failures);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_cooldown
            .checked_mul(factor)
            .unwrap_or(self.max_cooldown)
            .min(self.max_cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = HealthConfig::default();
        assert_eq!(config.backoff(6), Duration::from_secs(30));
        assert_eq!(config.backoff(7), Duration::from_secs(60));
        assert_eq!(config.backoff(9), Duration::from_secs(240));
        assert_eq!(config.backoff(11), Duration::from_secs(600));
        assert_eq!(config.backoff(200), Duration::from_secs(600));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&HealthStatus::CoolingDown).unwrap();
        assert_eq!(json, "\"cooling_down\"");
    }
}
