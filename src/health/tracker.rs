//! 健康跟踪器
//!
//! 每个 Provider 一把互斥锁，不同 Provider 之间互不争用；同一 Provider 的更新线性化，不丢计数。
//! 过期的冷却在下一次访问时惰性归一：状态回到 Degraded、清空滑动窗口，连续失败计数保留，
//! 因此冷却后若立即再次失败会以更长的退避重新熔断。
//! 一次恶化过程（从离开 Healthy 到恢复 Healthy）只对外报告一次。

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{HealthConfig, HealthStatus, ProviderHealthState};

/// 状态转换记录
#[derive(Debug, Clone, PartialEq)]
pub struct HealthTransition {
    pub from: HealthStatus,
    pub to: HealthStatus,
    pub state: ProviderHealthState,
    /// 本次转换开启了新的恶化过程
    pub starts_episode: bool,
}

impl HealthTransition {
    /// 是否需要对外报告降级：恶化方向且是本次恶化过程的第一次转换
    pub fn is_degradation(&self) -> bool {
        self.starts_episode
            && matches!(
                (self.from, self.to),
                (HealthStatus::Healthy, HealthStatus::Degraded)
                    | (HealthStatus::Healthy, HealthStatus::CoolingDown)
                    | (HealthStatus::Degraded, HealthStatus::CoolingDown)
            )
    }
}

#[derive(Debug)]
struct ProviderHealth {
    state: ProviderHealthState,
    /// true = 成功
    window: VecDeque<bool>,
    latency_samples: u64,
    /// 当前恶化过程已报告过；恢复 Healthy 时清除
    episode_reported: bool,
}

impl ProviderHealth {
    fn new(provider_id: &str) -> Self {
        Self {
            state: ProviderHealthState::new(provider_id),
            window: VecDeque::new(),
            latency_samples: 0,
            episode_reported: false,
        }
    }

    fn normalize(&mut self, now: DateTime<Utc>) {
        if self.state.status != HealthStatus::CoolingDown {
            return;
        }
        match self.state.cooldown_until {
            Some(until) if until > now => {}
            _ => {
                self.state.status = HealthStatus::Degraded;
                self.state.cooldown_until = None;
                self.window.clear();
                self.state.rolling_failure_rate = 0.0;
            }
        }
    }

    fn push(&mut self, success: bool, window_size: usize) {
        self.window.push_back(success);
        while self.window.len() > window_size.max(1) {
            self.window.pop_front();
        }
        let failures = self.window.iter().filter(|ok| !**ok).count();
        self.state.rolling_failure_rate = failures as f64 / self.window.len() as f64;
    }

    fn rate_exceeded(&self, config: &HealthConfig) -> bool {
        self.window.len() >= config.min_samples_for_rate
            && self.state.rolling_failure_rate >= config.degraded_failure_rate
    }
}

/// 所有 Provider 的健康状态，进程生命周期内常驻
#[derive(Debug)]
pub struct HealthTracker {
    config: HealthConfig,
    providers: HashMap<String, Mutex<ProviderHealth>>,
}

impl HealthTracker {
    pub fn new<I, S>(config: HealthConfig, provider_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let providers = provider_ids
            .into_iter()
            .map(|id| {
                let id = id.as_ref().to_string();
                let health = Mutex::new(ProviderHealth::new(&id));
                (id, health)
            })
            .collect();
        Self { config, providers }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn lock(&self, provider_id: &str) -> Option<MutexGuard<'_, ProviderHealth>> {
        self.providers
            .get(provider_id)
            .map(|m| m.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    pub fn is_eligible(&self, provider_id: &str) -> bool {
        self.is_eligible_at(provider_id, Utc::now())
    }

    /// 未知 Provider 一律不可选
    pub fn is_eligible_at(&self, provider_id: &str, now: DateTime<Utc>) -> bool {
        let Some(health) = self.lock(provider_id) else {
            tracing::debug!(provider = provider_id, "Unknown provider is never eligible");
            return false;
        };
        match (health.state.status, health.state.cooldown_until) {
            (HealthStatus::CoolingDown, Some(until)) => until <= now,
            _ => true,
        }
    }

    pub fn record_success(&self, provider_id: &str, latency_ms: u64) -> Option<HealthTransition> {
        self.record_success_at(provider_id, latency_ms, Utc::now())
    }

    /// 成功：清零连续失败、更新延迟 EMA 与失败率；
    /// CoolingDown 直接恢复 Healthy，Degraded 在失败率回落后恢复
    pub fn record_success_at(
        &self,
        provider_id: &str,
        latency_ms: u64,
        now: DateTime<Utc>,
    ) -> Option<HealthTransition> {
        let mut health = self.lock(provider_id)?;
        health.normalize(now);
        let from = health.state.status;

        health.state.consecutive_failures = 0;
        let latency = latency_ms as f64;
        health.state.avg_latency_ms = if health.latency_samples == 0 {
            latency
        } else {
            let alpha = self.config.latency_smoothing;
            alpha * latency + (1.0 - alpha) * health.state.avg_latency_ms
        };
        health.latency_samples += 1;

        if from == HealthStatus::CoolingDown {
            health.window.clear();
        }
        health.push(true, self.config.window_size);

        let recovered = match from {
            HealthStatus::CoolingDown => true,
            HealthStatus::Degraded => !health.rate_exceeded(&self.config),
            HealthStatus::Healthy => false,
        };
        if !recovered {
            return None;
        }

        health.state.status = HealthStatus::Healthy;
        health.state.cooldown_until = None;
        health.episode_reported = false;
        tracing::info!(provider = provider_id, from = %from, "Provider recovered to healthy");
        Some(HealthTransition {
            from,
            to: HealthStatus::Healthy,
            state: health.state.clone(),
            starts_episode: false,
        })
    }

    pub fn record_failure(&self, provider_id: &str) -> Option<HealthTransition> {
        self.record_failure_at(provider_id, Utc::now())
    }

    /// 失败：累加连续失败与失败率；跨过软阈值进入 Degraded，跨过硬阈值进入 CoolingDown。
    /// 已在冷却中的失败（并发在途调用）只延长冷却，不再产生转换
    pub fn record_failure_at(
        &self,
        provider_id: &str,
        now: DateTime<Utc>,
    ) -> Option<HealthTransition> {
        let mut health = self.lock(provider_id)?;
        health.normalize(now);
        let from = health.state.status;

        health.state.consecutive_failures = health.state.consecutive_failures.saturating_add(1);
        health.push(false, self.config.window_size);
        let failures = health.state.consecutive_failures;

        if failures >= self.config.cooldown_after_failures {
            let backoff = chrono::Duration::from_std(self.config.backoff(failures))
                .or_else(|_| chrono::Duration::from_std(self.config.max_cooldown))
                .unwrap_or(chrono::Duration::MAX);
            let until = now.checked_add_signed(backoff).unwrap_or(DateTime::<Utc>::MAX_UTC);
            health.state.cooldown_until = Some(match health.state.cooldown_until {
                Some(existing) if existing > until => existing,
                _ => until,
            });
            if from == HealthStatus::CoolingDown {
                return None;
            }
            health.state.status = HealthStatus::CoolingDown;
            tracing::warn!(
                provider = provider_id,
                consecutive_failures = failures,
                cooldown_until = %until,
                "Provider circuit opened, cooling down"
            );
        } else if from == HealthStatus::Healthy
            && (failures >= self.config.degrade_after_failures || health.rate_exceeded(&self.config))
        {
            health.state.status = HealthStatus::Degraded;
            tracing::warn!(
                provider = provider_id,
                consecutive_failures = failures,
                rolling_failure_rate = health.state.rolling_failure_rate,
                "Provider degraded"
            );
        } else {
            return None;
        }

        let starts_episode = !health.episode_reported;
        health.episode_reported = true;
        Some(HealthTransition {
            from,
            to: health.state.status,
            state: health.state.clone(),
            starts_episode,
        })
    }

    pub fn snapshot(&self, provider_id: &str) -> Option<ProviderHealthState> {
        self.snapshot_at(provider_id, Utc::now())
    }

    /// 读取快照；顺带归一已过期的冷却
    pub fn snapshot_at(&self, provider_id: &str, now: DateTime<Utc>) -> Option<ProviderHealthState> {
        let mut health = self.lock(provider_id)?;
        health.normalize(now);
        Some(health.state.clone())
    }

    /// 全部 Provider 的快照，按 id 排序
    pub fn snapshot_all(&self) -> Vec<ProviderHealthState> {
        let now = Utc::now();
        let mut ids: Vec<&String> = self.providers.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.snapshot_at(id, now))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn tracker() -> HealthTracker {
        HealthTracker::new(HealthConfig::default(), ["a", "b"])
    }

    #[test]
    fn test_new_provider_is_healthy_and_eligible() {
        let tracker = tracker();
        let state = tracker.snapshot("a").unwrap();
        assert_eq!(state.status, HealthStatus::Healthy);
        assert_eq!(state.consecutive_failures, 0);
        assert!(tracker.is_eligible("a"));
        assert!(!tracker.is_eligible("missing"));
    }

    #[test]
    fn test_degrades_at_soft_threshold_once() {
        let tracker = tracker();
        let now = Utc::now();
        assert!(tracker.record_failure_at("a", now).is_none());
        assert!(tracker.record_failure_at("a", now).is_none());

        let transition = tracker.record_failure_at("a", now).unwrap();
        assert_eq!(transition.from, HealthStatus::Healthy);
        assert_eq!(transition.to, HealthStatus::Degraded);
        assert!(transition.is_degradation());
        assert_eq!(transition.state.consecutive_failures, 3);

        // 第 4、5 次失败不再产生转换
        assert!(tracker.record_failure_at("a", now).is_none());
        assert!(tracker.record_failure_at("a", now).is_none());
        assert!(tracker.is_eligible_at("a", now));
    }

    #[test]
    fn test_cooldown_at_hard_threshold() {
        let tracker = tracker();
        let now = Utc::now();
        let transitions: Vec<_> = (0..6)
            .filter_map(|_| tracker.record_failure_at("a", now))
            .collect();

        assert_eq!(transitions.len(), 2);
        assert!(transitions[0].is_degradation());
        let cooling = &transitions[1];
        assert_eq!(cooling.to, HealthStatus::CoolingDown);
        // 同一恶化过程已在 Degraded 时报告过
        assert!(!cooling.is_degradation());
        assert_eq!(cooling.state.cooldown_until, Some(now + chrono::Duration::seconds(30)));

        assert!(!tracker.is_eligible_at("a", now));
        assert!(!tracker.is_eligible_at("a", now + chrono::Duration::seconds(29)));
        assert!(tracker.is_eligible_at("a", now + chrono::Duration::seconds(30)));
        // 其他 Provider 不受影响
        assert!(tracker.is_eligible_at("b", now));
    }

    #[test]
    fn test_failures_while_cooling_extend_without_transition() {
        let tracker = tracker();
        let now = Utc::now();
        for _ in 0..6 {
            tracker.record_failure_at("a", now);
        }
        assert!(tracker.record_failure_at("a", now).is_none());
        let state = tracker.snapshot_at("a", now).unwrap();
        assert_eq!(state.consecutive_failures, 7);
        assert_eq!(state.cooldown_until, Some(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_recovery_after_cooldown_expires() {
        let tracker = tracker();
        let now = Utc::now();
        for _ in 0..6 {
            tracker.record_failure_at("a", now);
        }
        let later = now + chrono::Duration::seconds(31);
        assert!(tracker.is_eligible_at("a", later));

        let transition = tracker.record_success_at("a", 120, later).unwrap();
        assert_eq!(transition.to, HealthStatus::Healthy);
        let state = tracker.snapshot_at("a", later).unwrap();
        assert_eq!(state.status, HealthStatus::Healthy);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.cooldown_until, None);
        assert_eq!(state.rolling_failure_rate, 0.0);
    }

    #[test]
    fn test_failure_right_after_cooldown_reopens_with_longer_backoff() {
        let tracker = tracker();
        let now = Utc::now();
        for _ in 0..6 {
            tracker.record_failure_at("a", now);
        }
        let later = now + chrono::Duration::seconds(31);
        let transition = tracker.record_failure_at("a", later).unwrap();
        assert_eq!(transition.from, HealthStatus::Degraded);
        assert_eq!(transition.to, HealthStatus::CoolingDown);
        assert_eq!(
            transition.state.cooldown_until,
            Some(later + chrono::Duration::seconds(60))
        );
        assert!(!transition.is_degradation());
    }

    #[test]
    fn test_direct_jump_to_cooldown_reports_once() {
        let config = HealthConfig {
            degrade_after_failures: 2,
            cooldown_after_failures: 2,
            ..HealthConfig::default()
        };
        let tracker = HealthTracker::new(config, ["a"]);
        let now = Utc::now();
        assert!(tracker.record_failure_at("a", now).is_none());
        let transition = tracker.record_failure_at("a", now).unwrap();
        assert_eq!(transition.from, HealthStatus::Healthy);
        assert_eq!(transition.to, HealthStatus::CoolingDown);
        assert!(transition.is_degradation());
    }

    #[test]
    fn test_new_episode_reports_again_after_recovery() {
        let tracker = tracker();
        let now = Utc::now();
        let first = (0..3)
            .filter_map(|_| tracker.record_failure_at("a", now))
            .last()
            .unwrap();
        assert!(first.is_degradation());

        tracker.record_success_at("a", 10, now).unwrap();
        let second = (0..3)
            .filter_map(|_| tracker.record_failure_at("a", now))
            .last()
            .unwrap();
        assert_eq!(second.to, HealthStatus::Degraded);
        assert!(second.is_degradation());
    }

    #[test]
    fn test_oversized_backoff_falls_back_to_max_cooldown() {
        let config = HealthConfig {
            degrade_after_failures: 1,
            cooldown_after_failures: 1,
            base_cooldown: std::time::Duration::from_secs(u64::MAX),
            max_cooldown: std::time::Duration::from_secs(u64::MAX),
            ..HealthConfig::default()
        };
        let tracker = HealthTracker::new(config, ["a"]);
        let now = Utc::now();
        let transition = tracker.record_failure_at("a", now).unwrap();
        assert_eq!(transition.to, HealthStatus::CoolingDown);
        assert!(transition.state.cooldown_until.is_some());
        assert!(!tracker.is_eligible_at("a", now + chrono::Duration::days(365)));
    }

    #[test]
    fn test_degraded_recovers_on_success() {
        let tracker = tracker();
        let now = Utc::now();
        for _ in 0..3 {
            tracker.record_failure_at("a", now);
        }
        let transition = tracker.record_success_at("a", 50, now).unwrap();
        assert_eq!(transition.from, HealthStatus::Degraded);
        assert_eq!(transition.to, HealthStatus::Healthy);
    }

    #[test]
    fn test_rate_based_degradation_needs_samples() {
        let config = HealthConfig {
            degrade_after_failures: 100,
            cooldown_after_failures: 100,
            min_samples_for_rate: 4,
            degraded_failure_rate: 0.5,
            ..HealthConfig::default()
        };
        let tracker = HealthTracker::new(config, ["a"]);
        let now = Utc::now();

        assert!(tracker.record_failure_at("a", now).is_none());
        tracker.record_success_at("a", 10, now);
        tracker.record_success_at("a", 10, now);
        let transition = tracker.record_failure_at("a", now).unwrap();
        assert_eq!(transition.to, HealthStatus::Degraded);
        assert_eq!(transition.state.rolling_failure_rate, 0.5);

        // 窗口 [F,T,T,F,F,T]：失败率仍为 0.5，成功不恢复
        assert!(tracker.record_failure_at("a", now).is_none());
        assert!(tracker.record_success_at("a", 10, now).is_none());
        assert_eq!(
            tracker.snapshot_at("a", now).unwrap().status,
            HealthStatus::Degraded
        );

        // [F,T,T,F,F,T,T]：回落到阈值以下
        let recovered = tracker.record_success_at("a", 10, now).unwrap();
        assert_eq!(recovered.to, HealthStatus::Healthy);
    }

    #[test]
    fn test_latency_ema() {
        let tracker = tracker();
        tracker.record_success("a", 100);
        assert_eq!(tracker.snapshot("a").unwrap().avg_latency_ms, 100.0);
        tracker.record_success("a", 200);
        let avg = tracker.snapshot("a").unwrap().avg_latency_ms;
        assert!((avg - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let config = HealthConfig {
            window_size: 4,
            degrade_after_failures: 100,
            cooldown_after_failures: 100,
            ..HealthConfig::default()
        };
        let tracker = HealthTracker::new(config, ["a"]);
        for _ in 0..4 {
            tracker.record_failure("a");
        }
        for _ in 0..4 {
            tracker.record_success("a", 1);
        }
        assert_eq!(tracker.snapshot("a").unwrap().rolling_failure_rate, 0.0);
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let config = HealthConfig {
            degrade_after_failures: 1_000,
            cooldown_after_failures: 1_000,
            ..HealthConfig::default()
        };
        let tracker = Arc::new(HealthTracker::new(config, ["a"]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        tracker.record_failure("a");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.snapshot("a").unwrap().consecutive_failures, 400);
    }

    #[test]
    fn test_snapshot_all_sorted() {
        let tracker = HealthTracker::new(HealthConfig::default(), ["z", "m", "a"]);
        let ids: Vec<_> = tracker
            .snapshot_all()
            .into_iter()
            .map(|s| s.provider_id)
            .collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }
}
