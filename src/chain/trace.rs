//! 链路追踪记录
//!
//! 每个请求一个 ChainTrace，执行期间只追加尝试；`finish` 消耗自身并封存结果。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::AttemptedProvider;

/// 执行器状态机：Pending → Attempting(i) → Succeeded / Attempting(i+1) / Exhausted / Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Pending,
    Attempting(u32),
    Succeeded,
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    Success,
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Success,
    Error,
}

/// 对单个 Provider 的一次尝试；error_code 仅在失败时存在
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAttempt {
    pub provider_id: String,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub result: AttemptResult,
    pub error_code: Option<String>,
}

impl ChainAttempt {
    pub fn success(
        provider_id: impl Into<String>,
        attempt_number: u32,
        started_at: DateTime<Utc>,
        latency_ms: u64,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            attempt_number,
            started_at,
            latency_ms,
            result: AttemptResult::Success,
            error_code: None,
        }
    }

    pub fn failure(
        provider_id: impl Into<String>,
        attempt_number: u32,
        started_at: DateTime<Utc>,
        latency_ms: u64,
        error_code: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            attempt_number,
            started_at,
            latency_ms,
            result: AttemptResult::Error,
            error_code: Some(error_code.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == AttemptResult::Success
    }
}

/// 一次逻辑请求的完整记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTrace {
    pub trace_id: String,
    pub mode: String,
    pub requester_context: Option<String>,
    pub attempts: Vec<ChainAttempt>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<TraceOutcome>,
}

impl ChainTrace {
    pub fn begin(mode: impl Into<String>, requester_context: Option<String>) -> Self {
        Self {
            trace_id: format!("trace_{}", uuid::Uuid::new_v4()),
            mode: mode.into(),
            requester_context,
            attempts: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            outcome: None,
        }
    }

    pub(crate) fn record(&mut self, attempt: ChainAttempt) {
        debug_assert!(
            !self.attempts.iter().any(|a| a.provider_id == attempt.provider_id),
            "provider attempted twice within one trace"
        );
        self.attempts.push(attempt);
    }

    pub(crate) fn finish(mut self, outcome: TraceOutcome) -> Self {
        self.completed_at = Some(Utc::now());
        self.outcome = Some(outcome);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// 按尝试顺序的 Provider id
    pub fn provider_ids(&self) -> Vec<String> {
        self.attempts.iter().map(|a| a.provider_id.clone()).collect()
    }

    pub fn last_attempt(&self) -> Option<&ChainAttempt> {
        self.attempts.last()
    }

    pub fn attempted_providers(&self) -> Vec<AttemptedProvider> {
        self.attempts
            .iter()
            .map(|a| AttemptedProvider {
                provider_id: a.provider_id.clone(),
                error_code: a.error_code.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_present_iff_error() {
        let now = Utc::now();
        let ok = ChainAttempt::success("a", 1, now, 10);
        let err = ChainAttempt::failure("b", 2, now, 10, "provider_timeout");
        assert!(ok.is_success() && ok.error_code.is_none());
        assert!(!err.is_success() && err.error_code.as_deref() == Some("provider_timeout"));
    }

    #[test]
    fn test_finish_seals_trace() {
        let mut trace = ChainTrace::begin("planning", None);
        assert!(trace.trace_id.starts_with("trace_"));
        assert!(!trace.is_complete());

        trace.record(ChainAttempt::failure("a", 1, Utc::now(), 5, "provider_transport_error"));
        trace.record(ChainAttempt::success("b", 2, Utc::now(), 7));
        let trace = trace.finish(TraceOutcome::Success);

        assert!(trace.is_complete());
        assert!(trace.completed_at.is_some());
        assert_eq!(trace.provider_ids(), vec!["a", "b"]);
        assert_eq!(trace.attempt_count(), 2);
        assert_eq!(trace.attempted_providers()[0].error_code.as_deref(), Some("provider_transport_error"));
    }

    #[test]
    fn test_trace_ids_unique() {
        assert_ne!(
            ChainTrace::begin("x", None).trace_id,
            ChainTrace::begin("x", None).trace_id
        );
    }
}
