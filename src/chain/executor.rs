//! 链执行器
//!
//! 每个请求在入口处对 Provider 资格取一次快照（注册表能力过滤 ∩ 健康可选），之后严格按 order 升序、
//! 逐个串行尝试：同一 trace 内不重试同一 Provider，被跳过的 Provider 即使中途恢复也不再回头。
//! 单次尝试失败在本地恢复并驱动回退；只有 Exhausted / DeadlineExceeded / Cancelled 返回给调用方。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{
    ChainAttempt, ChainFailure, ChainState, ChainTrace, GenerationRequest, GenerationResponse,
    TraceOutcome,
};
use crate::core::{ChainError, ProviderError};
use crate::events::{
    CompletedData, EventEmitter, EventMetadata, EventType, FailedData, FallbackData,
    ProviderDegradedData,
};
use crate::health::{HealthTracker, HealthTransition};
use crate::provider::{GenerationOutput, Invocation, ProviderRegistry, RegisteredProvider};
use crate::reasoning::{ReasoningDepth, ReasoningSelector};

/// 单次尝试的结局
enum AttemptOutcome {
    Succeeded(GenerationOutput),
    Failed(ProviderError),
    /// 整条链的预算在调用中途耗尽
    DeadlineHit,
    Cancelled,
}

pub struct ChainExecutor {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    emitter: EventEmitter,
    selector: ReasoningSelector,
    /// 单次尝试的超时上限；None 表示只受整条链预算约束
    attempt_timeout: Option<Duration>,
}

impl std::fmt::Debug for ChainExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainExecutor")
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl ChainExecutor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthTracker>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            registry,
            health,
            emitter,
            selector: ReasoningSelector::default(),
            attempt_timeout: None,
        }
    }

    pub fn with_selector(mut self, selector: ReasoningSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub async fn execute(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ChainFailure> {
        self.execute_with_cancel(request, CancellationToken::new())
            .await
    }

    /// 执行一条链；`cancel` 触发时中止在途调用并返回 Cancelled
    pub async fn execute_with_cancel(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResponse, ChainFailure> {
        let clock = Instant::now();
        let mut trace = ChainTrace::begin(&request.mode, request.requester_context.clone());
        let metadata = EventMetadata::new(&trace.trace_id, request.requester_context.clone());
        let depth = self
            .selector
            .choose(&request.mode, request.reasoning_hint, &request.prompt);

        let candidates: Vec<&RegisteredProvider> = self
            .registry
            .eligible_providers(&request.required_capabilities)
            .into_iter()
            .filter(|p| {
                let eligible = self.health.is_eligible(p.id());
                if !eligible {
                    tracing::debug!(trace_id = %trace.trace_id, provider = p.id(), "Skipping provider in cooldown");
                }
                eligible
            })
            .collect();

        tracing::info!(
            trace_id = %trace.trace_id,
            mode = %request.mode,
            reasoning_depth = %depth,
            candidates = candidates.len(),
            "Chain started"
        );

        let mut state = ChainState::Pending;
        for (index, provider) in candidates.iter().enumerate() {
            let attempt_number = index as u32 + 1;

            if cancel.is_cancelled() {
                return Err(self.terminate(trace, ChainError::Cancelled, &metadata, clock));
            }
            let remaining = request.deadline.saturating_sub(clock.elapsed());
            if remaining.is_zero() {
                return Err(self.terminate(trace, ChainError::DeadlineExceeded, &metadata, clock));
            }

            state = transition(&trace, state, ChainState::Attempting(attempt_number));
            let (timeout, deadline_bound) = match self.attempt_timeout {
                Some(cap) if cap < remaining => (cap, false),
                _ => (remaining, true),
            };
            let invocation = Invocation {
                trace_id: trace.trace_id.clone(),
                prompt: request.prompt.clone(),
                reasoning_depth: depth,
                attempt_number,
                timeout,
                cancel: cancel.child_token(),
            };

            let started_at = Utc::now();
            let call_clock = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => AttemptOutcome::Cancelled,
                result = tokio::time::timeout(timeout, provider.client.generate(&invocation)) => {
                    match result {
                        Ok(Ok(output)) => match validate_output(&output, request.expect_json) {
                            Ok(()) => AttemptOutcome::Succeeded(output),
                            Err(e) => AttemptOutcome::Failed(e),
                        },
                        Ok(Err(e)) => AttemptOutcome::Failed(e),
                        Err(_) if deadline_bound => AttemptOutcome::DeadlineHit,
                        Err(_) => AttemptOutcome::Failed(ProviderError::Timeout(timeout)),
                    }
                }
            };
            let latency_ms = call_clock.elapsed().as_millis() as u64;

            match outcome {
                AttemptOutcome::Succeeded(output) => {
                    self.health.record_success(provider.id(), latency_ms);
                    trace.record(ChainAttempt::success(
                        provider.id(),
                        attempt_number,
                        started_at,
                        latency_ms,
                    ));
                    transition(&trace, state, ChainState::Succeeded);
                    return Ok(self.complete(trace, provider.id(), output, depth, latency_ms, &metadata));
                }
                AttemptOutcome::Cancelled => {
                    invocation.cancel.cancel();
                    trace.record(ChainAttempt::failure(
                        provider.id(),
                        attempt_number,
                        started_at,
                        latency_ms,
                        ChainError::Cancelled.code(),
                    ));
                    return Err(self.terminate(trace, ChainError::Cancelled, &metadata, clock));
                }
                AttemptOutcome::DeadlineHit => {
                    trace.record(ChainAttempt::failure(
                        provider.id(),
                        attempt_number,
                        started_at,
                        latency_ms,
                        ChainError::DeadlineExceeded.code(),
                    ));
                    return Err(self.terminate(trace, ChainError::DeadlineExceeded, &metadata, clock));
                }
                AttemptOutcome::Failed(error) => {
                    tracing::warn!(
                        trace_id = %trace.trace_id,
                        provider = provider.id(),
                        attempt_number,
                        latency_ms,
                        error = %error,
                        "Provider attempt failed"
                    );
                    if let Some(transition) = self.health.record_failure(provider.id()) {
                        self.report_degradation(&transition, &metadata);
                    }
                    trace.record(ChainAttempt::failure(
                        provider.id(),
                        attempt_number,
                        started_at,
                        latency_ms,
                        error.code(),
                    ));

                    let Some(next) = candidates.get(index + 1) else {
                        break;
                    };
                    if cancel.is_cancelled() {
                        return Err(self.terminate(trace, ChainError::Cancelled, &metadata, clock));
                    }
                    if clock.elapsed() >= request.deadline {
                        return Err(self.terminate(trace, ChainError::DeadlineExceeded, &metadata, clock));
                    }
                    self.emit(
                        EventType::Fallback,
                        &FallbackData {
                            trace_id: trace.trace_id.clone(),
                            from_provider_id: provider.id().to_string(),
                            from_error_code: error.code().to_string(),
                            to_provider_id: next.id().to_string(),
                            attempt_number: attempt_number + 1,
                            recovery_latency_ms: clock.elapsed().as_millis() as u64,
                        },
                        &metadata,
                    );
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(self.terminate(trace, ChainError::Cancelled, &metadata, clock));
        }
        transition(&trace, state, ChainState::Exhausted);
        let error = ChainError::AllProvidersExhausted {
            attempted: trace.provider_ids(),
        };
        Err(self.terminate(trace, error, &metadata, clock))
    }

    fn complete(
        &self,
        trace: ChainTrace,
        provider_id: &str,
        output: GenerationOutput,
        depth: ReasoningDepth,
        latency_ms: u64,
        metadata: &EventMetadata,
    ) -> GenerationResponse {
        let trace = trace.finish(TraceOutcome::Success);
        let attempt_count = trace.attempt_count();
        self.emit(
            EventType::Completed,
            &CompletedData {
                trace_id: trace.trace_id.clone(),
                provider_id: provider_id.to_string(),
                latency_ms,
                attempt_count,
                reasoning_depth: depth,
            },
            metadata,
        );
        tracing::info!(
            trace_id = %trace.trace_id,
            provider = provider_id,
            attempt_count,
            latency_ms,
            "Chain completed"
        );

        GenerationResponse {
            result: output.content,
            provider_id: provider_id.to_string(),
            attempt_count,
            reasoning_depth: depth,
            trace,
        }
    }

    /// 封存 trace、发出 chain.failed 并构造终止错误
    fn terminate(
        &self,
        trace: ChainTrace,
        error: ChainError,
        metadata: &EventMetadata,
        clock: Instant,
    ) -> ChainFailure {
        let outcome = match error {
            ChainError::Cancelled => TraceOutcome::Cancelled,
            _ => TraceOutcome::Exhausted,
        };
        let trace = trace.finish(outcome);
        let last = trace.last_attempt();
        let last_error_code = last
            .and_then(|a| a.error_code.clone())
            .or_else(|| Some(error.code().to_string()));

        self.emit(
            EventType::Failed,
            &FailedData {
                trace_id: trace.trace_id.clone(),
                providers_attempted: trace.attempted_providers(),
                total_attempts: trace.attempt_count(),
                total_latency_ms: clock.elapsed().as_millis() as u64,
                last_provider_id: last.map(|a| a.provider_id.clone()),
                last_error_code,
            },
            metadata,
        );
        tracing::error!(
            trace_id = %trace.trace_id,
            attempts = trace.attempt_count(),
            error = %error,
            "Chain failed"
        );

        ChainFailure { error, trace }
    }

    fn report_degradation(&self, transition: &HealthTransition, metadata: &EventMetadata) {
        if !transition.is_degradation() {
            return;
        }
        let state = &transition.state;
        self.emit(
            EventType::ProviderDegraded,
            &ProviderDegradedData {
                provider_id: state.provider_id.clone(),
                rolling_failure_rate: state.rolling_failure_rate,
                avg_latency_ms: state.avg_latency_ms,
                consecutive_failures: state.consecutive_failures,
                status: state.status,
                cooldown_until: state.cooldown_until,
            },
            metadata,
        );
    }

    /// 事件发送失败只记日志，不影响生成结果
    fn emit<T: Serialize>(&self, event_type: EventType, data: &T, metadata: &EventMetadata) {
        if let Err(e) = self.emitter.emit(event_type, data, metadata.clone()) {
            tracing::error!(event_type = %event_type, error = %e, "Failed to build chain event");
        }
    }
}

fn transition(trace: &ChainTrace, from: ChainState, to: ChainState) -> ChainState {
    tracing::debug!(trace_id = %trace.trace_id, ?from, ?to, "Chain state transition");
    to
}

/// 收到但不合格的响应按 Provider 失败处理
fn validate_output(output: &GenerationOutput, expect_json: bool) -> Result<(), ProviderError> {
    if output.content.trim().is_empty() {
        return Err(ProviderError::InvalidResponse("empty content".to_string()));
    }
    if expect_json {
        serde_json::from_str::<serde_json::Value>(&output.content)
            .map_err(|e| ProviderError::InvalidResponse(format!("expected JSON: {e}")))?;
    }
    Ok(())
}
