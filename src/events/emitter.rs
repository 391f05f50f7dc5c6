//! 事件分发器
//!
//! `emit` 只负责构建并入队，从不阻塞调用方；后台单任务按入队顺序签名并投递，
//! 可重试错误按指数退避重试，重试耗尽后记录 SinkDeliveryFailed。
//! 单任务串行投递保证同一 trace 内事件按发出顺序到达 Sink。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{build_event, build_typed, sign, EventMetadata, EventSink, EventType, WebhookEvent};
use crate::core::{EventError, SinkDeliveryFailed, SinkError};

/// 分发器配置
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    pub secret: String,
    /// 首次投递之外的最大重试次数
    pub max_retries: u32,
    pub retry_base: Duration,
}

impl EmitterConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            max_retries: 3,
            retry_base: Duration::from_millis(200),
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_base: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base = retry_base;
        self
    }
}

enum DispatchMessage {
    Deliver(WebhookEvent),
    Flush(oneshot::Sender<()>),
}

/// 事件发射器句柄，可随意 clone
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<DispatchMessage>,
}

impl EventEmitter {
    /// 启动后台分发任务（需要在 Tokio runtime 内调用）
    pub fn spawn(
        sink: Arc<dyn EventSink>,
        config: EmitterConfig,
    ) -> Result<(Self, JoinHandle<()>), EventError> {
        if config.secret.is_empty() {
            return Err(EventError::InvalidSecret);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatch_loop(rx, sink, config));
        Ok((Self { tx }, handle))
    }

    /// 构建强类型事件并入队，返回事件 id
    pub fn emit<T: Serialize>(
        &self,
        event_type: EventType,
        data: &T,
        metadata: EventMetadata,
    ) -> Result<String, EventError> {
        let event = build_typed(event_type, data, metadata)?;
        Ok(self.enqueue(event))
    }

    /// 按名称构建并入队；未知类型直接返回错误
    pub fn emit_raw(
        &self,
        event_type: &str,
        data: serde_json::Value,
        metadata: EventMetadata,
    ) -> Result<String, EventError> {
        let event = build_event(event_type, data, metadata)?;
        Ok(self.enqueue(event))
    }

    fn enqueue(&self, event: WebhookEvent) -> String {
        let id = event.id.clone();
        if self.tx.send(DispatchMessage::Deliver(event)).is_err() {
            tracing::error!(event_id = %id, "Event dispatcher stopped, event dropped");
        }
        id
    }

    /// 等待此前入队的事件全部处理完（成功或放弃）
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(DispatchMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<DispatchMessage>,
    sink: Arc<dyn EventSink>,
    config: EmitterConfig,
) {
    while let Some(message) = rx.recv().await {
        match message {
            DispatchMessage::Deliver(event) => {
                if let Err(e) = deliver_with_retry(sink.as_ref(), &config, &event).await {
                    tracing::error!(
                        event_id = %e.event_id,
                        event_type = %event.event_type,
                        attempts = e.attempts,
                        "{e}"
                    );
                }
            }
            DispatchMessage::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    tracing::debug!("Event dispatcher shut down");
}

async fn deliver_with_retry(
    sink: &dyn EventSink,
    config: &EmitterConfig,
    event: &WebhookEvent,
) -> Result<(), SinkDeliveryFailed> {
    let failed = |attempts, source| SinkDeliveryFailed {
        event_id: event.id.clone(),
        attempts,
        source,
    };

    let signed = sign(event, &config.secret)
        .map_err(|e| failed(0, SinkError::Permanent(e.to_string())))?;

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match sink.deliver(event, &signed).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt <= config.max_retries => {
                let delay = config
                    .retry_base
                    .saturating_mul(2u32.saturating_pow(attempt - 1));
                tracing::warn!(
                    event_id = %event.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Event delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(failed(attempt, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::events::{verify_signature, MemorySink};

    fn config() -> EmitterConfig {
        EmitterConfig::new("secret").with_retries(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_emit_delivers_in_order() {
        let sink = Arc::new(MemorySink::new());
        let (emitter, _handle) = EventEmitter::spawn(sink.clone(), config()).unwrap();

        for i in 0..5 {
            emitter
                .emit_raw("chain.fallback", json!({ "seq": i }), EventMetadata::new("t", None))
                .unwrap();
        }
        emitter.flush().await;

        let seqs: Vec<_> = sink.events().iter().map(|e| e.data["seq"].clone()).collect();
        assert_eq!(seqs, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn test_emit_unknown_type_fails_loudly() {
        let sink = Arc::new(MemorySink::new());
        let (emitter, _handle) = EventEmitter::spawn(sink.clone(), config()).unwrap();
        let err = emitter
            .emit_raw("chain.nope", json!({}), EventMetadata::default())
            .unwrap_err();
        assert!(matches!(err, EventError::UnknownEventType(_)));
        emitter.flush().await;
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_retryable_failures_are_retried() {
        let sink = Arc::new(MemorySink::failing_first(2));
        let (emitter, _handle) = EventEmitter::spawn(sink.clone(), config()).unwrap();
        emitter
            .emit_raw("chain.completed", json!({}), EventMetadata::default())
            .unwrap();
        emitter.flush().await;

        assert_eq!(sink.attempts(), 3);
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let sink = Arc::new(MemorySink::failing_first(10));
        let (emitter, _handle) = EventEmitter::spawn(sink.clone(), config()).unwrap();
        emitter
            .emit_raw("chain.completed", json!({}), EventMetadata::default())
            .unwrap();
        emitter.flush().await;

        assert_eq!(sink.attempts(), 4);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_deliveries_are_signed() {
        let sink = Arc::new(MemorySink::new());
        let (emitter, _handle) = EventEmitter::spawn(sink.clone(), config()).unwrap();
        emitter
            .emit_raw("chain.completed", json!({}), EventMetadata::default())
            .unwrap();
        emitter.flush().await;

        let payload = &sink.payloads()[0];
        assert!(verify_signature(
            &payload.body,
            &payload.signature,
            payload.timestamp,
            "secret",
            payload.timestamp,
            300
        ));
    }

    #[tokio::test]
    async fn test_empty_secret_rejected() {
        let sink = Arc::new(MemorySink::new());
        assert!(EventEmitter::spawn(sink, EmitterConfig::new("")).is_err());
    }
}
