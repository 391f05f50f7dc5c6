//! 事件投递 Sink
//!
//! Sink 是外部协作方：返回 Ok 表示已确认，Retryable 由分发器退避重试，Permanent 直接放弃。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{EventType, SignedPayload, WebhookEvent};
use crate::core::SinkError;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &WebhookEvent, signed: &SignedPayload) -> Result<(), SinkError>;
}

/// 内存 Sink：保存已确认的事件，可模拟前 N 次投递失败
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<(WebhookEvent, SignedPayload)>>,
    fail_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前 n 次投递返回可重试错误
    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_remaining: AtomicU32::new(n),
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<WebhookEvent> {
        self.delivered
            .lock()
            .map(|d| d.iter().map(|(e, _)| e.clone()).collect())
            .unwrap_or_default()
    }

    pub fn events_of(&self, event_type: EventType) -> Vec<WebhookEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn payloads(&self) -> Vec<SignedPayload> {
        self.delivered
            .lock()
            .map(|d| d.iter().map(|(_, p)| p.clone()).collect())
            .unwrap_or_default()
    }

    /// 包括失败在内的投递次数
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn deliver(&self, event: &WebhookEvent, signed: &SignedPayload) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SinkError::Retryable("simulated outage".to_string()));
        }
        self.delivered
            .lock()
            .map_err(|_| SinkError::Permanent("sink poisoned".to_string()))?
            .push((event.clone(), signed.clone()));
        Ok(())
    }
}

/// 日志 Sink：未配置 webhook 时把事件写入 tracing
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn deliver(&self, event: &WebhookEvent, signed: &SignedPayload) -> Result<(), SinkError> {
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            trace_id = %event.metadata.trace_id,
            body = %signed.body,
            "Chain event"
        );
        Ok(())
    }
}

/// HTTP Webhook Sink：POST JSON 信封并附带签名头
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

/// 5xx / 429 可重试，其他 4xx 不可重试
fn classify_status(status: reqwest::StatusCode) -> Result<(), SinkError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(SinkError::Retryable(format!("webhook responded {status}")))
    } else {
        Err(SinkError::Permanent(format!("webhook responded {status}")))
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn deliver(&self, _event: &WebhookEvent, signed: &SignedPayload) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(signed.body.clone());
        for (name, value) in signed.headers() {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Retryable(e.to_string()))?;
        classify_status(response.status())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::events::{build_event, sign_at, EventMetadata};

    #[test]
    fn test_classify_status() {
        assert!(classify_status(reqwest::StatusCode::OK).is_ok());
        assert!(classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE)
            .unwrap_err()
            .is_retryable());
        assert!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS)
            .unwrap_err()
            .is_retryable());
        assert!(!classify_status(reqwest::StatusCode::BAD_REQUEST)
            .unwrap_err()
            .is_retryable());
    }

    #[tokio::test]
    async fn test_memory_sink_fails_first_n() {
        let sink = MemorySink::failing_first(2);
        let event = build_event("chain.completed", json!({}), EventMetadata::default()).unwrap();
        let signed = sign_at(&event, "secret", 1).unwrap();

        assert!(sink.deliver(&event, &signed).await.is_err());
        assert!(sink.deliver(&event, &signed).await.is_err());
        assert!(sink.deliver(&event, &signed).await.is_ok());
        assert_eq!(sink.attempts(), 3);
        assert_eq!(sink.events().len(), 1);
    }
}
