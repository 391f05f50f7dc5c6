//! 事件构建：校验类型、打上 id / 时间戳 / 类别 / 严重级别

use serde::Serialize;

use super::{EventMetadata, EventType, WebhookEvent};
use crate::core::EventError;

/// 按名称构建事件；名称不在事件表中时返回 UnknownEventType
pub fn build_event(
    event_type: &str,
    data: serde_json::Value,
    metadata: EventMetadata,
) -> Result<WebhookEvent, EventError> {
    let event_type: EventType = event_type.parse()?;
    Ok(WebhookEvent {
        id: format!("evt_{}", uuid::Uuid::new_v4()),
        event_type,
        category: event_type.category(),
        severity: event_type.severity(),
        timestamp: chrono::Utc::now(),
        data,
        metadata,
    })
}

/// 强类型 payload 的便捷入口
pub fn build_typed<T: Serialize>(
    event_type: EventType,
    data: &T,
    metadata: EventMetadata,
) -> Result<WebhookEvent, EventError> {
    let data = serde_json::to_value(data)?;
    build_event(event_type.as_str(), data, metadata)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::events::{CompletedData, EventCategory, Severity};
    use crate::reasoning::ReasoningDepth;

    #[test]
    fn test_build_event_stamps_envelope() {
        let event = build_event(
            "chain.failed",
            json!({"trace_id": "t1"}),
            EventMetadata::new("t1", Some("cli".into())),
        )
        .unwrap();

        assert!(event.id.starts_with("evt_"));
        assert_eq!(event.event_type, EventType::Failed);
        assert_eq!(event.category, EventCategory::Chain);
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.metadata.trace_id, "t1");
    }

    #[test]
    fn test_build_event_rejects_unknown_type() {
        let err = build_event("chain.unknown", json!({}), EventMetadata::default()).unwrap_err();
        assert!(matches!(err, EventError::UnknownEventType(_)));
    }

    #[test]
    fn test_envelope_wire_shape() {
        let data = CompletedData {
            trace_id: "t1".into(),
            provider_id: "p1".into(),
            latency_ms: 120,
            attempt_count: 1,
            reasoning_depth: ReasoningDepth::Low,
        };
        let event = build_typed(EventType::Completed, &data, EventMetadata::new("t1", None)).unwrap();
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "chain.completed");
        assert_eq!(value["category"], "chain");
        assert_eq!(value["severity"], "info");
        assert_eq!(value["data"]["provider_id"], "p1");
        assert_eq!(value["data"]["reasoning_depth"], "low");
        assert_eq!(value["metadata"]["trace_id"], "t1");
        assert!(value["metadata"]["requester_context"].is_null());
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = build_event("chain.completed", json!({}), EventMetadata::default()).unwrap();
        let b = build_event("chain.completed", json!({}), EventMetadata::default()).unwrap();
        assert_ne!(a.id, b.id);
    }
}
