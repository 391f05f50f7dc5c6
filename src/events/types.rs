//! 事件类型表与信封结构
//!
//! 类别与严重级别由静态表推导，调用方只提供类型与 data。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::EventError;
use crate::health::HealthStatus;
use crate::reasoning::ReasoningDepth;

/// 已知事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "chain.completed")]
    Completed,
    #[serde(rename = "chain.failed")]
    Failed,
    #[serde(rename = "chain.fallback")]
    Fallback,
    #[serde(rename = "chain.provider_degraded")]
    ProviderDegraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Chain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// 事件表中的一行
#[derive(Debug, Clone, Copy)]
pub struct EventSpec {
    pub event_type: EventType,
    pub name: &'static str,
    pub category: EventCategory,
    pub severity: Severity,
}

pub const EVENT_TABLE: &[EventSpec] = &[
    EventSpec {
        event_type: EventType::Completed,
        name: "chain.completed",
        category: EventCategory::Chain,
        severity: Severity::Info,
    },
    EventSpec {
        event_type: EventType::Failed,
        name: "chain.failed",
        category: EventCategory::Chain,
        severity: Severity::Error,
    },
    EventSpec {
        event_type: EventType::Fallback,
        name: "chain.fallback",
        category: EventCategory::Chain,
        severity: Severity::Warning,
    },
    EventSpec {
        event_type: EventType::ProviderDegraded,
        name: "chain.provider_degraded",
        category: EventCategory::Chain,
        severity: Severity::Warning,
    },
];

impl EventType {
    pub fn spec(&self) -> &'static EventSpec {
        EVENT_TABLE
            .iter()
            .find(|s| s.event_type == *self)
            .unwrap_or(&EVENT_TABLE[0])
    }

    pub fn as_str(&self) -> &'static str {
        self.spec().name
    }

    pub fn category(&self) -> EventCategory {
        self.spec().category
    }

    pub fn severity(&self) -> Severity {
        self.spec().severity
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EVENT_TABLE
            .iter()
            .find(|spec| spec.name == s)
            .map(|spec| spec.event_type)
            .ok_or_else(|| EventError::UnknownEventType(s.to_string()))
    }
}

/// 调用方上下文
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub trace_id: String,
    pub requester_context: Option<String>,
}

impl EventMetadata {
    pub fn new(trace_id: impl Into<String>, requester_context: Option<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            requester_context,
        }
    }
}

/// 事件信封：创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub category: EventCategory,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    pub metadata: EventMetadata,
}

/// chain.completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedData {
    pub trace_id: String,
    pub provider_id: String,
    pub latency_ms: u64,
    pub attempt_count: u32,
    pub reasoning_depth: ReasoningDepth,
}

/// chain.failed 中每个已尝试 Provider 的记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptedProvider {
    pub provider_id: String,
    pub error_code: Option<String>,
}

/// chain.failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedData {
    pub trace_id: String,
    pub providers_attempted: Vec<AttemptedProvider>,
    pub total_attempts: u32,
    pub total_latency_ms: u64,
    pub last_provider_id: Option<String>,
    pub last_error_code: Option<String>,
}

/// chain.fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackData {
    pub trace_id: String,
    pub from_provider_id: String,
    pub from_error_code: String,
    pub to_provider_id: String,
    /// 即将对 to_provider 发起的尝试序号
    pub attempt_number: u32,
    /// 从 trace 开始到切换发生时经过的毫秒数
    pub recovery_latency_ms: u64,
}

/// chain.provider_degraded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDegradedData {
    pub provider_id: String,
    pub rolling_failure_rate: f64,
    pub avg_latency_ms: f64,
    pub consecutive_failures: u32,
    pub status: HealthStatus,
    pub cooldown_until: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_table_severity() {
        assert_eq!(EventType::Completed.severity(), Severity::Info);
        assert_eq!(EventType::Fallback.severity(), Severity::Warning);
        assert_eq!(EventType::ProviderDegraded.severity(), Severity::Warning);
        assert_eq!(EventType::Failed.severity(), Severity::Error);
        for spec in EVENT_TABLE {
            assert_eq!(spec.category, EventCategory::Chain);
        }
    }

    #[test]
    fn test_event_type_parse_roundtrip_names() {
        for spec in EVENT_TABLE {
            assert_eq!(spec.name.parse::<EventType>().unwrap(), spec.event_type);
            assert_eq!(spec.event_type.as_str(), spec.name);
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let err = "chain.exploded".parse::<EventType>().unwrap_err();
        assert!(matches!(err, EventError::UnknownEventType(t) if t == "chain.exploded"));
    }

    #[test]
    fn test_event_type_serializes_as_dotted_name() {
        let json = serde_json::to_string(&EventType::ProviderDegraded).unwrap();
        assert_eq!(json, "\"chain.provider_degraded\"");
    }
}
