//! 链路错误类型
//!
//! 分三层：单次尝试错误（ProviderError，由执行器本地恢复并驱动回退）、
//! 终止错误（ChainError，返回给调用方）、以及注册表 / 事件 / 投递等周边错误。

use std::time::Duration;

use thiserror::Error;

/// 单次 Provider 调用失败（超时、传输、响应格式），只在链内部流转
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider transport error: {0}")]
    Transport(String),

    /// 收到了响应，但未通过结构校验
    #[error("Provider returned invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// 写入 ChainAttempt / 事件的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "provider_timeout",
            ProviderError::Transport(_) => "provider_transport_error",
            ProviderError::InvalidResponse(_) => "provider_invalid_response",
        }
    }
}

/// 终止错误：调用方只会看到这三种之一
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("All providers exhausted after {} attempt(s): {}", attempted.len(), attempted.join(", "))]
    AllProvidersExhausted { attempted: Vec<String> },

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Request cancelled")]
    Cancelled,
}

impl ChainError {
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::AllProvidersExhausted { .. } => "all_providers_exhausted",
            ChainError::DeadlineExceeded => "deadline_exceeded",
            ChainError::Cancelled => "cancelled",
        }
    }
}

/// 注册表加载错误（启动期致命）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Provider chain is empty")]
    EmptyChain,

    #[error("Duplicate provider id: {0}")]
    DuplicateProvider(String),

    #[error("Provider {0} declares no capabilities")]
    MissingCapabilities(String),
}

/// 事件构建 / 签名错误
#[derive(Error, Debug)]
pub enum EventError {
    /// 程序错误：事件类型不在已知表中，必须显式失败而不是静默丢弃
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid signing secret")]
    InvalidSecret,
}

/// Sink 投递结果：可重试 / 不可重试
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Retryable delivery error: {0}")]
    Retryable(String),

    #[error("Permanent delivery error: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Retryable(_))
    }
}

/// 重试耗尽后的投递失败；只记录日志，不影响生成结果
#[derive(Error, Debug)]
#[error("Sink delivery failed for event {event_id} after {attempts} attempt(s): {source}")]
pub struct SinkDeliveryFailed {
    pub event_id: String,
    pub attempts: u32,
    #[source]
    pub source: SinkError,
}

/// 从配置组装引擎时的错误
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Invalid provider config for {id}: {reason}")]
    InvalidProvider { id: String, reason: String },

    #[error("Event emitter error: {0}")]
    Events(#[from] EventError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
