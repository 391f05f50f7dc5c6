//! 生命周期事件：类型表、信封构建、签名、投递 Sink 与后台分发器

pub mod builder;
pub mod emitter;
pub mod signing;
pub mod sink;
pub mod types;

pub use builder::{build_event, build_typed};
pub use emitter::{EmitterConfig, EventEmitter};
pub use signing::{
    sign, sign_at, verify_signature, SignedPayload, DEFAULT_TOLERANCE_SECS, EVENT_HEADER,
    SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
pub use sink::{EventSink, HttpSink, LogSink, MemorySink};
pub use types::{
    AttemptedProvider, CompletedData, EventCategory, EventMetadata, EventType, FailedData,
    FallbackData, ProviderDegradedData, Severity, WebhookEvent, EVENT_TABLE,
};
