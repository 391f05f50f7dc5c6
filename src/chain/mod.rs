//! 生成链：请求契约、追踪记录与执行器

pub mod executor;
pub mod request;
pub mod trace;

pub use executor::ChainExecutor;
pub use request::{ChainFailure, GenerationRequest, GenerationResponse};
pub use trace::{AttemptResult, ChainAttempt, ChainState, ChainTrace, TraceOutcome};
