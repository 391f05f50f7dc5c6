//! Bee Chain - 多 Provider 生成链引擎
//!
//! 模块划分：
//! - **chain**: 请求契约、ChainTrace 与按序回退的执行器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与引擎构建器
//! - **events**: Webhook 事件构建、HMAC 签名与有序投递
//! - **health**: Provider 健康跟踪与熔断冷却
//! - **observability**: tracing 日志初始化
//! - **provider**: Provider 抽象、注册表与实现（OpenAI 兼容 / 脚本化）
//! - **reasoning**: 推理深度选择

pub mod chain;
pub mod config;
pub mod core;
pub mod events;
pub mod health;
pub mod observability;
pub mod provider;
pub mod reasoning;

pub use chain::{ChainExecutor, ChainFailure, ChainTrace, GenerationRequest, GenerationResponse};
pub use crate::core::{ChainBuilder, ChainError};
pub use reasoning::ReasoningDepth;
