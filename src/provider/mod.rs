//! Provider 层：注册表、调用抽象与实现（OpenAI 兼容 / Scripted）

pub mod mock;
pub mod openai;
pub mod registry;
pub mod traits;

pub use mock::{ScriptStep, ScriptedProvider};
pub use openai::{OpenAiProvider, TokenUsage};
pub use registry::{CostTier, ProviderDescriptor, ProviderRegistry, RegisteredProvider};
pub use traits::{GenerationOutput, Invocation, Provider};
