//! Provider 调用抽象
//!
//! 链执行器对每次尝试调用一次 `Provider::generate`；具体传输（HTTP、本地模型、Mock）由实现方负责。

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::ProviderError;
use crate::reasoning::ReasoningDepth;

/// 单次调用的输入
#[derive(Debug, Clone)]
pub struct Invocation {
    pub trace_id: String,
    pub prompt: String,
    /// 已解析的推理深度（不会是 Adaptive）
    pub reasoning_depth: ReasoningDepth,
    /// 本次尝试序号（从 1 开始）
    pub attempt_number: u32,
    /// 本次尝试可用的时间预算
    pub timeout: Duration,
    /// 调用方取消时触发；执行器也会直接丢弃进行中的 future
    pub cancel: CancellationToken,
}

/// Provider 返回的生成结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    pub content: String,
    /// 实际使用的模型名（可选）
    pub model: Option<String>,
}

impl GenerationOutput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Provider trait：所有后端（OpenAI 兼容 / Scripted）实现它
#[async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, invocation: &Invocation) -> Result<GenerationOutput, ProviderError>;
}
