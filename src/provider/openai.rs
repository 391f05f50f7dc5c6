//! OpenAI 兼容 Provider
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 推理深度为 High 且配置了 `reasoning_model` 时改用推理模型（如 deepseek-reasoner）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use super::{GenerationOutput, Invocation, Provider};
use crate::core::ProviderError;
use crate::reasoning::ReasoningDepth;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

/// OpenAI 兼容 Provider：持有 Client 与模型名
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    reasoning_model: Option<String>,
    pub usage: TokenUsage,
}

impl OpenAiProvider {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            reasoning_model: None,
            usage: TokenUsage::default(),
        }
    }

    pub fn with_reasoning_model(mut self, model: Option<String>) -> Self {
        self.reasoning_model = model;
        self
    }

    /// 根据推理深度选择模型
    pub fn model_for(&self, depth: ReasoningDepth) -> &str {
        match (depth, &self.reasoning_model) {
            (ReasoningDepth::High, Some(reasoner)) => reasoner,
            _ => &self.model,
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn generate(&self, invocation: &Invocation) -> Result<GenerationOutput, ProviderError> {
        let model = self.model_for(invocation.reasoning_depth).to_string();

        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(invocation.prompt.clone())
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&model)
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::InvalidResponse("no completion content".to_string()))?;

        Ok(GenerationOutput::new(content).with_model(model))
    }
}
