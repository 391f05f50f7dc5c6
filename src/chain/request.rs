//! 调用方请求 / 响应契约

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ChainTrace;
use crate::core::ChainError;
use crate::reasoning::ReasoningDepth;

/// 一次逻辑生成请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub required_capabilities: Vec<String>,
    /// 调用方模式标签（discussion / planning / execution / 自定义 persona）
    pub mode: String,
    pub reasoning_hint: Option<ReasoningDepth>,
    /// 整条链的时间预算，从进入执行器开始计时
    pub deadline: Duration,
    pub requester_context: Option<String>,
    /// 为 true 时非 JSON 输出视为无效响应
    #[serde(default)]
    pub expect_json: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, deadline: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            required_capabilities: vec!["text".to_string()],
            mode: "execution".to_string(),
            reasoning_hint: None,
            deadline,
            requester_context: None,
            expect_json: false,
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// 覆盖默认的 ["text"]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reasoning_hint(mut self, hint: ReasoningDepth) -> Self {
        self.reasoning_hint = Some(hint);
        self
    }

    pub fn with_requester_context(mut self, context: impl Into<String>) -> Self {
        self.requester_context = Some(context.into());
        self
    }

    pub fn expecting_json(mut self) -> Self {
        self.expect_json = true;
        self
    }
}

/// 成功响应，附带完整 trace
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    pub result: String,
    pub provider_id: String,
    pub attempt_count: u32,
    pub reasoning_depth: ReasoningDepth,
    pub trace: ChainTrace,
}

/// 终止失败：一个类型化错误 + 完整尝试历史
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct ChainFailure {
    pub error: ChainError,
    pub trace: ChainTrace,
}
