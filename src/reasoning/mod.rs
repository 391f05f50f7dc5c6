//! 推理深度选择
//!
//! 纯函数：显式提示优先；否则按模式映射（discussion → Low，planning → High，execution → Adaptive）。
//! Adaptive 在执行前按提示词长度与是否含代码块解析为 Low / High。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 传给 Provider 的推理深度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningDepth {
    Low,
    High,
    Adaptive,
}

impl ReasoningDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningDepth::Low => "low",
            ReasoningDepth::High => "high",
            ReasoningDepth::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for ReasoningDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(ReasoningDepth::Low),
            "high" => Ok(ReasoningDepth::High),
            "adaptive" => Ok(ReasoningDepth::Adaptive),
            other => Err(format!("unknown reasoning depth: {other}")),
        }
    }
}

/// 默认的 Adaptive → Low 长度阈值（字符数）
pub const DEFAULT_ADAPTIVE_PROMPT_CHARS: usize = 400;

/// 推理深度选择器
#[derive(Debug, Clone, Copy)]
pub struct ReasoningSelector {
    /// 短于该字符数且不含代码块的提示词解析为 Low
    adaptive_prompt_chars: usize,
}

impl Default for ReasoningSelector {
    fn default() -> Self {
        Self::new(DEFAULT_ADAPTIVE_PROMPT_CHARS)
    }
}

impl ReasoningSelector {
    pub fn new(adaptive_prompt_chars: usize) -> Self {
        Self {
            adaptive_prompt_chars,
        }
    }

    /// 按模式与显式提示选择深度；未知模式视为 Adaptive
    pub fn select(mode: &str, hint: Option<ReasoningDepth>) -> ReasoningDepth {
        if let Some(depth) = hint {
            return depth;
        }
        match mode.trim().to_lowercase().as_str() {
            "discussion" => ReasoningDepth::Low,
            "planning" => ReasoningDepth::High,
            _ => ReasoningDepth::Adaptive,
        }
    }

    /// 把 Adaptive 落到具体深度，Low / High 原样返回
    pub fn resolve(&self, depth: ReasoningDepth, prompt: &str) -> ReasoningDepth {
        match depth {
            ReasoningDepth::Adaptive => {
                if self.is_simple_prompt(prompt) {
                    ReasoningDepth::Low
                } else {
                    ReasoningDepth::High
                }
            }
            fixed => fixed,
        }
    }

    /// select + resolve
    pub fn choose(&self, mode: &str, hint: Option<ReasoningDepth>, prompt: &str) -> ReasoningDepth {
        self.resolve(Self::select(mode, hint), prompt)
    }

    fn is_simple_prompt(&self, prompt: &str) -> bool {
        prompt.chars().count() < self.adaptive_prompt_chars && !contains_code_block(prompt)
    }
}

fn contains_code_block(prompt: &str) -> bool {
    prompt.contains("```") || prompt.lines().any(|l| l.starts_with("    ") && !l.trim().is_empty())
}
