//! Scripted Provider（用于测试与演示，无需网络）
//!
//! 按脚本依次返回成功 / 失败，脚本耗尽后重复最后一步；可为每一步设置延迟以模拟延迟与超时。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{GenerationOutput, Invocation, Provider};
use crate::core::ProviderError;

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Succeed { content: String, delay: Duration },
    Fail { error: ProviderError, delay: Duration },
}

impl ScriptStep {
    fn delay(&self) -> Duration {
        match self {
            ScriptStep::Succeed { delay, .. } | ScriptStep::Fail { delay, .. } => *delay,
        }
    }
}

/// 脚本化 Provider：记录调用次数与每次收到的推理深度
#[derive(Debug)]
pub struct ScriptedProvider {
    steps: Vec<ScriptStep>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Invocation>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 总是成功
    pub fn succeeding(content: impl Into<String>) -> Self {
        Self::new(vec![ScriptStep::Succeed {
            content: content.into(),
            delay: Duration::ZERO,
        }])
    }

    /// 总是以给定错误失败
    pub fn failing(error: ProviderError) -> Self {
        Self::new(vec![ScriptStep::Fail {
            error,
            delay: Duration::ZERO,
        }])
    }

    /// 为脚本中每一步统一设置延迟
    pub fn with_delay(mut self, delay: Duration) -> Self {
        for step in &mut self.steps {
            match step {
                ScriptStep::Succeed { delay: d, .. } | ScriptStep::Fail { delay: d, .. } => {
                    *d = delay
                }
            }
        }
        self
    }

    /// 已被调用的次数（包括被取消 / 超时的调用）
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 收到过的调用参数
    pub fn invocations(&self) -> Vec<Invocation> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn generate(&self, invocation: &Invocation) -> Result<GenerationOutput, ProviderError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(invocation.clone());
        }

        let Some(step) = self
            .steps
            .get(index)
            .or_else(|| self.steps.last())
            .cloned()
        else {
            return Err(ProviderError::Transport("empty script".to_string()));
        };

        let delay = step.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match step {
            ScriptStep::Succeed { content, .. } => Ok(GenerationOutput::new(content)),
            ScriptStep::Fail { error, .. } => Err(error),
        }
    }
}
