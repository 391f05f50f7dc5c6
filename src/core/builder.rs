//! 引擎构建器：把 AppConfig 组装成可运行的 ChainExecutor
//!
//! 注册表、健康跟踪器与事件分发器在这里一次性创建，之后整个进程共享。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::chain::ChainExecutor;
use crate::config::{AppConfig, ProviderKind, ProviderSection};
use crate::core::{BuildError, ProviderError};
use crate::events::{EmitterConfig, EventEmitter, EventSink, HttpSink, LogSink};
use crate::health::HealthTracker;
use crate::provider::{
    OpenAiProvider, Provider, ProviderDescriptor, ProviderRegistry, ScriptStep, ScriptedProvider,
};
use crate::reasoning::ReasoningSelector;

/// 引擎构建器
pub struct ChainBuilder {
    config: AppConfig,
    sink: Option<Arc<dyn EventSink>>,
    extra_providers: Vec<(ProviderDescriptor, Arc<dyn Provider>)>,
}

impl ChainBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            sink: None,
            extra_providers: Vec::new(),
        }
    }

    /// 覆盖由配置推导出的 Sink
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 追加代码中构造的 Provider（与配置中的 Provider 一起排序）
    pub fn with_provider(mut self, descriptor: ProviderDescriptor, client: Arc<dyn Provider>) -> Self {
        self.extra_providers.push((descriptor, client));
        self
    }

    /// 构建执行器并启动事件分发任务（需要在 Tokio runtime 内调用）
    pub fn build(self) -> Result<(ChainExecutor, JoinHandle<()>), BuildError> {
        let mut entries = self
            .config
            .providers
            .iter()
            .map(|section| Ok((descriptor_from(section), client_from(section)?)))
            .collect::<Result<Vec<_>, BuildError>>()?;
        entries.extend(self.extra_providers);

        let registry = ProviderRegistry::new(entries)?;
        let health = HealthTracker::new(self.config.health.to_health_config(), registry.ids());

        let events = &self.config.events;
        let sink: Arc<dyn EventSink> = match (self.sink, &events.webhook_url) {
            (Some(sink), _) => sink,
            (None, Some(url)) => Arc::new(HttpSink::new(
                url.clone(),
                Duration::from_secs(events.request_timeout_secs),
            )?),
            (None, None) => Arc::new(LogSink),
        };
        let emitter_config = EmitterConfig::new(events.secret.clone())
            .with_retries(events.max_retries, Duration::from_millis(events.retry_base_ms));
        let (emitter, handle) = EventEmitter::spawn(sink, emitter_config)?;

        tracing::info!(
            providers = ?registry.ids(),
            webhook = events.webhook_url.is_some(),
            "Chain engine built"
        );

        let executor = ChainExecutor::new(Arc::new(registry), Arc::new(health), emitter)
            .with_selector(ReasoningSelector::new(self.config.chain.adaptive_prompt_chars))
            .with_attempt_timeout(self.config.chain.attempt_timeout());
        Ok((executor, handle))
    }
}

fn descriptor_from(section: &ProviderSection) -> ProviderDescriptor {
    ProviderDescriptor::new(
        section.id.clone(),
        section.label.clone().unwrap_or_else(|| section.id.clone()),
    )
    .with_cost_tier(section.cost_tier)
    .with_capabilities(&section.capabilities)
    .with_order(section.order)
}

fn client_from(section: &ProviderSection) -> Result<Arc<dyn Provider>, BuildError> {
    match section.kind {
        ProviderKind::Openai => {
            let model = section.model.as_deref().ok_or_else(|| BuildError::InvalidProvider {
                id: section.id.clone(),
                reason: "openai provider requires `model`".to_string(),
            })?;
            let api_key = section
                .api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok());
            let provider = OpenAiProvider::new(section.base_url.as_deref(), model, api_key.as_deref())
                .with_reasoning_model(section.reasoning_model.clone());
            Ok(Arc::new(provider))
        }
        ProviderKind::Mock => {
            let delay = Duration::from_millis(section.mock_latency_ms);
            let step = match &section.mock_response {
                Some(content) => ScriptStep::Succeed {
                    content: content.clone(),
                    delay,
                },
                None => ScriptStep::Fail {
                    error: ProviderError::Transport(format!("{} is scripted to fail", section.id)),
                    delay,
                },
            };
            Ok(Arc::new(ScriptedProvider::new(vec![step])))
        }
    }
}
