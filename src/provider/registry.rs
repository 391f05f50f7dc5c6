//! Provider 注册表
//!
//! 启动时加载一次的有序候选列表；按 `order` 升序（相同 order 保持注册顺序）。
//! 运行期只读，唯一的失败模式是空链（启动期致命）。

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::Provider;
use crate::core::RegistryError;

/// 成本档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    Free,
    Standard,
    Premium,
}

impl Default for CostTier {
    fn default() -> Self {
        Self::Standard
    }
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostTier::Free => write!(f, "free"),
            CostTier::Standard => write!(f, "standard"),
            CostTier::Premium => write!(f, "premium"),
        }
    }
}

/// 候选后端的身份与能力描述，加载后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub label: String,
    pub cost_tier: CostTier,
    /// 能力标签（小写），如 text / code / image
    pub capabilities: BTreeSet<String>,
    /// 越小越先尝试
    pub order: u32,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            cost_tier: CostTier::default(),
            capabilities: BTreeSet::new(),
            order: 0,
        }
    }

    pub fn with_cost_tier(mut self, tier: CostTier) -> Self {
        self.cost_tier = tier;
        self
    }

    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.insert(capability.trim().to_lowercase());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(|c| c.as_ref().trim().to_lowercase()));
        self
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    /// 是否具备全部所需能力（大小写不敏感）
    pub fn supports_all(&self, required: &[String]) -> bool {
        required
            .iter()
            .all(|c| self.capabilities.contains(&c.trim().to_lowercase()))
    }
}

/// 注册表中的一项：描述 + 调用接口
#[derive(Clone)]
pub struct RegisteredProvider {
    pub descriptor: ProviderDescriptor,
    pub client: Arc<dyn Provider>,
}

impl RegisteredProvider {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}

impl fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// 只读、有序的 Provider 列表
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: Vec<RegisteredProvider>,
}

impl ProviderRegistry {
    /// 加载注册表：拒绝空链、重复 id、无能力声明的 Provider
    pub fn new(
        entries: Vec<(ProviderDescriptor, Arc<dyn Provider>)>,
    ) -> Result<Self, RegistryError> {
        if entries.is_empty() {
            return Err(RegistryError::EmptyChain);
        }

        let mut seen = HashSet::new();
        let mut providers = Vec::with_capacity(entries.len());
        for (descriptor, client) in entries {
            if !seen.insert(descriptor.id.clone()) {
                return Err(RegistryError::DuplicateProvider(descriptor.id));
            }
            if descriptor.capabilities.is_empty() {
                return Err(RegistryError::MissingCapabilities(descriptor.id));
            }
            providers.push(RegisteredProvider { descriptor, client });
        }

        // sort_by_key 是稳定排序：相同 order 保持注册顺序
        providers.sort_by_key(|p| p.descriptor.order);

        Ok(Self { providers })
    }

    /// 按 order 升序返回具备全部所需能力的 Provider
    pub fn eligible_providers(&self, required_capabilities: &[String]) -> Vec<&RegisteredProvider> {
        self.providers
            .iter()
            .filter(|p| p.descriptor.supports_all(required_capabilities))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredProvider> {
        self.providers.iter().find(|p| p.id() == id)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.iter().map(|p| &p.descriptor)
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// 构造时已拒绝空链，恒为 false
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
