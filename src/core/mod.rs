//! 核心层：错误类型与引擎构建

pub mod builder;
pub mod error;

pub use builder::ChainBuilder;
pub use error::{
    BuildError, ChainError, EventError, ProviderError, RegistryError, SinkDeliveryFailed,
    SinkError,
};
