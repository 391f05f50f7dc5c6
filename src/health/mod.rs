//! 健康跟踪：每个 Provider 的失败率 / 延迟统计与熔断状态机

pub mod state;
pub mod tracker;

pub use state::{HealthConfig, HealthStatus, ProviderHealthState};
pub use tracker::{HealthTracker, HealthTransition};
