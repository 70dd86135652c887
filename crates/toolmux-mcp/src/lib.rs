//! Subprocess-backed tool provider lifecycle: configuration loading,
//! strict client construction, scoped group connect/disconnect, and tool
//! aggregation across the connected set.

pub mod client;
pub mod config;
pub mod factory;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use client::{HandleState, ProviderClientHandle};
pub use config::{ConfigRegistry, ProviderConfig};
pub use factory::ProviderClientFactory;
pub use manager::{ProviderClientManager, ProviderStatus};
pub use transport::{ChannelSpawner, StdioSpawner, ToolChannel};
