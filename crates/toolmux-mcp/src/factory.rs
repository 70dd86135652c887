//! Strict construction of provider client handles.
//!
//! The registry is deliberately lenient at load time; the factory is the
//! strict gate. A malformed entry that slipped past loose validation, or a
//! config constructed programmatically, must not silently produce a broken
//! provider, so every defect here is a fatal [`ToolmuxError::Config`].

use crate::client::ProviderClientHandle;
use crate::config::{ConfigRegistry, ProviderConfig};
use crate::transport::{ChannelSpawner, StdioSpawner};
use std::sync::Arc;
use toolmux_core::{ToolmuxError, ToolmuxResult};

/// Builds [`ProviderClientHandle`]s from validated configurations.
pub struct ProviderClientFactory {
    spawner: Arc<dyn ChannelSpawner>,
}

impl ProviderClientFactory {
    /// Create a factory that spawns channels through `spawner`.
    pub fn new(spawner: Arc<dyn ChannelSpawner>) -> Self {
        Self { spawner }
    }

    /// Create a factory using the production stdio transport.
    pub fn stdio() -> Self {
        Self::new(Arc::new(StdioSpawner::default()))
    }

    /// Build a handle for the named registry entry.
    ///
    /// Fails with [`ToolmuxError::Config`] when the registry has no entry
    /// for `name`, or when the entry fails strict validation. No process
    /// is spawned; construction is pure data capture.
    pub fn build(&self, name: &str, registry: &ConfigRegistry) -> ToolmuxResult<ProviderClientHandle> {
        let config = registry.get(name).ok_or_else(|| {
            ToolmuxError::Config(format!("no provider named '{name}' in the registry"))
        })?;
        self.build_config(config)
    }

    /// Build a handle from a configuration directly, applying the same
    /// strict validation. Intended for programmatically built configs.
    pub fn build_config(&self, config: &ProviderConfig) -> ToolmuxResult<ProviderClientHandle> {
        validate(config)?;
        Ok(ProviderClientHandle::new(config.clone(), self.spawner.clone()))
    }
}

impl Default for ProviderClientFactory {
    fn default() -> Self {
        Self::stdio()
    }
}

/// Strict validation rules.
///
/// `command` must be non-empty. `env` must be present: an absent mapping is
/// a configuration defect, while an explicitly empty one is a valid "no
/// extra variables" provider. Empty `args` is allowed — a provider may be
/// a bare command.
fn validate(config: &ProviderConfig) -> ToolmuxResult<()> {
    if config.command.trim().is_empty() {
        return Err(ToolmuxError::Config(format!(
            "provider '{}' has an empty command",
            config.name
        )));
    }
    if config.env.is_none() {
        return Err(ToolmuxError::Config(format!(
            "provider '{}' has no env mapping; use an empty map for no extra variables",
            config.name
        )));
    }
    Ok(())
}
