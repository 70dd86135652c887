//! Scoped lifecycle management for the full provider set.
//!
//! The manager owns every handle for one session and treats the set as a
//! single scoped resource: group connect with per-provider failure
//! isolation, tool aggregation across the connected subset, and a group
//! disconnect that unconditionally attempts every teardown.

use crate::client::{HandleState, ProviderClientHandle};
use crate::config::ConfigRegistry;
use crate::factory::ProviderClientFactory;
use crate::transport::ChannelSpawner;
use futures_util::future::{join_all, BoxFuture};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use toolmux_core::{ToolDescriptor, ToolmuxResult};
use tracing::{debug, error, info, warn};

/// Diagnostic snapshot of one managed provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    /// Provider name.
    pub name: String,
    /// Lifecycle state at snapshot time.
    pub state: HandleState,
    /// Connect failure message for `failed` providers.
    pub failure: Option<String>,
}

/// Owns the registry, the factory, and the handle set for one session.
///
/// The manager is the sole mutator of its handles; nothing else may
/// connect or disconnect them.
pub struct ProviderClientManager {
    registry: ConfigRegistry,
    factory: ProviderClientFactory,
    handles: Vec<ProviderClientHandle>,
}

impl ProviderClientManager {
    /// Create a manager using the production stdio transport.
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self::with_spawner(config_path, Arc::new(crate::transport::StdioSpawner::default()))
    }

    /// Create a manager spawning channels through `spawner`.
    pub fn with_spawner(config_path: Option<PathBuf>, spawner: Arc<dyn ChannelSpawner>) -> Self {
        Self {
            registry: ConfigRegistry::new(config_path),
            factory: ProviderClientFactory::new(spawner),
            handles: Vec::new(),
        }
    }

    /// Load (or reload) provider configurations. Soft failure, see
    /// [`ConfigRegistry::load`].
    pub fn load_config(&mut self) -> bool {
        self.registry.load()
    }

    /// Read access to the loaded configurations.
    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    /// Build one handle per registry entry, in registry order.
    ///
    /// Construction-time defects are not tolerated: a single entry failing
    /// strict validation is fatal for the whole call, and no partial
    /// construction is observable — the manager holds zero handles after a
    /// failed build. A successful build replaces any previous handle set.
    pub fn build_all(&mut self) -> ToolmuxResult<usize> {
        self.handles.clear();

        let mut staged = Vec::with_capacity(self.registry.len());
        for name in self.registry.list_names() {
            staged.push(self.factory.build(name, &self.registry)?);
        }

        let count = staged.len();
        self.handles = staged;
        info!(providers = count, "Provider handles constructed");
        Ok(count)
    }

    /// Group connect: attempt every handle, isolating failures.
    ///
    /// Connects run concurrently and the call waits for all of them
    /// regardless of individual failures. Failed handles stay in the set
    /// in `Failed` state for diagnostics but contribute nothing to
    /// aggregation. Returns the number of connected providers.
    pub async fn connect_all(&mut self) -> usize {
        let results = join_all(self.handles.iter_mut().map(|handle| async move {
            let name = handle.name().to_string();
            (name, handle.connect().await)
        }))
        .await;

        let mut connected = 0;
        for (name, result) in results {
            match result {
                Ok(()) => connected += 1,
                Err(e) => warn!(provider = %name, error = %e, "Failed to connect provider"),
            }
        }
        info!(
            connected,
            total = self.handles.len(),
            "Provider group connect finished"
        );
        connected
    }

    /// Aggregate the tool sets of all connected providers.
    ///
    /// Providers are queried in construction order. A query failure on one
    /// provider is logged and that provider contributes zero tools; it
    /// never aborts the sibling queries.
    pub async fn list_all_tools(&self) -> Vec<ToolDescriptor> {
        let mut all_tools = Vec::new();
        for handle in &self.handles {
            if handle.state() != HandleState::Connected {
                continue;
            }
            match handle.list_tools().await {
                Ok(tools) => {
                    debug!(provider = %handle.name(), tools = tools.len(), "Provider tools aggregated");
                    all_tools.extend(tools);
                }
                Err(e) => {
                    warn!(provider = %handle.name(), error = %e, "Failed to list tools from provider");
                }
            }
        }
        all_tools
    }

    /// Group disconnect: tear down every connected handle exactly once.
    ///
    /// Every disconnect is attempted even if an earlier one fails; failures
    /// are logged and never re-raised past the group boundary. Handles in
    /// `Failed` or any other non-connected state are left untouched.
    pub async fn disconnect_all(&mut self) {
        for handle in &mut self.handles {
            if handle.state() != HandleState::Connected {
                continue;
            }
            if let Err(e) = handle.disconnect().await {
                error!(provider = %handle.name(), error = %e, "Failed to disconnect provider");
            }
        }
    }

    /// Run `f` against the connected provider set, then disconnect.
    ///
    /// The structured form of the group lifecycle: connect all, hand the
    /// caller a shared view, and guarantee the group disconnect runs after
    /// `f` completes — on the success path and the error path alike, since
    /// `f`'s outcome travels through its return value.
    ///
    /// If the scope future is dropped before completing (or `f` panics),
    /// the group disconnect does not run and handles keep reporting
    /// `Connected`; subprocess cleanup on that path falls to the stdio
    /// transport's kill-on-drop.
    pub async fn scope<T>(
        &mut self,
        f: impl for<'a> FnOnce(&'a Self) -> BoxFuture<'a, T>,
    ) -> T {
        self.connect_all().await;
        let out = f(self).await;
        self.disconnect_all().await;
        out
    }

    /// Like [`scope`](Self::scope), but races `f` against an operator
    /// interrupt (ctrl-c). On interrupt the group disconnect still runs
    /// before returning `None`, so no subprocess is orphaned.
    pub async fn scope_interruptible<T>(
        &mut self,
        f: impl for<'a> FnOnce(&'a Self) -> BoxFuture<'a, T>,
    ) -> Option<T> {
        self.connect_all().await;
        let out = tokio::select! {
            value = f(self) => Some(value),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, disconnecting providers");
                None
            }
        };
        self.disconnect_all().await;
        out
    }

    /// Diagnostic snapshot of every handle, in construction order.
    pub fn statuses(&self) -> Vec<ProviderStatus> {
        self.handles
            .iter()
            .map(|h| ProviderStatus {
                name: h.name().to_string(),
                state: h.state(),
                failure: h.failure().map(str::to_string),
            })
            .collect()
    }

    /// Number of handles the manager holds.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Number of handles currently in `Connected`.
    pub fn connected_count(&self) -> usize {
        self.handles
            .iter()
            .filter(|h| h.state() == HandleState::Connected)
            .count()
    }
}
