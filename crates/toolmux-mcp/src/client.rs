//! Provider client handle and its lifecycle state machine.

use crate::config::ProviderConfig;
use crate::transport::{ChannelSpawner, ToolChannel};
use serde::Serialize;
use std::sync::Arc;
use toolmux_core::{ToolDescriptor, ToolOutput, ToolmuxError, ToolmuxResult};
use tracing::info;

/// Lifecycle state of one provider handle.
///
/// Transitions only move forward:
/// `Constructed → Connecting → {Connected | Failed} → Disconnecting → Disconnected`.
/// `Failed` is terminal within a session; a disconnected handle is never
/// reused — reconnecting means building a fresh handle from the same config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    /// Config captured, no process spawned.
    Constructed,
    /// Spawn and handshake in progress.
    Connecting,
    /// Channel established, tool discovery available.
    Connected,
    /// Connect attempt failed; excluded from aggregation.
    Failed,
    /// Teardown in progress.
    Disconnecting,
    /// Channel closed, subprocess stopped.
    Disconnected,
}

/// One provider's lifecycle state and transport, owned exclusively by the
/// manager that built it.
pub struct ProviderClientHandle {
    config: ProviderConfig,
    spawner: Arc<dyn ChannelSpawner>,
    channel: Option<Box<dyn ToolChannel>>,
    state: HandleState,
    failure: Option<String>,
}

impl ProviderClientHandle {
    pub(crate) fn new(config: ProviderConfig, spawner: Arc<dyn ChannelSpawner>) -> Self {
        Self {
            config,
            spawner,
            channel: None,
            state: HandleState::Constructed,
            failure: None,
        }
    }

    /// The provider name this handle was built for.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HandleState {
        self.state
    }

    /// The connect failure message, if this handle is in `Failed`.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Spawn the subprocess and establish the channel.
    ///
    /// Legal only from `Constructed`. On failure the handle moves to
    /// `Failed` and keeps the error message for diagnostics.
    pub async fn connect(&mut self) -> ToolmuxResult<()> {
        if self.state != HandleState::Constructed {
            return Err(ToolmuxError::Connect(format!(
                "provider '{}' cannot connect from state {:?}",
                self.config.name, self.state
            )));
        }
        self.state = HandleState::Connecting;

        let env = self.config.env.clone().unwrap_or_default();
        match self
            .spawner
            .spawn(&self.config.name, &self.config.command, &self.config.args, &env)
            .await
        {
            Ok(channel) => {
                self.channel = Some(channel);
                self.state = HandleState::Connected;
                info!(provider = %self.config.name, "Provider connected");
                Ok(())
            }
            Err(e) => {
                self.state = HandleState::Failed;
                self.failure = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Query the provider's tool set. Legal only from `Connected`.
    pub async fn list_tools(&self) -> ToolmuxResult<Vec<ToolDescriptor>> {
        match (&self.state, self.channel.as_ref()) {
            (HandleState::Connected, Some(channel)) => channel.list_tools().await,
            _ => Err(ToolmuxError::Query(format!(
                "provider '{}' is not connected",
                self.config.name
            ))),
        }
    }

    /// Invoke one of the provider's tools, passing arguments through.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> ToolmuxResult<ToolOutput> {
        match (&self.state, self.channel.as_ref()) {
            (HandleState::Connected, Some(channel)) => channel.call_tool(name, arguments).await,
            _ => Err(ToolmuxError::Query(format!(
                "provider '{}' is not connected",
                self.config.name
            ))),
        }
    }

    /// Close the channel and stop the subprocess.
    ///
    /// Legal only from `Connected`. The handle always ends in
    /// `Disconnected`, even when the close itself fails.
    pub async fn disconnect(&mut self) -> ToolmuxResult<()> {
        if self.state != HandleState::Connected {
            return Err(ToolmuxError::Disconnect(format!(
                "provider '{}' cannot disconnect from state {:?}",
                self.config.name, self.state
            )));
        }
        self.state = HandleState::Disconnecting;

        let Some(mut channel) = self.channel.take() else {
            self.state = HandleState::Disconnected;
            return Err(ToolmuxError::Disconnect(format!(
                "provider '{}' has no open channel",
                self.config.name
            )));
        };

        let result = channel.close().await;
        self.state = HandleState::Disconnected;
        if result.is_ok() {
            info!(provider = %self.config.name, "Provider disconnected");
        }
        result
    }
}
