//! Core types and error definitions shared across the toolmux crates.
//!
//! This crate provides the foundation for the provider lifecycle core:
//! the unified error enum, a `Result` alias, and the capability records
//! exchanged with connected tool providers.
//!
//! # Main types
//!
//! - [`ToolmuxError`] — Unified error enum for all toolmux subsystems.
//! - [`ToolmuxResult`] — Convenience alias for `Result<T, ToolmuxError>`.
//! - [`ToolDescriptor`] — An opaque capability record advertised by a provider.
//! - [`ToolOutput`] — The content blocks returned when a tool is invoked.

use serde::{Deserialize, Serialize};

// --- Error types ---

/// Top-level error type for the toolmux crates.
///
/// The variants mirror the lifecycle phases that can fail. Load-time and
/// teardown-time failures are absorbed at the point they occur and logged;
/// only construction-time [`ToolmuxError::Config`] errors are fatal for a
/// caller's request.
#[derive(Debug, thiserror::Error)]
pub enum ToolmuxError {
    /// A provider configuration that cannot produce a usable client.
    #[error("Config error: {0}")]
    Config(String),

    /// Subprocess spawn or channel handshake failure for one provider.
    #[error("Connect error: {0}")]
    Connect(String),

    /// Tool discovery or invocation failure on a connected provider.
    #[error("Query error: {0}")]
    Query(String),

    /// Failure while closing a provider channel.
    #[error("Disconnect error: {0}")]
    Disconnect(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ToolmuxError`].
pub type ToolmuxResult<T> = Result<T, ToolmuxError>;

// --- Capability records ---

/// A tool advertised by a connected provider via `tools/list`.
///
/// The lifecycle core treats this as an immutable value: it is aggregated
/// and handed to the reasoning collaborator, never interpreted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within its provider.
    pub name: String,
    /// Human-readable description shown to the reasoning loop.
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool's arguments.
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// The result of invoking a tool through a provider channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolOutput {
    /// Content blocks produced by the tool.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Whether the provider reported the invocation as failed.
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolOutput {
    /// Join all text content blocks into a single string.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One content block within a [`ToolOutput`].
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    /// Block type, typically `"text"`.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text payload for text blocks.
    #[serde(default)]
    pub text: String,
}
