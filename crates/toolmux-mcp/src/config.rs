//! Provider configuration loading.
//!
//! Reads a JSON file mapping provider name → `{command, args, env?}` and
//! exposes the validated entries in source order. Load-time validation is
//! lenient per entry: one operator typo must not disable every other
//! provider. Strict validation happens later, in the factory.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name probed in the current directory when no path is supplied.
pub const DEFAULT_CONFIG_FILE: &str = "mcp_config.json";

/// Validated description of one subprocess tool provider.
///
/// `env: None` means the mapping was absent; `Some` with an empty map means
/// the provider explicitly needs no extra variables. The registry always
/// materializes `Some` at load time, so `None` only arises from
/// programmatically constructed configs and is rejected by the factory.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Unique provider name, also the registry key.
    pub name: String,
    /// Executable path or name.
    pub command: String,
    /// Arguments passed to the executable. May be empty.
    pub args: Vec<String>,
    /// Extra environment variables merged into the child process environment.
    pub env: Option<HashMap<String, String>>,
}

/// Raw shape of one entry in the config file. `command` and `args` are
/// required; an entry missing either fails deserialization and is skipped.
#[derive(Debug, Deserialize)]
struct RawEntry {
    command: String,
    args: Vec<String>,
    #[serde(default)]
    env: Option<HashMap<String, String>>,
}

/// Registry of named provider configurations loaded from a JSON file.
///
/// Duplicate names within one source resolve last-wins (JSON object
/// semantics); the name keeps its first position in the iteration order.
pub struct ConfigRegistry {
    config_path: PathBuf,
    names: Vec<String>,
    providers: HashMap<String, ProviderConfig>,
}

impl ConfigRegistry {
    /// Create a registry reading from `config_path`, or from
    /// [`DEFAULT_CONFIG_FILE`] in the current directory when `None`.
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path: config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
            names: Vec::new(),
            providers: HashMap::new(),
        }
    }

    /// Load provider configurations from the config file.
    ///
    /// Fails softly: a missing or unparseable file logs a warning and
    /// returns `false` without touching the current entries. On success the
    /// previous set is replaced atomically from the caller's point of view.
    /// Entries missing `command` or `args` are skipped with a warning;
    /// absent `env` defaults to an empty mapping.
    pub fn load(&mut self) -> bool {
        let raw = match std::fs::read_to_string(&self.config_path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Provider configuration file not readable"
                );
                return false;
            }
        };

        let doc: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to parse provider configuration file"
                );
                return false;
            }
        };

        let mut names = Vec::with_capacity(doc.len());
        let mut providers = HashMap::with_capacity(doc.len());

        for (name, value) in doc {
            let entry: RawEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        provider = %name,
                        error = %e,
                        "Skipping invalid provider entry"
                    );
                    continue;
                }
            };

            providers.insert(
                name.clone(),
                ProviderConfig {
                    name: name.clone(),
                    command: entry.command,
                    args: entry.args,
                    env: Some(entry.env.unwrap_or_default()),
                },
            );
            names.push(name);
        }

        self.names = names;
        self.providers = providers;

        info!(
            path = %self.config_path.display(),
            providers = self.names.len(),
            "Provider configuration loaded"
        );
        true
    }

    /// Provider names in source iteration order, stable across calls.
    pub fn list_names(&self) -> &[String] {
        &self.names
    }

    /// Look up the configuration for a single provider.
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// Number of loaded providers.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the registry holds no providers.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The path this registry loads from.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp.as_file_mut(), "{contents}").unwrap();
        tmp
    }

    fn registry_for(tmp: &tempfile::NamedTempFile) -> ConfigRegistry {
        ConfigRegistry::new(Some(tmp.path().to_path_buf()))
    }

    #[test]
    fn test_load_valid_entries_in_source_order() {
        let tmp = write_config(
            r#"{
                "filesystem": {"command": "npx", "args": ["-y", "server-filesystem", "/tmp"]},
                "fetch": {"command": "uvx", "args": ["mcp-server-fetch"], "env": {"TIMEOUT": "30"}}
            }"#,
        );
        let mut registry = registry_for(&tmp);
        assert!(registry.load());
        assert_eq!(registry.list_names(), ["filesystem", "fetch"]);
        assert_eq!(registry.len(), 2);

        let fs = registry.get("filesystem").unwrap();
        assert_eq!(fs.command, "npx");
        assert_eq!(fs.args, vec!["-y", "server-filesystem", "/tmp"]);
        // Absent env is defaulted to an explicit empty mapping at load time.
        assert_eq!(fs.env, Some(HashMap::new()));

        let fetch = registry.get("fetch").unwrap();
        assert_eq!(
            fetch.env.as_ref().unwrap().get("TIMEOUT").map(String::as_str),
            Some("30")
        );
    }

    #[test]
    fn test_invalid_entry_skipped_siblings_survive() {
        let tmp = write_config(
            r#"{
                "a": {"command": "echo", "args": ["hi"]},
                "b": {"foo": "bar"},
                "c": {"command": "cat", "args": []}
            }"#,
        );
        let mut registry = registry_for(&tmp);
        assert!(registry.load());
        assert_eq!(registry.list_names(), ["a", "c"]);
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn test_entry_missing_args_skipped() {
        let tmp = write_config(r#"{"x": {"command": "echo"}}"#);
        let mut registry = registry_for(&tmp);
        assert!(registry.load());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_non_object_entry_skipped() {
        let tmp = write_config(r#"{"a": {"command": "echo", "args": []}, "b": 42}"#);
        let mut registry = registry_for(&tmp);
        assert!(registry.load());
        assert_eq!(registry.list_names(), ["a"]);
    }

    #[test]
    fn test_missing_file_soft_failure() {
        let mut registry = ConfigRegistry::new(Some(PathBuf::from("/nonexistent/config.json")));
        assert!(!registry.load());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_malformed_source_soft_failure() {
        let tmp = write_config("{not valid json!!");
        let mut registry = registry_for(&tmp);
        assert!(!registry.load());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_top_level_array_is_malformed() {
        let tmp = write_config(r#"[{"command": "echo", "args": []}]"#);
        let mut registry = registry_for(&tmp);
        assert!(!registry.load());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reload_replaces_previous_set() {
        let tmp = write_config(r#"{"old": {"command": "echo", "args": []}}"#);
        let mut registry = registry_for(&tmp);
        assert!(registry.load());
        assert_eq!(registry.list_names(), ["old"]);

        std::fs::write(
            tmp.path(),
            r#"{"new": {"command": "cat", "args": ["-"]}}"#,
        )
        .unwrap();
        assert!(registry.load());
        assert_eq!(registry.list_names(), ["new"]);
        assert!(registry.get("old").is_none());
    }

    #[test]
    fn test_failed_reload_keeps_previous_set() {
        let tmp = write_config(r#"{"keep": {"command": "echo", "args": []}}"#);
        let mut registry = registry_for(&tmp);
        assert!(registry.load());

        std::fs::write(tmp.path(), "{broken").unwrap();
        assert!(!registry.load());
        assert_eq!(registry.list_names(), ["keep"]);
    }

    #[test]
    fn test_duplicate_name_last_wins_keeps_first_position() {
        let tmp = write_config(
            r#"{
                "before": {"command": "a", "args": []},
                "dup": {"command": "first", "args": []},
                "between": {"command": "b", "args": []},
                "dup": {"command": "second", "args": []},
                "after": {"command": "c", "args": []}
            }"#,
        );
        let mut registry = registry_for(&tmp);
        assert!(registry.load());
        // The later value wins, but the name keeps its first position.
        assert_eq!(registry.list_names(), ["before", "dup", "between", "after"]);
        assert_eq!(registry.get("dup").unwrap().command, "second");
    }

    #[test]
    fn test_valid_count_independent_of_ordering() {
        let tmp = write_config(
            r#"{
                "bad1": {"args": []},
                "good1": {"command": "a", "args": []},
                "bad2": 7,
                "good2": {"command": "b", "args": []},
                "good3": {"command": "c", "args": []}
            }"#,
        );
        let mut registry = registry_for(&tmp);
        assert!(registry.load());
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.list_names(), ["good1", "good2", "good3"]);
    }
}
