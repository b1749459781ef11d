//! Client settings with file and environment overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ClientSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SYNAPSE_*` environment overrides (highest priority)

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Settings error.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: &'static str, value: String },
}

/// Workflow engine connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// GraphQL endpoint of the engine.
    pub endpoint: Option<String>,
    pub project_id: String,
    pub api_key: Option<String>,
    /// Takes precedence over `api_key` when set.
    pub access_token: Option<String>,
    /// Workflow run when none is named explicitly.
    pub default_workflow_id: String,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            project_id: "default".into(),
            api_key: None,
            access_token: None,
            default_workflow_id: "default".into(),
        }
    }
}

/// Polling cadence and budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            timeout_secs: 900,
        }
    }
}

impl PollSettings {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Local session cache location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Directory holding the cache file. Defaults to the platform data dir.
    pub dir: Option<PathBuf>,
    /// Cache key; also the file stem.
    pub key: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: None,
            key: "chat_sessions".into(),
        }
    }
}

impl CacheSettings {
    /// Resolved cache directory.
    #[must_use]
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("synapse")
        })
    }
}

/// Session synchronizer behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Prefix of ordinal placeholder titles (`Chat 1`, `Chat 2`, ...).
    pub placeholder_prefix: String,
    /// Refresh a placeholder title after the first successful send.
    pub auto_title: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            placeholder_prefix: "Chat ".into(),
            auto_title: true,
        }
    }
}

/// Top-level client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Root of the chat REST API.
    pub api_base_url: String,
    pub workflow: WorkflowSettings,
    pub polling: PollSettings,
    pub cache: CacheSettings,
    pub sync: SyncSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5300/api".into(),
            workflow: WorkflowSettings::default(),
            polling: PollSettings::default(),
            cache: CacheSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

/// Default settings file (`<config dir>/synapse/settings.json`).
#[must_use]
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("synapse")
        .join("settings.json")
}

/// Load settings from the default path with env var overrides.
///
/// # Errors
/// See [`load_settings_from_path`].
pub fn load_settings() -> Result<ClientSettings, SettingsError> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults.
///
/// # Errors
/// Returns error if the file is unreadable, is not valid JSON, or an env
/// override does not parse.
pub fn load_settings_from_path(path: &Path) -> Result<ClientSettings, SettingsError> {
    let defaults = serde_json::to_value(ClientSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ClientSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

/// Recursive deep merge: objects merge per key, everything else is replaced,
/// nulls in `source` are skipped.
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SYNAPSE_*` overrides looked up through `lookup`.
///
/// # Errors
/// Returns [`SettingsError::InvalidOverride`] for a non-numeric interval or
/// timeout.
pub fn apply_env_overrides(
    settings: &mut ClientSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), SettingsError> {
    if let Some(v) = lookup("SYNAPSE_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = lookup("SYNAPSE_WORKFLOW_ENDPOINT") {
        settings.workflow.endpoint = Some(v);
    }
    if let Some(v) = lookup("SYNAPSE_PROJECT_ID") {
        settings.workflow.project_id = v;
    }
    if let Some(v) = lookup("SYNAPSE_API_KEY") {
        settings.workflow.api_key = Some(v);
    }
    if let Some(v) = lookup("SYNAPSE_ACCESS_TOKEN") {
        settings.workflow.access_token = Some(v);
    }
    if let Some(v) = lookup("SYNAPSE_WORKFLOW_ID") {
        settings.workflow.default_workflow_id = v;
    }
    if let Some(v) = lookup("SYNAPSE_POLL_INTERVAL_SECS") {
        settings.polling.interval_secs = parse_secs("SYNAPSE_POLL_INTERVAL_SECS", v)?;
    }
    if let Some(v) = lookup("SYNAPSE_TIMEOUT_SECS") {
        settings.polling.timeout_secs = parse_secs("SYNAPSE_TIMEOUT_SECS", v)?;
    }
    if let Some(v) = lookup("SYNAPSE_CACHE_DIR") {
        settings.cache.dir = Some(PathBuf::from(v));
    }
    Ok(())
}

fn parse_secs(key: &'static str, value: String) -> Result<u64, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidOverride { key, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ClientSettings::default();
        assert_eq!(settings.polling.interval(), Duration::from_secs(15));
        assert_eq!(settings.polling.timeout(), Duration::from_secs(900));
        assert_eq!(settings.cache.key, "chat_sessions");
        assert_eq!(settings.sync.placeholder_prefix, "Chat ");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings.cache, CacheSettings::default());
        assert_eq!(settings.sync, SyncSettings::default());
    }

    #[test]
    fn test_file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"polling": {"interval_secs": 5}, "workflow": {"project_id": "p-9", "api_key": null}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.polling.interval_secs, 5);
        assert_eq!(settings.workflow.project_id, "p-9");
        assert_eq!(settings.sync.placeholder_prefix, "Chat ");
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SYNAPSE_API_URL", "https://brain.example/api"),
            ("SYNAPSE_ACCESS_TOKEN", "tok"),
            ("SYNAPSE_TIMEOUT_SECS", " 60 "),
        ]);
        let mut settings = ClientSettings::default();
        apply_env_overrides(&mut settings, |k| env.get(k).map(|v| (*v).to_string())).unwrap();

        assert_eq!(settings.api_base_url, "https://brain.example/api");
        assert_eq!(settings.workflow.access_token.as_deref(), Some("tok"));
        assert_eq!(settings.polling.timeout_secs, 60);
    }

    #[test]
    fn test_bad_numeric_override() {
        let mut settings = ClientSettings::default();
        let err = apply_env_overrides(&mut settings, |k| {
            (k == "SYNAPSE_POLL_INTERVAL_SECS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("SYNAPSE_POLL_INTERVAL_SECS"));
    }

    #[test]
    fn test_deep_merge_replaces_non_objects() {
        let merged = deep_merge(json!({"a": {"b": 1, "c": 2}, "d": [1]}), json!({"a": {"b": 9}, "d": [2, 3]}));
        assert_eq!(merged, json!({"a": {"b": 9, "c": 2}, "d": [2, 3]}));
    }
}
