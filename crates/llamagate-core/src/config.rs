//! Configuration snapshot: the closed record produced by parsing the YAML
//! config file and applying environment overrides. Pure data — no I/O here;
//! the composition root owns reading the file and the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::ModelConfig;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8090;
const DEFAULT_MAX_CONCURRENT_MODELS: usize = 3;
const DEFAULT_TIMEOUT_MINUTES: u64 = 15;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 30;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Gateway-wide settings, distinct from any individual model's config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
    pub max_concurrent_models: usize,
    pub on_demand_only: bool,
    pub timeout_minutes: u64,
    pub cleanup_interval_seconds: u64,
    pub log_level: String,
    pub llama_server_path: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_concurrent_models: DEFAULT_MAX_CONCURRENT_MODELS,
            on_demand_only: true,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            cleanup_interval_seconds: DEFAULT_CLEANUP_INTERVAL_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            llama_server_path: "llama-server".to_string(),
        }
    }
}

impl GatewaySettings {
    #[must_use]
    pub const fn idle_timeout_secs(&self) -> u64 {
        self.timeout_minutes * 60
    }
}

/// The raw shape of the YAML document, kept separate from `Config` so that
/// `deny_unknown_fields` applies at both the top level and per model.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct RawDocument {
    #[serde(flatten)]
    settings: GatewaySettings,
    models: HashMap<String, RawModelConfig>,
}

impl Default for RawDocument {
    fn default() -> Self {
        Self {
            settings: GatewaySettings::default(),
            models: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModelConfig {
    port: u16,
    model_path: String,
    #[serde(default)]
    context_length: Option<u32>,
    #[serde(default)]
    gpu_layers: Option<u32>,
    #[serde(default)]
    chat_format: Option<String>,
    #[serde(default)]
    additional_args: Vec<String>,
    #[serde(default = "default_priority")]
    priority: u8,
    #[serde(default)]
    resource_group: Option<String>,
    #[serde(default)]
    auto_start: bool,
    #[serde(default)]
    preload: bool,
    #[serde(default)]
    max_queue_size: Option<usize>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
}

const fn default_priority() -> u8 {
    crate::model::DEFAULT_PRIORITY
}

/// A fully validated, immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub settings: GatewaySettings,
    pub models: HashMap<String, ModelConfig>,
}

impl Config {
    /// Parse a YAML document's text into a validated snapshot.
    ///
    /// `source_path` is used only for error messages.
    pub fn parse(yaml: &str, source_path: &str) -> Result<Self, ConfigError> {
        let raw: RawDocument =
            serde_yaml_ng::from_str(yaml).map_err(|e| ConfigError::Malformed {
                path: source_path.to_string(),
                reason: e.to_string(),
            })?;

        let mut models = HashMap::with_capacity(raw.models.len());
        for (name, raw_model) in raw.models {
            let model_path = expand_tilde(&raw_model.model_path);
            let config = ModelConfig {
                name: name.clone(),
                port: raw_model.port,
                model_path,
                context_length: raw_model.context_length,
                gpu_layers: raw_model.gpu_layers,
                chat_format: raw_model.chat_format,
                additional_args: raw_model.additional_args,
                priority: raw_model.priority,
                resource_group: raw_model.resource_group,
                auto_start: raw_model.auto_start,
                preload: raw_model.preload,
                max_queue_size: raw_model.max_queue_size,
                request_timeout_secs: raw_model.request_timeout_secs,
            };

            if !(1..=10).contains(&config.priority) {
                return Err(ConfigError::InvalidValue {
                    field: format!("models.{name}.priority"),
                    reason: format!("must be between 1 and 10, got {}", config.priority),
                });
            }

            models.insert(name, config);
        }

        let config = Self {
            settings: raw.settings,
            models,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field validation that the schema alone can't express: port
    /// uniqueness across every configured model.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: HashMap<u16, &str> = HashMap::new();
        let mut names: Vec<&String> = self.models.keys().collect();
        names.sort();
        for name in names {
            let model = &self.models[name];
            if let Some(&first) = seen.get(&model.port) {
                return Err(ConfigError::DuplicatePort {
                    port: model.port,
                    first: first.to_string(),
                    second: model.name.clone(),
                });
            }
            seen.insert(model.port, model.name.as_str());
        }
        Ok(())
    }

    /// Apply environment-variable overrides to the gateway settings.
    /// `lookup` is injected so this stays testable without real env vars.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PROXY_HOST") {
            self.settings.host = host;
        }
        if let Some(port) = lookup("PROXY_PORT") {
            self.settings.port = parse_env_u16("PROXY_PORT", &port)?;
        }
        if let Some(timeout) = lookup("TIMEOUT_MINUTES") {
            self.settings.timeout_minutes = parse_env_u64("TIMEOUT_MINUTES", &timeout)?;
        }
        if let Some(max) = lookup("MAX_CONCURRENT_MODELS") {
            self.settings.max_concurrent_models =
                parse_env_u64("MAX_CONCURRENT_MODELS", &max)? as usize;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.settings.log_level = level;
        }
        Ok(())
    }

    /// Diff against a previous snapshot, describing what the Lifecycle
    /// Controller needs to do to reconcile. See [`ReloadDiff`].
    #[must_use]
    pub fn diff(&self, previous: &Self) -> ReloadDiff {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut respawn = Vec::new();
        let mut updated_in_place = Vec::new();

        for (name, new_cfg) in &self.models {
            match previous.models.get(name) {
                None => added.push(new_cfg.clone()),
                Some(old_cfg) => {
                    if old_cfg.requires_respawn(new_cfg) {
                        respawn.push(new_cfg.clone());
                    } else if old_cfg != new_cfg {
                        updated_in_place.push(new_cfg.clone());
                    }
                }
            }
        }
        for name in previous.models.keys() {
            if !self.models.contains_key(name) {
                removed.push(name.clone());
            }
        }

        ReloadDiff {
            added,
            removed,
            respawn,
            updated_in_place,
        }
    }
}

fn parse_env_u16(name: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        reason: format!("expected an integer, got '{value}'"),
    })
}

fn parse_env_u64(name: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        reason: format!("expected an integer, got '{value}'"),
    })
}

/// Expand a leading `~` against the invoking user's home directory.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

/// Resolve the config file path: CLI flag, then `CONFIG_PATH` env var, then
/// the default `config.yaml` in the working directory.
#[must_use]
pub fn resolve_config_path(cli_flag: Option<&str>, env_value: Option<&str>) -> PathBuf {
    if let Some(path) = cli_flag {
        return PathBuf::from(expand_tilde(path));
    }
    if let Some(path) = env_value {
        return PathBuf::from(expand_tilde(path));
    }
    Path::new("config.yaml").to_path_buf()
}

/// The set of changes a config reload must apply to reconcile the Registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReloadDiff {
    /// Models newly present; create a STOPPED entry (auto-start if configured).
    pub added: Vec<ModelConfig>,
    /// Models no longer present; drive to STOPPED and delete.
    pub removed: Vec<String>,
    /// Models whose port/path/args changed; drive to STOPPED then start.
    pub respawn: Vec<ModelConfig>,
    /// Models whose only change is metadata (priority, group, etc.); update in place.
    pub updated_in_place: Vec<ModelConfig>,
}

impl ReloadDiff {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.respawn.is_empty()
            && self.updated_in_place.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
host: 0.0.0.0
port: 9000
max_concurrent_models: 2
models:
  m1:
    port: 19001
    model_path: "~/models/m1.gguf"
    priority: 7
    auto_start: true
    additional_args: ["-c 4096", "--jinja"]
  m2:
    port: 19002
    model_path: "/models/m2.gguf"
    preload: true
"#;

    #[test]
    fn parses_full_document() {
        let cfg = Config::parse(SAMPLE, "test.yaml").unwrap();
        assert_eq!(cfg.settings.host, "0.0.0.0");
        assert_eq!(cfg.settings.port, 9000);
        assert_eq!(cfg.settings.max_concurrent_models, 2);
        assert_eq!(cfg.models.len(), 2);
        let m1 = &cfg.models["m1"];
        assert_eq!(m1.priority, 7);
        assert!(m1.auto_start);
        assert_eq!(m1.tokenized_args(), vec!["-c", "4096", "--jinja"]);
    }

    #[test]
    fn rejects_unknown_top_level_field() {
        let yaml = "host: 127.0.0.1\nbogus_field: true\nmodels: {}\n";
        let err = Config::parse(yaml, "test.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn rejects_unknown_model_field() {
        let yaml = "models:\n  m1:\n    port: 1\n    model_path: /x\n    bogus: 1\n";
        let err = Config::parse(yaml, "test.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn rejects_duplicate_ports() {
        let yaml = r#"
models:
  m1:
    port: 19001
    model_path: /models/m1.gguf
  m2:
    port: 19001
    model_path: /models/m2.gguf
"#;
        let err = Config::parse(yaml, "test.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePort { port: 19001, .. }));
    }

    #[test]
    fn rejects_priority_out_of_range() {
        let yaml = "models:\n  m1:\n    port: 1\n    model_path: /x\n    priority: 11\n";
        let err = Config::parse(yaml, "test.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn env_overrides_apply_over_file_values() {
        let mut cfg = Config::parse(SAMPLE, "test.yaml").unwrap();
        let env = HashMap::from([
            ("PROXY_PORT".to_string(), "7000".to_string()),
            ("MAX_CONCURRENT_MODELS".to_string(), "5".to_string()),
        ]);
        cfg.apply_env_overrides(|k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.settings.port, 7000);
        assert_eq!(cfg.settings.max_concurrent_models, 5);
        // Untouched settings survive.
        assert_eq!(cfg.settings.host, "0.0.0.0");
    }

    #[test]
    fn diff_is_noop_for_identical_snapshots() {
        let cfg = Config::parse(SAMPLE, "test.yaml").unwrap();
        let diff = cfg.diff(&cfg.clone());
        assert!(diff.is_noop());
    }

    #[test]
    fn diff_detects_added_removed_and_respawn() {
        let before = Config::parse(SAMPLE, "test.yaml").unwrap();
        let after_yaml = r#"
models:
  m1:
    port: 19099
    model_path: "~/models/m1.gguf"
    priority: 7
    auto_start: true
  m3:
    port: 19003
    model_path: /models/m3.gguf
"#;
        let after = Config::parse(after_yaml, "test.yaml").unwrap();
        let diff = after.diff(&before);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].name, "m3");
        assert_eq!(diff.removed, vec!["m2".to_string()]);
        assert_eq!(diff.respawn.len(), 1);
        assert_eq!(diff.respawn[0].name, "m1");
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths_untouched() {
        assert_eq!(expand_tilde("/models/m1.gguf"), "/models/m1.gguf");
    }
}
