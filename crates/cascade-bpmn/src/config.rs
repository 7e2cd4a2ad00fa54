//! Configuration for the BPMN engine
//!
//! Defaults can be overridden from the environment with [`EngineConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Largest input collection a multi-instance body accepts
    #[serde(default = "default_max_input_collection_size")]
    pub max_input_collection_size: usize,

    /// Name of the local variable holding the iteration index of a child
    #[serde(default = "default_loop_counter_variable")]
    pub loop_counter_variable: String,

    /// Log filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON logs instead of pretty ones
    #[serde(default)]
    pub json_logging: bool,
}

fn default_max_input_collection_size() -> usize {
    100_000
}

fn default_loop_counter_variable() -> String {
    "loopCounter".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_input_collection_size: default_max_input_collection_size(),
            loop_counter_variable: default_loop_counter_variable(),
            log_filter: default_log_filter(),
            json_logging: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(max) = lookup("CASCADE_BPMN_MAX_INPUT_COLLECTION_SIZE") {
            match max.parse::<usize>() {
                Ok(max) => config.max_input_collection_size = max,
                Err(_) => warn!("Invalid CASCADE_BPMN_MAX_INPUT_COLLECTION_SIZE value: {}", max),
            }
        }

        if let Some(name) = lookup("CASCADE_BPMN_LOOP_COUNTER_VARIABLE") {
            if name.trim().is_empty() {
                warn!("Ignoring empty CASCADE_BPMN_LOOP_COUNTER_VARIABLE");
            } else {
                config.loop_counter_variable = name;
            }
        }

        if let Some(filter) = lookup("CASCADE_BPMN_LOG_FILTER") {
            config.log_filter = filter;
        }

        if let Some(json) = lookup("CASCADE_BPMN_JSON_LOGGING") {
            match json.to_lowercase().as_str() {
                "true" | "1" => config.json_logging = true,
                "false" | "0" => config.json_logging = false,
                _ => warn!("Invalid CASCADE_BPMN_JSON_LOGGING value: {}", json),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_input_collection_size, 100_000);
        assert_eq!(config.loop_counter_variable, "loopCounter");
        assert_eq!(config.log_filter, "info");
        assert!(!config.json_logging);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_input_collection_size": 10}"#).unwrap();
        assert_eq!(config.max_input_collection_size, 10);
        assert_eq!(config.loop_counter_variable, "loopCounter");
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("CASCADE_BPMN_MAX_INPUT_COLLECTION_SIZE", "5"),
            ("CASCADE_BPMN_LOOP_COUNTER_VARIABLE", "index"),
            ("CASCADE_BPMN_LOG_FILTER", "cascade_bpmn=debug"),
            ("CASCADE_BPMN_JSON_LOGGING", "TRUE"),
        ]));
        assert_eq!(config.max_input_collection_size, 5);
        assert_eq!(config.loop_counter_variable, "index");
        assert_eq!(config.log_filter, "cascade_bpmn=debug");
        assert!(config.json_logging);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("CASCADE_BPMN_MAX_INPUT_COLLECTION_SIZE", "lots"),
            ("CASCADE_BPMN_LOOP_COUNTER_VARIABLE", "  "),
            ("CASCADE_BPMN_JSON_LOGGING", "maybe"),
        ]));
        assert_eq!(config, EngineConfig::default());
    }
}
