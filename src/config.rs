use crate::models::ModelConfig;
use crate::resolver::DEFAULT_MAX_TOOL_ROUNDS;
use anyhow::{Context, Result};
use keyring::Entry;
use std::time::Duration;

const KEYRING_SERVICE_PREFIX: &str = "wanderlust_api_key";

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_KEY_REF: &str = "env:API_KEY";

/// Settings the app starts with.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub max_tool_rounds: usize,
    /// Overrides the reference backend's simulated latency when set.
    pub tool_latency: Option<Duration>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let max_tool_rounds = match lookup("WANDERLUST_MAX_TOOL_ROUNDS") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid WANDERLUST_MAX_TOOL_ROUNDS '{}'", raw))?,
            None => DEFAULT_MAX_TOOL_ROUNDS,
        };

        let tool_latency = match lookup("WANDERLUST_TOOL_LATENCY_MS") {
            Some(raw) => Some(Duration::from_millis(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("Invalid WANDERLUST_TOOL_LATENCY_MS '{}'", raw))?,
            )),
            None => None,
        };

        let model = var("WANDERLUST_MODEL", DEFAULT_MODEL);
        Ok(Self {
            model: ModelConfig {
                name: format!("Gemini ({})", model),
                api_url: var("WANDERLUST_API_URL", DEFAULT_API_URL),
                model,
                api_key_ref: Some(var("WANDERLUST_API_KEY_REF", DEFAULT_API_KEY_REF)),
            },
            max_tool_rounds,
            tool_latency,
        })
    }
}

/// Where a model's API key lives, parsed from `ModelConfig::api_key_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// `env:NAME`
    Env(String),
    /// `keyring`, stored per model under `wanderlust_api_key-{model}`
    Keyring,
}

impl KeySource {
    pub fn of(config: &ModelConfig) -> Result<Self> {
        match config.api_key_ref.as_deref().map(str::trim) {
            Some("keyring") => Ok(KeySource::Keyring),
            Some(reference) => match reference.strip_prefix("env:") {
                Some(name) if !name.is_empty() => Ok(KeySource::Env(name.to_string())),
                _ => Err(anyhow::anyhow!(
                    "Key reference '{}' is neither 'env:<VAR>' nor 'keyring'",
                    reference
                )),
            },
            None => Err(anyhow::anyhow!("No key reference configured for {}", config.model)),
        }
    }
}

fn keyring_entry(config: &ModelConfig) -> Result<Entry> {
    let service = format!("{}-{}", KEYRING_SERVICE_PREFIX, config.model);
    Entry::new(&service, &config.name)
        .with_context(|| format!("Cannot open keyring entry '{}'", service))
}

/// Looks up the key for `config`.
pub fn get_api_key(config: &ModelConfig) -> Result<String> {
    match KeySource::of(config)? {
        KeySource::Env(var) => {
            log::debug!("Reading API key for {} from ${}", config.model, var);
            std::env::var(&var).with_context(|| format!("${} is not set; export it or switch WANDERLUST_API_KEY_REF", var))
        }
        KeySource::Keyring => {
            log::debug!("Reading API key for {} from the OS keyring", config.model);
            keyring_entry(config)?
                .get_password()
                .with_context(|| format!("No key stored for {}; run `wanderlust --set-key <key>`", config.model))
        }
    }
}

/// Saves `api_key` in the OS keyring for `config.model`.
pub fn set_api_key_in_keyring(config: &ModelConfig, api_key: &str) -> Result<()> {
    log::info!("Storing API key for {} in the OS keyring", config.model);
    keyring_entry(config)?
        .set_password(api_key)
        .with_context(|| format!("Keyring refused the key for {}", config.model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.model.api_url, DEFAULT_API_URL);
        assert_eq!(config.model.model, DEFAULT_MODEL);
        assert_eq!(config.model.api_key_ref.as_deref(), Some(DEFAULT_API_KEY_REF));
        assert_eq!(config.max_tool_rounds, DEFAULT_MAX_TOOL_ROUNDS);
        assert_eq!(config.tool_latency, None);
    }

    #[test]
    fn overrides_are_applied() {
        let config = AppConfig::from_lookup(lookup(&[
            ("WANDERLUST_MODEL", "gemini-2.5-pro"),
            ("WANDERLUST_MAX_TOOL_ROUNDS", "3"),
            ("WANDERLUST_TOOL_LATENCY_MS", "0"),
            ("WANDERLUST_API_KEY_REF", "keyring"),
        ]))
        .unwrap();
        assert_eq!(config.model.model, "gemini-2.5-pro");
        assert_eq!(config.max_tool_rounds, 3);
        assert_eq!(config.tool_latency, Some(Duration::ZERO));
        assert_eq!(config.model.api_key_ref.as_deref(), Some("keyring"));
    }

    #[test]
    fn bad_numbers_are_errors() {
        let err = AppConfig::from_lookup(lookup(&[("WANDERLUST_MAX_TOOL_ROUNDS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("WANDERLUST_MAX_TOOL_ROUNDS"));
    }

    #[test]
    fn key_references_parse_to_sources() {
        let mut config = AppConfig::from_lookup(lookup(&[])).unwrap().model;
        assert_eq!(KeySource::of(&config).unwrap(), KeySource::Env("API_KEY".into()));

        config.api_key_ref = Some("keyring".into());
        assert_eq!(KeySource::of(&config).unwrap(), KeySource::Keyring);

        for bad in ["vault:abc", "env:"] {
            config.api_key_ref = Some(bad.into());
            assert!(KeySource::of(&config).is_err());
            assert!(get_api_key(&config).is_err());
        }
        config.api_key_ref = None;
        assert!(get_api_key(&config).is_err());
    }

    #[test]
    fn missing_env_var_names_the_variable() {
        let mut config = AppConfig::from_lookup(lookup(&[])).unwrap().model;
        config.api_key_ref = Some("env:WANDERLUST_TEST_KEY_THAT_IS_NEVER_SET".into());
        let err = get_api_key(&config).unwrap_err();
        assert!(err.to_string().contains("WANDERLUST_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
