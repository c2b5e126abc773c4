use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use ideaforge_contracts::models::{Capability, ModelSelector};

use crate::backend::BackendRegistry;
use crate::client::{GenerationClient, ModelChoice};
use crate::dryrun::DryrunBackend;
use crate::gemini::{GeminiBackend, DEFAULT_GEMINI_API_BASE};
use crate::retry::{RetryPolicy, DEFAULT_RETRIES, DEFAULT_RETRY_BASE};

pub const DEFAULT_BACKEND: &str = "gemini";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_EDIT_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_IMAGE_MODEL: &str = "imagen-4.0-generate-001";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub backend: String,
    pub api_key: Option<String>,
    pub api_base: String,
    pub text_model: Option<String>,
    pub image_edit_model: Option<String>,
    pub image_model: Option<String>,
    pub retries: usize,
    pub retry_base: Duration,
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Builds a config from any key lookup. Unset, blank and unparsable
    /// numbers fall back to defaults; parsed numbers are clamped.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let number = |key: &str, default: u64, min: u64, max: u64| {
            get(key)
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(default)
                .clamp(min, max)
        };

        Self {
            backend: DEFAULT_BACKEND.to_string(),
            api_key: ["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"]
                .into_iter()
                .find_map(get),
            api_base: get("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            text_model: get("IDEAFORGE_TEXT_MODEL"),
            image_edit_model: get("IDEAFORGE_IMAGE_EDIT_MODEL"),
            image_model: get("IDEAFORGE_IMAGE_MODEL"),
            retries: number("IDEAFORGE_RETRIES", DEFAULT_RETRIES as u64, 0, 6) as usize,
            retry_base: Duration::from_millis(number(
                "IDEAFORGE_RETRY_BASE_MS",
                DEFAULT_RETRY_BASE.as_millis() as u64,
                0,
                30_000,
            )),
            request_timeout: Duration::from_secs(number(
                "IDEAFORGE_REQUEST_TIMEOUT",
                DEFAULT_REQUEST_TIMEOUT_SECS,
                15,
                300,
            )),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.retry_base)
    }

    fn backends(&self) -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register(GeminiBackend::new(
            &self.api_base,
            self.api_key.clone(),
            self.request_timeout,
        ));
        registry.register(DryrunBackend::new());
        registry
    }
}

/// Resolve the backend and its models. Model fallbacks come back as warnings.
pub fn build_client(config: &EngineConfig) -> Result<(GenerationClient, Vec<String>)> {
    let registry = config.backends();
    let Some(backend) = registry.get(&config.backend) else {
        bail!(
            "unknown backend '{}' (available: {})",
            config.backend,
            registry.names().join(", ")
        );
    };

    let selector = ModelSelector::default();
    let mut warnings = Vec::new();
    let mut pick = |requested: Option<&str>, capability: Capability| -> Result<String> {
        let selection = selector
            .select(requested, capability, &config.backend)
            .map_err(anyhow::Error::msg)?;
        if let (Some(reason), Some(_)) = (&selection.fallback_reason, &selection.requested) {
            warnings.push(reason.clone());
        }
        Ok(selection.model.name)
    };

    let defaults = config.backend == DEFAULT_BACKEND;
    let requested = |explicit: &Option<String>, default: &'static str| {
        explicit
            .as_deref()
            .or(if defaults { Some(default) } else { None })
            .map(str::to_string)
    };
    let text = requested(&config.text_model, DEFAULT_TEXT_MODEL);
    let image_edit = requested(&config.image_edit_model, DEFAULT_IMAGE_EDIT_MODEL);
    let image = requested(&config.image_model, DEFAULT_IMAGE_MODEL);

    let models = ModelChoice {
        text: pick(text.as_deref(), Capability::Text)?,
        image_edit: pick(image_edit.as_deref(), Capability::ImageEdit)?,
        image_generation: pick(image.as_deref(), Capability::ImageGeneration)?,
    };
    Ok((
        GenerationClient::new(Arc::clone(&backend), models, config.retry_policy()),
        warnings,
    ))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{build_client, EngineConfig, DEFAULT_TEXT_MODEL};

    fn config(pairs: &[(&str, &str)]) -> EngineConfig {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| values.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[]);
        assert_eq!(config.backend, "gemini");
        assert_eq!(config.api_key, None);
        assert_eq!(config.retries, 3);
        assert_eq!(config.retry_base, Duration::from_millis(1000));
        assert_eq!(config.request_timeout, Duration::from_secs(90));
    }

    #[test]
    fn api_key_precedence_and_clamping() {
        let config = config(&[
            ("GOOGLE_API_KEY", "google"),
            ("API_KEY", "generic"),
            ("GEMINI_API_KEY", "  "),
            ("IDEAFORGE_RETRIES", "40"),
            ("IDEAFORGE_REQUEST_TIMEOUT", "1"),
            ("IDEAFORGE_RETRY_BASE_MS", "soon"),
        ]);
        assert_eq!(config.api_key.as_deref(), Some("google"));
        assert_eq!(config.retries, 6);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.retry_base, Duration::from_millis(1000));
    }

    #[test]
    fn gemini_client_uses_default_models() -> anyhow::Result<()> {
        let (client, warnings) = build_client(&config(&[]))?;
        assert_eq!(client.backend_name(), "gemini");
        assert_eq!(client.models().text, DEFAULT_TEXT_MODEL);
        assert!(warnings.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_model_falls_back_with_warning() -> anyhow::Result<()> {
        let mut config = config(&[("IDEAFORGE_TEXT_MODEL", "gpt-imaginary")]);
        config.backend = "dryrun".to_string();
        let (client, warnings) = build_client(&config)?;
        assert_eq!(client.backend_name(), "dryrun");
        assert_eq!(client.models().text, "dryrun-text-1");
        assert_eq!(client.models().image_generation, "dryrun-image-1");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("gpt-imaginary"));
        Ok(())
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let mut config = config(&[]);
        config.backend = "carrier-pigeon".to_string();
        assert!(build_client(&config).is_err());
    }
}
