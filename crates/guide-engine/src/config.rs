//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `LANDMARK_*` environment variables, then command-line flags. The
//! bearer credential only ever comes from the environment.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use guide_contracts::context::HistoryWindow;
use guide_contracts::models::{PresetSelector, CAPTION, GENERATION};
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::guide::{GenerationSettings, GENERATION_SERVICE};
use crate::inference::{EndpointSettings, RetryPolicy, DEFAULT_TIMEOUT};
use crate::landmark::CAPTION_SERVICE;

pub const CREDENTIAL_ENV_KEYS: &[&str] = &["HF_API_TOKEN", "HUGGINGFACE_API_TOKEN"];
pub const CONFIG_PATH_ENV_KEY: &str = "LANDMARK_GUIDE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API credential: set one of {}", CREDENTIAL_ENV_KEYS.join(", "))]
    MissingCredential,
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("{0}")]
    NoPreset(String),
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// One configuration layer. Unset fields defer to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub caption_model: Option<String>,
    pub caption_endpoint: Option<String>,
    pub generation_model: Option<String>,
    pub generation_endpoint: Option<String>,
    pub max_attempts: Option<u32>,
    pub retry_delay_secs: Option<f64>,
    pub timeout_secs: Option<f64>,
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub history_window: Option<usize>,
    pub strip_prompt_echo: Option<bool>,
}

impl ConfigOverrides {
    pub fn from_toml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Ok(Self {
            caption_model: read("LANDMARK_CAPTION_MODEL"),
            caption_endpoint: read("LANDMARK_CAPTION_ENDPOINT"),
            generation_model: read("LANDMARK_GENERATION_MODEL"),
            generation_endpoint: read("LANDMARK_GENERATION_ENDPOINT"),
            max_attempts: parse_env("LANDMARK_MAX_ATTEMPTS", read("LANDMARK_MAX_ATTEMPTS"))?,
            retry_delay_secs: parse_env(
                "LANDMARK_RETRY_DELAY_SECS",
                read("LANDMARK_RETRY_DELAY_SECS"),
            )?,
            timeout_secs: parse_env("LANDMARK_TIMEOUT_SECS", read("LANDMARK_TIMEOUT_SECS"))?,
            max_new_tokens: parse_env("LANDMARK_MAX_NEW_TOKENS", read("LANDMARK_MAX_NEW_TOKENS"))?,
            temperature: parse_env("LANDMARK_TEMPERATURE", read("LANDMARK_TEMPERATURE"))?,
            history_window: parse_env("LANDMARK_HISTORY_WINDOW", read("LANDMARK_HISTORY_WINDOW"))?,
            strip_prompt_echo: parse_env(
                "LANDMARK_STRIP_PROMPT_ECHO",
                read("LANDMARK_STRIP_PROMPT_ECHO"),
            )?,
        })
    }

    /// Returns `self` with every field that `higher` sets replaced.
    pub fn overlay(self, higher: ConfigOverrides) -> Self {
        Self {
            caption_model: higher.caption_model.or(self.caption_model),
            caption_endpoint: higher.caption_endpoint.or(self.caption_endpoint),
            generation_model: higher.generation_model.or(self.generation_model),
            generation_endpoint: higher.generation_endpoint.or(self.generation_endpoint),
            max_attempts: higher.max_attempts.or(self.max_attempts),
            retry_delay_secs: higher.retry_delay_secs.or(self.retry_delay_secs),
            timeout_secs: higher.timeout_secs.or(self.timeout_secs),
            max_new_tokens: higher.max_new_tokens.or(self.max_new_tokens),
            temperature: higher.temperature.or(self.temperature),
            history_window: higher.history_window.or(self.history_window),
            strip_prompt_echo: higher.strip_prompt_echo.or(self.strip_prompt_echo),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|err| invalid(key, format!("{value:?}: {err}")))
    })
    .transpose()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEndpoint {
    pub preset: Option<String>,
    pub url: String,
    pub context_window: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuideConfig {
    pub credential: String,
    pub caption: ResolvedEndpoint,
    pub generation: ResolvedEndpoint,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub generation_settings: GenerationSettings,
    pub history_window: HistoryWindow,
    /// Non-fatal notes produced while resolving, such as preset fallbacks.
    pub warnings: Vec<String>,
}

impl GuideConfig {
    pub fn resolve(
        overrides: &ConfigOverrides,
        credential: Option<String>,
    ) -> Result<Self, ConfigError> {
        let credential = credential
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingCredential)?;

        let mut warnings = Vec::new();
        let selector = PresetSelector::default();
        let caption = resolve_endpoint(
            &selector,
            CAPTION,
            overrides.caption_model.as_deref(),
            overrides.caption_endpoint.as_deref(),
            "caption_endpoint",
            &mut warnings,
        )?;
        let generation = resolve_endpoint(
            &selector,
            GENERATION,
            overrides.generation_model.as_deref(),
            overrides.generation_endpoint.as_deref(),
            "generation_endpoint",
            &mut warnings,
        )?;

        let max_attempts = overrides
            .max_attempts
            .unwrap_or(RetryPolicy::default().max_attempts);
        if max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        let retry_delay = match overrides.retry_delay_secs {
            Some(secs) => seconds("retry_delay_secs", secs, true)?,
            None => RetryPolicy::default().retry_delay,
        };
        let timeout = match overrides.timeout_secs {
            Some(secs) => seconds("timeout_secs", secs, false)?,
            None => DEFAULT_TIMEOUT,
        };

        let defaults = GenerationSettings::default();
        let max_new_tokens = overrides.max_new_tokens.unwrap_or(defaults.max_new_tokens);
        if max_new_tokens == 0 {
            return Err(invalid("max_new_tokens", "must be at least 1"));
        }
        if let Some(temperature) = overrides.temperature {
            if !temperature.is_finite() || temperature < 0.0 {
                return Err(invalid("temperature", "must be a non-negative number"));
            }
        }

        Ok(Self {
            credential,
            caption,
            generation,
            retry: RetryPolicy {
                max_attempts,
                retry_delay,
            },
            timeout,
            generation_settings: GenerationSettings {
                max_new_tokens,
                temperature: overrides.temperature,
                strip_prompt_echo: overrides
                    .strip_prompt_echo
                    .unwrap_or(defaults.strip_prompt_echo),
            },
            history_window: HistoryWindow::from_limit(overrides.history_window),
            warnings,
        })
    }

    pub fn caption_endpoint(&self) -> EndpointSettings {
        self.endpoint_settings(CAPTION_SERVICE, &self.caption)
    }

    pub fn generation_endpoint(&self) -> EndpointSettings {
        self.endpoint_settings(GENERATION_SERVICE, &self.generation)
    }

    fn endpoint_settings(&self, service: &str, endpoint: &ResolvedEndpoint) -> EndpointSettings {
        EndpointSettings {
            service: service.to_string(),
            url: endpoint.url.clone(),
            credential: self.credential.clone(),
            timeout: self.timeout,
            retry: self.retry,
        }
    }
}

pub fn credential_from_env() -> Option<String> {
    first_non_empty_env(CREDENTIAL_ENV_KEYS)
}

pub fn config_path_from_env() -> Option<PathBuf> {
    first_non_empty_env(&[CONFIG_PATH_ENV_KEY]).map(PathBuf::from)
}

fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn resolve_endpoint(
    selector: &PresetSelector,
    capability: &str,
    model: Option<&str>,
    explicit_url: Option<&str>,
    url_key: &str,
    warnings: &mut Vec<String>,
) -> Result<ResolvedEndpoint, ConfigError> {
    if let Some(raw) = explicit_url.map(str::trim).filter(|value| !value.is_empty()) {
        let url = Url::parse(raw).map_err(|err| invalid(url_key, format!("{raw:?}: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(url_key, "only http and https endpoints are supported"));
        }
        // An explicit URL wins, but a named preset still supplies its context window.
        let context_window = model
            .and_then(|name| selector.registry.ensure(name, capability))
            .and_then(|preset| preset.context_window);
        return Ok(ResolvedEndpoint {
            preset: None,
            url: raw.trim_end_matches('/').to_string(),
            context_window,
        });
    }

    let selection = selector
        .select(model, capability)
        .map_err(ConfigError::NoPreset)?;
    if let Some(reason) = selection.fallback_reason {
        warnings.push(format!("{reason} Using '{}'.", selection.preset.name));
    }
    Ok(ResolvedEndpoint {
        url: selection.preset.endpoint(),
        context_window: selection.preset.context_window,
        preset: Some(selection.preset.name),
    })
}

fn seconds(key: &str, secs: f64, allow_zero: bool) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs < 0.0 || (!allow_zero && secs == 0.0) {
        let bound = if allow_zero { "non-negative" } else { "positive" };
        return Err(invalid(key, format!("must be a {bound} number of seconds")));
    }
    Duration::try_from_secs_f64(secs).map_err(|err| invalid(key, err.to_string()))
}
