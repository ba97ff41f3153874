use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEMO_KEY: &str = "DEMO_KEY";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: `{value}`")]
    Invalid { key: &'static str, value: String },
    #[error("{key} must be within [{min}, {max}], got {value}")]
    OutOfRange { key: &'static str, value: f64, min: f64, max: f64 },
}

/// Defaults applied to every generation request that leaves them unset.
/// This is the only place the threshold default lives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub quality_threshold: f64,
    pub creativity_level: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self { quality_threshold: 9.8, creativity_level: 0.7 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn is_demo(&self) -> bool {
        self.api_key == DEMO_KEY
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub port: u16,
    pub structural: ProviderSettings,
    pub narrative: ProviderSettings,
    pub generation: GenerationSettings,
    pub event_buffer: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let timeout = Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 600u64)?);

        let structural = ProviderSettings {
            api_key: get("OPENAI_API_KEY").unwrap_or_else(|| DEMO_KEY.into()),
            base_url: get("OPENAI_API_BASE").unwrap_or_else(|| "https://api.openai.com/v1".into()),
            model: get("STRUCTURAL_MODEL").unwrap_or_else(|| "gpt-4".into()),
            max_tokens: parse_or(&get, "STRUCTURAL_MAX_TOKENS", 2048u32)?,
            timeout,
        };
        let narrative = ProviderSettings {
            api_key: get("ANTHROPIC_API_KEY").unwrap_or_else(|| DEMO_KEY.into()),
            base_url: get("ANTHROPIC_API_BASE").unwrap_or_else(|| "https://api.anthropic.com/v1".into()),
            model: get("NARRATIVE_MODEL").unwrap_or_else(|| "claude-3-opus-20240229".into()),
            max_tokens: parse_or(&get, "NARRATIVE_MAX_TOKENS", 4096u32)?,
            timeout,
        };

        let defaults = GenerationSettings::default();
        let generation = GenerationSettings {
            quality_threshold: bounded(
                "QUALITY_THRESHOLD",
                parse_or(&get, "QUALITY_THRESHOLD", defaults.quality_threshold)?,
                0.0,
                10.0,
            )?,
            creativity_level: bounded(
                "CREATIVITY_LEVEL",
                parse_or(&get, "CREATIVITY_LEVEL", defaults.creativity_level)?,
                0.0,
                1.0,
            )?,
        };

        Ok(Self {
            port: parse_or(&get, "PORT", 8000u16)?,
            structural,
            narrative,
            generation,
            event_buffer: parse_or(&get, "EVENT_BUFFER", 256usize)?.max(1),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn bounded(key: &'static str, value: f64, min: f64, max: f64) -> Result<f64, ConfigError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange { key, value, min, max })
    }
}
