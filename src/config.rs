//! Runtime settings.
//!
//! Values come from the process environment (optionally seeded from `.env`).
//! The API key is optional here: a missing key is reported per comparison,
//! not at startup, so the rest of the service stays usable.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::convert::ConverterKind;
use crate::openai::{DEFAULT_API_URL, DEFAULT_MAX_TOKENS};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_CONVERTER_COMMAND: &str = "python3 scripts/render_pages.py";
const DEFAULT_CONVERTER_URL: &str = "http://localhost:3001";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: Option<String>,
    pub model: String,
    pub api_url: String,
    pub max_tokens: u32,
    pub request_timeout: Option<Duration>,
    pub converter: ConverterKind,
    /// Renders pages the embedded converter finds no scan image on.
    pub converter_fallback: Option<ConverterKind>,
    pub converter_command: String,
    pub converter_url: String,
    pub pricing_file: Option<PathBuf>,
    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars().collect())
    }

    /// Build settings from an explicit variable map; empty values count as unset.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let converter = match get("CONVERTER") {
            Some(name) => ConverterKind::parse(&name).with_context(|| {
                format!("Unknown CONVERTER '{}'. Available: process, sidecar, embedded", name)
            })?,
            None => ConverterKind::Embedded,
        };

        let converter_fallback = match get("CONVERTER_FALLBACK").as_deref() {
            None => Some(ConverterKind::Process),
            Some("none") => None,
            Some(name) => match ConverterKind::parse(name) {
                Some(kind @ (ConverterKind::Process | ConverterKind::Sidecar)) => Some(kind),
                _ => anyhow::bail!(
                    "Invalid CONVERTER_FALLBACK '{}'. Available: process, sidecar, none",
                    name
                ),
            },
        };

        Ok(Self {
            api_key: get("OPENAI_API_KEY"),
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_url: get("OPENAI_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            max_tokens: parse_or(get("OPENAI_MAX_TOKENS"), "OPENAI_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
            request_timeout: get("OPENAI_TIMEOUT_SECS")
                .map(|v| parse::<u64>(&v, "OPENAI_TIMEOUT_SECS").map(Duration::from_secs))
                .transpose()?,
            converter,
            converter_fallback,
            converter_command: get("CONVERTER_COMMAND")
                .unwrap_or_else(|| DEFAULT_CONVERTER_COMMAND.to_string()),
            converter_url: get("CONVERTER_URL").unwrap_or_else(|| DEFAULT_CONVERTER_URL.to_string()),
            pricing_file: get("PRICING_FILE").map(PathBuf::from),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}

fn parse<T: FromStr>(value: &str, key: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid {}: '{}'", key, value))
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => parse(&v, key),
        None => Ok(default),
    }
}
