//! Configuration management.
//!
//! Configuration is read from environment variables at startup:
//! - `HOST` / `PORT` - Listen address (default `0.0.0.0:3000`)
//! - `HF_TOKEN` - Process-wide credential override (empty means unset)
//! - `DEFAULT_HF_TOKEN` - Shared fallback credential for anonymous callers
//! - `MODEL_ID` - Model served by every provider
//! - `INFERENCE_BASE_URL` - Base URL of the inference router
//! - `MAX_REQUESTS_PER_IP` - Anonymous requests allowed per client
//! - `QUOTA_WINDOW_SECS` - Optional reset window for anonymous counters
//! - `STREAM_TIMEOUT_SECS` - Optional ceiling on a single stream's duration

use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_MODEL_ID: &str = "deepseek-ai/DeepSeek-V3-0324";
pub const DEFAULT_INFERENCE_BASE_URL: &str = "https://router.huggingface.co";
pub const DEFAULT_MAX_REQUESTS_PER_IP: u64 = 2;

/// Application configuration.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Overrides every caller-supplied credential when set.
    pub hf_token: Option<String>,

    /// Used for callers without a credential; subject to quota.
    pub default_hf_token: Option<String>,

    pub model_id: String,
    pub inference_base_url: String,
    pub max_requests_per_ip: u64,

    /// `None` keeps anonymous counters until restart.
    pub quota_window: Option<Duration>,

    /// `None` lets a stream run until the upstream closes it.
    pub stream_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            hf_token: None,
            default_hf_token: None,
            model_id: DEFAULT_MODEL_ID.to_string(),
            inference_base_url: DEFAULT_INFERENCE_BASE_URL.to_string(),
            max_requests_per_ip: DEFAULT_MAX_REQUESTS_PER_IP,
            quota_window: None,
            stream_timeout: None,
        }
    }
}

// Tokens must never show up in logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("hf_token", &self.hf_token.as_ref().map(|_| "<redacted>"))
            .field(
                "default_hf_token",
                &self.default_hf_token.as_ref().map(|_| "<redacted>"),
            )
            .field("model_id", &self.model_id)
            .field("inference_base_url", &self.inference_base_url)
            .field("max_requests_per_ip", &self.max_requests_per_ip)
            .field("quota_window", &self.quota_window)
            .field("stream_timeout", &self.stream_timeout)
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match non_empty("PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .with_context(|| format!("invalid PORT: {}", v))?,
            None => defaults.port,
        };

        let max_requests_per_ip = match non_empty("MAX_REQUESTS_PER_IP") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid MAX_REQUESTS_PER_IP: {}", v))?,
            None => defaults.max_requests_per_ip,
        };

        let quota_window = parse_secs(non_empty("QUOTA_WINDOW_SECS"), "QUOTA_WINDOW_SECS")?;
        let stream_timeout = parse_secs(non_empty("STREAM_TIMEOUT_SECS"), "STREAM_TIMEOUT_SECS")?;

        Ok(Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port,
            hf_token: non_empty("HF_TOKEN"),
            default_hf_token: non_empty("DEFAULT_HF_TOKEN"),
            model_id: non_empty("MODEL_ID").unwrap_or(defaults.model_id),
            inference_base_url: non_empty("INFERENCE_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.inference_base_url),
            max_requests_per_ip,
            quota_window,
            stream_timeout,
        })
    }

    /// Socket address string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_secs(value: Option<String>, key: &str) -> anyhow::Result<Option<Duration>> {
    let Some(v) = value else {
        return Ok(None);
    };
    let secs = v
        .trim()
        .parse::<u64>()
        .with_context(|| format!("invalid {}: {}", key, v))?;
    // Zero disables the feature rather than expiring instantly.
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
