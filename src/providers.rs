//! Provider registry - upstream inference providers and their limits.
//!
//! The registry is built once at startup and only read afterwards. Every
//! lookup succeeds: unknown keys and the `auto` sentinel resolve to the
//! default provider.

use std::collections::HashMap;

use serde::Serialize;

/// Provider key that delegates selection to the proxy.
pub const AUTO_PROVIDER: &str = "auto";

/// Key of the provider used for `auto` and unknown keys.
pub const DEFAULT_PROVIDER: &str = "novita";

/// Capability limits for one upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderProfile {
    /// Identifier sent upstream to route the call.
    pub id: String,
    /// Human-readable name used in caller-facing messages.
    pub name: String,
    /// Maximum input+output size accepted by the provider.
    pub max_tokens: usize,
    /// Provider keeps emitting text after the closing `</html>` marker.
    #[serde(skip)]
    pub trailing_noise: bool,
    /// Whether the provider accepts a `max_tokens` ceiling on the request.
    #[serde(skip)]
    pub accepts_max_tokens: bool,
}

impl ProviderProfile {
    fn new(id: &str, name: &str, max_tokens: usize) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            max_tokens,
            trailing_noise: false,
            accepts_max_tokens: true,
        }
    }
}

/// Read-only table of providers keyed by provider key.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderProfile>,
    default_key: String,
}

impl ProviderRegistry {
    /// Registry with the built-in provider table.
    pub fn new() -> Self {
        let mut sambanova = ProviderProfile::new("sambanova", "SambaNova", 8_000);
        sambanova.trailing_noise = true;
        sambanova.accepts_max_tokens = false;

        let providers = [
            ProviderProfile::new("fireworks-ai", "Fireworks AI", 131_000),
            ProviderProfile::new("nebius", "Nebius AI Studio", 131_000),
            sambanova,
            ProviderProfile::new("novita", "NovitaAI", 16_000),
            ProviderProfile::new("hyperbolic", "Hyperbolic", 131_000),
            ProviderProfile::new("together", "Together AI", 128_000),
        ];

        Self {
            providers: providers.into_iter().map(|p| (p.id.clone(), p)).collect(),
            default_key: DEFAULT_PROVIDER.to_string(),
        }
    }

    /// Resolve a provider key. Never fails.
    pub fn lookup(&self, key: &str) -> &ProviderProfile {
        if key != AUTO_PROVIDER {
            if let Some(profile) = self.providers.get(key) {
                return profile;
            }
        }
        self.default_profile()
    }

    /// The profile used for `auto` and unknown keys.
    pub fn default_profile(&self) -> &ProviderProfile {
        &self.providers[&self.default_key]
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    /// Whether the caller named a provider instead of deferring to `auto`.
    pub fn is_explicit(key: &str) -> bool {
        key != AUTO_PROVIDER
    }

    /// All providers, sorted by key.
    pub fn list(&self) -> Vec<(&str, &ProviderProfile)> {
        let mut entries: Vec<_> = self
            .providers
            .iter()
            .map(|(k, p)| (k.as_str(), p))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
