//! Request and response bodies.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/ask-ai`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    /// Current document, when iterating on earlier output.
    #[serde(default)]
    pub html: Option<String>,
    /// Instruction that produced `html`.
    #[serde(default)]
    pub previous_prompt: Option<String>,
    /// Provider key or `auto`. Missing means `auto`.
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProviderEntry {
    pub key: String,
    pub id: String,
    pub name: String,
    pub max_tokens: usize,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub ok: bool,
    pub default: String,
    pub providers: Vec<ProviderEntry>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
