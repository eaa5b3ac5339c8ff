//! Client identity and credential resolution.

use std::net::SocketAddr;

use axum::http::{header, HeaderMap};

use crate::llm::ApiToken;

/// Cookie holding the caller's upstream token.
pub const TOKEN_COOKIE: &str = "hf_token";

/// Identity used when nothing better is available.
pub const FALLBACK_IDENTITY: &str = "0.0.0.0";

/// Quota key for a request: forwarded-for head, real-ip, socket peer, fallback.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(head) = header_value("x-forwarded-for")
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return head.to_string();
    }
    if let Some(real_ip) = header_value("x-real-ip") {
        return real_ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| FALLBACK_IDENTITY.to_string())
}

/// Token supplied by the caller: the `hf_token` cookie, else a bearer header.
pub fn caller_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

/// Credential a request runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Process-wide override; applies to every request.
    Override(ApiToken),
    /// Supplied by the caller.
    Caller(ApiToken),
    /// Shared fallback for anonymous callers (may be unconfigured).
    Shared(Option<ApiToken>),
}

impl Credential {
    /// Resolve in order: override, caller-supplied, shared fallback.
    pub fn resolve(
        override_token: Option<&str>,
        caller: Option<&str>,
        shared: Option<&str>,
    ) -> Self {
        let usable = |t: Option<&str>| t.filter(|t| !t.is_empty()).map(ApiToken::new);

        if let Some(token) = usable(override_token) {
            return Self::Override(token);
        }
        if let Some(token) = usable(caller) {
            return Self::Caller(token);
        }
        Self::Shared(usable(shared))
    }

    /// Only anonymous requests count against the quota.
    pub fn requires_quota(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    pub fn into_token(self) -> Option<ApiToken> {
        match self {
            Self::Override(t) | Self::Caller(t) => Some(t),
            Self::Shared(t) => t,
        }
    }
}
