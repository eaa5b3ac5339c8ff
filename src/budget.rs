//! Pre-flight token budget estimation.
//!
//! The estimate is a UTF-16 code unit count over everything sent upstream,
//! used as a stand-in for a tokenizer. Browser clients measure the same
//! unit, so an astral-plane character counts as two.

use crate::providers::ProviderProfile;

/// Approximate the token cost of a generation request.
pub fn estimate(prompt: &str, previous_prompt: Option<&str>, html: Option<&str>) -> usize {
    let len = |s: &str| s.encode_utf16().count();
    len(prompt) + previous_prompt.map(len).unwrap_or(0) + html.map(len).unwrap_or(0)
}

/// Whether a request of `estimate` fits the selected provider.
///
/// Only enforced when the caller named the provider explicitly; `auto`
/// requests are passed through and left to the upstream.
pub fn check_budget(estimate: usize, profile: &ProviderProfile, explicit: bool) -> bool {
    !explicit || estimate < profile.max_tokens
}
