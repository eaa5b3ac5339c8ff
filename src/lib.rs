//! sitegen - streaming inference proxy for single-file HTML generation.
//!
//! A caller describes a page in natural language; the proxy picks an upstream
//! inference provider, streams the generated document back as it arrives and
//! stops as soon as the document is complete.
//!
//! # Modules
//! - `providers`: static registry of upstream providers and their limits
//! - `quota`: per-client counters gating anonymous usage
//! - `budget`: pre-flight token budget estimation
//! - `llm`: upstream inference client abstraction (Hugging Face router)
//! - `driver`: per-request stream relay with early completion detection
//! - `api`: HTTP surface and request orchestration

pub mod api;
pub mod budget;
pub mod config;
pub mod driver;
pub mod llm;
pub mod providers;
pub mod quota;

pub use config::Config;
