//! LLM Service Module
//!
//! Bounded LLM interaction for incident analysis: a deterministic prompt
//! builder, an OpenAI-compatible client, and a circuit breaker that fails
//! fast during sustained downstream failure. The analysis engine composes
//! these with response caching and schema validation.

mod circuit_breaker;
mod client;
mod prompt;

pub use circuit_breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use client::{
    LlmClientConfig, LlmProvider, LlmResponse, OpenAiCompatibleClient, estimate_tokens,
    strip_markdown_fences,
};
pub use prompt::{ANALYSIS_SYSTEM_PROMPT, build_analysis_prompt, truncate_middle};
