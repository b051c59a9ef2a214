//! Structured generation capability.
//!
//! The summarization service consumes generation through the
//! [`StructuredGenerator`] trait: a prompt as chat messages plus a JSON
//! schema, returning a schema-shaped `serde_json::Value`. The trait is
//! injected explicitly (no global provider cache), so tests swap in a mock
//! and embedders can plug in any backend. [`openai::OpenAiGenerator`] is the
//! shipped implementation for OpenAI-compatible endpoints.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openai::OpenAiGenerator;

/// A single chat message in a generation prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call generation options.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    /// Override the generator's default model for this call.
    pub model: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            model: None,
        }
    }
}

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A successful structured generation: the schema-shaped object plus usage.
#[derive(Debug, Clone)]
pub struct Generation {
    pub data: serde_json::Value,
    pub usage: Option<Usage>,
}

/// Failures a generation call can surface, kept distinguishable so callers
/// can treat a missing provider as a soft condition while propagating real
/// transport and validation failures.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("No generation provider configured")]
    NoProvider,

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Output failed schema validation after {attempts} attempt(s): {reason}")]
    InvalidOutput { attempts: u32, reason: String },
}

/// Black-box structured generation: messages + schema in, validated object out.
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn generate_structured(
        &self,
        messages: &[ChatMessage],
        schema: &serde_json::Value,
        options: &GenerateOptions,
    ) -> Result<Generation, GenerateError>;
}
