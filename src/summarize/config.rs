//! Summarizer tuning knobs.

use std::str::FromStr;

/// Controls when and how branch/project summaries are generated.
#[derive(Debug, Clone)]
pub struct SummarizeConfig {
    /// Minimum total messages before any summary is attempted.
    pub min_messages_for_summary: u32,
    /// Required growth in message count since the last stored summary
    /// before re-summarizing.
    pub summarize_every_n_messages: u32,
    /// Cap on how many messages feed the generation call, oldest first.
    pub max_messages_to_summarize: usize,
    pub temperature: f32,
    /// Model override passed through to the generator.
    pub model: Option<String>,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            min_messages_for_summary: 10,
            summarize_every_n_messages: 10,
            max_messages_to_summarize: 50,
            temperature: 0.3,
            model: None,
        }
    }
}

impl SummarizeConfig {
    /// Defaults overridden by `BRAID_MIN_MESSAGES`, `BRAID_SUMMARIZE_EVERY`,
    /// `BRAID_MAX_SUMMARIZE_MESSAGES`, `BRAID_SUMMARY_TEMPERATURE`, and
    /// `BRAID_SUMMARY_MODEL`. Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_messages_for_summary: parse_or(
                std::env::var("BRAID_MIN_MESSAGES").ok(),
                defaults.min_messages_for_summary,
            ),
            summarize_every_n_messages: parse_or(
                std::env::var("BRAID_SUMMARIZE_EVERY").ok(),
                defaults.summarize_every_n_messages,
            ),
            max_messages_to_summarize: parse_or(
                std::env::var("BRAID_MAX_SUMMARIZE_MESSAGES").ok(),
                defaults.max_messages_to_summarize,
            ),
            temperature: parse_or(
                std::env::var("BRAID_SUMMARY_TEMPERATURE").ok(),
                defaults.temperature,
            ),
            model: std::env::var("BRAID_SUMMARY_MODEL")
                .ok()
                .filter(|m| !m.trim().is_empty()),
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .as_deref()
        .map(str::trim)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
