//! Rolling summarization of branch conversations and project activity.
//!
//! Summaries are regenerated wholesale (never merged), conditioned on their
//! own previous value, and committed under an optimistic lock keyed on the
//! branch's `summary_message_count`. Concurrent summarizers may both pay for
//! generation, but exactly one commit per epoch lands; losers discard their
//! result. Availability over dedup: message append never waits on, and never
//! fails because of, summarization.

mod config;
mod format;
mod service;

pub use config::SummarizeConfig;
pub use format::{BranchSummary, ProjectSummary};
pub use service::{DEFAULT_TRIGGER_TIMEOUT, SummarizationService, SweepOutcome};
