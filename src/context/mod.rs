//! Context assembly for AI calls.
//!
//! [`ContextBuilder`] produces a bounded snapshot of everything a generation
//! call needs to reason about a branch: project and work item headers, the
//! flat list of immediate parent items, the stored branch summary, a
//! chronological window of recent messages, and the latest artifact per
//! requested type. The pack is ephemeral (recomputed on each request, never
//! persisted) and renders to a deterministic prompt string.

pub mod builder;
pub mod pack;
pub mod tokens;

pub use builder::{ContextBuilder, ContextOptions, ContextPack};
