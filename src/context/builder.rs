use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::context::tokens;
use crate::errors::ContextError;
use crate::store::DbHandle;
use crate::store::models::{Artifact, ArtifactType, Message, Project, WorkItem};

/// Options controlling what goes into a context pack.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Size of the recent-message window.
    pub message_limit: usize,
    pub include_artifacts: bool,
    /// Which artifact types to fetch when artifacts are included.
    pub artifact_types: Vec<ArtifactType>,
    pub include_parents: bool,
    pub include_summary: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            message_limit: 20,
            include_artifacts: true,
            artifact_types: vec![
                ArtifactType::Plan,
                ArtifactType::Spec,
                ArtifactType::Decision,
                ArtifactType::Checklist,
            ],
            include_parents: true,
            include_summary: true,
        }
    }
}

/// Branch fields the pack carries, decoupled from the stored row.
#[derive(Debug, Clone, Serialize)]
pub struct BranchInfo {
    pub id: String,
    pub name: Option<String>,
    pub is_default: bool,
    pub summary: Option<String>,
    pub summary_updated_at: Option<String>,
    /// Total live message count for the branch, independent of the window.
    pub message_count: i64,
}

/// Artifacts included in a pack: the full fetched list (every live version
/// of the requested types) and the latest-per-type reduction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArtifactSet {
    /// One artifact per type, in requested-type order, latest version wins.
    pub latest: Vec<Artifact>,
    /// Everything fetched, ordered (type, version DESC, updated_at DESC).
    pub all: Vec<Artifact>,
}

impl ArtifactSet {
    pub fn latest_of(&self, artifact_type: ArtifactType) -> Option<&Artifact> {
        self.latest
            .iter()
            .find(|a| a.artifact_type == artifact_type)
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

/// A bounded, ephemeral snapshot of a branch's conversational state.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPack {
    pub project: Project,
    pub work_item: WorkItem,
    /// Immediate parents via parent_child edges — a flat list, not a
    /// root-to-node path. Zero or several entries depending on edge data.
    pub parent_items: Vec<WorkItem>,
    pub branch: BranchInfo,
    /// Recent messages in chronological order.
    pub messages: Vec<Message>,
    pub artifacts: ArtifactSet,
    pub generated_at: String,
    /// chars/4 heuristic over all included text fields.
    pub estimated_tokens: usize,
}

/// Assembles context packs from the store. A pure read path: the only
/// failure beyond storage trouble is a missing branch.
#[derive(Clone)]
pub struct ContextBuilder {
    db: DbHandle,
}

impl ContextBuilder {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Build a context pack for a branch.
    ///
    /// Empty sub-results (no messages, no parents, no artifacts) are valid;
    /// only a missing or deleted branch fails, with `BranchNotFound`.
    pub async fn build_context(
        &self,
        branch_id: &str,
        options: &ContextOptions,
    ) -> Result<ContextPack, ContextError> {
        let id = branch_id.to_string();
        let row = self
            .db
            .call(move |db| db.get_branch_context(&id))
            .await?
            .ok_or_else(|| ContextError::BranchNotFound {
                id: branch_id.to_string(),
            })?;

        let parent_items = if options.include_parents {
            let item_id = row.work_item.id.clone();
            self.db
                .call(move |db| db.list_parent_items(&item_id))
                .await?
        } else {
            Vec::new()
        };

        // Fetched newest-first to bound the query, then reversed so the pack
        // always reads chronologically.
        let id = branch_id.to_string();
        let limit = options.message_limit;
        let mut messages = self
            .db
            .call(move |db| db.list_recent_messages(&id, limit))
            .await?;
        messages.reverse();

        let id = branch_id.to_string();
        let message_count = self.db.call(move |db| db.count_messages(&id)).await?;

        let artifacts = if options.include_artifacts {
            let item_id = row.work_item.id.clone();
            let types = options.artifact_types.clone();
            let all = self
                .db
                .call(move |db| db.list_latest_artifacts(&item_id, &types))
                .await?;
            reduce_latest(all, &options.artifact_types)
        } else {
            ArtifactSet::default()
        };

        let summary = if options.include_summary {
            row.branch.summary.clone()
        } else {
            None
        };

        let branch = BranchInfo {
            id: row.branch.id,
            name: row.branch.name,
            is_default: row.branch.is_default,
            summary,
            summary_updated_at: row.branch.summary_updated_at,
            message_count,
        };

        let mut pack = ContextPack {
            project: row.project,
            work_item: row.work_item,
            parent_items,
            branch,
            messages,
            artifacts,
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            estimated_tokens: 0,
        };
        pack.estimated_tokens = estimate_pack_tokens(&pack);
        Ok(pack)
    }

    /// Build a pack and render it as a prompt string.
    pub async fn build_context_string(
        &self,
        branch_id: &str,
        options: &ContextOptions,
    ) -> Result<String, ContextError> {
        let pack = self.build_context(branch_id, options).await?;
        Ok(pack.to_prompt_string())
    }
}

/// Keep the first (highest-version) row seen per type; order the reduction by
/// the requested type list so rendering stays deterministic.
fn reduce_latest(all: Vec<Artifact>, requested: &[ArtifactType]) -> ArtifactSet {
    let mut by_type: HashMap<ArtifactType, Artifact> = HashMap::new();
    for artifact in &all {
        by_type
            .entry(artifact.artifact_type)
            .or_insert_with(|| artifact.clone());
    }
    let latest = requested
        .iter()
        .filter_map(|t| by_type.remove(t))
        .collect();
    ArtifactSet { latest, all }
}

/// Sum character lengths of every included text field, then divide by 4.
fn estimate_pack_tokens(pack: &ContextPack) -> usize {
    let mut chars = 0usize;
    chars += pack.project.name.chars().count();
    chars += pack.project.description.chars().count();
    chars += pack.work_item.title.chars().count();
    chars += pack.work_item.description.chars().count();
    if let Some(criteria) = &pack.work_item.acceptance_criteria {
        chars += criteria.chars().count();
    }
    for parent in &pack.parent_items {
        chars += parent.title.chars().count();
    }
    if let Some(summary) = &pack.branch.summary {
        chars += summary.chars().count();
    }
    for message in &pack.messages {
        chars += message.content.chars().count();
    }
    for artifact in &pack.artifacts.latest {
        chars += artifact.title.chars().count();
        chars += artifact.content.to_string().chars().count();
    }
    tokens::tokens_for_chars(chars)
}
