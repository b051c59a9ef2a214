use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::pack::speaker_label;
use crate::errors::SummarizeError;
use crate::generate::{ChatMessage, GenerateError, GenerateOptions, StructuredGenerator};
use crate::store::DbHandle;
use crate::store::models::{BranchContextRow, BranchSummaryState, Message, Project, WorkItem};
use crate::summarize::config::SummarizeConfig;
use crate::summarize::format::{BranchSummary, ProjectSummary};

/// Wall-clock budget for the fire-and-forget trigger.
pub const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a batch summary sweep. Branches that raced, shrank below the
/// threshold, or were skipped for lack of a provider land in neither bucket.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub updated: Vec<String>,
    pub failed: Vec<String>,
}

/// Decides when a branch's history warrants a fresh rolling summary,
/// generates it, and commits it under the optimistic lock.
///
/// The generation capability is injected at construction; running without
/// one degrades every summarization call to a no-op (`Ok(None)`) rather than
/// an error. Summarization is an enhancement, never a hard dependency of
/// message append.
#[derive(Clone)]
pub struct SummarizationService {
    db: DbHandle,
    generator: Option<Arc<dyn StructuredGenerator>>,
    config: SummarizeConfig,
}

impl SummarizationService {
    pub fn new(
        db: DbHandle,
        generator: Option<Arc<dyn StructuredGenerator>>,
        config: SummarizeConfig,
    ) -> Self {
        Self {
            db,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &SummarizeConfig {
        &self.config
    }

    /// Cheap pre-check: should this branch be summarized now?
    ///
    /// Reads only the lock token and the live message count — no message
    /// bodies. A missing branch answers `false`. The check itself takes no
    /// lock; correctness under races is enforced at commit time.
    pub async fn branch_needs_summary(&self, branch_id: &str) -> Result<bool> {
        let id = branch_id.to_string();
        let state = self.db.call(move |db| db.branch_summary_state(&id)).await?;
        Ok(match state {
            Some(state) => needs_summary(&state, &self.config),
            None => false,
        })
    }

    /// Generate and commit a fresh rolling summary for a branch.
    ///
    /// Returns `Ok(None)` when there is nothing to do: no provider
    /// configured, too few messages, or another writer committed first
    /// (the optimistic race was lost). Generation failures propagate.
    pub async fn summarize_branch(
        &self,
        branch_id: &str,
    ) -> Result<Option<BranchSummary>, SummarizeError> {
        let Some(generator) = self.generator.clone() else {
            debug!(branch_id, "no generation provider configured; skipping summary");
            return Ok(None);
        };

        let id = branch_id.to_string();
        let row = self
            .db
            .call(move |db| db.get_branch_context(&id))
            .await?
            .ok_or_else(|| SummarizeError::BranchNotFound {
                id: branch_id.to_string(),
            })?;

        let id = branch_id.to_string();
        let limit = self.config.max_messages_to_summarize;
        let messages = self
            .db
            .call(move |db| db.list_oldest_messages(&id, limit))
            .await?;

        // Guards against a stale or racing needs-check.
        if (messages.len() as u32) < self.config.min_messages_for_summary {
            return Ok(None);
        }

        // Optimistic-lock token: the commit below only lands if this value
        // is still current.
        let pre_update_count = row.branch.summary_message_count;

        let prompt = build_branch_prompt(&row, &messages);
        let options = GenerateOptions {
            temperature: self.config.temperature,
            model: self.config.model.clone(),
        };
        let generation = match generator
            .generate_structured(&prompt, &BranchSummary::schema(), &options)
            .await
        {
            Ok(generation) => generation,
            Err(GenerateError::NoProvider) => {
                debug!(branch_id, "provider reported itself unconfigured; skipping summary");
                return Ok(None);
            }
            Err(err) => return Err(SummarizeError::Generation(err)),
        };

        let summary: BranchSummary =
            serde_json::from_value(generation.data).map_err(|e| {
                SummarizeError::Generation(GenerateError::InvalidOutput {
                    attempts: 1,
                    reason: format!("summary did not match schema: {}", e),
                })
            })?;

        let text = summary.to_display_string();
        let new_count = messages.len() as i64;
        let id = branch_id.to_string();
        let affected = self
            .db
            .call(move |db| db.commit_branch_summary(&id, &text, new_count, pre_update_count))
            .await?;

        if affected == 0 {
            debug!(branch_id, "summary commit lost the optimistic race; discarding result");
            return Ok(None);
        }
        Ok(Some(summary))
    }

    /// Summarize a project from its recently updated work items.
    ///
    /// Stored unconditionally: project summarization carries no optimistic
    /// lock, preserving the source system's asymmetry with branches.
    pub async fn summarize_project(
        &self,
        project_id: &str,
    ) -> Result<Option<ProjectSummary>, SummarizeError> {
        let Some(generator) = self.generator.clone() else {
            debug!(project_id, "no generation provider configured; skipping summary");
            return Ok(None);
        };

        let id = project_id.to_string();
        let project = self
            .db
            .call(move |db| db.get_project(&id))
            .await?
            .ok_or_else(|| SummarizeError::ProjectNotFound {
                id: project_id.to_string(),
            })?;

        let id = project_id.to_string();
        let items = self
            .db
            .call(move |db| db.list_recent_work_items(&id, 20))
            .await?;

        let prompt = build_project_prompt(&project, &items);
        let options = GenerateOptions {
            temperature: self.config.temperature,
            model: self.config.model.clone(),
        };
        let generation = match generator
            .generate_structured(&prompt, &ProjectSummary::schema(), &options)
            .await
        {
            Ok(generation) => generation,
            Err(GenerateError::NoProvider) => return Ok(None),
            Err(err) => return Err(SummarizeError::Generation(err)),
        };

        let summary: ProjectSummary =
            serde_json::from_value(generation.data).map_err(|e| {
                SummarizeError::Generation(GenerateError::InvalidOutput {
                    attempts: 1,
                    reason: format!("summary did not match schema: {}", e),
                })
            })?;

        let text = summary.to_display_string();
        let id = project_id.to_string();
        self.db
            .call(move |db| db.update_project_summary(&id, &text))
            .await?;
        Ok(Some(summary))
    }

    /// Batch sweep: summarize every live branch whose counters say it is due.
    ///
    /// The per-branch predicate is recomputed from one bookkeeping query; no
    /// extra query per branch. Branches are processed sequentially, and one
    /// branch's failure never aborts the sweep.
    pub async fn update_pending_summaries(&self) -> Result<SweepOutcome> {
        let states = self.db.call(|db| db.list_branch_summary_states()).await?;

        let mut outcome = SweepOutcome::default();
        for state in states {
            if !needs_summary(&state, &self.config) {
                continue;
            }
            match self.summarize_branch(&state.branch_id).await {
                Ok(Some(_)) => outcome.updated.push(state.branch_id),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        branch_id = %state.branch_id,
                        error = %err,
                        "sweep: branch summarization failed"
                    );
                    outcome.failed.push(state.branch_id);
                }
            }
        }
        Ok(outcome)
    }

    /// Fire-and-forget: check and, if due, summarize a branch in the
    /// background. The integration point for every message append.
    ///
    /// Returns immediately, never blocks the caller, never surfaces an
    /// error. The needs-check→summarize→commit sequence runs as its own task
    /// raced against `timeout`; a lost race is logged and abandoned, but the
    /// work is not cancelled and may still commit later.
    pub fn trigger_summarization_if_needed(
        &self,
        branch_id: &str,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let service = self.clone();
        let branch_id = branch_id.to_string();
        tokio::spawn(async move {
            let work = {
                let service = service.clone();
                let branch_id = branch_id.clone();
                tokio::spawn(async move {
                    if service.branch_needs_summary(&branch_id).await? {
                        service
                            .summarize_branch(&branch_id)
                            .await
                            .map_err(anyhow::Error::new)?;
                    }
                    anyhow::Ok(())
                })
            };

            match tokio::time::timeout(timeout, work).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => {
                    warn!(
                        branch_id = %branch_id,
                        error = %format!("{:#}", err),
                        "background summarization failed"
                    );
                }
                Ok(Err(join_err)) => {
                    warn!(
                        branch_id = %branch_id,
                        error = %join_err,
                        "background summarization panicked"
                    );
                }
                Err(_) => {
                    warn!(
                        branch_id = %branch_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "background summarization timed out; abandoning (it may still commit)"
                    );
                }
            }
        })
    }
}

/// The needs-summary decision rule, shared by the pre-check and the sweep.
fn needs_summary(state: &BranchSummaryState, config: &SummarizeConfig) -> bool {
    if state.summary_message_count == 0 {
        state.message_count >= config.min_messages_for_summary as i64
    } else {
        state.message_count - state.summary_message_count
            >= config.summarize_every_n_messages as i64
    }
}

/// Prompt for branch summarization: work item header, the previous stored
/// summary as prior context (each pass refines, not restarts), then the
/// transcript window.
fn build_branch_prompt(row: &BranchContextRow, messages: &[Message]) -> Vec<ChatMessage> {
    let system = "You summarize project-management conversations. Produce a concise \
                  rolling summary of the discussion with its key decisions, open \
                  questions, and next steps. Preserve concrete details (names, \
                  numbers, commitments) over pleasantries.";

    let mut user = String::new();
    user.push_str(&format!(
        "Work item: {} ({})\n",
        row.work_item.title,
        row.work_item.item_type.as_str(),
    ));
    if !row.work_item.description.is_empty() {
        user.push_str(&row.work_item.description);
        user.push('\n');
    }
    if let Some(previous) = &row.branch.summary {
        user.push_str("\nPrevious summary (refine it with the conversation below):\n");
        user.push_str(previous);
        user.push('\n');
    }
    user.push_str("\nConversation:\n");
    for message in messages {
        user.push_str(&format!("{}: {}\n", speaker_label(message), message.content));
    }

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Prompt for project summarization over recent work items.
fn build_project_prompt(project: &Project, items: &[WorkItem]) -> Vec<ChatMessage> {
    let system = "You summarize the state of a software project from its work items. \
                  Produce a concise summary with goals, the current focus, and recent \
                  progress.";

    let mut user = String::new();
    user.push_str(&format!("Project: {}\n", project.name));
    if !project.description.is_empty() {
        user.push_str(&project.description);
        user.push('\n');
    }
    if let Some(previous) = &project.summary {
        user.push_str("\nPrevious summary:\n");
        user.push_str(previous);
        user.push('\n');
    }
    user.push_str("\nRecent work items (most recently updated first):\n");
    for item in items {
        user.push_str(&format!(
            "- {} [{} | {} | {}]",
            item.title,
            item.item_type.as_str(),
            item.status.as_str(),
            item.priority.as_str(),
        ));
        if !item.description.is_empty() {
            user.push_str(&format!(": {}", item.description));
        }
        user.push('\n');
    }

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}
