//! Prompt rendering for context packs.
//!
//! Deterministic layout with a fixed section order: project header, work
//! item header, parent items, branch summary, artifacts, recent
//! conversation. Sections with no content are omitted entirely; no empty
//! headers reach the prompt.

use crate::context::builder::ContextPack;
use crate::store::models::{Message, MessageRole};

impl ContextPack {
    /// Render the pack as a single prompt string.
    pub fn to_prompt_string(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!("# Project: {}\n", self.project.name));
        if !self.project.description.is_empty() {
            out.push_str(&self.project.description);
            out.push('\n');
        }
        out.push('\n');

        out.push_str(&format!("## Work Item: {}\n", self.work_item.title));
        out.push_str(&format!(
            "Type: {} | Status: {} | Priority: {}\n",
            self.work_item.item_type.as_str(),
            self.work_item.status.as_str(),
            self.work_item.priority.as_str(),
        ));
        if !self.work_item.description.is_empty() {
            out.push_str(&self.work_item.description);
            out.push('\n');
        }
        if let Some(criteria) = &self.work_item.acceptance_criteria {
            out.push_str(&format!("Acceptance Criteria: {}\n", criteria));
        }
        out.push('\n');

        if !self.parent_items.is_empty() {
            out.push_str("### Parent Items\n");
            for parent in &self.parent_items {
                out.push_str(&format!(
                    "- {} ({}, {})\n",
                    parent.title,
                    parent.item_type.as_str(),
                    parent.status.as_str(),
                ));
            }
            out.push('\n');
        }

        if let Some(summary) = &self.branch.summary {
            out.push_str("### Branch Summary\n");
            out.push_str(summary);
            out.push_str("\n\n");
        }

        if !self.artifacts.latest.is_empty() {
            out.push_str("### Linked Artifacts\n\n");
            for artifact in &self.artifacts.latest {
                out.push_str(&format!(
                    "#### {}: {} (v{})\n",
                    artifact.artifact_type.as_str(),
                    artifact.title,
                    artifact.version,
                ));
                let content = serde_json::to_string_pretty(&artifact.content)
                    .unwrap_or_else(|_| artifact.content.to_string());
                for line in content.lines() {
                    out.push_str("  ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
            }
        }

        if !self.messages.is_empty() {
            out.push_str(&format!(
                "### Recent Conversation (last {} of {} messages)\n",
                self.messages.len(),
                self.branch.message_count,
            ));
            for message in &self.messages {
                out.push_str(&format!(
                    "{}: {}\n",
                    speaker_label(message),
                    message.content
                ));
            }
        }

        out.trim_end().to_string()
    }
}

/// Role label for a transcript line: the author's display name for user
/// messages when one is known, the uppercase role otherwise.
pub(crate) fn speaker_label(message: &Message) -> &str {
    match (&message.role, &message.author_name) {
        (MessageRole::User, Some(name)) => name.as_str(),
        (role, _) => role.label(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::builder::{ArtifactSet, BranchInfo};
    use crate::store::models::{
        Artifact, ArtifactType, ItemStatus, ItemType, Priority, Project, WorkItem,
    };
    use serde_json::json;

    fn project() -> Project {
        Project {
            id: "p1".into(),
            name: "atlas".into(),
            description: "Mapping platform".into(),
            summary: None,
            summary_updated_at: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn work_item(title: &str) -> WorkItem {
        WorkItem {
            id: "w1".into(),
            project_id: "p1".into(),
            title: title.into(),
            description: "Cache rendered tiles".into(),
            item_type: ItemType::Feature,
            status: ItemStatus::InProgress,
            priority: Priority::High,
            acceptance_criteria: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn message(role: MessageRole, content: &str, author: Option<&str>) -> Message {
        Message {
            id: "m1".into(),
            branch_id: "b1".into(),
            role,
            content: content.into(),
            metadata: None,
            user_id: author.map(|_| "u1".into()),
            author_name: author.map(str::to_string),
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn empty_pack() -> ContextPack {
        ContextPack {
            project: project(),
            work_item: work_item("Tile cache"),
            parent_items: Vec::new(),
            branch: BranchInfo {
                id: "b1".into(),
                name: Some("main".into()),
                is_default: true,
                summary: None,
                summary_updated_at: None,
                message_count: 0,
            },
            messages: Vec::new(),
            artifacts: ArtifactSet::default(),
            generated_at: "2026-01-01T00:00:00Z".into(),
            estimated_tokens: 0,
        }
    }

    #[test]
    fn test_empty_sections_omitted() {
        let text = empty_pack().to_prompt_string();
        assert!(text.contains("# Project: atlas"));
        assert!(text.contains("## Work Item: Tile cache"));
        assert!(!text.contains("### Parent Items"));
        assert!(!text.contains("### Branch Summary"));
        assert!(!text.contains("### Linked Artifacts"));
        assert!(!text.contains("### Recent Conversation"));
    }

    #[test]
    fn test_section_order_and_content() {
        let mut pack = empty_pack();
        pack.parent_items = vec![work_item("Rendering epic")];
        pack.branch.summary = Some("Work so far: caching layer sketched.".into());
        pack.artifacts = ArtifactSet {
            latest: vec![Artifact {
                id: "a1".into(),
                work_item_id: "w1".into(),
                branch_id: None,
                artifact_type: ArtifactType::Plan,
                title: "Rollout plan".into(),
                content: json!({"steps": ["cache", "invalidate"]}),
                version: 3,
                created_at: "2026-01-01T00:00:00Z".into(),
                updated_at: "2026-01-01T00:00:00Z".into(),
            }],
            all: Vec::new(),
        };
        pack.messages = vec![
            message(MessageRole::User, "can we ship this week?", Some("Priya")),
            message(MessageRole::Assistant, "two blockers remain", None),
        ];
        pack.branch.message_count = 12;

        let text = pack.to_prompt_string();

        let project_pos = text.find("# Project:").unwrap();
        let item_pos = text.find("## Work Item:").unwrap();
        let parents_pos = text.find("### Parent Items").unwrap();
        let summary_pos = text.find("### Branch Summary").unwrap();
        let artifacts_pos = text.find("### Linked Artifacts").unwrap();
        let convo_pos = text.find("### Recent Conversation").unwrap();
        assert!(project_pos < item_pos);
        assert!(item_pos < parents_pos);
        assert!(parents_pos < summary_pos);
        assert!(summary_pos < artifacts_pos);
        assert!(artifacts_pos < convo_pos);

        assert!(text.contains("- Rendering epic (feature, in_progress)"));
        assert!(text.contains("#### plan: Rollout plan (v3)"));
        assert!(text.contains("  \"steps\""));
        assert!(text.contains("(last 2 of 12 messages)"));
        assert!(text.contains("Priya: can we ship this week?"));
        assert!(text.contains("ASSISTANT: two blockers remain"));
    }

    #[test]
    fn test_speaker_label_falls_back_to_role() {
        let m = message(MessageRole::User, "x", None);
        assert_eq!(speaker_label(&m), "USER");
        let m = message(MessageRole::Tool, "x", Some("Priya"));
        assert_eq!(speaker_label(&m), "TOOL");
        let m = message(MessageRole::User, "x", Some("Priya"));
        assert_eq!(speaker_label(&m), "Priya");
    }

    #[test]
    fn test_acceptance_criteria_rendered_when_present() {
        let mut pack = empty_pack();
        pack.work_item.acceptance_criteria = Some("p95 under 50ms".into());
        let text = pack.to_prompt_string();
        assert!(text.contains("Acceptance Criteria: p95 under 50ms"));
    }
}
