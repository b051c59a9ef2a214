//! Summary shapes and their display flattening.
//!
//! The generator returns these as schema-shaped JSON; storage keeps only the
//! flattened display string on the branch/project row. Each pass regenerates
//! the whole summary (no incremental merge), conditioned on the previous
//! stored text.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Structured rolling summary of a branch's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSummary {
    pub summary: String,
    #[serde(default)]
    pub key_decisions: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

impl BranchSummary {
    /// Generation schema for branch summaries.
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Prose summary of the conversation so far"
                },
                "key_decisions": {"type": "array", "items": {"type": "string"}},
                "open_questions": {"type": "array", "items": {"type": "string"}},
                "next_steps": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["summary", "key_decisions", "open_questions", "next_steps"],
            "additionalProperties": false,
        })
    }

    /// Flatten into the display string stored on the branch.
    pub fn to_display_string(&self) -> String {
        let mut out = self.summary.trim().to_string();
        push_section(&mut out, "Key Decisions", &self.key_decisions);
        push_section(&mut out, "Open Questions", &self.open_questions);
        push_section(&mut out, "Next Steps", &self.next_steps);
        out
    }
}

/// Structured summary of a project's recent work-item activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub summary: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub current_focus: String,
    #[serde(default)]
    pub recent_progress: Vec<String>,
}

impl ProjectSummary {
    /// Generation schema for project summaries.
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Prose summary of where the project stands"
                },
                "goals": {"type": "array", "items": {"type": "string"}},
                "current_focus": {"type": "string"},
                "recent_progress": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["summary", "goals", "current_focus", "recent_progress"],
            "additionalProperties": false,
        })
    }

    /// Flatten into the display string stored on the project.
    pub fn to_display_string(&self) -> String {
        let mut out = self.summary.trim().to_string();
        push_section(&mut out, "Goals", &self.goals);
        if !self.current_focus.trim().is_empty() {
            out.push_str(&format!("\n\nCurrent Focus: {}", self.current_focus.trim()));
        }
        push_section(&mut out, "Recent Progress", &self.recent_progress);
        out
    }
}

fn push_section(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n\n{}:\n", heading));
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("- {}", item));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_display_full() {
        let summary = BranchSummary {
            summary: "Agreed on a cache-first design.".into(),
            key_decisions: vec!["Use sqlite".into(), "Soft deletes only".into()],
            open_questions: vec!["Eviction policy?".into()],
            next_steps: vec!["Prototype the cache".into()],
        };
        let text = summary.to_display_string();
        assert!(text.starts_with("Agreed on a cache-first design."));
        assert!(text.contains("Key Decisions:\n- Use sqlite\n- Soft deletes only"));
        assert!(text.contains("Open Questions:\n- Eviction policy?"));
        assert!(text.contains("Next Steps:\n- Prototype the cache"));
    }

    #[test]
    fn test_branch_display_omits_empty_sections() {
        let summary = BranchSummary {
            summary: "Just talk so far.".into(),
            key_decisions: vec![],
            open_questions: vec![],
            next_steps: vec![],
        };
        assert_eq!(summary.to_display_string(), "Just talk so far.");
    }

    #[test]
    fn test_branch_deserializes_from_schema_shaped_json() {
        let data = serde_json::json!({
            "summary": "s",
            "key_decisions": ["d"],
            "open_questions": [],
            "next_steps": ["n"],
        });
        let parsed: BranchSummary = serde_json::from_value(data).unwrap();
        assert_eq!(parsed.key_decisions, vec!["d"]);
        assert!(parsed.open_questions.is_empty());
    }

    #[test]
    fn test_branch_schema_required_keys() {
        let schema = BranchSummary::schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(
            required,
            vec!["summary", "key_decisions", "open_questions", "next_steps"]
        );
    }

    #[test]
    fn test_project_display() {
        let summary = ProjectSummary {
            summary: "Shipping steadily.".into(),
            goals: vec!["Launch v1".into()],
            current_focus: "Tile cache".into(),
            recent_progress: vec![],
        };
        let text = summary.to_display_string();
        assert!(text.contains("Goals:\n- Launch v1"));
        assert!(text.contains("Current Focus: Tile cache"));
        assert!(!text.contains("Recent Progress"));
    }
}
