use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Beads workflow status. Coarser than Huly's; the difference is carried in
/// `huly:*` labels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BeadsStatus {
    #[default]
    Open,
    InProgress,
    Blocked,
    Deferred,
    Closed,
}

/// Dependency edge as exported in the JSONL dump. Parent/child links carry
/// `type = "parent-child"` with `issue_id` pointing at the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeadsDependency {
    pub issue_id: String,
    #[serde(rename = "type", default)]
    pub dep_type: String,
}

pub const PARENT_CHILD_DEP: &str = "parent-child";

/// One issue as stored in the per-project Beads database. Deserialization is
/// tolerant: the JSONL dump omits empty fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeadsIssue {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub status: BeadsStatus,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<BeadsDependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BeadsIssue {
    /// The parent issue id, when a parent-child dependency exists.
    pub fn parent_id(&self) -> Option<&str> {
        self.dependencies
            .iter()
            .find(|d| d.dep_type == PARENT_CHILD_DEP)
            .map(|d| d.issue_id.as_str())
    }

    /// Server-side modification time in epoch milliseconds, the unit used
    /// for conflict comparison.
    pub fn updated_at_ms(&self) -> Option<i64> {
        self.updated_at.map(|t| t.timestamp_millis())
    }

    /// The `huly:*` status label, if one is present.
    pub fn huly_status_label(&self) -> Option<&str> {
        self.labels
            .iter()
            .map(|l| l.as_str())
            .find(|l| l.starts_with("huly:"))
    }
}

/// Closed vocabulary of fields `bd update` may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum BeadsField {
    Status,
    Priority,
    Title,
    Type,
    AddLabel,
    RemoveLabel,
}

#[derive(Debug, Clone, Default)]
pub struct CreateBeadsIssue {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub issue_type: Option<String>,
    pub labels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_row_with_defaults() {
        let issue: BeadsIssue = serde_json::from_str(r#"{"id":"bd-1","title":"A"}"#).unwrap();
        assert_eq!(issue.id, "bd-1");
        assert_eq!(issue.status, BeadsStatus::Open);
        assert_eq!(issue.priority, 0);
        assert!(issue.labels.is_empty());
        assert_eq!(issue.parent_id(), None);
    }

    #[test]
    fn test_parent_extraction() {
        let issue: BeadsIssue = serde_json::from_str(
            r#"{"id":"bd-2","title":"B","dependencies":[
                {"issue_id":"bd-9","type":"blocks"},
                {"issue_id":"bd-1","type":"parent-child"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(issue.parent_id(), Some("bd-1"));
    }

    #[test]
    fn test_status_string_forms() {
        let issue: BeadsIssue =
            serde_json::from_str(r#"{"id":"bd-3","title":"C","status":"in_progress"}"#).unwrap();
        assert_eq!(issue.status, BeadsStatus::InProgress);
        assert_eq!(BeadsStatus::InProgress.to_string(), "in_progress");
        assert_eq!("closed".parse::<BeadsStatus>().unwrap(), BeadsStatus::Closed);
    }

    #[test]
    fn test_huly_status_label() {
        let issue: BeadsIssue = serde_json::from_str(
            r#"{"id":"bd-4","title":"D","labels":["area:auth","huly:backlog"]}"#,
        )
        .unwrap();
        assert_eq!(issue.huly_status_label(), Some("huly:backlog"));
    }

    #[test]
    fn test_field_rendering() {
        assert_eq!(BeadsField::Status.to_string(), "status");
        assert_eq!(BeadsField::AddLabel.to_string(), "add-label");
        assert_eq!(BeadsField::RemoveLabel.to_string(), "remove-label");
    }
}
