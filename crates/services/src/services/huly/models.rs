use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct HulyProject {
    pub id: String,
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct HulyParentRef {
    pub id: String,
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct HulyIssue {
    pub id: String,
    pub identifier: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    /// Server-reported modification time, epoch milliseconds.
    pub modified_on: i64,
    #[serde(default)]
    pub parent_issue: Option<HulyParentRef>,
    #[serde(default)]
    pub sub_issue_count: i64,
}

fn default_priority() -> String {
    "None".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct CreateHulyIssue {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub parent_identifier: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct HulyIssuePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Fetch window for `listIssues`; `include_sync_meta` asks the server for
/// the cursor metadata.
#[derive(Debug, Clone, Default)]
pub struct ListIssuesOptions {
    pub modified_since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub include_sync_meta: bool,
}

/// `max(modifiedOn)` across the returned issues plus the server clock, both
/// epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    pub latest_modified: Option<i64>,
    pub server_time: i64,
}

impl SyncMeta {
    /// ISO-8601 rendering of the high-water mark, the cursor storage format.
    pub fn latest_modified_iso(&self) -> Option<String> {
        self.latest_modified
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct IssuePage {
    pub issues: Vec<HulyIssue>,
    #[serde(default)]
    pub sync_meta: Option<SyncMeta>,
    pub count: usize,
}

impl IssuePage {
    pub fn empty() -> Self {
        Self {
            issues: Vec::new(),
            sync_meta: None,
            count: 0,
        }
    }

    /// High-water mark for cursor advancement: server-reported when present,
    /// otherwise computed from the returned issues.
    pub fn latest_modified_iso(&self) -> Option<String> {
        if let Some(meta) = &self.sync_meta
            && let Some(iso) = meta.latest_modified_iso()
        {
            return Some(iso);
        }
        self.issues
            .iter()
            .map(|i| i.modified_on)
            .max()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(identifier: &str, modified_on: i64) -> HulyIssue {
        HulyIssue {
            id: format!("id-{identifier}"),
            identifier: identifier.to_string(),
            title: "t".to_string(),
            description: None,
            status: "Backlog".to_string(),
            priority: "Medium".to_string(),
            modified_on,
            parent_issue: None,
            sub_issue_count: 0,
        }
    }

    #[test]
    fn test_latest_modified_prefers_sync_meta() {
        let page = IssuePage {
            issues: vec![issue("ACME-1", 1_700_000_000_000)],
            sync_meta: Some(SyncMeta {
                latest_modified: Some(1_700_000_099_000),
                server_time: 1_700_000_100_000,
            }),
            count: 1,
        };
        assert_eq!(
            page.latest_modified_iso().as_deref(),
            Some("2023-11-14T22:14:59.000Z")
        );
    }

    #[test]
    fn test_latest_modified_computed_from_issues() {
        let page = IssuePage {
            issues: vec![issue("ACME-1", 1_700_000_000_000), issue("ACME-2", 1_700_000_050_000)],
            sync_meta: None,
            count: 2,
        };
        assert_eq!(
            page.latest_modified_iso().as_deref(),
            Some("2023-11-14T22:14:10.000Z")
        );
    }

    #[test]
    fn test_empty_page_has_no_watermark() {
        assert_eq!(IssuePage::empty().latest_modified_iso(), None);
    }
}
