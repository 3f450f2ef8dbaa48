//! Conflict resolution for Phase 3.
//!
//! Each stored row carries the last-seen-by-engine modification times of
//! both sides. A side "changed" when its server-reported time moved past the
//! recorded one (or was never recorded).

use db::models::issue::Issue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Only Huly moved (or both moved and Huly is newer / tied): Phase 3a
    /// applies Huly → Beads.
    ApplyHuly,
    /// Only Beads moved: Phase 3b applies Beads → Huly this cycle.
    ApplyBeads,
    /// Both moved and Beads is newer: neither side is written this cycle.
    /// The Huly state is recorded as seen so the next cycle degrades to
    /// `ApplyBeads`.
    DeferBeads,
    /// Neither side moved.
    Skip,
}

pub fn resolve(
    stored: &Issue,
    huly_modified_on: i64,
    beads_updated_ms: Option<i64>,
) -> Resolution {
    let huly_changed = stored
        .huly_modified_at
        .is_none_or(|last| huly_modified_on > last);
    let beads_changed = match stored.beads_modified_at {
        None => beads_updated_ms.is_some(),
        Some(last) => beads_updated_ms.is_some_and(|b| b > last),
    };

    match (huly_changed, beads_changed) {
        (true, false) => Resolution::ApplyHuly,
        (false, true) => Resolution::ApplyBeads,
        (false, false) => Resolution::Skip,
        (true, true) => {
            // Server timestamps break the tie; equal timestamps go to Huly.
            if beads_updated_ms.is_some_and(|b| b > huly_modified_on) {
                Resolution::DeferBeads
            } else {
                Resolution::ApplyHuly
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stored(huly_seen: Option<i64>, beads_seen: Option<i64>) -> Issue {
        Issue {
            identifier: "ACME-1".to_string(),
            project_identifier: "ACME".to_string(),
            huly_id: None,
            beads_issue_id: Some("bd-1".to_string()),
            vibe_task_id: None,
            title: "t".to_string(),
            description: None,
            status: None,
            priority: None,
            beads_status: None,
            huly_modified_at: huly_seen,
            beads_modified_at: beads_seen,
            parent_huly_id: None,
            parent_beads_id: None,
            sub_issue_count: 0,
            deleted_from_huly: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    const T: i64 = 1_700_000_000_000;

    #[test]
    fn test_only_huly_changed() {
        let row = stored(Some(T - 60_000), Some(T - 60_000));
        assert_eq!(resolve(&row, T - 30_000, Some(T - 60_000)), Resolution::ApplyHuly);
    }

    #[test]
    fn test_only_beads_changed() {
        let row = stored(Some(T - 60_000), Some(T - 60_000));
        assert_eq!(resolve(&row, T - 60_000, Some(T - 10_000)), Resolution::ApplyBeads);
    }

    #[test]
    fn test_both_changed_beads_newer_defers() {
        let row = stored(Some(T - 60_000), Some(T - 60_000));
        assert_eq!(resolve(&row, T - 30_000, Some(T - 10_000)), Resolution::DeferBeads);
    }

    #[test]
    fn test_both_changed_huly_newer_wins() {
        let row = stored(Some(T - 60_000), Some(T - 60_000));
        assert_eq!(resolve(&row, T - 10_000, Some(T - 30_000)), Resolution::ApplyHuly);
    }

    #[test]
    fn test_tie_goes_to_huly() {
        let row = stored(Some(T - 60_000), Some(T - 60_000));
        assert_eq!(resolve(&row, T, Some(T)), Resolution::ApplyHuly);
    }

    #[test]
    fn test_nothing_changed() {
        let row = stored(Some(T), Some(T));
        assert_eq!(resolve(&row, T, Some(T)), Resolution::Skip);
    }

    #[test]
    fn test_unseen_sides_count_as_changed() {
        let row = stored(None, None);
        // Fresh link with both sides present and huly newer.
        assert_eq!(resolve(&row, T, Some(T - 1)), Resolution::ApplyHuly);
        // Beads has no timestamp at all: only huly is live.
        assert_eq!(resolve(&row, T, None), Resolution::ApplyHuly);
    }
}
