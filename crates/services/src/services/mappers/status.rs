//! Status and priority vocabulary mappings.
//!
//! Huly↔Vibe is (near) lossless; Huly→Beads is a `(status, label)` pair and
//! the reverse direction is lossy by design. Unknown values fall back to the
//! most conservative bucket so the functions stay total.

use crate::services::beads::models::BeadsStatus;

/// Label vocabulary carried on Beads issues to preserve the finer-grained
/// Huly status. Closed set; unknown `huly:*` labels are ignored.
pub const HULY_STATUS_LABELS: &[&str] = &[
    "huly:backlog",
    "huly:todo",
    "huly:in-review",
    "huly:cancelled",
];

pub fn huly_to_vibe_status(huly: &str) -> &'static str {
    match huly {
        "Backlog" | "Todo" => "todo",
        "In Progress" => "inprogress",
        "In Review" => "inreview",
        "Done" => "done",
        "Cancelled" => "cancelled",
        _ => "todo",
    }
}

/// Inverse of [`huly_to_vibe_status`]. `todo` maps back to `Todo`; the
/// `Backlog → todo` collapse is not recoverable from the Vibe side.
pub fn vibe_to_huly_status(vibe: &str) -> &'static str {
    match vibe {
        "todo" => "Todo",
        "inprogress" => "In Progress",
        "inreview" => "In Review",
        "done" => "Done",
        "cancelled" => "Cancelled",
        _ => "Todo",
    }
}

/// Huly status to Beads `(status value, status label)` pair.
pub fn huly_to_beads_status(huly: &str) -> (BeadsStatus, Option<&'static str>) {
    match huly {
        "Backlog" => (BeadsStatus::Open, Some("huly:backlog")),
        "Todo" => (BeadsStatus::Open, Some("huly:todo")),
        "In Progress" => (BeadsStatus::InProgress, None),
        "In Review" => (BeadsStatus::InProgress, Some("huly:in-review")),
        "Done" => (BeadsStatus::Closed, None),
        "Cancelled" => (BeadsStatus::Closed, Some("huly:cancelled")),
        _ => (BeadsStatus::Open, Some("huly:backlog")),
    }
}

/// Beads `(status, labels)` back to a Huly status. Labels take precedence;
/// unknown labels are ignored; `blocked`/`deferred` have no Huly counterpart
/// and land in Backlog.
pub fn beads_to_huly_status(status: BeadsStatus, labels: &[String]) -> &'static str {
    let has = |label: &str| labels.iter().any(|l| l == label);

    match status {
        BeadsStatus::Closed => {
            if has("huly:cancelled") {
                "Cancelled"
            } else {
                "Done"
            }
        }
        BeadsStatus::InProgress => {
            if has("huly:in-review") {
                "In Review"
            } else {
                "In Progress"
            }
        }
        BeadsStatus::Open => {
            if has("huly:todo") {
                "Todo"
            } else {
                "Backlog"
            }
        }
        BeadsStatus::Blocked | BeadsStatus::Deferred => "Backlog",
    }
}

pub fn huly_to_beads_priority(huly: &str) -> i64 {
    match huly {
        "Urgent" => 0,
        "High" => 1,
        "Medium" => 2,
        "Low" => 3,
        _ => 4,
    }
}

pub fn beads_to_huly_priority(priority: i64) -> &'static str {
    match priority {
        0 => "Urgent",
        1 => "High",
        2 => "Medium",
        3 => "Low",
        _ => "None",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HULY_STATUSES: &[&str] = &[
        "Backlog",
        "Todo",
        "In Progress",
        "In Review",
        "Done",
        "Cancelled",
    ];

    #[test]
    fn test_vibe_round_trip() {
        // Backlog collapses into `todo`; every other status survives the trip.
        for status in HULY_STATUSES.iter().filter(|s| **s != "Backlog") {
            assert_eq!(
                vibe_to_huly_status(huly_to_vibe_status(status)),
                *status,
                "round trip for {status}"
            );
        }
        assert_eq!(vibe_to_huly_status(huly_to_vibe_status("Backlog")), "Todo");
    }

    #[test]
    fn test_beads_round_trip_via_labels() {
        // The label carries what the coarse status loses.
        for status in HULY_STATUSES {
            let (beads_status, label) = huly_to_beads_status(status);
            let labels: Vec<String> = label.iter().map(|l| l.to_string()).collect();
            assert_eq!(
                beads_to_huly_status(beads_status, &labels),
                *status,
                "label round trip for {status}"
            );
        }
    }

    #[test]
    fn test_beads_status_pairs() {
        assert_eq!(
            huly_to_beads_status("Backlog"),
            (BeadsStatus::Open, Some("huly:backlog"))
        );
        assert_eq!(huly_to_beads_status("In Progress"), (BeadsStatus::InProgress, None));
        assert_eq!(huly_to_beads_status("Done"), (BeadsStatus::Closed, None));
        assert_eq!(
            huly_to_beads_status("Cancelled"),
            (BeadsStatus::Closed, Some("huly:cancelled"))
        );
    }

    #[test]
    fn test_unknown_labels_are_ignored() {
        let labels = vec!["huly:something-new".to_string(), "area:auth".to_string()];
        assert_eq!(beads_to_huly_status(BeadsStatus::Open, &labels), "Backlog");
        assert_eq!(beads_to_huly_status(BeadsStatus::Closed, &labels), "Done");
    }

    #[test]
    fn test_priority_inverse() {
        for huly in ["Urgent", "High", "Medium", "Low", "None"] {
            assert_eq!(beads_to_huly_priority(huly_to_beads_priority(huly)), huly);
        }
        // Out-of-range priorities clamp to None.
        assert_eq!(beads_to_huly_priority(7), "None");
    }
}
