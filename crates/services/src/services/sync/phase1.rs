//! Phase 1 — Huly → Vibe.

use std::collections::HashSet;

use db::models::issue::{Issue, IssuePatch};
use tracing::{debug, info};

use crate::services::huly::models::HulyIssue;
use crate::services::mappers;
use crate::services::vibe::models::{CreateVibeTask, UpdateVibeTask, VibeTask};

use super::{PhaseContext, PhaseReport, snapshot};

pub struct Phase1Outcome {
    pub report: PhaseReport,
    /// Vibe task ids written this cycle; Phase 2 must not read them back.
    pub touched: HashSet<String>,
}

/// Vibe task title: `"<identifier>: <title>"`.
fn task_title(issue: &HulyIssue) -> String {
    format!("{}: {}", issue.identifier, issue.title)
}

fn task_description(issue: &HulyIssue) -> String {
    let parent = issue.parent_issue.as_ref().map(|p| p.identifier.as_str());
    mappers::append_footer(issue.description.as_deref().unwrap_or(""), &issue.identifier, parent)
}

pub async fn run(ctx: &PhaseContext<'_>) -> Result<Phase1Outcome, sqlx::Error> {
    let mut report = PhaseReport::default();
    let mut touched = HashSet::new();
    let mut patches: Vec<IssuePatch> = Vec::new();

    let stored = Issue::find_by_project(ctx.pool, &ctx.snapshot.project.identifier).await?;
    let stored_by_identifier = snapshot::stored_by_identifier(&stored);
    let vibe_by_id = ctx.snapshot.vibe_by_id();
    let vibe_by_footer = ctx.snapshot.vibe_by_footer();

    let Some(vibe_project_id) = ctx.snapshot.project.vibe_id.clone() else {
        debug!(
            project = ctx.snapshot.project.identifier.as_str(),
            "no vibe project mapped; skipping phase 1"
        );
        report.skipped = ctx.snapshot.huly_issues.len() as u32;
        return Ok(Phase1Outcome { report, touched });
    };

    for issue in &ctx.snapshot.huly_issues {
        let row = stored_by_identifier.get(issue.identifier.as_str());
        if row.is_some_and(|r| r.deleted_from_huly) {
            report.skipped += 1;
            continue;
        }

        // Three-tier task location: stored mapping, then footer scan, then
        // create.
        let existing: Option<&&VibeTask> = row
            .and_then(|r| r.vibe_task_id.as_deref())
            .and_then(|id| vibe_by_id.get(id))
            .or_else(|| vibe_by_footer.get(issue.identifier.as_str()));

        match sync_issue(ctx, issue, existing.copied(), &vibe_project_id).await {
            Ok(SyncAction::Updated { task_id, patch }) => {
                report.synced += 1;
                touched.insert(task_id);
                if let Some(patch) = patch {
                    patches.push(patch);
                }
            }
            Ok(SyncAction::Unchanged { patch }) => {
                report.skipped += 1;
                if let Some(patch) = patch {
                    patches.push(patch);
                }
            }
            Ok(SyncAction::DryRun) => report.synced += 1,
            Err(e) => report.record_error(&issue.identifier, e),
        }
    }

    Issue::upsert_many(ctx.pool, &patches).await?;

    info!(
        project = ctx.snapshot.project.identifier.as_str(),
        synced = report.synced,
        skipped = report.skipped,
        errors = report.errors.len(),
        "phase 1 (huly→vibe) complete"
    );
    Ok(Phase1Outcome { report, touched })
}

enum SyncAction {
    Updated {
        task_id: String,
        patch: Option<IssuePatch>,
    },
    Unchanged {
        patch: Option<IssuePatch>,
    },
    DryRun,
}

fn store_patch(issue: &HulyIssue, task_id: &str, project: &str) -> IssuePatch {
    IssuePatch {
        identifier: issue.identifier.clone(),
        project_identifier: project.to_string(),
        huly_id: Some(issue.id.clone()),
        vibe_task_id: Some(task_id.to_string()),
        title: Some(issue.title.clone()),
        description: issue.description.clone(),
        status: Some(issue.status.clone()),
        priority: Some(issue.priority.clone()),
        huly_modified_at: Some(issue.modified_on),
        sub_issue_count: Some(issue.sub_issue_count),
        ..Default::default()
    }
}

async fn sync_issue(
    ctx: &PhaseContext<'_>,
    issue: &HulyIssue,
    existing: Option<&VibeTask>,
    vibe_project_id: &str,
) -> Result<SyncAction, crate::services::http::ApiError> {
    let project = ctx.snapshot.project.identifier.as_str();

    match existing {
        Some(task) => {
            let expected_status = mappers::huly_to_vibe_status(&issue.status);
            let huly_description = issue.description.as_deref().unwrap_or("");
            let vibe_description = task.description.as_deref().unwrap_or("");

            let status_changed = task.status != expected_status;
            // Descriptions are compared with the footer stripped; only a
            // real Huly-side change propagates.
            let description_changed = mappers::strip_footer(vibe_description) != huly_description;

            if !status_changed && !description_changed {
                return Ok(SyncAction::Unchanged {
                    patch: Some(store_patch(issue, &task.id, project)),
                });
            }

            if ctx.dry_run {
                info!(
                    identifier = issue.identifier.as_str(),
                    task = task.id.as_str(),
                    status_changed,
                    description_changed,
                    "[dry-run] would update vibe task"
                );
                return Ok(SyncAction::DryRun);
            }

            let update = UpdateVibeTask {
                status: status_changed.then(|| expected_status.to_string()),
                description: description_changed.then(|| task_description(issue)),
                title: None,
            };
            ctx.vibe.update_task(&task.id, &update).await?;
            debug!(
                identifier = issue.identifier.as_str(),
                task = task.id.as_str(),
                "updated vibe task"
            );
            Ok(SyncAction::Updated {
                task_id: task.id.clone(),
                patch: Some(store_patch(issue, &task.id, project)),
            })
        }
        None => {
            if ctx.dry_run {
                info!(
                    identifier = issue.identifier.as_str(),
                    "[dry-run] would create vibe task"
                );
                return Ok(SyncAction::DryRun);
            }

            let create = CreateVibeTask {
                project_id: vibe_project_id.to_string(),
                title: task_title(issue),
                description: Some(task_description(issue)),
                status: Some(mappers::huly_to_vibe_status(&issue.status).to_string()),
            };
            let task = ctx.vibe.create_task(&create).await?;
            info!(
                identifier = issue.identifier.as_str(),
                task = task.id.as_str(),
                "created vibe task"
            );
            Ok(SyncAction::Updated {
                task_id: task.id.clone(),
                patch: Some(store_patch(issue, &task.id, project)),
            })
        }
    }
}
