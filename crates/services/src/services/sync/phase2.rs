//! Phase 2 — Vibe → Huly.

use std::collections::HashSet;

use db::models::issue::{Issue, IssuePatch};
use tracing::{debug, info};

use crate::services::http::ApiError;
use crate::services::huly::models::HulyIssue;
use crate::services::mappers;
use crate::services::vibe::models::VibeTask;

use super::{PhaseContext, PhaseReport, snapshot};

pub async fn run(
    ctx: &PhaseContext<'_>,
    phase1_touched: &HashSet<String>,
) -> Result<PhaseReport, sqlx::Error> {
    let mut report = PhaseReport::default();
    let mut patches: Vec<IssuePatch> = Vec::new();

    let stored = Issue::find_by_project(ctx.pool, &ctx.snapshot.project.identifier).await?;
    let stored_by_identifier = snapshot::stored_by_identifier(&stored);
    let huly_by_identifier = ctx.snapshot.huly_by_identifier();

    for task in &ctx.snapshot.vibe_tasks {
        // A task Phase 1 wrote this cycle reflects Huly already; reading it
        // back would flap.
        if phase1_touched.contains(&task.id) {
            report.skipped += 1;
            continue;
        }

        let Some(identifier) = task
            .description
            .as_deref()
            .and_then(mappers::extract_huly_identifier)
        else {
            report.skipped += 1;
            continue;
        };

        if stored_by_identifier
            .get(identifier)
            .is_some_and(|r| r.deleted_from_huly)
        {
            report.skipped += 1;
            continue;
        }

        // Incremental fetches omit unchanged issues; fall back to a point
        // read for tasks whose counterpart is outside the window.
        let huly_issue: Option<HulyIssue> = match huly_by_identifier.get(identifier) {
            Some(issue) => Some((*issue).clone()),
            None => match ctx.huly.get_issue(identifier).await {
                Ok(found) => found,
                Err(e) => {
                    report.record_error(identifier, e);
                    continue;
                }
            },
        };
        let Some(huly_issue) = huly_issue else {
            report.skipped += 1;
            continue;
        };

        match sync_task(ctx, task, &huly_issue, identifier).await {
            Ok(Some(patch)) => {
                report.synced += 1;
                patches.push(patch);
            }
            Ok(None) => report.skipped += 1,
            Err(e) => report.record_error(identifier, e),
        }
    }

    Issue::upsert_many(ctx.pool, &patches).await?;

    info!(
        project = ctx.snapshot.project.identifier.as_str(),
        synced = report.synced,
        skipped = report.skipped,
        errors = report.errors.len(),
        "phase 2 (vibe→huly) complete"
    );
    Ok(report)
}

async fn sync_task(
    ctx: &PhaseContext<'_>,
    task: &VibeTask,
    huly_issue: &HulyIssue,
    identifier: &str,
) -> Result<Option<IssuePatch>, ApiError> {
    let vibe_description = task.description.as_deref().unwrap_or("");
    let stripped = mappers::strip_footer(vibe_description);
    let huly_description = huly_issue.description.as_deref().unwrap_or("");

    // Statuses are out of sync only when the Huly status does not round to
    // the task's; the Backlog/Todo collapse is not a difference.
    let status_changed = mappers::huly_to_vibe_status(&huly_issue.status) != task.status;
    let description_changed = stripped != huly_description;

    let footer_parent = mappers::extract_parent_identifier(vibe_description);
    let huly_parent = huly_issue.parent_issue.as_ref().map(|p| p.identifier.as_str());
    let parent_changed = footer_parent != huly_parent;

    if !status_changed && !description_changed && !parent_changed {
        return Ok(None);
    }

    if ctx.dry_run {
        info!(
            identifier,
            status_changed, description_changed, parent_changed,
            "[dry-run] would update huly issue from vibe"
        );
        return Ok(None);
    }

    let mut patch = IssuePatch {
        identifier: identifier.to_string(),
        project_identifier: ctx.snapshot.project.identifier.clone(),
        vibe_task_id: Some(task.id.clone()),
        ..Default::default()
    };

    if status_changed {
        let new_status = mappers::vibe_to_huly_status(&task.status);
        if ctx
            .huly
            .update_issue(identifier, "status", serde_json::json!(new_status))
            .await?
            .is_none()
        {
            debug!(identifier, "huly issue vanished during phase 2; leaving for phase 3");
            return Ok(None);
        }
        patch.status = Some(new_status.to_string());
    }

    if description_changed
        && ctx
            .huly
            .update_issue(identifier, "description", serde_json::json!(stripped))
            .await?
            .is_none()
    {
        debug!(identifier, "huly issue vanished during phase 2; leaving for phase 3");
        return Ok(None);
    }
    if description_changed {
        patch.description = Some(stripped.to_string());
    }

    if parent_changed {
        ctx.huly.move_issue(identifier, footer_parent).await?;
    }

    debug!(identifier, task = task.id.as_str(), "updated huly issue from vibe");
    Ok(Some(patch))
}
