//! Phase 3 — Beads ↔ Huly.
//!
//! 3a pushes Huly state into the per-project Beads store, 3b pushes Beads
//! state back, with the link-before-create cascade guarding both creation
//! paths. Re-parenting and the Git commit of the Beads tree close the phase.

use std::collections::HashSet;
use std::path::Path;

use db::models::issue::{Issue, IssuePatch};
use tracing::{debug, info, warn};

use crate::services::beads::{
    BeadsError,
    cli::sanitize_title,
    models::{BeadsField, BeadsIssue, BeadsStatus, CreateBeadsIssue},
};
use crate::services::http::ApiError;
use crate::services::huly::models::{CreateHulyIssue, HulyIssue, HulyIssuePatch};
use crate::services::mappers;

use super::conflict::{self, Resolution};
use super::{PhaseContext, PhaseReport, snapshot};

pub struct Phase3Outcome {
    pub report: PhaseReport,
    /// True when any Beads mutation happened and a commit was attempted.
    pub committed: bool,
}

#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Beads(#[from] BeadsError),
}

pub async fn run(ctx: &PhaseContext<'_>) -> Result<Phase3Outcome, sqlx::Error> {
    let mut report = PhaseReport::default();

    let Some(project_path) = ctx.snapshot.project_path.clone() else {
        debug!(
            project = ctx.snapshot.project.identifier.as_str(),
            "no filesystem path; skipping phase 3"
        );
        return Ok(Phase3Outcome {
            report,
            committed: false,
        });
    };

    let mut beads_mutations = 0u32;
    // Beads ids 3a wrote (or deliberately deferred); 3b must not overwrite
    // the fresh Huly-side state this cycle.
    let mut touched = HashSet::<String>::new();

    run_3a(ctx, &project_path, &mut report, &mut touched, &mut beads_mutations).await?;
    run_3b(ctx, &project_path, &touched, &mut report).await?;
    run_reparent(ctx, &project_path, &mut report, &mut beads_mutations).await?;

    let mut committed = false;
    if beads_mutations > 0 && !ctx.dry_run {
        match ctx
            .beads
            .commit_and_push(&project_path, ctx.beads_git_push)
            .await
        {
            Ok((commit, push)) => {
                committed = true;
                info!(
                    project = ctx.snapshot.project.identifier.as_str(),
                    ?commit,
                    ?push,
                    "committed beads changes"
                );
            }
            Err(e) => report.record_error("beads-commit", e),
        }
    }

    info!(
        project = ctx.snapshot.project.identifier.as_str(),
        synced = report.synced,
        skipped = report.skipped,
        errors = report.errors.len(),
        mutations = beads_mutations,
        "phase 3 (beads↔huly) complete"
    );
    Ok(Phase3Outcome { report, committed })
}

// ---------------------------------------------------------------------------
// 3a — Huly → Beads
// ---------------------------------------------------------------------------

async fn run_3a(
    ctx: &PhaseContext<'_>,
    project_path: &Path,
    report: &mut PhaseReport,
    touched: &mut HashSet<String>,
    beads_mutations: &mut u32,
) -> Result<(), sqlx::Error> {
    let stored = Issue::find_by_project(ctx.pool, &ctx.snapshot.project.identifier).await?;
    let stored_by_identifier = snapshot::stored_by_identifier(&stored);
    let beads_by_id = ctx.snapshot.beads_by_id();
    let beads_by_footer = ctx.snapshot.beads_by_footer();

    // Beads ids already claimed by a mapping; a link candidate must be free.
    let mut used_beads_ids: HashSet<String> = stored
        .iter()
        .filter_map(|r| r.beads_issue_id.clone())
        .collect();

    let mut patches: Vec<IssuePatch> = Vec::new();

    for issue in &ctx.snapshot.huly_issues {
        let row = stored_by_identifier.get(issue.identifier.as_str()).copied();
        if row.is_some_and(|r| r.deleted_from_huly) {
            report.skipped += 1;
            continue;
        }

        let mapped = row
            .and_then(|r| r.beads_issue_id.as_deref())
            .map(|id| (id, beads_by_id.get(id).copied()));

        match mapped {
            Some((beads_id, Some(beads_issue))) => {
                let row = row.expect("mapped implies stored row");
                match conflict::resolve(row, issue.modified_on, beads_issue.updated_at_ms()) {
                    Resolution::ApplyHuly => {
                        match apply_huly_to_beads(ctx, project_path, issue, beads_issue).await {
                            Ok(writes) => {
                                *beads_mutations += writes;
                                if writes > 0 {
                                    report.synced += 1;
                                    touched.insert(beads_id.to_string());
                                } else {
                                    report.skipped += 1;
                                }
                                patches.push(seen_patch(ctx, issue, beads_issue));
                            }
                            Err(e) => report.record_error(&issue.identifier, e),
                        }
                    }
                    Resolution::DeferBeads => {
                        // Both sides moved and Beads is newer: write nothing,
                        // mark the Huly state as seen, and shield the row
                        // from 3b until the next cycle.
                        touched.insert(beads_id.to_string());
                        patches.push(IssuePatch {
                            identifier: issue.identifier.clone(),
                            project_identifier: ctx.snapshot.project.identifier.clone(),
                            huly_modified_at: Some(issue.modified_on),
                            ..Default::default()
                        });
                        report.skipped += 1;
                    }
                    Resolution::ApplyBeads | Resolution::Skip => report.skipped += 1,
                }
            }
            Some((beads_id, None)) => {
                // Store claims a mapping the snapshot cannot see. The dump
                // can lag the database, so settle it with a point read
                // before touching the mapping.
                match ctx.beads.show_issue(project_path, beads_id).await {
                    Ok(Some(_)) => {
                        debug!(
                            identifier = issue.identifier.as_str(),
                            beads_id, "mapped beads issue alive but absent from snapshot; deferring"
                        );
                        report.skipped += 1;
                        continue;
                    }
                    Ok(None) => warn!(
                        identifier = issue.identifier.as_str(),
                        beads_id, "mapped beads issue is gone"
                    ),
                    Err(e) => {
                        report.record_error(&issue.identifier, e);
                        continue;
                    }
                }
                let relink = ctx
                    .snapshot
                    .beads_issues
                    .iter()
                    .find(|b| {
                        !used_beads_ids.contains(&b.id)
                            && mappers::normalize_title(&b.title)
                                == mappers::normalize_title(&issue.title)
                    });
                match relink {
                    Some(candidate) if !ctx.dry_run => {
                        info!(
                            identifier = issue.identifier.as_str(),
                            old = beads_id,
                            new = candidate.id.as_str(),
                            "re-linked stale beads mapping by title"
                        );
                        Issue::clear_beads_mapping(ctx.pool, &issue.identifier).await?;
                        used_beads_ids.insert(candidate.id.clone());
                        touched.insert(candidate.id.clone());
                        patches.push(link_patch(ctx, issue, candidate));
                        report.synced += 1;
                    }
                    _ => {
                        // Reconciliation candidate; the periodic sweep deals
                        // with it.
                        report.skipped += 1;
                    }
                }
            }
            None => {
                // Link cascade before any create.
                let candidate = find_beads_link_candidate(
                    ctx,
                    issue,
                    &beads_by_footer,
                    &used_beads_ids,
                );
                match candidate {
                    Some(beads_issue) => {
                        used_beads_ids.insert(beads_issue.id.clone());
                        touched.insert(beads_issue.id.clone());
                        patches.push(link_patch(ctx, issue, beads_issue));
                        report.synced += 1;
                        debug!(
                            identifier = issue.identifier.as_str(),
                            beads_id = beads_issue.id.as_str(),
                            "linked existing beads issue"
                        );
                    }
                    None => {
                        if ctx.dry_run {
                            info!(
                                identifier = issue.identifier.as_str(),
                                "[dry-run] would create beads issue"
                            );
                            report.synced += 1;
                            continue;
                        }
                        match create_beads_issue(ctx, project_path, issue).await {
                            Ok((created, writes)) => {
                                *beads_mutations += writes;
                                used_beads_ids.insert(created.id.clone());
                                touched.insert(created.id.clone());
                                patches.push(link_patch(ctx, issue, &created));
                                report.synced += 1;
                                info!(
                                    identifier = issue.identifier.as_str(),
                                    beads_id = created.id.as_str(),
                                    "created beads issue"
                                );
                            }
                            Err(e) => report.record_error(&issue.identifier, e),
                        }
                    }
                }
            }
        }
    }

    Issue::upsert_many(ctx.pool, &patches).await?;
    Ok(())
}

/// Link cascade (ii)–(iv): footer reference, normalized-title equality, then
/// strict containment with the length floor.
fn find_beads_link_candidate<'a>(
    ctx: &PhaseContext<'a>,
    issue: &HulyIssue,
    beads_by_footer: &std::collections::HashMap<&str, &'a BeadsIssue>,
    used: &HashSet<String>,
) -> Option<&'a BeadsIssue> {
    if let Some(found) = beads_by_footer.get(issue.identifier.as_str()).copied()
        && !used.contains(&found.id)
    {
        return Some(found);
    }

    let normalized = mappers::normalize_title(&issue.title);
    if let Some(found) = ctx
        .snapshot
        .beads_issues
        .iter()
        .find(|b| !used.contains(&b.id) && mappers::normalize_title(&b.title) == normalized)
    {
        return Some(found);
    }

    ctx.snapshot
        .beads_issues
        .iter()
        .find(|b| !used.contains(&b.id) && mappers::titles_match(&issue.title, &b.title))
}

/// Apply `(status, priority, title)` differences from Huly onto a mapped
/// Beads issue. Returns the number of CLI writes issued.
async fn apply_huly_to_beads(
    ctx: &PhaseContext<'_>,
    project_path: &Path,
    issue: &HulyIssue,
    beads_issue: &BeadsIssue,
) -> Result<u32, StepError> {
    let (expected_status, expected_label) = mappers::huly_to_beads_status(&issue.status);
    let expected_priority = mappers::huly_to_beads_priority(&issue.priority);
    let expected_title = sanitize_title(&issue.title);
    let current_label = beads_issue.huly_status_label();

    let status_changed = beads_issue.status != expected_status;
    let label_changed = current_label != expected_label;
    let priority_changed = beads_issue.priority != expected_priority;
    let title_changed = beads_issue.title != expected_title;

    let mut writes = 0u32;
    if !(status_changed || label_changed || priority_changed || title_changed) {
        return Ok(writes);
    }

    if ctx.dry_run {
        info!(
            identifier = issue.identifier.as_str(),
            beads_id = beads_issue.id.as_str(),
            status_changed, label_changed, priority_changed, title_changed,
            "[dry-run] would update beads issue"
        );
        return Ok([status_changed, label_changed, priority_changed, title_changed]
            .iter()
            .filter(|&&c| c)
            .count() as u32);
    }

    if status_changed {
        match expected_status {
            BeadsStatus::Closed => ctx.beads.close_issue(project_path, &beads_issue.id).await?,
            other => {
                if beads_issue.status == BeadsStatus::Closed {
                    ctx.beads.reopen_issue(project_path, &beads_issue.id).await?;
                    writes += 1;
                }
                if other != BeadsStatus::Open || beads_issue.status != BeadsStatus::Closed {
                    ctx.beads
                        .update_issue(
                            project_path,
                            &beads_issue.id,
                            BeadsField::Status,
                            &other.to_string(),
                        )
                        .await?;
                }
            }
        }
        writes += 1;
    }

    if label_changed {
        if let Some(old) = current_label {
            ctx.beads
                .update_issue(project_path, &beads_issue.id, BeadsField::RemoveLabel, old)
                .await?;
            writes += 1;
        }
        if let Some(new) = expected_label {
            ctx.beads
                .update_issue(project_path, &beads_issue.id, BeadsField::AddLabel, new)
                .await?;
            writes += 1;
        }
    }

    if priority_changed {
        ctx.beads
            .update_issue(
                project_path,
                &beads_issue.id,
                BeadsField::Priority,
                &expected_priority.to_string(),
            )
            .await?;
        writes += 1;
    }

    if title_changed {
        ctx.beads
            .update_issue(project_path, &beads_issue.id, BeadsField::Title, &expected_title)
            .await?;
        writes += 1;
    }

    Ok(writes)
}

async fn create_beads_issue(
    ctx: &PhaseContext<'_>,
    project_path: &Path,
    issue: &HulyIssue,
) -> Result<(BeadsIssue, u32), StepError> {
    let (status, label) = mappers::huly_to_beads_status(&issue.status);
    let create = CreateBeadsIssue {
        title: issue.title.clone(),
        description: Some(mappers::append_footer(
            issue.description.as_deref().unwrap_or(""),
            &issue.identifier,
            None,
        )),
        priority: Some(mappers::huly_to_beads_priority(&issue.priority)),
        issue_type: Some("task".to_string()),
        labels: label.map(|l| vec![l.to_string()]).unwrap_or_default(),
    };

    let mut created = ctx.beads.create_issue(project_path, &create).await?;
    let mut writes = 1u32;

    // New issues are born open; anything else needs a follow-up write.
    if status != BeadsStatus::Open {
        match status {
            BeadsStatus::Closed => ctx.beads.close_issue(project_path, &created.id).await?,
            other => {
                ctx.beads
                    .update_issue(project_path, &created.id, BeadsField::Status, &other.to_string())
                    .await?
            }
        }
        created.status = status;
        writes += 1;
    }

    Ok((created, writes))
}

/// Full mapping patch after a link or create.
fn link_patch(ctx: &PhaseContext<'_>, issue: &HulyIssue, beads_issue: &BeadsIssue) -> IssuePatch {
    IssuePatch {
        identifier: issue.identifier.clone(),
        project_identifier: ctx.snapshot.project.identifier.clone(),
        huly_id: Some(issue.id.clone()),
        beads_issue_id: Some(beads_issue.id.clone()),
        title: Some(issue.title.clone()),
        description: issue.description.clone(),
        status: Some(issue.status.clone()),
        priority: Some(issue.priority.clone()),
        beads_status: Some(beads_issue.status.to_string()),
        huly_modified_at: Some(issue.modified_on),
        beads_modified_at: beads_issue.updated_at_ms(),
        sub_issue_count: Some(issue.sub_issue_count),
        ..Default::default()
    }
}

/// Patch recording both sides as seen after a 3a apply.
fn seen_patch(ctx: &PhaseContext<'_>, issue: &HulyIssue, beads_issue: &BeadsIssue) -> IssuePatch {
    let (status, _) = mappers::huly_to_beads_status(&issue.status);
    IssuePatch {
        identifier: issue.identifier.clone(),
        project_identifier: ctx.snapshot.project.identifier.clone(),
        title: Some(issue.title.clone()),
        status: Some(issue.status.clone()),
        priority: Some(issue.priority.clone()),
        beads_status: Some(status.to_string()),
        huly_modified_at: Some(issue.modified_on),
        beads_modified_at: beads_issue.updated_at_ms(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// 3b — Beads → Huly
// ---------------------------------------------------------------------------

async fn run_3b(
    ctx: &PhaseContext<'_>,
    _project_path: &Path,
    touched: &HashSet<String>,
    report: &mut PhaseReport,
) -> Result<(), sqlx::Error> {
    let stored = Issue::find_by_project(ctx.pool, &ctx.snapshot.project.identifier).await?;
    let stored_by_beads_id = snapshot::stored_by_beads_id(&stored);
    let stored_by_identifier = snapshot::stored_by_identifier(&stored);
    let huly_by_identifier = ctx.snapshot.huly_by_identifier();

    let mut patches: Vec<IssuePatch> = Vec::new();

    for beads_issue in &ctx.snapshot.beads_issues {
        if touched.contains(&beads_issue.id) {
            report.skipped += 1;
            continue;
        }

        match stored_by_beads_id.get(beads_issue.id.as_str()) {
            Some(row) => {
                if row.deleted_from_huly {
                    // Tombstone stability: nothing is ever written to Huly
                    // for this identifier again.
                    report.skipped += 1;
                    continue;
                }
                match sync_mapped_to_huly(
                    ctx,
                    beads_issue,
                    row,
                    huly_by_identifier.get(row.identifier.as_str()).copied(),
                )
                .await
                {
                    Ok(Some(patch)) => {
                        report.synced += 1;
                        patches.push(patch);
                    }
                    Ok(None) => report.skipped += 1,
                    Err(e) => report.record_error(&row.identifier, e),
                }
            }
            None => {
                // Link cascade toward Huly, then create.
                match link_or_create_on_huly(ctx, beads_issue, &stored_by_identifier).await {
                    Ok(Some(patch)) => {
                        report.synced += 1;
                        patches.push(patch);
                    }
                    Ok(None) => report.skipped += 1,
                    Err(e) => report.record_error(&beads_issue.id, e),
                }
            }
        }
    }

    Issue::upsert_many(ctx.pool, &patches).await?;
    Ok(())
}

async fn sync_mapped_to_huly(
    ctx: &PhaseContext<'_>,
    beads_issue: &BeadsIssue,
    row: &Issue,
    huly_issue: Option<&HulyIssue>,
) -> Result<Option<IssuePatch>, StepError> {
    // Outside an incremental window the Huly issue is absent from the
    // snapshot; its last-seen stored values stand in.
    let (huly_status, huly_priority, huly_title, huly_modified_on) = match huly_issue {
        Some(issue) => (
            issue.status.as_str(),
            issue.priority.as_str(),
            issue.title.as_str(),
            issue.modified_on,
        ),
        None => (
            row.status.as_deref().unwrap_or(""),
            row.priority.as_deref().unwrap_or(""),
            row.title.as_str(),
            row.huly_modified_at.unwrap_or(0),
        ),
    };

    if conflict::resolve(row, huly_modified_on, beads_issue.updated_at_ms())
        != Resolution::ApplyBeads
    {
        return Ok(None);
    }

    let expected_status = mappers::beads_to_huly_status(beads_issue.status, &beads_issue.labels);
    let expected_priority = mappers::beads_to_huly_priority(beads_issue.priority);

    let status_changed = expected_status != huly_status;
    let priority_changed = expected_priority != huly_priority;
    let title_changed = !beads_issue.title.is_empty() && beads_issue.title != huly_title;

    if !(status_changed || priority_changed || title_changed) {
        // Beads moved but the visible attributes agree; record it as seen.
        return Ok(Some(IssuePatch {
            identifier: row.identifier.clone(),
            project_identifier: row.project_identifier.clone(),
            beads_modified_at: beads_issue.updated_at_ms(),
            beads_status: Some(beads_issue.status.to_string()),
            ..Default::default()
        }));
    }

    if ctx.dry_run {
        info!(
            identifier = row.identifier.as_str(),
            status_changed, priority_changed, title_changed,
            "[dry-run] would update huly issue from beads"
        );
        return Ok(None);
    }

    let patch = HulyIssuePatch {
        title: title_changed.then(|| beads_issue.title.clone()),
        status: status_changed.then(|| expected_status.to_string()),
        priority: priority_changed.then(|| expected_priority.to_string()),
        description: None,
    };

    match ctx.huly.patch_issue(&row.identifier, &patch).await? {
        Some(updated) => {
            debug!(
                identifier = row.identifier.as_str(),
                beads_id = beads_issue.id.as_str(),
                "updated huly issue from beads"
            );
            Ok(Some(IssuePatch {
                identifier: row.identifier.clone(),
                project_identifier: row.project_identifier.clone(),
                title: Some(updated.title.clone()),
                status: Some(updated.status.clone()),
                priority: Some(updated.priority.clone()),
                beads_status: Some(beads_issue.status.to_string()),
                huly_modified_at: Some(updated.modified_on),
                beads_modified_at: beads_issue.updated_at_ms(),
                ..Default::default()
            }))
        }
        None => {
            // 404 on a mapped identifier: tombstone once, leave Beads alone.
            warn!(
                identifier = row.identifier.as_str(),
                "huly issue deleted; recording tombstone"
            );
            Issue::mark_deleted_from_huly(ctx.pool, &row.identifier)
                .await
                .map_err(BeadsError::from)?;
            Ok(None)
        }
    }
}

async fn link_or_create_on_huly(
    ctx: &PhaseContext<'_>,
    beads_issue: &BeadsIssue,
    stored_by_identifier: &std::collections::HashMap<&str, &Issue>,
) -> Result<Option<IssuePatch>, StepError> {
    // A Huly issue is a link candidate only while unmapped and alive.
    let is_free = |identifier: &str| {
        stored_by_identifier
            .get(identifier)
            .is_none_or(|r| r.beads_issue_id.is_none() && !r.deleted_from_huly)
    };

    let footer_ref = mappers::extract_huly_identifier(&beads_issue.description);
    let candidate = footer_ref
        .and_then(|id| ctx.snapshot.huly_by_identifier().get(id).copied())
        .filter(|issue| is_free(&issue.identifier))
        .or_else(|| {
            let normalized = mappers::normalize_title(&beads_issue.title);
            ctx.snapshot
                .huly_issues
                .iter()
                .find(|h| {
                    is_free(&h.identifier) && mappers::normalize_title(&h.title) == normalized
                })
                .or_else(|| {
                    ctx.snapshot.huly_issues.iter().find(|h| {
                        is_free(&h.identifier) && mappers::titles_match(&h.title, &beads_issue.title)
                    })
                })
        });

    if let Some(huly_issue) = candidate {
        debug!(
            identifier = huly_issue.identifier.as_str(),
            beads_id = beads_issue.id.as_str(),
            "linked beads issue to existing huly issue"
        );
        return Ok(Some(IssuePatch {
            identifier: huly_issue.identifier.clone(),
            project_identifier: ctx.snapshot.project.identifier.clone(),
            huly_id: Some(huly_issue.id.clone()),
            beads_issue_id: Some(beads_issue.id.clone()),
            title: Some(huly_issue.title.clone()),
            description: huly_issue.description.clone(),
            status: Some(huly_issue.status.clone()),
            priority: Some(huly_issue.priority.clone()),
            beads_status: Some(beads_issue.status.to_string()),
            huly_modified_at: Some(huly_issue.modified_on),
            beads_modified_at: beads_issue.updated_at_ms(),
            sub_issue_count: Some(huly_issue.sub_issue_count),
            ..Default::default()
        }));
    }

    if ctx.dry_run {
        info!(
            beads_id = beads_issue.id.as_str(),
            "[dry-run] would create huly issue"
        );
        return Ok(None);
    }

    let create = CreateHulyIssue {
        title: beads_issue.title.clone(),
        description: Some(mappers::strip_footer(&beads_issue.description).to_string()),
        status: Some(
            mappers::beads_to_huly_status(beads_issue.status, &beads_issue.labels).to_string(),
        ),
        priority: Some(mappers::beads_to_huly_priority(beads_issue.priority).to_string()),
        parent_identifier: None,
    };
    let created = ctx
        .huly
        .create_issue(&ctx.snapshot.project.identifier, &create)
        .await?;
    info!(
        identifier = created.identifier.as_str(),
        beads_id = beads_issue.id.as_str(),
        "created huly issue from beads"
    );

    Ok(Some(IssuePatch {
        identifier: created.identifier.clone(),
        project_identifier: ctx.snapshot.project.identifier.clone(),
        huly_id: Some(created.id.clone()),
        beads_issue_id: Some(beads_issue.id.clone()),
        title: Some(created.title.clone()),
        description: created.description.clone(),
        status: Some(created.status.clone()),
        priority: Some(created.priority.clone()),
        beads_status: Some(beads_issue.status.to_string()),
        huly_modified_at: Some(created.modified_on),
        beads_modified_at: beads_issue.updated_at_ms(),
        ..Default::default()
    }))
}

// ---------------------------------------------------------------------------
// Re-parenting
// ---------------------------------------------------------------------------

async fn run_reparent(
    ctx: &PhaseContext<'_>,
    project_path: &Path,
    report: &mut PhaseReport,
    beads_mutations: &mut u32,
) -> Result<(), sqlx::Error> {
    let stored = Issue::find_by_project(ctx.pool, &ctx.snapshot.project.identifier).await?;
    let stored_by_identifier = snapshot::stored_by_identifier(&stored);
    let stored_by_beads_id = snapshot::stored_by_beads_id(&stored);
    let beads_by_id = ctx.snapshot.beads_by_id();

    for issue in &ctx.snapshot.huly_issues {
        let Some(row) = stored_by_identifier.get(issue.identifier.as_str()) else {
            continue;
        };
        if row.deleted_from_huly {
            continue;
        }
        let Some(child_beads_id) = row.beads_issue_id.as_deref() else {
            continue;
        };

        let huly_parent = issue.parent_issue.as_ref().map(|p| p.identifier.as_str());
        let stored_parent = row.parent_huly_id.as_deref();

        if huly_parent != stored_parent {
            // Huly re-parented: re-issue the dependency on the Beads side
            // and record the pair atomically. Huly wins if both moved.
            let new_parent_beads = huly_parent
                .and_then(|p| stored_by_identifier.get(p))
                .and_then(|r| r.beads_issue_id.clone());

            if ctx.dry_run {
                info!(
                    identifier = issue.identifier.as_str(),
                    ?huly_parent,
                    "[dry-run] would re-parent beads issue"
                );
                continue;
            }

            let result: Result<(), StepError> = async {
                if let Some(old) = row.parent_beads_id.as_deref() {
                    ctx.beads.dep_remove(project_path, child_beads_id, old).await?;
                    *beads_mutations += 1;
                }
                if let Some(new) = new_parent_beads.as_deref() {
                    ctx.beads.dep_add(project_path, child_beads_id, new).await?;
                    *beads_mutations += 1;
                    // The CLI is fire-and-forget; confirm the edge landed.
                    match ctx.beads.dep_tree(project_path, child_beads_id).await {
                        Ok(tree) => {
                            if !tree.to_string().contains(new) {
                                warn!(
                                    identifier = issue.identifier.as_str(),
                                    parent = new,
                                    "dependency tree does not show the new parent"
                                );
                            }
                        }
                        Err(e) => debug!(
                            identifier = issue.identifier.as_str(),
                            "dependency tree check failed: {e}"
                        ),
                    }
                }
                Ok(())
            }
            .await;

            match result {
                Ok(()) => {
                    Issue::update_parent_child(
                        ctx.pool,
                        &issue.identifier,
                        huly_parent,
                        new_parent_beads.as_deref(),
                    )
                    .await?;
                    report.synced += 1;
                    debug!(
                        identifier = issue.identifier.as_str(),
                        ?huly_parent,
                        "re-parented beads issue"
                    );
                }
                Err(e) => report.record_error(&issue.identifier, e),
            }
            continue;
        }

        // Huly agrees with the store; check the Beads side.
        let Some(beads_issue) = beads_by_id.get(child_beads_id) else {
            continue;
        };
        let beads_parent = beads_issue.parent_id();
        let stored_beads_parent = row.parent_beads_id.as_deref();
        if beads_parent == stored_beads_parent {
            continue;
        }

        let new_parent_identifier = beads_parent
            .and_then(|p| stored_by_beads_id.get(p))
            .map(|r| r.identifier.clone());

        if ctx.dry_run {
            info!(
                identifier = issue.identifier.as_str(),
                ?beads_parent,
                "[dry-run] would re-parent huly issue"
            );
            continue;
        }

        match ctx
            .huly
            .move_issue(&issue.identifier, new_parent_identifier.as_deref())
            .await
        {
            Ok(_) => {
                Issue::update_parent_child(
                    ctx.pool,
                    &issue.identifier,
                    new_parent_identifier.as_deref(),
                    beads_parent,
                )
                .await?;
                report.synced += 1;
                debug!(
                    identifier = issue.identifier.as_str(),
                    ?beads_parent,
                    "re-parented huly issue"
                );
            }
            Err(e) => report.record_error(&issue.identifier, e),
        }
    }

    Ok(())
}
