//! In-memory fakes for the three surfaces plus the end-to-end pipeline
//! scenarios. Mutating calls are counted so tests can assert zero-write
//! cycles.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;

use crate::services::beads::git::{CommitOutcome, PushOutcome};
use crate::services::beads::models::{
    BeadsDependency, BeadsField, BeadsIssue, BeadsStatus, CreateBeadsIssue, PARENT_CHILD_DEP,
};
use crate::services::beads::{BeadsApi, BeadsError};
use crate::services::http::ApiError;
use crate::services::huly::HulyApi;
use crate::services::huly::models::{
    CreateHulyIssue, HulyIssue, HulyIssuePatch, HulyParentRef, HulyProject, IssuePage,
    ListIssuesOptions,
};
use crate::services::vibe::VibeApi;
use crate::services::vibe::models::{
    CreateVibeProject, CreateVibeTask, UpdateVibeTask, VibeProject, VibeTask,
};

fn ms(epoch_ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(epoch_ms).expect("valid timestamp")
}

// ---------------------------------------------------------------------------
// Fake Huly
// ---------------------------------------------------------------------------

pub struct FakeHuly {
    pub project: String,
    pub issues: Mutex<BTreeMap<String, HulyIssue>>,
    pub deleted: Mutex<HashSet<String>>,
    pub clock: AtomicI64,
    next_number: AtomicI64,
    pub creates: AtomicU32,
    pub updates: AtomicU32,
    pub moves: AtomicU32,
}

impl FakeHuly {
    pub fn new(project: &str, clock_ms: i64) -> Self {
        Self {
            project: project.to_string(),
            issues: Mutex::new(BTreeMap::new()),
            deleted: Mutex::new(HashSet::new()),
            clock: AtomicI64::new(clock_ms),
            next_number: AtomicI64::new(100),
            creates: AtomicU32::new(0),
            updates: AtomicU32::new(0),
            moves: AtomicU32::new(0),
        }
    }

    pub fn insert(&self, issue: HulyIssue) {
        self.issues.lock().unwrap().insert(issue.identifier.clone(), issue);
    }

    pub fn issue(&self, identifier: &str) -> Option<HulyIssue> {
        self.issues.lock().unwrap().get(identifier).cloned()
    }

    pub fn mutation_count(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.moves.load(Ordering::SeqCst)
    }

    fn now(&self) -> i64 {
        self.clock.load(Ordering::SeqCst)
    }
}

pub fn huly_issue(identifier: &str, title: &str, status: &str, modified_on: i64) -> HulyIssue {
    HulyIssue {
        id: format!("huly-{identifier}"),
        identifier: identifier.to_string(),
        title: title.to_string(),
        description: None,
        status: status.to_string(),
        priority: "Medium".to_string(),
        modified_on,
        parent_issue: None,
        sub_issue_count: 0,
    }
}

#[async_trait]
impl HulyApi for FakeHuly {
    async fn list_projects(&self) -> Result<Vec<HulyProject>, ApiError> {
        Ok(vec![HulyProject {
            id: format!("hp-{}", self.project),
            identifier: self.project.clone(),
            name: self.project.clone(),
            archived: false,
        }])
    }

    async fn list_issues(
        &self,
        _project: &str,
        opts: &ListIssuesOptions,
    ) -> Result<IssuePage, ApiError> {
        let since = opts.modified_since.map(|t| t.timestamp_millis());
        let issues: Vec<HulyIssue> = self
            .issues
            .lock()
            .unwrap()
            .values()
            .filter(|i| since.is_none_or(|s| i.modified_on >= s))
            .cloned()
            .collect();
        let count = issues.len();
        Ok(IssuePage {
            issues,
            sync_meta: None,
            count,
        })
    }

    async fn list_issues_bulk(
        &self,
        projects: &[String],
        opts: &ListIssuesOptions,
    ) -> Result<HashMap<String, IssuePage>, ApiError> {
        let mut out = HashMap::new();
        for project in projects {
            out.insert(project.clone(), self.list_issues(project, opts).await?);
        }
        Ok(out)
    }

    async fn get_issue(&self, identifier: &str) -> Result<Option<HulyIssue>, ApiError> {
        if self.deleted.lock().unwrap().contains(identifier) {
            return Ok(None);
        }
        Ok(self.issue(identifier))
    }

    async fn get_issues_bulk(&self, identifiers: &[String]) -> Result<Vec<HulyIssue>, ApiError> {
        let issues = self.issues.lock().unwrap();
        Ok(identifiers.iter().filter_map(|i| issues.get(i).cloned()).collect())
    }

    async fn create_issue(
        &self,
        project: &str,
        create: &CreateHulyIssue,
    ) -> Result<HulyIssue, ApiError> {
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        let identifier = format!("{project}-{number}");
        let issue = HulyIssue {
            id: format!("huly-{identifier}"),
            identifier: identifier.clone(),
            title: create.title.clone(),
            description: create.description.clone(),
            status: create.status.clone().unwrap_or_else(|| "Backlog".to_string()),
            priority: create.priority.clone().unwrap_or_else(|| "None".to_string()),
            modified_on: self.now(),
            parent_issue: None,
            sub_issue_count: 0,
        };
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.insert(issue.clone());
        Ok(issue)
    }

    async fn update_issue(
        &self,
        identifier: &str,
        field: &str,
        value: serde_json::Value,
    ) -> Result<Option<HulyIssue>, ApiError> {
        if self.deleted.lock().unwrap().contains(identifier) {
            return Ok(None);
        }
        let mut issues = self.issues.lock().unwrap();
        let Some(issue) = issues.get_mut(identifier) else {
            return Ok(None);
        };
        let text = value.as_str().unwrap_or_default().to_string();
        match field {
            "title" => issue.title = text,
            "description" => issue.description = Some(text),
            "status" => issue.status = text,
            "priority" => issue.priority = text,
            _ => {}
        }
        issue.modified_on = self.now();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(Some(issue.clone()))
    }

    async fn patch_issue(
        &self,
        identifier: &str,
        patch: &HulyIssuePatch,
    ) -> Result<Option<HulyIssue>, ApiError> {
        if self.deleted.lock().unwrap().contains(identifier) {
            return Ok(None);
        }
        let mut issues = self.issues.lock().unwrap();
        let Some(issue) = issues.get_mut(identifier) else {
            return Ok(None);
        };
        if let Some(title) = &patch.title {
            issue.title = title.clone();
        }
        if let Some(description) = &patch.description {
            issue.description = Some(description.clone());
        }
        if let Some(status) = &patch.status {
            issue.status = status.clone();
        }
        if let Some(priority) = &patch.priority {
            issue.priority = priority.clone();
        }
        issue.modified_on = self.now();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(Some(issue.clone()))
    }

    async fn delete_issue(&self, identifier: &str) -> Result<(), ApiError> {
        self.deleted.lock().unwrap().insert(identifier.to_string());
        self.issues.lock().unwrap().remove(identifier);
        Ok(())
    }

    async fn delete_issues_bulk(&self, identifiers: &[String]) -> Result<(), ApiError> {
        for identifier in identifiers {
            self.delete_issue(identifier).await?;
        }
        Ok(())
    }

    async fn search_issues(&self, query: &str) -> Result<Vec<HulyIssue>, ApiError> {
        Ok(self
            .issues
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.title.contains(query))
            .cloned()
            .collect())
    }

    async fn move_issue(
        &self,
        identifier: &str,
        parent: Option<&str>,
    ) -> Result<Option<HulyIssue>, ApiError> {
        if self.deleted.lock().unwrap().contains(identifier) {
            return Ok(None);
        }
        let mut issues = self.issues.lock().unwrap();
        let parent_ref = parent.map(|p| HulyParentRef {
            id: format!("huly-{p}"),
            identifier: p.to_string(),
        });
        let Some(issue) = issues.get_mut(identifier) else {
            return Ok(None);
        };
        issue.parent_issue = parent_ref;
        issue.modified_on = self.now();
        self.moves.fetch_add(1, Ordering::SeqCst);
        Ok(Some(issue.clone()))
    }
}

// ---------------------------------------------------------------------------
// Fake Vibe
// ---------------------------------------------------------------------------

pub struct FakeVibe {
    pub projects: Mutex<Vec<VibeProject>>,
    pub tasks: Mutex<BTreeMap<String, VibeTask>>,
    next_id: AtomicI64,
    pub creates: AtomicU32,
    pub updates: AtomicU32,
}

impl FakeVibe {
    pub fn new() -> Self {
        Self {
            projects: Mutex::new(Vec::new()),
            tasks: Mutex::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            creates: AtomicU32::new(0),
            updates: AtomicU32::new(0),
        }
    }

    pub fn with_project(project_id: &str, name: &str) -> Self {
        let fake = Self::new();
        fake.projects.lock().unwrap().push(VibeProject {
            id: project_id.to_string(),
            name: name.to_string(),
            created_at: None,
        });
        fake
    }

    pub fn task(&self, task_id: &str) -> Option<VibeTask> {
        self.tasks.lock().unwrap().get(task_id).cloned()
    }

    pub fn insert_task(&self, task: VibeTask) {
        self.tasks.lock().unwrap().insert(task.id.clone(), task);
    }

    pub fn mutation_count(&self) -> u32 {
        self.creates.load(Ordering::SeqCst) + self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VibeApi for FakeVibe {
    async fn list_projects(&self) -> Result<Vec<VibeProject>, ApiError> {
        Ok(self.projects.lock().unwrap().clone())
    }

    async fn create_project(&self, create: &CreateVibeProject) -> Result<VibeProject, ApiError> {
        let project = VibeProject {
            id: format!("vp-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            name: create.name.clone(),
            created_at: None,
        };
        self.projects.lock().unwrap().push(project.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(project)
    }

    async fn list_tasks(&self, project_id: &str) -> Result<Vec<VibeTask>, ApiError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<VibeTask>, ApiError> {
        Ok(self.task(task_id))
    }

    async fn create_task(&self, create: &CreateVibeTask) -> Result<VibeTask, ApiError> {
        let task = VibeTask {
            id: format!("vt-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            project_id: create.project_id.clone(),
            title: create.title.clone(),
            description: create.description.clone(),
            status: create.status.clone().unwrap_or_else(|| "todo".to_string()),
            updated_at: None,
        };
        self.insert_task(task.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(task)
    }

    async fn update_task(
        &self,
        task_id: &str,
        update: &UpdateVibeTask,
    ) -> Result<Option<VibeTask>, ApiError> {
        let mut tasks = self.tasks.lock().unwrap();
        let Some(task) = tasks.get_mut(task_id) else {
            return Ok(None);
        };
        if let Some(title) = &update.title {
            task.title = title.clone();
        }
        if let Some(description) = &update.description {
            task.description = Some(description.clone());
        }
        if let Some(status) = &update.status {
            task.status = status.clone();
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(Some(task.clone()))
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), ApiError> {
        self.tasks.lock().unwrap().remove(task_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fake Beads
// ---------------------------------------------------------------------------

pub struct FakeBeads {
    pub issues: Mutex<BTreeMap<String, BeadsIssue>>,
    pub clock: AtomicI64,
    next_id: AtomicI64,
    pub creates: AtomicU32,
    pub updates: AtomicU32,
    pub commits: AtomicU32,
    pub dep_adds: Mutex<Vec<(String, String)>>,
    pub dep_removes: Mutex<Vec<(String, String)>>,
}

impl FakeBeads {
    pub fn new(clock_ms: i64) -> Self {
        Self {
            issues: Mutex::new(BTreeMap::new()),
            clock: AtomicI64::new(clock_ms),
            next_id: AtomicI64::new(1),
            creates: AtomicU32::new(0),
            updates: AtomicU32::new(0),
            commits: AtomicU32::new(0),
            dep_adds: Mutex::new(Vec::new()),
            dep_removes: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, issue: BeadsIssue) {
        self.issues.lock().unwrap().insert(issue.id.clone(), issue);
    }

    pub fn issue(&self, id: &str) -> Option<BeadsIssue> {
        self.issues.lock().unwrap().get(id).cloned()
    }

    pub fn mutation_count(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.dep_adds.lock().unwrap().len() as u32
            + self.dep_removes.lock().unwrap().len() as u32
    }

    fn now(&self) -> i64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn touch(&self, id: &str) {
        if let Some(issue) = self.issues.lock().unwrap().get_mut(id) {
            issue.updated_at = Some(ms(self.now()));
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn beads_issue(id: &str, title: &str, status: BeadsStatus, updated_ms: i64) -> BeadsIssue {
    BeadsIssue {
        id: id.to_string(),
        title: title.to_string(),
        status,
        updated_at: Some(ms(updated_ms)),
        created_at: Some(ms(updated_ms)),
        ..Default::default()
    }
}

#[async_trait]
impl BeadsApi for FakeBeads {
    fn is_available(&self) -> bool {
        true
    }

    async fn snapshot(&self, _project_path: &Path) -> Result<Vec<BeadsIssue>, BeadsError> {
        Ok(self.issues.lock().unwrap().values().cloned().collect())
    }

    async fn show_issue(
        &self,
        _project_path: &Path,
        id: &str,
    ) -> Result<Option<BeadsIssue>, BeadsError> {
        Ok(self.issues.lock().unwrap().get(id).cloned())
    }

    async fn dep_tree(
        &self,
        _project_path: &Path,
        id: &str,
    ) -> Result<serde_json::Value, BeadsError> {
        let issues = self.issues.lock().unwrap();
        let Some(issue) = issues.get(id) else {
            return Err(BeadsError::CommandFailed {
                code: Some(1),
                stderr: format!("issue not found: {id}"),
            });
        };
        Ok(serde_json::json!({
            "id": issue.id,
            "dependencies": issue
                .dependencies
                .iter()
                .map(|d| serde_json::json!({ "issue_id": d.issue_id, "type": d.dep_type }))
                .collect::<Vec<_>>(),
        }))
    }

    async fn ensure_initialized(&self, _project_path: &Path) -> Result<(), BeadsError> {
        Ok(())
    }

    async fn create_issue(
        &self,
        _project_path: &Path,
        create: &CreateBeadsIssue,
    ) -> Result<BeadsIssue, BeadsError> {
        let issue = BeadsIssue {
            id: format!("bd-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            title: crate::services::beads::cli::sanitize_title(&create.title),
            description: create.description.clone().unwrap_or_default(),
            status: BeadsStatus::Open,
            priority: create.priority.unwrap_or(2),
            issue_type: create.issue_type.clone(),
            labels: create.labels.clone(),
            dependencies: Vec::new(),
            created_at: Some(ms(self.now())),
            updated_at: Some(ms(self.now())),
        };
        self.insert(issue.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(issue)
    }

    async fn update_issue(
        &self,
        _project_path: &Path,
        id: &str,
        field: BeadsField,
        value: &str,
    ) -> Result<(), BeadsError> {
        {
            let mut issues = self.issues.lock().unwrap();
            let Some(issue) = issues.get_mut(id) else {
                return Err(BeadsError::CommandFailed {
                    code: Some(1),
                    stderr: format!("issue not found: {id}"),
                });
            };
            match field {
                BeadsField::Status => {
                    issue.status = value.parse().unwrap_or(BeadsStatus::Open);
                }
                BeadsField::Priority => issue.priority = value.parse().unwrap_or(issue.priority),
                BeadsField::Title => issue.title = value.to_string(),
                BeadsField::Type => issue.issue_type = Some(value.to_string()),
                BeadsField::AddLabel => issue.labels.push(value.to_string()),
                BeadsField::RemoveLabel => issue.labels.retain(|l| l != value),
            }
        }
        self.touch(id);
        Ok(())
    }

    async fn close_issue(&self, _project_path: &Path, id: &str) -> Result<(), BeadsError> {
        if let Some(issue) = self.issues.lock().unwrap().get_mut(id) {
            issue.status = BeadsStatus::Closed;
        }
        self.touch(id);
        Ok(())
    }

    async fn reopen_issue(&self, _project_path: &Path, id: &str) -> Result<(), BeadsError> {
        if let Some(issue) = self.issues.lock().unwrap().get_mut(id) {
            issue.status = BeadsStatus::Open;
        }
        self.touch(id);
        Ok(())
    }

    async fn dep_add(
        &self,
        _project_path: &Path,
        child: &str,
        parent: &str,
    ) -> Result<(), BeadsError> {
        if let Some(issue) = self.issues.lock().unwrap().get_mut(child) {
            issue.dependencies.push(BeadsDependency {
                issue_id: parent.to_string(),
                dep_type: PARENT_CHILD_DEP.to_string(),
            });
        }
        self.dep_adds
            .lock()
            .unwrap()
            .push((child.to_string(), parent.to_string()));
        Ok(())
    }

    async fn dep_remove(
        &self,
        _project_path: &Path,
        child: &str,
        parent: &str,
    ) -> Result<(), BeadsError> {
        if let Some(issue) = self.issues.lock().unwrap().get_mut(child) {
            issue
                .dependencies
                .retain(|d| !(d.dep_type == PARENT_CHILD_DEP && d.issue_id == parent));
        }
        self.dep_removes
            .lock()
            .unwrap()
            .push((child.to_string(), parent.to_string()));
        Ok(())
    }

    async fn commit_and_push(
        &self,
        _project_path: &Path,
        push: bool,
    ) -> Result<(CommitOutcome, Option<PushOutcome>), BeadsError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok((
            CommitOutcome::Committed,
            push.then_some(PushOutcome::Pushed),
        ))
    }
}

// ---------------------------------------------------------------------------
// Scenario tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use db::DBService;
    use db::models::issue::{Issue, IssuePatch};
    use db::models::project::{Project, ProjectAttrs};

    use crate::services::config::SyncConfig;
    use crate::services::docs::LoggingDocsExporter;
    use crate::services::mappers;
    use crate::services::sync::SyncEngine;

    const T: i64 = 1_700_000_000_000;

    struct Harness {
        db: DBService,
        engine: SyncEngine,
        huly: Arc<FakeHuly>,
        vibe: Arc<FakeVibe>,
        beads: Arc<FakeBeads>,
        project: Project,
        _workdir: tempfile::TempDir,
    }

    async fn harness(with_vibe: bool) -> Harness {
        let db = DBService::new_in_memory().await.unwrap();
        let workdir = tempfile::tempdir().unwrap();

        let huly = Arc::new(FakeHuly::new("ACME", T));
        let vibe = Arc::new(FakeVibe::with_project("vp-1", "Acme"));
        let beads = Arc::new(FakeBeads::new(T));

        let project = Project::upsert(
            &db.pool,
            "ACME",
            &ProjectAttrs {
                name: Some("Acme".to_string()),
                vibe_id: with_vibe.then(|| "vp-1".to_string()),
                filesystem_path: Some(workdir.path().to_string_lossy().to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let config = SyncConfig {
            incremental_sync: false,
            ..SyncConfig::default()
        };
        let engine = SyncEngine::new(
            db.clone(),
            huly.clone(),
            vibe.clone(),
            beads.clone(),
            Arc::new(LoggingDocsExporter),
            config,
        );

        Harness {
            db,
            engine,
            huly,
            vibe,
            beads,
            project,
            _workdir: workdir,
        }
    }

    fn stored_patch(identifier: &str) -> IssuePatch {
        IssuePatch {
            identifier: identifier.to_string(),
            project_identifier: "ACME".to_string(),
            ..Default::default()
        }
    }

    // Scenario 1: fresh Huly issue, empty store.
    #[tokio::test]
    async fn test_fresh_huly_issue_fans_out() {
        let h = harness(true).await;
        h.huly.insert(huly_issue("ACME-17", "Add retry", "Backlog", T));

        let outcome = h.engine.sync_project(&h.project, None).await.unwrap();
        assert_eq!(outcome.total_errors(), 0);

        // Vibe task created with composed title, mapped status, footer.
        let tasks = h.vibe.tasks.lock().unwrap().clone();
        assert_eq!(tasks.len(), 1);
        let task = tasks.values().next().unwrap();
        assert_eq!(task.title, "ACME-17: Add retry");
        assert_eq!(task.status, "todo");
        let task_description = task.description.clone().unwrap();
        assert!(task_description.ends_with("\n\n---\nHuly Issue: ACME-17"));

        // Beads issue created with the status label and mapped priority.
        let beads = h.beads.issues.lock().unwrap().clone();
        assert_eq!(beads.len(), 1);
        let bead = beads.values().next().unwrap();
        assert_eq!(bead.labels, vec!["huly:backlog".to_string()]);
        assert_eq!(bead.priority, 2);
        assert_eq!(bead.status, BeadsStatus::Open);
        assert_eq!(
            mappers::extract_huly_identifier(&bead.description),
            Some("ACME-17")
        );

        // Store row carries both foreign keys.
        let row = Issue::find_by_identifier(&h.db.pool, "ACME-17")
            .await
            .unwrap()
            .unwrap();
        assert!(row.vibe_task_id.is_some());
        assert!(row.beads_issue_id.is_some());
    }

    // Idempotence: a second cycle with no external changes writes nothing.
    #[tokio::test]
    async fn test_second_cycle_is_quiescent() {
        let h = harness(true).await;
        h.huly.insert(huly_issue("ACME-17", "Add retry", "Backlog", T));

        h.engine.sync_project(&h.project, None).await.unwrap();
        let huly_before = h.huly.mutation_count();
        let vibe_before = h.vibe.mutation_count();
        let beads_before = h.beads.mutation_count();

        let outcome = h.engine.sync_project(&h.project, None).await.unwrap();
        assert_eq!(outcome.total_errors(), 0);
        assert_eq!(h.huly.mutation_count(), huly_before, "no huly writes");
        assert_eq!(h.vibe.mutation_count(), vibe_before, "no vibe writes");
        assert_eq!(h.beads.mutation_count(), beads_before, "no beads writes");
    }

    // Scenario 2: wiping the store re-links instead of re-creating.
    #[tokio::test]
    async fn test_dedup_on_store_wipe() {
        let h = harness(true).await;
        h.huly.insert(huly_issue("ACME-17", "Add retry", "Backlog", T));

        h.engine.sync_project(&h.project, None).await.unwrap();
        let row = Issue::find_by_identifier(&h.db.pool, "ACME-17")
            .await
            .unwrap()
            .unwrap();
        let vibe_id = row.vibe_task_id.clone().unwrap();
        let beads_id = row.beads_issue_id.clone().unwrap();

        sqlx::query("DELETE FROM issues")
            .execute(&h.db.pool)
            .await
            .unwrap();

        let creates_before = (
            h.huly.creates.load(Ordering::SeqCst),
            h.vibe.creates.load(Ordering::SeqCst),
            h.beads.creates.load(Ordering::SeqCst),
        );
        h.engine.sync_project(&h.project, None).await.unwrap();

        assert_eq!(
            (
                h.huly.creates.load(Ordering::SeqCst),
                h.vibe.creates.load(Ordering::SeqCst),
                h.beads.creates.load(Ordering::SeqCst),
            ),
            creates_before,
            "link cascade must suppress creates"
        );

        let relinked = Issue::find_by_identifier(&h.db.pool, "ACME-17")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(relinked.vibe_task_id.as_deref(), Some(vibe_id.as_str()));
        assert_eq!(relinked.beads_issue_id.as_deref(), Some(beads_id.as_str()));
    }

    // Scenario 3: both sides changed, Beads newer. No Huly write this cycle;
    // the next cycle applies the Beads title.
    #[tokio::test]
    async fn test_conflict_beads_newer_defers_then_applies() {
        let h = harness(false).await;
        h.huly.insert(huly_issue("ACME-1", "A", "Backlog", T - 30_000));

        let mut bead = beads_issue("bd-1", "B", BeadsStatus::Open, T - 10_000);
        bead.priority = 2;
        bead.labels = vec!["huly:backlog".to_string()];
        bead.description = mappers::append_footer("", "ACME-1", None);
        h.beads.insert(bead);

        Issue::upsert(
            &h.db.pool,
            &IssuePatch {
                beads_issue_id: Some("bd-1".to_string()),
                title: Some("A".to_string()),
                status: Some("Backlog".to_string()),
                priority: Some("Medium".to_string()),
                huly_modified_at: Some(T - 60_000),
                beads_modified_at: Some(T - 60_000),
                ..stored_patch("ACME-1")
            },
        )
        .await
        .unwrap();

        // Cycle 1: conflict, Beads newer → defer. No writes anywhere.
        h.engine.sync_project(&h.project, None).await.unwrap();
        assert_eq!(h.huly.mutation_count(), 0, "no huly write in conflict cycle");
        assert_eq!(h.beads.mutation_count(), 0, "no beads write in conflict cycle");
        assert_eq!(h.huly.issue("ACME-1").unwrap().title, "A");

        // Cycle 2: only Beads is ahead now → Beads → Huly applies.
        h.engine.sync_project(&h.project, None).await.unwrap();
        assert_eq!(h.huly.issue("ACME-1").unwrap().title, "B");
    }

    // Scenario 4: tombstone on 404, then permanent silence.
    #[tokio::test]
    async fn test_tombstone_delete() {
        let h = harness(false).await;
        // ACME-2 exists only in the store and beads; Huly returns 404.
        h.huly.deleted.lock().unwrap().insert("ACME-2".to_string());

        h.beads.insert(beads_issue("bd-2", "Gone on huly", BeadsStatus::Open, T));
        Issue::upsert(
            &h.db.pool,
            &IssuePatch {
                beads_issue_id: Some("bd-2".to_string()),
                title: Some("Old title".to_string()),
                status: Some("Backlog".to_string()),
                priority: Some("Medium".to_string()),
                huly_modified_at: Some(T - 60_000),
                beads_modified_at: Some(T - 60_000),
                ..stored_patch("ACME-2")
            },
        )
        .await
        .unwrap();

        h.engine.sync_project(&h.project, None).await.unwrap();
        let row = Issue::find_by_identifier(&h.db.pool, "ACME-2")
            .await
            .unwrap()
            .unwrap();
        assert!(row.deleted_from_huly);

        // Beads row untouched, and the next cycle performs no Huly activity.
        assert_eq!(h.beads.mutation_count(), 0);
        let huly_before = h.huly.mutation_count();
        h.engine.sync_project(&h.project, None).await.unwrap();
        assert_eq!(h.huly.mutation_count(), huly_before);
        assert!(h.beads.issue("bd-2").is_some());
    }

    // Scenario 5: the 10-character floor blocks short-title adoption.
    #[tokio::test]
    async fn test_short_title_safety() {
        let h = harness(false).await;
        h.huly
            .insert(huly_issue("ACME-3", "Fix bug in authentication", "Backlog", T));
        h.beads.insert(beads_issue("bd-3", "Fix bug", BeadsStatus::Open, T));

        h.engine.sync_project(&h.project, None).await.unwrap();

        // No link: each side got its own counterpart.
        assert_eq!(h.beads.creates.load(Ordering::SeqCst), 1, "beads create for ACME-3");
        assert_eq!(h.huly.creates.load(Ordering::SeqCst), 1, "huly create for bd-3");

        let rows = Issue::find_by_project(&h.db.pool, "ACME").await.unwrap();
        assert_eq!(rows.len(), 2);
        let acme3 = rows.iter().find(|r| r.identifier == "ACME-3").unwrap();
        assert_ne!(acme3.beads_issue_id.as_deref(), Some("bd-3"));
    }

    // Scenario 6: Huly re-parent propagates to Beads dependencies.
    #[tokio::test]
    async fn test_reparenting() {
        let h = harness(false).await;

        let mut child = huly_issue("ACME-10", "Child work item", "Backlog", T - 60_000);
        child.parent_issue = Some(HulyParentRef {
            id: "huly-ACME-9".to_string(),
            identifier: "ACME-9".to_string(),
        });
        h.huly.insert(child);
        h.huly.insert(huly_issue("ACME-8", "Old parent epic", "Backlog", T - 60_000));
        h.huly.insert(huly_issue("ACME-9", "New parent epic", "Backlog", T - 60_000));

        let mut bead_child = beads_issue("bd-10", "Child work item", BeadsStatus::Open, T - 60_000);
        bead_child.labels = vec!["huly:backlog".to_string()];
        bead_child.dependencies = vec![BeadsDependency {
            issue_id: "bd-8".to_string(),
            dep_type: PARENT_CHILD_DEP.to_string(),
        }];
        h.beads.insert(bead_child);
        for (id, title) in [("bd-8", "Old parent epic"), ("bd-9", "New parent epic")] {
            let mut bead = beads_issue(id, title, BeadsStatus::Open, T - 60_000);
            bead.labels = vec!["huly:backlog".to_string()];
            h.beads.insert(bead);
        }

        for (identifier, beads_id, parent_huly, parent_beads) in [
            ("ACME-10", "bd-10", Some("ACME-8"), Some("bd-8")),
            ("ACME-8", "bd-8", None, None),
            ("ACME-9", "bd-9", None, None),
        ] {
            Issue::upsert(
                &h.db.pool,
                &IssuePatch {
                    beads_issue_id: Some(beads_id.to_string()),
                    title: Some("t".to_string()),
                    status: Some("Backlog".to_string()),
                    priority: Some("Medium".to_string()),
                    huly_modified_at: Some(T - 60_000),
                    beads_modified_at: Some(T - 60_000),
                    ..stored_patch(identifier)
                },
            )
            .await
            .unwrap();
            Issue::update_parent_child(&h.db.pool, identifier, parent_huly, parent_beads)
                .await
                .unwrap();
        }

        // Keep titles in sync so only the parent differs.
        for (identifier, title) in [
            ("ACME-10", "Child work item"),
            ("ACME-8", "Old parent epic"),
            ("ACME-9", "New parent epic"),
        ] {
            Issue::upsert(
                &h.db.pool,
                &IssuePatch {
                    title: Some(title.to_string()),
                    ..stored_patch(identifier)
                },
            )
            .await
            .unwrap();
        }

        h.engine.sync_project(&h.project, None).await.unwrap();

        assert_eq!(
            h.beads.dep_removes.lock().unwrap().clone(),
            vec![("bd-10".to_string(), "bd-8".to_string())]
        );
        assert_eq!(
            h.beads.dep_adds.lock().unwrap().clone(),
            vec![("bd-10".to_string(), "bd-9".to_string())]
        );

        let row = Issue::find_by_identifier(&h.db.pool, "ACME-10")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.parent_huly_id.as_deref(), Some("ACME-9"));
        assert_eq!(row.parent_beads_id.as_deref(), Some("bd-9"));
    }

    // A stored mapping whose Beads id no longer resolves is re-linked by
    // title in the same cycle, after a point read confirms it is gone.
    #[tokio::test]
    async fn test_stale_mapping_relinks_by_title() {
        let h = harness(false).await;
        h.huly.insert(huly_issue(
            "ACME-5",
            "Rework the indexer pipeline",
            "Backlog",
            T - 60_000,
        ));

        let mut bead = beads_issue(
            "bd-5",
            "Rework the indexer pipeline",
            BeadsStatus::Open,
            T - 60_000,
        );
        bead.priority = 2;
        bead.labels = vec!["huly:backlog".to_string()];
        h.beads.insert(bead);

        // The store still points at an id that no longer exists anywhere.
        Issue::upsert(
            &h.db.pool,
            &IssuePatch {
                beads_issue_id: Some("bd-gone".to_string()),
                title: Some("Rework the indexer pipeline".to_string()),
                status: Some("Backlog".to_string()),
                priority: Some("Medium".to_string()),
                huly_modified_at: Some(T - 60_000),
                beads_modified_at: Some(T - 60_000),
                ..stored_patch("ACME-5")
            },
        )
        .await
        .unwrap();

        h.engine.sync_project(&h.project, None).await.unwrap();

        let row = Issue::find_by_identifier(&h.db.pool, "ACME-5")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.beads_issue_id.as_deref(), Some("bd-5"));
        // Re-link is record-only: nothing was created on either side.
        assert_eq!(h.beads.creates.load(Ordering::SeqCst), 0);
        assert_eq!(h.huly.creates.load(Ordering::SeqCst), 0);
    }

    // Phase 1 → Phase 2 no-flap: a task written by Phase 1 is never read
    // back by Phase 2 in the same cycle.
    #[tokio::test]
    async fn test_phase1_touch_shields_phase2() {
        let h = harness(true).await;
        h.huly
            .insert(huly_issue("ACME-20", "Ship the feature", "In Progress", T));

        // Pre-existing vibe task still showing the old status.
        h.vibe.insert_task(VibeTask {
            id: "vt-9".to_string(),
            project_id: "vp-1".to_string(),
            title: "ACME-20: Ship the feature".to_string(),
            description: Some(mappers::append_footer("", "ACME-20", None)),
            status: "todo".to_string(),
            updated_at: None,
        });

        h.engine.sync_project(&h.project, None).await.unwrap();

        // Phase 1 advanced the task; Phase 2 must not have pushed the stale
        // status back to Huly.
        assert_eq!(h.vibe.task("vt-9").unwrap().status, "inprogress");
        assert_eq!(h.huly.issue("ACME-20").unwrap().status, "In Progress");
        assert_eq!(h.huly.updates.load(Ordering::SeqCst), 0);
    }

    // Dry-run: everything is reported, nothing is written.
    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let h = harness(true).await;
        h.huly.insert(huly_issue("ACME-30", "Dry run target", "Backlog", T));

        let config = SyncConfig {
            dry_run: true,
            incremental_sync: false,
            ..SyncConfig::default()
        };
        let engine = SyncEngine::new(
            h.db.clone(),
            h.huly.clone(),
            h.vibe.clone(),
            h.beads.clone(),
            Arc::new(LoggingDocsExporter),
            config,
        );

        let outcome = engine.sync_project(&h.project, None).await.unwrap();
        assert!(outcome.phase1.synced > 0, "dry run still reports intent");
        assert_eq!(h.vibe.mutation_count(), 0);
        assert_eq!(h.beads.mutation_count(), 0);
        assert_eq!(h.huly.mutation_count(), 0);
        assert_eq!(h.beads.commits.load(Ordering::SeqCst), 0);
    }
}
