//! Process-level scheduling: the periodic sync and the watcher event pump.
//!
//! With the durable path enabled, the period lives inside
//! `ScheduledSyncWorkflow` and this module only submits it. The legacy path
//! is a plain interval loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use services::services::watchers::WatchEvent;

use crate::engine::SyncOrchestrator;
use crate::models::SyncOptions;
use crate::workflow::{ConflictPolicy, Workflow, WorkflowRunner};
use crate::workflows::{
    BeadsFileChangeWorkflow, DataReconciliationWorkflow, RECONCILIATION_WORKFLOW_ID,
    ReconciliationAction, SCHEDULED_SYNC_WORKFLOW_ID, ScheduledSyncWorkflow,
    beads_change_workflow_id,
};

/// Cadence of the stale-mapping sweep.
const RECONCILIATION_PERIOD: std::time::Duration = std::time::Duration::from_secs(6 * 60 * 60);

pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    runner: WorkflowRunner,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, runner: WorkflowRunner) -> Self {
        Self {
            orchestrator,
            runner,
        }
    }

    /// Start the periodic full sync. Returns a JoinHandle for the legacy
    /// loop; the durable path returns a handle that exits after submission.
    pub fn spawn_periodic(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let config = self.orchestrator.engine().config().clone();
        let options = SyncOptions::from_config(&config);

        if config.use_temporal_sync {
            let workflow = ScheduledSyncWorkflow {
                orchestrator: Arc::clone(&self.orchestrator),
                options,
                interval: config.sync_interval,
                max_iterations: None,
            };
            let handle = self.runner.submit(
                SCHEDULED_SYNC_WORKFLOW_ID,
                ConflictPolicy::UseExisting,
                Box::new(workflow),
            );
            info!(workflow = handle.id.as_str(), "scheduled sync submitted");
            let token = cancel;
            let cancel_handle = handle;
            return tokio::spawn(async move {
                token.cancelled().await;
                cancel_handle.cancel();
            });
        }

        // Legacy in-process loop, no durability.
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            info!(period = ?config.sync_interval, "starting periodic sync loop");
            let mut ticker = interval(config.sync_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => return,
                }
                if let Err(e) = orchestrator.run_cycle(&options, None, &cancel).await {
                    error!("periodic sync cycle failed: {e}");
                }
            }
        })
    }

    /// Periodic stale-mapping sweep. Dry-run when the engine is; sweeps
    /// coalesce if one is still running.
    pub fn spawn_reconciliation(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let runner = self.runner.clone();
        let dry_run = self.orchestrator.engine().config().dry_run;
        tokio::spawn(async move {
            let mut ticker = interval(RECONCILIATION_PERIOD);
            ticker.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => return,
                }
                let workflow = DataReconciliationWorkflow {
                    orchestrator: Arc::clone(&orchestrator),
                    dry_run,
                    action: ReconciliationAction::Clear,
                };
                runner.submit(
                    RECONCILIATION_WORKFLOW_ID,
                    ConflictPolicy::UseExisting,
                    Box::new(workflow),
                );
            }
        })
    }

    /// Drain watcher events into per-project workflows. FIFO per workflow
    /// id: a second change to the same project queues behind the running
    /// sync instead of overlapping it.
    pub fn spawn_watch_pump(
        &self,
        mut events: mpsc::Receiver<WatchEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let runner = self.runner.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let workflow = BeadsFileChangeWorkflow {
                    orchestrator: Arc::clone(&orchestrator),
                    project_identifier: event.project_identifier.clone(),
                    files: event
                        .changed_paths
                        .iter()
                        .map(|p| p.to_string_lossy().to_string())
                        .collect(),
                };
                let id = beads_change_workflow_id(&event.project_identifier);
                runner.submit(&id, ConflictPolicy::Enqueue, Box::new(workflow));
            }
        })
    }
}

/// Submit an ad-hoc workflow (used by the HTTP surface).
pub fn submit_workflow(
    runner: &WorkflowRunner,
    id: &str,
    policy: ConflictPolicy,
    workflow: Box<dyn Workflow>,
) -> crate::workflow::WorkflowHandle {
    runner.submit(id, policy, workflow)
}
