//! The durability layer: replayable, at-least-once workflow execution.
//!
//! Workflows are deterministic drivers; every non-deterministic effect goes
//! through [`WorkflowCtx::activity`], which classifies errors, retries
//! transient failures with exponential backoff, and counts executions.
//! Workflow ids are unique keys: a second submission of a running id either
//! coalesces into the running instance or queues FIFO behind it.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use services::services::beads::BeadsError;
use services::services::http::ApiError;
use services::services::sync::SyncEngineError;

/// Retry profile for activities: 1 s initial, factor 2, 30 s ceiling, three
/// retries. Applied only to errors classified retryable.
fn activity_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_factor(2.0)
        .with_max_delay(Duration::from_secs(30))
        .with_max_times(3)
}

/// Classified activity failure.
#[derive(Debug)]
pub struct ActivityError {
    pub retryable: bool,
    pub message: String,
}

impl ActivityError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::permanent("workflow cancelled")
    }
}

impl fmt::Display for ActivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl From<ApiError> for ActivityError {
    fn from(e: ApiError) -> Self {
        Self {
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

impl From<BeadsError> for ActivityError {
    fn from(e: BeadsError) -> Self {
        Self {
            retryable: e.is_conflict(),
            message: e.to_string(),
        }
    }
}

impl From<SyncEngineError> for ActivityError {
    fn from(e: SyncEngineError) -> Self {
        match e {
            SyncEngineError::Api(api) => api.into(),
            SyncEngineError::Beads(beads) => beads.into(),
            SyncEngineError::Database(db) => Self::permanent(db.to_string()),
        }
    }
}

impl From<sqlx::Error> for ActivityError {
    fn from(e: sqlx::Error) -> Self {
        Self::permanent(e.to_string())
    }
}

/// Per-run execution counts keyed by activity name. The idempotence
/// property is observed here: a cycle with no external changes records zero
/// mutating activities.
#[derive(Debug, Clone, Default)]
pub struct ActivityCounters {
    inner: Arc<DashMap<String, u64>>,
}

impl ActivityCounters {
    pub fn record(&self, name: &str) {
        *self.inner.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, name: &str) -> u64 {
        self.inner.get(name).map(|v| *v).unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.inner
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

/// Execution context handed to a workflow. Time, retries, cancellation, and
/// progress all flow through here; workflows never touch the wall clock.
pub struct WorkflowCtx {
    id: String,
    cancel: CancellationToken,
    counters: ActivityCounters,
    progress: watch::Sender<serde_json::Value>,
}

impl WorkflowCtx {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation check for suspension points.
    pub fn checkpoint(&self) -> Result<(), ActivityError> {
        if self.is_cancelled() {
            Err(ActivityError::cancelled())
        } else {
            Ok(())
        }
    }

    pub fn counters(&self) -> &ActivityCounters {
        &self.counters
    }

    pub fn set_progress(&self, value: serde_json::Value) {
        let _ = self.progress.send(value);
    }

    /// Run one activity: counted, classified, retried on transient failure.
    pub async fn activity<T, E, F, Fut>(&self, name: &str, mut op: F) -> Result<T, ActivityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ActivityError>,
    {
        self.checkpoint()?;
        self.counters.record(name);

        let id = self.id.clone();
        let attempt = move || {
            let fut = op();
            async move { fut.await.map_err(Into::into) }
        };

        attempt
            .retry(activity_backoff())
            .when(|e: &ActivityError| e.retryable)
            .notify(move |e: &ActivityError, delay: Duration| {
                warn!(workflow = id.as_str(), activity = name, ?delay, "retrying activity: {e}");
            })
            .await
    }

    /// Deterministic time: obtained through the activity layer, never read
    /// directly inside workflow logic.
    pub async fn now(&self) -> Result<chrono::DateTime<chrono::Utc>, ActivityError> {
        self.activity("currentTime", || async {
            Ok::<_, ActivityError>(chrono::Utc::now())
        })
        .await
    }

    /// Cancellable sleep; wakes with an error when the cancel signal fires.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ActivityError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(ActivityError::cancelled()),
        }
    }
}

#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, ctx: Arc<WorkflowCtx>) -> anyhow::Result<serde_json::Value>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Pending,
    Running,
    Completed(serde_json::Value),
    Failed(String),
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowState::Pending | WorkflowState::Running)
    }
}

/// Shared view of a submitted workflow: cancel signal, progress query, and
/// terminal state.
#[derive(Clone)]
pub struct WorkflowHandle {
    pub id: String,
    cancel: CancellationToken,
    state: watch::Receiver<WorkflowState>,
    progress: watch::Receiver<serde_json::Value>,
    counters: ActivityCounters,
}

impl WorkflowHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> WorkflowState {
        self.state.borrow().clone()
    }

    pub fn progress(&self) -> serde_json::Value {
        self.progress.borrow().clone()
    }

    pub fn counters(&self) -> &ActivityCounters {
        &self.counters
    }

    /// Wait for a terminal state.
    pub async fn wait(&mut self) -> WorkflowState {
        loop {
            let current = self.state.borrow().clone();
            if current.is_terminal() {
                return current;
            }
            if self.state.changed().await.is_err() {
                return self.state.borrow().clone();
            }
        }
    }
}

/// What happens when a workflow id is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Coalesce: the caller shares the running instance.
    UseExisting,
    /// FIFO: the submission queues behind the running instance.
    Enqueue,
}

struct PreparedRun {
    workflow: Box<dyn Workflow>,
    ctx: Arc<WorkflowCtx>,
    state_tx: watch::Sender<WorkflowState>,
    handle: WorkflowHandle,
}

struct Slot {
    current: WorkflowHandle,
    queue: VecDeque<PreparedRun>,
}

struct RunnerInner {
    slots: DashMap<String, Slot>,
    semaphore: Arc<Semaphore>,
}

/// The workflow task queue. The bounded worker pool is the final
/// back-pressure mechanism: saturated submissions queue rather than fan out.
#[derive(Clone)]
pub struct WorkflowRunner {
    inner: Arc<RunnerInner>,
}

impl WorkflowRunner {
    pub fn new(max_workers: usize) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                slots: DashMap::new(),
                semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            }),
        }
    }

    fn prepare(&self, id: &str, workflow: Box<dyn Workflow>) -> PreparedRun {
        let cancel = CancellationToken::new();
        let counters = ActivityCounters::default();
        let (state_tx, state_rx) = watch::channel(WorkflowState::Pending);
        let (progress_tx, progress_rx) = watch::channel(serde_json::Value::Null);

        let ctx = Arc::new(WorkflowCtx {
            id: id.to_string(),
            cancel: cancel.clone(),
            counters: counters.clone(),
            progress: progress_tx,
        });
        let handle = WorkflowHandle {
            id: id.to_string(),
            cancel,
            state: state_rx,
            progress: progress_rx,
            counters,
        };
        PreparedRun {
            workflow,
            ctx,
            state_tx,
            handle,
        }
    }

    /// Submit a workflow under `id`. Returns the handle that will serve the
    /// request: the shared instance when coalesced, a queued one otherwise.
    pub fn submit(
        &self,
        id: &str,
        policy: ConflictPolicy,
        workflow: Box<dyn Workflow>,
    ) -> WorkflowHandle {
        let prepared = self.prepare(id, workflow);
        let handle = prepared.handle.clone();

        match self.inner.slots.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => match policy {
                ConflictPolicy::UseExisting => {
                    debug!(workflow = id, "coalesced into running instance");
                    occupied.get().current.clone()
                }
                ConflictPolicy::Enqueue => {
                    occupied.get_mut().queue.push_back(prepared);
                    debug!(workflow = id, "queued behind running instance");
                    handle
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    current: handle.clone(),
                    queue: VecDeque::new(),
                });
                self.spawn_driver(id.to_string(), prepared);
                handle
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<WorkflowHandle> {
        self.inner.slots.get(id).map(|slot| slot.current.clone())
    }

    /// Deliver a cancel signal to the running instance, if any.
    pub fn cancel(&self, id: &str) -> bool {
        match self.get(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.slots.len()
    }

    /// Drive one slot: run the current workflow, then FIFO-drain its queue.
    fn spawn_driver(&self, id: String, first: PreparedRun) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut next = Some(first);
            while let Some(run) = next.take() {
                let _permit = inner
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("runner semaphore closed");

                let PreparedRun {
                    workflow,
                    ctx,
                    state_tx,
                    handle: _,
                } = run;
                let name = workflow.name();
                let _ = state_tx.send(WorkflowState::Running);
                info!(workflow = id.as_str(), name, "workflow started");

                let cancel = ctx.cancel_token();
                let outcome = tokio::select! {
                    result = workflow.run(Arc::clone(&ctx)) => match result {
                        Ok(value) => WorkflowState::Completed(value),
                        Err(e) if ctx.is_cancelled() => {
                            debug!(workflow = id.as_str(), "cancelled: {e}");
                            WorkflowState::Cancelled
                        }
                        Err(e) => WorkflowState::Failed(e.to_string()),
                    },
                    _ = cancel.cancelled() => WorkflowState::Cancelled,
                };
                match &outcome {
                    WorkflowState::Completed(_) => info!(workflow = id.as_str(), "workflow completed"),
                    WorkflowState::Cancelled => info!(workflow = id.as_str(), "workflow cancelled"),
                    WorkflowState::Failed(e) => warn!(workflow = id.as_str(), "workflow failed: {e}"),
                    _ => {}
                }
                let _ = state_tx.send(outcome);

                // Pop the next queued run under the slot lock; drop the slot
                // when the queue is dry.
                next = match inner.slots.entry(id.clone()) {
                    Entry::Occupied(mut occupied) => {
                        match occupied.get_mut().queue.pop_front() {
                            Some(queued) => {
                                occupied.get_mut().current = queued.handle.clone();
                                Some(queued)
                            }
                            None => {
                                occupied.remove();
                                None
                            }
                        }
                    }
                    Entry::Vacant(_) => None,
                };
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingWorkflow {
        executions: Arc<AtomicU32>,
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl Workflow for CountingWorkflow {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(self: Box<Self>, _ctx: Arc<WorkflowCtx>) -> anyhow::Result<serde_json::Value> {
            self.gate.notified().await;
            let n = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(serde_json::json!(n))
        }
    }

    #[tokio::test]
    async fn test_use_existing_coalesces() {
        let runner = WorkflowRunner::new(4);
        let executions = Arc::new(AtomicU32::new(0));
        let gate = Arc::new(tokio::sync::Notify::new());

        let mut first = runner.submit(
            "job",
            ConflictPolicy::UseExisting,
            Box::new(CountingWorkflow {
                executions: executions.clone(),
                gate: gate.clone(),
            }),
        );
        let second = runner.submit(
            "job",
            ConflictPolicy::UseExisting,
            Box::new(CountingWorkflow {
                executions: executions.clone(),
                gate: gate.clone(),
            }),
        );
        assert_eq!(first.id, second.id);

        gate.notify_waiters();
        // Give the driver a beat in case the first notify landed before the
        // workflow awaited.
        gate.notify_one();
        let state = first.wait().await;
        assert_eq!(state, WorkflowState::Completed(serde_json::json!(1)));
        assert_eq!(executions.load(Ordering::SeqCst), 1, "one execution only");
    }

    struct OrderedWorkflow {
        index: u32,
        order: Arc<std::sync::Mutex<Vec<u32>>>,
    }

    #[async_trait]
    impl Workflow for OrderedWorkflow {
        fn name(&self) -> &'static str {
            "ordered"
        }

        async fn run(self: Box<Self>, _ctx: Arc<WorkflowCtx>) -> anyhow::Result<serde_json::Value> {
            self.order.lock().unwrap().push(self.index);
            Ok(serde_json::Value::Null)
        }
    }

    #[tokio::test]
    async fn test_enqueue_is_fifo_per_id() {
        let runner = WorkflowRunner::new(4);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles: Vec<WorkflowHandle> = (1..=3)
            .map(|index| {
                runner.submit(
                    "events",
                    ConflictPolicy::Enqueue,
                    Box::new(OrderedWorkflow {
                        index,
                        order: order.clone(),
                    }),
                )
            })
            .collect();

        for handle in &mut handles {
            let state = handle.wait().await;
            assert!(matches!(state, WorkflowState::Completed(_)));
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    struct SleepyWorkflow;

    #[async_trait]
    impl Workflow for SleepyWorkflow {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        async fn run(self: Box<Self>, ctx: Arc<WorkflowCtx>) -> anyhow::Result<serde_json::Value> {
            loop {
                ctx.sleep(Duration::from_secs(60)).await?;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_signal() {
        let runner = WorkflowRunner::new(1);
        let mut handle = runner.submit("long", ConflictPolicy::UseExisting, Box::new(SleepyWorkflow));

        // Let the workflow reach its suspension point, then cancel.
        tokio::task::yield_now().await;
        assert!(runner.cancel("long"));
        assert_eq!(handle.wait().await, WorkflowState::Cancelled);
    }

    struct FlakyWorkflow {
        attempts: Arc<AtomicU32>,
        fail_times: u32,
        retryable: bool,
    }

    #[async_trait]
    impl Workflow for FlakyWorkflow {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn run(self: Box<Self>, ctx: Arc<WorkflowCtx>) -> anyhow::Result<serde_json::Value> {
            let attempts = self.attempts.clone();
            let fail_times = self.fail_times;
            let retryable = self.retryable;
            let value = ctx
                .activity("flakyCall", move || {
                    let attempts = attempts.clone();
                    async move {
                        let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                        if n <= fail_times {
                            Err(if retryable {
                                ActivityError::transient("transient failure")
                            } else {
                                ActivityError::permanent("hard failure")
                            })
                        } else {
                            Ok(n)
                        }
                    }
                })
                .await?;
            Ok(serde_json::json!(value))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_activity_recovers() {
        let runner = WorkflowRunner::new(1);
        let attempts = Arc::new(AtomicU32::new(0));
        let mut handle = runner.submit(
            "flaky-ok",
            ConflictPolicy::UseExisting,
            Box::new(FlakyWorkflow {
                attempts: attempts.clone(),
                fail_times: 2,
                retryable: true,
            }),
        );

        let state = handle.wait().await;
        assert_eq!(state, WorkflowState::Completed(serde_json::json!(3)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Counted once per logical activity, not per attempt.
        assert_eq!(handle.counters().get("flakyCall"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let runner = WorkflowRunner::new(1);
        let attempts = Arc::new(AtomicU32::new(0));
        let mut handle = runner.submit(
            "flaky-hard",
            ConflictPolicy::UseExisting,
            Box::new(FlakyWorkflow {
                attempts: attempts.clone(),
                fail_times: 5,
                retryable: false,
            }),
        );

        let state = handle.wait().await;
        assert!(matches!(state, WorkflowState::Failed(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1, "no retry on permanent error");
    }

    #[tokio::test]
    async fn test_slot_is_released_after_completion() {
        let runner = WorkflowRunner::new(1);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handle = runner.submit(
            "oneshot",
            ConflictPolicy::UseExisting,
            Box::new(OrderedWorkflow {
                index: 1,
                order: order.clone(),
            }),
        );
        handle.wait().await;

        // The id is reusable once the run is terminal.
        let mut again = runner.submit(
            "oneshot",
            ConflictPolicy::UseExisting,
            Box::new(OrderedWorkflow {
                index: 2,
                order: order.clone(),
            }),
        );
        again.wait().await;
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }
}
