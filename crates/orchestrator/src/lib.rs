//! Cross-project sync orchestration and the durable-workflow layer.

pub mod engine;
pub mod models;
pub mod scheduler;
pub mod workflow;
pub mod workflows;

pub use engine::{OrchestratorError, SyncOrchestrator};
pub use models::{CycleProgress, CycleStats, OrchestratorEvent, ProjectOutcome, SyncOptions};
pub use workflow::{ConflictPolicy, WorkflowHandle, WorkflowRunner, WorkflowState};
