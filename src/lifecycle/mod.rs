//! Resource lifecycle orchestration
//!
//! # Module Structure
//!
//! - [`executor`] - Bounded parallel execution with per-item outcomes
//! - [`waiter`] - Polls a remote status until a target condition or timeout
//! - [`orchestrator`] - Ordered start/stop across resource kinds
//! - [`bulk`] - One action over a filtered candidate set

pub mod bulk;
pub mod executor;
pub mod orchestrator;
pub mod waiter;

pub use bulk::{
    filter_candidates, BulkAction, BulkOptions, BulkRunner, CandidateState, CleanupCandidate,
    Confirmer, NameFilter, StdinConfirmer, Summary,
};
pub use executor::{run_all, Executor, ProcessResult, DEFAULT_MAX_CONCURRENCY};
pub use orchestrator::{
    AggregateResult, EcsCapacity, EcsServiceStatus, EcsTarget, LifecycleOps, Orchestrator,
    OrchestratorSettings,
};
pub use waiter::{WaitError, WaitSpec};
