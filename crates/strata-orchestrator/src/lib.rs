//! # strata-orchestrator
//!
//! Orchestration of work-item hierarchies on a remote tracker.
//!
//! This crate provides:
//! - Timeout-protected execution of remote calls ([`Executor`])
//! - An injected publish/subscribe hub for execution events ([`EventHub`])
//! - Idempotent create-or-update of repository files ([`RemoteFileSync`])
//! - Epic → Feature → Task creation with partial-failure reporting
//!   ([`HierarchyOrchestrator`])
//! - Board status lookup and the review workflow ([`BoardStatusSync`])

mod board_status;
mod events;
mod execution;
mod file_sync;
mod hierarchy;

pub use board_status::{BoardSchema, BoardStatusSync, ReviewOutcome, StatusOption, StatusUpdate};
pub use events::{EventHub, Subscription};
pub use execution::Executor;
pub use file_sync::{ReadOutcome, RemoteFileSync, SaveOutcome};
pub use hierarchy::{
    branch_name, CreatedItem, FeaturePlan, HierarchyOptions, HierarchyOrchestrator,
    HierarchyOutcome, HierarchyPlan, HierarchyReport, ItemFailure, ItemOutcome, ItemPlan,
    ItemWarning, SkippedItem, WarningStep, SKIPPED_PARENT_FAILED,
};
