//! # Execution State Machine
//!
//! Lifecycle of job and step executions:
//!
//! ```text
//! STARTING -> STARTED -> COMPLETED | FAILED | STOPPED
//!                  \-> STOPPING -> STOPPED
//! ```
//!
//! Statuses only move forward. Every transition is persisted through the
//! [`JobRepository`](crate::repository::JobRepository) before the new status is
//! observable, and job transitions survive a concurrent stop request by
//! re-evaluating against the reloaded record.

pub mod errors;
pub mod events;
pub mod execution_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::ExecutionEvent;
pub use execution_state_machine::{determine_target_state, ExecutionRecord, ExecutionStateMachine};
pub use states::BatchStatus;
