//! # Batch Metadata Models
//!
//! Value objects persisted by the [`JobRepository`](crate::repository::JobRepository):
//! job instances, job and step executions, their execution contexts, and the
//! parameters that identify a run.

pub mod execution_context;
pub mod job_execution;
pub mod job_instance;
pub mod job_parameters;
pub mod step_execution;
pub mod summary;

pub use execution_context::ExecutionContext;
pub use job_execution::JobExecution;
pub use job_instance::JobInstance;
pub use job_parameters::{JobParameter, JobParameterValue, JobParameters, JobParametersBuilder};
pub use step_execution::{StepContribution, StepExecution};
pub use summary::{ExecutionSummary, StepSummary};
