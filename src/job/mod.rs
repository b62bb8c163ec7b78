//! # Jobs
//!
//! A [`Job`] is an immutable, named, ordered list of steps plus the restart
//! rules that apply to its instances. [`JobRunner`] executes one accepted
//! execution of a job; [`JobOperator`] is the launch, restart, stop and query
//! surface on top of the registry and the repository.

pub mod incrementer;
pub mod operator;
pub mod runner;

pub use incrementer::{JobParametersIncrementer, RunIdIncrementer};
pub use operator::JobOperator;
pub use runner::JobRunner;

use std::sync::Arc;

use crate::config::ConfigurationError;
use crate::error::BatchError;
use crate::repository::RestartPolicy;
use crate::step::Step;

pub struct Job {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    restartable: bool,
    allow_restart_if_complete: bool,
    incrementer: Option<Arc<dyn JobParametersIncrementer>>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .field("restartable", &self.restartable)
            .field("allow_restart_if_complete", &self.allow_restart_if_complete)
            .field("incrementer", &self.incrementer)
            .finish()
    }
}

impl Job {
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    pub fn incrementer(&self) -> Option<&Arc<dyn JobParametersIncrementer>> {
        self.incrementer.as_ref()
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            restartable: self.restartable,
            allow_restart_if_complete: self.allow_restart_if_complete,
        }
    }
}

pub struct JobBuilder {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    restartable: bool,
    allow_restart_if_complete: bool,
    incrementer: Option<Arc<dyn JobParametersIncrementer>>,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            restartable: true,
            allow_restart_if_complete: false,
            incrementer: None,
        }
    }

    /// Append a step; steps run in the order they were added
    pub fn with_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// Reject any second execution of the same instance
    pub fn prevent_restart(mut self) -> Self {
        self.restartable = false;
        self
    }

    pub fn with_allow_restart_if_complete(mut self, allow: bool) -> Self {
        self.allow_restart_if_complete = allow;
        self
    }

    pub fn with_incrementer(mut self, incrementer: Arc<dyn JobParametersIncrementer>) -> Self {
        self.incrementer = Some(incrementer);
        self
    }

    pub fn build(self) -> Result<Job, BatchError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field("name", "job").into());
        }
        if self.steps.is_empty() {
            return Err(ConfigurationError::validation_error(format!(
                "job '{}' has no steps",
                self.name
            ))
            .into());
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = self.steps.iter().find(|s| !seen.insert(s.name())) {
            return Err(ConfigurationError::validation_error(format!(
                "job '{}' declares step '{}' twice",
                self.name,
                duplicate.name()
            ))
            .into());
        }

        Ok(Job {
            name: self.name,
            steps: self.steps,
            restartable: self.restartable,
            allow_restart_if_complete: self.allow_restart_if_complete,
            incrementer: self.incrementer,
        })
    }
}
