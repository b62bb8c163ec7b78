//! Named job definitions available for launch.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::ConfigurationError;
use crate::error::{BatchError, Result};
use crate::job::Job;

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Arc<Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job; names are unique
    pub fn register(&self, job: Job) -> Result<Arc<Job>> {
        let job = Arc::new(job);
        match self.jobs.entry(job.name().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ConfigurationError::validation_error(
                format!("job '{}' is already registered", job.name()),
            )
            .into()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&job));
                info!(job_name = %job.name(), steps = ?job.step_names(), "Registered job");
                Ok(job)
            }
        }
    }

    pub fn get(&self, job_name: &str) -> Result<Arc<Job>> {
        self.jobs
            .get(job_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BatchError::NoSuchJob(job_name.to_string()))
    }

    /// Registered job names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{SetupTasklet, TaskletStep};

    fn job(name: &str) -> Job {
        Job::builder(name)
            .with_step(Arc::new(TaskletStep::new(
                "setup",
                Arc::new(SetupTasklet::new("name")),
            )))
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = JobRegistry::new();
        registry.register(job("b")).unwrap();
        registry.register(job("a")).unwrap();

        assert_eq!(registry.get("a").unwrap().name(), "a");
        assert!(matches!(registry.get("missing"), Err(BatchError::NoSuchJob(_))));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.register(job("a")).is_err());
    }
}
