use std::fmt::Debug;

use crate::constants::parameters;
use crate::models::{JobParameters, JobParametersBuilder};

/// Derives the parameters of the next job instance from the previous ones
pub trait JobParametersIncrementer: Send + Sync + Debug {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters;
}

/// Bumps an identifying long parameter, `run.id` by default, starting at 1
#[derive(Debug, Clone)]
pub struct RunIdIncrementer {
    key: String,
}

impl Default for RunIdIncrementer {
    fn default() -> Self {
        Self {
            key: parameters::RUN_ID.to_string(),
        }
    }
}

impl RunIdIncrementer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn next(&self, previous: Option<&JobParameters>) -> JobParameters {
        let run_id = previous
            .and_then(|p| p.get_long(&self.key))
            .unwrap_or(0)
            + 1;
        previous
            .map(JobParametersBuilder::from_parameters)
            .unwrap_or_default()
            .add_long(self.key.clone(), run_id)
            .to_job_parameters()
    }
}
