//! In-process repository backed by a single mutex-guarded state table.
//!
//! Every operation takes the lock once and never awaits while holding it, so
//! launch acceptance and optimistic-version checks are serialized exactly like
//! the row locks of the PostgreSQL implementation.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::{
    evaluate_launch, JobRepository, LaunchDecision, RepositoryError, RepositoryResult,
    RestartPolicy,
};
use crate::models::{JobExecution, JobInstance, JobParameters, StepExecution};

#[derive(Debug, Default)]
struct RepositoryState {
    instances: BTreeMap<i64, JobInstance>,
    instance_index: HashMap<(String, String), i64>,
    job_executions: BTreeMap<i64, JobExecution>,
    step_executions: BTreeMap<i64, StepExecution>,
    next_instance_id: i64,
    next_job_execution_id: i64,
    next_step_execution_id: i64,
}

impl RepositoryState {
    fn executions_of(&self, job_instance_id: i64) -> Vec<JobExecution> {
        // BTreeMap iterates ascending by id; newest first means reversed
        self.job_executions
            .values()
            .rev()
            .filter(|e| e.job_instance_id == job_instance_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    state: Mutex<RepositoryState>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        policy: RestartPolicy,
    ) -> RepositoryResult<LaunchDecision> {
        let job_key = parameters.job_key();
        let mut state = self.state.lock();

        let existing = state
            .instance_index
            .get(&(job_name.to_string(), job_key.clone()))
            .copied();

        let (instance, restart) = match existing {
            Some(instance_id) => {
                let last = state.executions_of(instance_id).into_iter().next();
                if let Some(rejection) = evaluate_launch(last.as_ref(), &job_key, policy) {
                    return Ok(LaunchDecision::Rejected(rejection));
                }
                let instance = state
                    .instances
                    .get(&instance_id)
                    .cloned()
                    .ok_or(RepositoryError::NotFound {
                        entity: "job instance",
                        id: instance_id,
                    })?;
                (instance, last.is_some())
            }
            None => {
                state.next_instance_id += 1;
                let instance = JobInstance::new(state.next_instance_id, job_name, job_key.clone());
                state
                    .instance_index
                    .insert((job_name.to_string(), job_key.clone()), instance.id);
                state.instances.insert(instance.id, instance.clone());
                (instance, false)
            }
        };

        state.next_job_execution_id += 1;
        let mut execution = JobExecution::new(&instance, parameters.clone());
        execution.id = state.next_job_execution_id;
        state.job_executions.insert(execution.id, execution.clone());

        debug!(
            job_name = %job_name,
            job_instance_id = instance.id,
            job_execution_id = execution.id,
            restart = restart,
            "Recorded job execution"
        );

        Ok(LaunchDecision::Accepted { execution, restart })
    }

    async fn update_job_execution(&self, execution: &mut JobExecution) -> RepositoryResult<()> {
        let mut state = self.state.lock();
        let stored = state
            .job_executions
            .get_mut(&execution.id)
            .ok_or(RepositoryError::NotFound {
                entity: "job execution",
                id: execution.id,
            })?;

        if stored.version != execution.version {
            return Err(RepositoryError::OptimisticLock {
                entity: "job execution",
                id: execution.id,
                expected: execution.version,
                actual: stored.version,
            });
        }

        execution.version += 1;
        execution.last_updated = Utc::now();
        *stored = execution.clone();
        Ok(())
    }

    async fn get_job_execution(&self, id: i64) -> RepositoryResult<Option<JobExecution>> {
        Ok(self.state.lock().job_executions.get(&id).cloned())
    }

    async fn get_job_instance(&self, id: i64) -> RepositoryResult<Option<JobInstance>> {
        Ok(self.state.lock().instances.get(&id).cloned())
    }

    async fn find_job_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> RepositoryResult<Option<JobInstance>> {
        let state = self.state.lock();
        Ok(state
            .instance_index
            .get(&(job_name.to_string(), job_key.to_string()))
            .and_then(|id| state.instances.get(id))
            .cloned())
    }

    async fn find_job_executions(
        &self,
        job_instance_id: i64,
    ) -> RepositoryResult<Vec<JobExecution>> {
        Ok(self.state.lock().executions_of(job_instance_id))
    }

    async fn find_last_job_execution(
        &self,
        job_name: &str,
    ) -> RepositoryResult<Option<JobExecution>> {
        Ok(self
            .state
            .lock()
            .job_executions
            .values()
            .rev()
            .find(|e| e.job_name == job_name)
            .cloned())
    }

    async fn find_running_job_executions(
        &self,
        job_name: &str,
    ) -> RepositoryResult<Vec<JobExecution>> {
        Ok(self
            .state
            .lock()
            .job_executions
            .values()
            .filter(|e| e.job_name == job_name && e.status.is_running())
            .cloned()
            .collect())
    }

    async fn add_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()> {
        let mut state = self.state.lock();
        if !state.job_executions.contains_key(&step.job_execution_id) {
            return Err(RepositoryError::NotFound {
                entity: "job execution",
                id: step.job_execution_id,
            });
        }
        state.next_step_execution_id += 1;
        step.id = state.next_step_execution_id;
        step.version = 0;
        step.last_updated = Utc::now();
        state.step_executions.insert(step.id, step.clone());
        Ok(())
    }

    async fn update_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()> {
        let mut state = self.state.lock();
        let stored = state
            .step_executions
            .get_mut(&step.id)
            .ok_or(RepositoryError::NotFound {
                entity: "step execution",
                id: step.id,
            })?;

        if stored.version != step.version {
            return Err(RepositoryError::OptimisticLock {
                entity: "step execution",
                id: step.id,
                expected: step.version,
                actual: stored.version,
            });
        }

        step.version += 1;
        step.last_updated = Utc::now();
        *stored = step.clone();
        Ok(())
    }

    async fn get_step_execution(&self, id: i64) -> RepositoryResult<Option<StepExecution>> {
        Ok(self.state.lock().step_executions.get(&id).cloned())
    }

    async fn find_step_executions(
        &self,
        job_execution_id: i64,
    ) -> RepositoryResult<Vec<StepExecution>> {
        Ok(self
            .state
            .lock()
            .step_executions
            .values()
            .filter(|s| s.job_execution_id == job_execution_id)
            .cloned()
            .collect())
    }

    async fn find_last_step_execution(
        &self,
        job_instance_id: i64,
        step_name: &str,
    ) -> RepositoryResult<Option<StepExecution>> {
        let state = self.state.lock();
        Ok(state
            .step_executions
            .values()
            .rev()
            .find(|s| {
                s.step_name == step_name
                    && state
                        .job_executions
                        .get(&s.job_execution_id)
                        .is_some_and(|e| e.job_instance_id == job_instance_id)
            })
            .cloned())
    }

    async fn count_step_executions(
        &self,
        job_instance_id: i64,
        step_name: &str,
    ) -> RepositoryResult<u32> {
        let state = self.state.lock();
        let count = state
            .step_executions
            .values()
            .filter(|s| {
                s.step_name == step_name
                    && state
                        .job_executions
                        .get(&s.job_execution_id)
                        .is_some_and(|e| e.job_instance_id == job_instance_id)
            })
            .count();
        Ok(count as u32)
    }
}
