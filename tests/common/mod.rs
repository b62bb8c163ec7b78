//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tasker_batch::item::{
    CollectingItemWriter, ItemError, ItemProcessor, ItemReader, ItemResult, ListItemReader,
};
use tasker_batch::job::{Job, JobOperator, RunIdIncrementer};
use tasker_batch::models::{
    JobExecution, JobInstance, JobParameters, JobParametersBuilder, StepExecution,
};
use tasker_batch::registry::JobRegistry;
use tasker_batch::repository::{
    InMemoryJobRepository, JobRepository, LaunchDecision, RepositoryError, RepositoryResult,
    RestartPolicy,
};
use tasker_batch::step::ChunkOrientedStep;

pub const JOB_NAME: &str = "numbersJob";
pub const STEP_NAME: &str = "copy";

/// Fails record `bad` with an invalid-record error while armed
#[derive(Debug, Clone)]
pub struct BrokenRecord {
    pub bad: u32,
    pub armed: Arc<AtomicBool>,
    pub delay: Duration,
}

impl BrokenRecord {
    pub fn new(bad: u32) -> Self {
        Self {
            bad,
            armed: Arc::new(AtomicBool::new(true)),
            delay: Duration::ZERO,
        }
    }

    /// A processor that never fails, only slows every record down
    pub fn slow(delay: Duration) -> Self {
        Self {
            bad: 0,
            armed: Arc::new(AtomicBool::new(false)),
            delay,
        }
    }

    pub fn repair(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ItemProcessor<u32, u32> for BrokenRecord {
    async fn process(&self, item: &u32) -> ItemResult<Option<u32>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if *item == self.bad && self.armed.load(Ordering::SeqCst) {
            return Err(ItemError::invalid(format!("record {item} is malformed")));
        }
        Ok(Some(*item))
    }
}

/// One chunk step copying `1..=count` through `processor` into `writer`
pub fn numbers_job(
    count: u32,
    processor: BrokenRecord,
    writer: CollectingItemWriter<u32>,
    skip_limit: u64,
) -> Job {
    let reader_factory = move |_: &JobParameters| -> ItemResult<Box<dyn ItemReader<u32>>> {
        Ok(Box::new(ListItemReader::named("numbersReader", (1..=count).collect())))
    };
    let step = ChunkOrientedStep::<u32, u32>::builder(
        STEP_NAME,
        Arc::new(reader_factory),
        Arc::new(processor),
        Arc::new(writer),
    )
    .with_chunk_size(5)
    .with_skip_limit(skip_limit)
    .build();

    Job::builder(JOB_NAME)
        .with_step(Arc::new(step))
        .with_incrementer(Arc::new(RunIdIncrementer::new()))
        .build()
        .expect("valid job")
}

pub fn operator_for(job: Job, repository: Arc<dyn JobRepository>) -> JobOperator {
    let registry = Arc::new(JobRegistry::new());
    registry.register(job).expect("job registers");
    JobOperator::new(repository, registry)
}

pub fn file_parameters(path: &str) -> JobParameters {
    JobParametersBuilder::new()
        .add_string("file", path)
        .add_string_with("name", "Enterprise Integration fans", false)
        .to_job_parameters()
}

pub async fn wait_for_status(
    operator: &JobOperator,
    execution_id: i64,
    accept: impl Fn(&JobExecution) -> bool,
) -> JobExecution {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(execution) = operator.get_execution(execution_id).await.unwrap() {
                if accept(&execution) {
                    return execution;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("execution reached the expected state")
}

/// In-memory repository whose step updates start failing after `healthy_updates`
pub struct FailingRepository {
    inner: InMemoryJobRepository,
    healthy_updates: AtomicUsize,
    step_updates: AtomicUsize,
}

impl FailingRepository {
    pub fn new(healthy_updates: usize) -> Self {
        Self {
            inner: InMemoryJobRepository::new(),
            healthy_updates: AtomicUsize::new(healthy_updates),
            step_updates: AtomicUsize::new(0),
        }
    }

    /// Let every later step update through
    pub fn heal(&self) {
        self.healthy_updates.store(usize::MAX, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobRepository for FailingRepository {
    async fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        policy: RestartPolicy,
    ) -> RepositoryResult<LaunchDecision> {
        self.inner
            .create_job_execution(job_name, parameters, policy)
            .await
    }

    async fn update_job_execution(&self, execution: &mut JobExecution) -> RepositoryResult<()> {
        self.inner.update_job_execution(execution).await
    }

    async fn get_job_execution(&self, id: i64) -> RepositoryResult<Option<JobExecution>> {
        self.inner.get_job_execution(id).await
    }

    async fn get_job_instance(&self, id: i64) -> RepositoryResult<Option<JobInstance>> {
        self.inner.get_job_instance(id).await
    }

    async fn find_job_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> RepositoryResult<Option<JobInstance>> {
        self.inner.find_job_instance(job_name, job_key).await
    }

    async fn find_job_executions(
        &self,
        job_instance_id: i64,
    ) -> RepositoryResult<Vec<JobExecution>> {
        self.inner.find_job_executions(job_instance_id).await
    }

    async fn find_last_job_execution(
        &self,
        job_name: &str,
    ) -> RepositoryResult<Option<JobExecution>> {
        self.inner.find_last_job_execution(job_name).await
    }

    async fn find_running_job_executions(
        &self,
        job_name: &str,
    ) -> RepositoryResult<Vec<JobExecution>> {
        self.inner.find_running_job_executions(job_name).await
    }

    async fn add_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()> {
        self.inner.add_step_execution(step).await
    }

    async fn update_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()> {
        let seen = self.step_updates.fetch_add(1, Ordering::SeqCst);
        if seen >= self.healthy_updates.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "connection refused".to_string(),
            ));
        }
        self.inner.update_step_execution(step).await
    }

    async fn get_step_execution(&self, id: i64) -> RepositoryResult<Option<StepExecution>> {
        self.inner.get_step_execution(id).await
    }

    async fn find_step_executions(
        &self,
        job_execution_id: i64,
    ) -> RepositoryResult<Vec<StepExecution>> {
        self.inner.find_step_executions(job_execution_id).await
    }

    async fn find_last_step_execution(
        &self,
        job_instance_id: i64,
        step_name: &str,
    ) -> RepositoryResult<Option<StepExecution>> {
        self.inner
            .find_last_step_execution(job_instance_id, step_name)
            .await
    }

    async fn count_step_executions(
        &self,
        job_instance_id: i64,
        step_name: &str,
    ) -> RepositoryResult<u32> {
        self.inner
            .count_step_executions(job_instance_id, step_name)
            .await
    }
}

/// Wait until the first step of `execution_id` has committed `commits` chunks
pub async fn wait_for_commits(operator: &JobOperator, execution_id: i64, commits: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let steps = operator.step_executions(execution_id).await.unwrap();
            if steps.first().is_some_and(|s| s.commit_count >= commits) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("step committed in time")
}
