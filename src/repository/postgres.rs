//! # PostgreSQL Job Repository
//!
//! SQLx-backed [`JobRepository`] storing metadata in the `batch_job_instances`,
//! `batch_job_executions` and `batch_step_executions` tables created by the
//! migrations in `./migrations`.
//!
//! ## Key Features
//!
//! - **Row-locked launch acceptance**: the instance row is locked with
//!   `SELECT ... FOR UPDATE` while the restart rules are evaluated, so two
//!   concurrent launches of the same parameters cannot both be accepted
//! - **Versioned updates**: every `UPDATE` is guarded by `version = $n` and a
//!   zero row count is reported as [`RepositoryError::OptimisticLock`]
//! - **Chunk transactions**: [`JobRepository::begin_chunk`] hands out an open
//!   transaction; the chunk's writes and the step checkpoint share it
//! - **JSONB payloads**: job parameters and execution contexts are stored as
//!   JSONB through `sqlx::types::Json`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::{debug, info, instrument, warn};

use super::{
    evaluate_launch, ChunkTransaction, JobRepository, LaunchDecision, RepositoryError, RepositoryResult,
    RestartPolicy,
};
use crate::models::{ExecutionContext, JobExecution, JobInstance, JobParameters, StepExecution};
use crate::state_machine::BatchStatus;

const JOB_EXECUTION_COLUMNS: &str = "job_execution_id, job_instance_id, job_name, parameters, \
     status, exit_description, created_at, start_time, end_time, last_updated, version";

const STEP_EXECUTION_COLUMNS: &str = "step_execution_id, job_execution_id, step_name, status, \
     read_count, write_count, filter_count, read_skip_count, process_skip_count, \
     write_skip_count, commit_count, rollback_count, retry_count, execution_context, \
     exit_description, start_time, end_time, last_updated, version";

#[derive(Debug, FromRow)]
struct JobInstanceRow {
    job_instance_id: i64,
    job_name: String,
    job_key: String,
    created_at: DateTime<Utc>,
}

impl From<JobInstanceRow> for JobInstance {
    fn from(row: JobInstanceRow) -> Self {
        Self {
            id: row.job_instance_id,
            job_name: row.job_name,
            job_key: row.job_key,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct JobExecutionRow {
    job_execution_id: i64,
    job_instance_id: i64,
    job_name: String,
    parameters: Json<JobParameters>,
    status: String,
    exit_description: Option<String>,
    created_at: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    version: i32,
}

impl TryFrom<JobExecutionRow> for JobExecution {
    type Error = RepositoryError;

    fn try_from(row: JobExecutionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.job_execution_id,
            job_instance_id: row.job_instance_id,
            job_name: row.job_name,
            parameters: row.parameters.0,
            status: parse_status(&row.status)?,
            exit_description: row.exit_description,
            created_at: row.created_at,
            start_time: row.start_time,
            end_time: row.end_time,
            last_updated: row.last_updated,
            version: row.version,
        })
    }
}

#[derive(Debug, FromRow)]
struct StepExecutionRow {
    step_execution_id: i64,
    job_execution_id: i64,
    step_name: String,
    status: String,
    read_count: i64,
    write_count: i64,
    filter_count: i64,
    read_skip_count: i64,
    process_skip_count: i64,
    write_skip_count: i64,
    commit_count: i64,
    rollback_count: i64,
    retry_count: i64,
    execution_context: Json<ExecutionContext>,
    exit_description: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    version: i32,
}

impl TryFrom<StepExecutionRow> for StepExecution {
    type Error = RepositoryError;

    fn try_from(row: StepExecutionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.step_execution_id,
            job_execution_id: row.job_execution_id,
            step_name: row.step_name,
            status: parse_status(&row.status)?,
            read_count: from_db_count(row.read_count)?,
            write_count: from_db_count(row.write_count)?,
            filter_count: from_db_count(row.filter_count)?,
            read_skip_count: from_db_count(row.read_skip_count)?,
            process_skip_count: from_db_count(row.process_skip_count)?,
            write_skip_count: from_db_count(row.write_skip_count)?,
            commit_count: from_db_count(row.commit_count)?,
            rollback_count: from_db_count(row.rollback_count)?,
            retry_count: from_db_count(row.retry_count)?,
            execution_context: row.execution_context.0,
            exit_description: row.exit_description,
            start_time: row.start_time,
            end_time: row.end_time,
            last_updated: row.last_updated,
            version: row.version,
        })
    }
}

fn parse_status(value: &str) -> RepositoryResult<BatchStatus> {
    value.parse().map_err(RepositoryError::InvalidData)
}

fn from_db_count(value: i64) -> RepositoryResult<u64> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::InvalidData(format!("negative count {value}")))
}

fn to_db_count(value: u64) -> RepositoryResult<i64> {
    i64::try_from(value)
        .map_err(|_| RepositoryError::InvalidData(format!("count {value} exceeds BIGINT")))
}

/// PostgreSQL-backed job repository
#[derive(Debug, Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> RepositoryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the metadata schema migrations
    pub async fn migrate(&self) -> RepositoryResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Batch metadata migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Versioned step update on `conn`, which may be a chunk transaction
    async fn write_step_execution(
        &self,
        conn: &mut PgConnection,
        step: &mut StepExecution,
    ) -> RepositoryResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE batch_step_executions SET status = $1, read_count = $2, write_count = $3, \
             filter_count = $4, read_skip_count = $5, process_skip_count = $6, \
             write_skip_count = $7, commit_count = $8, rollback_count = $9, retry_count = $10, \
             execution_context = $11, exit_description = $12, start_time = $13, end_time = $14, \
             last_updated = $15, version = version + 1 \
             WHERE step_execution_id = $16 AND version = $17",
        )
        .bind(step.status.as_str())
        .bind(to_db_count(step.read_count)?)
        .bind(to_db_count(step.write_count)?)
        .bind(to_db_count(step.filter_count)?)
        .bind(to_db_count(step.read_skip_count)?)
        .bind(to_db_count(step.process_skip_count)?)
        .bind(to_db_count(step.write_skip_count)?)
        .bind(to_db_count(step.commit_count)?)
        .bind(to_db_count(step.rollback_count)?)
        .bind(to_db_count(step.retry_count)?)
        .bind(Json(&step.execution_context))
        .bind(&step.exit_description)
        .bind(step.start_time)
        .bind(step.end_time)
        .bind(now)
        .bind(step.id)
        .bind(step.version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let err = self
                .version_conflict(
                    "batch_step_executions",
                    "step_execution_id",
                    "step execution",
                    step.id,
                    step.version,
                )
                .await;
            warn!(step_execution_id = step.id, error = %err, "Step execution update rejected");
            return Err(err);
        }

        step.version += 1;
        step.last_updated = now;
        Ok(())
    }

    /// Distinguish "row gone" from "row moved on" after a guarded update hit nothing
    async fn version_conflict(
        &self,
        table: &str,
        id_column: &str,
        entity: &'static str,
        id: i64,
        expected: i32,
    ) -> RepositoryError {
        let sql = format!("SELECT version FROM {table} WHERE {id_column} = $1");
        match sqlx::query_as::<_, (i32,)>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some((actual,))) => RepositoryError::OptimisticLock {
                entity,
                id,
                expected,
                actual,
            },
            Ok(None) => RepositoryError::NotFound { entity, id },
            Err(e) => RepositoryError::Database(e),
        }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    #[instrument(skip(self, parameters, policy))]
    async fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        policy: RestartPolicy,
    ) -> RepositoryResult<LaunchDecision> {
        let job_key = parameters.job_key();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO batch_job_instances (job_name, job_key) VALUES ($1, $2) \
             ON CONFLICT (job_name, job_key) DO NOTHING",
        )
        .bind(job_name)
        .bind(&job_key)
        .execute(&mut *tx)
        .await?;

        let instance: JobInstance = sqlx::query_as::<_, JobInstanceRow>(
            "SELECT job_instance_id, job_name, job_key, created_at FROM batch_job_instances \
             WHERE job_name = $1 AND job_key = $2 FOR UPDATE",
        )
        .bind(job_name)
        .bind(&job_key)
        .fetch_one(&mut *tx)
        .await?
        .into();

        let last: Option<JobExecution> = sqlx::query_as::<_, JobExecutionRow>(&format!(
            "SELECT {JOB_EXECUTION_COLUMNS} FROM batch_job_executions \
             WHERE job_instance_id = $1 ORDER BY job_execution_id DESC LIMIT 1"
        ))
        .bind(instance.id)
        .fetch_optional(&mut *tx)
        .await?
        .map(JobExecution::try_from)
        .transpose()?;

        if let Some(rejection) = evaluate_launch(last.as_ref(), &job_key, policy) {
            tx.rollback().await?;
            debug!(job_name = %job_name, rejection = ?rejection, "Launch rejected");
            return Ok(LaunchDecision::Rejected(rejection));
        }

        let pending = JobExecution::new(&instance, parameters.clone());
        let execution: JobExecution = sqlx::query_as::<_, JobExecutionRow>(&format!(
            "INSERT INTO batch_job_executions \
             (job_instance_id, job_name, parameters, status, created_at, last_updated, version) \
             VALUES ($1, $2, $3, $4, $5, $5, 0) RETURNING {JOB_EXECUTION_COLUMNS}"
        ))
        .bind(instance.id)
        .bind(job_name)
        .bind(Json(&pending.parameters))
        .bind(pending.status.as_str())
        .bind(pending.created_at)
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        tx.commit().await?;

        debug!(
            job_name = %job_name,
            job_instance_id = instance.id,
            job_execution_id = execution.id,
            "Recorded job execution"
        );

        Ok(LaunchDecision::Accepted {
            execution,
            restart: last.is_some(),
        })
    }

    async fn update_job_execution(&self, execution: &mut JobExecution) -> RepositoryResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE batch_job_executions SET status = $1, exit_description = $2, \
             start_time = $3, end_time = $4, last_updated = $5, version = version + 1 \
             WHERE job_execution_id = $6 AND version = $7",
        )
        .bind(execution.status.as_str())
        .bind(&execution.exit_description)
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(now)
        .bind(execution.id)
        .bind(execution.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let err = self
                .version_conflict(
                    "batch_job_executions",
                    "job_execution_id",
                    "job execution",
                    execution.id,
                    execution.version,
                )
                .await;
            warn!(job_execution_id = execution.id, error = %err, "Job execution update rejected");
            return Err(err);
        }

        execution.version += 1;
        execution.last_updated = now;
        Ok(())
    }

    async fn get_job_execution(&self, id: i64) -> RepositoryResult<Option<JobExecution>> {
        sqlx::query_as::<_, JobExecutionRow>(&format!(
            "SELECT {JOB_EXECUTION_COLUMNS} FROM batch_job_executions WHERE job_execution_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(JobExecution::try_from)
        .transpose()
    }

    async fn get_job_instance(&self, id: i64) -> RepositoryResult<Option<JobInstance>> {
        Ok(sqlx::query_as::<_, JobInstanceRow>(
            "SELECT job_instance_id, job_name, job_key, created_at FROM batch_job_instances \
             WHERE job_instance_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(JobInstance::from))
    }

    async fn find_job_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> RepositoryResult<Option<JobInstance>> {
        Ok(sqlx::query_as::<_, JobInstanceRow>(
            "SELECT job_instance_id, job_name, job_key, created_at FROM batch_job_instances \
             WHERE job_name = $1 AND job_key = $2",
        )
        .bind(job_name)
        .bind(job_key)
        .fetch_optional(&self.pool)
        .await?
        .map(JobInstance::from))
    }

    async fn find_job_executions(
        &self,
        job_instance_id: i64,
    ) -> RepositoryResult<Vec<JobExecution>> {
        sqlx::query_as::<_, JobExecutionRow>(&format!(
            "SELECT {JOB_EXECUTION_COLUMNS} FROM batch_job_executions \
             WHERE job_instance_id = $1 ORDER BY job_execution_id DESC"
        ))
        .bind(job_instance_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(JobExecution::try_from)
        .collect()
    }

    async fn find_last_job_execution(
        &self,
        job_name: &str,
    ) -> RepositoryResult<Option<JobExecution>> {
        sqlx::query_as::<_, JobExecutionRow>(&format!(
            "SELECT {JOB_EXECUTION_COLUMNS} FROM batch_job_executions \
             WHERE job_name = $1 ORDER BY job_execution_id DESC LIMIT 1"
        ))
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?
        .map(JobExecution::try_from)
        .transpose()
    }

    async fn find_running_job_executions(
        &self,
        job_name: &str,
    ) -> RepositoryResult<Vec<JobExecution>> {
        sqlx::query_as::<_, JobExecutionRow>(&format!(
            "SELECT {JOB_EXECUTION_COLUMNS} FROM batch_job_executions \
             WHERE job_name = $1 AND status IN ('STARTING', 'STARTED', 'STOPPING') \
             ORDER BY job_execution_id"
        ))
        .bind(job_name)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(JobExecution::try_from)
        .collect()
    }

    async fn add_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()> {
        let now = Utc::now();
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO batch_step_executions \
             (job_execution_id, step_name, status, read_count, write_count, filter_count, \
              read_skip_count, process_skip_count, write_skip_count, commit_count, \
              rollback_count, retry_count, execution_context, exit_description, \
              start_time, end_time, last_updated, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, 0) \
             RETURNING step_execution_id",
        )
        .bind(step.job_execution_id)
        .bind(&step.step_name)
        .bind(step.status.as_str())
        .bind(to_db_count(step.read_count)?)
        .bind(to_db_count(step.write_count)?)
        .bind(to_db_count(step.filter_count)?)
        .bind(to_db_count(step.read_skip_count)?)
        .bind(to_db_count(step.process_skip_count)?)
        .bind(to_db_count(step.write_skip_count)?)
        .bind(to_db_count(step.commit_count)?)
        .bind(to_db_count(step.rollback_count)?)
        .bind(to_db_count(step.retry_count)?)
        .bind(Json(&step.execution_context))
        .bind(&step.exit_description)
        .bind(step.start_time)
        .bind(step.end_time)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        step.id = id;
        step.version = 0;
        step.last_updated = now;
        Ok(())
    }

    async fn update_step_execution(&self, step: &mut StepExecution) -> RepositoryResult<()> {
        let mut conn = self.pool.acquire().await?;
        self.write_step_execution(&mut conn, step).await
    }

    async fn begin_chunk(&self) -> RepositoryResult<ChunkTransaction> {
        Ok(ChunkTransaction::postgres(self.pool.begin().await?))
    }

    async fn commit_chunk(
        &self,
        mut transaction: ChunkTransaction,
        step: &mut StepExecution,
    ) -> RepositoryResult<()> {
        let recorded = match transaction.database() {
            Some(tx) => self.write_step_execution(tx, step).await,
            None => self.update_step_execution(step).await,
        };
        if let Err(e) = recorded {
            transaction.discard().await;
            return Err(e);
        }
        transaction.commit().await?;
        debug!(step_execution_id = step.id, version = step.version, "Chunk committed");
        Ok(())
    }

    async fn get_step_execution(&self, id: i64) -> RepositoryResult<Option<StepExecution>> {
        sqlx::query_as::<_, StepExecutionRow>(&format!(
            "SELECT {STEP_EXECUTION_COLUMNS} FROM batch_step_executions WHERE step_execution_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(StepExecution::try_from)
        .transpose()
    }

    async fn find_step_executions(
        &self,
        job_execution_id: i64,
    ) -> RepositoryResult<Vec<StepExecution>> {
        sqlx::query_as::<_, StepExecutionRow>(&format!(
            "SELECT {STEP_EXECUTION_COLUMNS} FROM batch_step_executions \
             WHERE job_execution_id = $1 ORDER BY step_execution_id"
        ))
        .bind(job_execution_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(StepExecution::try_from)
        .collect()
    }

    async fn find_last_step_execution(
        &self,
        job_instance_id: i64,
        step_name: &str,
    ) -> RepositoryResult<Option<StepExecution>> {
        let columns = STEP_EXECUTION_COLUMNS
            .split(", ")
            .map(|c| format!("se.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query_as::<_, StepExecutionRow>(&format!(
            "SELECT {columns} FROM batch_step_executions se \
             JOIN batch_job_executions je ON je.job_execution_id = se.job_execution_id \
             WHERE je.job_instance_id = $1 AND se.step_name = $2 \
             ORDER BY se.step_execution_id DESC LIMIT 1"
        ))
        .bind(job_instance_id)
        .bind(step_name)
        .fetch_optional(&self.pool)
        .await?
        .map(StepExecution::try_from)
        .transpose()
    }

    async fn count_step_executions(
        &self,
        job_instance_id: i64,
        step_name: &str,
    ) -> RepositoryResult<u32> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM batch_step_executions se \
             JOIN batch_job_executions je ON je.job_execution_id = se.job_execution_id \
             WHERE je.job_instance_id = $1 AND se.step_name = $2",
        )
        .bind(job_instance_id)
        .bind(step_name)
        .fetch_one(&self.pool)
        .await?;

        u32::try_from(count)
            .map_err(|_| RepositoryError::InvalidData(format!("step execution count {count}")))
    }
}
