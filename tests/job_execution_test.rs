//! End-to-end job executions through the operator and the in-memory repository

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    file_parameters, numbers_job, operator_for, wait_for_commits, wait_for_status, BrokenRecord,
    FailingRepository, STEP_NAME,
};
use tasker_batch::item::CollectingItemWriter;
use tasker_batch::models::JobParametersBuilder;
use tasker_batch::repository::{InMemoryJobRepository, JobRepository};
use tasker_batch::{BatchError, BatchStatus};

fn memory() -> Arc<dyn JobRepository> {
    Arc::new(InMemoryJobRepository::new())
}

#[tokio::test]
async fn test_ten_records_commit_in_two_chunks() {
    let writer = CollectingItemWriter::new();
    let operator = operator_for(
        numbers_job(10, BrokenRecord::slow(Duration::ZERO), writer.clone(), 0),
        memory(),
    );

    let execution = operator
        .launch(common::JOB_NAME, &file_parameters("/in/numbers.csv"))
        .await
        .unwrap();
    let summary = operator.summary(execution.id).await.unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.read_count, 10);
    assert_eq!(summary.write_count, 10);
    assert_eq!(summary.commit_count, 2);
    assert_eq!(writer.chunks().len(), 2);
}

#[tokio::test]
async fn test_unskippable_record_fails_after_first_chunk() {
    let writer = CollectingItemWriter::new();
    let operator = operator_for(
        numbers_job(10, BrokenRecord::new(7), writer.clone(), 0),
        memory(),
    );

    let execution = operator
        .launch(common::JOB_NAME, &file_parameters("/in/numbers.csv"))
        .await
        .unwrap();

    assert_eq!(execution.status, BatchStatus::Failed);
    assert!(execution
        .exit_description
        .as_deref()
        .is_some_and(|d| d.contains("record 7")));

    let steps = operator.step_executions(execution.id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, BatchStatus::Failed);
    assert_eq!(steps[0].commit_count, 1);
    assert_eq!(steps[0].rollback_count, 1);
    assert_eq!(steps[0].write_count, 5);
    assert_eq!(writer.items(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_one_allowed_skip_completes() {
    let writer = CollectingItemWriter::new();
    let operator = operator_for(
        numbers_job(10, BrokenRecord::new(7), writer.clone(), 1),
        memory(),
    );

    let execution = operator
        .launch(common::JOB_NAME, &file_parameters("/in/numbers.csv"))
        .await
        .unwrap();
    let summary = operator.summary(execution.id).await.unwrap();

    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.write_count, 9);
    assert_eq!(summary.skip_count, 1);
    assert_eq!(summary.commit_count, 2);
    assert!(!writer.items().contains(&7));
}

#[tokio::test]
async fn test_restart_resumes_after_last_commit() {
    let writer = CollectingItemWriter::new();
    let processor = BrokenRecord::new(7);
    let operator = operator_for(
        numbers_job(10, processor.clone(), writer.clone(), 0),
        memory(),
    );
    let params = file_parameters("/in/numbers.csv");

    let failed = operator.launch(common::JOB_NAME, &params).await.unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);

    processor.repair();
    let restarted = operator.restart(failed.id).await.unwrap();
    let finished = operator
        .await_completion(restarted.id, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(finished.status, BatchStatus::Completed);
    assert_eq!(finished.job_instance_id, failed.job_instance_id);
    assert_eq!(writer.items(), (1..=10).collect::<Vec<_>>());

    let steps = operator.step_executions(restarted.id).await.unwrap();
    assert_eq!(steps[0].step_name, STEP_NAME);
    assert_eq!(steps[0].read_count, 5);
    assert_eq!(steps[0].write_count, 5);
    assert_eq!(
        steps[0].execution_context.get_long("numbersReader.read.count"),
        Some(10)
    );
}

#[tokio::test]
async fn test_duplicate_launch_is_rejected_unless_run_id_differs() {
    let operator = operator_for(
        numbers_job(3, BrokenRecord::slow(Duration::ZERO), CollectingItemWriter::new(), 0),
        memory(),
    );
    let params = file_parameters("/in/numbers.csv");

    operator.launch(common::JOB_NAME, &params).await.unwrap();
    let err = operator.launch(common::JOB_NAME, &params).await.unwrap_err();
    assert!(matches!(err, BatchError::JobInstanceAlreadyComplete { .. }));
    assert!(err.is_launch_rejection());

    let first = JobParametersBuilder::from_parameters(&params)
        .add_long("run.id", 1)
        .to_job_parameters();
    let second = JobParametersBuilder::from_parameters(&params)
        .add_long("run.id", 2)
        .to_job_parameters();
    let a = operator.launch(common::JOB_NAME, &first).await.unwrap();
    let b = operator.launch(common::JOB_NAME, &second).await.unwrap();

    assert_eq!(a.status, BatchStatus::Completed);
    assert_eq!(b.status, BatchStatus::Completed);
    assert_ne!(a.job_instance_id, b.job_instance_id);
}

#[tokio::test]
async fn test_start_next_instance_increments_run_id() {
    let operator = operator_for(
        numbers_job(3, BrokenRecord::slow(Duration::ZERO), CollectingItemWriter::new(), 0),
        memory(),
    );

    let first = operator.start_next_instance(common::JOB_NAME).await.unwrap();
    operator
        .await_completion(first.id, Duration::from_secs(5))
        .await
        .unwrap();
    let second = operator.start_next_instance(common::JOB_NAME).await.unwrap();

    assert_eq!(first.parameters.get_long("run.id"), Some(1));
    assert_eq!(second.parameters.get_long("run.id"), Some(2));
}

#[tokio::test]
async fn test_stop_is_honored_at_chunk_boundary_and_restartable() {
    let writer = CollectingItemWriter::new();
    let operator = operator_for(
        numbers_job(40, BrokenRecord::slow(Duration::from_millis(10)), writer.clone(), 0),
        memory(),
    );
    let params = file_parameters("/in/slow.csv");

    let started = operator.start(common::JOB_NAME, &params).await.unwrap();
    wait_for_status(&operator, started.id, |e| e.status == BatchStatus::Started).await;
    wait_for_commits(&operator, started.id, 1).await;
    operator.stop(started.id).await.unwrap();

    let stopped = operator
        .await_completion(started.id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(stopped.status, BatchStatus::Stopped);

    let steps = operator.step_executions(started.id).await.unwrap();
    assert_eq!(steps[0].status, BatchStatus::Stopped);
    assert_eq!(steps[0].write_count % 5, 0);
    assert!(steps[0].write_count < 40);

    let err = operator.stop(started.id).await.unwrap_err();
    assert!(matches!(err, BatchError::JobExecutionNotRunning { .. }));

    let resumed = operator.restart(started.id).await.unwrap();
    let finished = operator
        .await_completion(resumed.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);
    assert_eq!(writer.items(), (1..=40).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_repository_failure_fails_closed() {
    let writer = CollectingItemWriter::new();
    // step start and the first commit persist, the second commit does not
    let operator = operator_for(
        numbers_job(15, BrokenRecord::slow(Duration::ZERO), writer.clone(), 0),
        Arc::new(FailingRepository::new(2)),
    );

    let err = operator
        .launch(common::JOB_NAME, &file_parameters("/in/numbers.csv"))
        .await
        .unwrap_err();

    assert!(err.is_infrastructure());
    // the chunk whose checkpoint failed is rolled back and nothing more is read
    assert_eq!(writer.chunks(), vec![vec![1, 2, 3, 4, 5]]);
    assert!(operator.active_executions().is_empty());
}

#[tokio::test]
async fn test_chunk_with_lost_checkpoint_is_written_once_after_restart() {
    let writer = CollectingItemWriter::new();
    let repository = Arc::new(FailingRepository::new(2));
    let operator = operator_for(
        numbers_job(15, BrokenRecord::slow(Duration::ZERO), writer.clone(), 0),
        repository.clone(),
    );
    let params = file_parameters("/in/numbers.csv");

    let err = operator.launch(common::JOB_NAME, &params).await.unwrap_err();
    assert!(err.is_infrastructure());
    let failed = operator
        .find_execution(common::JOB_NAME, &params)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);

    repository.heal();
    let restarted = operator.restart(failed.id).await.unwrap();
    let finished = operator
        .await_completion(restarted.id, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(finished.status, BatchStatus::Completed);
    assert_eq!(writer.items(), (1..=15).collect::<Vec<_>>());
    let steps = operator.step_executions(restarted.id).await.unwrap();
    assert_eq!(steps[0].write_count, 10);
}

#[tokio::test]
async fn test_find_execution_by_parameters() {
    let operator = operator_for(
        numbers_job(3, BrokenRecord::slow(Duration::ZERO), CollectingItemWriter::new(), 0),
        memory(),
    );
    let params = file_parameters("/in/numbers.csv");
    let launched = operator.launch(common::JOB_NAME, &params).await.unwrap();

    // labels are not identifying
    let lookup = JobParametersBuilder::new()
        .add_string("file", "/in/numbers.csv")
        .to_job_parameters();
    let found = operator
        .find_execution(common::JOB_NAME, &lookup)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.id, launched.id);
    assert_eq!(found.status, BatchStatus::Completed);
    assert!(operator
        .find_execution(common::JOB_NAME, &file_parameters("/in/other.csv"))
        .await
        .unwrap()
        .is_none());
}
