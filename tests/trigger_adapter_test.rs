//! Directory trigger driving a delimited-file import end to end

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use tasker_batch::config::TriggerConfig;
use tasker_batch::item::{
    CollectingItemWriter, DelimitedItemReader, FieldSpec, FieldType, FieldValue, ItemError,
    ItemReader, ItemResult, PassThroughItemProcessor, Record, RecordMapper,
};
use tasker_batch::job::{Job, JobOperator};
use tasker_batch::models::JobParameters;
use tasker_batch::registry::JobRegistry;
use tasker_batch::repository::InMemoryJobRepository;
use tasker_batch::step::ChunkOrientedStep;
use tasker_batch::trigger::{DirectoryPoller, TriggerAdapter, TriggerOutcome};
use tasker_batch::BatchStatus;

const IMPORT_JOB: &str = "fileImportJob";

fn import_job(writer: CollectingItemWriter<Record>) -> Job {
    let reader_factory = |params: &JobParameters| -> ItemResult<Box<dyn ItemReader<Record>>> {
        let path = params
            .get_string("file")
            .ok_or_else(|| ItemError::fatal("job parameter 'file' is required"))?;
        let reader = DelimitedItemReader::builder()
            .name("dogsReader")
            .path(path)
            .lines_to_skip(1)
            .field_set_mapper(RecordMapper::new(
                vec![
                    FieldSpec::new("id", FieldType::Long),
                    FieldSpec::new("name", FieldType::String),
                ],
                "%Y-%m-%d",
            ))
            .build()?;
        Ok(Box::new(reader))
    };
    let step = ChunkOrientedStep::<Record, Record>::builder(
        "import",
        Arc::new(reader_factory),
        Arc::new(PassThroughItemProcessor),
        Arc::new(writer),
    )
    .with_chunk_size(2)
    .build();

    Job::builder(IMPORT_JOB)
        .with_step(Arc::new(step))
        .build()
        .unwrap()
}

fn adapter(inbound: &Path, archive: &Path, operator: JobOperator) -> TriggerAdapter {
    let config = TriggerConfig {
        inbound_directory: inbound.to_path_buf(),
        archive_directory: Some(archive.to_path_buf()),
        poll_interval_ms: 20,
        file_suffix: Some(".csv".to_string()),
        ..TriggerConfig::default()
    };
    TriggerAdapter::new(
        operator,
        IMPORT_JOB,
        Box::new(DirectoryPoller::from_config(&config)),
        &config,
    )
}

async fn poll_until_finished(adapter: &mut TriggerAdapter) -> Vec<TriggerOutcome> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let outcomes = adapter.poll_once().await;
            if outcomes
                .iter()
                .any(|o| matches!(o, TriggerOutcome::Finished { .. }))
            {
                return outcomes;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("execution finished")
}

#[tokio::test]
async fn test_new_file_is_imported_and_archived() {
    let inbound = TempDir::new().unwrap();
    let archive = TempDir::new().unwrap();
    std::fs::write(
        inbound.path().join("dogs.csv"),
        "id,name\n1,Rex\n2,Fido\n3,Lassie\n",
    )
    .unwrap();
    std::fs::write(inbound.path().join("README.txt"), "ignored").unwrap();

    let writer = CollectingItemWriter::new();
    let operator = common::operator_for(
        import_job(writer.clone()),
        Arc::new(InMemoryJobRepository::new()),
    );
    let mut adapter = adapter(inbound.path(), archive.path(), operator.clone());

    let launched = adapter.poll_once().await;
    let execution_id = match launched.as_slice() {
        [TriggerOutcome::Launched { execution_id, path }] => {
            assert!(path.ends_with("dogs.csv"));
            assert!(path.is_absolute());
            *execution_id
        }
        other => panic!("unexpected outcomes {other:?}"),
    };

    let execution = operator.get_execution(execution_id).await.unwrap().unwrap();
    assert_eq!(
        execution.parameters.get_string("name"),
        Some("Enterprise Integration fans")
    );
    assert_eq!(execution.parameters.identifying_parameters().len(), 1);

    let finished = poll_until_finished(&mut adapter).await;
    match finished.as_slice() {
        [TriggerOutcome::Finished {
            status,
            archived_to: Some(target),
            ..
        }] => {
            assert_eq!(*status, BatchStatus::Completed);
            assert!(target.is_file());
        }
        other => panic!("unexpected outcomes {other:?}"),
    }
    assert!(!inbound.path().join("dogs.csv").exists());
    assert!(inbound.path().join("README.txt").exists());
    assert_eq!(adapter.in_flight(), 0);

    let names: Vec<_> = writer
        .items()
        .iter()
        .map(|r| r.get("name").cloned())
        .collect();
    assert_eq!(
        names,
        vec![
            Some(FieldValue::Text("Rex".to_string())),
            Some(FieldValue::Text("Fido".to_string())),
            Some(FieldValue::Text("Lassie".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_rearrived_file_is_rejected_as_duplicate() {
    let inbound = TempDir::new().unwrap();
    let archive = TempDir::new().unwrap();
    let file = inbound.path().join("dogs.csv");
    std::fs::write(&file, "id,name\n1,Rex\n").unwrap();

    let operator = common::operator_for(
        import_job(CollectingItemWriter::new()),
        Arc::new(InMemoryJobRepository::new()),
    );
    let mut adapter = adapter(inbound.path(), archive.path(), operator);

    adapter.poll_once().await;
    poll_until_finished(&mut adapter).await;

    std::fs::write(&file, "id,name\n1,Rex\n").unwrap();
    let outcomes = adapter.poll_once().await;

    assert!(matches!(
        outcomes.as_slice(),
        [TriggerOutcome::Rejected { reason, .. }] if reason.contains("already complete")
    ));
    assert!(file.exists(), "rejected input stays in place");
}

#[tokio::test]
async fn test_failed_input_is_not_archived() {
    let inbound = TempDir::new().unwrap();
    let archive = TempDir::new().unwrap();
    let file = inbound.path().join("broken.csv");
    std::fs::write(&file, "id,name\nnot-a-number,Rex\n").unwrap();

    let operator = common::operator_for(
        import_job(CollectingItemWriter::new()),
        Arc::new(InMemoryJobRepository::new()),
    );
    let mut adapter = adapter(inbound.path(), archive.path(), operator);

    adapter.poll_once().await;
    let finished = poll_until_finished(&mut adapter).await;

    assert!(matches!(
        finished.as_slice(),
        [TriggerOutcome::Finished {
            status: BatchStatus::Failed,
            archived_to: None,
            ..
        }]
    ));
    assert!(file.exists());
}

#[tokio::test]
async fn test_file_whose_launch_failed_is_detected_again() {
    let inbound = TempDir::new().unwrap();
    let archive = TempDir::new().unwrap();
    let file = inbound.path().join("dogs.csv");
    std::fs::write(&file, "id,name\n1,Rex\n").unwrap();

    // the job is registered only after the first attempt
    let operator = JobOperator::new(
        Arc::new(InMemoryJobRepository::new()),
        Arc::new(JobRegistry::new()),
    );
    let mut adapter = adapter(inbound.path(), archive.path(), operator.clone());

    let first = adapter.poll_once().await;
    assert!(matches!(
        first.as_slice(),
        [TriggerOutcome::Failed { error, .. }] if error.contains(IMPORT_JOB)
    ));
    assert!(file.exists());

    let writer = CollectingItemWriter::new();
    operator
        .registry()
        .register(import_job(writer.clone()))
        .unwrap();

    let second = adapter.poll_once().await;
    assert!(matches!(second.as_slice(), [TriggerOutcome::Launched { .. }]));
    poll_until_finished(&mut adapter).await;
    assert_eq!(writer.items().len(), 1);
    assert!(!file.exists());
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let inbound = TempDir::new().unwrap();
    let archive = TempDir::new().unwrap();
    let operator = common::operator_for(
        import_job(CollectingItemWriter::new()),
        Arc::new(InMemoryJobRepository::new()),
    );
    let adapter = adapter(inbound.path(), archive.path(), operator.clone());

    let (shutdown, receiver) = tokio::sync::broadcast::channel(1);
    let task = tokio::spawn(adapter.run(receiver));

    std::fs::write(inbound.path().join("dogs.csv"), "id,name\n1,Rex\n").unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !archive.path().join("dogs.csv").exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("file archived by the polling loop");

    shutdown.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop exits")
        .unwrap();
}
