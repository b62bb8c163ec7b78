use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use super::{InboundFile, InboundSource};
use crate::config::TriggerConfig;
use crate::constants::{events, parameters};
use crate::job::JobOperator;
use crate::logging::log_error;
use crate::models::{JobParameters, JobParametersBuilder};
use crate::state_machine::BatchStatus;

/// What happened to one inbound file during a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Launched {
        path: PathBuf,
        execution_id: i64,
    },
    /// The repository refused the launch (duplicate or still running)
    Rejected { path: PathBuf, reason: String },
    Failed { path: PathBuf, error: String },
    /// A launched execution reached a terminal status
    Finished {
        path: PathBuf,
        execution_id: i64,
        status: BatchStatus,
        archived_to: Option<PathBuf>,
    },
}

pub struct TriggerAdapter {
    operator: JobOperator,
    job_name: String,
    source: Box<dyn InboundSource>,
    labels: BTreeMap<String, String>,
    archive_directory: Option<PathBuf>,
    poll_interval: Duration,
    in_flight: HashMap<i64, PathBuf>,
}

impl std::fmt::Debug for TriggerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerAdapter")
            .field("job_name", &self.job_name)
            .field("labels", &self.labels)
            .field("archive_directory", &self.archive_directory)
            .field("poll_interval", &self.poll_interval)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl TriggerAdapter {
    pub fn new(
        operator: JobOperator,
        job_name: impl Into<String>,
        source: Box<dyn InboundSource>,
        config: &TriggerConfig,
    ) -> Self {
        Self {
            operator,
            job_name: job_name.into(),
            source,
            labels: config.labels.clone(),
            archive_directory: config.archive_directory.clone(),
            poll_interval: config.poll_interval(),
            in_flight: HashMap::new(),
        }
    }

    /// Executions launched by this adapter that have not finished yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Job parameters for one inbound file
    pub fn parameters_for(&self, file: &InboundFile) -> JobParameters {
        self.labels.iter().fold(
            JobParametersBuilder::new()
                .add_string(parameters::FILE, file.path.to_string_lossy().into_owned()),
            |builder, (key, value)| builder.add_string_with(key.clone(), value.clone(), false),
        )
        .to_job_parameters()
    }

    /// Collect finished executions, then launch every newly detected file
    pub async fn poll_once(&mut self) -> Vec<TriggerOutcome> {
        let mut outcomes = self.collect_finished().await;

        let detected = match self.source.poll().await {
            Ok(detected) => detected,
            Err(e) => {
                log_error("TriggerAdapter", "poll", &e.to_string(), None);
                return outcomes;
            }
        };

        for file in detected {
            outcomes.push(self.launch(file).await);
        }
        outcomes
    }

    /// Poll on an interval until `shutdown` fires
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(job_name = %self.job_name, interval = ?self.poll_interval, "Trigger adapter started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    info!(in_flight = self.in_flight.len(), "Trigger adapter shutting down");
                    break;
                }
            }
        }
    }

    async fn launch(&mut self, file: InboundFile) -> TriggerOutcome {
        let parameters = self.parameters_for(&file);
        match self.operator.start(&self.job_name, &parameters).await {
            Ok(execution) => {
                info!(
                    job_name = %self.job_name,
                    job_execution_id = execution.id,
                    path = %file.path.display(),
                    "Launched job for inbound file"
                );
                self.in_flight.insert(execution.id, file.path.clone());
                TriggerOutcome::Launched {
                    path: file.path,
                    execution_id: execution.id,
                }
            }
            Err(e) if e.is_launch_rejection() => {
                info!(path = %file.path.display(), reason = %e, "Inbound file not launched");
                TriggerOutcome::Rejected {
                    path: file.path,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                log_error(
                    "TriggerAdapter",
                    "launch",
                    &e.to_string(),
                    Some(&file.path.display().to_string()),
                );
                self.source.release(&file);
                TriggerOutcome::Failed {
                    path: file.path,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn collect_finished(&mut self) -> Vec<TriggerOutcome> {
        let mut finished = Vec::new();
        let ids: Vec<i64> = self.in_flight.keys().copied().collect();

        for execution_id in ids {
            let status = match self.operator.get_execution(execution_id).await {
                Ok(Some(execution)) if execution.status.is_terminal() => execution.status,
                Ok(Some(_)) => continue,
                Ok(None) => BatchStatus::Failed,
                Err(e) => {
                    warn!(job_execution_id = execution_id, error = %e, "Could not check execution");
                    continue;
                }
            };
            let Some(path) = self.in_flight.remove(&execution_id) else {
                continue;
            };

            let archived_to = match (&self.archive_directory, status) {
                (Some(archive), BatchStatus::Completed) => match archive_input(&path, archive).await {
                    Ok(target) => Some(target),
                    Err(e) => {
                        log_error(
                            "TriggerAdapter",
                            "archive",
                            &e.to_string(),
                            Some(&path.display().to_string()),
                        );
                        None
                    }
                },
                _ => None,
            };

            finished.push(TriggerOutcome::Finished {
                path,
                execution_id,
                status,
                archived_to,
            });
        }
        finished
    }
}

/// Move a completed input into `archive`, copying when a rename is not possible
async fn archive_input(path: &Path, archive: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(archive).await?;
    let file_name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))?;
    let target = archive.join(file_name);

    if tokio::fs::rename(path, &target).await.is_err() {
        tokio::fs::copy(path, &target).await?;
        tokio::fs::remove_file(path).await?;
    }
    info!(
        event = events::INPUT_ARCHIVED,
        from = %path.display(),
        to = %target.display(),
        "Archived inbound file"
    );
    Ok(target)
}
