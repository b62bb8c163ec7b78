use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A logical run: one job name combined with one identifying parameter set
///
/// Every launch and restart of that run is a separate
/// [`JobExecution`](super::JobExecution) hanging off the same instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: i64,
    pub job_name: String,
    pub job_key: String,
    pub created_at: DateTime<Utc>,
}

impl JobInstance {
    pub fn new(id: i64, job_name: impl Into<String>, job_key: impl Into<String>) -> Self {
        Self {
            id,
            job_name: job_name.into(),
            job_key: job_key.into(),
            created_at: Utc::now(),
        }
    }
}
