use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status shared by job and step executions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Execution accepted and recorded, not yet running
    #[default]
    Starting,
    /// Execution is running
    Started,
    /// Execution finished successfully
    Completed,
    /// Execution failed; restartable
    Failed,
    /// Stop requested; honored at the next chunk boundary
    Stopping,
    /// Execution stopped cooperatively; restartable
    Stopped,
}

impl BatchStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Check if the execution still occupies its job instance
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }

    /// Terminal states from which a new execution of the same instance may resume
    pub fn is_restartable(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }

    /// Whether `next` is a legal successor of `self`
    ///
    /// Re-applying the current status is allowed so that progress updates
    /// (counts, context) can be persisted without a status change.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        if *self == next {
            return !self.is_terminal();
        }
        match self {
            Self::Starting => matches!(
                next,
                Self::Started | Self::Stopping | Self::Stopped | Self::Failed
            ),
            Self::Started => matches!(
                next,
                Self::Completed | Self::Failed | Self::Stopping | Self::Stopped
            ),
            Self::Stopping => matches!(next, Self::Stopped | Self::Completed | Self::Failed),
            Self::Completed | Self::Failed | Self::Stopped => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTING" => Ok(Self::Starting),
            "STARTED" => Ok(Self::Started),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "STOPPING" => Ok(Self::Stopping),
            "STOPPED" => Ok(Self::Stopped),
            _ => Err(format!("Invalid batch status: {s}")),
        }
    }
}
