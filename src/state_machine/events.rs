use serde::{Deserialize, Serialize};

/// Events that drive job and step execution transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ExecutionEvent {
    /// Execution was durably recorded and begins running
    Start,
    /// All work finished successfully
    Complete,
    /// Execution failed with the given description
    Fail(String),
    /// Operator asked the execution to stop at the next chunk boundary
    RequestStop,
    /// Execution honored a stop request
    Stop,
}

impl ExecutionEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::RequestStop => "request_stop",
            Self::Stop => "stop",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
