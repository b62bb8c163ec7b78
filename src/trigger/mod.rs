//! # Trigger Adapter
//!
//! Turns new inbound files into job launches.
//!
//! ## Overview
//!
//! An [`InboundSource`] reports each new unit of work once. The
//! [`TriggerAdapter`] derives job parameters from it (the absolute `file` path,
//! identifying, plus configured non-identifying labels) and asks the
//! [`JobOperator`](crate::job::JobOperator) to start the job. The repository's
//! duplicate detection guarantees at most one accepted execution per file.
//!
//! Nothing crosses the adapter boundary as an error: rejections and failures
//! are logged and reported as [`TriggerOutcome`]s. A launch that failed for
//! reasons other than a rejection is handed back to the source, which reports
//! the file again on its next poll. Inputs stay where they are until their
//! execution is terminal; COMPLETED inputs are optionally moved to an archive
//! directory.

pub mod adapter;
pub mod directory;

pub use adapter::{TriggerAdapter, TriggerOutcome};
pub use directory::DirectoryPoller;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;

/// One unit of inbound work
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InboundFile {
    /// Canonical absolute path
    pub path: PathBuf,
}

#[async_trait]
pub trait InboundSource: Send {
    /// Units that appeared since the previous poll
    async fn poll(&mut self) -> Result<Vec<InboundFile>>;

    /// Report `file` again on the next poll; its launch did not go through
    fn release(&mut self, file: &InboundFile);
}
