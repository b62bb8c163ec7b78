//! Skip, retry and filter-accounting policies for chunk-oriented steps.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

use crate::item::{ItemError, ItemErrorKind};

/// Decides whether a failed record may be dropped instead of failing the step
pub trait SkipPolicy: Send + Sync + Debug {
    /// `skip_count` is the number of records already skipped in this step
    fn should_skip(&self, error: &ItemError, skip_count: u64) -> bool;
}

/// Skips errors of the configured kinds until `skip_limit` skips happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitCheckingSkipPolicy {
    skip_limit: u64,
    skippable: Vec<ItemErrorKind>,
}

impl LimitCheckingSkipPolicy {
    pub fn new(skip_limit: u64) -> Self {
        Self {
            skip_limit,
            skippable: vec![ItemErrorKind::Invalid, ItemErrorKind::Transient],
        }
    }

    pub fn with_skippable(mut self, kinds: Vec<ItemErrorKind>) -> Self {
        self.skippable = kinds;
        self
    }

    pub fn skip_limit(&self) -> u64 {
        self.skip_limit
    }
}

impl SkipPolicy for LimitCheckingSkipPolicy {
    fn should_skip(&self, error: &ItemError, skip_count: u64) -> bool {
        self.skippable.contains(&error.kind) && skip_count < self.skip_limit
    }
}

/// Skips every non-fatal error without limit
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSkipItemSkipPolicy;

impl SkipPolicy for AlwaysSkipItemSkipPolicy {
    fn should_skip(&self, error: &ItemError, _skip_count: u64) -> bool {
        !error.is_fatal()
    }
}

/// Never skips; any record failure fails the step
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSkipItemSkipPolicy;

impl SkipPolicy for NeverSkipItemSkipPolicy {
    fn should_skip(&self, _error: &ItemError, _skip_count: u64) -> bool {
        false
    }
}

/// Retries transient failures with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retry_limit: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 0,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(retry_limit: u32, initial_backoff: Duration) -> Self {
        Self {
            retry_limit,
            initial_backoff,
            ..Self::default()
        }
    }

    /// `retries_so_far` counts retries already made for this record
    pub fn can_retry(&self, error: &ItemError, retries_so_far: u32) -> bool {
        error.is_transient() && retries_so_far < self.retry_limit
    }

    /// Delay before retry number `retry` (zero-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// How records filtered by the processor show up in step statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilteredItemAccounting {
    /// Dropped silently
    Ignore,
    /// Counted in `filter_count`
    #[default]
    Count,
    /// Counted as a process skip
    CountAsSkip,
}
