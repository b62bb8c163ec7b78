//! # Chunk Transaction
//!
//! Unit of work shared by the writes of one chunk and the checkpoint that
//! records it. The repository opens it, writers enlist in it, and the
//! repository commits it together with the updated step execution, so a chunk
//! is either in the sink with its checkpoint saved or in neither.
//!
//! Two kinds of participation are supported:
//!
//! - **Database**: when the repository is PostgreSQL the transaction wraps an
//!   open `sqlx::Transaction`. [`PgBatchItemWriter`](crate::item::PgBatchItemWriter)
//!   executes its statements on it (one savepoint per write call), and the
//!   step execution update runs on the same connection before `COMMIT`.
//! - **Deferred**: writers without a database connection stage their effect
//!   with [`ChunkTransaction::on_commit`]; staged actions run only after the
//!   checkpoint was recorded and are dropped on rollback.
//!
//! A writer that does neither commits on its own and is outside the guarantee.

use sqlx::{Postgres, Transaction};
use std::fmt;
use tracing::warn;

type DeferredAction = Box<dyn FnOnce() + Send>;

pub struct ChunkTransaction {
    database: Option<Transaction<'static, Postgres>>,
    deferred: Vec<DeferredAction>,
}

impl fmt::Debug for ChunkTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkTransaction")
            .field("database", &self.database.is_some())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

impl Default for ChunkTransaction {
    fn default() -> Self {
        Self::detached()
    }
}

impl ChunkTransaction {
    /// A transaction with no database connection; only deferred actions take part
    pub fn detached() -> Self {
        Self {
            database: None,
            deferred: Vec::new(),
        }
    }

    pub fn postgres(transaction: Transaction<'static, Postgres>) -> Self {
        Self {
            database: Some(transaction),
            deferred: Vec::new(),
        }
    }

    /// The open database transaction, if the repository provided one
    pub fn database(&mut self) -> Option<&mut Transaction<'static, Postgres>> {
        self.database.as_mut()
    }

    pub fn has_database(&self) -> bool {
        self.database.is_some()
    }

    /// Run `action` once the chunk and its checkpoint committed
    pub fn on_commit(&mut self, action: impl FnOnce() + Send + 'static) {
        self.deferred.push(Box::new(action));
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Commit the database transaction, then apply the deferred actions
    pub async fn commit(self) -> Result<(), sqlx::Error> {
        if let Some(transaction) = self.database {
            transaction.commit().await?;
        }
        for action in self.deferred {
            action();
        }
        Ok(())
    }

    /// Discard everything the chunk wrote
    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        if let Some(transaction) = self.database {
            transaction.rollback().await?;
        }
        Ok(())
    }

    /// [`ChunkTransaction::rollback`] for paths that already carry an error
    pub async fn discard(self) {
        if let Err(e) = self.rollback().await {
            warn!(error = %e, "Chunk transaction rollback failed");
        }
    }
}
