//! Database client traits
//!
//! Defines the interface the service layer expects from the underlying
//! database client. The client owns connections, session pooling and
//! transaction retries; the service layer only drives it.
//!
//! The calls here are blocking. The service layer moves them off the
//! caller's thread, see [`crate::service::AsyncBridge`].

use crate::db::types::{CellValue, ResultSet};
use crate::error::ClientResult;
use std::time::Duration;

/// Entry point of a database client, shared by every service handle
pub trait DatabaseClient: Send + Sync + 'static {
    type Instance: Instance;

    /// Project the client is configured for
    fn project(&self) -> &str;

    /// Resolve a named instance
    ///
    /// # Errors
    /// Returns `ClientError::NotFound` if the instance is unknown
    fn instance(&self, instance_id: &str) -> ClientResult<Self::Instance>;
}

/// A database server (or cluster) known to the client
pub trait Instance: Send + Sync {
    type Database: Database;

    fn instance_id(&self) -> &str;

    /// Bind a database on this instance to a session pool.
    ///
    /// Pool population is lazy: no session is opened here.
    fn database(&self, database_id: &str, pool: PoolPolicy) -> ClientResult<Self::Database>;
}

/// A logical database with its own session pool
pub trait Database: Send + Sync + 'static {
    /// Read-only view; the session is released when the value is dropped
    type Snapshot: ReadContext + Send;

    /// Read-write unit of work handed to `run_in_transaction` consumers
    type Transaction: Transaction + Send;

    /// Options passed through to `snapshot` untouched
    type SnapshotOptions: Clone + Default + Send + 'static;

    fn database_id(&self) -> &str;

    /// Check out a session and open a read-only snapshot on it
    ///
    /// # Errors
    /// Returns `ClientError::SessionQueueEmpty` when no session became
    /// available within the pool's wait policy
    fn snapshot(&self, options: Self::SnapshotOptions) -> ClientResult<Self::Snapshot>;

    /// End a snapshot and return its session to the pool before this call
    /// returns. Dropping a snapshot also releases it, but possibly later.
    fn release_snapshot(&self, snapshot: Self::Snapshot) {
        drop(snapshot);
    }

    /// Run `work` in a read-write transaction, re-invoking it when the
    /// transaction aborts, according to the client's own retry policy.
    ///
    /// # Errors
    /// Returns `ClientError::SessionQueueEmpty` on pool exhaustion and
    /// `ClientError::Aborted` once the retry budget is spent. Errors
    /// returned by `work` are passed back unchanged.
    fn run_in_transaction<T, F>(&self, work: F) -> ClientResult<T>
    where
        F: FnMut(&mut Self::Transaction) -> ClientResult<T>;

    /// Current session pool occupancy
    fn pool_status(&self) -> PoolStatus;

    /// Stop handing out sessions and drop idle ones
    fn close(&self) {}
}

/// Anything that can run a read query
pub trait ReadContext {
    /// Execute `sql` with positional parameters (`$1`, `$2`, ...)
    fn execute_sql(&mut self, sql: &str, params: &[CellValue]) -> ClientResult<ResultSet>;
}

/// Read-write context inside `Database::run_in_transaction`
pub trait Transaction: ReadContext {
    /// Execute a DML statement, returning the number of affected rows
    fn execute_update(&mut self, sql: &str, params: &[CellValue]) -> ClientResult<u64>;
}

/// How the session pool of a database is sized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolPolicy {
    /// Whatever the client does by default
    #[default]
    ClientDefault,
    /// Fixed capacity; `session_request_timeout` bounds the wait for a
    /// free session (`None` waits indefinitely)
    Fixed {
        size: usize,
        session_request_timeout: Option<Duration>,
    },
}

/// Snapshot of a session pool's occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Configured capacity
    pub max_size: usize,
    /// Sessions currently open
    pub size: usize,
    /// Open sessions not checked out
    pub available: usize,
    /// Callers waiting for a session
    pub waiting: usize,
}
