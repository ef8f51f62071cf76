//! Database service handle
//!
//! A [`DatabaseServiceHandle`] owns the session pool of one database and
//! exposes read (snapshot) and read-write (transaction) execution. The async
//! entry points return immediately; the work runs on the [`AsyncBridge`].

use crate::db::{CellValue, Database, DatabaseClient, Instance, PoolStatus, ReadContext, ResultSet};
use crate::error::{ClientError, ClientResult, ServiceError, ServiceResult};
use crate::service::bridge::{AsyncBridge, PendingOperation};
use crate::service::config::ServiceConfig;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Database type reached through client `C`
pub type DatabaseOf<C> = <<C as DatabaseClient>::Instance as Instance>::Database;

/// Snapshot type handed to `run_in_snapshot` consumers
pub type SnapshotOf<C> = <DatabaseOf<C> as Database>::Snapshot;

/// Transaction type handed to `run_in_transaction` consumers
pub type TransactionOf<C> = <DatabaseOf<C> as Database>::Transaction;

/// Snapshot options accepted by client `C`
pub type SnapshotOptionsOf<C> = <DatabaseOf<C> as Database>::SnapshotOptions;

/// Pooled access to one logical database.
///
/// The pool and database binding never change after construction. A handle
/// is `Ready` until [`close`](Self::close) moves it to `Closed`.
pub struct DatabaseServiceHandle<C: DatabaseClient> {
    config: ServiceConfig,
    database: Arc<DatabaseOf<C>>,
    bridge: Arc<AsyncBridge>,
    closed: AtomicBool,
}

impl<C: DatabaseClient> DatabaseServiceHandle<C> {
    /// Resolve the configured instance and database through `client`.
    ///
    /// If `project_id` is given it must match the project the client is
    /// configured for. Sessions are opened lazily, on first use.
    ///
    /// # Errors
    /// Returns `ServiceError::Configuration` for empty ids, a project
    /// mismatch, or an instance/database the client does not know
    pub fn new(
        config: ServiceConfig,
        client: &C,
        bridge: Arc<AsyncBridge>,
        project_id: Option<&str>,
    ) -> ServiceResult<Self> {
        config.validate()?;

        if let Some(expected) = project_id {
            if expected != client.project() {
                return Err(ServiceError::Configuration(format!(
                    "project mismatch: expected '{}' but the client is configured for '{}'",
                    expected,
                    client.project()
                )));
            }
        }

        let instance = client
            .instance(&config.instance_id)
            .map_err(construction_error)?;
        let database = instance
            .database(&config.database_id, config.pool_policy())
            .map_err(construction_error)?;

        info!(
            instance = %instance.instance_id(),
            database = %database.database_id(),
            pool_size = ?config.pool_size,
            "Database service ready"
        );

        Ok(Self {
            config,
            database: Arc::new(database),
            bridge,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.database.pool_status()
    }

    /// Liveness probe: `SELECT 1` in a snapshot
    ///
    /// # Errors
    /// Same kinds as [`run_in_snapshot`](Self::run_in_snapshot)
    pub fn ping(&self) -> ServiceResult<()> {
        self.execute_sql("SELECT 1", &[]).map(|_| ())
    }

    /// Run one query in a fresh snapshot and block until it completes.
    ///
    /// Meant for short administrative queries; hot paths should use
    /// [`run_in_snapshot`](Self::run_in_snapshot).
    pub fn execute_sql(&self, query: &str, params: &[CellValue]) -> ServiceResult<ResultSet> {
        let query = query.to_string();
        let params = params.to_vec();
        self.run_in_snapshot(move |snapshot| snapshot.execute_sql(&query, &params))
            .wait()
    }

    /// [`run_in_snapshot_with`](Self::run_in_snapshot_with) using default options
    pub fn run_in_snapshot<T, F>(&self, consumer: F) -> PendingOperation<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SnapshotOf<C>) -> ClientResult<T> + Send + 'static,
    {
        self.run_in_snapshot_with(SnapshotOptionsOf::<C>::default(), consumer)
    }

    /// Open a read-only snapshot with `options` and call `consumer` on it
    /// exactly once. The snapshot is released before the operation resolves
    /// when the consumer returns or fails, and during unwinding if it panics.
    ///
    /// Returns without blocking. Pool exhaustion resolves to
    /// `ServiceError::SessionUnavailable`.
    pub fn run_in_snapshot_with<T, F>(
        &self,
        options: SnapshotOptionsOf<C>,
        consumer: F,
    ) -> PendingOperation<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SnapshotOf<C>) -> ClientResult<T> + Send + 'static,
    {
        if self.is_closed() {
            return PendingOperation::ready(Err(ServiceError::Closed));
        }
        let database = Arc::clone(&self.database);
        self.bridge.run_as_non_blocking(move || {
            let mut snapshot = database.snapshot(options)?;
            let result = consumer(&mut snapshot);
            database.release_snapshot(snapshot);
            result
        })
    }

    /// Run `work` in a read-write transaction through the client's retrying
    /// runner, which may call it more than once.
    ///
    /// Returns without blocking. Pool exhaustion resolves to
    /// `ServiceError::SessionUnavailable`, an exhausted retry budget to
    /// `ServiceError::TransactionTimeout`. Other errors from `work` come
    /// back unchanged.
    pub fn run_in_transaction<T, F>(&self, work: F) -> PendingOperation<T>
    where
        T: Send + 'static,
        F: FnMut(&mut TransactionOf<C>) -> ClientResult<T> + Send + 'static,
    {
        if self.is_closed() {
            return PendingOperation::ready(Err(ServiceError::Closed));
        }
        let database = Arc::clone(&self.database);
        self.bridge
            .run_as_non_blocking(move || database.run_in_transaction(work))
    }

    /// Close the pool. Calls in flight finish; new calls fail with
    /// `ServiceError::Closed`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.database.close();
        debug!(
            instance = %self.config.instance_id,
            database = %self.config.database_id,
            "Database service closed"
        );
    }
}

impl<C: DatabaseClient> fmt::Debug for DatabaseServiceHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseServiceHandle")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn construction_error(err: ClientError) -> ServiceError {
    match err {
        ClientError::NotFound(what) => {
            ServiceError::Configuration(format!("{} does not exist", what))
        }
        other => ServiceError::Client(other),
    }
}
