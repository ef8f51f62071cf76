//! Common test utilities and helpers
//!
//! An in-memory [`DatabaseClient`] that counts what the service layer does
//! with it, so tests can check pool construction and snapshot release
//! without a PostgreSQL server.

#![allow(dead_code)]

use parking_lot::Mutex;
use pgbridge::config::BridgeSettings;
use pgbridge::db::{
    CellValue, ColumnDef, DataType, Database, DatabaseClient, Instance, PoolPolicy, PoolStatus,
    ReadContext, ResultSet, Row, Transaction,
};
use pgbridge::error::{ClientError, ClientResult};
use pgbridge::service::{AsyncBridge, ServiceRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Transaction attempts the fake runner makes before giving up
pub const FAKE_MAX_ATTEMPTS: usize = 3;

pub const TEST_PROJECT: &str = "test-project";

/// How the fake database responds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Healthy,
    /// Every session request times out
    PoolExhausted,
    /// Every transaction attempt aborts at commit
    AlwaysAborts,
}

/// Counters shared by every object of one fake client
#[derive(Debug)]
pub struct FakeState {
    pub databases_opened: AtomicUsize,
    pub snapshots_opened: AtomicUsize,
    pub snapshots_released: AtomicUsize,
    /// Snapshots handed back through `release_snapshot` rather than dropped
    pub snapshots_returned: AtomicUsize,
    pub transaction_attempts: AtomicUsize,
    pub databases_closed: AtomicUsize,
    behavior: Mutex<Behavior>,
}

impl FakeState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            databases_opened: AtomicUsize::new(0),
            snapshots_opened: AtomicUsize::new(0),
            snapshots_released: AtomicUsize::new(0),
            snapshots_returned: AtomicUsize::new(0),
            transaction_attempts: AtomicUsize::new(0),
            databases_closed: AtomicUsize::new(0),
            behavior: Mutex::new(Behavior::Healthy),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn behavior(&self) -> Behavior {
        *self.behavior.lock()
    }

    pub fn databases_opened(&self) -> usize {
        self.databases_opened.load(Ordering::SeqCst)
    }

    pub fn snapshots_opened(&self) -> usize {
        self.snapshots_opened.load(Ordering::SeqCst)
    }

    pub fn snapshots_released(&self) -> usize {
        self.snapshots_released.load(Ordering::SeqCst)
    }

    pub fn snapshots_returned(&self) -> usize {
        self.snapshots_returned.load(Ordering::SeqCst)
    }

    pub fn transaction_attempts(&self) -> usize {
        self.transaction_attempts.load(Ordering::SeqCst)
    }
}

pub struct FakeClient {
    project: String,
    instances: Vec<String>,
    state: Arc<FakeState>,
}

impl FakeClient {
    pub fn new(state: Arc<FakeState>) -> Self {
        Self {
            project: TEST_PROJECT.to_string(),
            instances: vec!["i1".to_string(), "i2".to_string()],
            state,
        }
    }
}

impl DatabaseClient for FakeClient {
    type Instance = FakeInstance;

    fn project(&self) -> &str {
        &self.project
    }

    fn instance(&self, instance_id: &str) -> ClientResult<FakeInstance> {
        if !self.instances.iter().any(|i| i == instance_id) {
            return Err(ClientError::NotFound(format!("instance '{}'", instance_id)));
        }
        Ok(FakeInstance {
            instance_id: instance_id.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

pub struct FakeInstance {
    instance_id: String,
    state: Arc<FakeState>,
}

impl Instance for FakeInstance {
    type Database = FakeDatabase;

    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Any database name works except `missing`
    fn database(&self, database_id: &str, pool: PoolPolicy) -> ClientResult<FakeDatabase> {
        if database_id == "missing" {
            return Err(ClientError::NotFound(format!("database '{}'", database_id)));
        }
        self.state.databases_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeDatabase {
            database_id: database_id.to_string(),
            pool,
            state: Arc::clone(&self.state),
        })
    }
}

pub struct FakeDatabase {
    database_id: String,
    pool: PoolPolicy,
    state: Arc<FakeState>,
}

impl Database for FakeDatabase {
    type Snapshot = FakeSnapshot;
    type Transaction = FakeTransaction;
    type SnapshotOptions = ();

    fn database_id(&self) -> &str {
        &self.database_id
    }

    fn snapshot(&self, _options: ()) -> ClientResult<FakeSnapshot> {
        if self.state.behavior() == Behavior::PoolExhausted {
            return Err(ClientError::SessionQueueEmpty("no session within 1s".into()));
        }
        self.state.snapshots_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSnapshot {
            state: Arc::clone(&self.state),
        })
    }

    fn release_snapshot(&self, snapshot: FakeSnapshot) {
        self.state.snapshots_returned.fetch_add(1, Ordering::SeqCst);
        drop(snapshot);
    }

    fn run_in_transaction<T, F>(&self, mut work: F) -> ClientResult<T>
    where
        F: FnMut(&mut FakeTransaction) -> ClientResult<T>,
    {
        for _ in 0..FAKE_MAX_ATTEMPTS {
            if self.state.behavior() == Behavior::PoolExhausted {
                return Err(ClientError::SessionQueueEmpty("no session within 1s".into()));
            }
            self.state.transaction_attempts.fetch_add(1, Ordering::SeqCst);
            let mut tx = FakeTransaction;
            let value = work(&mut tx)?;
            if self.state.behavior() != Behavior::AlwaysAborts {
                return Ok(value);
            }
        }
        Err(ClientError::Aborted(format!(
            "gave up after {} attempts",
            FAKE_MAX_ATTEMPTS
        )))
    }

    fn pool_status(&self) -> PoolStatus {
        let max_size = match self.pool {
            PoolPolicy::Fixed { size, .. } => size,
            PoolPolicy::ClientDefault => 10,
        };
        PoolStatus {
            max_size,
            ..PoolStatus::default()
        }
    }

    fn close(&self) {
        self.state.databases_closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts its own release on drop
pub struct FakeSnapshot {
    state: Arc<FakeState>,
}

impl ReadContext for FakeSnapshot {
    fn execute_sql(&mut self, sql: &str, params: &[CellValue]) -> ClientResult<ResultSet> {
        fake_query(sql, params)
    }
}

impl Drop for FakeSnapshot {
    fn drop(&mut self) {
        self.state.snapshots_released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeTransaction;

impl ReadContext for FakeTransaction {
    fn execute_sql(&mut self, sql: &str, params: &[CellValue]) -> ClientResult<ResultSet> {
        fake_query(sql, params)
    }
}

impl Transaction for FakeTransaction {
    fn execute_update(&mut self, _sql: &str, _params: &[CellValue]) -> ClientResult<u64> {
        Ok(1)
    }
}

/// Understands `SELECT 1`, `SELECT $1` and `SLEEP <ms>`
fn fake_query(sql: &str, params: &[CellValue]) -> ClientResult<ResultSet> {
    let value = match sql.trim() {
        "SELECT 1" => CellValue::Integer(1),
        "SELECT $1" => params
            .first()
            .cloned()
            .ok_or_else(|| ClientError::QueryFailed("missing parameter $1".into()))?,
        other => match other.strip_prefix("SLEEP ") {
            Some(ms) => {
                let ms = ms
                    .parse::<u64>()
                    .map_err(|_| ClientError::QueryFailed(format!("bad sleep: {}", ms)))?;
                std::thread::sleep(Duration::from_millis(ms));
                CellValue::Integer(ms as i64)
            }
            None => return Err(ClientError::QueryFailed(format!("syntax error: {}", other))),
        },
    };
    Ok(ResultSet::new(
        vec![ColumnDef {
            name: "?column?".to_string(),
            data_type: DataType::Integer,
        }],
        vec![Row {
            values: vec![value],
        }],
        Duration::ZERO,
    ))
}

/// Bridge sized for tests
pub fn test_bridge() -> Arc<AsyncBridge> {
    Arc::new(
        AsyncBridge::new(&BridgeSettings {
            blocking_threads: 16,
            thread_name: "pgbridge-test".to_string(),
            ..BridgeSettings::default()
        })
        .expect("bridge should start"),
    )
}

/// Registry over a fresh fake client
pub fn fake_registry() -> (ServiceRegistry<FakeClient>, Arc<FakeState>) {
    let state = FakeState::new();
    let registry = ServiceRegistry::new(Arc::new(FakeClient::new(Arc::clone(&state))), test_bridge());
    (registry, state)
}
