//! PostgreSQL database client
//!
//! Concrete client using tokio-postgres, with a deadpool session pool per
//! database. An instance is a named server profile; a database is one
//! `dbname` on it.
//!
//! The trait methods block. They drive the async driver through a tokio
//! runtime handle, so they must run on a thread that is not executing async
//! tasks itself (a `spawn_blocking` thread, or a plain OS thread).

use crate::config::{InstanceConfig, SslMode, TransactionSettings};
use crate::db::client::{
    Database, DatabaseClient, Instance, PoolPolicy, PoolStatus, ReadContext, Transaction,
};
use crate::db::types::{CellValue, ColumnDef, DataType, ResultSet, Row};
use crate::error::{ClientError, ClientResult};
use bytes::BytesMut;
use deadpool_postgres::{
    Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::error::Error;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tracing::{debug, warn};

/// Backoff policy of the transaction runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&TransactionSettings::default())
    }
}

impl From<&TransactionSettings> for RetryPolicy {
    fn from(settings: &TransactionSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: settings.initial_backoff(),
            max_backoff: settings.max_backoff(),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based), doubling each time
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Options for opening a read-only snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotOptions {
    pub isolation: SnapshotIsolation,
}

/// Isolation used for read-only snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotIsolation {
    /// Consistent view as of the first query
    #[default]
    RepeatableRead,
    /// Waits until a serializable view is available, then never fails
    /// with a serialization error
    SerializableDeferrable,
}

impl SnapshotOptions {
    pub fn serializable_deferrable() -> Self {
        Self {
            isolation: SnapshotIsolation::SerializableDeferrable,
        }
    }

    fn begin_statement(&self) -> &'static str {
        match self.isolation {
            SnapshotIsolation::RepeatableRead => {
                "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY"
            }
            SnapshotIsolation::SerializableDeferrable => {
                "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY DEFERRABLE"
            }
        }
    }
}

/// PostgreSQL client shared by all service handles of a process
pub struct PgClient {
    project: String,
    instances: HashMap<String, InstanceConfig>,
    retry: RetryPolicy,
    runtime: Handle,
}

impl PgClient {
    /// Create a client over the given instance profiles.
    ///
    /// `runtime` drives connection I/O and pool timeouts; it must have
    /// both the I/O and time drivers enabled.
    pub fn new(
        project: impl Into<String>,
        instances: Vec<InstanceConfig>,
        retry: RetryPolicy,
        runtime: Handle,
    ) -> Self {
        Self {
            project: project.into(),
            instances: instances
                .into_iter()
                .map(|instance| (instance.name.clone(), instance))
                .collect(),
            retry,
            runtime,
        }
    }
}

impl DatabaseClient for PgClient {
    type Instance = PgInstance;

    fn project(&self) -> &str {
        &self.project
    }

    fn instance(&self, instance_id: &str) -> ClientResult<PgInstance> {
        let config = self
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("instance '{}'", instance_id)))?;
        Ok(PgInstance {
            config,
            retry: self.retry,
            runtime: self.runtime.clone(),
        })
    }
}

/// A configured PostgreSQL server
pub struct PgInstance {
    config: InstanceConfig,
    retry: RetryPolicy,
    runtime: Handle,
}

impl Instance for PgInstance {
    type Database = PgDatabase;

    fn instance_id(&self) -> &str {
        &self.config.name
    }

    fn database(&self, database_id: &str, pool: PoolPolicy) -> ClientResult<PgDatabase> {
        let pool_handle = build_pool(&self.config, database_id, pool)?;
        debug!(
            instance = %self.config.name,
            database = database_id,
            ?pool,
            "Created session pool"
        );
        Ok(PgDatabase {
            database_id: database_id.to_string(),
            pool: pool_handle,
            retry: self.retry,
            runtime: self.runtime.clone(),
        })
    }
}

/// One database on a server, with its session pool
pub struct PgDatabase {
    database_id: String,
    pool: Pool,
    retry: RetryPolicy,
    runtime: Handle,
}

impl Database for PgDatabase {
    type Snapshot = PgSnapshot;
    type Transaction = PgTransaction;
    type SnapshotOptions = SnapshotOptions;

    fn database_id(&self) -> &str {
        &self.database_id
    }

    fn snapshot(&self, options: SnapshotOptions) -> ClientResult<PgSnapshot> {
        let mut session = Session::checkout(&self.pool, &self.runtime)?;
        session.begin(options.begin_statement())?;
        Ok(PgSnapshot { session })
    }

    fn release_snapshot(&self, mut snapshot: PgSnapshot) {
        snapshot.session.rollback_quietly();
    }

    fn run_in_transaction<T, F>(&self, mut work: F) -> ClientResult<T>
    where
        F: FnMut(&mut PgTransaction) -> ClientResult<T>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut session = Session::checkout(&self.pool, &self.runtime)?;
            session.begin("BEGIN ISOLATION LEVEL SERIALIZABLE")?;
            let mut tx = PgTransaction { session };

            let outcome = work(&mut tx)
                .and_then(|value| tx.session.finish("COMMIT").map(|()| value));
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if is_contention(&err) => {
                    tx.session.rollback_quietly();
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            database = %self.database_id,
                            attempts = attempt,
                            error = %err,
                            "Transaction retry budget exhausted"
                        );
                        return Err(ClientError::Aborted(format!(
                            "gave up after {} attempts: {}",
                            attempt, err
                        )));
                    }
                    let delay = self.retry.backoff(attempt);
                    debug!(
                        database = %self.database_id,
                        attempt,
                        ?delay,
                        error = %err,
                        "Transaction aborted, retrying"
                    );
                    drop(tx);
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    tx.session.rollback_quietly();
                    return Err(err);
                }
            }
        }
    }

    fn pool_status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    fn close(&self) {
        self.pool.close();
    }
}

/// Read-only snapshot; rolled back and returned to the pool on drop
pub struct PgSnapshot {
    session: Session,
}

impl ReadContext for PgSnapshot {
    fn execute_sql(&mut self, sql: &str, params: &[CellValue]) -> ClientResult<ResultSet> {
        self.session.query(sql, params)
    }
}

/// Serializable read-write transaction
pub struct PgTransaction {
    session: Session,
}

impl ReadContext for PgTransaction {
    fn execute_sql(&mut self, sql: &str, params: &[CellValue]) -> ClientResult<ResultSet> {
        self.session.query(sql, params)
    }
}

impl Transaction for PgTransaction {
    fn execute_update(&mut self, sql: &str, params: &[CellValue]) -> ClientResult<u64> {
        self.session.execute(sql, params)
    }
}

/// A pooled connection checked out for one snapshot or transaction attempt
struct Session {
    client: Option<Object>,
    runtime: Handle,
    in_transaction: bool,
}

impl Session {
    fn checkout(pool: &Pool, runtime: &Handle) -> ClientResult<Self> {
        let client = runtime.block_on(pool.get()).map_err(pool_error)?;
        Ok(Self {
            client: Some(client),
            runtime: runtime.clone(),
            in_transaction: false,
        })
    }

    fn client(&self) -> ClientResult<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| ClientError::ConnectionFailed("session was discarded".into()))
    }

    fn begin(&mut self, statement: &str) -> ClientResult<()> {
        let client = self.client()?;
        self.runtime.block_on(client.batch_execute(statement))?;
        self.in_transaction = true;
        Ok(())
    }

    fn finish(&mut self, statement: &str) -> ClientResult<()> {
        let client = self.client()?;
        self.runtime.block_on(client.batch_execute(statement))?;
        self.in_transaction = false;
        Ok(())
    }

    /// Roll back if a transaction is open. A connection that cannot roll
    /// back is detached from the pool instead of being reused.
    fn rollback_quietly(&mut self) {
        if !self.in_transaction {
            return;
        }
        if let Err(e) = self.finish("ROLLBACK") {
            debug!(error = %e, "Rollback failed, discarding session");
            self.in_transaction = false;
            if let Some(client) = self.client.take() {
                drop(Object::take(client));
            }
        }
    }

    fn query(&self, sql: &str, params: &[CellValue]) -> ClientResult<ResultSet> {
        let client = self.client()?;
        let start = Instant::now();
        self.runtime.block_on(async {
            let stmt = client.prepare_cached(sql).await?;

            let columns: Vec<ColumnDef> = stmt
                .columns()
                .iter()
                .map(|col| ColumnDef {
                    name: col.name().to_string(),
                    data_type: pg_type_to_datatype(col.type_()),
                })
                .collect();

            let pg_rows = client.query(&stmt, &bind(params)).await?;

            let mut rows = Vec::with_capacity(pg_rows.len());
            for pg_row in &pg_rows {
                let mut values = Vec::with_capacity(columns.len());
                for (i, col_def) in columns.iter().enumerate() {
                    values.push(extract_cell_value(pg_row, i, &col_def.data_type));
                }
                rows.push(Row { values });
            }

            Ok::<_, ClientError>(ResultSet::new(columns, rows, start.elapsed()))
        })
    }

    fn execute(&self, sql: &str, params: &[CellValue]) -> ClientResult<u64> {
        let client = self.client()?;
        self.runtime.block_on(async {
            let stmt = client.prepare_cached(sql).await?;
            let affected = client.execute(&stmt, &bind(params)).await?;
            Ok::<_, ClientError>(affected)
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        // Only reached when the owner unwinds or forgets to release. Drop
        // may run on any thread, so the rollback is handed to the runtime
        // and the connection goes back to the pool once it finishes.
        if let Some(client) = self.client.take() {
            self.runtime.spawn(async move {
                let result = client.batch_execute("ROLLBACK").await;
                if let Err(e) = result {
                    warn!(error = %e, "Rollback on release failed, discarding session");
                    drop(Object::take(client));
                }
            });
        }
    }
}

fn build_pool(instance: &InstanceConfig, database: &str, policy: PoolPolicy) -> ClientResult<Pool> {
    let mut pg_config = tokio_postgres::Config::new();
    pg_config
        .host(&instance.host)
        .port(instance.port)
        .user(&instance.username)
        .dbname(database)
        .application_name("pgbridge");
    if let Some(ref pw) = instance.password {
        pg_config.password(pw);
    }
    if let Some(secs) = instance.connect_timeout_secs {
        pg_config.connect_timeout(Duration::from_secs(secs));
    }
    pg_config.ssl_mode(match instance.ssl_mode {
        SslMode::Disable => tokio_postgres::config::SslMode::Disable,
        SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
        SslMode::Require => tokio_postgres::config::SslMode::Require,
    });

    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let manager = match instance.ssl_mode {
        SslMode::Disable => {
            Manager::from_config(pg_config, tokio_postgres::NoTls, manager_config)
        }
        SslMode::Prefer | SslMode::Require => {
            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(make_tls_config());
            Manager::from_config(pg_config, tls, manager_config)
        }
    };

    let mut builder = Pool::builder(manager).runtime(Runtime::Tokio1);
    if let PoolPolicy::Fixed {
        size,
        session_request_timeout,
    } = policy
    {
        builder = builder.max_size(size).wait_timeout(session_request_timeout);
    }
    builder
        .build()
        .map_err(|e| ClientError::ConnectionFailed(format!("failed to build session pool: {}", e)))
}

fn pool_error(err: PoolError) -> ClientError {
    match err {
        // Only the wait timeout is configured, so any timeout means no
        // session was free in time.
        PoolError::Timeout(kind) => {
            ClientError::SessionQueueEmpty(format!("no session available ({:?} timeout)", kind))
        }
        PoolError::Backend(e) => ClientError::Postgres(e),
        PoolError::Closed => ClientError::ConnectionFailed("session pool is closed".into()),
        other => ClientError::ConnectionFailed(other.to_string()),
    }
}

/// Serialization failures and deadlocks are worth another attempt
fn is_contention(err: &ClientError) -> bool {
    match err {
        ClientError::Aborted(_) => true,
        ClientError::Postgres(e) => e.code().is_some_and(|code| {
            *code == SqlState::T_R_SERIALIZATION_FAILURE || *code == SqlState::T_R_DEADLOCK_DETECTED
        }),
        _ => false,
    }
}

fn bind(params: &[CellValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

type BoxError = Box<dyn Error + Sync + Send>;

/// Parameters are bound by the type the server expects for the
/// placeholder, so `Integer(1)` works for `int2`, `int4`, `int8` and
/// `numeric` columns alike.
impl ToSql for CellValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            CellValue::Null => Ok(IsNull::Yes),
            CellValue::Integer(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*v).to_sql(ty, out),
                _ if is_text(ty) => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            CellValue::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::NUMERIC => Decimal::try_from(*v)?.to_sql(ty, out),
                _ if is_text(ty) => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            CellValue::Boolean(v) if is_text(ty) => v.to_string().to_sql(ty, out),
            CellValue::Boolean(v) => v.to_sql(ty, out),
            CellValue::Text(s) | CellValue::DateTime(s) | CellValue::Uuid(s) => {
                text_to_sql(s, ty, out)
            }
            CellValue::Json(v) => match *ty {
                Type::JSON | Type::JSONB => v.to_sql(ty, out),
                _ => v.to_string().to_sql(ty, out),
            },
            CellValue::Binary(v) => v.to_sql(ty, out),
            CellValue::Array(_) => Err("array parameters are not supported".into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

/// Textual values are parsed into the placeholder's type when it is not
/// a text type.
fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::NUMERIC => s.parse::<Decimal>()?.to_sql(ty, out),
        Type::UUID => uuid::Uuid::parse_str(s)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => chrono::DateTime::parse_from_rfc3339(s)?.to_sql(ty, out),
        Type::TIMESTAMP => chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| s.parse::<chrono::NaiveDateTime>())?
            .to_sql(ty, out),
        Type::DATE => s.parse::<chrono::NaiveDate>()?.to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out),
        _ => s.to_sql(ty, out),
    }
}

/// Map tokio_postgres Type to our DataType enum
fn pg_type_to_datatype(pg_type: &Type) -> DataType {
    match *pg_type {
        Type::INT2 => DataType::SmallInt,
        Type::INT4 => DataType::Integer,
        Type::INT8 => DataType::BigInt,
        Type::FLOAT4 => DataType::Real,
        Type::FLOAT8 => DataType::Double,
        Type::NUMERIC => DataType::Numeric,
        Type::TEXT | Type::NAME => DataType::Text,
        Type::VARCHAR => DataType::Varchar(None),
        Type::CHAR | Type::BPCHAR => DataType::Char(None),
        Type::BOOL => DataType::Boolean,
        Type::DATE => DataType::Date,
        Type::TIME => DataType::Time,
        Type::TIMESTAMP => DataType::Timestamp,
        Type::TIMESTAMPTZ => DataType::TimestampTz,
        Type::INTERVAL => DataType::Interval,
        Type::JSON => DataType::Json,
        Type::JSONB => DataType::Jsonb,
        Type::BYTEA => DataType::Bytea,
        Type::UUID => DataType::Uuid,
        // Array types
        Type::BOOL_ARRAY => DataType::Array(Box::new(DataType::Boolean)),
        Type::INT2_ARRAY => DataType::Array(Box::new(DataType::SmallInt)),
        Type::INT4_ARRAY => DataType::Array(Box::new(DataType::Integer)),
        Type::INT8_ARRAY => DataType::Array(Box::new(DataType::BigInt)),
        Type::FLOAT4_ARRAY => DataType::Array(Box::new(DataType::Real)),
        Type::FLOAT8_ARRAY => DataType::Array(Box::new(DataType::Double)),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            DataType::Array(Box::new(DataType::Text))
        }
        Type::UUID_ARRAY => DataType::Array(Box::new(DataType::Uuid)),
        Type::JSONB_ARRAY => DataType::Array(Box::new(DataType::Jsonb)),
        Type::JSON_ARRAY => DataType::Array(Box::new(DataType::Json)),
        Type::NUMERIC_ARRAY => DataType::Array(Box::new(DataType::Numeric)),
        _ => DataType::Unknown(pg_type.name().to_string()),
    }
}

/// Build a rustls ClientConfig that trusts OS certificates (with Mozilla roots as fallback)
fn make_tls_config() -> rustls::ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    let loaded = native_certs
        .certs
        .into_iter()
        .filter(|cert| root_store.add(cert.clone()).is_ok())
        .count();
    if loaded == 0 {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

/// Read column `idx` as `T`, mapping NULL to `CellValue::Null` and a type
/// mismatch to the string fallback.
fn cell<'a, T>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    wrap: impl FnOnce(T) -> CellValue,
) -> CellValue
where
    T: tokio_postgres::types::FromSql<'a>,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => wrap(v),
        Ok(None) => CellValue::Null,
        Err(_) => try_as_string(row, idx),
    }
}

fn array<T>(values: Vec<T>, wrap: impl Fn(T) -> CellValue) -> CellValue {
    CellValue::Array(values.into_iter().map(wrap).collect())
}

/// Extract a cell value from a tokio_postgres Row based on the column's DataType.
fn extract_cell_value(row: &tokio_postgres::Row, idx: usize, data_type: &DataType) -> CellValue {
    match data_type {
        DataType::SmallInt => cell(row, idx, |v: i16| CellValue::Integer(v as i64)),
        DataType::Integer => cell(row, idx, |v: i32| CellValue::Integer(v as i64)),
        DataType::BigInt => cell(row, idx, CellValue::Integer),
        DataType::Real => cell(row, idx, |v: f32| CellValue::Float(v as f64)),
        DataType::Double => cell(row, idx, CellValue::Float),
        DataType::Numeric => cell(row, idx, |v: Decimal| CellValue::Text(v.to_string())),
        DataType::Boolean => cell(row, idx, CellValue::Boolean),
        DataType::Json | DataType::Jsonb => cell(row, idx, CellValue::Json),
        DataType::Bytea => cell(row, idx, CellValue::Binary),
        DataType::Uuid => cell(row, idx, |v: uuid::Uuid| CellValue::Uuid(v.to_string())),
        DataType::Timestamp => cell(row, idx, |v: chrono::NaiveDateTime| {
            CellValue::DateTime(v.to_string())
        }),
        DataType::TimestampTz => cell(row, idx, |v: chrono::DateTime<chrono::Utc>| {
            CellValue::DateTime(v.to_rfc3339())
        }),
        DataType::Date => cell(row, idx, |v: chrono::NaiveDate| {
            CellValue::DateTime(v.to_string())
        }),
        DataType::Time => cell(row, idx, |v: chrono::NaiveTime| {
            CellValue::DateTime(v.to_string())
        }),
        DataType::Array(inner) => extract_array_value(row, idx, inner),
        // Text types, intervals and anything without a direct mapping
        _ => try_as_string(row, idx),
    }
}

/// Extract an array value, falling back to the string form for element
/// types without a direct Rust mapping.
fn extract_array_value(row: &tokio_postgres::Row, idx: usize, inner: &DataType) -> CellValue {
    match inner {
        DataType::Text | DataType::Varchar(_) | DataType::Char(_) => {
            cell(row, idx, |v: Vec<String>| array(v, CellValue::Text))
        }
        DataType::SmallInt => cell(row, idx, |v: Vec<i16>| {
            array(v, |n| CellValue::Integer(n as i64))
        }),
        DataType::Integer => cell(row, idx, |v: Vec<i32>| {
            array(v, |n| CellValue::Integer(n as i64))
        }),
        DataType::BigInt => cell(row, idx, |v: Vec<i64>| array(v, CellValue::Integer)),
        DataType::Real => cell(row, idx, |v: Vec<f32>| {
            array(v, |n| CellValue::Float(n as f64))
        }),
        DataType::Double => cell(row, idx, |v: Vec<f64>| array(v, CellValue::Float)),
        DataType::Boolean => cell(row, idx, |v: Vec<bool>| array(v, CellValue::Boolean)),
        DataType::Uuid => cell(row, idx, |v: Vec<uuid::Uuid>| {
            array(v, |u| CellValue::Uuid(u.to_string()))
        }),
        DataType::Json | DataType::Jsonb => {
            cell(row, idx, |v: Vec<serde_json::Value>| array(v, CellValue::Json))
        }
        DataType::Numeric => cell(row, idx, |v: Vec<Decimal>| {
            array(v, |d| CellValue::Text(d.to_string()))
        }),
        _ => try_as_string(row, idx),
    }
}

/// Try to extract a value as a string (fallback for type mismatches).
///
/// When even the string fallback fails, includes the postgres type name
/// in the message so the caller knows what type couldn't be converted.
fn try_as_string(row: &tokio_postgres::Row, idx: usize) -> CellValue {
    match row.try_get::<_, Option<String>>(idx) {
        Ok(Some(v)) => CellValue::Text(v),
        Ok(None) => CellValue::Null,
        Err(_) => {
            let type_name = row
                .columns()
                .get(idx)
                .map_or("unknown", |c| c.type_().name());
            CellValue::Text(format!("<unable to display: {}>", type_name))
        }
    }
}
