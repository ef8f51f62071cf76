//! Database service layer
//!
//! - [`ServiceConfig`]: what identifies a service (instance, database, pool sizing)
//! - [`ServiceRegistry`]: one [`DatabaseServiceHandle`] per distinct config
//! - [`DatabaseServiceHandle`]: snapshot and transaction execution on one pool
//! - [`AsyncBridge`]: runs the blocking client calls off the caller's thread

pub mod bridge;
pub mod config;
pub mod handle;
pub mod registry;

pub use bridge::{AsyncBridge, PendingOperation};
pub use config::{Fingerprint, ServiceConfig};
pub use handle::{DatabaseOf, DatabaseServiceHandle, SnapshotOf, SnapshotOptionsOf, TransactionOf};
pub use registry::ServiceRegistry;

use crate::config::{InstanceConfig, Settings};
use crate::db::postgres::{PgClient, RetryPolicy};
use std::sync::Arc;

/// Build a registry backed by PostgreSQL.
///
/// The bridge's runtime also drives the client's connection I/O. When
/// `expected_project` is given, every handle checks it against
/// `settings.project`.
///
/// # Errors
/// Fails if the settings are invalid or the bridge runtime cannot start
pub fn postgres_registry(
    settings: &Settings,
    instances: Vec<InstanceConfig>,
    expected_project: Option<&str>,
) -> crate::Result<ServiceRegistry<PgClient>> {
    settings.validate()?;
    let bridge = Arc::new(AsyncBridge::new(&settings.bridge)?);
    let client = PgClient::new(
        settings.project.clone(),
        instances,
        RetryPolicy::from(&settings.transactions),
        bridge.handle().clone(),
    );
    let registry = ServiceRegistry::new(Arc::new(client), bridge);
    Ok(match expected_project {
        Some(project) => registry.with_project(project),
        None => registry,
    })
}
