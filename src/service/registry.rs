//! Process-wide registry of database service handles
//!
//! Handles are keyed by the fingerprint of their [`ServiceConfig`]: every
//! lookup of an equal config returns the same handle, so one session pool
//! exists per distinct config for the lifetime of the registry.

use crate::db::DatabaseClient;
use crate::error::{ServiceError, ServiceResult};
use crate::service::bridge::AsyncBridge;
use crate::service::config::{Fingerprint, ServiceConfig};
use crate::service::handle::DatabaseServiceHandle;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub struct ServiceRegistry<C: DatabaseClient> {
    client: Arc<C>,
    bridge: Arc<AsyncBridge>,
    /// Project every handle must be created for, if pinned
    project_id: Option<String>,
    handles: RwLock<HashMap<Fingerprint, Arc<DatabaseServiceHandle<C>>>>,
    /// Serializes handle construction so a pool is never built twice
    construction: Mutex<()>,
    closed: AtomicBool,
}

impl<C: DatabaseClient> ServiceRegistry<C> {
    pub fn new(client: Arc<C>, bridge: Arc<AsyncBridge>) -> Self {
        Self {
            client,
            bridge,
            project_id: None,
            handles: RwLock::new(HashMap::new()),
            construction: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Pin the project id handles are validated against
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn bridge(&self) -> &Arc<AsyncBridge> {
        &self.bridge
    }

    /// Return the handle for `config`, building it on first request.
    ///
    /// Concurrent callers with equal configs all receive the same handle
    /// and only one of them constructs it. Lookups of existing handles do
    /// not contend with each other. A handle closed through
    /// [`DatabaseServiceHandle::close`] is replaced by a fresh one.
    ///
    /// # Errors
    /// Returns `ServiceError::Configuration` for an invalid config or one
    /// the client cannot resolve, and `ServiceError::Closed` after
    /// [`shutdown`](Self::shutdown). Nothing is cached on failure.
    pub fn get_or_create(
        &self,
        config: &ServiceConfig,
    ) -> ServiceResult<Arc<DatabaseServiceHandle<C>>> {
        config.validate()?;
        if self.closed.load(Ordering::Acquire) {
            return Err(ServiceError::Closed);
        }

        let key = config.fingerprint();
        if let Some(handle) = self.live_handle(&key) {
            return Ok(handle);
        }

        let _guard = self.construction.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(ServiceError::Closed);
        }
        if let Some(handle) = self.live_handle(&key) {
            return Ok(handle);
        }

        debug!(config = %config, fingerprint = %key, "Creating database service");
        let handle = Arc::new(
            DatabaseServiceHandle::new(
                config.clone(),
                self.client.as_ref(),
                Arc::clone(&self.bridge),
                self.project_id.as_deref(),
            )
            .inspect_err(|e| warn!(config = %config, error = %e, "Database service rejected"))?,
        );
        self.handles.write().insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Cached handle for `key`, unless it has been closed since
    fn live_handle(&self, key: &Fingerprint) -> Option<Arc<DatabaseServiceHandle<C>>> {
        self.handles
            .read()
            .get(key)
            .filter(|handle| !handle.is_closed())
            .map(Arc::clone)
    }

    /// Shorthand for [`get_or_create`](Self::get_or_create)
    pub fn get(
        &self,
        instance_id: &str,
        database_id: &str,
        pool_size: Option<usize>,
        session_request_timeout: Option<u64>,
    ) -> ServiceResult<Arc<DatabaseServiceHandle<C>>> {
        self.get_or_create(&ServiceConfig {
            instance_id: instance_id.to_string(),
            database_id: database_id.to_string(),
            pool_size,
            session_request_timeout,
        })
    }

    /// Number of cached handles
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the bridge, then close every handle's pool.
    ///
    /// Calls already scheduled get up to `BridgeSettings::drain_timeout` to
    /// finish, and this blocks until they do. Later lookups fail with
    /// `ServiceError::Closed`, as do new calls on handles already given out.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.construction.lock();
        let handles: Vec<_> = self.handles.write().drain().map(|(_, h)| h).collect();
        self.bridge.shutdown();
        for handle in &handles {
            handle.close();
        }
        info!(services = handles.len(), "Service registry shut down");
    }
}

impl<C: DatabaseClient> fmt::Debug for ServiceRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("project_id", &self.project_id)
            .field("services", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
