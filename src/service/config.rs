//! Service configuration and fingerprints

use crate::db::PoolPolicy;
use crate::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifies one database service: which database, and how its pool is
/// sized. Two configs are equal iff every field is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub instance_id: String,
    pub database_id: String,
    /// Fixed pool capacity; `None` leaves sizing to the client
    #[serde(default)]
    pub pool_size: Option<usize>,
    /// Seconds to wait for a free session; only used with `pool_size`
    #[serde(default)]
    pub session_request_timeout: Option<u64>,
}

/// Stable hash of a config's canonical form, used as the registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl ServiceConfig {
    pub fn new(instance_id: impl Into<String>, database_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            database_id: database_id.into(),
            pool_size: None,
            session_request_timeout: None,
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size);
        self
    }

    pub fn with_session_request_timeout(mut self, secs: u64) -> Self {
        self.session_request_timeout = Some(secs);
        self
    }

    /// Check the config before anything is locked or allocated
    ///
    /// # Errors
    /// Returns `ServiceError::Configuration` for an empty instance or
    /// database id, or a zero pool size
    pub fn validate(&self) -> ServiceResult<()> {
        if self.instance_id.trim().is_empty() {
            return Err(ServiceError::Configuration(
                "instance_id must not be empty".into(),
            ));
        }
        if self.database_id.trim().is_empty() {
            return Err(ServiceError::Configuration(
                "database_id must not be empty".into(),
            ));
        }
        if self.pool_size == Some(0) {
            return Err(ServiceError::Configuration(
                "pool_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Canonical string form: every field, sorted by name, strings quoted.
    ///
    /// Field order in the struct does not affect the result, and quoting
    /// keeps ids containing separators from colliding.
    pub fn canonical(&self) -> String {
        let mut fields = [
            ("database_id", format!("{:?}", self.database_id)),
            ("instance_id", format!("{:?}", self.instance_id)),
            ("pool_size", optional(self.pool_size)),
            (
                "session_request_timeout",
                optional(self.session_request_timeout),
            ),
        ];
        fields.sort_by(|a, b| a.0.cmp(b.0));
        fields
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(xxhash_rust::xxh3::xxh3_64(self.canonical().as_bytes()))
    }

    /// Pool sizing handed to the client
    pub fn pool_policy(&self) -> PoolPolicy {
        match self.pool_size {
            Some(size) => PoolPolicy::Fixed {
                size,
                session_request_timeout: self.session_request_timeout.map(Duration::from_secs),
            },
            None => PoolPolicy::ClientDefault,
        }
    }
}

fn optional<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}

impl fmt::Display for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
