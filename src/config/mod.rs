//! Configuration management
//!
//! Handles loading instance profiles and service settings.

pub mod instances;
pub mod settings;

pub use instances::{InstanceConfig, SslMode, load_instances};
pub use settings::{BridgeSettings, Settings, TransactionSettings, load_settings};
