//! Database abstraction layer
//!
//! This module provides a trait-based abstraction over the database client,
//! so the service layer can run against PostgreSQL or a test double.

pub mod client;
pub mod postgres;
pub mod types;

// Re-export main types
pub use client::{
    Database, DatabaseClient, Instance, PoolPolicy, PoolStatus, ReadContext, Transaction,
};
pub use types::{CellValue, ColumnDef, DataType, ResultSet, Row};
