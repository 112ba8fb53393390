//! Query-options compiler and CRUD facade over pluggable SQL storage drivers.
//!
//! Declared schemas are mapped to driver column types, dialect-agnostic query
//! requests are compiled into driver options, and find results can be wrapped
//! with metadata such as the total row count.

pub mod config;
pub mod crud;
pub mod database;
pub mod error;
pub mod logging;
pub mod query;
pub mod schema;

// Re-export core types and functions
pub use config::{DatabaseConfig, PoolConfig};
pub use crud::{create, delete, find, find_by_id, update};
pub use error::{ConfigError, DriverError, DriverResult, Error, Result};
pub use logging::{init_logging, LogFormat};

// Database re-exports
pub use database::{
    DatabaseContext, Dialect, Driver, DriverRecord, EntityDefinition, EntityStore, MemoryDriver,
    SyncHooks, SyncTask,
};
#[cfg(feature = "sqlite")]
pub use database::SqliteDriver;

// Query re-exports
pub use query::{
    build_options, build_options_for_count, compose_metadata, Composed, CreateArgs, DeleteArgs,
    DriverOptions, FindByIdArgs, MetaKind, MetaRequest, Mode, QueryArgs, Record, UpdateArgs,
};

// Schema re-exports
pub use schema::{map_schema, map_type, ColumnDefinition, ColumnDescriptor, SchemaDefinition};
