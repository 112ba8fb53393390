//! Storage driver abstraction.
//!
//! A [`Driver`] is the connection to one database. Every entity defined on it
//! yields an [`EntityStore`] which executes the compiled [`DriverOptions`];
//! records come back as [`DriverRecord`]s and are normalized to plain
//! [`Record`]s by the CRUD facade.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ConfigError, DriverResult};
use crate::query::options::{DriverOptions, IncludeOption};
use crate::query::Record;
use crate::schema::definitions::{IndexDescriptor, MappedColumn, RelationKind};

pub mod context;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;


pub use context::{DatabaseContext, SyncHooks, SyncTask};
pub use memory::MemoryDriver;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;

/// Supported SQL dialects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite database
    #[default]
    Sqlite,
    /// PostgreSQL database
    Postgres,
    /// MySQL database
    MySql,
    /// Microsoft SQL Server
    Mssql,
}

impl Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Mssql => write!(f, "mssql"),
        }
    }
}

impl FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            "mssql" => Ok(Dialect::Mssql),
            other => Err(ConfigError::Invalid(format!("unsupported dialect: {other}"))),
        }
    }
}

/// Entity as handed to a driver: mapped columns plus declared indexes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub columns: Vec<MappedColumn>,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
}

impl EntityDefinition {
    /// Name of the first primary key column, `id` when none is declared
    pub fn primary_key(&self) -> &str {
        self.columns
            .iter()
            .find(|column| column.definition.primary_key)
            .map(|column| column.name.as_str())
            .unwrap_or("id")
    }

    pub fn column(&self, name: &str) -> Option<&MappedColumn> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// A record as returned by a driver
pub trait DriverRecord: Send + Sync + Debug {
    /// Detach the record into plain column values
    fn get_plain(&self) -> Record;
}

/// Driver record already holding plain values
#[derive(Debug, Clone, PartialEq)]
pub struct PlainRecord(pub Record);

impl DriverRecord for PlainRecord {
    fn get_plain(&self) -> Record {
        self.0.clone()
    }
}

/// Boxed plain record, the shape every store hands back
pub fn boxed(record: Record) -> Box<dyn DriverRecord> {
    Box::new(PlainRecord(record))
}

/// Core database connection interface
#[async_trait]
pub trait Driver: Send + Sync {
    /// Dialect spoken by this connection
    fn dialect(&self) -> Dialect;

    /// Verify the connection is usable
    async fn authenticate(&self) -> DriverResult<()>;

    /// Define (or redefine) an entity and return its store
    async fn define_entity(&self, definition: EntityDefinition) -> DriverResult<Arc<dyn EntityStore>>;

    /// Create the defined tables; `force` drops them first, `alter` adapts existing ones
    async fn sync(&self, force: bool, alter: bool) -> DriverResult<()>;

    /// Execute a native statement and return its rows
    async fn raw_query(&self, sql: &str) -> DriverResult<Vec<Record>>;
}

/// Operations on the rows of one entity
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Entity name
    fn name(&self) -> &str;

    async fn find_all(&self, options: &DriverOptions) -> DriverResult<Vec<Box<dyn DriverRecord>>>;

    async fn find_by_id(
        &self,
        id: &Value,
        options: &DriverOptions,
    ) -> DriverResult<Option<Box<dyn DriverRecord>>>;

    /// Number of base rows matching the options
    async fn count(&self, options: &DriverOptions) -> DriverResult<u64>;

    async fn create(
        &self,
        data: &Record,
        options: &DriverOptions,
    ) -> DriverResult<Box<dyn DriverRecord>>;

    /// Update matching rows; returns the affected count and, when
    /// `options.returning` is set, the updated records
    async fn update(
        &self,
        data: &Record,
        options: &DriverOptions,
    ) -> DriverResult<(u64, Vec<Box<dyn DriverRecord>>)>;

    /// Delete matching rows and return how many were removed
    async fn destroy(&self, options: &DriverOptions) -> DriverResult<u64>;
}

/// Source of related rows for eager loading
#[async_trait]
pub(crate) trait RelatedSource: Send + Sync {
    /// Rows of `include.target` whose `include.target_key` is one of `keys`,
    /// restricted by the include filter
    async fn fetch_related(&self, include: &IncludeOption, keys: &[Value]) -> DriverResult<Vec<Record>>;
}

/// Nest the related records of every include under its alias.
///
/// belongsTo and hasOne nest one object (or null), hasMany an array. Parents
/// without a related record are dropped for required includes.
pub(crate) async fn eager_load(
    source: &dyn RelatedSource,
    records: &mut Vec<Record>,
    includes: &[IncludeOption],
) -> DriverResult<()> {
    for include in includes {
        let mut keys: Vec<Value> = Vec::new();
        for record in records.iter() {
            match record.get(&include.source_key) {
                Some(key) if !key.is_null() && !keys.contains(key) => keys.push(key.clone()),
                _ => {}
            }
        }

        let related = if keys.is_empty() {
            Vec::new()
        } else {
            source.fetch_related(include, &keys).await?
        };
        let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
        for row in related {
            let key = row.get(&include.target_key).map(key_of).unwrap_or_default();
            grouped.entry(key).or_default().push(project(row, include.attributes.as_deref()));
        }

        records.retain_mut(|record| {
            let matches = record
                .get(&include.source_key)
                .filter(|key| !key.is_null())
                .and_then(|key| grouped.get(&key_of(key)))
                .cloned()
                .unwrap_or_default();
            if include.required && matches.is_empty() {
                return false;
            }
            let nested = match include.kind {
                RelationKind::HasMany => {
                    Value::Array(matches.into_iter().map(Value::Object).collect())
                }
                RelationKind::BelongsTo | RelationKind::HasOne => matches
                    .into_iter()
                    .next()
                    .map(Value::Object)
                    .unwrap_or(Value::Null),
            };
            record.insert(include.alias.clone(), nested);
            true
        });
    }
    Ok(())
}

/// Keep only the selected columns; `None` keeps every column
pub(crate) fn project(record: Record, attributes: Option<&[String]>) -> Record {
    match attributes {
        None => record,
        Some(attributes) => record
            .into_iter()
            .filter(|(column, _)| attributes.iter().any(|a| a == column))
            .collect(),
    }
}

/// Apply the selected columns to a base record, keeping nested includes
pub(crate) fn select_columns(row: Record, options: &DriverOptions) -> Record {
    match &options.attributes {
        Some(attributes) if !attributes.is_empty() => {
            let mut keep = attributes.clone();
            keep.extend(options.include.iter().map(|include| include.alias.clone()));
            project(row, Some(&keep))
        }
        _ => row,
    }
}

/// Grouping key of a join value; numbers compare by value
fn key_of(value: &Value) -> String {
    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                int.to_string()
            } else if let Some(int) = number.as_u64() {
                int.to_string()
            } else {
                number.as_f64().map(|f| f.to_string()).unwrap_or_else(|| number.to_string())
            }
        }
        Value::String(text) => format!("s:{text}"),
        other => other.to_string(),
    }
}
