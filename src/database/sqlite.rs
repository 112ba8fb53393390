use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::database::{
    boxed, eager_load, select_columns, Dialect, Driver, DriverRecord, EntityDefinition,
    EntityStore, RelatedSource,
};
use crate::error::{DriverError, DriverResult};
use crate::query::filter::{Predicate, WhereClause};
use crate::query::options::{DriverOptions, IncludeOption};
use crate::query::sql::{SqlRenderer, Statement};
use crate::query::Record;
use crate::schema::definitions::ColumnType;

/// SQLite implementation of the driver interface
#[derive(Clone)]
pub struct SqliteDriver {
    pool: Arc<SqlitePool>,
    definitions: Arc<DashMap<String, EntityDefinition>>,
    renderer: SqlRenderer,
}

impl SqliteDriver {
    /// Create a new SQLite driver from a configuration
    pub async fn connect(config: &DatabaseConfig) -> DriverResult<Self> {
        let url = &config.url;

        // Ensure the directory exists if file-based
        if let Some(path) = database_path(url) {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DriverError::new(format!(
                        "Failed to create directory for SQLite database: {}",
                        e
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DriverError::new(format!("invalid SQLite url {url}: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        // every connection to :memory: opens its own database
        let max_connections = if database_path(url).is_none() {
            1
        } else {
            config.pool.max_connections
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(config.pool.min_connections.min(max_connections))
            .idle_timeout(Duration::from_secs(config.pool.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(config.pool.max_lifetime_seconds))
            .acquire_timeout(Duration::from_secs(config.pool.acquire_timeout_seconds))
            .connect_with(options)
            .await
            .map_err(|e| DriverError::new(format!("connection error: {}", e)))?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
            definitions: Arc::new(DashMap::new()),
            renderer: SqlRenderer::new(Dialect::Sqlite),
        }
    }

    async fn execute_ddl(&self, sql: &str) -> DriverResult<()> {
        debug!(sql, "executing");
        sqlx::query(sql)
            .execute(&*self.pool)
            .await
            .map_err(|e| query_error(sql, e))?;
        Ok(())
    }
}

/// File path of a `sqlite:` url; `None` for in-memory databases
fn database_path(url: &str) -> Option<&str> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.contains(":memory:") || path.contains("mode=memory") {
        None
    } else {
        Some(path)
    }
}

fn query_error(sql: &str, err: sqlx::Error) -> DriverError {
    let parent = match &err {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    };
    DriverError::with_sql(format!("query error: {}", err), sql, Some(parent))
}

/// Bind JSON values in order; arrays and objects are stored as JSON text
fn bind_all<'q>(statement: &'q Statement) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    let mut query = sqlx::query(&statement.sql);
    for param in &statement.params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

/// Decode a row into plain JSON values, reading BOOLEAN columns as booleans
fn decode_row(row: &SqliteRow) -> DriverResult<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let index = column.ordinal();
        let declared = column.type_info().name().to_ascii_uppercase();
        let decode_error =
            |e: sqlx::Error| DriverError::new(format!("Failed to decode column {}: {}", column.name(), e));

        let raw = row.try_get_raw(index).map_err(decode_error)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" | "BOOLEAN" | "INT8" => {
                    let i: i64 = row.try_get(index).map_err(decode_error)?;
                    if declared == "BOOLEAN" {
                        Value::Bool(i != 0)
                    } else {
                        Value::from(i)
                    }
                }
                "REAL" => Value::from(row.try_get::<f64, _>(index).map_err(decode_error)?),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get(index).map_err(decode_error)?;
                    Value::from(bytes)
                }
                _ => Value::String(row.try_get::<String, _>(index).map_err(decode_error)?),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

/// SQLite stores booleans as integers; read them back per the declared column type
fn restore_booleans(definition: &EntityDefinition, record: &mut Record) {
    for column in &definition.columns {
        if column.definition.column_type != ColumnType::Boolean {
            continue;
        }
        if let Some(value) = record.get_mut(&column.name) {
            if let Some(i) = value.as_i64() {
                *value = Value::Bool(i != 0);
            }
        }
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn authenticate(&self) -> DriverResult<()> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| query_error("SELECT 1", e))?;
        Ok(())
    }

    async fn define_entity(&self, definition: EntityDefinition) -> DriverResult<Arc<dyn EntityStore>> {
        let store = SqliteStore {
            definition: definition.clone(),
            pool: self.pool.clone(),
            definitions: self.definitions.clone(),
            renderer: self.renderer,
        };
        self.definitions.insert(definition.name.clone(), definition);
        Ok(Arc::new(store))
    }

    async fn sync(&self, force: bool, alter: bool) -> DriverResult<()> {
        if alter {
            warn!("alter sync is not supported by the SQLite driver, only missing tables are created");
        }
        let definitions: Vec<EntityDefinition> =
            self.definitions.iter().map(|entry| entry.value().clone()).collect();
        for definition in &definitions {
            if force {
                self.execute_ddl(&self.renderer.drop_table(&definition.name)?).await?;
            }
            for statement in self.renderer.create_table(definition, true)? {
                self.execute_ddl(&statement).await?;
            }
        }
        info!(tables = definitions.len(), force, "SQLite schema synchronized");
        Ok(())
    }

    async fn raw_query(&self, sql: &str) -> DriverResult<Vec<Record>> {
        let rows = sqlx::query(sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| query_error(sql, e))?;
        rows.iter().map(decode_row).collect()
    }
}

/// Rows of one SQLite table
struct SqliteStore {
    definition: EntityDefinition,
    pool: Arc<SqlitePool>,
    definitions: Arc<DashMap<String, EntityDefinition>>,
    renderer: SqlRenderer,
}

impl SqliteStore {
    /// Run a statement returning rows of `table`
    async fn fetch(&self, statement: &Statement, table: &str) -> DriverResult<Vec<Record>> {
        debug!(sql = %statement.sql, params = statement.params.len(), "executing");
        let rows = bind_all(statement)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| query_error(&statement.sql, e))?;
        let mut records = rows.iter().map(decode_row).collect::<DriverResult<Vec<_>>>()?;
        if let Some(definition) = self.definitions.get(table) {
            records.iter_mut().for_each(|record| restore_booleans(&definition, record));
        }
        Ok(records)
    }

    async fn execute(&self, statement: &Statement) -> DriverResult<u64> {
        debug!(sql = %statement.sql, params = statement.params.len(), "executing");
        let result = bind_all(statement)
            .execute(&*self.pool)
            .await
            .map_err(|e| query_error(&statement.sql, e))?;
        Ok(result.rows_affected())
    }

    /// Data restricted to declared columns
    fn known_columns(&self, data: &Record) -> Record {
        data.iter()
            .filter(|(column, _)| self.definition.column(column).is_some())
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    /// Select options also selecting the join columns of every include
    fn with_join_columns(options: &DriverOptions) -> DriverOptions {
        let mut select = options.clone();
        if let Some(attributes) = select.attributes.as_mut().filter(|a| !a.is_empty()) {
            for include in &options.include {
                if !attributes.contains(&include.source_key) {
                    attributes.push(include.source_key.clone());
                }
            }
        }
        select
    }

    async fn load(&self, options: &DriverOptions) -> DriverResult<Vec<Record>> {
        let statement = self
            .renderer
            .select(&self.definition.name, &Self::with_join_columns(options))?;
        let mut rows = self.fetch(&statement, &self.definition.name).await?;
        eager_load(self, &mut rows, &options.include).await?;
        Ok(rows
            .into_iter()
            .map(|row| select_columns(row, options))
            .collect())
    }
}

#[async_trait]
impl RelatedSource for SqliteStore {
    async fn fetch_related(&self, include: &IncludeOption, keys: &[Value]) -> DriverResult<Vec<Record>> {
        let statement = self.renderer.select_related(
            &include.target,
            &include.target_key,
            keys,
            include.where_clause.as_ref(),
        )?;
        self.fetch(&statement, &include.target).await
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    fn name(&self) -> &str {
        &self.definition.name
    }

    async fn find_all(&self, options: &DriverOptions) -> DriverResult<Vec<Box<dyn DriverRecord>>> {
        Ok(self.load(options).await?.into_iter().map(boxed).collect())
    }

    async fn find_by_id(
        &self,
        id: &Value,
        options: &DriverOptions,
    ) -> DriverResult<Option<Box<dyn DriverRecord>>> {
        let mut predicates = match &options.where_clause {
            Some(clause) => clause
                .predicates()
                .map_err(|e| DriverError::new(e.to_string()))?,
            None => Vec::new(),
        };
        predicates.push(Predicate::eq(self.definition.primary_key(), id.clone()));
        let by_id = DriverOptions {
            where_clause: Some(WhereClause::Predicates(predicates)),
            max: Some(1),
            start: None,
            ..options.clone()
        };
        Ok(self.load(&by_id).await?.into_iter().next().map(boxed))
    }

    async fn count(&self, options: &DriverOptions) -> DriverResult<u64> {
        let statement =
            self.renderer
                .count(&self.definition.name, self.definition.primary_key(), options)?;
        let rows = self.fetch(&statement, "").await?;
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(count)
    }

    async fn create(
        &self,
        data: &Record,
        options: &DriverOptions,
    ) -> DriverResult<Box<dyn DriverRecord>> {
        let data = self.known_columns(data);
        let statement = self
            .renderer
            .insert(&self.definition.name, &data, true)?;
        let created = self
            .fetch(&statement, &self.definition.name)
            .await?
            .into_iter()
            .next();
        let created = created.ok_or_else(|| {
            DriverError::with_sql("insert returned no row", statement.sql.clone(), None)
        })?;
        Ok(boxed(select_columns(created, options)))
    }

    async fn update(
        &self,
        data: &Record,
        options: &DriverOptions,
    ) -> DriverResult<(u64, Vec<Box<dyn DriverRecord>>)> {
        let data = self.known_columns(data);
        if data.is_empty() {
            // Nothing to assign: matching rows are reported unchanged.
            let matching = DriverOptions {
                where_clause: options.where_clause.clone(),
                ..Default::default()
            };
            let statement = self.renderer.select(&self.definition.name, &matching)?;
            let rows = self.fetch(&statement, &self.definition.name).await?;
            let affected = rows.len() as u64;
            let returned = if options.returning {
                rows.into_iter().map(boxed).collect()
            } else {
                Vec::new()
            };
            return Ok((affected, returned));
        }
        let statement = self.renderer.update(&self.definition.name, &data, options)?;
        if options.returning {
            let rows = self.fetch(&statement, &self.definition.name).await?;
            Ok((rows.len() as u64, rows.into_iter().map(boxed).collect()))
        } else {
            Ok((self.execute(&statement).await?, Vec::new()))
        }
    }

    async fn destroy(&self, options: &DriverOptions) -> DriverResult<u64> {
        let statement = self.renderer.delete(&self.definition.name, options)?;
        self.execute(&statement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::definitions::{ColumnDefinition, MappedColumn, RelationKind};
    use serde_json::json;

    fn column(name: &str, column_type: ColumnType) -> MappedColumn {
        MappedColumn {
            name: name.into(),
            definition: ColumnDefinition {
                column_type,
                allow_null: true,
                unique: false,
                default_value: None,
                auto_increment: false,
                primary_key: false,
            },
        }
    }

    fn id_column() -> MappedColumn {
        let mut id = column("id", ColumnType::Integer { precision: None });
        id.definition.primary_key = true;
        id.definition.auto_increment = true;
        id
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn driver() -> SqliteDriver {
        let driver = SqliteDriver::connect(&DatabaseConfig::default()).await.unwrap();
        driver.authenticate().await.unwrap();
        driver
    }

    #[test]
    fn test_database_path() {
        assert_eq!(database_path("sqlite::memory:"), None);
        assert_eq!(database_path("sqlite://data/app.db"), Some("data/app.db"));
        assert_eq!(database_path("sqlite:app.db?mode=rwc"), Some("app.db"));
    }

    #[tokio::test]
    async fn test_crud_round() {
        let driver = driver().await;
        let users = driver
            .define_entity(EntityDefinition {
                name: "user".into(),
                columns: vec![
                    id_column(),
                    column("name", ColumnType::String { size: Some(50) }),
                    column("active", ColumnType::Boolean),
                ],
                indexes: Vec::new(),
            })
            .await
            .unwrap();
        driver.sync(true, false).await.unwrap();

        let none = DriverOptions::default();
        let created = users
            .create(&record(json!({"name": "ada", "active": true, "extra": 1})), &none)
            .await
            .unwrap()
            .get_plain();
        assert_eq!(created, record(json!({"id": 1, "name": "ada", "active": true})));
        users
            .create(&record(json!({"name": "grace", "active": false})), &none)
            .await
            .unwrap();

        let active = DriverOptions {
            where_clause: Some(WhereClause::Predicates(vec![Predicate::eq("active", json!(true))])),
            ..Default::default()
        };
        assert_eq!(users.count(&active).await.unwrap(), 1);

        let by_id = DriverOptions {
            where_clause: Some(WhereClause::id(json!(2))),
            returning: true,
            ..Default::default()
        };
        let (affected, rows) = users
            .update(&record(json!({"name": "hopper"})), &by_id)
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(rows[0].get_plain()["name"], json!("hopper"));

        let (affected, rows) = users
            .update(&record(json!({"unknown": 1})), &by_id)
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(rows[0].get_plain()["name"], json!("hopper"));

        let found = users.find_by_id(&json!(2), &none).await.unwrap().unwrap();
        assert_eq!(found.get_plain()["active"], json!(false));

        assert_eq!(users.destroy(&by_id).await.unwrap(), 1);
        assert_eq!(users.count(&none).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_includes_and_errors() {
        let driver = driver().await;
        let users = driver
            .define_entity(EntityDefinition {
                name: "user".into(),
                columns: vec![id_column(), column("name", ColumnType::String { size: None })],
                indexes: Vec::new(),
            })
            .await
            .unwrap();
        let posts = driver
            .define_entity(EntityDefinition {
                name: "post".into(),
                columns: vec![
                    id_column(),
                    column("userId", ColumnType::Integer { precision: None }),
                    column("title", ColumnType::String { size: None }),
                ],
                indexes: Vec::new(),
            })
            .await
            .unwrap();
        driver.sync(false, false).await.unwrap();

        let none = DriverOptions::default();
        for name in ["ada", "grace"] {
            users.create(&record(json!({"name": name})), &none).await.unwrap();
        }
        for title in ["one", "two"] {
            posts
                .create(&record(json!({"userId": 1, "title": title})), &none)
                .await
                .unwrap();
        }

        let options = DriverOptions {
            include: vec![IncludeOption {
                alias: "posts".into(),
                target: "post".into(),
                kind: RelationKind::HasMany,
                source_key: "id".into(),
                target_key: "userId".into(),
                required: true,
                where_clause: None,
                attributes: None,
            }],
            attributes: Some(vec!["name".into()]),
            ..Default::default()
        };
        let rows = users.find_all(&options).await.unwrap();
        assert_eq!(rows.len(), 1);
        let ada = rows[0].get_plain();
        assert_eq!(ada["name"], json!("ada"));
        assert!(ada.get("id").is_none());
        assert_eq!(ada["posts"].as_array().unwrap().len(), 2);

        let count_options = DriverOptions {
            distinct: true,
            attributes: None,
            ..options
        };
        assert_eq!(users.count(&count_options).await.unwrap(), 1);

        let err = driver.raw_query("SELECT * FROM missing").await.unwrap_err();
        assert!(err.has_sql_diagnostic());
        assert_eq!(err.sql.as_deref(), Some("SELECT * FROM missing"));
    }
}
