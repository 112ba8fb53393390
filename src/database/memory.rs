//! In-process driver backed by `dashmap` tables.
//!
//! Implements the whole driver contract without a database server: filters,
//! eager loading, ordering, pagination, column constraints and id
//! generation. Every call is recorded in a [`CallLog`].

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

use crate::database::{
    boxed, eager_load, select_columns, Dialect, Driver, DriverRecord, EntityDefinition, EntityStore,
    RelatedSource,
};
use crate::error::{DriverError, DriverResult};
use crate::query::filter::{compare, matches_all, values_equal, Operator, Predicate};
use crate::query::options::{DriverOptions, IncludeOption};
use crate::query::request::Direction;
use crate::query::Record;
use crate::schema::definitions::{ColumnType, MappedColumn};

/// One driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation name, e.g. `find_all`
    pub operation: &'static str,
    /// Entity name, raw SQL, or empty for connection-level calls
    pub target: String,
}

/// Record of every call made to a [`MemoryDriver`]
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<Call>>,
}

impl CallLog {
    fn record(&self, operation: &'static str, target: impl Into<String>) {
        lock(&self.calls).push(Call {
            operation,
            target: target.into(),
        });
    }

    pub fn all(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Number of calls of `operation`
    pub fn count(&self, operation: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Operation names in call order
    pub fn operations(&self) -> Vec<&'static str> {
        lock(&self.calls).iter().map(|call| call.operation).collect()
    }

    pub fn raw_queries(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.operation == "raw_query")
            .map(|call| call.target.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.calls).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.calls).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Table {
    definition: EntityDefinition,
    rows: Vec<Record>,
    next_id: i64,
    created: bool,
}

impl Table {
    fn new(definition: EntityDefinition) -> Self {
        Self {
            definition,
            rows: Vec::new(),
            next_id: 1,
            created: false,
        }
    }

    fn primary_key(&self) -> &str {
        self.definition.primary_key()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: DashMap<String, Table>,
    calls: CallLog,
    raw_results: Mutex<VecDeque<Vec<Record>>>,
    failures: Mutex<HashMap<&'static str, DriverError>>,
}

impl MemoryState {
    /// Record the call and surface an injected failure, if any
    fn enter(&self, operation: &'static str, target: &str) -> DriverResult<()> {
        self.calls.record(operation, target);
        match lock(&self.failures).remove(operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Rows of `table` matching `predicates`, cloned out of the table
    fn select(&self, table: &str, predicates: &[Predicate]) -> DriverResult<Vec<Record>> {
        let table = self.table(table)?;
        Ok(table
            .rows
            .iter()
            .filter(|row| matches_all(predicates, row))
            .cloned()
            .collect())
    }

    fn table(&self, name: &str) -> DriverResult<dashmap::mapref::one::Ref<'_, String, Table>> {
        match self.tables.get(name) {
            Some(table) if table.created => Ok(table),
            _ => Err(DriverError::new(format!("no such table: {name}"))),
        }
    }

    fn table_mut(
        &self,
        name: &str,
    ) -> DriverResult<dashmap::mapref::one::RefMut<'_, String, Table>> {
        match self.tables.get_mut(name) {
            Some(table) if table.created => Ok(table),
            _ => Err(DriverError::new(format!("no such table: {name}"))),
        }
    }
}

/// Driver keeping every table in memory
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    state: Arc<MemoryState>,
    dialect: Dialect,
    auth_failure: Option<String>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::with_dialect(Dialect::Sqlite)
    }

    /// Driver reporting `dialect`, so dialect-specific SQL can be observed
    pub fn with_dialect(dialect: Dialect) -> Self {
        Self {
            state: Arc::new(MemoryState::default()),
            dialect,
            auth_failure: None,
        }
    }

    /// Driver whose authentication always fails with `message`
    pub fn with_auth_failure(message: impl Into<String>) -> Self {
        Self {
            auth_failure: Some(message.into()),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> &CallLog {
        &self.state.calls
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: &'static str, error: DriverError) {
        lock(&self.state.failures).insert(operation, error);
    }

    /// Queue the rows returned by the next raw query
    pub fn push_raw_result(&self, rows: Vec<Record>) {
        lock(&self.state.raw_results).push_back(rows);
    }

    /// Current rows of `entity`, in insertion order
    pub fn rows(&self, entity: &str) -> Vec<Record> {
        self.state
            .tables
            .get(entity)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn authenticate(&self) -> DriverResult<()> {
        self.state.enter("authenticate", "")?;
        match &self.auth_failure {
            Some(message) => Err(DriverError::new(message.clone())),
            None => Ok(()),
        }
    }

    async fn define_entity(&self, definition: EntityDefinition) -> DriverResult<Arc<dyn EntityStore>> {
        self.state.enter("define_entity", &definition.name)?;
        let name = definition.name.clone();
        match self.state.tables.entry(name.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().definition = definition,
            Entry::Vacant(entry) => {
                entry.insert(Table::new(definition));
            }
        }
        Ok(Arc::new(MemoryStore {
            name,
            state: self.state.clone(),
        }))
    }

    async fn sync(&self, force: bool, _alter: bool) -> DriverResult<()> {
        self.state.enter("sync", "")?;
        for mut table in self.state.tables.iter_mut() {
            if force {
                table.rows.clear();
                table.next_id = 1;
            }
            table.created = true;
        }
        debug!(tables = self.state.tables.len(), force, "memory tables synchronized");
        Ok(())
    }

    async fn raw_query(&self, sql: &str) -> DriverResult<Vec<Record>> {
        self.state.enter("raw_query", sql)?;
        Ok(lock(&self.state.raw_results).pop_front().unwrap_or_default())
    }
}

/// Rows of one in-memory table
struct MemoryStore {
    name: String,
    state: Arc<MemoryState>,
}

impl MemoryStore {
    fn predicates(options: &DriverOptions) -> DriverResult<Vec<Predicate>> {
        match &options.where_clause {
            Some(clause) => clause
                .predicates()
                .map_err(|e| DriverError::new(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    /// Rows matching the where clause and every required include
    async fn matching(&self, options: &DriverOptions) -> DriverResult<Vec<Record>> {
        let mut rows = self.state.select(&self.name, &Self::predicates(options)?)?;
        eager_load(self, &mut rows, &options.include).await?;
        Ok(rows)
    }
}

#[async_trait]
impl RelatedSource for MemoryStore {
    async fn fetch_related(&self, include: &IncludeOption, keys: &[Value]) -> DriverResult<Vec<Record>> {
        let mut predicates = vec![Predicate::new(
            include.target_key.clone(),
            Operator::In,
            Value::Array(keys.to_vec()),
        )];
        if let Some(clause) = &include.where_clause {
            predicates.extend(
                clause
                    .predicates()
                    .map_err(|e| DriverError::new(e.to_string()))?,
            );
        }
        self.state.select(&include.target, &predicates)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_all(&self, options: &DriverOptions) -> DriverResult<Vec<Box<dyn DriverRecord>>> {
        self.state.enter("find_all", &self.name)?;
        let mut rows = self.matching(options).await?;

        if !options.order.is_empty() {
            rows.sort_by(|a, b| {
                for key in &options.order {
                    let left = a.get(&key.field).unwrap_or(&Value::Null);
                    let right = b.get(&key.field).unwrap_or(&Value::Null);
                    let ordering = compare(left, right).unwrap_or(Ordering::Equal);
                    let ordering = match key.direction {
                        Direction::Asc => ordering,
                        Direction::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let start = options.start.unwrap_or(0) as usize;
        let max = options.max.map(|max| max as usize).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(start)
            .take(max)
            .map(|row| boxed(select_columns(row, options)))
            .collect())
    }

    async fn find_by_id(
        &self,
        id: &Value,
        options: &DriverOptions,
    ) -> DriverResult<Option<Box<dyn DriverRecord>>> {
        self.state.enter("find_by_id", &self.name)?;
        let primary_key = self.state.table(&self.name)?.primary_key().to_string();
        let mut predicates = Self::predicates(options)?;
        predicates.push(Predicate::eq(primary_key, id.clone()));

        let mut rows = self.state.select(&self.name, &predicates)?;
        eager_load(self, &mut rows, &options.include).await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| boxed(select_columns(row, options))))
    }

    async fn count(&self, options: &DriverOptions) -> DriverResult<u64> {
        self.state.enter("count", &self.name)?;
        Ok(self.matching(options).await?.len() as u64)
    }

    async fn create(
        &self,
        data: &Record,
        _options: &DriverOptions,
    ) -> DriverResult<Box<dyn DriverRecord>> {
        self.state.enter("create", &self.name)?;
        let mut table = self.state.table_mut(&self.name)?;
        let table = &mut *table;

        let mut row = Record::new();
        for column in &table.definition.columns {
            let def = &column.definition;
            let value = match data.get(&column.name) {
                Some(value) if !value.is_null() => value.clone(),
                _ if def.auto_increment => Value::from(table.next_id),
                _ if def.primary_key && def.column_type == ColumnType::Uuid => {
                    Value::String(Uuid::new_v4().to_string())
                }
                Some(_) => Value::Null,
                None => def.default_value.clone().unwrap_or(Value::Null),
            };
            row.insert(column.name.clone(), value);
        }
        validate(&self.name, &table.definition.columns, &table.rows, &row, None)?;

        for column in table.definition.columns.iter().filter(|c| c.definition.auto_increment) {
            if let Some(id) = row.get(&column.name).and_then(Value::as_i64) {
                table.next_id = table.next_id.max(id.saturating_add(1));
            }
        }
        table.rows.push(row.clone());
        Ok(boxed(row))
    }

    async fn update(
        &self,
        data: &Record,
        options: &DriverOptions,
    ) -> DriverResult<(u64, Vec<Box<dyn DriverRecord>>)> {
        self.state.enter("update", &self.name)?;
        let predicates = Self::predicates(options)?;
        let mut table = self.state.table_mut(&self.name)?;
        let table = &mut *table;

        // Rows are staged and only written back once every update validates.
        let mut staged = table.rows.clone();
        let mut updated = Vec::new();
        for index in 0..staged.len() {
            if !matches_all(&predicates, &staged[index]) {
                continue;
            }
            let mut row = staged[index].clone();
            for (column, value) in data {
                if table.definition.column(column).is_some() {
                    row.insert(column.clone(), value.clone());
                }
            }
            validate(&self.name, &table.definition.columns, &staged, &row, Some(index))?;
            staged[index] = row.clone();
            updated.push(row);
        }
        table.rows = staged;

        let affected = updated.len() as u64;
        let returned = if options.returning {
            updated.into_iter().map(boxed).collect()
        } else {
            Vec::new()
        };
        Ok((affected, returned))
    }

    async fn destroy(&self, options: &DriverOptions) -> DriverResult<u64> {
        self.state.enter("destroy", &self.name)?;
        let predicates = Self::predicates(options)?;
        let mut table = self.state.table_mut(&self.name)?;
        let before = table.rows.len();
        table.rows.retain(|row| !matches_all(&predicates, row));
        Ok((before - table.rows.len()) as u64)
    }
}

/// Enforce NOT NULL and UNIQUE; `skip` is the index of the row being replaced
fn validate(
    entity: &str,
    columns: &[MappedColumn],
    rows: &[Record],
    row: &Record,
    skip: Option<usize>,
) -> DriverResult<()> {
    for column in columns {
        let def = &column.definition;
        let value = row.get(&column.name).unwrap_or(&Value::Null);
        if value.is_null() {
            if !def.allow_null && !def.auto_increment {
                return Err(DriverError::new(format!(
                    "notNull violation: {entity}.{} cannot be null",
                    column.name
                )));
            }
            continue;
        }
        if def.unique || def.primary_key {
            let taken = rows.iter().enumerate().any(|(index, other)| {
                Some(index) != skip
                    && other
                        .get(&column.name)
                        .is_some_and(|existing| values_equal(existing, value))
            });
            if taken {
                return Err(DriverError::new(format!(
                    "validation error: {entity}.{} must be unique",
                    column.name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::WhereClause;
    use crate::query::options::OrderSpec;
    use crate::schema::definitions::{ColumnDefinition, RelationKind};
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
        id.definition.allow_null = false;
        id
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn users(driver: &MemoryDriver) -> Arc<dyn EntityStore> {
        let mut email = column("email", ColumnType::String { size: None });
        email.definition.unique = true;
        email.definition.allow_null = false;
        let mut role = column("role", ColumnType::String { size: None });
        role.definition.default_value = Some(json!("member"));
        let store = driver
            .define_entity(EntityDefinition {
                name: "user".into(),
                columns: vec![id_column(), email, role],
                indexes: Vec::new(),
            })
            .await
            .unwrap();
        driver.sync(false, false).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_defaults() {
        let driver = MemoryDriver::new();
        let store = users(&driver).await;
        let options = DriverOptions::default();

        let first = store
            .create(&record(json!({"email": "a@x.io", "unknown": 1})), &options)
            .await
            .unwrap()
            .get_plain();
        assert_eq!(first, record(json!({"id": 1, "email": "a@x.io", "role": "member"})));

        let second = store
            .create(&record(json!({"id": 10, "email": "b@x.io"})), &options)
            .await
            .unwrap()
            .get_plain();
        assert_eq!(second["id"], json!(10));
        let third = store
            .create(&record(json!({"email": "c@x.io"})), &options)
            .await
            .unwrap()
            .get_plain();
        assert_eq!(third["id"], json!(11));
    }

    #[tokio::test]
    async fn test_constraints() {
        let driver = MemoryDriver::new();
        let store = users(&driver).await;
        let options = DriverOptions::default();

        store.create(&record(json!({"email": "a@x.io"})), &options).await.unwrap();
        let err = store
            .create(&record(json!({"email": "a@x.io"})), &options)
            .await
            .unwrap_err();
        assert!(err.message.contains("unique"));

        let err = store.create(&Record::new(), &options).await.unwrap_err();
        assert!(err.message.contains("cannot be null"));
    }

    #[tokio::test]
    async fn test_uuid_primary_key() {
        let driver = MemoryDriver::new();
        let mut id = column("id", ColumnType::Uuid);
        id.definition.primary_key = true;
        let store = driver
            .define_entity(EntityDefinition {
                name: "token".into(),
                columns: vec![id],
                indexes: Vec::new(),
            })
            .await
            .unwrap();
        driver.sync(false, false).await.unwrap();

        let created = store.create(&Record::new(), &DriverOptions::default()).await.unwrap();
        let id = created.get_plain()["id"].as_str().unwrap().to_string();
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_find_all_orders_pages_and_projects() {
        let driver = MemoryDriver::new();
        let store = users(&driver).await;
        for email in ["c@x.io", "a@x.io", "b@x.io"] {
            store
                .create(&record(json!({"email": email})), &DriverOptions::default())
                .await
                .unwrap();
        }

        let options = DriverOptions {
            order: vec![OrderSpec {
                field: "email".into(),
                direction: Direction::Desc,
            }],
            attributes: Some(vec!["email".into()]),
            start: Some(1),
            max: Some(1),
            ..Default::default()
        };
        let rows: Vec<Record> = store
            .find_all(&options)
            .await
            .unwrap()
            .iter()
            .map(|r| r.get_plain())
            .collect();
        assert_eq!(rows, vec![record(json!({"email": "b@x.io"}))]);
    }

    #[tokio::test]
    async fn test_eager_load_and_required_include() {
        let driver = MemoryDriver::new();
        let store = users(&driver).await;
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
        store.create(&record(json!({"email": "a@x.io"})), &none).await.unwrap();
        store.create(&record(json!({"email": "b@x.io"})), &none).await.unwrap();
        for title in ["one", "two"] {
            posts
                .create(&record(json!({"userId": 1, "title": title})), &none)
                .await
                .unwrap();
        }

        let include = IncludeOption {
            alias: "posts".into(),
            target: "post".into(),
            kind: RelationKind::HasMany,
            source_key: "id".into(),
            target_key: "userId".into(),
            required: false,
            where_clause: None,
            attributes: Some(vec!["title".into()]),
        };
        let options = DriverOptions {
            include: vec![include.clone()],
            ..Default::default()
        };
        let rows = store.find_all(&options).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_plain()["posts"], json!([{"title": "one"}, {"title": "two"}]));
        assert_eq!(rows[1].get_plain()["posts"], json!([]));

        let required = DriverOptions {
            include: vec![IncludeOption {
                required: true,
                ..include
            }],
            distinct: true,
            ..Default::default()
        };
        assert_eq!(store.count(&required).await.unwrap(), 1);
        assert_eq!(store.count(&none).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_and_destroy() {
        let driver = MemoryDriver::new();
        let store = users(&driver).await;
        let none = DriverOptions::default();
        store.create(&record(json!({"email": "a@x.io"})), &none).await.unwrap();
        store.create(&record(json!({"email": "b@x.io"})), &none).await.unwrap();

        let options = DriverOptions {
            where_clause: Some(WhereClause::id(json!(2))),
            returning: true,
            ..Default::default()
        };
        let (affected, rows) = store
            .update(&record(json!({"role": "admin"})), &options)
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(rows[0].get_plain()["role"], json!("admin"));

        let (affected, rows) = store
            .update(&record(json!({"unknown": 1})), &options)
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert_eq!(rows[0].get_plain()["role"], json!("admin"));

        let err = store
            .update(&record(json!({"email": "a@x.io"})), &options)
            .await
            .unwrap_err();
        assert!(err.message.contains("unique"));

        assert_eq!(store.destroy(&options).await.unwrap(), 1);
        assert_eq!(driver.rows("user").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_rows_untouched() {
        let driver = MemoryDriver::new();
        let store = users(&driver).await;
        let none = DriverOptions::default();
        for email in ["a", "b"] {
            store
                .create(&record(json!({"email": email, "role": "m"})), &none)
                .await
                .unwrap();
        }

        let options = DriverOptions {
            where_clause: Some(WhereClause::Predicates(vec![Predicate::eq("role", json!("m"))])),
            ..Default::default()
        };
        let err = store
            .update(&record(json!({"email": "z"})), &options)
            .await
            .unwrap_err();
        assert!(err.message.contains("unique"));

        let emails: Vec<Value> = driver.rows("user").iter().map(|r| r["email"].clone()).collect();
        assert_eq!(emails, vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn test_create_after_max_id() {
        let driver = MemoryDriver::new();
        let store = users(&driver).await;
        let created = store
            .create(&record(json!({"id": i64::MAX, "email": "a"})), &DriverOptions::default())
            .await
            .unwrap();
        assert_eq!(created.get_plain()["id"], json!(i64::MAX));
    }

    #[tokio::test]
    async fn test_force_sync_clears_rows() {
        let driver = MemoryDriver::new();
        let store = users(&driver).await;
        store
            .create(&record(json!({"email": "a@x.io"})), &DriverOptions::default())
            .await
            .unwrap();
        driver.sync(true, false).await.unwrap();
        assert!(driver.rows("user").is_empty());
    }

    #[tokio::test]
    async fn test_tables_exist_only_after_sync() {
        let driver = MemoryDriver::new();
        let store = driver
            .define_entity(EntityDefinition {
                name: "user".into(),
                columns: vec![id_column()],
                indexes: Vec::new(),
            })
            .await
            .unwrap();
        let err = store.count(&DriverOptions::default()).await.unwrap_err();
        assert_eq!(err.message, "no such table: user");
    }

    #[tokio::test]
    async fn test_call_log_and_injected_failure() {
        let driver = MemoryDriver::new();
        let store = users(&driver).await;
        driver.fail_next(
            "find_all",
            DriverError::with_sql("boom", "SELECT 1", Some("disk full".into())),
        );
        let err = store.find_all(&DriverOptions::default()).await.unwrap_err();
        assert!(err.has_sql_diagnostic());
        assert!(store.find_all(&DriverOptions::default()).await.is_ok());
        assert_eq!(driver.calls().count("find_all"), 2);
        assert_eq!(
            driver.calls().operations(),
            vec!["define_entity", "sync", "find_all", "find_all"]
        );
    }
}
