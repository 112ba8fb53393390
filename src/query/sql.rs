//! Dialect-aware SQL rendering of driver options.
//!
//! # Example
//!
//! ```ignore
//! let renderer = SqlRenderer::new(Dialect::Postgres);
//! let statement = renderer.select("users", &options)?;
//! // statement.sql: SELECT * FROM "users" WHERE "email" = $1 LIMIT 10
//! ```

use serde_json::Value;

use crate::database::{Dialect, EntityDefinition};
use crate::error::{DriverError, DriverResult};
use crate::query::filter::{Operator, Predicate, WhereClause};
use crate::query::options::{DriverOptions, IncludeOption};
use crate::query::request::Direction;
use crate::query::Record;

/// Rendered SQL plus the values to bind, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Collects bind values and hands out dialect placeholders
struct Binder {
    dialect: Dialect,
    params: Vec<Value>,
}

impl Binder {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        match self.dialect {
            Dialect::Postgres => format!("${}", self.params.len()),
            Dialect::Mssql => format!("@p{}", self.params.len()),
            Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SqlRenderer {
    dialect: Dialect,
}

impl SqlRenderer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Validate and quote an identifier
    pub fn quote(&self, ident: &str) -> DriverResult<String> {
        if !is_valid_identifier(ident) {
            return Err(DriverError::new(format!("invalid identifier: {ident:?}")));
        }
        Ok(match self.dialect {
            Dialect::MySql => format!("`{ident}`"),
            Dialect::Sqlite | Dialect::Postgres | Dialect::Mssql => format!("\"{ident}\""),
        })
    }

    pub fn select(&self, table: &str, options: &DriverOptions) -> DriverResult<Statement> {
        let mut binder = Binder::new(self.dialect);
        let columns = match &options.attributes {
            Some(attributes) if !attributes.is_empty() => self.column_list(attributes)?,
            _ => "*".to_string(),
        };
        let mut sql = format!("SELECT {columns} FROM {}", self.quote(table)?);
        self.append_where(&mut sql, &mut binder, table, options)?;
        self.append_order(&mut sql, options)?;
        self.append_limit_offset(&mut sql, options);
        Ok(binder.finish(sql))
    }

    pub fn count(
        &self,
        table: &str,
        primary_key: &str,
        options: &DriverOptions,
    ) -> DriverResult<Statement> {
        let mut binder = Binder::new(self.dialect);
        let counted = if options.distinct {
            format!("DISTINCT {}.{}", self.quote(table)?, self.quote(primary_key)?)
        } else {
            "*".to_string()
        };
        let mut sql = format!("SELECT COUNT({counted}) AS count FROM {}", self.quote(table)?);
        self.append_where(&mut sql, &mut binder, table, options)?;
        Ok(binder.finish(sql))
    }

    /// Select the rows of `table` whose `column` is one of `keys`
    pub fn select_related(
        &self,
        table: &str,
        column: &str,
        keys: &[Value],
        filter: Option<&WhereClause>,
    ) -> DriverResult<Statement> {
        let options = DriverOptions {
            where_clause: Some(WhereClause::Predicates(vec![Predicate::new(
                column,
                Operator::In,
                Value::Array(keys.to_vec()),
            )])),
            ..Default::default()
        };
        let mut binder = Binder::new(self.dialect);
        let mut sql = format!("SELECT * FROM {}", self.quote(table)?);
        self.append_where(&mut sql, &mut binder, table, &options)?;
        if let Some(filter) = filter {
            let fragment = self.render_clause(filter, &mut binder)?;
            if let Some(fragment) = fragment {
                sql.push_str(" AND ");
                sql.push_str(&fragment);
            }
        }
        Ok(binder.finish(sql))
    }

    pub fn insert(&self, table: &str, data: &Record, returning: bool) -> DriverResult<Statement> {
        let mut binder = Binder::new(self.dialect);
        let table = self.quote(table)?;
        let mut sql = if data.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let columns: Vec<String> = data
                .keys()
                .map(|column| self.quote(column))
                .collect::<DriverResult<_>>()?;
            let values: Vec<String> = data.values().map(|v| binder.bind(v.clone())).collect();
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                values.join(", ")
            )
        };
        self.append_returning(&mut sql, returning);
        Ok(binder.finish(sql))
    }

    pub fn update(
        &self,
        table: &str,
        data: &Record,
        options: &DriverOptions,
    ) -> DriverResult<Statement> {
        if data.is_empty() {
            return Err(DriverError::new("update requires at least one column"));
        }
        let mut binder = Binder::new(self.dialect);
        let assignments: Vec<String> = data
            .iter()
            .map(|(column, value)| -> DriverResult<String> {
                Ok(format!("{} = {}", self.quote(column)?, binder.bind(value.clone())))
            })
            .collect::<DriverResult<_>>()?;
        let mut sql = format!("UPDATE {} SET {}", self.quote(table)?, assignments.join(", "));
        self.append_where(&mut sql, &mut binder, table, options)?;
        self.append_returning(&mut sql, options.returning);
        Ok(binder.finish(sql))
    }

    pub fn delete(&self, table: &str, options: &DriverOptions) -> DriverResult<Statement> {
        let mut binder = Binder::new(self.dialect);
        let mut sql = format!("DELETE FROM {}", self.quote(table)?);
        self.append_where(&mut sql, &mut binder, table, options)?;
        Ok(binder.finish(sql))
    }

    /// CREATE TABLE followed by one CREATE INDEX per declared index
    pub fn create_table(
        &self,
        definition: &EntityDefinition,
        if_not_exists: bool,
    ) -> DriverResult<Vec<String>> {
        let guard = if if_not_exists && self.dialect != Dialect::Mssql {
            "IF NOT EXISTS "
        } else {
            ""
        };
        let primary_keys: Vec<&str> = definition
            .columns
            .iter()
            .filter(|column| column.definition.primary_key)
            .map(|column| column.name.as_str())
            .collect();
        let inline_pk = primary_keys.len() == 1;

        let mut lines = Vec::with_capacity(definition.columns.len() + 1);
        for column in &definition.columns {
            let def = &column.definition;
            let name = self.quote(&column.name)?;
            let mut line = match (self.dialect, def.auto_increment) {
                (Dialect::Sqlite, true) if def.primary_key && inline_pk => {
                    lines.push(format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT"));
                    continue;
                }
                (Dialect::Postgres, true) => format!("{name} SERIAL"),
                _ => format!("{name} {}", def.column_type.sql_type(self.dialect)),
            };
            if def.primary_key && inline_pk {
                line.push_str(" PRIMARY KEY");
            }
            if def.auto_increment {
                match self.dialect {
                    Dialect::MySql => line.push_str(" AUTO_INCREMENT"),
                    Dialect::Mssql => line.push_str(" IDENTITY(1,1)"),
                    Dialect::Sqlite | Dialect::Postgres => {}
                }
            }
            if !def.allow_null {
                line.push_str(" NOT NULL");
            }
            if def.unique && !def.primary_key {
                line.push_str(" UNIQUE");
            }
            if let Some(default) = &def.default_value {
                line.push_str(&format!(" DEFAULT {}", self.literal(default)));
            }
            lines.push(line);
        }
        if primary_keys.len() > 1 {
            let columns: Vec<String> = primary_keys
                .iter()
                .map(|column| self.quote(column))
                .collect::<DriverResult<_>>()?;
            lines.push(format!("PRIMARY KEY ({})", columns.join(", ")));
        }

        let mut statements = vec![format!(
            "CREATE TABLE {guard}{} ({})",
            self.quote(&definition.name)?,
            lines.join(", ")
        )];
        for index in &definition.indexes {
            let columns = self.column_list(&index.columns)?;
            statements.push(format!(
                "CREATE {}INDEX {guard}{} ON {} ({columns})",
                if index.unique { "UNIQUE " } else { "" },
                self.quote(&index.resolved_name(&definition.name))?,
                self.quote(&definition.name)?,
            ));
        }
        Ok(statements)
    }

    pub fn drop_table(&self, table: &str) -> DriverResult<String> {
        Ok(format!("DROP TABLE IF EXISTS {}", self.quote(table)?))
    }

    fn column_list(&self, columns: &[String]) -> DriverResult<String> {
        let quoted: Vec<String> = columns
            .iter()
            .map(|column| self.quote(column))
            .collect::<DriverResult<_>>()?;
        Ok(quoted.join(", "))
    }

    fn append_where(
        &self,
        sql: &mut String,
        binder: &mut Binder,
        table: &str,
        options: &DriverOptions,
    ) -> DriverResult<()> {
        let mut fragments = Vec::new();
        if let Some(clause) = &options.where_clause {
            if let Some(fragment) = self.render_clause(clause, binder)? {
                fragments.push(fragment);
            }
        }
        for include in options.include.iter().filter(|include| include.required) {
            fragments.push(self.render_exists(table, include, binder)?);
        }
        if !fragments.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&fragments.join(" AND "));
        }
        Ok(())
    }

    /// `EXISTS` subquery keeping only rows with at least one related row
    fn render_exists(
        &self,
        table: &str,
        include: &IncludeOption,
        binder: &mut Binder,
    ) -> DriverResult<String> {
        let alias = self.quote(&include.alias)?;
        let mut sql = format!(
            "EXISTS (SELECT 1 FROM {} AS {alias} WHERE {alias}.{} = {}.{}",
            self.quote(&include.target)?,
            self.quote(&include.target_key)?,
            self.quote(table)?,
            self.quote(&include.source_key)?,
        );
        if let Some(clause) = &include.where_clause {
            if let Some(fragment) = self.render_clause(clause, binder)? {
                sql.push_str(" AND ");
                sql.push_str(&fragment);
            }
        }
        sql.push(')');
        Ok(sql)
    }

    fn render_clause(&self, clause: &WhereClause, binder: &mut Binder) -> DriverResult<Option<String>> {
        let predicates = match clause {
            // legacy string filters are SQL fragments
            WhereClause::Raw(Value::String(fragment)) => return Ok(Some(format!("({fragment})"))),
            other => other
                .predicates()
                .map_err(|e| DriverError::new(e.to_string()))?,
        };
        if predicates.is_empty() {
            return Ok(None);
        }
        let rendered: Vec<String> = predicates
            .iter()
            .map(|predicate| self.render_predicate(predicate, binder))
            .collect::<DriverResult<_>>()?;
        Ok(Some(rendered.join(" AND ")))
    }

    fn render_predicate(&self, predicate: &Predicate, binder: &mut Binder) -> DriverResult<String> {
        let column = self.quote(&predicate.column)?;
        let value = predicate.value.clone();
        let fragment = match predicate.operator {
            Operator::Eq => format!("{column} = {}", binder.bind(value)),
            Operator::Ne => format!("{column} <> {}", binder.bind(value)),
            Operator::Gt => format!("{column} > {}", binder.bind(value)),
            Operator::Gte => format!("{column} >= {}", binder.bind(value)),
            Operator::Lt => format!("{column} < {}", binder.bind(value)),
            Operator::Lte => format!("{column} <= {}", binder.bind(value)),
            Operator::Like => format!("{column} LIKE {}", binder.bind(value)),
            Operator::IsNull => format!("{column} IS NULL"),
            Operator::NotNull => format!("{column} IS NOT NULL"),
            Operator::In | Operator::NotIn => {
                let values = value.as_array().cloned().unwrap_or_default();
                let negate = predicate.operator == Operator::NotIn;
                if values.is_empty() {
                    return Ok(if negate { "1 = 1" } else { "1 = 0" }.to_string());
                }
                let placeholders: Vec<String> = values.into_iter().map(|v| binder.bind(v)).collect();
                format!(
                    "{column} {}IN ({})",
                    if negate { "NOT " } else { "" },
                    placeholders.join(", ")
                )
            }
        };
        Ok(fragment)
    }

    fn append_order(&self, sql: &mut String, options: &DriverOptions) -> DriverResult<()> {
        if options.order.is_empty() {
            // OFFSET / FETCH needs an ORDER BY
            if self.dialect == Dialect::Mssql && (options.start.is_some() || options.max.is_some()) {
                sql.push_str(" ORDER BY (SELECT NULL)");
            }
            return Ok(());
        }
        let clauses: Vec<String> = options
            .order
            .iter()
            .map(|key| -> DriverResult<String> {
                let direction = match key.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                Ok(format!("{} {direction}", self.quote(&key.field)?))
            })
            .collect::<DriverResult<_>>()?;
        sql.push_str(" ORDER BY ");
        sql.push_str(&clauses.join(", "));
        Ok(())
    }

    fn append_limit_offset(&self, sql: &mut String, options: &DriverOptions) {
        match (self.dialect, options.max, options.start) {
            (_, None, None) => {}
            (Dialect::Mssql, max, start) => {
                sql.push_str(&format!(" OFFSET {} ROWS", start.unwrap_or(0)));
                if let Some(max) = max {
                    sql.push_str(&format!(" FETCH NEXT {max} ROWS ONLY"));
                }
            }
            (Dialect::Postgres, max, start) => {
                if let Some(max) = max {
                    sql.push_str(&format!(" LIMIT {max}"));
                }
                if let Some(start) = start {
                    sql.push_str(&format!(" OFFSET {start}"));
                }
            }
            (Dialect::Sqlite, max, start) => {
                sql.push_str(&format!(" LIMIT {}", max.map(|m| m as i64).unwrap_or(-1)));
                if let Some(start) = start {
                    sql.push_str(&format!(" OFFSET {start}"));
                }
            }
            (Dialect::MySql, max, start) => {
                sql.push_str(&format!(" LIMIT {}", max.unwrap_or(u64::MAX)));
                if let Some(start) = start {
                    sql.push_str(&format!(" OFFSET {start}"));
                }
            }
        }
    }

    fn append_returning(&self, sql: &mut String, returning: bool) {
        if returning && matches!(self.dialect, Dialect::Sqlite | Dialect::Postgres) {
            sql.push_str(" RETURNING *");
        }
    }

    /// SQL literal for a column default
    fn literal(&self, value: &Value) -> String {
        let quote = |text: &str| format!("'{}'", text.replace('\'', "''"));
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(flag) => match self.dialect {
                Dialect::MySql | Dialect::Mssql => (if *flag { "1" } else { "0" }).to_string(),
                Dialect::Sqlite | Dialect::Postgres => {
                    (if *flag { "TRUE" } else { "FALSE" }).to_string()
                }
            },
            Value::Number(number) => number.to_string(),
            Value::String(text) => quote(text),
            other => quote(&other.to_string()),
        }
    }
}

fn is_valid_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::options::OrderSpec;
    use crate::schema::definitions::{ColumnDefinition, ColumnType, IndexDescriptor, MappedColumn, RelationKind};
    use serde_json::json;

    fn eq(column: &str, value: Value) -> Option<WhereClause> {
        Some(WhereClause::Predicates(vec![Predicate::eq(column, value)]))
    }

    #[test]
    fn test_simple_select() {
        let statement = SqlRenderer::new(Dialect::Sqlite)
            .select("users", &DriverOptions::default())
            .unwrap();
        assert_eq!(statement.sql, "SELECT * FROM \"users\"");
        assert!(statement.params.is_empty());
    }

    #[test]
    fn test_complex_select() {
        let options = DriverOptions {
            where_clause: Some(WhereClause::Predicates(vec![
                Predicate::eq("status", json!("active")),
                Predicate::new("name", Operator::Like, json!("%alice%")),
            ])),
            order: vec![OrderSpec {
                field: "id".into(),
                direction: Direction::Asc,
            }],
            attributes: Some(vec!["id".into(), "name".into()]),
            start: Some(20),
            max: Some(10),
            ..Default::default()
        };
        let statement = SqlRenderer::new(Dialect::Sqlite).select("users", &options).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT \"id\", \"name\" FROM \"users\" WHERE \"status\" = ? AND \"name\" LIKE ? ORDER BY \"id\" ASC LIMIT 10 OFFSET 20"
        );
        assert_eq!(statement.params, vec![json!("active"), json!("%alice%")]);
    }

    #[test]
    fn test_postgres_placeholders() {
        let options = DriverOptions {
            where_clause: Some(WhereClause::Predicates(vec![
                Predicate::eq("status", json!("active")),
                Predicate::new("role", Operator::In, json!(["admin", "user"])),
            ])),
            ..Default::default()
        };
        let statement = SqlRenderer::new(Dialect::Postgres).select("users", &options).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT * FROM \"users\" WHERE \"status\" = $1 AND \"role\" IN ($2, $3)"
        );
        assert_eq!(statement.params.len(), 3);
    }

    #[test]
    fn test_offset_without_limit() {
        let options = DriverOptions {
            start: Some(5),
            ..Default::default()
        };
        assert_eq!(
            SqlRenderer::new(Dialect::Sqlite).select("t", &options).unwrap().sql,
            "SELECT * FROM \"t\" LIMIT -1 OFFSET 5"
        );
        assert_eq!(
            SqlRenderer::new(Dialect::Mssql).select("t", &options).unwrap().sql,
            "SELECT * FROM \"t\" ORDER BY (SELECT NULL) OFFSET 5 ROWS"
        );
    }

    #[test]
    fn test_count_with_required_include() {
        let options = DriverOptions {
            where_clause: eq("active", json!(true)),
            include: vec![IncludeOption {
                alias: "posts".into(),
                target: "post".into(),
                kind: RelationKind::HasMany,
                source_key: "id".into(),
                target_key: "userId".into(),
                required: true,
                where_clause: eq("draft", json!(false)),
                attributes: Some(Vec::new()),
            }],
            distinct: true,
            ..Default::default()
        };
        let statement = SqlRenderer::new(Dialect::Sqlite)
            .count("user", "id", &options)
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT COUNT(DISTINCT \"user\".\"id\") AS count FROM \"user\" WHERE \"active\" = ? AND EXISTS (SELECT 1 FROM \"post\" AS \"posts\" WHERE \"posts\".\"userId\" = \"user\".\"id\" AND \"draft\" = ?)"
        );
        assert_eq!(statement.params, vec![json!(true), json!(false)]);
    }

    #[test]
    fn test_legacy_string_filter_is_verbatim() {
        let options = DriverOptions {
            where_clause: Some(WhereClause::Raw(json!("age > 3 OR admin = 1"))),
            ..Default::default()
        };
        let statement = SqlRenderer::new(Dialect::Sqlite).select("t", &options).unwrap();
        assert_eq!(statement.sql, "SELECT * FROM \"t\" WHERE (age > 3 OR admin = 1)");
    }

    #[test]
    fn test_write_statements() {
        let renderer = SqlRenderer::new(Dialect::Sqlite);
        let data = json!({"name": "ada", "age": 36}).as_object().cloned().unwrap();

        let insert = renderer.insert("users", &data, true).unwrap();
        assert_eq!(
            insert.sql,
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES (?, ?) RETURNING *"
        );

        let options = DriverOptions {
            where_clause: Some(WhereClause::id(json!(3))),
            returning: true,
            ..Default::default()
        };
        let update = renderer.update("users", &data, &options).unwrap();
        assert_eq!(
            update.sql,
            "UPDATE \"users\" SET \"name\" = ?, \"age\" = ? WHERE \"id\" = ? RETURNING *"
        );
        assert_eq!(update.params, vec![json!("ada"), json!(36), json!(3)]);

        let delete = renderer.delete("users", &options).unwrap();
        assert_eq!(delete.sql, "DELETE FROM \"users\" WHERE \"id\" = ?");

        let mysql = SqlRenderer::new(Dialect::MySql).insert("users", &data, true).unwrap();
        assert_eq!(mysql.sql, "INSERT INTO `users` (`name`, `age`) VALUES (?, ?)");
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let options = DriverOptions {
            where_clause: eq("name; drop table users", json!(1)),
            ..Default::default()
        };
        assert!(SqlRenderer::new(Dialect::Sqlite).select("users", &options).is_err());
        assert!(SqlRenderer::new(Dialect::Sqlite).select("users;drop", &DriverOptions::default()).is_err());
    }

    #[test]
    fn test_create_table() {
        let definition = EntityDefinition {
            name: "user".into(),
            columns: vec![
                MappedColumn {
                    name: "id".into(),
                    definition: ColumnDefinition {
                        column_type: ColumnType::Integer { precision: None },
                        allow_null: false,
                        unique: false,
                        default_value: None,
                        auto_increment: true,
                        primary_key: true,
                    },
                },
                MappedColumn {
                    name: "email".into(),
                    definition: ColumnDefinition {
                        column_type: ColumnType::String { size: Some(120) },
                        allow_null: true,
                        unique: true,
                        default_value: Some(json!("it's")),
                        auto_increment: false,
                        primary_key: false,
                    },
                },
            ],
            indexes: vec![IndexDescriptor {
                name: None,
                columns: vec!["email".into()],
                unique: false,
            }],
        };

        let sqlite = SqlRenderer::new(Dialect::Sqlite).create_table(&definition, true).unwrap();
        assert_eq!(
            sqlite,
            vec![
                "CREATE TABLE IF NOT EXISTS \"user\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"email\" VARCHAR(120) UNIQUE DEFAULT 'it''s')".to_string(),
                "CREATE INDEX IF NOT EXISTS \"user_email_idx\" ON \"user\" (\"email\")".to_string(),
            ]
        );

        let postgres = SqlRenderer::new(Dialect::Postgres).create_table(&definition, false).unwrap();
        assert!(postgres[0].starts_with("CREATE TABLE \"user\" (\"id\" SERIAL PRIMARY KEY NOT NULL"));
    }
}
