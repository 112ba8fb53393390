//! Autoincrement counter reset after seeding.

use serde_json::Value;
use tracing::info;

use crate::database::{Dialect, Driver};
use crate::error::DriverResult;

/// Statements reading the current maximum and restarting the counter after it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoIncrementSql {
    dialect: Dialect,
}

impl AutoIncrementSql {
    /// SQL generator for `dialect`; `None` when the dialect has no counter to reset
    pub fn for_dialect(dialect: Dialect) -> Option<Self> {
        match dialect {
            Dialect::MySql | Dialect::Postgres | Dialect::Mssql => Some(Self { dialect }),
            Dialect::Sqlite => None,
        }
    }

    pub fn select_max(&self, table: &str, column: &str) -> String {
        match self.dialect {
            Dialect::Postgres => format!("select max({column}) as max from \"{table}\""),
            _ => format!("select max({column}) as max from {table}"),
        }
    }

    pub fn reset(&self, table: &str, column: &str, max: i64) -> String {
        let next = max.saturating_add(1);
        match self.dialect {
            Dialect::Postgres => {
                format!("alter sequence \"{table}_{column}_seq\" restart with {next}")
            }
            Dialect::Mssql => format!("DBCC CHECKIDENT ('[{table}]', RESEED, {next});"),
            _ => format!("alter table {table} AUTO_INCREMENT = {next};"),
        }
    }
}

/// Restart the `id` counter of `table` after its current maximum.
///
/// A no-op for dialects without a resettable counter. An empty table counts
/// as a maximum of 0.
pub async fn reset_autoincrement(driver: &dyn Driver, table: &str) -> DriverResult<()> {
    let Some(sql) = AutoIncrementSql::for_dialect(driver.dialect()) else {
        return Ok(());
    };
    let column = "id";

    let select = sql.select_max(table, column);
    info!("{}", select);
    let rows = driver.raw_query(&select).await?;
    let max = rows
        .first()
        .and_then(|row| row.get("max").or_else(|| row.values().next()))
        .and_then(max_value)
        .unwrap_or(0);

    let reset = sql.reset(table, column, max);
    info!("{}", reset);
    driver.raw_query(&reset).await?;
    Ok(())
}

fn max_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|f| f as i64)),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDriver;
    use serde_json::json;

    #[test]
    fn test_statements_per_dialect() {
        let mysql = AutoIncrementSql::for_dialect(Dialect::MySql).unwrap();
        assert_eq!(mysql.select_max("user", "id"), "select max(id) as max from user");
        assert_eq!(mysql.reset("user", "id", 9), "alter table user AUTO_INCREMENT = 10;");

        let postgres = AutoIncrementSql::for_dialect(Dialect::Postgres).unwrap();
        assert_eq!(postgres.select_max("user", "id"), "select max(id) as max from \"user\"");
        assert_eq!(
            postgres.reset("user", "id", 0),
            "alter sequence \"user_id_seq\" restart with 1"
        );

        let mssql = AutoIncrementSql::for_dialect(Dialect::Mssql).unwrap();
        assert_eq!(mssql.reset("user", "id", 4), "DBCC CHECKIDENT ('[user]', RESEED, 5);");

        assert!(AutoIncrementSql::for_dialect(Dialect::Sqlite).is_none());
    }

    #[test]
    fn test_reset_at_max_value_saturates() {
        let mysql = AutoIncrementSql::for_dialect(Dialect::MySql).unwrap();
        assert_eq!(
            mysql.reset("user", "id", i64::MAX),
            format!("alter table user AUTO_INCREMENT = {};", i64::MAX)
        );
    }

    #[test]
    fn test_max_value() {
        assert_eq!(max_value(&json!(7)), Some(7));
        assert_eq!(max_value(&json!("12")), Some(12));
        assert_eq!(max_value(&Value::Null), None);
    }

    #[tokio::test]
    async fn test_reset_runs_select_then_reset() {
        let driver = MemoryDriver::with_dialect(Dialect::Postgres);
        driver.push_raw_result(vec![json!({"max": null}).as_object().cloned().unwrap()]);
        reset_autoincrement(&driver, "user").await.unwrap();
        assert_eq!(
            driver.calls().raw_queries(),
            vec![
                "select max(id) as max from \"user\"".to_string(),
                "alter sequence \"user_id_seq\" restart with 1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_reset_is_noop_on_sqlite() {
        let driver = MemoryDriver::new();
        reset_autoincrement(&driver, "user").await.unwrap();
        assert!(driver.calls().raw_queries().is_empty());
    }
}
