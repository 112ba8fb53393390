//! CLI tool for inspecting schema files and the SQL they produce

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use bits_sql::database::{Dialect, EntityDefinition};
use bits_sql::logging::{init_logging, LogFormat};
use bits_sql::query::SqlRenderer;
use bits_sql::schema::{map_schema, AutoIncrementSql, SchemaDefinition};

/// Entry point for the schema-tool CLI
#[derive(Parser)]
#[command(name = "schema-tool")]
#[command(about = "Map schema files to column definitions and SQL", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the mapped column definitions of every entity as JSON
    Map {
        /// Path to the schema file (YAML, JSON or TOML)
        #[arg(short, long, value_name = "FILE")]
        schema: PathBuf,
    },
    /// Print CREATE TABLE statements for every entity
    Ddl {
        /// Path to the schema file (YAML, JSON or TOML)
        #[arg(short, long, value_name = "FILE")]
        schema: PathBuf,
        /// Target SQL dialect
        #[arg(short, long, value_enum)]
        dialect: DialectArg,
        /// Output file for the generated SQL script ('-' for stdout)
        #[arg(short, long, value_name = "OUTPUT", default_value = "-")]
        output: PathBuf,
    },
    /// Print the statements resetting an autoincrement counter
    ResetSql {
        /// Target SQL dialect
        #[arg(short, long, value_enum)]
        dialect: DialectArg,
        /// Table owning the counter
        #[arg(short, long)]
        table: String,
        /// Counter column
        #[arg(short, long, default_value = "id")]
        column: String,
        /// Current maximum value of the column
        #[arg(short, long, default_value_t = 0)]
        max: i64,
    },
    /// Synchronize a schema into a SQLite database
    #[cfg(feature = "sqlite")]
    Apply {
        /// Path to the schema file (YAML, JSON or TOML)
        #[arg(short, long, value_name = "FILE")]
        schema: PathBuf,
        /// Path to the database configuration file
        #[arg(short = 'c', long, value_name = "CONFIG")]
        database_config: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum DialectArg {
    Sqlite,
    Mysql,
    Postgres,
    Mssql,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Sqlite => Dialect::Sqlite,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mssql => Dialect::Mssql,
        }
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum LogFormatArg {
    Json,
    Pretty,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
        }
    }
}

fn load_schema(path: &PathBuf) -> anyhow::Result<SchemaDefinition> {
    SchemaDefinition::from_path(path)
        .with_context(|| format!("failed to load schema {}", path.display()))
}

fn write_output(output: &PathBuf, content: &str) -> anyhow::Result<()> {
    if output.to_string_lossy() == "-" {
        io::stdout().write_all(content.as_bytes())?;
    } else {
        let mut out_file = File::create(output)?;
        out_file.write_all(content.as_bytes())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format.into());

    match cli.command {
        Commands::Map { schema } => {
            let schema = load_schema(&schema)?;
            let mut mapped = serde_json::Map::new();
            for entity in &schema.entities {
                let columns = map_schema(entity);
                for dropped in entity
                    .columns
                    .iter()
                    .filter(|c| !columns.iter().any(|m| m.name == c.name))
                {
                    eprintln!(
                        "{}.{}: unsupported type {}, column dropped",
                        entity.name, dropped.name, dropped.kind
                    );
                }
                mapped.insert(entity.name.clone(), serde_json::to_value(&columns)?);
            }
            println!("{}", serde_json::to_string_pretty(&mapped)?);
        }
        Commands::Ddl {
            schema,
            dialect,
            output,
        } => {
            let schema = load_schema(&schema)?;
            let renderer = SqlRenderer::new(dialect.into());
            let mut script = String::new();
            for entity in &schema.entities {
                let definition = EntityDefinition {
                    name: entity.name.clone(),
                    columns: map_schema(entity),
                    indexes: entity.indexes.clone(),
                };
                for statement in renderer.create_table(&definition, false)? {
                    script.push_str(&statement);
                    script.push_str(";\n");
                }
                script.push('\n');
            }
            write_output(&output, &script)?;
        }
        Commands::ResetSql {
            dialect,
            table,
            column,
            max,
        } => {
            let Some(sql) = AutoIncrementSql::for_dialect(dialect.into()) else {
                bail!("dialect has no autoincrement counter to reset");
            };
            println!("{}", sql.select_max(&table, &column));
            println!("{}", sql.reset(&table, &column, max));
        }
        #[cfg(feature = "sqlite")]
        Commands::Apply {
            schema,
            database_config,
        } => {
            use bits_sql::config::DatabaseConfig;
            use bits_sql::database::{DatabaseContext, SqliteDriver, SyncHooks};
            use std::sync::Arc;

            let schema = load_schema(&schema)?;
            let mut config = DatabaseConfig::from_path(&database_config)?;
            config.apply_env_overrides()?;
            let driver = SqliteDriver::connect(&config).await?;
            let ctx = DatabaseContext::new(config);
            ctx.connect(Arc::new(driver)).await;
            ctx.synchronize(&schema, SyncHooks::default()).await?;
            println!("Schema applied: {} entities", schema.entities.len());
        }
    }
    Ok(())
}
