//! Database context: the connection handle plus the registry of entities.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::DatabaseConfig;
use crate::database::{Driver, EntityDefinition, EntityStore};
use crate::error::{ConfigError, Error, Result};
use crate::query::options::DriverOptions;
use crate::schema::autoincrement::reset_autoincrement;
use crate::schema::definitions::SchemaDefinition;
use crate::schema::registry::{RegisteredEntity, Registry};
use crate::schema::type_map::map_schema;

/// A step run while synchronizing, such as applying migrations
#[async_trait]
pub trait SyncTask: Send + Sync {
    async fn run(&self, driver: &dyn Driver) -> Result<()>;
}

/// External collaborators run during synchronization
#[derive(Clone, Default)]
pub struct SyncHooks {
    pub migrations: Option<Arc<dyn SyncTask>>,
}

impl std::fmt::Debug for SyncHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHooks")
            .field("migrations", &self.migrations.is_some())
            .finish()
    }
}

/// Shared state of the database layer.
///
/// A context is *connected* once it holds an authenticated driver and
/// *ready* once [`synchronize`](Self::synchronize) has published the
/// registry. CRUD calls need both.
pub struct DatabaseContext {
    config: DatabaseConfig,
    connection: RwLock<Option<Arc<dyn Driver>>>,
    registry: OnceCell<Registry>,
}

impl Default for DatabaseContext {
    fn default() -> Self {
        Self::new(DatabaseConfig::default())
    }
}

impl DatabaseContext {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            connection: RwLock::new(None),
            registry: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Store `driver` and authenticate it.
    ///
    /// A failed authentication is logged and leaves the context without a
    /// connection.
    pub async fn connect(&self, driver: Arc<dyn Driver>) {
        self.set_connection(Some(driver.clone()));
        match driver.authenticate().await {
            Ok(()) => info!(dialect = %driver.dialect(), "database connection established"),
            Err(err) => {
                error!(error = %err, "Unable to authenticate database connection");
                self.set_connection(None);
            }
        }
    }

    /// The current driver handle, if any
    pub fn raw_connection(&self) -> Option<Arc<dyn Driver>> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn connection(&self) -> Result<Arc<dyn Driver>> {
        self.raw_connection().ok_or(Error::NoConnection)
    }

    pub fn is_ready(&self) -> bool {
        self.registry.get().is_some()
    }

    pub fn registry(&self) -> Result<&Registry> {
        self.registry.get().ok_or(Error::NotReady)
    }

    /// A registered entity; fails when the context is not ready or the name is unknown
    pub fn entity(&self, name: &str) -> Result<&RegisteredEntity> {
        self.registry()?
            .get(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Store of `name`, checking connection, readiness and name in that order
    pub fn entity_store(&self, name: &str) -> Result<Arc<dyn EntityStore>> {
        self.connection()?;
        Ok(self.entity(name)?.store.clone())
    }

    fn set_connection(&self, driver: Option<Arc<dyn Driver>>) {
        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = driver;
    }

    /// Define every entity on the driver, then run migrations, the driver sync
    /// and seeds in series.
    ///
    /// The registry is published once the entities are defined, so the
    /// context becomes ready even when a later step fails; that failure is
    /// logged and returned.
    pub async fn synchronize(&self, schema: &SchemaDefinition, hooks: SyncHooks) -> Result<()> {
        let driver = self.connection()?;
        if self.is_ready() {
            return Err(ConfigError::Invalid("database context already synchronized".into()).into());
        }

        let mut registry = Registry::new();
        for entity in &schema.entities {
            let columns = map_schema(entity);
            let store = driver
                .define_entity(EntityDefinition {
                    name: entity.name.clone(),
                    columns: columns.clone(),
                    indexes: entity.indexes.clone(),
                })
                .await?;
            debug!(entity = %entity.name, columns = columns.len(), "entity defined");
            registry.insert(RegisteredEntity {
                schema: entity.clone(),
                columns,
                store,
            });
        }

        let outcome = self.run_series(driver.as_ref(), &registry, schema, &hooks).await;

        if self.registry.set(registry).is_err() {
            return Err(ConfigError::Invalid("database context already synchronized".into()).into());
        }
        if let Err(err) = &outcome {
            match err {
                Error::Driver(driver_error) => driver_error.log(),
                other => error!("{}", other),
            }
        }
        outcome
    }

    async fn run_series(
        &self,
        driver: &dyn Driver,
        registry: &Registry,
        schema: &SchemaDefinition,
        hooks: &SyncHooks,
    ) -> Result<()> {
        let config = &self.config;
        if config.force_sync && config.run_migrations {
            warn!("force_sync and run_migrations are mutually exclusive, preferring force_sync and skipping migrations");
        }

        if config.run_migrations && !config.force_sync {
            if let Some(migrations) = &hooks.migrations {
                migrations.run(driver).await?;
            }
        }

        driver.sync(config.force_sync, config.alter_sync).await?;

        if config.run_seeds {
            self.run_seeds(driver, registry, schema).await
        } else {
            info!("Database ready ...");
            Ok(())
        }
    }

    /// Insert the seed records of every entity that is empty, or of every
    /// seeded entity under `force_sync`
    async fn run_seeds(
        &self,
        driver: &dyn Driver,
        registry: &Registry,
        schema: &SchemaDefinition,
    ) -> Result<()> {
        let options = DriverOptions::default();
        for (name, records) in &schema.seeds {
            let entity = registry
                .get(name)
                .ok_or_else(|| Error::UnknownEntity(name.clone()))?;
            if !self.config.force_sync && entity.store.count(&options).await? > 0 {
                debug!(entity = %name, "entity already holds rows, skipping seeds");
                continue;
            }
            for record in records {
                entity.store.create(record, &options).await?;
            }
            reset_autoincrement(driver, name).await?;
            info!(entity = %name, records = records.len(), "seeded");
        }
        info!("Database ready and seeded ...");
        Ok(())
    }
}

impl std::fmt::Debug for DatabaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseContext")
            .field("config", &self.config)
            .field("connected", &self.raw_connection().is_some())
            .field("ready", &self.is_ready())
            .finish()
    }
}
