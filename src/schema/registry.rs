use std::collections::HashMap;
use std::sync::Arc;

use crate::database::EntityStore;
use crate::schema::definitions::{EntitySchema, MappedColumn};

/// An entity defined on the driver
#[derive(Clone)]
pub struct RegisteredEntity {
    /// Schema as declared
    pub schema: EntitySchema,
    /// Columns that survived type mapping
    pub columns: Vec<MappedColumn>,
    pub store: Arc<dyn EntityStore>,
}

impl RegisteredEntity {
    /// Name of the first primary key column, `id` when none is declared
    pub fn primary_key(&self) -> &str {
        self.columns
            .iter()
            .find(|column| column.definition.primary_key)
            .map(|column| column.name.as_str())
            .unwrap_or("id")
    }
}

impl std::fmt::Debug for RegisteredEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredEntity")
            .field("name", &self.schema.name)
            .field("columns", &self.columns.len())
            .finish()
    }
}

/// Entities known to a ready context, by name
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: HashMap<String, RegisteredEntity>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: RegisteredEntity) {
        self.entities.insert(entity.schema.name.clone(), entity);
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredEntity> {
        self.entities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
