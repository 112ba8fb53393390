use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::query::Record;

/// Abstract column kinds understood by the type mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnKind {
    Integer,
    Decimal,
    Double,
    Float,
    Uuid,
    String,
    Password,
    Date,
    Boolean,
    Text,
}

impl ColumnKind {
    pub const ALL: [ColumnKind; 10] = [
        ColumnKind::Integer,
        ColumnKind::Decimal,
        ColumnKind::Double,
        ColumnKind::Float,
        ColumnKind::Uuid,
        ColumnKind::String,
        ColumnKind::Password,
        ColumnKind::Date,
        ColumnKind::Boolean,
        ColumnKind::Text,
    ];

    /// Resolve a declared kind name; unknown names have no kind.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Decimal => "DECIMAL",
            ColumnKind::Double => "DOUBLE",
            ColumnKind::Float => "FLOAT",
            ColumnKind::Uuid => "UUID",
            ColumnKind::String => "STRING",
            ColumnKind::Password => "PASSWORD",
            ColumnKind::Date => "DATE",
            ColumnKind::Boolean => "BOOLEAN",
            ColumnKind::Text => "TEXT",
        }
    }
}

/// Column as declared in a schema file.
///
/// `kind` is kept as the raw declared name so that unknown kinds survive
/// deserialization and can be dropped by the type mapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Declared kind, e.g. `STRING`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub primary_key: bool,
    /// Whether the column allows NULL values (default: true)
    #[serde(default = "default_true")]
    pub allow_null: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub auto_increment: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }
}

impl Default for ColumnDescriptor {
    fn default() -> Self {
        ColumnDescriptor {
            name: String::new(),
            kind: ColumnKind::String.name().to_string(),
            size: None,
            precision: None,
            scale: None,
            primary_key: false,
            allow_null: default_true(),
            unique: false,
            default_value: None,
            auto_increment: false,
        }
    }
}

/// Precision and optional scale of a numeric column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    pub precision: u32,
    pub scale: Option<u32>,
}

/// Driver-native column type produced by the type mapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer { precision: Option<Precision> },
    Decimal { precision: Option<Precision> },
    Double { precision: Option<Precision> },
    Float { precision: Option<Precision> },
    Uuid,
    String { size: Option<u32> },
    Date,
    Boolean,
    Text { size: Option<u32> },
}

/// Resolved column definition handed to the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub column_type: ColumnType,
    pub allow_null: bool,
    pub unique: bool,
    pub default_value: Option<Value>,
    pub auto_increment: bool,
    pub primary_key: bool,
}

/// A named column that survived type mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedColumn {
    pub name: String,
    #[serde(flatten)]
    pub definition: ColumnDefinition,
}

/// Index definition for an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IndexDescriptor {
    /// Optional index name (auto-generated if None)
    #[serde(default)]
    pub name: Option<String>,
    /// Columns included in the index
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness (default: false)
    #[serde(default)]
    pub unique: bool,
}

impl IndexDescriptor {
    /// Index name, generated from table and columns when not declared
    pub fn resolved_name(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_{}_idx", table, self.columns.join("_")),
        }
    }
}

/// Relation cardinality between two entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
}

/// Relation declared on an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDescriptor {
    /// Name used in include requests and as the key of the nested records
    pub name: String,
    /// Target entity name
    pub target: String,
    pub kind: RelationKind,
    #[serde(default)]
    pub foreign_key: Option<String>,
}

impl RelationDescriptor {
    /// Foreign key column, defaulting to `<target>Id` for belongsTo and `<source>Id` otherwise.
    pub fn resolved_foreign_key(&self, source: &str) -> String {
        match (&self.foreign_key, self.kind) {
            (Some(fk), _) => fk.clone(),
            (None, RelationKind::BelongsTo) => format!("{}Id", self.target),
            (None, _) => format!("{}Id", source),
        }
    }
}

/// Complete entity (table) definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EntitySchema {
    /// Table name
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
}

impl EntitySchema {
    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|relation| relation.name == name)
    }
}

/// All entities of an application, plus optional seed records per entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SchemaDefinition {
    pub entities: Vec<EntitySchema>,
    #[serde(default)]
    pub seeds: BTreeMap<String, Vec<Record>>,
}

impl SchemaDefinition {
    /// Load a schema file; the format follows the extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        crate::config::load_file(path.as_ref())
    }

    pub fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.iter().find(|entity| entity.name == name)
    }
}

/// Helper function to provide default true value for serde
fn default_true() -> bool {
    true
}
