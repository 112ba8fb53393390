//! Schema layer: declared entities, type mapping and the entity registry.

pub mod autoincrement;
pub mod definitions;
pub mod registry;
pub mod type_map;

pub use autoincrement::{reset_autoincrement, AutoIncrementSql};
pub use definitions::{
    ColumnDefinition, ColumnDescriptor, ColumnKind, ColumnType, EntitySchema, IndexDescriptor,
    MappedColumn, Precision, RelationDescriptor, RelationKind, SchemaDefinition,
};
pub use registry::{RegisteredEntity, Registry};
pub use type_map::{map_schema, map_type};
