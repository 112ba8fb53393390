//! Resolution of declared column descriptors into driver column definitions.

use tracing::debug;

use crate::database::Dialect;
use crate::schema::definitions::{
    ColumnDefinition, ColumnDescriptor, ColumnKind, ColumnType, EntitySchema, MappedColumn,
    Precision,
};

type Resolver = fn(Option<u32>, Option<u32>, Option<u32>) -> ColumnType;

/// Lookup table from column kind to its resolver, called with (size, precision, scale)
const RESOLVERS: [(ColumnKind, Resolver); 10] = [
    (ColumnKind::Integer, |_, p, s| ColumnType::Integer {
        precision: precision(p, s),
    }),
    (ColumnKind::Decimal, |_, p, s| ColumnType::Decimal {
        precision: precision(p, s),
    }),
    (ColumnKind::Double, |_, p, s| ColumnType::Double {
        precision: precision(p, s),
    }),
    (ColumnKind::Float, |_, p, s| ColumnType::Float {
        precision: precision(p, s),
    }),
    (ColumnKind::Uuid, |_, _, _| ColumnType::Uuid),
    (ColumnKind::String, |size, _, _| ColumnType::String { size: sized(size) }),
    (ColumnKind::Password, |size, _, _| ColumnType::String { size: sized(size) }),
    (ColumnKind::Date, |_, _, _| ColumnType::Date),
    (ColumnKind::Boolean, |_, _, _| ColumnType::Boolean),
    (ColumnKind::Text, |size, _, _| ColumnType::Text { size: sized(size) }),
];

// A zero precision or size counts as absent.
fn precision(precision: Option<u32>, scale: Option<u32>) -> Option<Precision> {
    precision
        .filter(|p| *p > 0)
        .map(|precision| Precision { precision, scale })
}

fn sized(size: Option<u32>) -> Option<u32> {
    size.filter(|s| *s > 0)
}

fn resolve_type(descriptor: &ColumnDescriptor) -> Option<ColumnType> {
    let kind = ColumnKind::from_name(&descriptor.kind)?;
    RESOLVERS
        .iter()
        .find(|(candidate, _)| *candidate == kind)
        .map(|(_, resolve)| resolve(descriptor.size, descriptor.precision, descriptor.scale))
}

/// Map a column descriptor to a driver column definition.
///
/// Returns `None` when the declared kind is unknown; the column must then be
/// left out of the synchronized schema.
pub fn map_type(descriptor: &ColumnDescriptor) -> Option<ColumnDefinition> {
    let column_type = resolve_type(descriptor)?;
    Some(ColumnDefinition {
        column_type,
        allow_null: descriptor.allow_null,
        unique: descriptor.unique,
        default_value: descriptor.default_value.clone(),
        auto_increment: descriptor.auto_increment,
        primary_key: descriptor.primary_key,
    })
}

/// Map every column of an entity, dropping the ones without a mapping.
pub fn map_schema(entity: &EntitySchema) -> Vec<MappedColumn> {
    entity
        .columns
        .iter()
        .filter_map(|column| match map_type(column) {
            Some(definition) => Some(MappedColumn {
                name: column.name.clone(),
                definition,
            }),
            None => {
                debug!(
                    entity = %entity.name,
                    column = %column.name,
                    kind = %column.kind,
                    "dropping column with unmapped type"
                );
                None
            }
        })
        .collect()
}

impl ColumnType {
    /// SQL type name of this column type for a dialect
    pub fn sql_type(&self, dialect: Dialect) -> String {
        let numeric = |name: &str, precision: &Option<Precision>| match precision {
            Some(Precision {
                precision,
                scale: Some(scale),
            }) => format!("{name}({precision}, {scale})"),
            Some(Precision {
                precision,
                scale: None,
            }) => format!("{name}({precision})"),
            None => name.to_string(),
        };

        match (self, dialect) {
            (ColumnType::Integer { .. }, _) => "INTEGER".to_string(),
            (ColumnType::Decimal { precision }, _) => numeric("DECIMAL", precision),
            (ColumnType::Double { .. }, Dialect::Postgres) => "DOUBLE PRECISION".to_string(),
            (ColumnType::Double { .. }, Dialect::Mssql) => "FLOAT".to_string(),
            (ColumnType::Double { precision }, _) => numeric("DOUBLE", precision),
            (ColumnType::Float { .. }, Dialect::Postgres) => "REAL".to_string(),
            (ColumnType::Float { precision }, _) => numeric("FLOAT", precision),
            (ColumnType::Uuid, Dialect::Postgres) => "UUID".to_string(),
            (ColumnType::Uuid, Dialect::Mssql) => "UNIQUEIDENTIFIER".to_string(),
            (ColumnType::Uuid, _) => "CHAR(36)".to_string(),
            (ColumnType::String { size }, Dialect::Mssql) => {
                format!("NVARCHAR({})", size.unwrap_or(255))
            }
            (ColumnType::String { size }, _) => format!("VARCHAR({})", size.unwrap_or(255)),
            (ColumnType::Date, Dialect::Postgres) => "TIMESTAMP WITH TIME ZONE".to_string(),
            (ColumnType::Date, Dialect::Mssql) => "DATETIMEOFFSET".to_string(),
            (ColumnType::Date, _) => "DATETIME".to_string(),
            (ColumnType::Boolean, Dialect::Mssql) => "BIT".to_string(),
            (ColumnType::Boolean, Dialect::MySql) => "TINYINT(1)".to_string(),
            (ColumnType::Boolean, _) => "BOOLEAN".to_string(),
            (ColumnType::Text { .. }, Dialect::Mssql) => "NVARCHAR(MAX)".to_string(),
            (ColumnType::Text { size: Some(size) }, Dialect::MySql) => format!("TEXT({size})"),
            (ColumnType::Text { .. }, _) => "TEXT".to_string(),
        }
    }
}
