//! Option builder: compiles a query request into driver options.

use serde::Serialize;
use tracing::debug;

use crate::database::DatabaseContext;
use crate::error::{Error, Result};
use crate::query::filter::{compile_filters, WhereClause};
use crate::query::request::{Direction, IncludeRequest, Mode, OrderRequest, QueryArgs};
use crate::schema::definitions::RelationKind;
use crate::schema::registry::RegisteredEntity;

/// Ordering applied by the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSpec {
    pub field: String,
    pub direction: Direction,
}

impl From<&OrderRequest> for OrderSpec {
    fn from(request: &OrderRequest) -> Self {
        match request {
            OrderRequest::Field(field) => match field.strip_prefix('-') {
                Some(field) => OrderSpec {
                    field: field.to_string(),
                    direction: Direction::Desc,
                },
                None => OrderSpec {
                    field: field.clone(),
                    direction: Direction::Asc,
                },
            },
            OrderRequest::Explicit { field, direction } => OrderSpec {
                field: field.clone(),
                direction: *direction,
            },
        }
    }
}

/// Related entity to eager-load
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncludeOption {
    /// Relation name, also the key of the nested records
    pub alias: String,
    /// Target entity name
    pub target: String,
    pub kind: RelationKind,
    /// Column of the including entity used to join
    pub source_key: String,
    /// Column of the target entity used to join
    pub target_key: String,
    /// Keep only parents with at least one related record
    pub required: bool,
    pub where_clause: Option<WhereClause>,
    pub attributes: Option<Vec<String>>,
}

/// Options handed to the storage driver
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriverOptions {
    pub where_clause: Option<WhereClause>,
    pub include: Vec<IncludeOption>,
    pub order: Vec<OrderSpec>,
    pub attributes: Option<Vec<String>>,
    /// Offset actually applied
    pub start: Option<u64>,
    /// Limit actually applied
    pub max: Option<u64>,
    /// Count distinct base rows
    pub distinct: bool,
    /// Ask the driver to return written records
    pub returning: bool,
}

/// Compile the options used to execute a request.
///
/// A legacy `backwards_query` replaces the compiled filter outright. WRITE
/// mode never carries pagination, ordering or column selection.
pub fn build_options(
    mode: Mode,
    entity: &str,
    ctx: &DatabaseContext,
    args: &QueryArgs,
) -> Result<DriverOptions> {
    let registered = ctx.entity(entity)?;

    let mut options = DriverOptions {
        where_clause: build_where(args)?,
        include: build_includes(registered, ctx, args)?,
        ..Default::default()
    };

    if mode == Mode::Read {
        options.order = args.order_by.iter().map(OrderSpec::from).collect();
        options.attributes = args.attributes.clone();
        if let Some(pagination) = args.pagination {
            options.start = pagination.start;
            options.max = pagination.max;
        }
    }

    debug!(entity, %mode, ?options, "compiled driver options");
    Ok(options)
}

/// Compile the reduced options used to count the rows of a request.
///
/// Filters and includes only: no pagination, ordering or column selection,
/// and includes select no columns so related rows are never counted.
pub fn build_options_for_count(
    mode: Mode,
    entity: &str,
    ctx: &DatabaseContext,
    args: &QueryArgs,
) -> Result<DriverOptions> {
    let full = build_options(mode, entity, ctx, args)?;
    Ok(DriverOptions {
        where_clause: full.where_clause,
        include: full
            .include
            .into_iter()
            .map(|include| IncludeOption {
                attributes: Some(Vec::new()),
                ..include
            })
            .collect(),
        distinct: true,
        ..Default::default()
    })
}

fn build_where(args: &QueryArgs) -> Result<Option<WhereClause>> {
    if let Some(legacy) = &args.backwards_query {
        return Ok(Some(WhereClause::Raw(legacy.clone())));
    }
    match &args.filter {
        Some(filter) if !filter.is_empty() => {
            Ok(Some(WhereClause::Predicates(compile_filters(filter)?)))
        }
        _ => Ok(None),
    }
}

fn build_includes(
    registered: &RegisteredEntity,
    ctx: &DatabaseContext,
    args: &QueryArgs,
) -> Result<Vec<IncludeOption>> {
    args.include
        .iter()
        .map(|request| {
            let relation = registered.schema.relation(request.relation()).ok_or_else(|| {
                Error::InvalidQuery(format!(
                    "entity {} has no relation named {}",
                    registered.schema.name,
                    request.relation()
                ))
            })?;
            let target = ctx.entity(&relation.target)?;
            let foreign_key = relation.resolved_foreign_key(&registered.schema.name);
            let (source_key, target_key) = match relation.kind {
                RelationKind::BelongsTo => (foreign_key, target.primary_key().to_string()),
                RelationKind::HasOne | RelationKind::HasMany => {
                    (registered.primary_key().to_string(), foreign_key)
                }
            };

            let mut include = IncludeOption {
                alias: relation.name.clone(),
                target: relation.target.clone(),
                kind: relation.kind,
                source_key,
                target_key,
                required: false,
                where_clause: None,
                attributes: None,
            };
            if let IncludeRequest::Detailed {
                required,
                filter,
                attributes,
                ..
            } = request
            {
                include.required = *required;
                include.attributes = attributes.clone();
                include.where_clause = match filter {
                    Some(filter) if !filter.is_empty() => {
                        Some(WhereClause::Predicates(compile_filters(filter)?))
                    }
                    _ => None,
                };
            }
            Ok(include)
        })
        .collect()
}
