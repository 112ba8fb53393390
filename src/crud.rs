//! CRUD facade over a [`DatabaseContext`].
//!
//! Every call checks, in order, that the context holds a connection, that it
//! has been synchronized and that the entity is registered, before anything
//! reaches the driver. Results are always plain records.

use futures::future::try_join;
use tracing::{debug, instrument};

use crate::database::{DatabaseContext, DriverRecord};
use crate::error::Result;
use crate::query::filter::WhereClause;
use crate::query::metadata::{compose_metadata, Composed};
use crate::query::options::{build_options, build_options_for_count, DriverOptions};
use crate::query::request::{
    CreateArgs, DeleteArgs, FindByIdArgs, MetaKind, Mode, QueryArgs, UpdateArgs,
};
use crate::query::Record;

fn plain(records: Vec<Box<dyn DriverRecord>>) -> Vec<Record> {
    records.iter().map(|record| record.get_plain()).collect()
}

/// Look up one record by identifier
#[instrument(skip(ctx, args), fields(id = %args.id))]
pub async fn find_by_id(
    ctx: &DatabaseContext,
    entity: &str,
    args: &FindByIdArgs,
) -> Result<Option<Record>> {
    let store = ctx.entity_store(entity)?;
    let options = build_options(Mode::Read, entity, ctx, &args.query)?;
    let found = store.find_by_id(&args.id, &options).await?;
    Ok(found.map(|record| record.get_plain()))
}

/// Find the records matching a query, wrapped with metadata when requested.
///
/// A legacy `backwards_query` always returns the bare list. When COUNT is
/// requested, the total is computed with reduced options so pagination and
/// joined rows do not affect it.
#[instrument(skip(ctx, args))]
pub async fn find(
    ctx: &DatabaseContext,
    entity: &str,
    args: &QueryArgs,
) -> Result<Composed<Vec<Record>>> {
    let store = ctx.entity_store(entity)?;
    let options = build_options(Mode::Read, entity, ctx, args)?;

    if args.backwards_query.is_some() {
        debug!("legacy filter, returning records without metadata");
        return Ok(Composed::Plain(plain(store.find_all(&options).await?)));
    }

    let requested = &args.include_meta_data;
    if requested.is_empty() {
        return Ok(Composed::Plain(plain(store.find_all(&options).await?)));
    }

    if !requested.iter().any(|meta| meta.value == MetaKind::Count) {
        let records = plain(store.find_all(&options).await?);
        return Ok(compose_metadata(requested, records, &options, None));
    }

    let count_options = build_options_for_count(Mode::Read, entity, ctx, args)?;
    let (count, records) = try_join(store.count(&count_options), store.find_all(&options)).await?;
    Ok(compose_metadata(requested, plain(records), &options, Some(count)))
}

/// Insert a record and return it as stored
#[instrument(skip(ctx, args))]
pub async fn create(ctx: &DatabaseContext, entity: &str, args: &CreateArgs) -> Result<Record> {
    let store = ctx.entity_store(entity)?;
    let options = DriverOptions {
        returning: true,
        ..build_options(Mode::Write, entity, ctx, &args.options)?
    };
    let created = store.create(&args.data, &options).await?;
    Ok(created.get_plain())
}

/// Update the record with `args.id`; any filter in the options is replaced by
/// the identifier. Returns `None` when no record matched.
#[instrument(skip(ctx, args), fields(id = %args.id))]
pub async fn update(ctx: &DatabaseContext, entity: &str, args: &UpdateArgs) -> Result<Option<Record>> {
    let store = ctx.entity_store(entity)?;
    let options = DriverOptions {
        returning: true,
        where_clause: Some(WhereClause::id(args.id.clone())),
        ..build_options(Mode::Write, entity, ctx, &args.options)?
    };
    let (affected, updated) = store.update(&args.data, &options).await?;
    debug!(affected, "updated");
    Ok(updated.first().map(|record| record.get_plain()))
}

/// Delete the record with `args.id` and return the number of rows removed
#[instrument(skip(ctx, args), fields(id = %args.id))]
pub async fn delete(ctx: &DatabaseContext, entity: &str, args: &DeleteArgs) -> Result<u64> {
    let store = ctx.entity_store(entity)?;
    let options = DriverOptions {
        where_clause: Some(WhereClause::id(args.id.clone())),
        ..Default::default()
    };
    Ok(store.destroy(&options).await?)
}
