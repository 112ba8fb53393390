//! Query layer: request types, filter compilation, option building and
//! metadata composition.

pub mod filter;
pub mod metadata;
pub mod options;
pub mod request;
pub mod sql;

use serde_json::{Map, Value};

/// A plain record: column name to JSON value, in column order
pub type Record = Map<String, Value>;

pub use filter::{Operator, Predicate, WhereClause};
pub use metadata::{compose_metadata, Composed, Wrapped};
pub use options::{build_options, build_options_for_count, DriverOptions, IncludeOption, OrderSpec};
pub use request::{
    CreateArgs, DeleteArgs, Direction, FindByIdArgs, IncludeRequest, MetaKind, MetaRequest, Mode,
    OrderRequest, Pagination, QueryArgs, UpdateArgs,
};
pub use sql::{SqlRenderer, Statement};
