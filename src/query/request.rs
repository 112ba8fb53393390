use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::Error;
use crate::query::Record;

/// Whether options are compiled for a read or a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Read,
    Write,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ" => Ok(Mode::Read),
            "WRITE" => Ok(Mode::Write),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Read => write!(f, "READ"),
            Mode::Write => write!(f, "WRITE"),
        }
    }
}

/// Offset / limit requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub max: Option<u64>,
}

/// Kind of metadata that can be attached to a find result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetaKind {
    Count,
    Start,
    Max,
    /// Any kind this crate does not know; ignored when composing.
    #[serde(other)]
    Unknown,
}

/// One requested metadata entry: `key` is the field name in the wrapper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRequest {
    pub key: String,
    pub value: MetaKind,
}

impl MetaRequest {
    pub fn new(key: impl Into<String>, value: MetaKind) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Ordering as sent by callers: `"field"`, `"-field"` or `{field, direction}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderRequest {
    Field(String),
    Explicit {
        field: String,
        #[serde(default)]
        direction: Direction,
    },
}

/// Include as sent by callers: a relation name or a detailed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncludeRequest {
    Relation(String),
    Detailed {
        relation: String,
        #[serde(default)]
        required: bool,
        #[serde(default, rename = "where")]
        filter: Option<Map<String, Value>>,
        #[serde(default)]
        attributes: Option<Vec<String>>,
    },
}

impl IncludeRequest {
    pub fn relation(&self) -> &str {
        match self {
            IncludeRequest::Relation(name) => name,
            IncludeRequest::Detailed { relation, .. } => relation,
        }
    }
}

/// Dialect-agnostic query description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryArgs {
    /// Modern filters, compiled into predicates
    #[serde(rename = "where")]
    pub filter: Option<Map<String, Value>>,
    pub include: Vec<IncludeRequest>,
    pub order_by: Vec<OrderRequest>,
    pub attributes: Option<Vec<String>>,
    pub pagination: Option<Pagination>,
    /// Legacy filter, used verbatim as the where clause when present
    pub backwards_query: Option<Value>,
    pub include_meta_data: Vec<MetaRequest>,
}

/// Arguments of `find_by_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindByIdArgs {
    pub id: Value,
    #[serde(flatten)]
    pub query: QueryArgs,
}

/// Arguments of `create`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateArgs {
    pub data: Record,
    #[serde(default)]
    pub options: QueryArgs,
}

/// Arguments of `update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateArgs {
    pub id: Value,
    pub data: Record,
    #[serde(default)]
    pub options: QueryArgs,
}

/// Arguments of `delete`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteArgs {
    pub id: Value,
}
