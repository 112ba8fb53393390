//! Metadata composer: wraps a result with the metadata the caller asked for.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tracing::warn;

use crate::query::options::DriverOptions;
use crate::query::request::{MetaKind, MetaRequest};

const VALUE_KEY: &str = "value";

/// Result of a call that may carry metadata.
///
/// `Plain` is returned whenever no metadata was requested, so the common case
/// keeps its bare shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Composed<T> {
    Plain(T),
    Wrapped(Wrapped<T>),
}

/// `{value, <key>: <metadata>...}` with keys in request order
#[derive(Debug, Clone, PartialEq)]
pub struct Wrapped<T> {
    pub value: T,
    pub metadata: Vec<(String, Value)>,
}

impl<T> Wrapped<T> {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.metadata.iter().map(|(key, _)| key.as_str())
    }

    fn insert(&mut self, key: &str, value: Value) {
        match self.metadata.iter_mut().find(|(candidate, _)| candidate == key) {
            Some(entry) => entry.1 = value,
            None => self.metadata.push((key.to_string(), value)),
        }
    }
}

impl<T> Composed<T> {
    /// The payload, whatever the shape
    pub fn value(&self) -> &T {
        match self {
            Composed::Plain(value) => value,
            Composed::Wrapped(wrapped) => &wrapped.value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Composed::Plain(value) => value,
            Composed::Wrapped(wrapped) => wrapped.value,
        }
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        match self {
            Composed::Plain(_) => None,
            Composed::Wrapped(wrapped) => wrapped.get(key),
        }
    }
}

impl<T: Serialize> Serialize for Wrapped<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.metadata.len() + 1))?;
        map.serialize_entry(VALUE_KEY, &self.value)?;
        for (key, value) in &self.metadata {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<T: Serialize> Serialize for Composed<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Composed::Plain(value) => value.serialize(serializer),
            Composed::Wrapped(wrapped) => wrapped.serialize(serializer),
        }
    }
}

/// Attach requested metadata to `value`.
///
/// `count` is the total row count computed beforehand by a separate count
/// operation; START and MAX are read back from the options actually used.
/// Unknown kinds are skipped.
pub fn compose_metadata<T>(
    requested: &[MetaRequest],
    value: T,
    options: &DriverOptions,
    count: Option<u64>,
) -> Composed<T> {
    if requested.is_empty() {
        return Composed::Plain(value);
    }

    let mut wrapped = Wrapped {
        value,
        metadata: Vec::with_capacity(requested.len()),
    };
    for request in requested {
        if request.key == VALUE_KEY {
            warn!("ignoring metadata request keyed \"value\"");
            continue;
        }
        let meta = match request.value {
            MetaKind::Count => Value::from(count),
            MetaKind::Start => Value::from(options.start),
            MetaKind::Max => Value::from(options.max),
            MetaKind::Unknown => continue,
        };
        wrapped.insert(&request.key, meta);
    }
    Composed::Wrapped(wrapped)
}
