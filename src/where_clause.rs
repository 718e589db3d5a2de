//! Where-clause builder: turns declarative relations into an index bound
//! box plus client-side predicates.
//!
//! `equals`/`above`/`below`/`between`/`starts_with` compile to a single
//! ordered-key range. `any_of` compiles to the covering closed range plus a
//! membership filter. The remaining relations (`none_of`, `not_equal`, the
//! `*_ignore_case` variants) are not representable as one range and compile
//! to a full scan over the chosen index plus a predicate.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::keys::{scalar_key, value_key, MAX_CHAR};
use crate::query::Query;
use crate::record::Record;
use crate::storage::ScanBounds;

/// The bound box a where clause places on its index.
#[derive(Debug, Clone, Default)]
pub(crate) struct WhereClause {
    pub index: String,
    pub only: Option<String>,
    pub lower: Option<String>,
    pub lower_inclusive: bool,
    pub upper: Option<String>,
    pub upper_inclusive: bool,
}

impl WhereClause {
    pub fn unbounded(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            ..Self::default()
        }
    }

    pub fn bounds(&self) -> ScanBounds {
        if let Some(only) = &self.only {
            return ScanBounds::only(only.clone());
        }
        let mut bounds = ScanBounds::default();
        if let Some(lower) = &self.lower {
            if self.lower_inclusive {
                bounds.gte = Some(lower.clone());
            } else {
                bounds.gt = Some(lower.clone());
            }
        }
        if let Some(upper) = &self.upper {
            if self.upper_inclusive {
                bounds.lte = Some(upper.clone());
            } else {
                bounds.lt = Some(upper.clone());
            }
        }
        bounds
    }
}

/// Test a record field against a predicate, applying the predicate to each
/// element when the field holds an array (multi-valued fields match if any
/// element matches).
pub(crate) fn test_values(value: Option<Value>, predicate: impl Fn(&Value) -> bool) -> bool {
    match value {
        Some(Value::Array(items)) => items.iter().any(predicate),
        Some(value) => predicate(&value),
        None => false,
    }
}

fn encode(value: Value) -> Result<String> {
    value_key(&value)
        .ok_or_else(|| Error::parameter("index values must be strings, numbers, or booleans"))
}

fn encode_all<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Result<Vec<String>> {
    values.into_iter().map(|value| encode(value.into())).collect()
}

fn lower_key(value: &Value) -> String {
    scalar_key(value).unwrap_or_default().to_lowercase()
}

/// Builder returned by [`Query::where_by`](crate::Query::where_by) and
/// [`Table::where_by`](crate::Table::where_by); every relation finishes the
/// clause and hands back the query.
pub struct WhereBuilder {
    query: Query,
    index: String,
}

impl WhereBuilder {
    pub(crate) fn new(query: Query, index: impl Into<String>) -> Self {
        Self {
            query,
            index: index.into(),
        }
    }

    fn finish(mut self, clause: WhereClause) -> Result<Query> {
        if self.query.where_clause.is_some() {
            return Err(Error::query("query already has a where clause"));
        }
        self.query.where_clause = Some(clause);
        Ok(self.query)
    }

    fn clause(&self) -> WhereClause {
        WhereClause::unbounded(self.index.clone())
    }

    /// Exact bound on the index key.
    pub fn equals(self, value: impl Into<Value>) -> Result<Query> {
        let key = encode(value.into())?;
        let mut clause = self.clause();
        clause.only = Some(key);
        self.finish(clause)
    }

    /// Open lower half-bound.
    pub fn above(self, value: impl Into<Value>) -> Result<Query> {
        let key = encode(value.into())?;
        let mut clause = self.clause();
        clause.lower = Some(key);
        clause.lower_inclusive = false;
        self.finish(clause)
    }

    /// Closed lower half-bound.
    pub fn above_or_equal(self, value: impl Into<Value>) -> Result<Query> {
        let key = encode(value.into())?;
        let mut clause = self.clause();
        clause.lower = Some(key);
        clause.lower_inclusive = true;
        self.finish(clause)
    }

    /// Open upper half-bound.
    pub fn below(self, value: impl Into<Value>) -> Result<Query> {
        let key = encode(value.into())?;
        let mut clause = self.clause();
        clause.upper = Some(key);
        clause.upper_inclusive = false;
        self.finish(clause)
    }

    /// Closed upper half-bound.
    pub fn below_or_equal(self, value: impl Into<Value>) -> Result<Query> {
        let key = encode(value.into())?;
        let mut clause = self.clause();
        clause.upper = Some(key);
        clause.upper_inclusive = true;
        self.finish(clause)
    }

    /// Range bound; each end open or closed per the flags.
    pub fn between(
        self,
        lower: impl Into<Value>,
        upper: impl Into<Value>,
        include_lower: bool,
        include_upper: bool,
    ) -> Result<Query> {
        let lower = encode(lower.into())?;
        let upper = encode(upper.into())?;
        let mut clause = self.clause();
        clause.lower = Some(lower);
        clause.lower_inclusive = include_lower;
        clause.upper = Some(upper);
        clause.upper_inclusive = include_upper;
        self.finish(clause)
    }

    /// Membership test: scans the closed range `[min(values), max(values)]`
    /// and filters to records whose index field (or one of its elements)
    /// is literally one of `values`.
    pub fn any_of<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Result<Query> {
        let mut keys = encode_all(values)?;
        keys.sort();
        if keys.is_empty() {
            return Err(Error::parameter("any_of() requires at least one value"));
        }
        let lower = keys.first().cloned().unwrap_or_default();
        let upper = keys.last().cloned().unwrap_or_default();
        let index = self.index.clone();
        let mut query = self.between(lower, upper, true, true)?;
        query.push_filter(Arc::new(move |record: &Record| {
            test_values(record.field(&index), |value| {
                scalar_key(value).is_some_and(|key| keys.contains(&key))
            })
        }));
        Ok(query)
    }

    /// Case-insensitive membership test; full scan plus predicate.
    pub fn any_of_ignore_case<V: Into<Value>>(
        self,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Query> {
        let keys: Vec<String> = encode_all(values)?
            .into_iter()
            .map(|key| key.to_lowercase())
            .collect();
        let index = self.index.clone();
        let clause = self.clause();
        let mut query = self.finish(clause)?;
        query.push_filter(Arc::new(move |record: &Record| {
            test_values(record.field(&index), |value| {
                keys.contains(&lower_key(value))
            })
        }));
        Ok(query)
    }

    /// Case-insensitive equality; full scan plus predicate.
    pub fn equals_ignore_case(self, value: impl Into<Value>) -> Result<Query> {
        let key = encode(value.into())?.to_lowercase();
        let index = self.index.clone();
        let clause = self.clause();
        let mut query = self.finish(clause)?;
        query.push_filter(Arc::new(move |record: &Record| {
            test_values(record.field(&index), |value| lower_key(value) == key)
        }));
        Ok(query)
    }

    /// Exclusion test; full scan plus predicate.
    pub fn none_of<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Result<Query> {
        let keys = encode_all(values)?;
        let index = self.index.clone();
        let clause = self.clause();
        let mut query = self.finish(clause)?;
        query.push_filter(Arc::new(move |record: &Record| {
            test_values(record.field(&index), |value| {
                !scalar_key(value).is_some_and(|key| keys.contains(&key))
            })
        }));
        Ok(query)
    }

    /// Inequality; full scan plus predicate. A multi-valued field matches
    /// when any element differs.
    pub fn not_equal(self, value: impl Into<Value>) -> Result<Query> {
        let other: Value = value.into();
        let index = self.index.clone();
        let clause = self.clause();
        let mut query = self.finish(clause)?;
        query.push_filter(Arc::new(move |record: &Record| {
            test_values(record.field(&index), |value| value != &other)
        }));
        Ok(query)
    }

    /// Prefix range `[prefix, prefix + U+FFFF)`.
    pub fn starts_with(self, prefix: &str) -> Result<Query> {
        let upper = format!("{prefix}{MAX_CHAR}");
        self.between(prefix, upper, true, false)
    }

    /// Multi-prefix test; full scan plus predicate.
    pub fn starts_with_any_of<V: Into<Value>>(
        self,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Query> {
        let prefixes = encode_all(values)?;
        let index = self.index.clone();
        let clause = self.clause();
        let mut query = self.finish(clause)?;
        query.push_filter(Arc::new(move |record: &Record| {
            test_values(record.field(&index), |value| {
                scalar_key(value)
                    .is_some_and(|key| prefixes.iter().any(|prefix| key.starts_with(prefix)))
            })
        }));
        Ok(query)
    }

    /// Case-insensitive prefix test; full scan plus predicate.
    pub fn starts_with_ignore_case(self, prefix: &str) -> Result<Query> {
        let prefix = prefix.to_lowercase();
        let index = self.index.clone();
        let clause = self.clause();
        let mut query = self.finish(clause)?;
        query.push_filter(Arc::new(move |record: &Record| {
            test_values(record.field(&index), |value| {
                lower_key(value).starts_with(&prefix)
            })
        }));
        Ok(query)
    }

    /// Case-insensitive multi-prefix test; full scan plus predicate.
    pub fn starts_with_any_of_ignore_case<V: Into<Value>>(
        self,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Query> {
        let prefixes: Vec<String> = encode_all(values)?
            .into_iter()
            .map(|prefix| prefix.to_lowercase())
            .collect();
        let index = self.index.clone();
        let clause = self.clause();
        let mut query = self.finish(clause)?;
        query.push_filter(Arc::new(move |record: &Record| {
            test_values(record.field(&index), |value| {
                let key = lower_key(value);
                prefixes.iter().any(|prefix| key.starts_with(prefix))
            })
        }));
        Ok(query)
    }
}
