//! Per-call query options.
//!
//! [`QueryOptions`] collects options as plain [`Value`]s. They are checked
//! against a fixed schema when a `Start` query is built: the server requires
//! exact option names, so an unknown key or a value of the wrong shape is an
//! error rather than something to drop silently.
use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    term::{Datum, Term},
    value::Value,
};

pub const DB: &str = "db";
pub const DURABILITY: &str = "durability";
pub const READ_MODE: &str = "read_mode";
pub const PROFILE: &str = "profile";
pub const NOREPLY: &str = "noreply";
pub const RETURN_CHANGES: &str = "return_changes";
pub const ARRAY_LIMIT: &str = "array_limit";
pub const MIN_BATCH_ROWS: &str = "min_batch_rows";
pub const MAX_BATCH_ROWS: &str = "max_batch_rows";
pub const MAX_BATCH_BYTES: &str = "max_batch_bytes";
pub const MAX_BATCH_SECONDS: &str = "max_batch_seconds";
pub const FIRST_BATCH_SCALEDOWN_FACTOR: &str = "first_batch_scaledown_factor";
pub const TIME_FORMAT: &str = "time_format";
pub const GROUP_FORMAT: &str = "group_format";
pub const BINARY_FORMAT: &str = "binary_format";

const FORMATS: &[&str] = &["native", "raw"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptionsError {
    #[error("unknown option '{0}'")]
    Unknown(String),

    #[error("option '{key}' expects {expected}, got {got}")]
    InvalidValue {
        key: String,
        expected: &'static str,
        got: String,
    },

    #[error("min_batch_rows ({min}) exceeds max_batch_rows ({max})")]
    BatchBounds { min: i64, max: i64 },
}

/// Accepted shape of an option value.
enum Schema {
    Db,
    Bool,
    Count { min: i64 },
    Seconds,
    OneOf(&'static [&'static str]),
}

fn schema(key: &str) -> Option<Schema> {
    Some(match key {
        DB => Schema::Db,
        DURABILITY => Schema::OneOf(&["hard", "soft"]),
        READ_MODE => Schema::OneOf(&["single", "majority", "outdated"]),
        PROFILE | NOREPLY | RETURN_CHANGES => Schema::Bool,
        ARRAY_LIMIT => Schema::Count { min: 1 },
        MIN_BATCH_ROWS | MAX_BATCH_ROWS | MAX_BATCH_BYTES | FIRST_BATCH_SCALEDOWN_FACTOR => {
            Schema::Count { min: 0 }
        }
        MAX_BATCH_SECONDS => Schema::Seconds,
        TIME_FORMAT | GROUP_FORMAT | BINARY_FORMAT => Schema::OneOf(FORMATS),
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Hard,
    Soft,
}

impl Durability {
    pub fn as_str(self) -> &'static str {
        match self {
            Durability::Hard => "hard",
            Durability::Soft => "soft",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    entries: BTreeMap<String, Value>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect options from key/value pairs. Nothing is validated until the
    /// query is built.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn db(self, name: impl Into<String>) -> Self {
        self.set(DB, name.into())
    }

    pub fn durability(self, durability: Durability) -> Self {
        self.set(DURABILITY, durability.as_str())
    }

    pub fn min_batch_rows(self, rows: u32) -> Self {
        self.set(MIN_BATCH_ROWS, rows)
    }

    pub fn max_batch_rows(self, rows: u32) -> Self {
        self.set(MAX_BATCH_ROWS, rows)
    }

    pub fn return_changes(self, enabled: bool) -> Self {
        self.set(RETURN_CHANGES, enabled)
    }

    pub fn profile(self, enabled: bool) -> Self {
        self.set(PROFILE, enabled)
    }

    pub fn noreply(self, enabled: bool) -> Self {
        self.set(NOREPLY, enabled)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every option against the schema and convert the set into the
    /// wire form carried by a query.
    pub fn validate(&self) -> Result<BTreeMap<String, Term>, OptionsError> {
        let mut out = BTreeMap::new();
        for (key, value) in &self.entries {
            let schema = schema(key).ok_or_else(|| OptionsError::Unknown(key.clone()))?;
            out.insert(key.clone(), check(key, &schema, value)?);
        }

        if let (Some(Value::Int(min)), Some(Value::Int(max))) =
            (self.get(MIN_BATCH_ROWS), self.get(MAX_BATCH_ROWS))
        {
            if min > max {
                return Err(OptionsError::BatchBounds {
                    min: *min,
                    max: *max,
                });
            }
        }

        Ok(out)
    }
}

fn check(key: &str, schema: &Schema, value: &Value) -> Result<Term, OptionsError> {
    let invalid = |expected: &'static str| OptionsError::InvalidValue {
        key: key.to_string(),
        expected,
        got: format!("{value:?}"),
    };

    match (schema, value) {
        (Schema::Db, Value::Text(name)) if !name.is_empty() => Ok(Term::db(name.clone())),
        (Schema::Db, _) => Err(invalid("a database name")),
        (Schema::Bool, Value::Bool(b)) => Ok(Term::Datum(Datum::Bool(*b))),
        (Schema::Bool, _) => Err(invalid("a boolean")),
        (Schema::Count { min }, Value::Int(n)) if n >= min => Ok(Term::Datum(Datum::Int(*n))),
        (Schema::Count { min: 0 }, _) => Err(invalid("a non-negative integer")),
        (Schema::Count { .. }, _) => Err(invalid("a positive integer")),
        (Schema::Seconds, Value::Int(n)) if *n >= 0 => Ok(Term::Datum(Datum::Int(*n))),
        (Schema::Seconds, Value::Float(f)) if *f >= 0.0 => Ok(Term::Datum(Datum::Float(*f))),
        (Schema::Seconds, _) => Err(invalid("a non-negative number of seconds")),
        (Schema::OneOf(allowed), Value::Text(s)) if allowed.iter().any(|a| a == s) => {
            Ok(Term::text(s.clone()))
        }
        (Schema::OneOf(_), _) => Err(invalid("one of the documented values")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_setters_validate() {
        let options = QueryOptions::new()
            .db("benchmarks")
            .min_batch_rows(200)
            .max_batch_rows(200)
            .durability(Durability::Soft)
            .return_changes(true);

        let wire = options.validate().unwrap();
        assert_eq!(wire.len(), 5);
        assert_eq!(wire[DB], Term::db("benchmarks"));
        assert_eq!(wire[DURABILITY], Term::text("soft"));
        assert_eq!(wire[MIN_BATCH_ROWS], Term::Datum(Datum::Int(200)));
    }

    #[test]
    #[should_panic(expected = "Unknown(\"minBatchRows\")")]
    fn unknown_key_rejected() {
        QueryOptions::from_pairs([("minBatchRows", 10)])
            .validate()
            .unwrap();
    }

    #[test]
    fn invalid_values_rejected() {
        let cases = vec![
            (DURABILITY, Value::from("eventual")),
            (MIN_BATCH_ROWS, Value::from(-1)),
            (ARRAY_LIMIT, Value::from(0)),
            (RETURN_CHANGES, Value::from("always")),
            (MAX_BATCH_SECONDS, Value::from(-0.5)),
            (DB, Value::from("")),
        ];

        for (key, value) in cases {
            let err = QueryOptions::new().set(key, value).validate().unwrap_err();
            assert!(
                matches!(err, OptionsError::InvalidValue { key: ref k, .. } if k == key),
                "{key}: {err:?}"
            );
        }
    }

    #[test]
    fn batch_bounds_ordered() {
        let err = QueryOptions::new()
            .min_batch_rows(300)
            .max_batch_rows(200)
            .validate()
            .unwrap_err();

        assert_eq!(err, OptionsError::BatchBounds { min: 300, max: 200 });
    }

    #[test]
    fn later_set_replaces_earlier() {
        let options = QueryOptions::new().noreply(true).noreply(false);
        assert_eq!(options.get(NOREPLY), Some(&Value::Bool(false)));
    }
}
