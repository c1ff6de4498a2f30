//! Wire-level term and datum representation.
//!
//! A [`Term`] is the recursive tree sent to the server as the body of a `Start`
//! query. Leaves are literal [`Datum`] scalars; interior nodes are ordered
//! sequences, keyed mappings, or operation nodes carrying an opaque operation
//! code together with positional and named arguments.
//!
//! A [`Datum`] is the value model used for everything the server sends back:
//! result payloads, profiles and error messages all decode into it.
//!
//! # Example
//! ```rust
//! use rqlwire::{Datum, Term};
//!
//! let insert = Term::db("benchmarks")
//!     .table("benchmarks")
//!     .insert(Term::Array(vec![Term::Datum(Datum::Int(1))]));
//!
//! assert!(insert.is_op());
//! ```
use std::collections::BTreeMap;

use bincode::{Decode, Encode};

use crate::value::Value;

/// Operation codes for the handful of server operations the driver core
/// builds on its own. Any other code can be carried through [`Term::op`].
pub mod term_type {
    pub const MAKE_ARRAY: u32 = 2;
    pub const MAKE_OBJ: u32 = 3;
    pub const DB: u32 = 14;
    pub const TABLE: u32 = 15;
    pub const INSERT: u32 = 56;
}

/// Literal value as stored and returned by the server.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<Datum>),
    Object(BTreeMap<String, Datum>),
}

impl Datum {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Field lookup on an object datum.
    pub fn get(&self, key: &str) -> Option<&Datum> {
        match self {
            Datum::Object(map) => map.get(key),
            _ => None,
        }
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Datum::Text(value.to_string())
    }
}

impl From<String> for Datum {
    fn from(value: String) -> Self {
        Datum::Text(value)
    }
}

impl From<i64> for Datum {
    fn from(value: i64) -> Self {
        Datum::Int(value)
    }
}

impl From<bool> for Datum {
    fn from(value: bool) -> Self {
        Datum::Bool(value)
    }
}

/// Node of an encoded query expression.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Term {
    /// Literal scalar leaf.
    Datum(Datum),
    /// Ordered sequence of child terms.
    Array(Vec<Term>),
    /// Keyed mapping; keys are unique and the map is ordered so that a term
    /// always serializes to the same bytes.
    Object(BTreeMap<String, Term>),
    /// Server operation identified by its operation code.
    Op {
        op: u32,
        args: Vec<Term>,
        optargs: BTreeMap<String, Term>,
    },
}

impl Term {
    pub fn op(op: u32, args: Vec<Term>) -> Self {
        Term::Op {
            op,
            args,
            optargs: BTreeMap::new(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Term::Datum(Datum::Text(value.into()))
    }

    pub fn db(name: impl Into<String>) -> Self {
        Term::op(term_type::DB, vec![Term::text(name)])
    }

    pub fn table(self, name: impl Into<String>) -> Self {
        Term::op(term_type::TABLE, vec![self, Term::text(name)])
    }

    pub fn insert(self, documents: Term) -> Self {
        Term::op(term_type::INSERT, vec![self, documents])
    }

    /// Attach a named argument to an operation node. Literal nodes are
    /// returned unchanged.
    pub fn with_optarg(mut self, key: impl Into<String>, value: Term) -> Self {
        if let Term::Op { optargs, .. } = &mut self {
            optargs.insert(key.into(), value);
        }
        self
    }

    pub fn is_op(&self) -> bool {
        match self {
            Term::Op { .. } => true,
            Term::Datum(_) => false,
            Term::Array(items) => items.iter().any(Term::is_op),
            Term::Object(map) => map.values().any(Term::is_op),
        }
    }

    /// Collapse a literal tree into a single datum. Returns `None` when the
    /// tree contains an operation node, which only the server can evaluate.
    pub fn to_datum(&self) -> Option<Datum> {
        match self {
            Term::Datum(d) => Some(d.clone()),
            Term::Array(items) => items
                .iter()
                .map(Term::to_datum)
                .collect::<Option<Vec<_>>>()
                .map(Datum::Array),
            Term::Object(map) => map
                .iter()
                .map(|(k, v)| v.to_datum().map(|d| (k.clone(), d)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Datum::Object),
            Term::Op { .. } => None,
        }
    }

    /// Structural inverse of encoding. Literal nodes become plain values;
    /// operation nodes come back as [`Value::Term`] so that re-encoding is
    /// the identity.
    pub fn into_value(self) -> Value {
        match self {
            Term::Datum(d) => d.into(),
            Term::Array(items) => Value::Array(items.into_iter().map(Term::into_value).collect()),
            Term::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (Value::Text(k), v.into_value()))
                    .collect(),
            ),
            op @ Term::Op { .. } => Value::Term(op),
        }
    }
}

impl From<Datum> for Term {
    fn from(value: Datum) -> Self {
        match value {
            Datum::Array(items) => Term::Array(items.into_iter().map(Term::from).collect()),
            Datum::Object(map) => {
                Term::Object(map.into_iter().map(|(k, v)| (k, Term::from(v))).collect())
            }
            scalar => Term::Datum(scalar),
        }
    }
}
