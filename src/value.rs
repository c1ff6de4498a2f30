//! Application-level values accepted by the encoder.
//!
//! [`Value`] is the open-ended runtime value model: scalars, sequences, keyed
//! mappings, composite records and pre-built terms. Records expose their
//! shape through the [`Record`] capability trait instead of runtime
//! reflection: a type declares its fields once with [`FieldDecl`]s and hands
//! out the current field values on demand.
//!
//! # Example
//! ```rust
//! use std::sync::Arc;
//! use rqlwire::{FieldDecl, Record, Value};
//!
//! struct User {
//!     id: String,
//!     name: String,
//! }
//!
//! impl Record for User {
//!     fn fields(&self) -> Vec<FieldDecl> {
//!         vec![
//!             FieldDecl::new("ID").tag("rethinkdb", "id"),
//!             FieldDecl::new("Name").tag("json", "name,omitempty"),
//!         ]
//!     }
//!
//!     fn values(&self) -> Vec<Value> {
//!         vec![self.id.clone().into(), self.name.clone().into()]
//!     }
//! }
//!
//! let user: Value = Arc::new(User { id: "u1".into(), name: "John".into() }).into();
//! assert!(!user.is_zero());
//! ```
use std::{
    any::TypeId,
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use crate::term::{Datum, Term};

/// Static declaration of one record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    /// Field name as declared on the record type.
    pub name: &'static str,
    /// Raw annotations keyed by namespace, e.g. `("json", "name,omitempty")`.
    pub tags: Vec<(&'static str, &'static str)>,
    /// Field is an anonymous embedding of another record; without an
    /// explicit name its sub-fields are flattened into the parent.
    pub embedded: bool,
}

impl FieldDecl {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tags: Vec::new(),
            embedded: false,
        }
    }

    pub fn tag(mut self, namespace: &'static str, annotation: &'static str) -> Self {
        self.tags.push((namespace, annotation));
        self
    }

    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    /// Raw annotation for `namespace`, if declared.
    pub fn lookup(&self, namespace: &str) -> Option<&'static str> {
        self.tags
            .iter()
            .find(|(ns, _)| *ns == namespace)
            .map(|(_, tag)| *tag)
    }
}

/// Capability interface implemented by composite record types.
///
/// `fields` must return the same declarations for every instance of a type;
/// the encoder resolves them once per type and caches the result. `values`
/// returns the current field values in declaration order.
pub trait Record: Send + Sync + 'static {
    fn fields(&self) -> Vec<FieldDecl>;

    fn values(&self) -> Vec<Value>;

    fn record_type(&self) -> TypeId {
        TypeId::of::<Self>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Runtime value handed to the encoder.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<Value>),
    /// Keyed mapping. Keys must resolve to text (text or integer keys); the
    /// encoder rejects duplicates after resolution.
    Map(Vec<(Value, Value)>),
    Record(Arc<dyn Record>),
    /// Pre-built term, passed through by the encoder untouched.
    Term(Term),
}

impl Value {
    /// Whether this is the zero value of its type, as used by `omitempty`.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::Text(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            Value::Record(_) | Value::Term(_) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
            Value::Term(_) => "term",
        }
    }

    /// Build a map value from string-keyed entries.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::Text(k.into()), v.into()))
                .collect(),
        )
    }

    /// Text form of a map key; only text and integer keys are addressable.
    pub(crate) fn key_string(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Text(s) => write!(f, "Text({s:?})"),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Record(r) => write!(f, "Record({})", r.type_name()),
            Value::Term(t) => write!(f, "Term({t:?})"),
        }
    }
}

/// Structural equality. Map entry order is not significant; records compare
/// by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            (Value::Record(a), Value::Record(b)) => Arc::ptr_eq(a, b),
            (Value::Term(a), Value::Term(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! int_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Value::Int(i64::from(value))
            }
        })*
    };
}

int_value!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(value: BTreeMap<String, T>) -> Self {
        Value::map(value)
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(value: HashMap<String, T>) -> Self {
        Value::map(value)
    }
}

impl<R: Record> From<Arc<R>> for Value {
    fn from(value: Arc<R>) -> Self {
        Value::Record(value)
    }
}

impl From<Term> for Value {
    fn from(value: Term) -> Self {
        Value::Term(value)
    }
}

impl From<Datum> for Value {
    fn from(value: Datum) -> Self {
        match value {
            Datum::Null => Value::Null,
            Datum::Bool(b) => Value::Bool(b),
            Datum::Int(i) => Value::Int(i),
            Datum::Float(f) => Value::Float(f),
            Datum::Text(s) => Value::Text(s),
            Datum::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Datum::Object(map) => Value::map(map.into_iter().map(|(k, v)| (k, Value::from(v)))),
        }
    }
}
