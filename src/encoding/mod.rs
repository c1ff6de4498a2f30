//! Conversion of application values into wire terms.
//!
//! The [`Encoder`] walks a [`Value`] recursively and produces a [`Term`]
//! tree. Scalars become literal datums, sequences become array terms, maps
//! and records become object terms, and pre-built terms pass through as-is.
//!
//! # Records
//!
//! Record fields are laid out through the [`AnnotationResolver`]. Fields
//! marked `omitempty` are skipped while they hold their zero value. Flattened
//! fields (anonymous embeddings without an explicit name, or fields with the
//! `inline` option) merge their own fields into the parent object one level
//! deeper. When several fields end up under the same name, the shallowest one
//! wins; two at the same depth make the record unencodable. Collisions are
//! decided from the record layout alone, so an omitted field still takes
//! part.
//!
//! # Failure modes
//!
//! Encoding fails on map keys that are neither text nor integers, on
//! duplicate keys after key resolution, on cyclic record graphs and on
//! values nested deeper than the configured limit. A failure never leaves
//! partial state in the shared descriptor cache.
//!
//! # Example
//! ```rust
//! use rqlwire::{Term, Value, encoding::encode};
//!
//! let value = Value::map([("customer_id", "42")]);
//! let term = encode(&value).unwrap();
//!
//! assert!(matches!(term, Term::Object(_)));
//! ```
pub mod tags;

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, LazyLock},
};

use log::trace;
use thiserror::Error;

use crate::{
    term::{Datum, Term},
    value::{Record, Value},
};

pub use tags::{AnnotationError, AnnotationResolver, Namespace};

/// Nesting limit applied when none is configured.
pub const DEFAULT_MAX_DEPTH: usize = 20;

static DEFAULT_ENCODER: LazyLock<Encoder> = LazyLock::new(Encoder::default);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error("unsupported map key of type '{0}'")]
    UnsupportedKey(&'static str),

    #[error("duplicate map key '{0}'")]
    DuplicateKey(String),

    #[error("cyclic reference through '{0}'")]
    Cycle(&'static str),

    #[error("fields of '{record}' collide on name '{name}'")]
    NameCollision { record: &'static str, name: String },

    #[error("'{record}' declares {declared} fields but supplied {supplied} values")]
    FieldMismatch {
        record: &'static str,
        declared: usize,
        supplied: usize,
    },

    #[error("cannot flatten {kind} value of field '{field}'")]
    CannotFlatten { field: &'static str, kind: &'static str },

    #[error("nesting depth limit of {0} exceeded")]
    DepthExceeded(usize),
}

/// Encoder settings.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Annotation namespaces in priority order.
    pub namespaces: Vec<Namespace>,
    pub max_depth: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            namespaces: tags::default_namespaces(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Encode with the process-wide default encoder.
pub fn encode(value: &Value) -> Result<Term, EncodingError> {
    DEFAULT_ENCODER.encode(value)
}

/// One field contending for a name in a record's object term.
struct Candidate {
    name: String,
    level: usize,
    term: Option<Term>,
}

#[derive(Debug)]
pub struct Encoder {
    resolver: AnnotationResolver,
    max_depth: usize,
}

impl Encoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            resolver: AnnotationResolver::new(config.namespaces),
            max_depth: config.max_depth,
        }
    }

    pub fn resolver(&self) -> &AnnotationResolver {
        &self.resolver
    }

    pub fn encode(&self, value: &Value) -> Result<Term, EncodingError> {
        let mut path = Vec::new();
        self.encode_value(value, 0, &mut path)
    }

    fn encode_value(
        &self,
        value: &Value,
        depth: usize,
        path: &mut Vec<usize>,
    ) -> Result<Term, EncodingError> {
        if depth > self.max_depth {
            return Err(EncodingError::DepthExceeded(self.max_depth));
        }

        Ok(match value {
            Value::Null => Term::Datum(Datum::Null),
            Value::Bool(b) => Term::Datum(Datum::Bool(*b)),
            Value::Int(i) => Term::Datum(Datum::Int(*i)),
            Value::Float(f) => Term::Datum(Datum::Float(*f)),
            Value::Text(s) => Term::Datum(Datum::Text(s.clone())),
            Value::Array(items) => Term::Array(
                items
                    .iter()
                    .map(|item| self.encode_value(item, depth + 1, path))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(entries) => self.encode_map(entries, depth, path)?,
            Value::Record(record) => self.encode_record(record, depth, path)?,
            Value::Term(term) => term.clone(),
        })
    }

    fn encode_map(
        &self,
        entries: &[(Value, Value)],
        depth: usize,
        path: &mut Vec<usize>,
    ) -> Result<Term, EncodingError> {
        let mut out = BTreeMap::new();
        for (key, value) in entries {
            let key = key
                .key_string()
                .ok_or(EncodingError::UnsupportedKey(key.kind()))?;
            let term = self.encode_value(value, depth + 1, path)?;
            if out.contains_key(&key) {
                return Err(EncodingError::DuplicateKey(key));
            }
            out.insert(key, term);
        }
        Ok(Term::Object(out))
    }

    fn encode_record(
        &self,
        record: &Arc<dyn Record>,
        depth: usize,
        path: &mut Vec<usize>,
    ) -> Result<Term, EncodingError> {
        let mut candidates = Vec::new();
        self.collect_fields(record, 0, depth, path, &mut candidates)?;

        // name -> (level, term, ambiguous)
        let mut dominant: BTreeMap<String, (usize, Option<Term>, bool)> = BTreeMap::new();
        for Candidate { name, level, term } in candidates {
            match dominant.get_mut(&name) {
                Some(entry) if entry.0 > level => *entry = (level, term, false),
                Some(entry) if entry.0 == level => entry.2 = true,
                Some(_) => {}
                None => {
                    dominant.insert(name, (level, term, false));
                }
            }
        }

        if let Some((name, _)) = dominant.iter().find(|(_, (_, _, ambiguous))| *ambiguous) {
            return Err(EncodingError::NameCollision {
                record: record.type_name(),
                name: name.clone(),
            });
        }

        Ok(Term::Object(
            dominant
                .into_iter()
                .filter_map(|(name, (_, term, _))| term.map(|t| (name, t)))
                .collect(),
        ))
    }

    /// Gather the named fields of `record` and of everything flattened into
    /// it. `level` is the embedding depth inside the object being built,
    /// `depth` the nesting depth of that object in the whole tree.
    fn collect_fields(
        &self,
        record: &Arc<dyn Record>,
        level: usize,
        depth: usize,
        path: &mut Vec<usize>,
        out: &mut Vec<Candidate>,
    ) -> Result<(), EncodingError> {
        let identity = Arc::as_ptr(record) as *const () as usize;
        if path.contains(&identity) {
            return Err(EncodingError::Cycle(record.type_name()));
        }

        path.push(identity);
        let result = self.collect_record_fields(record, level, depth, path, out);
        path.pop();
        result
    }

    fn collect_record_fields(
        &self,
        record: &Arc<dyn Record>,
        level: usize,
        depth: usize,
        path: &mut Vec<usize>,
        out: &mut Vec<Candidate>,
    ) -> Result<(), EncodingError> {
        let descriptor = self.resolver.descriptor(record.as_ref())?;
        let values = record.values();
        if values.len() != descriptor.declared {
            return Err(EncodingError::FieldMismatch {
                record: record.type_name(),
                declared: descriptor.declared,
                supplied: values.len(),
            });
        }
        trace!(
            "encoding {} fields of {}",
            descriptor.fields.len(),
            record.type_name()
        );

        for field in &descriptor.fields {
            let value = &values[field.index];

            if field.flatten {
                match value {
                    Value::Null => {}
                    Value::Record(inner) => {
                        self.collect_fields(inner, level + 1, depth, path, out)?;
                    }
                    Value::Map(entries) => {
                        let mut seen = BTreeSet::new();
                        for (key, value) in entries {
                            let name = key
                                .key_string()
                                .ok_or(EncodingError::UnsupportedKey(key.kind()))?;
                            if !seen.insert(name.clone()) {
                                return Err(EncodingError::DuplicateKey(name));
                            }
                            let term = self.encode_value(value, depth + 1, path)?;
                            out.push(Candidate {
                                name,
                                level: level + 1,
                                term: Some(term),
                            });
                        }
                    }
                    other => {
                        return Err(EncodingError::CannotFlatten {
                            field: field.field,
                            kind: other.kind(),
                        });
                    }
                }
                continue;
            }

            let term = if field.omit_empty() && value.is_zero() {
                None
            } else {
                Some(self.encode_value(value, depth + 1, path)?)
            };
            out.push(Candidate {
                name: field.name.clone(),
                level,
                term,
            });
        }

        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(EncoderConfig::default())
    }
}
