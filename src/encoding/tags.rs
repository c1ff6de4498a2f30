//! Field annotation resolution.
//!
//! Record fields may carry annotations in several namespaces (for example a
//! driver-specific `rethinkdb` namespace and the generic `json` one). The
//! [`AnnotationResolver`] walks its namespaces in priority order and takes the
//! first non-empty annotation it finds for a field; lower-priority namespaces
//! are never consulted for that field once one matched.
//!
//! An annotation has the form `name,opt1,opt2`. An empty name keeps the
//! declared field name, and the single annotation `-` drops the field.
//!
//! Resolved descriptors are cached per record type. The cache is populated at
//! most once per type even when several threads encode the same type for the
//! first time concurrently.
use std::{any::TypeId, fmt, sync::Arc};

use dashmap::DashMap;
use log::debug;
use thiserror::Error;

use crate::value::{FieldDecl, Record};

/// Option marking a field to be skipped when it holds its zero value.
pub const OMIT_EMPTY: &str = "omitempty";
/// Option forcing a field's sub-fields into the parent mapping.
pub const INLINE: &str = "inline";

/// Characters other than letters and digits allowed in a wire name.
/// Backslash and quotes are reserved.
const NAME_PUNCTUATION: &str = "!#$%&()*+-./:<=>?@[]^_{|}~ ";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("invalid name '{name}' on field '{field}' in namespace '{namespace}'")]
    InvalidName {
        field: String,
        namespace: String,
        name: String,
    },
}

/// Comma-separated option list following the name part of an annotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagOptions(String);

impl TagOptions {
    pub fn new(options: impl Into<String>) -> Self {
        Self(options.into())
    }

    /// Exact token match; `omit` does not match `omitempty` and vice versa.
    pub fn contains(&self, option: &str) -> bool {
        if self.0.is_empty() || option.is_empty() {
            return false;
        }
        self.0.split(',').any(|o| o == option)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Split an annotation on its first comma into name and options.
pub fn parse_tag(tag: &str) -> (&str, TagOptions) {
    match tag.split_once(',') {
        Some((name, options)) => (name, TagOptions::new(options)),
        None => (tag, TagOptions::default()),
    }
}

pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || NAME_PUNCTUATION.contains(c))
}

pub type Lookup = Arc<dyn Fn(&FieldDecl) -> Option<String> + Send + Sync>;

/// One source of field annotations.
#[derive(Clone)]
pub struct Namespace {
    name: String,
    lookup: Lookup,
}

impl Namespace {
    /// Namespace backed by the field's declared tags under `key`.
    pub fn tag(key: &'static str) -> Self {
        Self {
            name: key.to_string(),
            lookup: Arc::new(move |decl: &FieldDecl| decl.lookup(key).map(str::to_string)),
        }
    }

    /// Namespace backed by an arbitrary lookup function.
    pub fn custom<F>(name: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(&FieldDecl) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            lookup: Arc::new(lookup),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn annotation(&self, decl: &FieldDecl) -> Option<String> {
        (self.lookup)(decl).filter(|tag| !tag.is_empty())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Namespace").field(&self.name).finish()
    }
}

/// Default namespace priority: driver-specific first, then generic.
pub fn default_namespaces() -> Vec<Namespace> {
    vec![Namespace::tag("rethinkdb"), Namespace::tag("json")]
}

/// Effective wire name and options of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Position of the field in the record's declaration order.
    pub index: usize,
    /// Declared field name.
    pub field: &'static str,
    /// Name the field is written under.
    pub name: String,
    pub options: TagOptions,
    /// Sub-fields are merged into the parent mapping instead of nesting.
    pub flatten: bool,
}

impl FieldDescriptor {
    pub fn omit_empty(&self) -> bool {
        self.options.contains(OMIT_EMPTY)
    }
}

/// Resolved layout of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDescriptor {
    /// Number of declared fields, including skipped ones.
    pub declared: usize,
    pub fields: Vec<FieldDescriptor>,
}

pub struct AnnotationResolver {
    namespaces: Vec<Namespace>,
    cache: DashMap<TypeId, Arc<RecordDescriptor>>,
}

impl AnnotationResolver {
    pub fn new(namespaces: Vec<Namespace>) -> Self {
        Self {
            namespaces,
            cache: DashMap::new(),
        }
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    /// Resolve a list of field declarations without touching the cache.
    pub fn resolve(&self, fields: &[FieldDecl]) -> Result<RecordDescriptor, AnnotationError> {
        let mut resolved = Vec::with_capacity(fields.len());
        for (index, decl) in fields.iter().enumerate() {
            if let Some(field) = self.resolve_field(index, decl)? {
                resolved.push(field);
            }
        }

        Ok(RecordDescriptor {
            declared: fields.len(),
            fields: resolved,
        })
    }

    /// Cached descriptor for the record's type, resolving it on first use.
    /// Failed resolutions are not cached.
    pub fn descriptor(&self, record: &dyn Record) -> Result<Arc<RecordDescriptor>, AnnotationError> {
        let id = record.record_type();
        if let Some(hit) = self.cache.get(&id) {
            return Ok(Arc::clone(hit.value()));
        }

        let entry = self.cache.entry(id).or_try_insert_with(|| {
            debug!("resolving field descriptors for {}", record.type_name());
            self.resolve(&record.fields()).map(Arc::new)
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Number of record types resolved so far.
    pub fn cached_types(&self) -> usize {
        self.cache.len()
    }

    fn resolve_field(
        &self,
        index: usize,
        decl: &FieldDecl,
    ) -> Result<Option<FieldDescriptor>, AnnotationError> {
        let found = self
            .namespaces
            .iter()
            .find_map(|ns| ns.annotation(decl).map(|tag| (ns, tag)));

        let Some((namespace, tag)) = found else {
            return Ok(Some(FieldDescriptor {
                index,
                field: decl.name,
                name: decl.name.to_string(),
                options: TagOptions::default(),
                flatten: decl.embedded,
            }));
        };

        if tag == "-" {
            return Ok(None);
        }

        let (name, options) = parse_tag(&tag);
        if !name.is_empty() && !is_valid_name(name) {
            return Err(AnnotationError::InvalidName {
                field: decl.name.to_string(),
                namespace: namespace.name().to_string(),
                name: name.to_string(),
            });
        }

        let flatten = (decl.embedded && name.is_empty()) || options.contains(INLINE);
        let name = if name.is_empty() { decl.name } else { name };

        Ok(Some(FieldDescriptor {
            index,
            field: decl.name,
            name: name.to_string(),
            options,
            flatten,
        }))
    }
}

impl Default for AnnotationResolver {
    fn default() -> Self {
        Self::new(default_namespaces())
    }
}

impl fmt::Debug for AnnotationResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationResolver")
            .field("namespaces", &self.namespaces)
            .field("cached_types", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::value::Value;

    use super::*;

    #[test]
    fn parse_tag_splits_on_first_comma() {
        let (name, options) = parse_tag("id,omitempty,inline");
        assert_eq!(name, "id");
        assert_eq!(options.as_str(), "omitempty,inline");

        let (name, options) = parse_tag(",omitempty");
        assert_eq!(name, "");
        assert!(options.contains(OMIT_EMPTY));

        let (name, options) = parse_tag("plain");
        assert_eq!(name, "plain");
        assert!(options.is_empty());
    }

    #[test]
    fn options_match_whole_tokens() {
        let options = TagOptions::new("omitemptyish,xomitempty,inline");

        assert!(!options.contains(OMIT_EMPTY));
        assert!(!options.contains("omit"));
        assert!(options.contains(INLINE));
        assert!(!TagOptions::default().contains(""));
    }

    #[test]
    fn name_validity() {
        for name in ["id", "customer_id", "a-b.c", "über", "x1 y2", "@{meta}"] {
            assert!(is_valid_name(name), "{name} should be valid");
        }
        for name in ["", "a\\b", "say\"hi\"", "it's", "a,b"] {
            assert!(!is_valid_name(name), "{name} should be invalid");
        }
    }

    #[test]
    fn first_namespace_wins_outright() {
        let resolver = AnnotationResolver::default();
        let fields = vec![
            FieldDecl::new("Name")
                .tag("json", "full_name,omitempty")
                .tag("rethinkdb", "name"),
            FieldDecl::new("Email").tag("json", "email,omitempty"),
            FieldDecl::new("Plain"),
        ];

        let resolved = resolver.resolve(&fields).unwrap();

        assert_eq!(resolved.fields[0].name, "name");
        assert!(!resolved.fields[0].omit_empty());
        assert_eq!(resolved.fields[1].name, "email");
        assert!(resolved.fields[1].omit_empty());
        assert_eq!(resolved.fields[2].name, "Plain");
        assert!(resolved.fields[2].options.is_empty());
    }

    #[test]
    fn empty_annotation_falls_through() {
        let resolver = AnnotationResolver::default();
        let fields = vec![FieldDecl::new("Name").tag("rethinkdb", "").tag("json", "n")];

        let resolved = resolver.resolve(&fields).unwrap();
        assert_eq!(resolved.fields[0].name, "n");
    }

    #[test]
    fn dash_skips_field() {
        let resolver = AnnotationResolver::default();
        let fields = vec![
            FieldDecl::new("Secret").tag("rethinkdb", "-"),
            FieldDecl::new("Dash").tag("rethinkdb", "-,"),
        ];

        let resolved = resolver.resolve(&fields).unwrap();
        assert_eq!(resolved.declared, 2);
        assert_eq!(resolved.fields.len(), 1);
        assert_eq!(resolved.fields[0].index, 1);
        assert_eq!(resolved.fields[0].name, "-");
    }

    #[test]
    fn embedded_fields_flatten_unless_named() {
        let resolver = AnnotationResolver::default();
        let fields = vec![
            FieldDecl::new("UserData").embedded(),
            FieldDecl::new("Named").embedded().tag("json", "named"),
            FieldDecl::new("Meta").tag("rethinkdb", ",inline"),
        ];

        let resolved = resolver.resolve(&fields).unwrap();
        assert!(resolved.fields[0].flatten);
        assert!(!resolved.fields[1].flatten);
        assert!(resolved.fields[2].flatten);
        assert_eq!(resolved.fields[2].name, "Meta");
    }

    #[test]
    #[should_panic(expected = "InvalidName")]
    fn invalid_name_rejected() {
        let resolver = AnnotationResolver::default();
        let fields = vec![FieldDecl::new("Field").tag("json", "bad\\name")];

        resolver.resolve(&fields).unwrap();
    }

    #[test]
    fn custom_namespace_order() {
        let upper = Namespace::custom("upper", |decl: &FieldDecl| Some(decl.name.to_uppercase()));
        let resolver = AnnotationResolver::new(vec![Namespace::tag("json"), upper]);
        let fields = vec![
            FieldDecl::new("tagged").tag("json", "t"),
            FieldDecl::new("untagged"),
        ];

        let resolved = resolver.resolve(&fields).unwrap();
        assert_eq!(resolved.fields[0].name, "t");
        assert_eq!(resolved.fields[1].name, "UNTAGGED");
    }

    static CONCURRENT_RESOLUTIONS: AtomicUsize = AtomicUsize::new(0);

    struct Counted;

    impl Record for Counted {
        fn fields(&self) -> Vec<FieldDecl> {
            CONCURRENT_RESOLUTIONS.fetch_add(1, Ordering::SeqCst);
            vec![FieldDecl::new("A").tag("json", "a")]
        }

        fn values(&self) -> Vec<Value> {
            vec![Value::Null]
        }
    }

    #[test]
    fn concurrent_first_use_resolves_once() {
        let resolver = AnnotationResolver::default();

        let results = std::thread::scope(|s| {
            let handles = (0..8)
                .map(|_| s.spawn(|| resolver.descriptor(&Counted).unwrap()))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        assert_eq!(CONCURRENT_RESOLUTIONS.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cached_types(), 1);
        assert!(results.iter().all(|d| d.fields[0].name == "a"));
    }

    struct Broken;

    impl Record for Broken {
        fn fields(&self) -> Vec<FieldDecl> {
            vec![FieldDecl::new("A").tag("json", "a\"b")]
        }

        fn values(&self) -> Vec<Value> {
            vec![Value::Null]
        }
    }

    #[test]
    fn failed_resolution_not_cached() {
        let resolver = AnnotationResolver::default();

        assert!(resolver.descriptor(&Broken).is_err());
        assert!(resolver.descriptor(&Broken).is_err());
        assert_eq!(resolver.cached_types(), 0);
    }
}
