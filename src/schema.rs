//! Table definitions: file patterns, index declarations, content hooks.
//!
//! A [`TableDefinition`] is a named projection rule mapping source files to
//! primary records. Its derived [`checksum`](TableDefinition::checksum)
//! detects structural change across process runs and drives full rebuilds.

use std::fmt;
use std::sync::Arc;

use globset::{Glob, GlobBuilder, GlobMatcher};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Content validator hook: reject a record body before it is indexed or
/// written back.
pub type Validator = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Content preprocessor hook: transform a record body after validation.
pub type Preprocessor = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Serializer hook: encode a record body for write-back to its source file.
/// Defaults to pretty-printed JSON.
pub type Serializer = Arc<dyn Fn(&Value) -> Result<Vec<u8>> + Send + Sync>;

/// One secondary index declaration: a name plus one or more alternate `def`
/// strings.
///
/// A def is `field`, `fieldA+fieldB` (compound), or `*field` (multi-entry:
/// the field holds an array and each element yields one index entry). When
/// multiple defs are declared they are tried in order per record; the first
/// def that fully resolves wins. All defs of one index must agree on
/// multi-entry-ness and component count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub defs: Vec<String>,
}

/// A parsed index declaration, ready for key derivation.
#[derive(Debug, Clone)]
pub(crate) struct ParsedIndex {
    pub name: String,
    pub multi_entry: bool,
    /// One inner vec per alternate def; inner elements are the compound
    /// components (always length 1 for multi-entry).
    pub key_paths: Vec<Vec<String>>,
}

/// Declarative description of one table.
#[derive(Clone)]
pub struct TableDefinition {
    pub name: String,
    /// Glob matched against source file paths; empty means the default
    /// (`/{name}.json` when singular, `/{name}/*.json` otherwise).
    pub file_pattern: String,
    pub indexes: Vec<IndexSpec>,
    /// Body field reported by `Query::keys()`; the record url when unset.
    pub primary_key: Option<String>,
    /// Singular tables hold at most one record per source.
    pub singular: bool,
    pub(crate) validate: Option<Validator>,
    pub(crate) preprocess: Option<Preprocessor>,
    pub(crate) serialize: Option<Serializer>,
}

impl fmt::Debug for TableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDefinition")
            .field("name", &self.name)
            .field("file_pattern", &self.file_pattern)
            .field("indexes", &self.indexes)
            .field("primary_key", &self.primary_key)
            .field("singular", &self.singular)
            .field("validate", &self.validate.is_some())
            .field("preprocess", &self.preprocess.is_some())
            .field("serialize", &self.serialize.is_some())
            .finish()
    }
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_pattern: String::new(),
            indexes: Vec::new(),
            primary_key: None,
            singular: false,
            validate: None,
            preprocess: None,
            serialize: None,
        }
    }

    pub fn file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = pattern.into();
        self
    }

    /// Declare an index whose name equals its single def string.
    pub fn index(mut self, def: impl Into<String>) -> Self {
        let def = def.into();
        self.indexes.push(IndexSpec {
            name: normalize_index_name(&def),
            defs: vec![def],
        });
        self
    }

    /// Declare a named index with one or more alternate defs.
    pub fn index_named<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        defs: impl IntoIterator<Item = S>,
    ) -> Self {
        self.indexes.push(IndexSpec {
            name: name.into(),
            defs: defs.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = Some(field.into());
        self
    }

    pub fn singular(mut self, singular: bool) -> Self {
        self.singular = singular;
        self
    }

    pub fn validate(
        mut self,
        hook: impl Fn(&Value) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Arc::new(hook));
        self
    }

    pub fn preprocess(
        mut self,
        hook: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.preprocess = Some(Arc::new(hook));
        self
    }

    pub fn serialize(
        mut self,
        hook: impl Fn(&Value) -> Result<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        self.serialize = Some(Arc::new(hook));
        self
    }

    /// Fill defaults, append the implicit `:origin` index, and check the
    /// definition. Called once at `Database::open`.
    pub(crate) fn normalized(mut self) -> Result<TableDefinition> {
        if self.name.is_empty() {
            return Err(Error::schema("table name must not be empty"));
        }
        if self.name.starts_with('_') || self.name.contains('/') || self.name.contains('!') {
            return Err(Error::schema(format!(
                "invalid table name {:?}: must not start with '_' or contain '/' or '!'",
                self.name
            )));
        }
        if self.file_pattern.is_empty() {
            self.file_pattern = if self.singular {
                format!("/{}.json", self.name)
            } else {
                format!("/{}/*.json", self.name)
            };
        }
        if !self.indexes.iter().any(|spec| spec.name == ":origin") {
            self.indexes.push(IndexSpec {
                name: ":origin".into(),
                defs: vec![":origin".into()],
            });
        }

        let mut seen = std::collections::HashSet::new();
        for spec in &self.indexes {
            if spec.name.is_empty() || spec.name == "_" || spec.name.contains('/') {
                return Err(Error::schema(format!(
                    "invalid index name {:?} on table {:?}",
                    spec.name, self.name
                )));
            }
            if !seen.insert(spec.name.clone()) {
                return Err(Error::schema(format!(
                    "duplicate index {:?} on table {:?}",
                    spec.name, self.name
                )));
            }
        }
        // parse once to surface def errors at open time
        self.parsed_indexes()?;
        Ok(self)
    }

    pub(crate) fn parsed_indexes(&self) -> Result<Vec<ParsedIndex>> {
        self.indexes
            .iter()
            .map(|spec| parse_index(&self.name, spec))
            .collect()
    }

    /// Stable hash of the normalized structural form, used to detect
    /// definition changes across runs. Hook closures are not hashed; only
    /// structure (pattern, indexes, primary key, singular flag) triggers a
    /// rebuild.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0]);
        hasher.update(self.file_pattern.as_bytes());
        hasher.update([0]);
        hasher.update(self.primary_key.as_deref().unwrap_or("").as_bytes());
        hasher.update([0]);
        hasher.update([self.singular as u8]);
        for spec in &self.indexes {
            hasher.update([0]);
            hasher.update(spec.name.as_bytes());
            for def in &spec.defs {
                hasher.update([1]);
                hasher.update(def.as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

fn normalize_index_name(def: &str) -> String {
    def.strip_prefix('*').unwrap_or(def).to_string()
}

fn parse_index(table: &str, spec: &IndexSpec) -> Result<ParsedIndex> {
    if spec.defs.is_empty() {
        return Err(Error::schema(format!(
            "index {:?} on table {:?} has no defs",
            spec.name, table
        )));
    }
    let mut multi_entry = None;
    let mut arity = None;
    let mut key_paths = Vec::with_capacity(spec.defs.len());
    for def in &spec.defs {
        let (is_multi, fields) = match def.strip_prefix('*') {
            Some(rest) => {
                if rest.contains('+') {
                    return Err(Error::schema(format!(
                        "index def {:?} on table {:?}: multi-entry defs cannot be compound",
                        def, table
                    )));
                }
                (true, vec![rest.to_string()])
            }
            None => (
                false,
                def.split('+').map(|field| field.to_string()).collect(),
            ),
        };
        if fields.iter().any(|field| field.is_empty()) {
            return Err(Error::schema(format!(
                "index def {:?} on table {:?} has an empty field",
                def, table
            )));
        }
        if *multi_entry.get_or_insert(is_multi) != is_multi
            || *arity.get_or_insert(fields.len()) != fields.len()
        {
            return Err(Error::schema(format!(
                "index {:?} on table {:?}: alternate defs must agree on multi-entry and component count",
                spec.name, table
            )));
        }
        key_paths.push(fields);
    }
    Ok(ParsedIndex {
        name: spec.name.clone(),
        multi_entry: multi_entry.unwrap_or(false),
        key_paths,
    })
}

/// Compile a file pattern with `/`-aware `*`: a single star does not cross
/// path separators, so `/posts/*.json` matches only direct children.
pub(crate) fn compile_pattern(pattern: &str) -> Result<GlobMatcher> {
    let glob: Glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|err| Error::schema(format!("invalid file pattern {:?}: {}", pattern, err)))?;
    Ok(glob.compile_matcher())
}
