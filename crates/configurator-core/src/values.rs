//! Values document → environment bindings.
//!
//! The document is flattened depth-first. Each leaf becomes one binding whose
//! key is the upper-cased path of tag names joined with [`KEY_SEPARATOR`];
//! nodes carrying `list="true"` are passed through as their verbatim markup.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::Path;

use tracing::{debug, instrument};

use crate::error::ParseError;
use crate::xml::{Document, Element};

/// Separator placed between path components of a binding key.
pub const KEY_SEPARATOR: &str = "__";

/// Attribute marking a subtree that must not be flattened.
pub const LIST_ATTRIBUTE: &str = "list";

/// Flattened bindings. `None` marks a leaf without text, which the
/// environment builder leaves unset.
pub type ValueMap = BTreeMap<String, Option<String>>;

/// Read and flatten the values document at `path`.
#[instrument(skip(path), fields(path = %path.display()))]
pub fn load_values(path: &Path) -> Result<ValueMap, ParseError> {
    let source = std::fs::read_to_string(path).map_err(|source| ParseError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let document = Document::parse(source).map_err(|source| ParseError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;

    let values = resolve(&document);
    debug!(bindings = values.len(), "resolved values document");
    Ok(values)
}

/// Flatten a parsed document, starting at its root element.
pub fn resolve(document: &Document) -> ValueMap {
    let mut values = ValueMap::new();
    flatten(document, document.root(), None, &mut values);
    values
}

fn flatten(document: &Document, node: &Element, prefix: Option<&str>, values: &mut ValueMap) {
    let key = match prefix {
        Some(prefix) => format!("{prefix}{KEY_SEPARATOR}{}", node.name().to_uppercase()),
        None => node.name().to_uppercase(),
    };

    if is_list(node) {
        // A list node reached through `resolve` always has a span.
        let markup = document.markup(node).map(str::to_string);
        values.insert(key, markup);
    } else if !node.children().is_empty() {
        for child in node.children() {
            flatten(document, child, Some(&key), values);
        }
    } else {
        values.insert(key, node.text().map(str::to_string));
    }
}

fn is_list(node: &Element) -> bool {
    node.attribute(LIST_ATTRIBUTE) == Some("true")
}

/// Process environment handed to every script of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<OsString, OsString>,
}

impl Environment {
    /// Snapshot of the current process environment, non-unicode entries
    /// included.
    pub fn from_ambient() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Apply document bindings on top of this environment.
    ///
    /// Bindings override existing variables of the same name. Bindings
    /// without a value are skipped, so an existing variable keeps its value
    /// and a missing one stays unset.
    pub fn with_values(mut self, values: &ValueMap) -> Self {
        for (key, value) in values {
            if let Some(value) = value {
                self.vars.insert(OsString::from(key), OsString::from(value));
            }
        }
        self
    }

    /// Value of `key`, or `None` when unset or not valid unicode.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_os(key).and_then(OsStr::to_str)
    }

    pub fn get_os(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
