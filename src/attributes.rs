//! Attribute mappings and resolver callbacks for generated tags.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::manifest::{Manifest, ManifestEntry};

/// Ordered mapping of attribute names to values for a single tag.
///
/// Merging later mappings over earlier ones happens key by key: extending the
/// map with another one replaces existing entries, so the last writer wins.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Value of a single tag attribute.
///
/// Boolean values mirror the truthiness rules of HTML attribute rendering:
/// `Bool(true)` renders as a bare attribute and `Bool(false)` suppresses the
/// attribute entirely. Resolver callbacks use `Bool(false)` to strip a
/// default the core would otherwise emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// A regular `key="value"` attribute.
    Str(String),
    /// A bare attribute when `true`, no attribute at all when `false`.
    Bool(bool),
}

impl AttributeValue {
    /// The string value, when this is a string attribute.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            Self::Bool(_) => None,
        }
    }

    /// Whether the attribute should appear in serialized output.
    pub fn is_rendered(&self) -> bool {
        !matches!(self, Self::Bool(false))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(value) => f.write_str(value),
            Self::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// Everything an attribute resolver callback may inspect for one tag.
#[derive(Debug, Clone, Copy)]
pub struct TagContext<'a> {
    /// The manifest key (or dev-mode entry name) the tag belongs to.
    pub entry: &'a str,
    /// The fully built URL the tag points at.
    pub url: &'a str,
    /// The resolved chunk, absent in dev mode.
    pub chunk: Option<&'a ManifestEntry>,
    /// The loaded manifest, absent in dev mode.
    pub manifest: Option<&'a Manifest>,
}

/// An attribute resolver callback registered on the resolver.
///
/// Callbacks run in registration order; each returned mapping is merged over
/// the accumulated attributes, so later callbacks override earlier ones and
/// the built-in defaults.
pub type AttributeResolver = Arc<dyn Fn(&TagContext<'_>) -> AttributeMap + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_entries_win_when_merging() {
        let mut attributes = AttributeMap::new();
        attributes.insert("crossorigin".to_string(), "use-credentials".into());
        attributes.insert("defer".to_string(), true.into());

        let mut overrides = AttributeMap::new();
        overrides.insert("crossorigin".to_string(), "anonymous".into());

        attributes.extend(overrides);

        assert_eq!(
            attributes.get("crossorigin"),
            Some(&AttributeValue::Str("anonymous".to_string()))
        );
        assert_eq!(attributes.get("defer"), Some(&AttributeValue::Bool(true)));
    }

    #[test]
    fn false_values_are_not_rendered() {
        assert!(!AttributeValue::Bool(false).is_rendered());
        assert!(AttributeValue::Bool(true).is_rendered());
        assert!(AttributeValue::from("sha384-xyz").is_rendered());
    }
}
