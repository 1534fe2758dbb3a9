//! Resource context passed to the authorizer with every check.
//!
//! A [`ResourceContext`] is an unordered string-keyed map of JSON values,
//! assembled per request from static guard configuration, the application's
//! resource-context provider, route path parameters, and (for relation
//! checks) the ReBAC fields. Keys are kept sorted so that semantically
//! identical contexts always serialize - and therefore hash - identically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ReBAC field name for the object type.
pub const OBJECT_TYPE: &str = "object_type";
/// ReBAC field name for the object id.
pub const OBJECT_ID: &str = "object_id";
/// ReBAC field name for the relation.
pub const RELATION: &str = "relation";
/// ReBAC field name for the subject type.
pub const SUBJECT_TYPE: &str = "subject_type";

/// String-keyed context sent to the authorizer alongside a decision request.
///
/// Backed by a `BTreeMap` so iteration and serialization order is always
/// sorted by key, which the decision cache relies on for stable keys.
///
/// # Example
///
/// ```
/// use cerberus_core::ResourceContext;
///
/// let mut ctx = ResourceContext::new();
/// ctx.insert("id", "42");
/// ctx.insert("owner", "alice");
/// assert_eq!(ctx.get_str("id"), Some("42"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceContext {
    entries: BTreeMap<String, Value>,
}

impl ResourceContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context describing a ReBAC relation check.
    pub fn relation(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
        subject_type: impl Into<String>,
    ) -> Self {
        let mut ctx = Self::new();
        ctx.insert(OBJECT_TYPE, object_type.into());
        ctx.insert(OBJECT_ID, object_id.into());
        ctx.insert(RELATION, relation.into());
        ctx.insert(SUBJECT_TYPE, subject_type.into());
        ctx
    }

    /// Inserts a value, replacing any existing entry for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Returns the value for a key, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns the value for a key as a string slice, if present and a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// Merges `other` into this context, with `other` winning on key conflicts.
    pub fn merge(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    /// Extends this context from string key/value pairs (e.g. path params).
    pub fn extend_strings<K, V, I>(&mut self, pairs: I)
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in pairs {
            self.entries.insert(k.into(), Value::String(v.into()));
        }
    }

    /// Returns true when the context has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Returns the canonical serialization of this context.
    ///
    /// Keys are emitted in sorted order, so two contexts with the same
    /// entries always produce the same string regardless of insertion order.
    #[must_use]
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_default()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ResourceContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Self::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}
