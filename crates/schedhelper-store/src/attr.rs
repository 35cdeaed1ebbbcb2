//! Attribute value model of the table.
//!
//! Mirrors the DynamoDB attribute types the application uses. String sets
//! can never be empty in the backend, so set-valued attributes are modelled
//! through [`SetAttr`], which is either the explicit null marker or a
//! non-empty set.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::key::ItemKey;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrValue {
    /// String.
    S(String),
    /// Number.
    N(i64),
    /// Boolean.
    Bool(bool),
    /// Non-empty string set.
    Ss(BTreeSet<String>),
    /// Map of nested attributes.
    M(BTreeMap<String, AttrValue>),
    /// Explicit null marker.
    Null,
}

impl AttrValue {
    /// Returns the string value, if this is a string.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttrValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number value, if this is a number.
    pub fn as_n(&self) -> Option<i64> {
        match self {
            AttrValue::N(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string set, if this is a string set.
    pub fn as_ss(&self) -> Option<&BTreeSet<String>> {
        match self {
            AttrValue::Ss(set) => Some(set),
            _ => None,
        }
    }

    /// Returns the map, if this is a map.
    pub fn as_m(&self) -> Option<&BTreeMap<String, AttrValue>> {
        match self {
            AttrValue::M(map) => Some(map),
            _ => None,
        }
    }

    /// Returns true for the null marker.
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }
}

/// Attributes of one row, excluding the key.
pub type Item = BTreeMap<String, AttrValue>;

/// A row: its key plus its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Row address.
    pub key: ItemKey,
    /// Row attributes.
    pub attrs: Item,
}

impl Row {
    /// Creates a row without attributes (edge rows carry none).
    pub fn new(key: ItemKey) -> Self {
        Self {
            key,
            attrs: Item::new(),
        }
    }

    /// Adds an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    /// Sort key of the row.
    pub fn sk(&self) -> &str {
        &self.key.sk
    }

    /// Looks up an attribute.
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    /// Looks up a string attribute.
    pub fn string(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(AttrValue::as_s)
    }
}

/// A string set that is guaranteed to hold at least one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonEmptySet(BTreeSet<String>);

impl NonEmptySet {
    /// Wraps `set`, or returns `None` if it is empty.
    pub fn new(set: BTreeSet<String>) -> Option<Self> {
        if set.is_empty() {
            None
        } else {
            Some(Self(set))
        }
    }

    /// Borrows the inner set.
    pub fn as_set(&self) -> &BTreeSet<String> {
        &self.0
    }

    /// Unwraps the inner set.
    pub fn into_inner(self) -> BTreeSet<String> {
        self.0
    }

    /// Number of elements (at least one).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; present for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Stored state of a set-valued attribute.
///
/// The backend cannot hold an empty set, so "no values" is written as the
/// explicit null marker. A missing attribute reads as [`SetAttr::Null`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SetAttr {
    /// No values (explicit null marker or absent attribute).
    #[default]
    Null,
    /// At least one value.
    Present(NonEmptySet),
}

impl SetAttr {
    /// Builds the stored state for an arbitrary set.
    pub fn from_set(set: BTreeSet<String>) -> Self {
        match NonEmptySet::new(set) {
            Some(values) => SetAttr::Present(values),
            None => SetAttr::Null,
        }
    }

    /// Interprets a raw attribute. Returns `None` for a non-set value type.
    pub fn from_attr(value: Option<&AttrValue>) -> Option<Self> {
        match value {
            None | Some(AttrValue::Null) => Some(SetAttr::Null),
            Some(AttrValue::Ss(set)) => Some(SetAttr::from_set(set.clone())),
            Some(_) => None,
        }
    }

    /// The attribute value to write.
    pub fn to_attr(&self) -> AttrValue {
        match self {
            SetAttr::Null => AttrValue::Null,
            SetAttr::Present(values) => AttrValue::Ss(values.as_set().clone()),
        }
    }

    /// Computes `(self ∪ add) \ remove`.
    pub fn apply<A, R>(&self, add: A, remove: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        let mut set = self.to_set();
        set.extend(add.into_iter().map(Into::into));
        for value in remove {
            set.remove(value.as_ref());
        }
        SetAttr::from_set(set)
    }

    /// Copies the values into a plain set (empty for null).
    pub fn to_set(&self) -> BTreeSet<String> {
        match self {
            SetAttr::Null => BTreeSet::new(),
            SetAttr::Present(values) => values.as_set().clone(),
        }
    }

    /// Iterates over the values.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        let set = match self {
            SetAttr::Null => None,
            SetAttr::Present(values) => Some(values.as_set()),
        };
        set.into_iter().flatten()
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            SetAttr::Null => 0,
            SetAttr::Present(values) => values.len(),
        }
    }

    /// True for the null marker.
    pub fn is_null(&self) -> bool {
        matches!(self, SetAttr::Null)
    }

    /// Alias of [`SetAttr::is_null`].
    pub fn is_empty(&self) -> bool {
        self.is_null()
    }

    /// True if `value` is a member.
    pub fn contains(&self, value: &str) -> bool {
        match self {
            SetAttr::Null => false,
            SetAttr::Present(values) => values.as_set().contains(value),
        }
    }
}
