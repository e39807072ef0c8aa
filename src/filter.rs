//! Filter selection tree.
//!
//! A filter spec is a closed tree: every node is either a scalar value or an
//! ordered group of named children. Root keys compile to `and`-joined groups,
//! nested keys to `or`-joined predicates under dotted names such as
//! `status_code.error`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Leaf value of a filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    /// Kept as the JSON number so large integer ids survive unchanged.
    Number(Number),
    Text(String),
}

impl FilterValue {
    /// Truthiness as seen by the filter UI: `null`, `false`, `""` and `0` are off.
    pub fn is_truthy(&self) -> bool {
        match self {
            FilterValue::Null => false,
            FilterValue::Bool(b) => *b,
            FilterValue::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            FilterValue::Text(s) => !s.is_empty(),
        }
    }

    /// Whether a root-level scalar is excluded from compilation altogether.
    pub fn is_blank(&self) -> bool {
        matches!(self, FilterValue::Null | FilterValue::Bool(false))
            || matches!(self, FilterValue::Text(s) if s.is_empty())
    }

    /// Interpret a raw token typed by the operator.
    ///
    /// `true`/`false`/`null` and numbers keep their scalar type, a double-quoted
    /// token is always text, anything else is text as typed.
    pub fn from_input(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            return FilterValue::Text(raw[1..raw.len() - 1].to_string());
        }
        match raw {
            "true" => FilterValue::Bool(true),
            "false" => FilterValue::Bool(false),
            "null" => FilterValue::Null,
            _ => match parse_number(raw) {
                Some(n) => FilterValue::Number(n),
                None => FilterValue::Text(raw.to_string()),
            },
        }
    }
}

/// Integers stay exact; anything else must be a finite float.
fn parse_number(raw: &str) -> Option<Number> {
    raw.parse::<i64>()
        .map(Number::from)
        .or_else(|_| raw.parse::<u64>().map(Number::from))
        .ok()
        .or_else(|| raw.parse::<f64>().ok().and_then(Number::from_f64))
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Null => f.write_str("null"),
            FilterValue::Bool(b) => write!(f, "{}", b),
            FilterValue::Number(n) => write!(f, "{}", n),
            FilterValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(FilterValue::Null, FilterValue::Number)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(value.into())
    }
}


impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

/// A node of the filter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum FilterSpec {
    Scalar(FilterValue),
    Group(FilterGroup),
}

macro_rules! scalar_spec_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for FilterSpec {
            fn from(value: $ty) -> Self {
                FilterSpec::Scalar(value.into())
            }
        })*
    };
}

scalar_spec_from!(bool, f64, i64, &str, String);

impl From<FilterValue> for FilterSpec {
    fn from(value: FilterValue) -> Self {
        FilterSpec::Scalar(value)
    }
}

impl From<FilterGroup> for FilterSpec {
    fn from(group: FilterGroup) -> Self {
        FilterSpec::Group(group)
    }
}

/// Ordered mapping of keys to filter nodes. Key order is iteration order and
/// governs the literal SQL emitted for the group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct FilterGroup {
    entries: Vec<(String, FilterSpec)>,
}

impl FilterGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, spec: impl Into<FilterSpec>) -> Self {
        self.insert(key, spec);
        self
    }

    /// Insert or replace `key`. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, spec: impl Into<FilterSpec>) {
        let key = key.into();
        let spec = spec.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = spec,
            None => self.entries.push((key, spec)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FilterSpec> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<FilterSpec> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterSpec)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Set the leaf at a dotted path, creating intermediate groups. A scalar
    /// sitting where a group is needed is replaced by the group.
    pub fn set_path(&mut self, path: &str, value: impl Into<FilterValue>) {
        let value = value.into();
        let mut segments = path.split('.').filter(|s| !s.is_empty()).peekable();
        let mut group = self;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                group.insert(segment, FilterSpec::Scalar(value));
                return;
            }
            if !matches!(group.get(segment), Some(FilterSpec::Group(_))) {
                group.insert(segment, FilterGroup::new());
            }
            group = match group.get_mut(segment) {
                Some(FilterSpec::Group(child)) => child,
                _ => return,
            };
        }
    }

    /// Remove the node at a dotted path and prune groups left empty.
    /// Returns whether anything was removed.
    pub fn remove_path(&mut self, path: &str) -> bool {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        self.remove_segments(&segments)
    }

    fn remove_segments(&mut self, segments: &[&str]) -> bool {
        match segments {
            [] => false,
            [last] => self.remove(last).is_some(),
            [head, rest @ ..] => {
                let (removed, emptied) = match self.get_mut(head) {
                    Some(FilterSpec::Group(child)) => {
                        (child.remove_segments(rest), child.is_empty())
                    }
                    _ => (false, false),
                };
                if emptied {
                    self.remove(head);
                }
                removed
            }
        }
    }

    /// Remove every node whose full dotted name is `path`, whether stored as a
    /// dotted key, nested groups, or a mix. Emptied groups are pruned.
    fn remove_dotted(&mut self, path: &str) -> bool {
        let mut removed = false;
        self.entries.retain_mut(|(key, spec)| {
            if key.as_str() == path {
                removed = true;
                return false;
            }
            let rest = path
                .strip_prefix(key.as_str())
                .and_then(|rest| rest.strip_prefix('.'));
            if let (Some(rest), FilterSpec::Group(child)) = (rest, spec) {
                if child.remove_dotted(rest) {
                    removed = true;
                    return !child.is_empty();
                }
            }
            true
        });
        removed
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut FilterSpec> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Overlay `other` onto a copy of this group. Keys from `other` win; nested
    /// groups are merged recursively.
    ///
    /// A leaf of `other` replaces the leaf with the same dotted name here
    /// however either side spells it, so `{"a.b": 1}` overrides `{"a": {"b": 2}}`.
    pub fn merged(&self, other: &FilterGroup) -> FilterGroup {
        let mut out = self.clone();
        for (path, _) in other.leaves("") {
            out.remove_dotted(&path);
        }
        for (key, spec) in other.iter() {
            if let (Some(FilterSpec::Group(mine)), FilterSpec::Group(theirs)) = (out.get_mut(key), spec) {
                *mine = mine.merged(theirs);
                continue;
            }
            out.insert(key, spec.clone());
        }
        out
    }

    /// Flatten to `(dotted_key, value)` leaves under `prefix`, in iteration order.
    pub fn leaves(&self, prefix: &str) -> Vec<(String, &FilterValue)> {
        let mut out = Vec::new();
        self.collect_leaves(prefix, &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a FilterValue)>) {
        for (key, spec) in self.iter() {
            let dotted = if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{}.{}", prefix, key)
            };
            match spec {
                FilterSpec::Scalar(value) => out.push((dotted, value)),
                FilterSpec::Group(group) => group.collect_leaves(&dotted, out),
            }
        }
    }
}

impl From<Value> for FilterSpec {
    fn from(value: Value) -> Self {
        match value {
            Value::Null | Value::Array(_) => FilterSpec::Scalar(FilterValue::Null),
            Value::Bool(b) => FilterSpec::Scalar(FilterValue::Bool(b)),
            Value::Number(n) => FilterSpec::Scalar(FilterValue::Number(n)),
            Value::String(s) => FilterSpec::Scalar(FilterValue::Text(s)),
            Value::Object(map) => FilterSpec::Group(FilterGroup {
                entries: map.into_iter().map(|(k, v)| (k, FilterSpec::from(v))).collect(),
            }),
        }
    }
}

impl From<FilterSpec> for Value {
    fn from(spec: FilterSpec) -> Self {
        match spec {
            FilterSpec::Scalar(FilterValue::Null) => Value::Null,
            FilterSpec::Scalar(FilterValue::Bool(b)) => Value::Bool(b),
            FilterSpec::Scalar(FilterValue::Number(n)) => Value::Number(n),
            FilterSpec::Scalar(FilterValue::Text(s)) => Value::String(s),
            FilterSpec::Group(group) => group.into(),
        }
    }
}

/// Raised when a filter group is built from JSON that is not an object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("filter group must be a JSON object")]
pub struct NotAGroup;

impl TryFrom<Value> for FilterGroup {
    type Error = NotAGroup;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match FilterSpec::from(value) {
            FilterSpec::Group(group) => Ok(group),
            FilterSpec::Scalar(_) => Err(NotAGroup),
        }
    }
}

impl From<FilterGroup> for Value {
    fn from(group: FilterGroup) -> Self {
        Value::Object(
            group
                .entries
                .into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect(),
        )
    }
}
