use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::config::deduplication_enabled;
use crate::errors::{FieldsError, Result};

/// Value paired with a trailing key that has no value slot.
static EMPTY_VALUE: Value = Value::String(String::new());

/// How [`Fields::merge`] treats keys present in both layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Addition followed by the whole receiver; duplicate keys pass through.
    Append,
    /// Addition followed by receiver pairs whose key the addition lacks.
    Deduplicate,
}

impl MergeMode {
    /// Mode selected by the process-wide de-duplication flag.
    pub fn current() -> Self {
        if deduplication_enabled() {
            MergeMode::Deduplicate
        } else {
            MergeMode::Append
        }
    }
}

/// Ordered, flat key/value list of structured log attributes.
///
/// Storage alternates `key, value, key, value, ...` with keys held as
/// `Value::String`. A trailing key without a value reads as `key = ""`.
/// Keys may repeat; only a de-duplicating merge removes repeats.
///
/// Cloning is cheap: handles share storage, and [`Fields::delete`] copies
/// before writing when the storage is shared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    items: Arc<Vec<Value>>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds from a flat alternating list, rejecting non-text key positions.
    pub fn from_flat(items: Vec<Value>) -> Result<Self> {
        if let Some((index, found)) = items
            .iter()
            .enumerate()
            .step_by(2)
            .find(|(_, item)| !item.is_string())
        {
            return Err(FieldsError::TypeMismatch {
                index,
                found: type_name(found),
            });
        }
        Ok(Self {
            items: Arc::new(items),
        })
    }

    /// Appends one pair. A dangling trailing key is first completed with `""`.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let items = Arc::make_mut(&mut self.items);
        if items.len() % 2 == 1 {
            items.push(EMPTY_VALUE.clone());
        }
        items.push(Value::String(key.into()));
        items.push(value.into());
        self
    }

    /// Number of flat slots (keys and values), as stored.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Number of pairs, counting a dangling trailing key as one pair.
    pub fn pair_count(&self) -> usize {
        (self.items.len() + 1) / 2
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            items: &self.items,
            pos: 0,
        }
    }

    /// Value of the first pair with `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    /// Flat alternating list for hand-off to an emitter.
    pub fn to_flat(&self) -> Vec<Value> {
        self.items.to_vec()
    }

    /// True when both handles point at the same storage.
    pub fn ptr_eq(&self, other: &Fields) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }

    /// Removes the first pair whose key is `key`.
    ///
    /// Later pairs shift left. An absent key returns `self` untouched.
    pub fn delete(mut self, key: &str) -> Self {
        let Some(pos) = self.position(key) else {
            return self;
        };
        let items = Arc::make_mut(&mut self.items);
        let end = (pos + 2).min(items.len());
        items.drain(pos..end);
        tracing::trace!(key, remaining = items.len(), "deleted field");
        self
    }

    /// Layers `add` over `self` using the process-wide de-duplication flag.
    pub fn with(&self, add: &Fields) -> Fields {
        self.merge(add, MergeMode::current())
    }

    /// Layers `add` over `self`: pairs from `add` come first, then `self`.
    ///
    /// An empty `add` returns a handle to the receiver's own storage.
    pub fn merge(&self, add: &Fields, mode: MergeMode) -> Fields {
        if add.is_empty() {
            return self.clone();
        }

        let mut result = Vec::with_capacity(add.len() + 1 + self.len());
        result.extend(add.items.iter().cloned());
        // keep the receiver's keys on even positions
        if result.len() % 2 == 1 {
            result.push(EMPTY_VALUE.clone());
        }

        match mode {
            MergeMode::Append => result.extend(self.items.iter().cloned()),
            MergeMode::Deduplicate => {
                let added: HashSet<&str> = add.iter().map(|(k, _)| k).collect();
                for (key, value) in self.iter().filter(|(k, _)| !added.contains(k)) {
                    result.push(Value::String(key.to_owned()));
                    result.push(value.clone());
                }
                result.shrink_to_fit();
            }
        }

        tracing::trace!(?mode, added = add.len(), total = result.len(), "merged fields");
        Fields {
            items: Arc::new(result),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.iter().position(|(k, _)| k == key).map(|pair| pair * 2)
    }
}

/// Restartable walk over the pairs of a [`Fields`], in storage order.
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    items: &'a [Value],
    pos: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.items.get(self.pos)?;
        let value = self.items.get(self.pos + 1).unwrap_or(&EMPTY_VALUE);
        self.pos += 2;
        Some((key_str(key), value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.items.len().saturating_sub(self.pos) + 1) / 2;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a Fields {
    type Item = (&'a str, &'a Value);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl TryFrom<Vec<Value>> for Fields {
    type Error = FieldsError;

    fn try_from(items: Vec<Value>) -> Result<Self> {
        Fields::from_flat(items)
    }
}

impl From<&Fields> for Fields {
    fn from(fields: &Fields) -> Self {
        fields.clone()
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (key, value) in iter {
            fields.push(key, value);
        }
        fields
    }
}

/// Serializes as a map in storage order. Repeated keys are written as
/// repeated entries; serializers that build a map in memory keep the last.
impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.pair_count()))?;
        for (key, value) in self {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// `key=value` pairs separated by spaces; text values are unquoted.
impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .iter()
            .map(|(key, value)| match value {
                Value::String(text) => format!("{key}={text}"),
                other => format!("{key}={other}"),
            })
            .join(" ");
        f.write_str(&rendered)
    }
}

fn key_str(item: &Value) -> &str {
    match item {
        Value::String(key) => key,
        // every constructor validates key positions
        other => unreachable!("field key is {}, expected string", type_name(other)),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Builds a [`Fields`] from `key => value` pairs; values go through `json!`.
///
/// ```
/// use context_log_fields::fields;
///
/// let f = fields! { "qey" => 42, "str" => "anything" };
/// assert_eq!(f.pair_count(), 2);
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::Fields::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut fields = $crate::Fields::new();
        $( fields.push($key, $crate::json!($value)); )+
        fields
    }};
}
