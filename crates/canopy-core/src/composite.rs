#![forbid(unsafe_code)]

//! Object-or-array container shape.
//!
//! [`Composite<T>`] mirrors the two composite kinds of a JSON document but
//! lets the element type vary, so the same shape can hold plain values,
//! wrapped children, or anything in between. Array elements are addressed by
//! their canonical decimal index (`"0"`, `"1"`, ...), which keeps property
//! names uniform across both kinds.

use std::borrow::Cow;
use std::fmt;

use indexmap::IndexMap;
use serde_json::{Map, Value};

/// A key that does not address an element of an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexError {
    /// The offending key.
    pub key: String,
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` is not a valid array index", self.key)
    }
}

impl std::error::Error for IndexError {}

/// Most `null` slots an array write may pad past the current end.
pub const MAX_GAP: usize = 1 << 16;

/// Parse a canonical array index: ASCII digits, no sign, no leading zeros.
#[must_use]
pub fn parse_index(key: &str) -> Option<usize> {
    let canonical = !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && (key == "0" || !key.starts_with('0'));
    if canonical { key.parse().ok() } else { None }
}

/// An ordered object or an array holding `T` values.
#[derive(Debug, Clone, PartialEq)]
pub enum Composite<T> {
    /// String-keyed properties in insertion order.
    Object(IndexMap<String, T>),
    /// Index-addressed elements.
    Array(Vec<T>),
}

impl<T> Composite<T> {
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Object(map) => map.len(),
            Self::Array(items) => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a property (object key or array index).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        match self {
            Self::Object(map) => map.get(key),
            Self::Array(items) => parse_index(key).and_then(|i| items.get(i)),
        }
    }

    /// Property names in iteration order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.iter().map(|(k, _)| k.into_owned()).collect()
    }

    /// Iterate `(name, value)` pairs; array names are the element indices.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (Cow<'_, str>, &T)> + '_> {
        match self {
            Self::Object(map) => Box::new(map.iter().map(|(k, v)| (Cow::Borrowed(k.as_str()), v))),
            Self::Array(items) => Box::new(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (Cow::Owned(i.to_string()), v)),
            ),
        }
    }

    /// Iterate values in property order.
    pub fn values(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            Self::Object(map) => Box::new(map.values()),
            Self::Array(items) => Box::new(items.iter()),
        }
    }

    /// Name of the first property whose value satisfies `pred`.
    pub fn key_of(&self, mut pred: impl FnMut(&T) -> bool) -> Option<String> {
        self.iter().find(|(_, v)| pred(v)).map(|(k, _)| k.into_owned())
    }

    /// Store `value` under `key`, returning the value it replaced.
    ///
    /// Objects keep the position of an existing key. Arrays replace in
    /// bounds, append at `len`, and fill any gap past `len` with `pad()`.
    /// A gap wider than [`MAX_GAP`] is rejected and nothing is stored.
    pub fn insert(
        &mut self,
        key: &str,
        value: T,
        mut pad: impl FnMut() -> T,
    ) -> Result<Option<T>, IndexError> {
        match self {
            Self::Object(map) => Ok(map.insert(key.to_owned(), value)),
            Self::Array(items) => {
                let index = parse_index(key).ok_or_else(|| IndexError {
                    key: key.to_owned(),
                })?;
                if index < items.len() {
                    return Ok(Some(std::mem::replace(&mut items[index], value)));
                }
                if index - items.len() > MAX_GAP {
                    return Err(IndexError {
                        key: key.to_owned(),
                    });
                }
                while items.len() < index {
                    items.push(pad());
                }
                items.push(value);
                Ok(None)
            }
        }
    }

    /// Remove a property. Later array elements shift down by one.
    pub fn remove(&mut self, key: &str) -> Result<Option<T>, IndexError> {
        match self {
            Self::Object(map) => Ok(map.shift_remove(key)),
            Self::Array(items) => {
                let index = parse_index(key).ok_or_else(|| IndexError {
                    key: key.to_owned(),
                })?;
                Ok((index < items.len()).then(|| items.remove(index)))
            }
        }
    }

    /// Resize an array, truncating or filling with `pad()`. Returns the
    /// removed tail. Growing by more than [`MAX_GAP`] is rejected. Objects
    /// are left untouched.
    pub fn resize_with(
        &mut self,
        len: usize,
        pad: impl FnMut() -> T,
    ) -> Result<Vec<T>, IndexError> {
        match self {
            Self::Object(_) => Ok(Vec::new()),
            Self::Array(items) => {
                if len.saturating_sub(items.len()) > MAX_GAP {
                    return Err(IndexError {
                        key: len.to_string(),
                    });
                }
                let tail = if len < items.len() {
                    items.split_off(len)
                } else {
                    Vec::new()
                };
                items.resize_with(len, pad);
                Ok(tail)
            }
        }
    }

    /// Transform every value, keeping the shape.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Composite<U> {
        match self {
            Self::Object(map) => Composite::Object(map.into_iter().map(|(k, v)| (k, f(v))).collect()),
            Self::Array(items) => Composite::Array(items.into_iter().map(f).collect()),
        }
    }

    /// Rebuild a plain JSON value, converting each element with `f`.
    pub fn into_value(self, mut f: impl FnMut(T) -> Value) -> Value {
        match self {
            Self::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, f(v))).collect::<Map<_, _>>())
            }
            Self::Array(items) => Value::Array(items.into_iter().map(f).collect()),
        }
    }
}

/// Apply `transform` to every property of an object, or every element of an
/// array, returning a container of the same shape.
///
/// Scalars have no properties and are handed back unchanged as `Err`.
pub fn map_properties<T>(
    value: Value,
    transform: impl FnMut(Value) -> T,
) -> Result<Composite<T>, Value> {
    match value {
        Value::Object(map) => Ok(Composite::Object(map.into_iter().collect::<IndexMap<_, _>>())
            .map(transform)),
        Value::Array(items) => Ok(Composite::Array(items).map(transform)),
        other => Err(other),
    }
}
