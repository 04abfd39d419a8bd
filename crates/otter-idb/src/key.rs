//! Keys, values and key ranges.
//!
//! Keys follow IndexedDB ordering: numbers sort before strings, strings sort
//! before binary keys, and binary keys compare bytewise.

use crate::error::{IdbError, IdbResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

/// A valid object store key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Key {
    Number(f64),
    String(String),
    Binary(Vec<u8>),
}

impl Key {
    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Binary(_) => 2,
        }
    }

    /// Reject values IndexedDB would not accept as keys
    pub fn validate(&self) -> IdbResult<()> {
        match self {
            Key::Number(n) if n.is_nan() => Err(IdbError::data("NaN is not a valid key")),
            _ => Ok(()),
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Key::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn into_binary(self) -> IdbResult<Vec<u8>> {
        match self {
            Key::Binary(bytes) => Ok(bytes),
            other => Err(IdbError::UnexpectedValue {
                expected: "binary key",
                found: other.type_name(),
            }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Key::Number(_) => "number key",
            Key::String(_) => "string key",
            Key::Binary(_) => "binary key",
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => unsigned_zero(*a).total_cmp(&unsigned_zero(*b)),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// `-0.0` and `0.0` are the same key
fn unsigned_zero(n: f64) -> f64 {
    if n == 0.0 { 0.0 } else { n }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Key::Binary(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Key::Binary(bytes)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(n)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(f64::from(n))
    }
}

/// A structured value held by an object store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> IdbResult<Vec<u8>> {
        match self {
            Value::Bytes(bytes) => Ok(bytes),
            other => Err(IdbError::UnexpectedValue {
                expected: "bytes",
                found: other.type_name(),
            }),
        }
    }

    /// Look up a dotted key path (`"a.b"`) inside nested maps
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |value, segment| match value {
            Value::Map(map) => map.get(segment),
            _ => None,
        })
    }

    /// Convert to a key, for values that are valid keys
    pub fn to_key(&self) -> Option<Key> {
        match self {
            Value::Number(n) if !n.is_nan() => Some(Key::Number(*n)),
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Bytes(b) => Some(Key::Binary(b.clone())),
            _ => None,
        }
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A contiguous interval of keys
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

impl KeyRange {
    /// Build a range between two keys.
    ///
    /// Fails with a DataError if `lower` sorts after `upper`, or if they are
    /// equal and either side is open.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> IdbResult<Self> {
        let lower = lower.into();
        let upper = upper.into();
        lower.validate()?;
        upper.validate()?;
        match lower.cmp(&upper) {
            Ordering::Greater => {
                return Err(IdbError::data("lower bound is greater than upper bound"));
            }
            Ordering::Equal if lower_open || upper_open => {
                return Err(IdbError::data("empty range with an open bound"));
            }
            _ => {}
        }
        Ok(Self {
            lower: if lower_open {
                Bound::Excluded(lower)
            } else {
                Bound::Included(lower)
            },
            upper: if upper_open {
                Bound::Excluded(upper)
            } else {
                Bound::Included(upper)
            },
        })
    }

    /// Range matching a single key
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Every key above `key`
    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        let key = key.into();
        Self {
            lower: if open {
                Bound::Excluded(key)
            } else {
                Bound::Included(key)
            },
            upper: Bound::Unbounded,
        }
    }

    /// Every key below `key`
    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Unbounded,
            upper: if open {
                Bound::Excluded(key)
            } else {
                Bound::Included(key)
            },
        }
    }

    /// `[prefix, prefix ++ 0xFF)` over binary keys, or `None` (no range, scan
    /// everything) for an empty prefix.
    pub fn prefix(prefix: &[u8]) -> Option<Self> {
        if prefix.is_empty() {
            return None;
        }
        let mut upper = Vec::with_capacity(prefix.len() + 1);
        upper.extend_from_slice(prefix);
        upper.push(u8::MAX);
        Some(Self {
            lower: Bound::Included(Key::Binary(prefix.to_vec())),
            upper: Bound::Excluded(Key::Binary(upper)),
        })
    }

    pub fn lower(&self) -> Bound<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Bound<&Key> {
        self.upper.as_ref()
    }

    pub fn contains(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Bound::Included(lower) => key >= lower,
            Bound::Excluded(lower) => key > lower,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(upper) => key <= upper,
            Bound::Excluded(upper) => key < upper,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// Whether any key can fall inside the range
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(l), Bound::Included(u)) => l > u,
            (Bound::Included(l), Bound::Excluded(u))
            | (Bound::Excluded(l), Bound::Included(u))
            | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
            _ => false,
        }
    }

    /// The part of this range strictly after `key`, or `None` once nothing
    /// is left.
    pub fn after(&self, key: &Key) -> Option<Self> {
        let lower = match &self.lower {
            Bound::Included(lower) | Bound::Excluded(lower) if lower > key => self.lower.clone(),
            _ => Bound::Excluded(key.clone()),
        };
        let range = Self {
            lower,
            upper: self.upper.clone(),
        };
        (!range.is_empty()).then_some(range)
    }
}

/// Key selector accepted by object store requests
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Query {
    #[default]
    All,
    Key(Key),
    Range(KeyRange),
}

impl Query {
    pub fn matches(&self, key: &Key) -> bool {
        match self {
            Query::All => true,
            Query::Key(k) => k == key,
            Query::Range(range) => range.contains(key),
        }
    }

    /// Bounds suitable for `BTreeMap::range`, or `None` if nothing can match.
    pub fn bounds(&self) -> Option<(Bound<&Key>, Bound<&Key>)> {
        match self {
            Query::All => Some((Bound::Unbounded, Bound::Unbounded)),
            Query::Key(k) => Some((Bound::Included(k), Bound::Included(k))),
            Query::Range(range) if range.is_empty() => None,
            Query::Range(range) => Some((range.lower(), range.upper())),
        }
    }

    pub fn validate(&self) -> IdbResult<()> {
        match self {
            Query::Key(key) => key.validate(),
            _ => Ok(()),
        }
    }
}

impl From<Key> for Query {
    fn from(key: Key) -> Self {
        Query::Key(key)
    }
}

impl From<KeyRange> for Query {
    fn from(range: KeyRange) -> Self {
        Query::Range(range)
    }
}

impl From<Option<KeyRange>> for Query {
    fn from(range: Option<KeyRange>) -> Self {
        range.map_or(Query::All, Query::Range)
    }
}

impl From<&[u8]> for Query {
    fn from(bytes: &[u8]) -> Self {
        Query::Key(Key::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![
            Key::from(b"b".as_slice()),
            Key::from("z"),
            Key::from(3.0),
            Key::from(b"a".as_slice()),
            Key::from("a"),
            Key::from(-1.0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::from(-1.0),
                Key::from(3.0),
                Key::from("a"),
                Key::from("z"),
                Key::from(b"a".as_slice()),
                Key::from(b"b".as_slice()),
            ]
        );
    }

    #[test]
    fn test_negative_zero_is_zero() {
        assert_eq!(Key::Number(-0.0), Key::Number(0.0));
        assert!(Key::Number(-0.0) > Key::Number(-1e-300));

        let mut map = BTreeMap::new();
        map.insert(Key::Number(0.0), "zero");
        assert_eq!(map.get(&Key::Number(-0.0)), Some(&"zero"));
        map.insert(Key::Number(-0.0), "again");
        assert_eq!(map.len(), 1);

        assert!(KeyRange::only(-0.0).contains(&Key::Number(0.0)));
    }

    #[test]
    fn test_single_and_half_open_ranges() {
        let only = KeyRange::only("b");
        assert!(only.contains(&Key::from("b")));
        assert!(!only.contains(&Key::from("a")));
        assert!(!only.contains(&Key::from("c")));

        let below = KeyRange::upper_bound("m", true);
        assert!(below.contains(&Key::from(5.0)));
        assert!(below.contains(&Key::from("a")));
        assert!(!below.contains(&Key::from("m")));
        assert!(KeyRange::upper_bound("m", false).contains(&Key::from("m")));
    }

    #[test]
    fn test_binary_accessors() {
        let key = Key::from(b"raw".as_slice());
        assert_eq!(key.as_binary(), Some(b"raw".as_slice()));
        assert_eq!(Key::from("raw").as_binary(), None);
        assert!(Key::from(1.0).into_binary().is_err());
    }

    #[test]
    fn test_nan_key_rejected() {
        assert!(Key::Number(f64::NAN).validate().is_err());
        assert!(KeyRange::bound(f64::NAN, 1.0, false, false).is_err());
    }

    #[test]
    fn test_bound_validation() {
        assert!(KeyRange::bound("b", "a", false, false).is_err());
        assert!(KeyRange::bound("a", "a", true, false).is_err());
        let range = KeyRange::bound("a", "a", false, false).unwrap();
        assert!(range.contains(&Key::from("a")));
    }

    #[test]
    fn test_prefix_range() {
        assert!(KeyRange::prefix(b"").is_none());

        let range = KeyRange::prefix(b"ke").unwrap();
        assert!(range.contains(&Key::from(b"ke".as_slice())));
        assert!(range.contains(&Key::from(b"key".as_slice())));
        assert!(range.contains(&Key::from(b"ke\xfe\xff".as_slice())));
        assert!(!range.contains(&Key::from(b"kf".as_slice())));
        assert!(!range.contains(&Key::from(b"k".as_slice())));
        assert!(!range.contains(&Key::from(b"ke\xff".as_slice())));
        assert!(!range.contains(&Key::from("key")));
    }

    #[test]
    fn test_after_narrows_lower_bound() {
        let range = KeyRange::bound("a", "d", false, false).unwrap();
        let rest = range.after(&Key::from("b")).unwrap();
        assert!(!rest.contains(&Key::from("b")));
        assert!(rest.contains(&Key::from("c")));
        assert!(rest.contains(&Key::from("d")));

        assert!(range.after(&Key::from("d")).is_none());

        let open = KeyRange::bound("a", "d", false, true).unwrap();
        assert!(open.after(&Key::from("c")).is_some());
        assert!(open.after(&Key::from("d")).is_none());
    }

    #[test]
    fn test_query_bounds() {
        assert!(Query::All.bounds().is_some());
        let empty = KeyRange {
            lower: Bound::Excluded(Key::from("a")),
            upper: Bound::Excluded(Key::from("a")),
        };
        assert!(Query::Range(empty).bounds().is_none());
        assert!(Query::from(Key::from("a")).matches(&Key::from("a")));
        assert!(!Query::from(Key::from("a")).matches(&Key::from("b")));
    }

    #[test]
    fn test_value_path() {
        let mut inner = BTreeMap::new();
        inner.insert("id".to_string(), Value::from("u1"));
        let mut outer = BTreeMap::new();
        outer.insert("user".to_string(), Value::Map(inner));
        let value = Value::Map(outer);

        assert_eq!(value.get_path("user.id"), Some(&Value::from("u1")));
        assert_eq!(value.get_path("user.name"), None);
        assert_eq!(
            value.get_path("user.id").and_then(Value::to_key),
            Some(Key::from("u1"))
        );
    }

    #[test]
    fn test_value_bytes() {
        assert_eq!(Value::from(b"x".as_slice()).into_bytes().unwrap(), b"x");
        assert!(matches!(
            Value::from("x").into_bytes(),
            Err(IdbError::UnexpectedValue { found: "string", .. })
        ));
    }
}
