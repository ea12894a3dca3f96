//! Structured keys and their ordering.
//!
//! Keys are semi-structured values: scalars, arrays, and objects nest
//! freely, mirroring the JSON documents they usually index. Ordering is
//! **structural**, not byte-wise, and object comparison is deliberately
//! asymmetric: an object holding a subset of another object's fields
//! compares equal to it when used as the first operand. Range scans exploit
//! this to answer subset searches with a partial key.
//!
//! Because of that asymmetry, [`Key`] does not implement `Ord`. The engine
//! keeps its ordered structures sorted through [`Key::cmp_structural`]
//! directly, and `PartialEq`/`Hash` use strict content equality (field order
//! still ignored for objects). A partial key is therefore *not* equal to the
//! full keys it matches, and hash lookups will not find it; only the ordered
//! accessors honor subset matching.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use uuid::Uuid;

/// A structured dictionary key.
#[derive(Debug, Clone)]
pub enum Key {
    /// Absent value. Sorts before every other type.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float, ordered by the IEEE 754 total order.
    Float(f64),
    /// UTF-8 text, ordered byte-wise.
    Text(String),
    /// UTC instant. The log codec keeps microsecond precision, so
    /// sub-microsecond components do not survive a restart.
    Timestamp(DateTime<Utc>),
    /// Raw bytes. Exactly 16 bytes order as a canonical identifier
    /// (little-endian field layout), any other length lexicographically.
    Bytes(Vec<u8>),
    /// Ordered list of keys.
    Array(Vec<Key>),
    /// Named fields. Field order is preserved for display but ignored by
    /// comparison, equality, and hashing.
    Object(Vec<(String, Key)>),
}

impl Key {
    /// Compares two keys under the engine's structural order.
    ///
    /// Mismatched types order by a fixed type rank. Same-type values compare
    /// natively, except:
    ///
    /// - 16-byte `Bytes` compare as canonical identifiers, not
    ///   lexicographically
    /// - arrays compare element-wise, ties broken by length
    /// - objects compare by the *second* operand's fields: fields missing
    ///   from the first operand are skipped, and a first operand with more
    ///   fields than the second ranks lower
    ///
    /// The object rule makes this comparison asymmetric: a partial object
    /// used as the first operand compares `Equal` to any full object
    /// agreeing on its fields, while the reverse comparison returns `Less`.
    #[must_use]
    pub fn cmp_structural(&self, other: &Key) -> Ordering {
        match (self, other) {
            (Key::Null, Key::Null) => Ordering::Equal,
            (Key::Bool(a), Key::Bool(b)) => a.cmp(b),
            (Key::Int(a), Key::Int(b)) => a.cmp(b),
            (Key::Float(a), Key::Float(b)) => a.total_cmp(b),
            (Key::Text(a), Key::Text(b)) => a.cmp(b),
            (Key::Timestamp(a), Key::Timestamp(b)) => a.cmp(b),
            (Key::Bytes(a), Key::Bytes(b)) => compare_bytes(a, b),
            (Key::Array(a), Key::Array(b)) => compare_arrays(a, b),
            (Key::Object(a), Key::Object(b)) => compare_objects(a, b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    /// Computes the structural hash of this key.
    ///
    /// Equal keys (under `PartialEq`) hash identically. Object fields fold
    /// order-insensitively, matching the order-insensitive equality. The
    /// hash covers full content, so a partial key hashes differently from
    /// the full keys it compares equal to.
    #[must_use]
    pub fn structural_hash(&self) -> u64 {
        match self {
            Key::Null => 0,
            Key::Bool(value) => combine(1, u64::from(*value)),
            Key::Int(value) => combine(2, *value as u64),
            Key::Float(value) => combine(3, value.to_bits()),
            Key::Text(value) => combine(4, fnv1a(value.as_bytes())),
            Key::Timestamp(value) => combine(5, value.timestamp_micros() as u64),
            Key::Bytes(value) => combine(6, fnv1a(value)),
            Key::Array(items) => {
                let mut hash = 7u64;
                for item in items {
                    hash = combine(hash, item.structural_hash());
                }
                hash
            }
            Key::Object(fields) => {
                // XOR fold keeps the hash independent of field order, like
                // equality
                let mut fold = 0u64;
                for (name, value) in fields {
                    fold ^= combine(fnv1a(name.as_bytes()), value.structural_hash());
                }
                combine(8, fold)
            }
        }
    }

    pub(crate) const fn type_rank(&self) -> u8 {
        match self {
            Key::Null => 0,
            Key::Bool(_) => 1,
            Key::Int(_) => 2,
            Key::Float(_) => 3,
            Key::Text(_) => 4,
            Key::Timestamp(_) => 5,
            Key::Bytes(_) => 6,
            Key::Array(_) => 7,
            Key::Object(_) => 8,
        }
    }
}

fn compare_bytes(a: &[u8], b: &[u8]) -> Ordering {
    if a.len() == 16 && b.len() == 16 {
        if let (Ok(a16), Ok(b16)) = (<[u8; 16]>::try_from(a), <[u8; 16]>::try_from(b)) {
            return Uuid::from_bytes_le(a16).cmp(&Uuid::from_bytes_le(b16));
        }
    }
    a.cmp(b)
}

fn compare_arrays(a: &[Key], b: &[Key]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = x.cmp_structural(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_objects(first: &[(String, Key)], second: &[(String, Key)]) -> Ordering {
    for (name, second_value) in second {
        if let Some(first_value) = field(first, name) {
            let ord = first_value.cmp_structural(second_value);
            if ord != Ordering::Equal {
                return ord;
            }
        }
    }
    if first.len() > second.len() {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

fn field<'a>(fields: &'a [(String, Key)], name: &str) -> Option<&'a Key> {
    fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

fn objects_eq(a: &[(String, Key)], b: &[(String, Key)]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(name, value)| field(b, name).is_some_and(|other| other == value))
}

fn combine(hash: u64, child: u64) -> u64 {
    hash.wrapping_mul(397) ^ child
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Null, Key::Null) => true,
            (Key::Bool(a), Key::Bool(b)) => a == b,
            (Key::Int(a), Key::Int(b)) => a == b,
            (Key::Float(a), Key::Float(b)) => a.total_cmp(b) == Ordering::Equal,
            (Key::Text(a), Key::Text(b)) => a == b,
            (Key::Timestamp(a), Key::Timestamp(b)) => a == b,
            (Key::Bytes(a), Key::Bytes(b)) => a == b,
            (Key::Array(a), Key::Array(b)) => a == b,
            (Key::Object(a), Key::Object(b)) => objects_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl From<bool> for Key {
    fn from(value: bool) -> Self {
        Key::Bool(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

impl From<DateTime<Utc>> for Key {
    fn from(value: DateTime<Utc>) -> Self {
        Key::Timestamp(value)
    }
}

impl From<serde_json::Value> for Key {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Key::Null,
            serde_json::Value::Bool(b) => Key::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Key::Int(i)
                } else {
                    Key::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Key::Text(s),
            serde_json::Value::Array(items) => {
                Key::Array(items.into_iter().map(Key::from).collect())
            }
            serde_json::Value::Object(fields) => Key::Object(
                fields
                    .into_iter()
                    .map(|(name, v)| (name, Key::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Key::Null => serializer.serialize_unit(),
            Key::Bool(b) => serializer.serialize_bool(*b),
            Key::Int(i) => serializer.serialize_i64(*i),
            Key::Float(f) => serializer.serialize_f64(*f),
            Key::Text(s) => serializer.serialize_str(s),
            Key::Timestamp(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            Key::Bytes(b) => serializer.serialize_bytes(b),
            Key::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Key::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<unprintable key>"),
        }
    }
}
