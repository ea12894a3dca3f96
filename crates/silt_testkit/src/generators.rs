//! Property-based test generators using proptest.
//!
//! Provides strategies for structured keys, value payloads, and store
//! operation sequences. Generated object keys always carry unique field
//! names, matching what the engine's comparator assumes.

use chrono::DateTime;
use proptest::prelude::*;
use silt_core::Key;

/// Strategy for generating scalar (non-nested) keys.
pub fn scalar_key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        1 => Just(Key::Null),
        2 => any::<bool>().prop_map(Key::Bool),
        4 => any::<i64>().prop_map(Key::Int),
        3 => any::<f64>().prop_map(Key::Float),
        4 => prop::string::string_regex(".{0,16}")
            .expect("Invalid regex")
            .prop_map(Key::Text),
        2 => timestamp_strategy(),
        2 => prop::collection::vec(any::<u8>(), 0..32).prop_map(Key::Bytes),
        2 => prop::array::uniform16(any::<u8>()).prop_map(|bytes| Key::Bytes(bytes.to_vec())),
    ]
}

/// Strategy for generating keys of any shape, nested up to three levels.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    scalar_key_strategy().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Key::Array),
            prop::collection::btree_map(field_name_strategy(), inner, 1..4)
                .prop_map(|fields| Key::Object(fields.into_iter().collect())),
        ]
    })
}

/// Strategy for generating object field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for generating timestamp keys with microsecond precision,
/// which is exactly what survives a trip through the commit log.
pub fn timestamp_strategy() -> impl Strategy<Value = Key> {
    (-10_000_000_000_000_000_i64..10_000_000_000_000_000).prop_map(|micros| {
        Key::Timestamp(DateTime::from_timestamp_micros(micros).expect("micros in range"))
    })
}

/// Strategy for generating value payloads.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..1024)
}

/// A single mutation against one dictionary.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Write a value under a key.
    Put {
        /// Key to write.
        key: Key,
        /// Value payload.
        value: Vec<u8>,
    },
    /// Delete a key.
    Delete {
        /// Key to delete.
        key: Key,
    },
}

/// Strategy for generating a single store operation.
pub fn store_operation_strategy() -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        3 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| StoreOperation::Put { key, value }),
        1 => key_strategy().prop_map(|key| StoreOperation::Delete { key }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(store_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Configuration for quick smoke runs.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Configuration for thorough runs.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to a proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
