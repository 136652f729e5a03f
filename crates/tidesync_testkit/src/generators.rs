//! Property-based test generators using proptest.
//!
//! Provides strategies for generating documents and batches that keep the
//! invariants replication relies on (string ids, unique keys).

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// Strategy for primary keys.
pub fn primary_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for human documents that satisfy the fixture schema.
pub fn human_strategy() -> impl Strategy<Value = Value> {
    (
        primary_key_strategy(),
        prop::string::string_regex("[A-Z][a-z]{1,9}").expect("Invalid regex"),
        0i64..=150,
    )
        .prop_map(|(id, first_name, age)| json!({ "id": id, "firstName": first_name, "age": age }))
}

/// Strategy for batches of humans with distinct ids.
pub fn human_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(human_strategy(), 0..=max).prop_map(|docs| {
        let unique: BTreeMap<String, Value> = docs
            .into_iter()
            .filter_map(|doc| doc["id"].as_str().map(|id| (id.to_string(), doc.clone())))
            .collect();
        unique.into_values().collect()
    })
}

/// Strategy for arbitrary JSON scalars.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        prop::string::string_regex("[ -~]{0,16}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for flat document bodies with an `id` field.
pub fn body_strategy() -> impl Strategy<Value = Map<String, Value>> {
    (
        primary_key_strategy(),
        prop::collection::btree_map(
            prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
            scalar_strategy(),
            0..6,
        ),
    )
        .prop_map(|(id, fields)| {
            let mut body: Map<String, Value> = fields.into_iter().collect();
            body.insert("id".to_string(), Value::String(id));
            body
        })
}

/// A local operation applied in sequence by property tests.
#[derive(Debug, Clone)]
pub enum LocalOp {
    /// Write a document.
    Put(Value),
    /// Delete a document by id.
    Remove(String),
}

/// Strategy for sequences of local writes and deletes over a small key
/// space, so keys are written repeatedly.
pub fn local_ops_strategy(max: usize) -> impl Strategy<Value = Vec<LocalOp>> {
    let id = prop::sample::select(vec!["a", "b", "c", "d", "e"]);
    let op = prop_oneof![
        3 => (id.clone(), 0i64..=150).prop_map(|(id, age)| {
            LocalOp::Put(json!({ "id": id, "firstName": "P", "age": age }))
        }),
        1 => id.prop_map(|id| LocalOp::Remove(id.to_string())),
    ];
    prop::collection::vec(op, 1..=max)
}
