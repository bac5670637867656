//! Conversions between yrs values and `serde_json` values, plus typed field
//! readers that accept both the shared-type and the plain-JSON shape.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Number, Value};
use yrs::{Any, Array, ArrayPrelim, ArrayRef, GetString, Map, MapRef, Out, ReadTxn, TransactionMut};

/// Largest integer an f64 carries exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Convert a plain yrs value to JSON.
pub fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => number_to_json(*n),
        Any::BigInt(i) => Value::from(*i),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Convert JSON to a plain yrs value.
pub fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => Any::Number(n.as_f64().unwrap_or_default()),
        Value::String(s) => Any::String(s.as_str().into()),
        Value::Array(items) => Any::Array(items.iter().map(json_to_any).collect::<Vec<_>>().into()),
        Value::Object(map) => Any::Map(Arc::new(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect::<HashMap<String, Any>>(),
        )),
    }
}

/// Convert any yrs output value (shared or plain) to JSON.
///
/// Shared text becomes its plain string; formatting attributes are dropped.
pub fn out_to_json<T: ReadTxn>(out: &Out, txn: &T) -> Value {
    match out {
        Out::Any(any) => any_to_json(any),
        Out::YText(text) => Value::String(text.get_string(txn)),
        Out::YMap(map) => Value::Object(map_to_json(map, txn)),
        Out::YArray(array) => Value::Array(
            array
                .iter(txn)
                .map(|item| out_to_json(&item, txn))
                .collect(),
        ),
        _ => Value::Null,
    }
}

/// Convert a shared map to a JSON object.
pub fn map_to_json<T: ReadTxn>(map: &MapRef, txn: &T) -> JsonMap<String, Value> {
    map.iter(txn)
        .map(|(key, value)| (key.to_string(), out_to_json(&value, txn)))
        .collect()
}

/// Read a string field. Shared text counts as a string.
pub fn get_str<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<String> {
    match map.get(txn, key)? {
        Out::Any(Any::String(s)) => Some(s.to_string()),
        Out::YText(text) => Some(text.get_string(txn)),
        _ => None,
    }
}

/// Read a numeric field.
pub fn get_f64<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<f64> {
    match map.get(txn, key)? {
        Out::Any(Any::Number(n)) => Some(n),
        Out::Any(Any::BigInt(i)) => Some(i as f64),
        _ => None,
    }
}

/// Read a numeric field as an integer (timestamps).
pub fn get_i64<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<i64> {
    get_f64(map, txn, key).map(|n| n as i64)
}

/// Read a boolean field. Absent means `false` to callers that unwrap_or_default.
pub fn get_bool<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Option<bool> {
    match map.get(txn, key)? {
        Out::Any(Any::Bool(b)) => Some(b),
        _ => None,
    }
}

/// Read a list of strings stored either as a shared array or a plain array.
pub fn get_string_list<T: ReadTxn>(map: &MapRef, txn: &T, key: &str) -> Vec<String> {
    match map.get(txn, key) {
        Some(Out::YArray(array)) => array
            .iter(txn)
            .filter_map(|item| match item {
                Out::Any(Any::String(s)) => Some(s.to_string()),
                _ => None,
            })
            .collect(),
        Some(Out::Any(Any::Array(items))) => items
            .iter()
            .filter_map(|item| match item {
                Any::String(s) => Some(s.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Write a list of strings as a fresh shared array, replacing whatever was there.
pub fn write_string_list(map: &MapRef, txn: &mut TransactionMut, key: &str, items: &[String]) {
    let array: ArrayRef = map.insert(txn, key, ArrayPrelim::default());
    for item in items {
        array.push_back(txn, Any::String(item.as_str().into()));
    }
}
