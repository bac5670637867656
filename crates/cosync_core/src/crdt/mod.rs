//! Helpers over the yrs shared types.
//!
//! The host stores every document as a Yjs document. Values inside shared
//! maps arrive in two shapes depending on who wrote them:
//!
//! - `Out::YMap` / `Out::YArray` / `Out::YText` when a client nested a shared type
//! - `Out::Any(Any::Map | Any::Array | ..)` when a client set a plain JSON object
//!
//! Everything in this module reads both shapes, so callers can treat a field
//! as "a string" or "a list of strings" without caring which one it is.

mod convert;
mod rows;

pub use convert::{
    any_to_json, get_bool, get_f64, get_i64, get_str, get_string_list, json_to_any,
    map_to_json, out_to_json, write_string_list,
};
pub use rows::{open_rows, row_names};

use yrs::{ReadTxn, StateVector, Transact, Update, updates::decoder::Decode};

use crate::error::{CosyncError, Result};

/// Apply a v1-encoded update to a document.
pub fn apply_update(doc: &yrs::Doc, update: &[u8]) -> Result<()> {
    let decoded = Update::decode_v1(update)
        .map_err(|e| CosyncError::Crdt(format!("Failed to decode update: {}", e)))?;
    let mut txn = doc.transact_mut();
    txn.apply_update(decoded)
        .map_err(|e| CosyncError::Crdt(format!("Failed to apply update: {}", e)))?;
    Ok(())
}

/// Decode a v1-encoded state vector.
pub fn decode_state_vector(bytes: &[u8]) -> Result<StateVector> {
    StateVector::decode_v1(bytes)
        .map_err(|e| CosyncError::Crdt(format!("Failed to decode state vector: {}", e)))
}

/// Encode the full state of a document as a single update.
pub fn encode_full_state(doc: &yrs::Doc) -> Vec<u8> {
    let txn = doc.transact();
    txn.encode_state_as_update_v1(&StateVector::default())
}
