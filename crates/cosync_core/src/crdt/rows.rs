//! Row-per-root-map documents.
//!
//! The properties and folder documents store one top-level Y.Map per row,
//! named by the row key. A freshly decoded document does not know the type
//! of its root branches yet, so rows are always opened through a write
//! transaction with `get_or_insert_map`, which binds the branch to a map
//! without producing an update.

use yrs::{MapRef, ReadTxn, TransactionMut, WriteTxn};

/// Names of every root-level branch, sorted for deterministic iteration.
pub fn row_names<T: ReadTxn>(txn: &T) -> Vec<String> {
    let mut names: Vec<String> = txn.root_refs().map(|(name, _)| name.to_string()).collect();
    names.sort();
    names
}

/// Open every root-level branch as a map.
pub fn open_rows(txn: &mut TransactionMut) -> Vec<(String, MapRef)> {
    let names = row_names(&*txn);
    names
        .into_iter()
        .map(|name| {
            let row = txn.get_or_insert_map(name.as_str());
            (name, row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{apply_update, encode_full_state, get_str};
    use yrs::{Any, Doc, Map, Transact};

    #[test]
    fn test_rows_survive_a_round_trip_through_an_update() {
        let source = Doc::new();
        {
            let mut txn = source.transact_mut();
            let a = txn.get_or_insert_map("row-b");
            a.insert(&mut txn, "id", Any::String("row-b".into()));
            let b = txn.get_or_insert_map("row-a");
            b.insert(&mut txn, "id", Any::String("row-a".into()));
        }

        let replica = Doc::new();
        apply_update(&replica, &encode_full_state(&source)).unwrap();

        let mut txn = replica.transact_mut();
        let rows = open_rows(&mut txn);
        let ids: Vec<Option<String>> = rows
            .iter()
            .map(|(_, row)| get_str(row, &txn, "id"))
            .collect();
        assert_eq!(
            ids,
            vec![Some("row-a".to_string()), Some("row-b".to_string())]
        );
    }
}
