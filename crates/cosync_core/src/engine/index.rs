//! Workspace index document: one entry per document in `meta.pages`.
//!
//! Entries written by other clients may be plain maps rather than shared
//! maps; both are read, and a plain entry is replaced by a shared one the
//! first time it is written.

use serde::Serialize;
use serde_json::Value;
use yrs::{Any, Array, ArrayPrelim, ArrayRef, Doc, Map, MapPrelim, MapRef, Out, ReadTxn, Transact, TransactionMut, WriteTxn};

use crate::crdt::{out_to_json, write_string_list};

const META_MAP: &str = "meta";
const PAGES_FIELD: &str = "pages";

/// One document as listed by the workspace index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub create_date: Option<i64>,
    pub updated_date: Option<i64>,
    pub tags: Vec<String>,
}

impl IndexEntry {
    fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let id = object.get("id")?.as_str()?.to_string();
        let tags = object
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            id,
            title: object
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            create_date: object.get("createDate").and_then(Value::as_i64),
            updated_date: object.get("updatedDate").and_then(Value::as_i64),
            tags,
        })
    }
}

fn entries_with_positions<T: ReadTxn>(pages: &ArrayRef, txn: &T) -> Vec<(u32, IndexEntry)> {
    pages
        .iter(txn)
        .enumerate()
        .filter_map(|(i, item)| {
            IndexEntry::from_json(&out_to_json(&item, txn)).map(|entry| (i as u32, entry))
        })
        .collect()
}

fn existing_pages<T: ReadTxn>(meta: &MapRef, txn: &T) -> Option<ArrayRef> {
    match meta.get(txn, PAGES_FIELD)? {
        Out::YArray(pages) => Some(pages),
        _ => None,
    }
}

/// The shared pages array, converting a plain array in place.
fn pages_array(meta: &MapRef, txn: &mut TransactionMut) -> ArrayRef {
    if let Some(pages) = existing_pages(meta, &*txn) {
        return pages;
    }
    let plain: Vec<Any> = match meta.get(&*txn, PAGES_FIELD) {
        Some(Out::Any(Any::Array(items))) => items.to_vec(),
        _ => Vec::new(),
    };
    let pages: ArrayRef = meta.insert(txn, PAGES_FIELD, ArrayPrelim::default());
    for item in plain {
        pages.push_back(txn, item);
    }
    pages
}

/// Every entry, in index order.
pub fn read_entries(doc: &Doc) -> Vec<IndexEntry> {
    let mut txn = doc.transact_mut();
    let meta = txn.get_or_insert_map(META_MAP);
    match meta.get(&txn, PAGES_FIELD) {
        Some(Out::YArray(pages)) => entries_with_positions(&pages, &txn)
            .into_iter()
            .map(|(_, entry)| entry)
            .collect(),
        Some(out @ Out::Any(_)) => match out_to_json(&out, &txn) {
            Value::Array(items) => items.iter().filter_map(IndexEntry::from_json).collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// The first entry for `doc_id`.
pub fn find_entry(doc: &Doc, doc_id: &str) -> Option<IndexEntry> {
    read_entries(doc).into_iter().find(|entry| entry.id == doc_id)
}

fn insert_entry(pages: &ArrayRef, txn: &mut TransactionMut, position: u32, entry: &IndexEntry) {
    let map: MapRef = pages.insert(txn, position, MapPrelim::default());
    map.insert(txn, "id", Any::String(entry.id.as_str().into()));
    map.insert(txn, "title", Any::String(entry.title.as_str().into()));
    if let Some(created) = entry.create_date {
        map.insert(txn, "createDate", Any::Number(created as f64));
    }
    if let Some(updated) = entry.updated_date {
        map.insert(txn, "updatedDate", Any::Number(updated as f64));
    }
    write_string_list(&map, txn, "tags", &entry.tags);
}

/// Create or refresh the entry for `doc_id`.
///
/// An existing entry keeps its `createDate`; extra entries for the same id
/// are removed. Returns `true` when a new entry was appended.
pub fn upsert_entry(doc: &Doc, doc_id: &str, title: &str, tags: &[String], timestamp: i64) -> bool {
    let mut txn = doc.transact_mut();
    let meta = txn.get_or_insert_map(META_MAP);
    let pages = pages_array(&meta, &mut txn);

    let matches: Vec<(u32, IndexEntry)> = entries_with_positions(&pages, &txn)
        .into_iter()
        .filter(|(_, entry)| entry.id == doc_id)
        .collect();

    let Some((position, existing)) = matches.first().cloned() else {
        let entry = IndexEntry {
            id: doc_id.to_string(),
            title: title.to_string(),
            create_date: Some(timestamp),
            updated_date: Some(timestamp),
            tags: tags.to_vec(),
        };
        let end = pages.len(&txn);
        insert_entry(&pages, &mut txn, end, &entry);
        return true;
    };

    for (duplicate, _) in matches.iter().skip(1).rev() {
        log::debug!("[Engine] Dropping duplicate index entry for {}", doc_id);
        pages.remove(&mut txn, *duplicate);
    }

    match pages.get(&txn, position) {
        Some(Out::YMap(map)) => {
            map.insert(&mut txn, "title", Any::String(title.into()));
            map.insert(&mut txn, "updatedDate", Any::Number(timestamp as f64));
            write_string_list(&map, &mut txn, "tags", tags);
            if existing.create_date.is_none() {
                map.insert(&mut txn, "createDate", Any::Number(timestamp as f64));
            }
        }
        _ => {
            let entry = IndexEntry {
                id: doc_id.to_string(),
                title: title.to_string(),
                create_date: existing.create_date.or(Some(timestamp)),
                updated_date: Some(timestamp),
                tags: tags.to_vec(),
            };
            pages.remove(&mut txn, position);
            insert_entry(&pages, &mut txn, position, &entry);
        }
    }
    false
}

/// Remove every entry for `doc_id`. Returns how many were removed.
pub fn remove_entry(doc: &Doc, doc_id: &str) -> usize {
    let mut txn = doc.transact_mut();
    let meta = txn.get_or_insert_map(META_MAP);
    let Some(pages) = existing_pages(&meta, &txn) else {
        if matches!(meta.get(&txn, PAGES_FIELD), Some(Out::Any(_))) {
            drop(txn);
            return remove_entry_converting(doc, doc_id);
        }
        return 0;
    };

    let positions: Vec<u32> = entries_with_positions(&pages, &txn)
        .into_iter()
        .filter(|(_, entry)| entry.id == doc_id)
        .map(|(position, _)| position)
        .collect();
    for position in positions.iter().rev() {
        pages.remove(&mut txn, *position);
    }
    positions.len()
}

fn remove_entry_converting(doc: &Doc, doc_id: &str) -> usize {
    let has_entry = read_entries(doc).iter().any(|entry| entry.id == doc_id);
    if !has_entry {
        return 0;
    }
    {
        let mut txn = doc.transact_mut();
        let meta = txn.get_or_insert_map(META_MAP);
        pages_array(&meta, &mut txn);
    }
    remove_entry(doc, doc_id)
}

/// Drop `tag` from every entry carrying it. Returns the affected document ids.
pub fn remove_tag(doc: &Doc, tag: &str, timestamp: i64) -> Vec<String> {
    let affected: Vec<IndexEntry> = read_entries(doc)
        .into_iter()
        .filter(|entry| entry.tags.iter().any(|t| t == tag))
        .collect();

    for entry in &affected {
        let tags: Vec<String> = entry.tags.iter().filter(|t| *t != tag).cloned().collect();
        upsert_entry(doc, &entry.id, &entry.title, &tags, timestamp);
    }
    affected.into_iter().map(|entry| entry.id).collect()
}
