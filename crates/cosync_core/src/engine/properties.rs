//! Per-document properties: one root map per document id.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use yrs::{Any, Doc, Map, MapRef, Transact, TransactionMut, WriteTxn};

use crate::crdt::{
    get_bool, get_i64, get_str, get_string_list, json_to_any, map_to_json, open_rows, row_names,
    write_string_list,
};

/// Prefix of caller-defined property keys.
pub const CUSTOM_PREFIX: &str = "custom:";

/// How a document opens by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryMode {
    Page,
    #[serde(rename = "edgeless", alias = "canvas")]
    Canvas,
}

impl PrimaryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Canvas => "edgeless",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "page" => Some(Self::Page),
            "edgeless" | "canvas" => Some(Self::Canvas),
            _ => None,
        }
    }
}

/// Properties of one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertiesEntry {
    pub id: String,
    pub tags: Vec<String>,
    pub primary_mode: Option<PrimaryMode>,
    pub updated_at: Option<i64>,
    pub deleted: bool,
    /// `custom:*` fields, keyed without the prefix
    pub custom: JsonMap<String, Value>,
}

/// Fields to merge into a properties entry. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertiesPatch {
    pub tags: Option<Vec<String>>,
    pub primary_mode: Option<PrimaryMode>,
    pub custom: JsonMap<String, Value>,
}

fn entry_from_row(id: &str, row: &MapRef, txn: &TransactionMut) -> PropertiesEntry {
    let custom = map_to_json(row, txn)
        .into_iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(CUSTOM_PREFIX)
                .map(|name| (name.to_string(), value))
        })
        .collect();

    PropertiesEntry {
        id: get_str(row, txn, "id").unwrap_or_else(|| id.to_string()),
        tags: get_string_list(row, txn, "tags"),
        primary_mode: get_str(row, txn, "primaryMode")
            .as_deref()
            .and_then(PrimaryMode::parse),
        updated_at: get_i64(row, txn, "updatedAt"),
        deleted: get_bool(row, txn, "deleted").unwrap_or_default()
            || get_bool(row, txn, "$$DELETED").unwrap_or_default(),
        custom,
    }
}

/// Properties of `doc_id`, if the document has a non-empty entry.
pub fn read_properties(doc: &Doc, doc_id: &str) -> Option<PropertiesEntry> {
    let mut txn = doc.transact_mut();
    if !row_names(&txn).iter().any(|name| name == doc_id) {
        return None;
    }
    let row = txn.get_or_insert_map(doc_id);
    if row.len(&txn) == 0 {
        return None;
    }
    Some(entry_from_row(doc_id, &row, &txn))
}

/// Every non-empty entry, ordered by document id.
pub fn all_properties(doc: &Doc) -> Vec<PropertiesEntry> {
    let mut txn = doc.transact_mut();
    let rows = open_rows(&mut txn);
    rows.iter()
        .filter(|(_, row)| row.len(&txn) > 0)
        .map(|(id, row)| entry_from_row(id, row, &txn))
        .collect()
}

/// Merge `patch` into the entry of `doc_id`, creating it if needed.
///
/// A merge revives a soft-deleted entry.
pub fn merge_properties(doc: &Doc, doc_id: &str, patch: &PropertiesPatch, timestamp: i64) {
    let mut txn = doc.transact_mut();
    let row = txn.get_or_insert_map(doc_id);

    row.insert(&mut txn, "id", Any::String(doc_id.into()));
    row.insert(&mut txn, "updatedAt", Any::Number(timestamp as f64));
    if let Some(tags) = &patch.tags {
        write_string_list(&row, &mut txn, "tags", tags);
    } else if row.get(&txn, "tags").is_none() {
        write_string_list(&row, &mut txn, "tags", &[]);
    }
    if let Some(mode) = patch.primary_mode {
        row.insert(&mut txn, "primaryMode", Any::String(mode.as_str().into()));
    }
    for (name, value) in &patch.custom {
        let key = format!("{}{}", CUSTOM_PREFIX, name);
        row.insert(&mut txn, key, json_to_any(value));
    }
    for flag in ["deleted", "$$DELETED"] {
        if row.get(&txn, flag).is_some() {
            row.remove(&mut txn, flag);
        }
    }
}

/// Clear tags and mark the entry of `doc_id` deleted.
pub fn soft_delete_properties(doc: &Doc, doc_id: &str, timestamp: i64) {
    let mut txn = doc.transact_mut();
    let row = txn.get_or_insert_map(doc_id);
    row.insert(&mut txn, "id", Any::String(doc_id.into()));
    write_string_list(&row, &mut txn, "tags", &[]);
    row.insert(&mut txn, "deleted", Any::Bool(true));
    row.insert(&mut txn, "updatedAt", Any::Number(timestamp as f64));
}

/// Drop `tag` from every entry carrying it. Returns the affected document ids.
pub fn remove_tag(doc: &Doc, tag: &str, timestamp: i64) -> Vec<String> {
    let mut txn = doc.transact_mut();
    let rows = open_rows(&mut txn);
    let mut affected = Vec::new();

    for (id, row) in rows {
        let tags = get_string_list(&row, &txn, "tags");
        if !tags.iter().any(|t| t == tag) {
            continue;
        }
        let kept: Vec<String> = tags.into_iter().filter(|t| t != tag).collect();
        write_string_list(&row, &mut txn, "tags", &kept);
        row.insert(&mut txn, "updatedAt", Any::Number(timestamp as f64));
        affected.push(id);
    }
    affected
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_merge_creates_and_updates() {
        let doc = Doc::new();
        let mut custom = JsonMap::new();
        custom.insert("rating".to_string(), json!(5));
        merge_properties(
            &doc,
            "d1",
            &PropertiesPatch {
                tags: Some(strings(&["a"])),
                primary_mode: Some(PrimaryMode::Canvas),
                custom,
            },
            10,
        );

        let entry = read_properties(&doc, "d1").unwrap();
        assert_eq!(entry.tags, strings(&["a"]));
        assert_eq!(entry.primary_mode, Some(PrimaryMode::Canvas));
        assert_eq!(entry.custom.get("rating"), Some(&json!(5)));
        assert_eq!(entry.updated_at, Some(10));

        merge_properties(&doc, "d1", &PropertiesPatch::default(), 20);
        let entry = read_properties(&doc, "d1").unwrap();
        assert_eq!(entry.tags, strings(&["a"]));
        assert_eq!(entry.primary_mode, Some(PrimaryMode::Canvas));
        assert_eq!(entry.updated_at, Some(20));
        assert!(read_properties(&doc, "missing").is_none());
    }

    #[test]
    fn test_soft_delete_and_revive() {
        let doc = Doc::new();
        merge_properties(
            &doc,
            "d1",
            &PropertiesPatch {
                tags: Some(strings(&["a"])),
                ..PropertiesPatch::default()
            },
            1,
        );
        soft_delete_properties(&doc, "d1", 2);
        let entry = read_properties(&doc, "d1").unwrap();
        assert!(entry.deleted);
        assert!(entry.tags.is_empty());

        merge_properties(&doc, "d1", &PropertiesPatch::default(), 3);
        assert!(!read_properties(&doc, "d1").unwrap().deleted);
    }

    #[test]
    fn test_remove_tag_touches_only_carriers() {
        let doc = Doc::new();
        for (id, tags) in [("a", vec!["t"]), ("b", vec!["u"]), ("c", vec!["t", "u"])] {
            merge_properties(
                &doc,
                id,
                &PropertiesPatch {
                    tags: Some(strings(&tags)),
                    ..PropertiesPatch::default()
                },
                1,
            );
        }

        let affected = remove_tag(&doc, "t", 5);
        assert_eq!(affected, strings(&["a", "c"]));
        assert_eq!(read_properties(&doc, "c").unwrap().tags, strings(&["u"]));
        assert_eq!(read_properties(&doc, "b").unwrap().updated_at, Some(1));
        assert_eq!(all_properties(&doc).len(), 3);
    }

    #[test]
    fn test_primary_mode_wire_names() {
        assert_eq!(PrimaryMode::parse("canvas"), Some(PrimaryMode::Canvas));
        assert_eq!(
            serde_json::to_value(PrimaryMode::Canvas).unwrap(),
            json!("edgeless")
        );
    }
}
