//! Element CRUD over a loaded document. Each mutation runs in one transaction.

use serde_json::{Map as JsonMap, Value};
use yrs::{Doc, Transact, TransactionMut, WriteTxn};

use super::element::{CanvasElement, ElementDraft, ElementKind, Xywh};
use super::store::{ElementStore, open_store};
use crate::error::{CosyncError, Result};
use crate::ids::{new_id, new_seed};
use crate::order::next_index;
use crate::structure::{BLOCKS_MAP, find_block_by_flavour, flavour};

/// Bounds given to elements created without geometry.
const DEFAULT_XYWH: Xywh = Xywh {
    x: 0.0,
    y: 0.0,
    w: 100.0,
    h: 100.0,
};

fn with_store<R>(
    doc: &Doc,
    create: bool,
    f: impl FnOnce(&mut dyn ElementStore, &mut TransactionMut<'_>) -> Result<R>,
) -> Result<Option<R>> {
    let mut txn = doc.transact_mut();
    let blocks = txn.get_or_insert_map(BLOCKS_MAP);
    let (_, surface) = find_block_by_flavour(&blocks, &txn, flavour::SURFACE)
        .ok_or_else(|| CosyncError::BlockNotFound(flavour::SURFACE.to_string()))?;

    let Some(mut store) = open_store(&surface, &mut txn, create) else {
        return Ok(None);
    };
    let out = f(store.as_mut(), &mut txn)?;
    store.flush(&mut txn);
    Ok(Some(out))
}

fn decode(key: &str, record: &JsonMap<String, Value>) -> Option<CanvasElement> {
    let element = CanvasElement::from_record(key, record);
    if element.is_none() {
        log::warn!("[Canvas] Skipping element {} of unknown type", key);
    }
    element
}

/// Every element, ordered by `index` (ties by id).
pub fn list_elements(doc: &Doc) -> Result<Vec<CanvasElement>> {
    let elements = with_store(doc, false, |store, txn| {
        Ok(store
            .entries(txn)
            .iter()
            .filter_map(|(key, record)| decode(key, record))
            .collect::<Vec<_>>())
    })?;

    let mut elements = elements.unwrap_or_default();
    elements.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));
    Ok(elements)
}

/// Create an element from a draft, filling defaults, id, index and seed.
pub fn create_element(doc: &Doc, draft: ElementDraft) -> Result<CanvasElement> {
    let kind = ElementKind::parse(&draft.kind)
        .ok_or_else(|| CosyncError::InvalidElement(format!("unknown type '{}'", draft.kind)))?;

    let created = with_store(doc, true, |store, txn| {
        let entries = store.entries(txn);
        let id = draft.id.clone().unwrap_or_else(new_id);
        if entries.iter().any(|(key, _)| *key == id) {
            return Err(CosyncError::InvalidElement(format!(
                "element '{}' already exists",
                id
            )));
        }

        let index = match draft.index.clone() {
            Some(index) => index,
            None => next_index(
                entries
                    .iter()
                    .filter_map(|(_, record)| record.get("index").and_then(Value::as_str)),
            ),
        };

        let mut record = kind.defaults();
        record.extend(draft.props.clone());
        let xywh = draft
            .xywh
            .or_else(|| record.get("xywh").and_then(Xywh::from_value))
            .unwrap_or(DEFAULT_XYWH);
        record.insert("id".to_string(), Value::String(id.clone()));
        record.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        record.insert("xywh".to_string(), Value::String(xywh.encode()));
        record.insert("index".to_string(), Value::String(index));
        record.insert(
            "seed".to_string(),
            Value::from(draft.seed.unwrap_or_else(new_seed)),
        );

        store.set(txn, &id, &record);
        log::debug!("[Canvas] Created {} element {}", kind, id);
        CanvasElement::from_record(&id, &record)
            .ok_or_else(|| CosyncError::InvalidElement(id.clone()))
    })?;

    created.ok_or_else(|| CosyncError::Crdt("element collection unavailable".to_string()))
}

/// Shallow-merge `patch` over an existing element.
///
/// `id` cannot be changed; `xywh` may be given in either form; a `type`
/// change is validated like a creation.
pub fn update_element(
    doc: &Doc,
    id: &str,
    patch: &JsonMap<String, Value>,
) -> Result<CanvasElement> {
    let mut normalized = patch.clone();
    normalized.remove("id");
    if let Some(xywh) = normalized.get("xywh") {
        let xywh = Xywh::from_value(xywh)
            .ok_or_else(|| CosyncError::InvalidElement(format!("invalid xywh {}", xywh)))?;
        normalized.insert("xywh".to_string(), Value::String(xywh.encode()));
    }
    if let Some(tag) = normalized.get("type") {
        let kind = tag
            .as_str()
            .and_then(ElementKind::parse)
            .ok_or_else(|| CosyncError::InvalidElement(format!("unknown type {}", tag)))?;
        normalized.insert("type".to_string(), Value::String(kind.as_str().to_string()));
    }

    let updated = with_store(doc, false, |store, txn| {
        let mut record = store
            .get(txn, id)
            .ok_or_else(|| CosyncError::ElementNotFound(id.to_string()))?;
        record.extend(normalized);
        store.set(txn, id, &record);
        log::debug!("[Canvas] Updated element {}", id);
        CanvasElement::from_record(id, &record)
            .ok_or_else(|| CosyncError::InvalidElement(id.to_string()))
    })?;

    updated.ok_or_else(|| CosyncError::ElementNotFound(id.to_string()))
}

/// Remove an element.
pub fn delete_element(doc: &Doc, id: &str) -> Result<()> {
    let deleted = with_store(doc, false, |store, txn| {
        if !store.delete(txn, id) {
            return Err(CosyncError::ElementNotFound(id.to_string()));
        }
        log::debug!("[Canvas] Deleted element {}", id);
        Ok(())
    })?;
    deleted.ok_or_else(|| CosyncError::ElementNotFound(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::store::{ELEMENTS_FIELD, NATIVE_ELEMENTS_TYPE};
    use crate::crdt::json_to_any;
    use crate::structure::{ContentSource, StructureBuilder, block_map};
    use serde_json::json;
    use yrs::Map;

    fn canvas_doc() -> Doc {
        StructureBuilder::new("o")
            .build("doc", "Canvas", &ContentSource::Empty, Some(1))
            .doc
    }

    fn patch(value: Value) -> JsonMap<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_created_geometry_round_trips() {
        let doc = canvas_doc();
        let created = create_element(
            &doc,
            ElementDraft::new("shape").with_xywh(12.5, -3.0, 200.0, 80.0),
        )
        .unwrap();

        let listed = list_elements(&doc).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(
            listed[0].xywh.map(|x| x.to_array()),
            Some([12.5, -3.0, 200.0, 80.0])
        );
        assert_eq!(listed[0].props.get("shapeType"), Some(&json!("rect")));
        assert!(listed[0].seed <= i32::MAX as u32);
    }

    #[test]
    fn test_indices_increase_in_creation_order() {
        let doc = canvas_doc();
        let ids: Vec<String> = (0..40)
            .map(|_| create_element(&doc, ElementDraft::new("text")).unwrap().id)
            .collect();

        let listed = list_elements(&doc).unwrap();
        let listed_ids: Vec<String> = listed.iter().map(|e| e.id.clone()).collect();
        assert_eq!(listed_ids, ids);
        for pair in listed.windows(2) {
            assert!(pair[0].index < pair[1].index);
        }
        assert_eq!(listed[0].index, "a0");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let doc = canvas_doc();
        let err = create_element(&doc, ElementDraft::new("sticker")).unwrap_err();
        assert!(matches!(err, CosyncError::InvalidElement(_)));
    }

    #[test]
    fn test_update_merges_and_reencodes_geometry() {
        let doc = canvas_doc();
        let created = create_element(
            &doc,
            ElementDraft::new("shape").with_prop("fillColor", json!("blue")),
        )
        .unwrap();

        let updated = update_element(
            &doc,
            &created.id,
            &patch(json!({"xywh": [1, 2, 3, 4], "strokeWidth": 8, "id": "hijack"})),
        )
        .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.xywh, Some(Xywh::new(1.0, 2.0, 3.0, 4.0)));
        assert_eq!(updated.props.get("fillColor"), Some(&json!("blue")));
        assert_eq!(updated.props.get("strokeWidth"), Some(&json!(8)));
        assert_eq!(updated.index, created.index);

        let err = update_element(&doc, "missing", &patch(json!({}))).unwrap_err();
        assert!(matches!(err, CosyncError::ElementNotFound(_)));
    }

    #[test]
    fn test_delete_element() {
        let doc = canvas_doc();
        let created = create_element(&doc, ElementDraft::new("brush")).unwrap();
        assert_eq!(created.kind, ElementKind::Stroke);

        delete_element(&doc, &created.id).unwrap();
        assert!(list_elements(&doc).unwrap().is_empty());
        assert!(matches!(
            delete_element(&doc, &created.id),
            Err(CosyncError::ElementNotFound(_))
        ));
    }

    #[test]
    fn test_legacy_plain_collection_is_read_and_written() {
        let built = StructureBuilder::new("o").build("doc", "Legacy", &ContentSource::Empty, Some(1));
        let blocks = built.doc.get_or_insert_map(BLOCKS_MAP);
        {
            let mut txn = built.doc.transact_mut();
            let surface = block_map(&blocks, &txn, &built.blocks.surface_id).unwrap();
            let legacy = json!({
                "type": NATIVE_ELEMENTS_TYPE,
                "value": {
                    "old": {"id": "old", "type": "shape", "xywh": "[0,0,5,5]", "index": "a5", "seed": 3}
                }
            });
            surface.insert(&mut txn, ELEMENTS_FIELD, json_to_any(&legacy));
        }

        let listed = list_elements(&built.doc).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].xywh, Some(Xywh::new(0.0, 0.0, 5.0, 5.0)));

        let created = create_element(&built.doc, ElementDraft::new("connector")).unwrap();
        assert_eq!(created.index, "a6");
        assert_eq!(list_elements(&built.doc).unwrap().len(), 2);
    }

    #[test]
    fn test_document_without_surface() {
        let doc = Doc::new();
        let err = list_elements(&doc).unwrap_err();
        assert!(matches!(err, CosyncError::BlockNotFound(_)));
    }
}
