//! Node algebra over the folder document.
//!
//! Every node is a root-level map keyed by its node id:
//! `{ id, parentId, type: "folder" | "doc", data, index, deleted? }`.
//! Nodes are never removed, only tombstoned, since root branches cannot be
//! deleted from a shared document.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use yrs::{Any, Doc, Map, MapRef, Transact, TransactionMut, WriteTxn};

use crate::crdt::{get_bool, get_str, open_rows, row_names};
use crate::error::{CosyncError, Result};
use crate::ids::new_node_id;
use crate::order::folder_index;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    Doc,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Doc => "doc",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "folder" => Some(Self::Folder),
            "doc" => Some(Self::Doc),
            _ => None,
        }
    }
}

/// One node of the folder document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: NodeKind,
    /// Folder name, or the referenced document id
    pub data: String,
    pub index: String,
    pub deleted: bool,
}

impl FolderNode {
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    fn references(&self, doc_id: &str) -> bool {
        self.kind == NodeKind::Doc && self.data == doc_id
    }
}

/// Where a document should sit in the folder tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Not in any folder
    Root,
    Folder(String),
}

impl Placement {
    pub fn folder_id(&self) -> Option<&str> {
        match self {
            Self::Root => None,
            Self::Folder(id) => Some(id),
        }
    }
}

/// What a folder-sync pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderSyncOutcome {
    /// The node that now represents the document, if any
    pub node_id: Option<String>,
    /// Whether the folder document was written
    pub changed: bool,
    /// Duplicate nodes that were tombstoned
    pub pruned: Vec<String>,
}

fn node_from_row(key: &str, row: &MapRef, txn: &TransactionMut) -> Option<FolderNode> {
    let kind = NodeKind::parse(&get_str(row, txn, "type")?)?;
    Some(FolderNode {
        id: get_str(row, txn, "id").unwrap_or_else(|| key.to_string()),
        parent_id: get_str(row, txn, "parentId"),
        kind,
        data: get_str(row, txn, "data").unwrap_or_default(),
        index: get_str(row, txn, "index").unwrap_or_default(),
        deleted: get_bool(row, txn, "deleted").unwrap_or_default()
            || get_bool(row, txn, "$$DELETED").unwrap_or_default(),
    })
}

fn sort_nodes(nodes: &mut [FolderNode]) {
    nodes.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));
}

/// Every well-formed node, ordered by `index` then id.
pub fn read_nodes(doc: &Doc) -> Vec<FolderNode> {
    let mut txn = doc.transact_mut();
    let rows = open_rows(&mut txn);
    let mut nodes: Vec<FolderNode> = rows
        .iter()
        .filter_map(|(key, row)| node_from_row(key, row, &txn))
        .collect();
    sort_nodes(&mut nodes);
    nodes
}

/// The folder the document currently sits in, per its first live node.
///
/// A document without a live node is at the root.
pub fn current_placement(doc: &Doc, doc_id: &str) -> Placement {
    read_nodes(doc)
        .into_iter()
        .find(|node| node.is_live() && node.references(doc_id))
        .and_then(|node| node.parent_id)
        .map_or(Placement::Root, Placement::Folder)
}

fn set_parent(row: &MapRef, txn: &mut TransactionMut, parent: Option<&str>) {
    match parent {
        Some(parent) => row.insert(txn, "parentId", Any::String(parent.into())),
        None => row.insert(txn, "parentId", Any::Null),
    };
}

fn tombstone(row: &MapRef, txn: &mut TransactionMut, node_id: &str) {
    row.clear(txn);
    row.insert(txn, "id", Any::String(node_id.into()));
    row.insert(txn, "deleted", Any::Bool(true));
}

fn write_node(row: &MapRef, txn: &mut TransactionMut, node: &FolderNode) {
    row.insert(txn, "id", Any::String(node.id.as_str().into()));
    set_parent(row, txn, node.parent_id.as_deref());
    row.insert(txn, "type", Any::String(node.kind.as_str().into()));
    row.insert(txn, "data", Any::String(node.data.as_str().into()));
    row.insert(txn, "index", Any::String(node.index.as_str().into()));
    if node.deleted {
        row.insert(txn, "deleted", Any::Bool(true));
    } else {
        for flag in ["deleted", "$$DELETED"] {
            if row.get(&*txn, flag).is_some() {
                row.remove(txn, flag);
            }
        }
    }
}

/// Bring the folder document in line with `placement` for `doc_id`.
///
/// Live doc nodes referencing the document are collected; the one matching
/// `preferred` (or the first by order) is authoritative and every other one
/// is tombstoned. Root placement soft-deletes the authoritative node. Folder
/// placement reparents it, revives a deleted node, or creates one. When
/// nothing needs to change the document is left untouched and
/// `changed` is `false`.
pub fn folder_sync(
    doc: &Doc,
    doc_id: &str,
    placement: &Placement,
    preferred: Option<&str>,
) -> FolderSyncOutcome {
    let mut txn = doc.transact_mut();
    let rows = open_rows(&mut txn);

    let mut referencing: Vec<(FolderNode, MapRef)> = rows
        .into_iter()
        .filter_map(|(key, row)| {
            node_from_row(&key, &row, &txn)
                .filter(|node| node.references(doc_id))
                .map(|node| (node, row))
        })
        .collect();
    referencing.sort_by(|(a, _), (b, _)| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));

    let (live, dead): (Vec<_>, Vec<_>) = referencing
        .into_iter()
        .partition(|(node, _)| node.is_live());

    let authoritative = preferred
        .and_then(|id| live.iter().position(|(node, _)| node.id == id))
        .unwrap_or(0);

    let mut outcome = FolderSyncOutcome::default();
    for (i, (node, row)) in live.iter().enumerate() {
        if i == authoritative {
            continue;
        }
        log::info!(
            "[FolderSync] Pruning duplicate node {} for doc {}",
            node.id,
            doc_id
        );
        tombstone(row, &mut txn, &node.id);
        outcome.pruned.push(node.id.clone());
        outcome.changed = true;
    }

    match (placement, live.get(authoritative)) {
        (Placement::Root, Some((node, row))) => {
            log::debug!("[FolderSync] Detaching doc {} (node {})", doc_id, node.id);
            row.insert(&mut txn, "deleted", Any::Bool(true));
            set_parent(row, &mut txn, None);
            outcome.node_id = Some(node.id.clone());
            outcome.changed = true;
        }
        (Placement::Root, None) => {}
        (Placement::Folder(folder_id), Some((node, row))) => {
            if node.parent_id.as_deref() != Some(folder_id.as_str()) {
                log::debug!(
                    "[FolderSync] Moving doc {} (node {}) into {}",
                    doc_id,
                    node.id,
                    folder_id
                );
                set_parent(row, &mut txn, Some(folder_id));
                outcome.changed = true;
            }
            outcome.node_id = Some(node.id.clone());
        }
        (Placement::Folder(folder_id), None) => {
            let revived = preferred
                .and_then(|id| dead.iter().find(|(node, _)| node.id == id))
                .or_else(|| dead.first());

            let node = match revived {
                Some((node, _)) => FolderNode {
                    parent_id: Some(folder_id.clone()),
                    deleted: false,
                    ..node.clone()
                },
                None => FolderNode {
                    id: preferred.map_or_else(new_node_id, str::to_string),
                    parent_id: Some(folder_id.clone()),
                    kind: NodeKind::Doc,
                    data: doc_id.to_string(),
                    index: folder_index(),
                    deleted: false,
                },
            };
            log::debug!(
                "[FolderSync] Placing doc {} in {} as node {}",
                doc_id,
                folder_id,
                node.id
            );
            let row = match revived {
                Some((_, row)) => row.clone(),
                None => txn.get_or_insert_map(node.id.as_str()),
            };
            write_node(&row, &mut txn, &node);
            outcome.node_id = Some(node.id);
            outcome.changed = true;
        }
    }
    outcome
}

fn live_folder_row(txn: &mut TransactionMut, folder_id: &str) -> Result<MapRef> {
    if !row_names(&*txn).iter().any(|name| name == folder_id) {
        return Err(CosyncError::FolderNotFound(folder_id.to_string()));
    }
    let row = txn.get_or_insert_map(folder_id);
    match node_from_row(folder_id, &row, txn) {
        Some(node) if node.kind == NodeKind::Folder && node.is_live() => Ok(row),
        _ => Err(CosyncError::FolderNotFound(folder_id.to_string())),
    }
}

/// Add a folder node. Returns its id.
pub fn create_folder(doc: &Doc, name: &str, parent: &Placement) -> Result<String> {
    let mut txn = doc.transact_mut();
    if let Some(parent_id) = parent.folder_id() {
        live_folder_row(&mut txn, parent_id)?;
    }
    let node = FolderNode {
        id: new_node_id(),
        parent_id: parent.folder_id().map(str::to_string),
        kind: NodeKind::Folder,
        data: name.to_string(),
        index: folder_index(),
        deleted: false,
    };
    let row = txn.get_or_insert_map(node.id.as_str());
    write_node(&row, &mut txn, &node);
    Ok(node.id)
}

/// Rename a live folder. Returns whether the name changed.
pub fn rename_folder(doc: &Doc, folder_id: &str, name: &str) -> Result<bool> {
    let mut txn = doc.transact_mut();
    let row = live_folder_row(&mut txn, folder_id)?;
    if get_str(&row, &txn, "data").as_deref() == Some(name) {
        return Ok(false);
    }
    row.insert(&mut txn, "data", Any::String(name.into()));
    Ok(true)
}

/// Soft-delete a folder and everything below it. Returns the deleted node ids,
/// the folder first.
pub fn delete_folder(doc: &Doc, folder_id: &str) -> Result<Vec<String>> {
    let mut txn = doc.transact_mut();
    live_folder_row(&mut txn, folder_id)?;

    let rows = open_rows(&mut txn);
    let nodes: Vec<(FolderNode, MapRef)> = rows
        .into_iter()
        .filter_map(|(key, row)| node_from_row(&key, &row, &txn).map(|node| (node, row)))
        .filter(|(node, _)| node.is_live())
        .collect();

    let mut doomed = vec![folder_id.to_string()];
    let mut seen: HashSet<String> = doomed.iter().cloned().collect();
    let mut cursor = 0;
    while cursor < doomed.len() {
        let parent = doomed[cursor].clone();
        for (node, _) in &nodes {
            if node.parent_id.as_deref() == Some(parent.as_str()) && seen.insert(node.id.clone()) {
                doomed.push(node.id.clone());
            }
        }
        cursor += 1;
    }

    for (node, row) in &nodes {
        if seen.contains(&node.id) {
            row.insert(&mut txn, "deleted", Any::Bool(true));
        }
    }
    log::info!(
        "[FolderSync] Deleted folder {} with {} descendants",
        folder_id,
        doomed.len() - 1
    );
    Ok(doomed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_node(doc: &Doc, id: &str, parent: Option<&str>, kind: NodeKind, data: &str, index: &str) {
        let mut txn = doc.transact_mut();
        let row = txn.get_or_insert_map(id);
        write_node(
            &row,
            &mut txn,
            &FolderNode {
                id: id.to_string(),
                parent_id: parent.map(str::to_string),
                kind,
                data: data.to_string(),
                index: index.to_string(),
                deleted: false,
            },
        );
    }

    fn live_refs(doc: &Doc, doc_id: &str) -> Vec<FolderNode> {
        read_nodes(doc)
            .into_iter()
            .filter(|n| n.is_live() && n.references(doc_id))
            .collect()
    }

    #[test]
    fn test_sync_creates_then_is_idempotent() {
        let doc = Doc::new();
        seed_node(&doc, "F1", None, NodeKind::Folder, "Inbox", "a0");

        let first = folder_sync(&doc, "d1", &Placement::Folder("F1".into()), None);
        assert!(first.changed);
        let node_id = first.node_id.clone().unwrap();

        let second = folder_sync(&doc, "d1", &Placement::Folder("F1".into()), None);
        assert!(!second.changed);
        assert_eq!(second.node_id, Some(node_id));
        assert_eq!(live_refs(&doc, "d1").len(), 1);
    }

    #[test]
    fn test_sync_prunes_duplicates_keeping_preferred() {
        let doc = Doc::new();
        seed_node(&doc, "n1", Some("F1"), NodeKind::Doc, "d1", "a1");
        seed_node(&doc, "n2", Some("F2"), NodeKind::Doc, "d1", "a2");

        let outcome = folder_sync(&doc, "d1", &Placement::Folder("F2".into()), Some("n2"));
        assert_eq!(outcome.pruned, vec!["n1".to_string()]);
        assert_eq!(outcome.node_id.as_deref(), Some("n2"));

        let live = live_refs(&doc, "d1");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, "n2");
        assert_eq!(live[0].parent_id.as_deref(), Some("F2"));
    }

    #[test]
    fn test_root_placement_soft_deletes() {
        let doc = Doc::new();
        seed_node(&doc, "n1", Some("F1"), NodeKind::Doc, "d1", "a1");

        let outcome = folder_sync(&doc, "d1", &Placement::Root, None);
        assert!(outcome.changed);
        let node = read_nodes(&doc).into_iter().find(|n| n.id == "n1").unwrap();
        assert!(node.deleted);
        assert_eq!(node.parent_id, None);

        let again = folder_sync(&doc, "d1", &Placement::Root, None);
        assert!(!again.changed);
        assert_eq!(current_placement(&doc, "d1"), Placement::Root);
    }

    #[test]
    fn test_sync_revives_deleted_node() {
        let doc = Doc::new();
        seed_node(&doc, "n1", Some("F1"), NodeKind::Doc, "d1", "a1");
        folder_sync(&doc, "d1", &Placement::Root, None);

        let outcome = folder_sync(&doc, "d1", &Placement::Folder("F3".into()), None);
        assert_eq!(outcome.node_id.as_deref(), Some("n1"));
        assert_eq!(read_nodes(&doc).len(), 1);
        assert_eq!(
            current_placement(&doc, "d1"),
            Placement::Folder("F3".to_string())
        );
    }

    #[test]
    fn test_folder_management() {
        let doc = Doc::new();
        let top = create_folder(&doc, "Top", &Placement::Root).unwrap();
        let child = create_folder(&doc, "Child", &Placement::Folder(top.clone())).unwrap();
        seed_node(&doc, "n1", Some(&child), NodeKind::Doc, "d1", "a1");
        seed_node(&doc, "n2", None, NodeKind::Doc, "d2", "a2");

        assert!(rename_folder(&doc, &top, "Renamed").unwrap());
        assert!(!rename_folder(&doc, &top, "Renamed").unwrap());

        let deleted = delete_folder(&doc, &top).unwrap();
        assert_eq!(deleted, vec![top.clone(), child, "n1".to_string()]);
        assert!(live_refs(&doc, "d2").len() == 1);
        assert!(matches!(
            rename_folder(&doc, &top, "x"),
            Err(CosyncError::FolderNotFound(_))
        ));
        assert!(matches!(
            create_folder(&doc, "x", &Placement::Folder("ghost".into())),
            Err(CosyncError::FolderNotFound(_))
        ));
    }
}
