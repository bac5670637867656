//! Folder forest assembled from the flat node map.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::nodes::{FolderNode, NodeKind};

const UNTITLED: &str = "Untitled";

/// A folder or a document reference, with its children in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    pub kind: NodeKind,
    /// Folder name, or the referenced document's title
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    pub index: String,
    pub children: Vec<TreeNode>,
}

/// Build the forest of live nodes.
///
/// Nodes whose parent is missing or deleted become roots. Siblings are
/// ordered by `index`, then id. Document references take their name from
/// `titles`.
pub fn build_tree(nodes: &[FolderNode], titles: &HashMap<String, String>) -> Vec<TreeNode> {
    let live: Vec<&FolderNode> = nodes.iter().filter(|node| node.is_live()).collect();
    let live_ids: HashSet<&str> = live.iter().map(|node| node.id.as_str()).collect();

    let mut by_parent: HashMap<Option<&str>, Vec<&FolderNode>> = HashMap::new();
    for node in live.iter().copied() {
        let parent = node
            .parent_id
            .as_deref()
            .filter(|parent| live_ids.contains(parent) && *parent != node.id);
        by_parent.entry(parent).or_default().push(node);
    }
    for siblings in by_parent.values_mut() {
        siblings.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));
    }

    let mut visited = HashSet::new();
    assemble(None, &by_parent, titles, &mut visited)
}

fn assemble<'a>(
    parent: Option<&'a str>,
    by_parent: &HashMap<Option<&'a str>, Vec<&'a FolderNode>>,
    titles: &HashMap<String, String>,
    visited: &mut HashSet<&'a str>,
) -> Vec<TreeNode> {
    let Some(siblings) = by_parent.get(&parent) else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(siblings.len());
    for &node in siblings {
        if !visited.insert(node.id.as_str()) {
            continue;
        }
        let (name, doc_id, children) = match node.kind {
            NodeKind::Folder => (
                node.data.clone(),
                None,
                assemble(Some(node.id.as_str()), by_parent, titles, visited),
            ),
            NodeKind::Doc => (
                titles
                    .get(&node.data)
                    .filter(|title| !title.is_empty())
                    .cloned()
                    .unwrap_or_else(|| UNTITLED.to_string()),
                Some(node.data.clone()),
                Vec::new(),
            ),
        };
        out.push(TreeNode {
            id: node.id.clone(),
            kind: node.kind,
            name,
            doc_id,
            index: node.index.clone(),
            children,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, parent: Option<&str>, kind: NodeKind, data: &str, index: &str) -> FolderNode {
        FolderNode {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            kind,
            data: data.to_string(),
            index: index.to_string(),
            deleted: false,
        }
    }

    #[test]
    fn test_tree_orders_and_names_nodes() {
        let nodes = vec![
            node("f1", None, NodeKind::Folder, "Projects", "a1"),
            node("n2", Some("f1"), NodeKind::Doc, "d2", "a2"),
            node("n1", Some("f1"), NodeKind::Doc, "d1", "a1"),
            node("n3", None, NodeKind::Doc, "d3", "a0"),
        ];
        let titles = HashMap::from([("d1".to_string(), "Plan".to_string())]);

        let tree = build_tree(&nodes, &titles);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, "n3");
        assert_eq!(tree[0].name, UNTITLED);
        assert_eq!(tree[1].name, "Projects");
        let names: Vec<&str> = tree[1].children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Plan", UNTITLED]);
        assert_eq!(tree[1].children[0].doc_id.as_deref(), Some("d1"));
    }

    #[test]
    fn test_orphans_and_deleted_nodes() {
        let mut gone = node("f0", None, NodeKind::Folder, "Trash", "a0");
        gone.deleted = true;
        let nodes = vec![
            gone,
            node("n1", Some("f0"), NodeKind::Doc, "d1", "a1"),
            node("n2", Some("missing"), NodeKind::Doc, "d2", "a2"),
        ];

        let tree = build_tree(&nodes, &HashMap::new());
        let ids: Vec<&str> = tree.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2"]);
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let nodes = vec![
            node("a", Some("b"), NodeKind::Folder, "A", "a0"),
            node("b", Some("a"), NodeKind::Folder, "B", "a1"),
        ];
        assert!(build_tree(&nodes, &HashMap::new()).is_empty());
    }
}
