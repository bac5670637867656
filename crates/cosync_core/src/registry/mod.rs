//! Folder and tag views over a workspace.
//!
//! Folders live in the folder document as a flat map of nodes with parent
//! pointers (see [`nodes`]). Tags have no document of their own: they are
//! derived from the tag lists in the workspace index.

pub mod nodes;
mod tree;

pub use nodes::{
    FolderNode, FolderSyncOutcome, NodeKind, Placement, create_folder, current_placement,
    delete_folder, folder_sync, read_nodes, rename_folder,
};
pub use tree::{TreeNode, build_tree};

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use yrs::Doc;

use crate::engine::{index, properties};
use crate::error::Result;
use crate::ids::{folders_doc_id, properties_doc_id, workspace_index_doc_id};
use crate::session::{LoadedDoc, OnMissing, SessionChannel};
use crate::structure::{now_millis, read_document, write_meta};

/// A document with its folder placement resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentListing {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub create_date: Option<i64>,
    pub updated_date: Option<i64>,
    /// `None` when the document sits at the root
    pub folder_id: Option<String>,
}

/// Direct children of one folder (or of the root).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FolderContents {
    pub folders: Vec<FolderNode>,
    pub documents: Vec<DocumentListing>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Count tag occurrences, most used first; ties keep first-seen order.
pub fn count_tags<'a>(tag_lists: impl IntoIterator<Item = &'a [String]>) -> Vec<TagCount> {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for tags in tag_lists {
        for tag in tags {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }
    let mut counted: Vec<TagCount> = counts
        .into_iter()
        .map(|(tag, count)| TagCount {
            tag: tag.to_string(),
            count,
        })
        .collect();
    // stable: equal counts stay in first-seen order
    counted.sort_by(|a, b| b.count.cmp(&a.count));
    counted
}

/// Folder tree, listings and tag views for one workspace.
pub struct FolderRegistry {
    session: Arc<SessionChannel>,
    workspace_id: String,
}

fn document_listings(index_doc: &Doc, nodes: &[FolderNode]) -> Vec<DocumentListing> {
    let placements: HashMap<&str, &str> = nodes
        .iter()
        .filter(|node| node.is_live() && node.kind == NodeKind::Doc)
        .filter_map(|node| Some((node.data.as_str(), node.parent_id.as_deref()?)))
        .collect();

    index::read_entries(index_doc)
        .into_iter()
        .map(|entry| DocumentListing {
            folder_id: placements.get(entry.id.as_str()).map(|id| id.to_string()),
            id: entry.id,
            title: entry.title,
            tags: entry.tags,
            create_date: entry.create_date,
            updated_date: entry.updated_date,
        })
        .collect()
}

impl FolderRegistry {
    pub fn new(session: Arc<SessionChannel>, workspace_id: impl Into<String>) -> Self {
        Self {
            session,
            workspace_id: workspace_id.into(),
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    async fn load(&self, doc_id: &str) -> Result<LoadedDoc> {
        self.session.join(&self.workspace_id).await?;
        self.session
            .load_document(&self.workspace_id, doc_id, OnMissing::CreateEmpty)
            .await
    }

    async fn load_folders(&self) -> Result<LoadedDoc> {
        self.load(&folders_doc_id(&self.workspace_id)).await
    }

    async fn load_index(&self) -> Result<LoadedDoc> {
        self.load(&workspace_index_doc_id(&self.workspace_id)).await
    }

    /// The live folder forest, documents named from the index.
    pub async fn build_tree(&self) -> Result<Vec<TreeNode>> {
        let folders = self.load_folders().await?;
        let index_doc = self.load_index().await?;

        let titles: HashMap<String, String> = index::read_entries(index_doc.doc())
            .into_iter()
            .map(|entry| (entry.id, entry.title))
            .collect();
        Ok(build_tree(&read_nodes(folders.doc()), &titles))
    }

    /// Every indexed document with its current folder.
    pub async fn list_documents(&self) -> Result<Vec<DocumentListing>> {
        let index_doc = self.load_index().await?;
        let folders = self.load_folders().await?;
        Ok(document_listings(index_doc.doc(), &read_nodes(folders.doc())))
    }

    /// Child folders and documents of `folder`.
    pub async fn list_folder_contents(&self, folder: &Placement) -> Result<FolderContents> {
        let index_doc = self.load_index().await?;
        let folders_doc = self.load_folders().await?;
        let nodes = read_nodes(folders_doc.doc());

        let documents = document_listings(index_doc.doc(), &nodes)
            .into_iter()
            .filter(|doc| doc.folder_id.as_deref() == folder.folder_id())
            .collect();
        let folders = nodes
            .into_iter()
            .filter(|node| {
                node.is_live()
                    && node.kind == NodeKind::Folder
                    && node.parent_id.as_deref() == folder.folder_id()
            })
            .collect();

        Ok(FolderContents { folders, documents })
    }

    /// Tags in use, most used first.
    pub async fn list_tags(&self) -> Result<Vec<TagCount>> {
        let index_doc = self.load_index().await?;
        let entries = index::read_entries(index_doc.doc());
        Ok(count_tags(entries.iter().map(|entry| entry.tags.as_slice())))
    }

    /// Remove `tag` from every document carrying it.
    ///
    /// The index, the properties document and each affected content
    /// document's `meta.tags` are rewritten under one timestamp. Documents
    /// that did not carry the tag are not written. Returns the affected
    /// document ids.
    pub async fn delete_tag(&self, tag: &str) -> Result<Vec<String>> {
        let timestamp = now_millis();

        let mut index_doc = self.load_index().await?;
        let mut affected = index::remove_tag(index_doc.doc(), tag, timestamp);
        if !affected.is_empty() {
            self.session.push(&mut index_doc).await?;
        }

        let mut props_doc = self.load(&properties_doc_id(&self.workspace_id)).await?;
        let from_properties = properties::remove_tag(props_doc.doc(), tag, timestamp);
        if !from_properties.is_empty() {
            self.session.push(&mut props_doc).await?;
        }
        for id in from_properties {
            if !affected.contains(&id) {
                affected.push(id);
            }
        }

        for doc_id in &affected {
            let mut content = self.load(doc_id).await?;
            if !content.existed() {
                continue;
            }
            let tags: Vec<String> = read_document(content.doc())
                .tags
                .into_iter()
                .filter(|t| t != tag)
                .collect();
            if write_meta(content.doc(), None, Some(tags.as_slice()), timestamp) {
                self.session.push(&mut content).await?;
            }
        }

        log::info!(
            "[Engine] Removed tag '{}' from {} documents",
            tag,
            affected.len()
        );
        Ok(affected)
    }

    pub async fn create_folder(&self, name: &str, parent: &Placement) -> Result<String> {
        let mut folders = self.load_folders().await?;
        let id = create_folder(folders.doc(), name, parent)?;
        self.session.push(&mut folders).await?;
        Ok(id)
    }

    pub async fn rename_folder(&self, folder_id: &str, name: &str) -> Result<()> {
        let mut folders = self.load_folders().await?;
        if rename_folder(folders.doc(), folder_id, name)? {
            self.session.push(&mut folders).await?;
        }
        Ok(())
    }

    /// Soft-delete a folder and its subtree. Returns the deleted node ids.
    pub async fn delete_folder(&self, folder_id: &str) -> Result<Vec<String>> {
        let mut folders = self.load_folders().await?;
        let deleted = delete_folder(folders.doc(), folder_id)?;
        self.session.push(&mut folders).await?;
        Ok(deleted)
    }
}
