#![doc = include_str!(concat!(env!("OUT_DIR"), "/engine_README.md"))]

pub mod index;
pub mod properties;

use std::sync::Arc;

use serde_json::{Map as JsonMap, Value};
use yrs::Transact;

use crate::error::{CosyncError, Result};
use crate::ids::{folders_doc_id, new_id, properties_doc_id, workspace_index_doc_id};
use crate::registry::{FolderSyncOutcome, Placement, current_placement, folder_sync};
use crate::session::{LoadedDoc, OnMissing, SessionChannel};
use crate::structure::{
    BLOCKS_MAP, BlockSpec, ContentSource, DocumentView, StructureBuilder, clear_document,
    delete_block, find_block_by_flavour, flavour, now_millis, read_document, write_meta,
};

pub use index::IndexEntry;
pub use properties::{PrimaryMode, PropertiesEntry, PropertiesPatch};

/// Folder instruction carried by an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FolderTarget {
    /// Keep the current placement (duplicates are still pruned)
    #[default]
    Unspecified,
    Root,
    Folder(String),
}

/// A document to create.
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub title: String,
    pub content: ContentSource,
    pub folder: Option<String>,
    pub tags: Vec<String>,
    pub primary_mode: Option<PrimaryMode>,
    pub custom: JsonMap<String, Value>,
    /// Caller-chosen document id; generated when absent
    pub doc_id: Option<String>,
}

impl CreateRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_content(mut self, content: ContentSource) -> Self {
        self.content = content;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder = Some(folder_id.into());
        self
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedDocument {
    pub doc_id: String,
    /// Folder node registered for the document, when a folder was given
    pub folder_node_id: Option<String>,
    pub timestamp: i64,
}

/// Changes to an existing document. `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct DocPatch {
    pub title: Option<String>,
    /// Replaces every block when set
    pub content: Option<ContentSource>,
    pub tags: Option<Vec<String>>,
    pub folder: FolderTarget,
    pub primary_mode: Option<PrimaryMode>,
    pub custom: JsonMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedDocument {
    pub doc_id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub folder: FolderSyncOutcome,
    pub timestamp: i64,
}

/// A tag edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagChange {
    Set(Vec<String>),
    Add(Vec<String>),
    Remove(Vec<String>),
}

impl TagChange {
    /// Apply to `current`, keeping order and dropping repeats.
    pub fn apply(&self, current: &[String]) -> Vec<String> {
        let mut tags: Vec<String> = match self {
            Self::Set(tags) => tags.clone(),
            Self::Add(added) => current.iter().chain(added).cloned().collect(),
            Self::Remove(removed) => current
                .iter()
                .filter(|tag| !removed.contains(tag))
                .cloned()
                .collect(),
        };
        let mut seen = std::collections::HashSet::new();
        tags.retain(|tag| seen.insert(tag.clone()));
        tags
    }
}

/// Orchestrates writes across a document and the workspace's auxiliary
/// documents.
pub struct ConsistencyEngine {
    session: Arc<SessionChannel>,
    workspace_id: String,
    builder: StructureBuilder,
}

impl ConsistencyEngine {
    pub fn new(
        session: Arc<SessionChannel>,
        workspace_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            session,
            workspace_id: workspace_id.into(),
            builder: StructureBuilder::new(owner_id),
        }
    }

    /// Engine for the workspace and owner named in the session's config.
    pub fn from_session(session: Arc<SessionChannel>) -> Self {
        let workspace_id = session.config().workspace_id.clone();
        let owner_id = session.config().owner_id.clone();
        Self::new(session, workspace_id, owner_id)
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn session(&self) -> &Arc<SessionChannel> {
        &self.session
    }

    async fn load(&self, doc_id: &str, on_missing: OnMissing) -> Result<LoadedDoc> {
        self.session.join(&self.workspace_id).await?;
        self.session
            .load_document(&self.workspace_id, doc_id, on_missing)
            .await
    }

    async fn load_index(&self) -> Result<LoadedDoc> {
        self.load(&workspace_index_doc_id(&self.workspace_id), OnMissing::CreateEmpty)
            .await
    }

    async fn load_properties(&self) -> Result<LoadedDoc> {
        self.load(&properties_doc_id(&self.workspace_id), OnMissing::CreateEmpty)
            .await
    }

    async fn load_folders(&self) -> Result<LoadedDoc> {
        self.load(&folders_doc_id(&self.workspace_id), OnMissing::CreateEmpty)
            .await
    }

    async fn write_index(&self, doc_id: &str, title: &str, tags: &[String], ts: i64) -> Result<()> {
        let mut index_doc = self.load_index().await?;
        index::upsert_entry(index_doc.doc(), doc_id, title, tags, ts);
        self.session.push(&mut index_doc).await
    }

    async fn write_properties(&self, doc_id: &str, patch: &PropertiesPatch, ts: i64) -> Result<()> {
        let mut props_doc = self.load_properties().await?;
        properties::merge_properties(props_doc.doc(), doc_id, patch, ts);
        self.session.push(&mut props_doc).await
    }

    /// Create a document and register it in the index, the properties
    /// document and, when a folder is given, the folder document.
    pub async fn create(&self, request: CreateRequest) -> Result<CreatedDocument> {
        let doc_id = request.doc_id.clone().unwrap_or_else(new_id);
        let timestamp = now_millis();

        let mut content = self.load(&doc_id, OnMissing::CreateEmpty).await?;
        if content.existed() {
            log::warn!("[Engine] {} already exists, repopulating", doc_id);
        }
        self.builder.populate(
            content.doc(),
            &doc_id,
            &request.title,
            &request.content,
            timestamp,
        );
        write_meta(content.doc(), None, Some(request.tags.as_slice()), timestamp);
        self.session.push(&mut content).await?;

        self.write_index(&doc_id, &request.title, &request.tags, timestamp)
            .await?;
        self.write_properties(
            &doc_id,
            &PropertiesPatch {
                tags: Some(request.tags.clone()),
                primary_mode: request.primary_mode,
                custom: request.custom.clone(),
            },
            timestamp,
        )
        .await?;

        let folder_node_id = match request.folder {
            Some(folder_id) => {
                self.sync_folder(&doc_id, &Placement::Folder(folder_id), None)
                    .await?
                    .node_id
            }
            None => None,
        };

        log::info!("[Engine] Created {} '{}'", doc_id, request.title);
        Ok(CreatedDocument {
            doc_id,
            folder_node_id,
            timestamp,
        })
    }

    /// Apply a patch, keeping the index and properties entries in line.
    ///
    /// A soft-deleted document is refused with
    /// [`CosyncError::DocumentDeleted`] before anything is written.
    pub async fn update(&self, doc_id: &str, patch: DocPatch) -> Result<UpdatedDocument> {
        let timestamp = now_millis();
        let mut content = self.load(doc_id, OnMissing::Fail).await?;
        let view = read_document(content.doc());
        if view.deleted {
            return Err(CosyncError::DocumentDeleted(doc_id.to_string()));
        }

        let index_doc = self.load_index().await?;
        let indexed = index::find_entry(index_doc.doc(), doc_id);
        let props_doc = self.load_properties().await?;
        let props = properties::read_properties(props_doc.doc(), doc_id);

        let title = patch
            .title
            .clone()
            .or_else(|| indexed.as_ref().map(|entry| entry.title.clone()))
            .unwrap_or_else(|| view.title.clone());
        let tags = patch
            .tags
            .clone()
            .or_else(|| indexed.as_ref().map(|entry| entry.tags.clone()))
            .or_else(|| props.as_ref().map(|entry| entry.tags.clone()))
            .unwrap_or_else(|| view.tags.clone());

        let mut touched = false;
        if let Some(source) = &patch.content {
            self.builder
                .populate(content.doc(), doc_id, &title, source, timestamp);
            touched = true;
        }
        touched |= write_meta(
            content.doc(),
            Some(title.as_str()),
            Some(tags.as_slice()),
            timestamp,
        );
        if touched {
            self.session.push(&mut content).await?;
        }

        self.write_index(doc_id, &title, &tags, timestamp).await?;
        self.write_properties(
            doc_id,
            &PropertiesPatch {
                tags: Some(tags.clone()),
                primary_mode: patch.primary_mode,
                custom: patch.custom.clone(),
            },
            timestamp,
        )
        .await?;

        let folder = match patch.folder {
            FolderTarget::Unspecified => {
                let folders = self.load_folders().await?;
                let placement = current_placement(folders.doc(), doc_id);
                self.sync_folder(doc_id, &placement, None).await?
            }
            FolderTarget::Root => self.sync_folder(doc_id, &Placement::Root, None).await?,
            FolderTarget::Folder(folder_id) => {
                self.sync_folder(doc_id, &Placement::Folder(folder_id), None)
                    .await?
            }
        };

        log::info!("[Engine] Updated {}", doc_id);
        Ok(UpdatedDocument {
            doc_id: doc_id.to_string(),
            title,
            tags,
            folder,
            timestamp,
        })
    }

    /// Soft-delete a document everywhere.
    ///
    /// The folder node is detached, the properties entry tombstoned, the
    /// index entry removed and the content document cleared down to
    /// `meta.id` and `meta.deleted`.
    pub async fn delete(&self, doc_id: &str) -> Result<()> {
        let timestamp = now_millis();

        self.sync_folder(doc_id, &Placement::Root, None).await?;

        let mut props_doc = self.load_properties().await?;
        properties::soft_delete_properties(props_doc.doc(), doc_id, timestamp);
        self.session.push(&mut props_doc).await?;

        let mut index_doc = self.load_index().await?;
        if index::remove_entry(index_doc.doc(), doc_id) > 0 {
            self.session.push(&mut index_doc).await?;
        }

        let mut content = self.load(doc_id, OnMissing::CreateEmpty).await?;
        clear_document(content.doc(), doc_id, timestamp);
        self.session.push(&mut content).await?;

        log::info!("[Engine] Deleted {}", doc_id);
        Ok(())
    }

    /// Move a document to the root or into a folder.
    pub async fn move_document(
        &self,
        doc_id: &str,
        placement: &Placement,
    ) -> Result<FolderSyncOutcome> {
        self.sync_folder(doc_id, placement, None).await
    }

    /// Reconcile the folder document with `placement` for `doc_id`.
    ///
    /// Pushes only when something changed, so repeating a call is free.
    pub async fn sync_folder(
        &self,
        doc_id: &str,
        placement: &Placement,
        preferred_node: Option<&str>,
    ) -> Result<FolderSyncOutcome> {
        let mut folders = self.load_folders().await?;
        let outcome = folder_sync(folders.doc(), doc_id, placement, preferred_node);
        if outcome.changed {
            self.session.push(&mut folders).await?;
        } else {
            log::debug!("[FolderSync] {} already in place", doc_id);
        }
        Ok(outcome)
    }

    /// Edit a document's tags. Returns the resulting tag list.
    pub async fn tag(&self, doc_id: &str, change: TagChange) -> Result<Vec<String>> {
        let current = match change {
            TagChange::Set(_) => Vec::new(),
            _ => self.current_tags(doc_id).await?,
        };
        let patch = DocPatch {
            tags: Some(change.apply(&current)),
            ..DocPatch::default()
        };
        Ok(self.update(doc_id, patch).await?.tags)
    }

    async fn current_tags(&self, doc_id: &str) -> Result<Vec<String>> {
        let index_doc = self.load_index().await?;
        if let Some(entry) = index::find_entry(index_doc.doc(), doc_id) {
            return Ok(entry.tags);
        }
        let props_doc = self.load_properties().await?;
        if let Some(entry) = properties::read_properties(props_doc.doc(), doc_id) {
            return Ok(entry.tags);
        }
        Ok(self.read(doc_id).await?.tags)
    }

    /// Metadata and outline of a document.
    pub async fn read(&self, doc_id: &str) -> Result<DocumentView> {
        let content = self.load(doc_id, OnMissing::Fail).await?;
        Ok(read_document(content.doc()))
    }

    /// Append blocks under `parent`, or under the note block when `None`.
    ///
    /// Returns the ids of the new top-level blocks.
    pub async fn append_blocks(
        &self,
        doc_id: &str,
        parent: Option<&str>,
        specs: &[BlockSpec],
    ) -> Result<Vec<String>> {
        let mut content = self.load(doc_id, OnMissing::Fail).await?;
        let parent_id = match parent {
            Some(parent) => parent.to_string(),
            None => {
                let blocks = content.doc().get_or_insert_map(BLOCKS_MAP);
                let txn = content.doc().transact();
                find_block_by_flavour(&blocks, &txn, flavour::NOTE)
                    .map(|(id, _)| id)
                    .ok_or_else(|| CosyncError::BlockNotFound(flavour::NOTE.to_string()))?
            }
        };

        let ids = self
            .builder
            .append_blocks(content.doc(), &parent_id, specs, now_millis())?;
        self.session.push(&mut content).await?;
        Ok(ids)
    }

    /// Delete a block and its descendants. Returns how many were removed.
    pub async fn delete_block(&self, doc_id: &str, block_id: &str) -> Result<usize> {
        let mut content = self.load(doc_id, OnMissing::Fail).await?;
        let removed = delete_block(content.doc(), block_id)?;
        self.session.push(&mut content).await?;
        Ok(removed)
    }
}
