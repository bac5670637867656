//! Session-backed canvas operations: load, mutate, push once.

use std::sync::Arc;

use serde_json::{Map as JsonMap, Value};

use super::element::{CanvasElement, ElementDraft};
use super::ops::{create_element, delete_element, list_elements, update_element};
use crate::error::Result;
use crate::session::{LoadedDoc, OnMissing, SessionChannel};

/// Canvas element CRUD against documents on the host.
///
/// Every mutation loads the document fresh, applies the change in one
/// transaction and ends with exactly one push. Failed mutations push nothing.
pub struct CanvasManager {
    session: Arc<SessionChannel>,
    workspace_id: String,
}

impl CanvasManager {
    pub fn new(session: Arc<SessionChannel>, workspace_id: impl Into<String>) -> Self {
        Self {
            session,
            workspace_id: workspace_id.into(),
        }
    }

    async fn load(&self, doc_id: &str) -> Result<LoadedDoc> {
        self.session.join(&self.workspace_id).await?;
        self.session
            .load_document(&self.workspace_id, doc_id, OnMissing::Fail)
            .await
    }

    pub async fn list(&self, doc_id: &str) -> Result<Vec<CanvasElement>> {
        let loaded = self.load(doc_id).await?;
        list_elements(loaded.doc())
    }

    pub async fn create(&self, doc_id: &str, draft: ElementDraft) -> Result<CanvasElement> {
        let mut loaded = self.load(doc_id).await?;
        let element = create_element(loaded.doc(), draft)?;
        self.session.push(&mut loaded).await?;
        Ok(element)
    }

    pub async fn update(
        &self,
        doc_id: &str,
        element_id: &str,
        patch: &JsonMap<String, Value>,
    ) -> Result<CanvasElement> {
        let mut loaded = self.load(doc_id).await?;
        let element = update_element(loaded.doc(), element_id, patch)?;
        self.session.push(&mut loaded).await?;
        Ok(element)
    }

    pub async fn delete(&self, doc_id: &str, element_id: &str) -> Result<()> {
        let mut loaded = self.load(doc_id).await?;
        delete_element(loaded.doc(), element_id)?;
        self.session.push(&mut loaded).await
    }
}
