//! Canvas elements on a document's surface block.
//!
//! Elements (shapes, connectors, text, groups, mind maps, freehand strokes)
//! live in the surface block's `prop:elements` collection. The collection
//! exists in two physical encodings; [`ElementStore`] hides the difference.
//!
//! The pure functions ([`list_elements`], [`create_element`],
//! [`update_element`], [`delete_element`]) work on a loaded document.
//! [`CanvasManager`] wraps them with load and push against the host.

mod element;
mod manager;
mod ops;
mod store;

pub use element::{CanvasElement, ElementDraft, ElementKind, Xywh};
pub use manager::CanvasManager;
pub use ops::{create_element, delete_element, list_elements, update_element};
pub use store::{
    ELEMENTS_FIELD, ElementStore, Encoding, NATIVE_ELEMENTS_TYPE, init_native_elements, open_store,
};
