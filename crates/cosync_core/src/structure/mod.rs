//! Canonical content documents.
//!
//! A content document carries two root maps:
//!
//! - `meta`: `id`, `title`, `createDate`, `updatedDate`, `tags`, and a
//!   `deleted` tombstone once the document is removed
//! - `blocks`: every block keyed by its id, linked through `sys:parent` /
//!   `sys:children`
//!
//! [`StructureBuilder`] creates and repopulates documents, [`delete_block`]
//! and [`StructureBuilder::append_blocks`] edit them in place, and
//! [`read_document`] projects them for callers.

mod builder;
mod edit;
mod schema;
mod view;

pub use builder::{
    BlockIds, BuiltDocument, StructureBuilder, clear_document, now_millis, write_meta,
};
pub(crate) use builder::{block_map, find_block_by_flavour};
pub use edit::delete_block;
pub use schema::{
    BLOCKS_MAP, BlockSpec, ContentSource, ListStyle, META_MAP, SYS_CHILDREN, SYS_FLAVOUR, SYS_ID,
    SYS_PARENT, SYS_VERSION, TextRun, flavour, plain_text,
};
pub use view::{DocumentView, OutlineItem, read_document};
