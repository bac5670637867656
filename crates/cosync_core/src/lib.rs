#![doc = include_str!(concat!(env!("OUT_DIR"), "/README.md"))]

/// Canvas elements on a document's surface block
pub mod canvas;

/// Configuration options
pub mod config;

/// Readers and writers over yrs values
pub mod crdt;

/// Cross-document consistency engine
pub mod engine;

/// Error (common error types)
pub mod error;

/// Document, node and element identifiers
pub mod ids;

/// Ordering keys for canvas z-order and folders
pub mod order;

/// Folder tree, folder management and tags
pub mod registry;

/// Session channel to the host
pub mod session;

/// Content document structure
pub mod structure;

pub use engine::ConsistencyEngine;
pub use error::{CosyncError, Result};
pub use session::SessionChannel;

#[cfg(test)]
pub mod test_utils;
