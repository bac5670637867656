//! In-place block edits that keep the parent/children links consistent.

use yrs::{Any, Array, Doc, Map, Out, Transact, WriteTxn};

use super::builder::{StructureBuilder, block_map, children_array};
use super::schema::{BLOCKS_MAP, BlockSpec, SYS_CHILDREN, SYS_PARENT};
use crate::crdt::{get_str, get_string_list};
use crate::error::{CosyncError, Result};

impl StructureBuilder {
    /// Append blocks at the end of `parent_id`'s children.
    ///
    /// Returns the ids of the appended top-level blocks.
    pub fn append_blocks(
        &self,
        doc: &Doc,
        parent_id: &str,
        specs: &[BlockSpec],
        timestamp: i64,
    ) -> Result<Vec<String>> {
        let mut txn = doc.transact_mut();
        let blocks = txn.get_or_insert_map(BLOCKS_MAP);
        if block_map(&blocks, &txn, parent_id).is_none() {
            return Err(CosyncError::BlockNotFound(parent_id.to_string()));
        }

        Ok(specs
            .iter()
            .map(|spec| self.write_block(&blocks, &mut txn, parent_id, spec, timestamp))
            .collect())
    }
}

/// Delete a block, detach it from its parent and cascade to its descendants.
///
/// Returns the number of blocks removed.
pub fn delete_block(doc: &Doc, block_id: &str) -> Result<usize> {
    let mut txn = doc.transact_mut();
    let blocks = txn.get_or_insert_map(BLOCKS_MAP);

    if block_map(&blocks, &txn, block_id).is_none() {
        return Err(CosyncError::BlockNotFound(block_id.to_string()));
    }
    let parent = parent_of(&blocks, &txn, block_id)
        .ok_or_else(|| CosyncError::ParentMissing(block_id.to_string()))?;

    let children = children_array(&parent, &mut txn);
    let position = children
        .iter(&txn)
        .position(|child| matches!(child, Out::Any(Any::String(ref id)) if &**id == block_id));
    if let Some(position) = position {
        children.remove(&mut txn, position as u32);
    }

    let mut doomed = vec![block_id.to_string()];
    let mut removed = 0;
    while let Some(id) = doomed.pop() {
        if let Some(block) = block_map(&blocks, &txn, &id) {
            doomed.extend(get_string_list(&block, &txn, SYS_CHILDREN));
        }
        if blocks.remove(&mut txn, &id).is_some() {
            removed += 1;
        }
    }
    log::debug!("[Structure] Deleted {} ({} blocks)", block_id, removed);
    Ok(removed)
}

/// The parent block: `sys:parent` when recorded, otherwise whichever block
/// lists `block_id` among its children.
fn parent_of<T: yrs::ReadTxn>(blocks: &yrs::MapRef, txn: &T, block_id: &str) -> Option<yrs::MapRef> {
    if let Some(block) = block_map(blocks, txn, block_id)
        && let Some(parent_id) = get_str(&block, txn, SYS_PARENT)
        && let Some(parent) = block_map(blocks, txn, &parent_id)
    {
        return Some(parent);
    }

    blocks.iter(txn).find_map(|(_, value)| match value {
        Out::YMap(candidate)
            if get_string_list(&candidate, txn, SYS_CHILDREN)
                .iter()
                .any(|child| child == block_id) =>
        {
            Some(candidate)
        }
        _ => None,
    })
}
