//! Identifier and seed generation.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of generated block, element and document ids.
const ID_LEN: usize = 10;

/// A fresh random identifier for blocks, canvas elements and documents.
pub fn new_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

/// A fresh folder node id. Node ids never collide with document ids.
pub fn new_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Id of the workspace index document.
pub fn workspace_index_doc_id(workspace_id: &str) -> String {
    workspace_id.to_string()
}

/// Id of the per-document properties document.
pub fn properties_doc_id(workspace_id: &str) -> String {
    format!("db${}$docProperties", workspace_id)
}

/// Id of the folder hierarchy document.
pub fn folders_doc_id(workspace_id: &str) -> String {
    format!("db${}$folders", workspace_id)
}

/// A random 31-bit rendering seed.
pub fn new_seed() -> u32 {
    rand::thread_rng().gen_range(0..=i32::MAX as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_alphanumeric_and_distinct() {
        let a = new_id();
        let b = new_id();
        assert_eq!(a.len(), ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_auxiliary_doc_ids() {
        assert_eq!(workspace_index_doc_id("ws"), "ws");
        assert_eq!(properties_doc_id("ws"), "db$ws$docProperties");
        assert_eq!(folders_doc_id("ws"), "db$ws$folders");
        assert_ne!(new_node_id(), new_node_id());
    }

    #[test]
    fn test_seed_fits_in_31_bits() {
        for _ in 0..1000 {
            assert!(new_seed() <= i32::MAX as u32);
        }
    }
}
