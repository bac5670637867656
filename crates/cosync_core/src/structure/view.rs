//! Read-only projection of a content document.

use serde::Serialize;
use yrs::{Doc, MapRef, ReadTxn, Transact};

use super::builder::{block_map, find_block_by_flavour};
use super::schema::{BLOCKS_MAP, META_MAP, SYS_CHILDREN, SYS_FLAVOUR, flavour};
use crate::crdt::{get_bool, get_i64, get_str, get_string_list};

/// One block in document order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineItem {
    pub id: String,
    pub flavour: String,
    /// `prop:type` (paragraph style, list style)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    /// Nesting depth below the page block
    pub depth: usize,
}

/// Metadata and outline of a content document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: Option<String>,
    pub title: String,
    pub tags: Vec<String>,
    pub deleted: bool,
    pub create_date: Option<i64>,
    pub updated_date: Option<i64>,
    pub blocks: Vec<OutlineItem>,
}

/// Project a content document into a [`DocumentView`].
pub fn read_document(doc: &Doc) -> DocumentView {
    let meta = doc.get_or_insert_map(META_MAP);
    let blocks = doc.get_or_insert_map(BLOCKS_MAP);
    let txn = doc.transact();

    let page = find_block_by_flavour(&blocks, &txn, flavour::PAGE);
    let title = get_str(&meta, &txn, "title")
        .or_else(|| {
            page.as_ref()
                .and_then(|(_, page)| get_str(page, &txn, "prop:title"))
        })
        .unwrap_or_default();

    let mut outline = Vec::new();
    if let Some((page_id, _)) = &page {
        let mut stack = vec![(page_id.clone(), 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(block) = block_map(&blocks, &txn, &id) else {
                continue;
            };
            outline.push(outline_item(&block, &txn, &id, depth));
            let children = get_string_list(&block, &txn, SYS_CHILDREN);
            stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }
    }

    DocumentView {
        id: get_str(&meta, &txn, "id"),
        title,
        tags: get_string_list(&meta, &txn, "tags"),
        deleted: get_bool(&meta, &txn, "deleted").unwrap_or_default(),
        create_date: get_i64(&meta, &txn, "createDate"),
        updated_date: get_i64(&meta, &txn, "updatedDate"),
        blocks: outline,
    }
}

fn outline_item<T: ReadTxn>(block: &MapRef, txn: &T, id: &str, depth: usize) -> OutlineItem {
    let flavour = get_str(block, txn, SYS_FLAVOUR).unwrap_or_default();
    let text = if flavour == flavour::PAGE {
        get_str(block, txn, "prop:title")
    } else {
        get_str(block, txn, "prop:text")
    };
    OutlineItem {
        id: id.to_string(),
        kind: get_str(block, txn, "prop:type"),
        checked: get_bool(block, txn, "prop:checked"),
        text: text.unwrap_or_default(),
        flavour,
        depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{BlockSpec, ContentSource, ListStyle, StructureBuilder, clear_document};

    #[test]
    fn test_outline_is_in_document_order() {
        let built = StructureBuilder::new("o").build(
            "doc",
            "Outline",
            &ContentSource::Blocks(vec![
                BlockSpec::heading(1, "Top"),
                BlockSpec::List {
                    style: ListStyle::Numbered,
                    checked: false,
                    runs: vec![],
                    children: vec![BlockSpec::list_item(ListStyle::Numbered, "inner")],
                },
                BlockSpec::paragraph("end"),
            ]),
            Some(5),
        );

        let view = read_document(&built.doc);
        assert_eq!(view.id.as_deref(), Some("doc"));
        assert_eq!(view.title, "Outline");
        assert!(!view.deleted);
        assert_eq!(view.create_date, Some(5));

        let flavours: Vec<(&str, usize)> = view
            .blocks
            .iter()
            .map(|b| (b.flavour.as_str(), b.depth))
            .collect();
        assert_eq!(
            flavours,
            vec![
                (flavour::PAGE, 0),
                (flavour::SURFACE, 1),
                (flavour::NOTE, 1),
                (flavour::PARAGRAPH, 2),
                (flavour::LIST, 2),
                (flavour::LIST, 3),
                (flavour::PARAGRAPH, 2),
            ]
        );
        assert_eq!(view.blocks[0].text, "Outline");
        assert_eq!(view.blocks[3].kind.as_deref(), Some("h1"));
        assert_eq!(view.blocks[5].text, "inner");
    }

    #[test]
    fn test_deleted_document_view() {
        let built = StructureBuilder::new("o").build("doc", "T", &ContentSource::Empty, None);
        clear_document(&built.doc, "doc", 1);
        let view = read_document(&built.doc);
        assert!(view.deleted);
        assert!(view.blocks.is_empty());
        assert_eq!(view.title, "");
    }
}
