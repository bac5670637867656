//! Canonical document construction.

use yrs::types::Attrs;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, Doc, Map, MapPrelim, MapRef, Out, ReadTxn, Text,
    TextPrelim, TextRef, Transact, TransactionMut, WriteTxn,
};

use super::schema::{
    BLOCKS_MAP, BlockSpec, ContentSource, META_MAP, SYS_CHILDREN, SYS_FLAVOUR, SYS_ID, SYS_PARENT,
    SYS_VERSION, TextRun, flavour, flavour_version,
};
use crate::canvas::init_native_elements;
use crate::crdt::{get_str, get_string_list, json_to_any, write_string_list};
use crate::ids::new_id;
use crate::order::{FIRST_INDEX, index_after};

/// Geometry of the content container on the canvas.
const NOTE_XYWH: &str = "[0,0,800,95]";
const NOTE_BACKGROUND: &str = "--affine-note-background-white";

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Ids of the structural blocks of a populated document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIds {
    pub page_id: String,
    pub surface_id: String,
    pub note_id: String,
}

/// A freshly built document and its creation metadata.
pub struct BuiltDocument {
    pub doc: Doc,
    pub doc_id: String,
    pub blocks: BlockIds,
    pub timestamp: i64,
}

impl std::fmt::Debug for BuiltDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltDocument")
            .field("doc_id", &self.doc_id)
            .field("blocks", &self.blocks)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Builds documents in the host's block schema:
///
/// ```text
/// affine:page (prop:title)
/// ├── affine:surface (prop:elements)
/// └── affine:note
///     └── content blocks (paragraph, list, code, table, ...)
/// ```
///
/// Content blocks are stamped with the owner id as creator and updater.
#[derive(Debug, Clone)]
pub struct StructureBuilder {
    owner_id: String,
}

impl StructureBuilder {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Build a new document. `timestamp` defaults to now.
    pub fn build(
        &self,
        doc_id: &str,
        title: &str,
        content: &ContentSource,
        timestamp: Option<i64>,
    ) -> BuiltDocument {
        let timestamp = timestamp.unwrap_or_else(now_millis);
        let doc = Doc::new();
        let blocks = self.populate(&doc, doc_id, title, content, timestamp);
        log::debug!(
            "[Structure] Built {} with page {}",
            doc_id,
            blocks.page_id
        );

        BuiltDocument {
            doc,
            doc_id: doc_id.to_string(),
            blocks,
            timestamp,
        }
    }

    /// Replace every block of `doc` in one transaction.
    ///
    /// `meta.id` and `meta.createDate` survive when already present.
    pub fn populate(
        &self,
        doc: &Doc,
        doc_id: &str,
        title: &str,
        content: &ContentSource,
        timestamp: i64,
    ) -> BlockIds {
        let mut txn = doc.transact_mut();
        let meta = txn.get_or_insert_map(META_MAP);
        let blocks = txn.get_or_insert_map(BLOCKS_MAP);
        blocks.clear(&mut txn);

        if get_str(&meta, &txn, "id").is_none() {
            meta.insert(&mut txn, "id", Any::String(doc_id.into()));
        }
        if meta.get(&txn, "createDate").is_none() {
            meta.insert(&mut txn, "createDate", Any::Number(timestamp as f64));
        }
        if meta.get(&txn, "tags").is_none() {
            write_string_list(&meta, &mut txn, "tags", &[]);
        }
        if meta.get(&txn, "deleted").is_some() {
            meta.remove(&mut txn, "deleted");
        }
        meta.insert(&mut txn, "title", Any::String(title.into()));
        meta.insert(&mut txn, "updatedDate", Any::Number(timestamp as f64));

        let ids = BlockIds {
            page_id: new_id(),
            surface_id: new_id(),
            note_id: new_id(),
        };

        let page = insert_block(&blocks, &mut txn, &ids.page_id, flavour::PAGE, None);
        page.insert(&mut txn, "prop:title", TextPrelim::new(title));

        let surface = insert_block(
            &blocks,
            &mut txn,
            &ids.surface_id,
            flavour::SURFACE,
            Some(&ids.page_id),
        );
        init_native_elements(&surface, &mut txn);

        let note = insert_block(
            &blocks,
            &mut txn,
            &ids.note_id,
            flavour::NOTE,
            Some(&ids.page_id),
        );
        note.insert(&mut txn, "prop:xywh", Any::String(NOTE_XYWH.into()));
        note.insert(&mut txn, "prop:background", Any::String(NOTE_BACKGROUND.into()));
        note.insert(&mut txn, "prop:index", Any::String(FIRST_INDEX.into()));
        note.insert(&mut txn, "prop:hidden", Any::Bool(false));
        note.insert(&mut txn, "prop:displayMode", Any::String("both".into()));
        note.insert(
            &mut txn,
            "prop:edgeless",
            json_to_any(&serde_json::json!({
                "style": {
                    "borderRadius": 8,
                    "borderSize": 4,
                    "borderStyle": "none",
                    "shadowType": "--affine-note-shadow-box"
                }
            })),
        );

        for spec in content.to_blocks() {
            self.write_block(&blocks, &mut txn, &ids.note_id, &spec, timestamp);
        }
        ids
    }

    /// Write one content block (and its nested children) under `parent_id`.
    pub(crate) fn write_block(
        &self,
        blocks: &MapRef,
        txn: &mut TransactionMut,
        parent_id: &str,
        spec: &BlockSpec,
        timestamp: i64,
    ) -> String {
        let id = new_id();
        let block = insert_block(blocks, txn, &id, spec.flavour(), Some(parent_id));
        self.stamp(&block, txn, timestamp);

        match spec {
            BlockSpec::Paragraph { runs } => {
                block.insert(txn, "prop:type", Any::String("text".into()));
                insert_runs(&block, txn, "prop:text", runs);
            }
            BlockSpec::Heading { level, runs } => {
                let level = (*level).clamp(1, 6);
                block.insert(txn, "prop:type", Any::String(format!("h{}", level).into()));
                insert_runs(&block, txn, "prop:text", runs);
            }
            BlockSpec::Quote { runs } => {
                block.insert(txn, "prop:type", Any::String("quote".into()));
                insert_runs(&block, txn, "prop:text", runs);
            }
            BlockSpec::List {
                style,
                checked,
                runs,
                children,
            } => {
                block.insert(txn, "prop:type", Any::String(style.as_str().into()));
                block.insert(txn, "prop:checked", Any::Bool(*checked));
                block.insert(txn, "prop:collapsed", Any::Bool(false));
                insert_runs(&block, txn, "prop:text", runs);
                for child in children {
                    self.write_block(blocks, txn, &id, child, timestamp);
                }
            }
            BlockSpec::Code { language, text } => {
                let language = match language.as_deref() {
                    Some(lang) if !lang.is_empty() => Any::String(lang.into()),
                    _ => Any::Null,
                };
                block.insert(txn, "prop:language", language);
                block.insert(txn, "prop:wrap", Any::Bool(false));
                block.insert(txn, "prop:caption", Any::String("".into()));
                block.insert(txn, "prop:text", TextPrelim::new(text.as_str()));
            }
            BlockSpec::Divider => {}
            BlockSpec::Table { rows } => write_table(&block, txn, rows),
            BlockSpec::Image { source_id, caption } => {
                block.insert(txn, "prop:sourceId", Any::String(source_id.as_str().into()));
                block.insert(
                    txn,
                    "prop:caption",
                    Any::String(caption.as_deref().unwrap_or_default().into()),
                );
                block.insert(txn, "prop:width", Any::Number(0.0));
                block.insert(txn, "prop:height", Any::Number(0.0));
                block.insert(txn, "prop:index", Any::String(FIRST_INDEX.into()));
                block.insert(txn, "prop:xywh", Any::String("[0,0,0,0]".into()));
                block.insert(txn, "prop:rotate", Any::Number(0.0));
            }
            BlockSpec::Bookmark { url } => {
                block.insert(txn, "prop:url", Any::String(url.as_str().into()));
                block.insert(txn, "prop:style", Any::String("horizontal".into()));
                for key in ["prop:title", "prop:description", "prop:icon", "prop:image", "prop:caption"] {
                    block.insert(txn, key, Any::Null);
                }
                block.insert(txn, "prop:index", Any::String(FIRST_INDEX.into()));
                block.insert(txn, "prop:xywh", Any::String("[0,0,0,0]".into()));
                block.insert(txn, "prop:rotate", Any::Number(0.0));
            }
        }
        id
    }

    fn stamp(&self, block: &MapRef, txn: &mut TransactionMut, timestamp: i64) {
        let owner = Any::String(self.owner_id.as_str().into());
        block.insert(txn, "prop:meta:createdAt", Any::Number(timestamp as f64));
        block.insert(txn, "prop:meta:createdBy", owner.clone());
        block.insert(txn, "prop:meta:updatedAt", Any::Number(timestamp as f64));
        block.insert(txn, "prop:meta:updatedBy", owner);
    }
}

/// Insert a block map with its `sys:*` fields and attach it to its parent.
pub(crate) fn insert_block(
    blocks: &MapRef,
    txn: &mut TransactionMut,
    id: &str,
    flavour: &str,
    parent: Option<&str>,
) -> MapRef {
    let block: MapRef = blocks.insert(txn, id, MapPrelim::default());
    block.insert(txn, SYS_ID, Any::String(id.into()));
    block.insert(txn, SYS_FLAVOUR, Any::String(flavour.into()));
    block.insert(txn, SYS_VERSION, Any::Number(flavour_version(flavour)));
    let parent_value = match parent {
        Some(parent) => Any::String(parent.into()),
        None => Any::Null,
    };
    block.insert(txn, SYS_PARENT, parent_value);
    block.insert(txn, SYS_CHILDREN, ArrayPrelim::default());

    if let Some(parent) = parent
        && let Some(parent_block) = block_map(blocks, &*txn, parent)
    {
        children_array(&parent_block, txn).push_back(txn, Any::String(id.into()));
    }
    block
}

/// Look a block up by id.
pub(crate) fn block_map<T: ReadTxn>(blocks: &MapRef, txn: &T, id: &str) -> Option<MapRef> {
    match blocks.get(txn, id)? {
        Out::YMap(block) => Some(block),
        _ => None,
    }
}

/// The block's children as a shared array, converting a plain array in place.
pub(crate) fn children_array(block: &MapRef, txn: &mut TransactionMut) -> ArrayRef {
    if let Some(Out::YArray(array)) = block.get(&*txn, SYS_CHILDREN) {
        return array;
    }
    let existing = get_string_list(block, &*txn, SYS_CHILDREN);
    let array: ArrayRef = block.insert(txn, SYS_CHILDREN, ArrayPrelim::default());
    for child in existing {
        array.push_back(txn, Any::String(child.into()));
    }
    array
}

/// Id of the first block with `flavour`.
pub(crate) fn find_block_by_flavour<T: ReadTxn>(
    blocks: &MapRef,
    txn: &T,
    flavour: &str,
) -> Option<(String, MapRef)> {
    let mut found: Vec<(String, MapRef)> = blocks
        .iter(txn)
        .filter_map(|(id, value)| match value {
            Out::YMap(block) if get_str(&block, txn, SYS_FLAVOUR).as_deref() == Some(flavour) => {
                Some((id.to_string(), block))
            }
            _ => None,
        })
        .collect();
    found.sort_by(|a, b| a.0.cmp(&b.0));
    found.into_iter().next()
}

fn run_attrs(run: &TextRun) -> Attrs {
    let mut attrs = Attrs::new();
    for (name, on) in [
        ("bold", run.bold),
        ("italic", run.italic),
        ("underline", run.underline),
        ("strike", run.strike),
        ("code", run.code),
    ] {
        if on {
            attrs.insert(name.into(), Any::Bool(true));
        }
    }
    if let Some(link) = &run.link {
        attrs.insert("link".into(), Any::String(link.as_str().into()));
    }
    attrs
}

/// Insert a shared text under `key` filled with formatted runs.
pub(crate) fn insert_runs(block: &MapRef, txn: &mut TransactionMut, key: &str, runs: &[TextRun]) {
    let text: TextRef = block.insert(txn, key, TextPrelim::new(""));
    for run in runs.iter().filter(|r| !r.text.is_empty()) {
        let at = text.len(&*txn);
        if run.is_plain() {
            text.insert(txn, at, &run.text);
        } else {
            text.insert_with_attributes(txn, at, &run.text, run_attrs(run));
        }
    }
}

fn write_table(block: &MapRef, txn: &mut TransactionMut, rows: &[Vec<String>]) {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);

    let column_ids: Vec<String> = (0..columns).map(|_| new_id()).collect();
    let columns_map: MapRef = block.insert(txn, "prop:columns", MapPrelim::default());
    let mut order = FIRST_INDEX.to_string();
    for column_id in &column_ids {
        let column: MapRef = columns_map.insert(txn, column_id.as_str(), MapPrelim::default());
        column.insert(txn, "columnId", Any::String(column_id.as_str().into()));
        column.insert(txn, "order", Any::String(order.as_str().into()));
        order = index_after(&order);
    }

    let rows_map: MapRef = block.insert(txn, "prop:rows", MapPrelim::default());
    let cells_map: MapRef = block.insert(txn, "prop:cells", MapPrelim::default());
    let mut order = FIRST_INDEX.to_string();
    for cells in rows {
        let row_id = new_id();
        let row: MapRef = rows_map.insert(txn, row_id.as_str(), MapPrelim::default());
        row.insert(txn, "rowId", Any::String(row_id.as_str().into()));
        row.insert(txn, "order", Any::String(order.as_str().into()));
        order = index_after(&order);

        for (column_id, value) in column_ids.iter().zip(cells) {
            let key = format!("{}:{}", row_id, column_id);
            let cell: MapRef = cells_map.insert(txn, key, MapPrelim::default());
            cell.insert(txn, "text", TextPrelim::new(value.as_str()));
        }
    }
}

/// Rewrite a document's title and tags in place.
///
/// Returns whether anything changed; `updatedDate` is only bumped then.
pub fn write_meta(doc: &Doc, title: Option<&str>, tags: Option<&[String]>, timestamp: i64) -> bool {
    let mut txn = doc.transact_mut();
    let meta = txn.get_or_insert_map(META_MAP);
    let blocks = txn.get_or_insert_map(BLOCKS_MAP);
    let mut changed = false;

    if let Some(title) = title
        && get_str(&meta, &txn, "title").as_deref() != Some(title)
    {
        meta.insert(&mut txn, "title", Any::String(title.into()));
        if let Some((_, page)) = find_block_by_flavour(&blocks, &txn, flavour::PAGE) {
            page.insert(&mut txn, "prop:title", TextPrelim::new(title));
        }
        changed = true;
    }

    if let Some(tags) = tags
        && get_string_list(&meta, &txn, "tags") != tags
    {
        write_string_list(&meta, &mut txn, "tags", tags);
        changed = true;
    }

    if changed {
        meta.insert(&mut txn, "updatedDate", Any::Number(timestamp as f64));
    }
    changed
}

/// Drop every block and metadata field, leaving only `meta.id` and a
/// `meta.deleted` tombstone.
pub fn clear_document(doc: &Doc, doc_id: &str, timestamp: i64) {
    let mut txn = doc.transact_mut();
    let meta = txn.get_or_insert_map(META_MAP);
    let blocks = txn.get_or_insert_map(BLOCKS_MAP);
    blocks.clear(&mut txn);
    meta.clear(&mut txn);
    meta.insert(&mut txn, "id", Any::String(doc_id.into()));
    meta.insert(&mut txn, "deleted", Any::Bool(true));
    meta.insert(&mut txn, "updatedDate", Any::Number(timestamp as f64));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::NATIVE_ELEMENTS_TYPE;
    use crate::crdt::{get_bool, get_i64};
    use crate::structure::schema::ListStyle;
    use yrs::GetString;

    fn builder() -> StructureBuilder {
        StructureBuilder::new("owner-1")
    }

    fn blocks_of(doc: &Doc) -> MapRef {
        doc.get_or_insert_map(BLOCKS_MAP)
    }

    #[test]
    fn test_build_produces_canonical_skeleton() {
        let built = builder().build("doc-1", "Hello", &ContentSource::Empty, Some(42));
        assert_eq!(built.timestamp, 42);

        let blocks = blocks_of(&built.doc);
        let meta = built.doc.get_or_insert_map(META_MAP);
        let txn = built.doc.transact();

        assert_eq!(get_str(&meta, &txn, "id").as_deref(), Some("doc-1"));
        assert_eq!(get_str(&meta, &txn, "title").as_deref(), Some("Hello"));
        assert_eq!(get_i64(&meta, &txn, "createDate"), Some(42));

        let page = block_map(&blocks, &txn, &built.blocks.page_id).unwrap();
        assert_eq!(get_str(&page, &txn, "prop:title").as_deref(), Some("Hello"));
        assert_eq!(
            get_string_list(&page, &txn, SYS_CHILDREN),
            vec![built.blocks.surface_id.clone(), built.blocks.note_id.clone()]
        );

        let surface = block_map(&blocks, &txn, &built.blocks.surface_id).unwrap();
        let Some(Out::YMap(elements)) = surface.get(&txn, "prop:elements") else {
            panic!("surface elements missing");
        };
        assert_eq!(
            get_str(&elements, &txn, "type").as_deref(),
            Some(NATIVE_ELEMENTS_TYPE)
        );
        assert!(matches!(elements.get(&txn, "value"), Some(Out::YMap(_))));

        let note = block_map(&blocks, &txn, &built.blocks.note_id).unwrap();
        let children = get_string_list(&note, &txn, SYS_CHILDREN);
        assert_eq!(children.len(), 1);
        let paragraph = block_map(&blocks, &txn, &children[0]).unwrap();
        assert_eq!(
            get_str(&paragraph, &txn, SYS_PARENT).as_deref(),
            Some(built.blocks.note_id.as_str())
        );
        assert_eq!(
            get_str(&paragraph, &txn, "prop:meta:createdBy").as_deref(),
            Some("owner-1")
        );
        assert_eq!(get_i64(&paragraph, &txn, "prop:meta:updatedAt"), Some(42));
    }

    #[test]
    fn test_text_content_becomes_paragraphs() {
        let built = builder().build(
            "doc",
            "T",
            &ContentSource::Text("first\nsecond\nthird".to_string()),
            None,
        );
        let blocks = blocks_of(&built.doc);
        let txn = built.doc.transact();
        let note = block_map(&blocks, &txn, &built.blocks.note_id).unwrap();
        let texts: Vec<String> = get_string_list(&note, &txn, SYS_CHILDREN)
            .iter()
            .map(|id| {
                let block = block_map(&blocks, &txn, id).unwrap();
                get_str(&block, &txn, "prop:text").unwrap()
            })
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_block_list_with_nesting_and_formatting() {
        let specs = vec![
            BlockSpec::heading(9, "Title"),
            BlockSpec::List {
                style: ListStyle::Todo,
                checked: true,
                runs: vec![
                    TextRun::plain("buy "),
                    TextRun {
                        text: "milk".to_string(),
                        bold: true,
                        ..TextRun::default()
                    },
                ],
                children: vec![BlockSpec::list_item(ListStyle::Bulleted, "nested")],
            },
            BlockSpec::Code {
                language: Some("rust".to_string()),
                text: "let x = 1;".to_string(),
            },
            BlockSpec::Table {
                rows: vec![
                    vec!["a".to_string(), "b".to_string()],
                    vec!["c".to_string()],
                ],
            },
        ];
        let built = builder().build("doc", "T", &ContentSource::Blocks(specs), Some(1));
        let blocks = blocks_of(&built.doc);
        let txn = built.doc.transact();
        let note = block_map(&blocks, &txn, &built.blocks.note_id).unwrap();
        let children = get_string_list(&note, &txn, SYS_CHILDREN);
        assert_eq!(children.len(), 4);

        let heading = block_map(&blocks, &txn, &children[0]).unwrap();
        assert_eq!(get_str(&heading, &txn, "prop:type").as_deref(), Some("h6"));

        let list = block_map(&blocks, &txn, &children[1]).unwrap();
        assert_eq!(get_str(&list, &txn, "prop:type").as_deref(), Some("todo"));
        assert_eq!(get_bool(&list, &txn, "prop:checked"), Some(true));
        let Some(Out::YText(text)) = list.get(&txn, "prop:text") else {
            panic!("list text missing");
        };
        assert_eq!(text.get_string(&txn), "buy milk");
        let nested = get_string_list(&list, &txn, SYS_CHILDREN);
        assert_eq!(nested.len(), 1);
        let nested_block = block_map(&blocks, &txn, &nested[0]).unwrap();
        assert_eq!(
            get_str(&nested_block, &txn, SYS_PARENT).as_deref(),
            Some(children[1].as_str())
        );

        let code = block_map(&blocks, &txn, &children[2]).unwrap();
        assert_eq!(get_str(&code, &txn, SYS_FLAVOUR).as_deref(), Some(flavour::CODE));
        assert_eq!(get_str(&code, &txn, "prop:language").as_deref(), Some("rust"));

        let table = block_map(&blocks, &txn, &children[3]).unwrap();
        let Some(Out::YMap(cells)) = table.get(&txn, "prop:cells") else {
            panic!("table cells missing");
        };
        assert_eq!(cells.len(&txn), 3);
    }

    #[test]
    fn test_populate_preserves_identity_and_create_date() {
        let built = builder().build("doc", "Old", &ContentSource::Text("x".into()), Some(10));
        let ids = builder().populate(
            &built.doc,
            "ignored",
            "New",
            &ContentSource::Text("y".into()),
            20,
        );
        assert_ne!(ids.page_id, built.blocks.page_id);

        let meta = built.doc.get_or_insert_map(META_MAP);
        let blocks = blocks_of(&built.doc);
        let txn = built.doc.transact();
        assert_eq!(get_str(&meta, &txn, "id").as_deref(), Some("doc"));
        assert_eq!(get_i64(&meta, &txn, "createDate"), Some(10));
        assert_eq!(get_i64(&meta, &txn, "updatedDate"), Some(20));
        assert!(block_map(&blocks, &txn, &built.blocks.page_id).is_none());
        assert_eq!(blocks.len(&txn), 4);
    }

    #[test]
    fn test_write_meta_reports_changes() {
        let built = builder().build("doc", "Same", &ContentSource::Empty, Some(1));
        let none: &[String] = &[];
        assert!(!write_meta(&built.doc, Some("Same"), Some(none), 5));
        assert!(write_meta(&built.doc, Some("Other"), None, 6));
        let tags = vec!["t".to_string()];
        assert!(write_meta(&built.doc, None, Some(tags.as_slice()), 7));

        let meta = built.doc.get_or_insert_map(META_MAP);
        let blocks = blocks_of(&built.doc);
        let txn = built.doc.transact();
        assert_eq!(get_i64(&meta, &txn, "updatedDate"), Some(7));
        assert_eq!(get_string_list(&meta, &txn, "tags"), vec!["t"]);
        let (_, page) = find_block_by_flavour(&blocks, &txn, flavour::PAGE).unwrap();
        assert_eq!(get_str(&page, &txn, "prop:title").as_deref(), Some("Other"));
    }

    #[test]
    fn test_clear_document_keeps_only_identity() {
        let built = builder().build("doc", "Gone", &ContentSource::Text("a".into()), Some(1));
        clear_document(&built.doc, "doc", 9);

        let meta = built.doc.get_or_insert_map(META_MAP);
        let blocks = blocks_of(&built.doc);
        let txn = built.doc.transact();
        assert_eq!(blocks.len(&txn), 0);
        assert_eq!(get_str(&meta, &txn, "id").as_deref(), Some("doc"));
        assert_eq!(get_bool(&meta, &txn, "deleted"), Some(true));
        assert!(get_str(&meta, &txn, "title").is_none());
    }
}
