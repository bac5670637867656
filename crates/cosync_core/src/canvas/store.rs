//! The two physical encodings of a surface's element collection.
//!
//! `prop:elements` on the surface block is a wrapper tagged
//! [`NATIVE_ELEMENTS_TYPE`] whose `value` holds the elements:
//!
//! - native: `value` is a shared map of shared maps, one per element
//! - plain: `value` (or the whole wrapper) is a plain JSON snapshot, written
//!   back in full on every change
//!
//! [`open_store`] inspects the wrapper and hands back the matching
//! [`ElementStore`]. A wrapper carrying any other type tag is left alone.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value};
use yrs::{Any, Map, MapPrelim, MapRef, Out, TextPrelim, TransactionMut};

use crate::crdt::{any_to_json, json_to_any, map_to_json, out_to_json};

/// Surface block field holding the element collection.
pub const ELEMENTS_FIELD: &str = "prop:elements";

/// Type tag of the element collection wrapper.
pub const NATIVE_ELEMENTS_TYPE: &str = "$blocksuite:internal:native$";

/// Element fields stored as shared text in the native encoding.
const TEXT_FIELDS: &[&str] = &["text"];

type Record = JsonMap<String, Value>;

/// Which encoding a store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Native,
    Plain,
}

/// Keyed access to element records, whatever their encoding.
pub trait ElementStore {
    fn encoding(&self) -> Encoding;

    /// Every `(key, record)` pair, ordered by key.
    fn entries(&self, txn: &TransactionMut<'_>) -> Vec<(String, Record)>;

    fn get(&self, txn: &TransactionMut<'_>, id: &str) -> Option<Record>;

    /// Write the full record for `id`.
    fn set(&mut self, txn: &mut TransactionMut<'_>, id: &str, record: &Record);

    /// Remove `id`; `false` when it was absent.
    fn delete(&mut self, txn: &mut TransactionMut<'_>, id: &str) -> bool;

    /// Persist buffered changes.
    fn flush(&mut self, _txn: &mut TransactionMut<'_>) {}
}

/// Initialize an empty native collection on a surface block.
pub fn init_native_elements(surface: &MapRef, txn: &mut TransactionMut<'_>) -> MapRef {
    let wrapper: MapRef = surface.insert(txn, ELEMENTS_FIELD, MapPrelim::default());
    wrapper.insert(txn, "type", Any::String(NATIVE_ELEMENTS_TYPE.into()));
    wrapper.insert(txn, "value", MapPrelim::default())
}

/// Whether a wrapper's type tag names the element collection.
///
/// Untagged snapshots are accepted as plain collections.
fn is_elements_tag(tag: Option<&Any>) -> bool {
    match tag {
        None => true,
        Some(Any::String(tag)) => &**tag == NATIVE_ELEMENTS_TYPE,
        Some(_) => false,
    }
}

fn wrapper_tag(wrapper: &MapRef, txn: &TransactionMut<'_>) -> Option<Any> {
    match wrapper.get(txn, "type")? {
        Out::Any(tag) => Some(tag),
        _ => Some(Any::Null),
    }
}

/// Open the element collection of `surface`.
///
/// A missing collection is created in the native encoding when `create` is
/// set; otherwise `None` is returned and nothing is written. A wrapper
/// tagged with a foreign type also yields `None`.
pub fn open_store(
    surface: &MapRef,
    txn: &mut TransactionMut<'_>,
    create: bool,
) -> Option<Box<dyn ElementStore>> {
    match surface.get(&*txn, ELEMENTS_FIELD) {
        Some(Out::YMap(wrapper)) if !is_elements_tag(wrapper_tag(&wrapper, &*txn).as_ref()) => {
            log::warn!("[Canvas] Element wrapper has a foreign type tag");
            None
        }
        Some(Out::Any(Any::Map(wrapper))) if !is_elements_tag(wrapper.get("type")) => {
            log::warn!("[Canvas] Element snapshot has a foreign type tag");
            None
        }
        Some(Out::YMap(wrapper)) => match wrapper.get(&*txn, "value") {
            Some(Out::YMap(value)) => Some(Box::new(NativeStore { value })),
            Some(Out::Any(Any::Map(value))) => Some(Box::new(PlainStore::new(
                PlainTarget::Wrapper(wrapper),
                &value,
            ))),
            _ if create => {
                let value: MapRef = wrapper.insert(txn, "value", MapPrelim::default());
                Some(Box::new(NativeStore { value }))
            }
            _ => None,
        },
        Some(Out::Any(Any::Map(wrapper))) => {
            let value = match wrapper.get("value") {
                Some(Any::Map(value)) => value.clone(),
                _ => Arc::new(HashMap::new()),
            };
            Some(Box::new(PlainStore::new(
                PlainTarget::Surface(surface.clone()),
                &value,
            )))
        }
        _ if create => Some(Box::new(NativeStore {
            value: init_native_elements(surface, txn),
        })),
        _ => None,
    }
}

/// Shared map of shared maps.
struct NativeStore {
    value: MapRef,
}

impl ElementStore for NativeStore {
    fn encoding(&self) -> Encoding {
        Encoding::Native
    }

    fn entries(&self, txn: &TransactionMut<'_>) -> Vec<(String, Record)> {
        let mut entries: Vec<(String, Record)> = self
            .value
            .iter(txn)
            .filter_map(|(key, value)| match out_to_json(&value, txn) {
                Value::Object(record) => Some((key.to_string(), record)),
                _ => None,
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn get(&self, txn: &TransactionMut<'_>, id: &str) -> Option<Record> {
        match self.value.get(txn, id)? {
            Out::YMap(element) => Some(map_to_json(&element, txn)),
            Out::Any(any) => match any_to_json(&any) {
                Value::Object(record) => Some(record),
                _ => None,
            },
            _ => None,
        }
    }

    fn set(&mut self, txn: &mut TransactionMut<'_>, id: &str, record: &Record) {
        let element = match self.value.get(&*txn, id) {
            Some(Out::YMap(element)) => element,
            _ => self.value.insert(txn, id, MapPrelim::default()),
        };
        let current = map_to_json(&element, &*txn);

        for key in current.keys().filter(|k| !record.contains_key(*k)) {
            element.remove(txn, key);
        }
        for (key, value) in record {
            if current.get(key) == Some(value) {
                continue;
            }
            match value {
                Value::String(text) if TEXT_FIELDS.contains(&key.as_str()) => {
                    element.insert(txn, key.as_str(), TextPrelim::new(text.as_str()));
                }
                _ => {
                    element.insert(txn, key.as_str(), json_to_any(value));
                }
            }
        }
    }

    fn delete(&mut self, txn: &mut TransactionMut<'_>, id: &str) -> bool {
        self.value.remove(txn, id).is_some()
    }
}

/// Where a plain snapshot is written back.
enum PlainTarget {
    /// Shared wrapper map with a plain `value`
    Wrapper(MapRef),
    /// Plain wrapper stored directly on the surface block
    Surface(MapRef),
}

/// Plain JSON snapshot, buffered and written back on flush.
struct PlainStore {
    target: PlainTarget,
    elements: BTreeMap<String, Record>,
    dirty: bool,
}

impl PlainStore {
    fn new(target: PlainTarget, value: &HashMap<String, Any>) -> Self {
        let elements = value
            .iter()
            .filter_map(|(key, any)| match any_to_json(any) {
                Value::Object(record) => Some((key.clone(), record)),
                _ => None,
            })
            .collect();
        Self {
            target,
            elements,
            dirty: false,
        }
    }

    fn snapshot(&self) -> Any {
        let value: HashMap<String, Any> = self
            .elements
            .iter()
            .map(|(key, record)| (key.clone(), json_to_any(&Value::Object(record.clone()))))
            .collect();
        Any::Map(Arc::new(value))
    }
}

impl ElementStore for PlainStore {
    fn encoding(&self) -> Encoding {
        Encoding::Plain
    }

    fn entries(&self, _txn: &TransactionMut<'_>) -> Vec<(String, Record)> {
        self.elements
            .iter()
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect()
    }

    fn get(&self, _txn: &TransactionMut<'_>, id: &str) -> Option<Record> {
        self.elements.get(id).cloned()
    }

    fn set(&mut self, _txn: &mut TransactionMut<'_>, id: &str, record: &Record) {
        self.elements.insert(id.to_string(), record.clone());
        self.dirty = true;
    }

    fn delete(&mut self, _txn: &mut TransactionMut<'_>, id: &str) -> bool {
        let removed = self.elements.remove(id).is_some();
        self.dirty |= removed;
        removed
    }

    fn flush(&mut self, txn: &mut TransactionMut<'_>) {
        if !self.dirty {
            return;
        }
        let value = self.snapshot();
        match &self.target {
            PlainTarget::Wrapper(wrapper) => {
                wrapper.insert(txn, "value", value);
            }
            PlainTarget::Surface(surface) => {
                let wrapper = HashMap::from([
                    ("type".to_string(), Any::String(NATIVE_ELEMENTS_TYPE.into())),
                    ("value".to_string(), value),
                ]);
                surface.insert(txn, ELEMENTS_FIELD, Any::Map(Arc::new(wrapper)));
            }
        }
        self.dirty = false;
    }
}
