//! Canvas element types, geometry and per-type defaults.

use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value, json};

/// Element type tag. The freehand stroke is tagged `brush` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Shape,
    Connector,
    Text,
    Group,
    Mindmap,
    #[serde(rename = "brush", alias = "stroke")]
    Stroke,
}

impl ElementKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "shape" => Some(Self::Shape),
            "connector" => Some(Self::Connector),
            "text" => Some(Self::Text),
            "group" => Some(Self::Group),
            "mindmap" => Some(Self::Mindmap),
            "brush" | "stroke" => Some(Self::Stroke),
            _ => None,
        }
    }

    /// Tag written to the document.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shape => "shape",
            Self::Connector => "connector",
            Self::Text => "text",
            Self::Group => "group",
            Self::Mindmap => "mindmap",
            Self::Stroke => "brush",
        }
    }

    /// Default property bundle merged under every new element of this kind.
    pub fn defaults(&self) -> JsonMap<String, Value> {
        let value = match self {
            Self::Shape => json!({
                "shapeType": "rect",
                "radius": 0,
                "filled": true,
                "fillColor": "--affine-palette-shape-yellow",
                "strokeWidth": 2,
                "strokeColor": "--affine-palette-line-yellow",
                "strokeStyle": "solid",
                "shapeStyle": "General",
                "roughness": 1.4,
                "rotate": 0,
                "color": "--affine-palette-line-black",
                "fontFamily": "blocksuite:surface:Inter",
                "fontSize": 20,
                "fontWeight": "400",
                "fontStyle": "normal",
                "textAlign": "center",
                "textHorizontalAlign": "center",
                "textVerticalAlign": "center"
            }),
            Self::Connector => json!({
                "mode": 1,
                "stroke": "--affine-palette-line-grey",
                "strokeWidth": 2,
                "strokeStyle": "solid",
                "roughness": 1.4,
                "rough": false,
                "source": {},
                "target": {},
                "frontEndpointStyle": "None",
                "rearEndpointStyle": "Arrow",
                "rotate": 0
            }),
            Self::Text => json!({
                "text": "",
                "color": "--affine-palette-line-black",
                "fontFamily": "blocksuite:surface:Inter",
                "fontSize": 24,
                "fontWeight": "400",
                "fontStyle": "normal",
                "textAlign": "left",
                "hasMaxWidth": false,
                "rotate": 0
            }),
            Self::Group => json!({
                "children": {},
                "title": "Group"
            }),
            Self::Mindmap => json!({
                "children": {},
                "layoutType": 0,
                "style": 4
            }),
            Self::Stroke => json!({
                "points": [],
                "color": "--affine-palette-line-black",
                "lineWidth": 4,
                "rotate": 0
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => JsonMap::new(),
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element bounds. Stored as the string `"[x,y,w,h]"`, exposed as a 4-tuple.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Xywh {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Xywh {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Parse the stored string form.
    pub fn parse(encoded: &str) -> Option<Self> {
        let [x, y, w, h] = serde_json::from_str::<[f64; 4]>(encoded).ok()?;
        Some(Self { x, y, w, h })
    }

    /// Read either the string form or the array form.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(encoded) => Self::parse(encoded),
            Value::Array(_) => {
                let [x, y, w, h] = serde_json::from_value::<[f64; 4]>(value.clone()).ok()?;
                Some(Self { x, y, w, h })
            }
            _ => None,
        }
    }

    /// The stored string form.
    pub fn encode(&self) -> String {
        format!("[{},{},{},{}]", self.x, self.y, self.w, self.h)
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x, self.y, self.w, self.h]
    }
}

impl Serialize for Xywh {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        for n in self.to_array() {
            seq.serialize_element(&n)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Xywh {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid xywh: {}", value)))
    }
}

/// A canvas element as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xywh: Option<Xywh>,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub seed: u32,
    /// Every other stored field
    #[serde(flatten)]
    pub props: JsonMap<String, Value>,
}

impl CanvasElement {
    /// Decode a stored record. `None` for unknown element types.
    pub fn from_record(key: &str, record: &JsonMap<String, Value>) -> Option<Self> {
        let kind = record
            .get("type")
            .and_then(Value::as_str)
            .and_then(ElementKind::parse)?;

        let mut props = record.clone();
        for field in ["id", "type", "xywh", "index", "seed"] {
            props.remove(field);
        }

        Some(Self {
            id: record
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(key)
                .to_string(),
            kind,
            xywh: record.get("xywh").and_then(Xywh::from_value),
            index: record
                .get("index")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            seed: record
                .get("seed")
                .and_then(Value::as_f64)
                .map(|n| n as u32)
                .unwrap_or_default(),
            props,
        })
    }
}

/// A partial element handed to `create`. Only `type` is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementDraft {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xywh: Option<Xywh>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    #[serde(flatten)]
    pub props: JsonMap<String, Value>,
}

impl ElementDraft {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_xywh(mut self, x: f64, y: f64, w: f64, h: f64) -> Self {
        self.xywh = Some(Xywh::new(x, y, w, h));
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xywh_string_form() {
        let xywh = Xywh::new(10.0, 20.5, 100.0, 50.0);
        assert_eq!(xywh.encode(), "[10,20.5,100,50]");
        assert_eq!(Xywh::parse(&xywh.encode()), Some(xywh));
        assert_eq!(Xywh::parse("[1,2,3]"), None);
        assert_eq!(Xywh::parse("garbage"), None);
    }

    #[test]
    fn test_xywh_deserializes_from_both_forms() {
        let from_array: Xywh = serde_json::from_value(json!([1, 2, 3, 4])).unwrap();
        let from_string: Xywh = serde_json::from_value(json!("[1,2,3,4]")).unwrap();
        assert_eq!(from_array, from_string);
        assert_eq!(serde_json::to_value(from_array).unwrap(), json!([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_stroke_is_tagged_brush() {
        assert_eq!(ElementKind::parse("stroke"), Some(ElementKind::Stroke));
        assert_eq!(ElementKind::Stroke.as_str(), "brush");
        let kind: ElementKind = serde_json::from_value(json!("stroke")).unwrap();
        assert_eq!(kind, ElementKind::Stroke);
        assert_eq!(ElementKind::parse("sticker"), None);
    }

    #[test]
    fn test_every_kind_has_defaults() {
        for kind in [
            ElementKind::Shape,
            ElementKind::Connector,
            ElementKind::Text,
            ElementKind::Group,
            ElementKind::Mindmap,
            ElementKind::Stroke,
        ] {
            assert!(!kind.defaults().is_empty(), "{} has no defaults", kind);
        }
    }

    #[test]
    fn test_record_decoding() {
        let record = json!({
            "id": "e1",
            "type": "shape",
            "xywh": "[0,0,10,10]",
            "index": "a3",
            "seed": 77,
            "fillColor": "red"
        });
        let Value::Object(record) = record else {
            unreachable!()
        };
        let element = CanvasElement::from_record("key", &record).unwrap();
        assert_eq!(element.id, "e1");
        assert_eq!(element.kind, ElementKind::Shape);
        assert_eq!(element.xywh, Some(Xywh::new(0.0, 0.0, 10.0, 10.0)));
        assert_eq!(element.seed, 77);
        assert_eq!(element.props.get("fillColor"), Some(&json!("red")));
        assert!(!element.props.contains_key("index"));
    }

    #[test]
    fn test_draft_from_json() {
        let draft: ElementDraft = serde_json::from_value(json!({
            "type": "text",
            "xywh": [5, 5, 50, 20],
            "text": "hi"
        }))
        .unwrap();
        assert_eq!(draft.kind, "text");
        assert_eq!(draft.xywh, Some(Xywh::new(5.0, 5.0, 50.0, 20.0)));
        assert_eq!(draft.props.get("text"), Some(&json!("hi")));
    }
}
