//! Block schema constants and the block list shape supplied by parsers.

use serde::{Deserialize, Serialize};

/// Root map holding document metadata.
pub const META_MAP: &str = "meta";

/// Root map holding every block, keyed by block id.
pub const BLOCKS_MAP: &str = "blocks";

pub const SYS_ID: &str = "sys:id";
pub const SYS_FLAVOUR: &str = "sys:flavour";
pub const SYS_VERSION: &str = "sys:version";
pub const SYS_PARENT: &str = "sys:parent";
pub const SYS_CHILDREN: &str = "sys:children";

/// Block type tags.
pub mod flavour {
    pub const PAGE: &str = "affine:page";
    pub const SURFACE: &str = "affine:surface";
    pub const NOTE: &str = "affine:note";
    pub const PARAGRAPH: &str = "affine:paragraph";
    pub const LIST: &str = "affine:list";
    pub const CODE: &str = "affine:code";
    pub const DIVIDER: &str = "affine:divider";
    pub const TABLE: &str = "affine:table";
    pub const IMAGE: &str = "affine:image";
    pub const BOOKMARK: &str = "affine:bookmark";
}

/// Schema version written for each flavour.
pub fn flavour_version(flavour: &str) -> f64 {
    match flavour {
        flavour::PAGE => 2.0,
        flavour::SURFACE => 5.0,
        _ => 1.0,
    }
}

/// One span of text with formatting marks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextRun {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strike: bool,
    pub code: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl TextRun {
    /// An unformatted run.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn is_plain(&self) -> bool {
        !(self.bold || self.italic || self.underline || self.strike || self.code)
            && self.link.is_none()
    }
}

/// Concatenated text of a run list.
pub fn plain_text(runs: &[TextRun]) -> String {
    runs.iter().map(|r| r.text.as_str()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStyle {
    Bulleted,
    Numbered,
    Todo,
}

impl ListStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bulleted => "bulleted",
            Self::Numbered => "numbered",
            Self::Todo => "todo",
        }
    }
}

/// A normalized content block, independent of the source format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockSpec {
    Paragraph {
        runs: Vec<TextRun>,
    },
    Heading {
        level: u8,
        runs: Vec<TextRun>,
    },
    Quote {
        runs: Vec<TextRun>,
    },
    List {
        style: ListStyle,
        #[serde(default)]
        checked: bool,
        runs: Vec<TextRun>,
        #[serde(default)]
        children: Vec<BlockSpec>,
    },
    Code {
        #[serde(default)]
        language: Option<String>,
        text: String,
    },
    Divider,
    Table {
        rows: Vec<Vec<String>>,
    },
    Image {
        source_id: String,
        #[serde(default)]
        caption: Option<String>,
    },
    Bookmark {
        url: String,
    },
}

impl BlockSpec {
    /// A plain paragraph.
    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::Paragraph {
            runs: vec![TextRun::plain(text)],
        }
    }

    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self::Heading {
            level,
            runs: vec![TextRun::plain(text)],
        }
    }

    pub fn list_item(style: ListStyle, text: impl Into<String>) -> Self {
        Self::List {
            style,
            checked: false,
            runs: vec![TextRun::plain(text)],
            children: Vec::new(),
        }
    }

    pub fn flavour(&self) -> &'static str {
        match self {
            Self::Paragraph { .. } | Self::Heading { .. } | Self::Quote { .. } => {
                flavour::PARAGRAPH
            }
            Self::List { .. } => flavour::LIST,
            Self::Code { .. } => flavour::CODE,
            Self::Divider => flavour::DIVIDER,
            Self::Table { .. } => flavour::TABLE,
            Self::Image { .. } => flavour::IMAGE,
            Self::Bookmark { .. } => flavour::BOOKMARK,
        }
    }
}

/// What a new or replaced document is populated from.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ContentSource {
    /// A single empty paragraph
    #[default]
    Empty,
    /// Plain text, one paragraph per line
    Text(String),
    /// A pre-parsed block list
    Blocks(Vec<BlockSpec>),
}

impl ContentSource {
    /// The block list this source expands to. Never empty.
    pub fn to_blocks(&self) -> Vec<BlockSpec> {
        let blocks = match self {
            Self::Empty => Vec::new(),
            Self::Text(text) => text.lines().map(BlockSpec::paragraph).collect(),
            Self::Blocks(blocks) => blocks.clone(),
        };
        if blocks.is_empty() {
            vec![BlockSpec::paragraph("")]
        } else {
            blocks
        }
    }
}
