//! Editor state snapshots.
//!
//! A [`Slide`] is opaque to the sync layer beyond its `id`: every other
//! field is carried as JSON and flattened next to the id on the wire, so a
//! renderer sees `{"id": "...", "type": "text", ...}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Slide fields that only describe the editing surface (drag state,
/// selection flags, cached thumbnails). They never reach a renderer's
/// output, so change detection ignores them.
pub const TRANSIENT_FIELDS: &[&str] = &[
    "isDragging",
    "dragState",
    "isSelected",
    "selected",
    "isEditing",
    "thumbnail",
    "thumbnailUrl",
];

fn is_transient(key: &str) -> bool {
    TRANSIENT_FIELDS.contains(&key)
}

/// A single slide: stable identity plus arbitrary content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    pub id: String,
    #[serde(flatten)]
    pub content: Map<String, Value>,
}

impl Slide {
    /// Create a slide with a fresh random id.
    pub fn new(content: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content,
        }
    }

    /// Create with an explicit id (for testing and for restoring drafts).
    pub fn with_id(id: impl Into<String>, content: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            content,
        }
    }

    /// Builder-style field setter.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.content.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.content.get(key)
    }

    /// Content with the transient editor-only fields removed.
    pub fn normalized_content(&self) -> Map<String, Value> {
        self.content
            .iter()
            .filter(|(k, _)| !is_transient(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Deep content comparison ignoring transient fields.
    ///
    /// Key order is irrelevant; nested values are compared structurally.
    pub fn same_content(&self, other: &Slide) -> bool {
        let persistent = |m: &Map<String, Value>| m.keys().filter(|k| !is_transient(k)).count();
        if persistent(&self.content) != persistent(&other.content) {
            return false;
        }
        self.content
            .iter()
            .filter(|(k, _)| !is_transient(k))
            .all(|(k, v)| other.content.get(k) == Some(v))
    }
}

/// Snapshot of the authoring surface: ordered slides plus the slide the
/// user is currently looking at.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorState {
    pub slides: Vec<Slide>,
    pub active_index: Option<usize>,
}

impl EditorState {
    pub fn new(slides: Vec<Slide>, active_index: Option<usize>) -> Self {
        Self {
            slides,
            active_index,
        }
    }

    /// Same slides, different active slide.
    pub fn with_active_index(&self, active_index: Option<usize>) -> Self {
        Self {
            slides: self.slides.clone(),
            active_index,
        }
    }

    pub fn active_slide(&self) -> Option<&Slide> {
        self.active_index.and_then(|i| self.slides.get(i))
    }

    /// Serialized character count of the slide sequence.
    ///
    /// This is the "content volume" the memory estimator charges for.
    pub fn content_char_count(&self) -> usize {
        serde_json::to_string(&self.slides)
            .map(|s| s.chars().count())
            .unwrap_or(0)
    }
}
