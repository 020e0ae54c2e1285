use serde::{Serialize, Deserialize};
use image::RgbaImage;
use std::collections::HashMap;
use crate::types::{LayerId, LayerKind, Transform, Adjustments, LayerMetadata, Unit, Viewport};
use crate::document::Folder;

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        general_purpose::STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Owned copy of a raster surface. Serialized as base64 RGBA.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct RasterData {
    pub width: u32,
    pub height: u32,
    #[serde(with = "base64_bytes")]
    pub rgba: Vec<u8>,
}

impl RasterData {
    pub fn from_image(image: &RgbaImage) -> Self {
        Self { width: image.width(), height: image.height(), rgba: image.as_raw().clone() }
    }

    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapshotContent {
    Raster(RasterData),
    Vector { path_data: String, stroke_width: f64 },
}

/// Full value copy of one layer. Version counters and folder membership are
/// not part of it.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct LayerSnapshot {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub opacity: f64,
    pub transform: Transform,
    pub adjustments: Adjustments,
    pub metadata: LayerMetadata,
    pub content: SnapshotContent,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct DocumentSnapshot {
    pub width: u32,
    pub height: u32,
    pub dpi: f64,
    pub unit: Unit,
    pub layers: Vec<LayerSnapshot>,
    pub folders: Vec<Folder>,
    pub viewport: Viewport,
    pub selected_layer_id: Option<LayerId>,
}

impl DocumentSnapshot {
    /// Equality ignoring workspace view state (viewport, selected layer).
    pub fn same_document(&self, other: &DocumentSnapshot) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.dpi == other.dpi
            && self.unit == other.unit
            && self.layers == other.layers
            && self.folders == other.folders
    }
}

#[derive(Clone, Debug)]
pub struct HistoryEntry<S> {
    pub snapshot: S,
    pub label: String,
}

/// Linear undo list. The entry under the cursor mirrors the live state;
/// appending after an undo drops everything past the cursor.
#[derive(Clone, Debug)]
pub struct HistoryStack<S> {
    entries: Vec<HistoryEntry<S>>,
    cursor: usize,
    limit: usize,
}

impl<S: Clone + PartialEq> HistoryStack<S> {
    pub fn new(limit: usize) -> Self {
        Self { entries: Vec::new(), cursor: 0, limit: limit.max(1) }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        if self.entries.is_empty() { None } else { Some(self.cursor) }
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.label.clone()).collect()
    }

    pub fn current(&self) -> Option<&S> {
        self.entries.get(self.cursor).map(|e| &e.snapshot)
    }

    pub fn current_mut(&mut self) -> Option<&mut S> {
        self.entries.get_mut(self.cursor).map(|e| &mut e.snapshot)
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty() && self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        self.enforce_limit();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Appends unconditionally and moves the cursor to the new tail.
    pub fn push(&mut self, snapshot: S, label: &str) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push(HistoryEntry { snapshot, label: label.to_string() });
        self.cursor = self.entries.len() - 1;
        self.enforce_limit();
    }

    /// Commits a `pre -> post` transition. Returns false and leaves the
    /// stack untouched when nothing changed. If the entry under the cursor
    /// does not match `pre`, `pre` is recorded first so the edit can be
    /// undone.
    pub fn record(&mut self, pre: S, post: S, label: &str) -> bool {
        if pre == post {
            return false;
        }
        if self.current() != Some(&pre) {
            self.push(pre, &format!("Before {}", label));
        }
        self.push(post, label);
        true
    }

    pub fn undo(&mut self) -> Option<&S> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        self.current()
    }

    pub fn redo(&mut self) -> Option<&S> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        self.current()
    }

    pub fn revert_to(&mut self, index: usize) -> Option<&S> {
        if index >= self.entries.len() {
            return None;
        }
        self.cursor = index;
        self.current()
    }

    fn enforce_limit(&mut self) {
        while self.entries.len() > self.limit {
            self.entries.remove(0);
            self.cursor = self.cursor.saturating_sub(1);
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct HistoryInfo {
    pub labels: Vec<String>,
    pub cursor: Option<usize>,
}

impl<S: Clone + PartialEq> From<&HistoryStack<S>> for HistoryInfo {
    fn from(stack: &HistoryStack<S>) -> Self {
        Self { labels: stack.labels(), cursor: stack.cursor() }
    }
}

/// One history stack per layer, created lazily.
#[derive(Clone, Debug)]
pub struct LayerHistory {
    stacks: HashMap<LayerId, HistoryStack<LayerSnapshot>>,
    limit: usize,
}

impl LayerHistory {
    pub fn new(limit: usize) -> Self {
        Self { stacks: HashMap::new(), limit }
    }

    pub fn stack(&self, id: LayerId) -> Option<&HistoryStack<LayerSnapshot>> {
        self.stacks.get(&id)
    }

    pub fn stack_mut(&mut self, id: LayerId) -> &mut HistoryStack<LayerSnapshot> {
        let limit = self.limit;
        self.stacks.entry(id).or_insert_with(|| HistoryStack::new(limit))
    }

    pub fn remove(&mut self, id: LayerId) {
        self.stacks.remove(&id);
    }

    pub fn clear(&mut self) {
        self.stacks.clear();
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        for stack in self.stacks.values_mut() {
            stack.set_limit(limit);
        }
    }
}
