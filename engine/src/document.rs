use serde::{Serialize, Deserialize};
use uuid::Uuid;
use crate::types::{LayerId, FolderId, Unit};
use crate::layer::Layer;

/// Grouping overlay. Holds layer ids only; render order stays with the
/// document's layer list.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    pub is_open: bool,
    pub is_locked: bool,
    pub layer_ids: Vec<LayerId>,
}

impl Folder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), name: name.into(), is_open: true, is_locked: false, layer_ids: Vec::new() }
    }
}

/// Layers are stored bottom to top.
#[derive(Clone, Debug)]
pub struct Document {
    pub width: u32,
    pub height: u32,
    pub dpi: f64,
    pub unit: Unit,
    pub layers: Vec<Layer>,
    pub folders: Vec<Folder>,
}

impl Document {
    pub fn new(width: u32, height: u32, dpi: f64, unit: Unit) -> Self {
        Self { width, height, dpi, unit, layers: Vec::new(), folders: Vec::new() }
    }

    pub fn center(&self) -> kurbo::Point {
        kurbo::Point::new(self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn folder(&self, id: FolderId) -> Option<&Folder> {
        self.folders.iter().find(|f| f.id == id)
    }

    pub fn folder_mut(&mut self, id: FolderId) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.id == id)
    }

    /// Removes the layer from whatever folder holds it.
    pub fn detach_layer(&mut self, layer_id: LayerId) {
        for folder in &mut self.folders {
            folder.layer_ids.retain(|id| *id != layer_id);
        }
        if let Some(layer) = self.layer_mut(layer_id) {
            layer.folder_id = None;
        }
    }

    /// Moves the layer into `folder_id`, leaving any previous folder.
    pub fn attach_layer(&mut self, layer_id: LayerId, folder_id: FolderId) -> bool {
        if self.layer(layer_id).is_none() || self.folder(folder_id).is_none() {
            return false;
        }
        self.detach_layer(layer_id);
        if let Some(folder) = self.folder_mut(folder_id) {
            folder.layer_ids.push(layer_id);
        }
        if let Some(layer) = self.layer_mut(layer_id) {
            layer.folder_id = Some(folder_id);
        }
        true
    }

    /// Drops folder entries that point at missing layers and re-derives each
    /// layer's folder back-reference.
    pub fn sync_folders(&mut self) {
        let existing: Vec<LayerId> = self.layers.iter().map(|l| l.id).collect();
        let mut seen = Vec::new();
        for folder in &mut self.folders {
            folder.layer_ids.retain(|id| existing.contains(id) && !seen.contains(id));
            seen.extend(folder.layer_ids.iter().copied());
        }
        for layer in &mut self.layers {
            layer.folder_id = self.folders.iter().find(|f| f.layer_ids.contains(&layer.id)).map(|f| f.id);
        }
    }
}
