use serde::Deserialize;
use image::{Rgba, RgbaImage};
use kurbo::{Point, Rect};
use crate::engine::CanvasEngine;
use crate::document::{Document, Folder};
use crate::error::{EngineError, EngineResult};
use crate::io::{self, DecodedImage, ExportFormat};
use crate::layer::{Layer, LayerContent, RasterContent};
use crate::path;
use crate::render::{composite_visible, draw_layer_onto, render_layer_export, stroke_path};
use crate::types::{AdjustmentsUpdate, FlipAxis, FolderId, LayerId, LayerKind, LayerMetadata, Transform, Unit, Viewport};

pub const DEFAULT_BACKGROUND_NAME: &str = "Background";
pub const DRAWING_LAYER_NAME: &str = "Drawing Layer";
pub const DEFAULT_FOLDER_NAME: &str = "New Folder";
pub const DUPLICATE_OFFSET: f64 = 20.0;
/// Supersampling used when a vector layer is turned into pixels.
pub const RASTERIZE_SCALE: f64 = 2.0;

fn one() -> f64 {
    1.0
}

/// Where a new layer lands in the world.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerPlacement {
    #[default]
    DocumentCenter,
    At {
        x: f64,
        y: f64,
        #[serde(default = "one")]
        scale: f64,
    },
    /// Use the transform already set on the layer.
    Keep,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LayerOrder {
    Forward,
    Backward,
    ToIndex(usize),
}

/// Fields shared by every layer kind. Absent fields are left unchanged.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct LayerPropertiesUpdate {
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub opacity: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub scale: Option<f64>,
    pub rotation: Option<f64>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VectorPropertiesUpdate {
    #[serde(flatten)]
    pub common: LayerPropertiesUpdate,
    #[serde(default)]
    pub path_data: Option<String>,
    #[serde(default)]
    pub stroke_width: Option<f64>,
}

/// Partial layer update, tagged by the kind of layer it targets.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerUpdate {
    Raster(LayerPropertiesUpdate),
    Vector(VectorPropertiesUpdate),
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct BlankCanvasSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub unit: Unit,
    pub dpi: f64,
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|v| v.is_finite())
}

fn apply_common(layer: &mut Layer, update: &LayerPropertiesUpdate) {
    if let Some(name) = update.name.as_ref().filter(|n| !n.trim().is_empty()) {
        layer.name = name.clone();
    }
    if let Some(visible) = update.visible {
        layer.visible = visible;
    }
    if let Some(opacity) = finite(update.opacity) {
        layer.opacity = opacity.clamp(0.0, 1.0);
    }
    if let Some(x) = finite(update.x) {
        layer.transform.x = x;
    }
    if let Some(y) = finite(update.y) {
        layer.transform.y = y;
    }
    if let Some(scale) = finite(update.scale) {
        layer.transform.scale = scale.max(0.01);
    }
    if let Some(rotation) = finite(update.rotation) {
        layer.transform.rotation = rotation;
    }
}

/// Bounding box of the pixels with non-zero alpha.
fn opaque_bounds(surface: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, px) in surface.enumerate_pixels() {
        if px[3] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    bounds
}

impl CanvasEngine {
    /// Places and inserts a layer without a global history entry. Seeds its
    /// per-layer history and selects it.
    pub(crate) fn insert_layer(&mut self, mut layer: Layer, placement: LayerPlacement, index: Option<usize>) -> LayerId {
        match placement {
            LayerPlacement::DocumentCenter => {
                let center = self.document.center();
                layer.transform.x = center.x;
                layer.transform.y = center.y;
            }
            LayerPlacement::At { x, y, scale } => {
                layer.transform.x = x;
                layer.transform.y = y;
                layer.transform.scale = if scale.is_finite() { scale.max(0.01) } else { 1.0 };
            }
            LayerPlacement::Keep => {}
        }
        let id = layer.id;
        let snapshot = layer.snapshot();
        log::info!("adding layer {} ({:?}, {}x{})", layer.name, layer.kind, layer.metadata.original_width, layer.metadata.original_height);
        match index {
            Some(i) if i <= self.document.layers.len() => self.document.layers.insert(i, layer),
            _ => self.document.layers.push(layer),
        }
        self.layer_history.stack_mut(id).push(snapshot, "Created");
        self.select_layer(Some(id));
        id
    }

    pub(crate) fn add_layer(&mut self, layer: Layer, placement: LayerPlacement, label: &str) -> LayerId {
        let pre = self.document_snapshot();
        let id = self.insert_layer(layer, placement, None);
        self.commit_global(pre, label);
        id
    }

    /// Creates a layer on top of the stack, selects it and frames it in the
    /// view once the canvas size is known.
    pub fn create_layer(
        &mut self,
        name: &str,
        kind: LayerKind,
        content: LayerContent,
        metadata: LayerMetadata,
        placement: LayerPlacement,
    ) -> LayerId {
        let layer = Layer::new(name, kind, content, metadata);
        let id = self.add_layer(layer, placement, &format!("Add Layer: {}", name));
        self.frame_layer(id);
        id
    }

    /// Removes a layer with its history and folder membership, moving the
    /// selection to the layer now at the same index. No history entry.
    fn remove_layer_internal(&mut self, id: LayerId) -> Option<(usize, Layer)> {
        let index = self.document.index_of(id)?;
        if self.vector_edit.as_ref().map(|s| s.layer_id == id).unwrap_or(false) {
            self.exit_vector_edit();
        }
        if self.gesture.as_ref().map(|g| g.id == id).unwrap_or(false) {
            self.gesture = None;
        }
        if self.selection.magic_wand.as_ref().map(|w| w.source_layer == id).unwrap_or(false) {
            self.selection.clear();
        }
        self.document.detach_layer(id);
        let layer = self.document.layers.remove(index);
        self.layer_history.remove(id);
        if self.selected_layer_id == Some(id) {
            let layers = &self.document.layers;
            self.selected_layer_id = if layers.is_empty() { None } else { Some(layers[index.min(layers.len() - 1)].id) };
        }
        Some((index, layer))
    }

    pub fn delete_layer(&mut self, id: LayerId) -> bool {
        let pre = self.document_snapshot();
        match self.remove_layer_internal(id) {
            Some((_, layer)) => {
                log::info!("deleted layer {}", layer.name);
                self.commit_global(pre, &format!("Delete Layer: {}", layer.name));
                true
            }
            None => false,
        }
    }

    /// Applies a typed partial update. Updates whose kind does not match the
    /// layer are rejected. No history entry; wrap in a gesture to record.
    pub fn update_layer_properties(&mut self, id: LayerId, update: &LayerUpdate) -> bool {
        let layer = match self.document.layer_mut(id) {
            Some(l) => l,
            None => return false,
        };
        match (update, matches!(layer.content, LayerContent::Raster(_))) {
            (LayerUpdate::Raster(common), true) => apply_common(layer, common),
            (LayerUpdate::Vector(v), false) => {
                apply_common(layer, &v.common);
                if let Some(content) = layer.vector_content_mut() {
                    if let Some(d) = &v.path_data {
                        content.path_data = d.clone();
                    }
                    if let Some(w) = finite(v.stroke_width) {
                        content.stroke_width = w.max(0.0);
                    }
                }
            }
            _ => {
                log::warn!("rejected update for layer {}: kind mismatch", id);
                return false;
            }
        }
        layer.version += 1;
        true
    }

    pub fn update_layer_adjustments(&mut self, id: LayerId, update: &AdjustmentsUpdate) -> bool {
        let pre = match self.layer_snapshot(id) {
            Some(pre) => pre,
            None => return false,
        };
        if let Some(layer) = self.document.layer_mut(id) {
            update.apply_to(&mut layer.adjustments);
            layer.version += 1;
        }
        self.finish_layer_edit(pre, "Adjustments");
        true
    }

    /// Toggles the flip flag of the selected layer.
    pub fn flip_layer(&mut self, axis: FlipAxis) -> bool {
        let (id, adj) = match self.selected_layer() {
            Some(l) => (l.id, l.adjustments),
            None => return false,
        };
        let update = match axis {
            FlipAxis::Horizontal => AdjustmentsUpdate { flip_h: Some(!adj.flip_h), ..Default::default() },
            FlipAxis::Vertical => AdjustmentsUpdate { flip_v: Some(!adj.flip_v), ..Default::default() },
        };
        self.update_layer_adjustments(id, &update)
    }

    /// Rotates the selected layer by `degrees`.
    pub fn rotate_layer(&mut self, degrees: f64) -> bool {
        let id = match self.selected_layer_id {
            Some(id) if degrees.is_finite() => id,
            _ => return false,
        };
        let pre = match self.layer_snapshot(id) {
            Some(pre) => pre,
            None => return false,
        };
        if let Some(layer) = self.document.layer_mut(id) {
            layer.transform.rotation += degrees.to_radians();
            layer.version += 1;
        }
        self.finish_layer_edit(pre, &format!("Rotate {}°", degrees));
        true
    }

    pub fn reorder(&mut self, id: LayerId, order: LayerOrder) -> bool {
        let index = match self.document.index_of(id) {
            Some(i) => i,
            None => return false,
        };
        let last = self.document.layers.len() - 1;
        let target = match order {
            LayerOrder::Forward if index < last => index + 1,
            LayerOrder::Backward if index > 0 => index - 1,
            LayerOrder::ToIndex(i) => i.min(last),
            _ => return false,
        };
        if target == index {
            return false;
        }
        let pre = self.document_snapshot();
        let layer = self.document.layers.remove(index);
        self.document.layers.insert(target, layer);
        let label = match order {
            LayerOrder::Forward => "Bring Forward",
            LayerOrder::Backward => "Send Backward",
            LayerOrder::ToIndex(_) => "Move Layer",
        };
        self.commit_global(pre, label)
    }

    /// Copies a layer (pixels included) just above the source, offset by
    /// 20 px. The copy stays in the source's folder.
    pub fn duplicate_layer(&mut self, id: LayerId) -> Option<LayerId> {
        let pre = self.document_snapshot();
        let new_id = self.duplicate_layer_internal(id)?;
        self.commit_global(pre, "Duplicate Layer");
        Some(new_id)
    }

    fn duplicate_layer_internal(&mut self, id: LayerId) -> Option<LayerId> {
        let index = self.document.index_of(id)?;
        let source = &self.document.layers[index];
        let mut copy = source.clone();
        copy.id = uuid::Uuid::new_v4();
        copy.name = format!("{} copy", source.name);
        copy.transform.x += DUPLICATE_OFFSET;
        copy.transform.y += DUPLICATE_OFFSET;
        copy.version = 1;
        copy.folder_id = None;
        let folder = source.folder_id;
        let new_id = self.insert_layer(copy, LayerPlacement::Keep, Some(index + 1));
        if let Some(folder_id) = folder {
            self.document.attach_layer(new_id, folder_id);
        }
        Some(new_id)
    }

    /// Composites `top_id` into the raster layer directly below it. The
    /// result covers the union of both axis-aligned world boxes, with unit
    /// scale and no rotation.
    pub fn merge_down(&mut self, top_id: LayerId) -> bool {
        let index = match self.document.index_of(top_id) {
            Some(i) if i > 0 => i,
            _ => return false,
        };
        let (top, bottom) = (&self.document.layers[index], &self.document.layers[index - 1]);
        if top.surface().is_none() || bottom.surface().is_none() {
            return false;
        }
        let bottom_id = bottom.id;
        let pre = self.document_snapshot();
        let bottom_pre = bottom.snapshot();

        let bounds = top.world_bounds().union(bottom.world_bounds());
        let width = bounds.width().round().max(1.0) as u32;
        let height = bounds.height().round().max(1.0) as u32;
        let origin = Point::new(bounds.x0, bounds.y0);
        let mut merged = RgbaImage::new(width, height);
        draw_layer_onto(&mut merged, origin, bottom, 1.0);
        draw_layer_onto(&mut merged, origin, top, top.opacity);

        if let Some(bottom) = self.document.layer_mut(bottom_id) {
            bottom.content = LayerContent::Raster(RasterContent::new(merged));
            bottom.metadata.original_width = width as f64;
            bottom.metadata.original_height = height as f64;
            bottom.transform = Transform {
                x: bounds.x0 + width as f64 / 2.0,
                y: bounds.y0 + height as f64 / 2.0,
                scale: 1.0,
                rotation: 0.0,
            };
            bottom.touch();
        }
        self.commit_layer_edit(bottom_pre, "Merge Down");
        self.remove_layer_internal(top_id);
        self.select_layer(Some(bottom_id));
        log::info!("merged layer {} into {}", top_id, bottom_id);
        self.commit_global(pre, "Merge Down")
    }

    pub fn create_folder(&mut self, name: Option<&str>) -> FolderId {
        let pre = self.document_snapshot();
        let folder = Folder::new(name.filter(|n| !n.trim().is_empty()).unwrap_or(DEFAULT_FOLDER_NAME));
        let id = folder.id;
        self.document.folders.push(folder);
        self.commit_global(pre, "Create Folder");
        id
    }

    pub fn rename_folder(&mut self, id: FolderId, name: &str) -> bool {
        if name.trim().is_empty() {
            return false;
        }
        match self.document.folder_mut(id) {
            Some(folder) => {
                folder.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Deletes a folder; its layers stay in the document.
    pub fn delete_folder(&mut self, id: FolderId) -> bool {
        let index = match self.document.folders.iter().position(|f| f.id == id) {
            Some(i) => i,
            None => return false,
        };
        let pre = self.document_snapshot();
        self.document.folders.remove(index);
        self.document.sync_folders();
        self.commit_global(pre, "Delete Folder")
    }

    pub fn toggle_folder_lock(&mut self, id: FolderId) -> bool {
        match self.document.folder_mut(id) {
            Some(folder) => {
                folder.is_locked = !folder.is_locked;
                true
            }
            None => false,
        }
    }

    pub fn toggle_folder_open(&mut self, id: FolderId) -> bool {
        match self.document.folder_mut(id) {
            Some(folder) => {
                folder.is_open = !folder.is_open;
                true
            }
            None => false,
        }
    }

    /// Shows every member if fewer than half are visible, hides them all
    /// otherwise.
    pub fn toggle_folder_visibility(&mut self, id: FolderId) -> bool {
        let members = match self.document.folder(id) {
            Some(f) => f.layer_ids.clone(),
            None => return false,
        };
        let visible = members.iter().filter(|l| self.document.layer(**l).map(|l| l.visible).unwrap_or(false)).count();
        let show = (visible as f64) < members.len() as f64 / 2.0;
        let pre = self.document_snapshot();
        for layer_id in &members {
            if let Some(layer) = self.document.layer_mut(*layer_id) {
                if layer.visible != show {
                    layer.visible = show;
                    layer.version += 1;
                }
            }
        }
        self.commit_global(pre, if show { "Show Folder" } else { "Hide Folder" });
        true
    }

    /// Moves a layer into `folder`, or out of any folder with `None`.
    pub fn move_layer_to_folder(&mut self, layer_id: LayerId, folder: Option<FolderId>) -> bool {
        if self.document.layer(layer_id).is_none() {
            return false;
        }
        let pre = self.document_snapshot();
        let moved = match folder {
            Some(folder_id) => self.document.attach_layer(layer_id, folder_id),
            None => {
                self.document.detach_layer(layer_id);
                true
            }
        };
        if moved {
            self.commit_global(pre, "Move Layer to Folder");
        }
        moved
    }

    /// Copies a folder and every member layer. Copies keep the members'
    /// relative order, each sitting just above its source.
    pub fn duplicate_folder(&mut self, id: FolderId) -> Option<FolderId> {
        let source = self.document.folder(id)?.clone();
        let pre = self.document_snapshot();
        let mut folder = Folder::new(format!("{} copy", source.name));
        folder.is_open = source.is_open;
        let new_folder_id = folder.id;
        self.document.folders.push(folder);

        // Member order follows the layer stack, bottom to top.
        let mut members: Vec<(usize, LayerId)> = source
            .layer_ids
            .iter()
            .filter_map(|l| self.document.index_of(*l).map(|i| (i, *l)))
            .collect();
        members.sort_by_key(|(i, _)| *i);
        for (_, layer_id) in members {
            if let Some(copy) = self.duplicate_layer_internal(layer_id) {
                self.document.attach_layer(copy, new_folder_id);
            }
        }
        self.commit_global(pre, "Duplicate Folder");
        Some(new_folder_id)
    }

    /// Starts a new document with a single white background layer. Both
    /// histories are cleared.
    pub fn create_blank_canvas(&mut self, spec: &BlankCanvasSpec) -> LayerId {
        self.exit_vector_edit();
        self.gesture = None;
        self.selection.clear();
        let dpi = if spec.dpi.is_finite() && spec.dpi > 0.0 { spec.dpi } else { self.config.default_dpi };
        let width = spec.unit.to_pixels(spec.width, dpi);
        let height = spec.unit.to_pixels(spec.height, dpi);

        self.document = Document::new(width, height, dpi, spec.unit);
        self.layer_history.clear();
        self.global_history.clear();
        self.viewport = Viewport::default();
        self.selected_layer_id = None;

        let name = spec.name.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or(DEFAULT_BACKGROUND_NAME);
        let surface = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        let id = self.insert_layer(Layer::raster(name, LayerKind::Background, surface, dpi), LayerPlacement::DocumentCenter, None);
        let snapshot = self.document_snapshot();
        self.global_history.push(snapshot, "New Document");
        log::info!("new document {}x{} px at {} dpi", width, height, dpi);
        id
    }

    /// Transparent, document-sized drawing layer.
    pub fn create_drawing_layer(&mut self) -> LayerId {
        let surface = RgbaImage::new(self.document.width.max(1), self.document.height.max(1));
        let layer = Layer::raster(DRAWING_LAYER_NAME, LayerKind::Drawing, surface, self.document.dpi);
        self.add_layer(layer, LayerPlacement::DocumentCenter, "Add Drawing Layer")
    }

    pub fn add_image_layer(&mut self, name: &str, kind: LayerKind, decoded: DecodedImage, placement: LayerPlacement) -> LayerId {
        let metadata = LayerMetadata::new(decoded.dpi, decoded.original_width as f64, decoded.original_height as f64);
        let content = LayerContent::Raster(RasterContent::with_proxies(decoded.image, decoded.proxy, decoded.low_res_proxy));
        self.create_layer(name, kind, content, metadata, placement)
    }

    /// Decodes PNG/JPEG bytes into a new layer. Leaves the engine untouched
    /// on failure.
    pub fn import_image(&mut self, name: &str, kind: LayerKind, bytes: &[u8], placement: LayerPlacement) -> EngineResult<LayerId> {
        let decoded = io::decode_image(bytes).map_err(|e| {
            log::warn!("failed to import {}: {}", name, e);
            e
        })?;
        Ok(self.add_image_layer(name, kind, decoded, placement))
    }

    /// Crops a raster layer to its non-transparent pixels without moving
    /// them in the world. A fully transparent layer is deleted.
    pub fn trim_layer_to_content(&mut self, id: LayerId) -> bool {
        let layer = match self.document.layer(id) {
            Some(l) => l,
            None => return false,
        };
        let surface = match layer.surface() {
            Some(s) => s,
            None => return false,
        };
        let (x0, y0, x1, y1) = match opaque_bounds(surface) {
            Some(b) => b,
            None => return self.delete_layer(id),
        };
        let (tw, th) = (x1 - x0 + 1, y1 - y0 + 1);
        if (tw, th) == surface.dimensions() {
            return false;
        }
        let (w, h) = layer.local_size();
        let (sx, sy) = (surface.width() as f64 / w.max(f64::EPSILON), surface.height() as f64 / h.max(f64::EPSILON));
        let local_center = Point::new((x0 as f64 + tw as f64 / 2.0) / sx, (y0 as f64 + th as f64 / 2.0) / sy);
        let center = layer.local_to_world(local_center);
        let cropped = image::imageops::crop_imm(surface, x0, y0, tw, th).to_image();
        let pre = layer.snapshot();

        if let Some(layer) = self.document.layer_mut(id) {
            layer.content = LayerContent::Raster(RasterContent::new(cropped));
            layer.metadata.original_width = tw as f64 / sx;
            layer.metadata.original_height = th as f64 / sy;
            layer.transform.x = center.x;
            layer.transform.y = center.y;
            layer.touch();
        }
        self.commit_layer_edit(pre, "Trim Layer");
        true
    }

    /// Strokes a vector layer into a pattern layer at the same place in the
    /// stack and removes the vector layer.
    pub fn rasterize_vector_layer(&mut self, id: LayerId) -> Option<LayerId> {
        let index = self.document.index_of(id)?;
        let source = &self.document.layers[index];
        let vector = source.vector_content()?;
        let (w, h) = source.local_size();
        let points = path::parse(&vector.path_data);
        let surface = stroke_path(
            &points,
            (w * RASTERIZE_SCALE).round().max(1.0) as u32,
            (h * RASTERIZE_SCALE).round().max(1.0) as u32,
            RASTERIZE_SCALE,
            vector.stroke_width,
            self.config.primary_rgb(),
        );
        let mut layer = Layer::raster(format!("{} (Rasterized)", source.name), LayerKind::Pattern, surface, source.metadata.dpi);
        layer.transform = Transform { scale: source.transform.scale / RASTERIZE_SCALE, ..source.transform };
        layer.visible = source.visible;
        layer.opacity = source.opacity;
        let folder = source.folder_id;

        let pre = self.document_snapshot();
        let new_id = self.insert_layer(layer, LayerPlacement::Keep, Some(index + 1));
        self.remove_layer_internal(id);
        if let Some(folder_id) = folder {
            self.document.attach_layer(new_id, folder_id);
        }
        self.commit_global(pre, "Rasterize Layer");
        Some(new_id)
    }

    /// Renders a layer with its transform, flips and filters and encodes it.
    pub fn export_layer(&self, id: LayerId, format: ExportFormat) -> EngineResult<Vec<u8>> {
        let layer = self.document.layer(id).ok_or(EngineError::LayerNotFound(id))?;
        let image = render_layer_export(layer, self.config.primary_rgb()).ok_or(EngineError::NotRaster(id))?;
        io::encode(&image, format)
    }

    /// Flattens all visible layers over the drawn content of the selected
    /// drawing or pattern layer, cropped to that content.
    pub fn render_drawn_area(&self) -> EngineResult<RgbaImage> {
        let layer = self.selected_layer().ok_or(EngineError::NoSelectedLayer)?;
        if !matches!(layer.kind, LayerKind::Drawing | LayerKind::Pattern) {
            return Err(EngineError::NotDrawable(layer.id));
        }
        let surface = layer.surface().ok_or(EngineError::NotRaster(layer.id))?;
        let (x0, y0, x1, y1) = opaque_bounds(surface).ok_or(EngineError::NothingDrawn(layer.id))?;
        let (w, h) = layer.local_size();
        let (sx, sy) = (surface.width() as f64 / w.max(f64::EPSILON), surface.height() as f64 / h.max(f64::EPSILON));
        let (lx0, ly0) = (x0 as f64 / sx, y0 as f64 / sy);
        let (lx1, ly1) = ((x1 + 1) as f64 / sx, (y1 + 1) as f64 / sy);
        let corners = [(lx0, ly0), (lx1, ly0), (lx1, ly1), (lx0, ly1)].map(|(x, y)| layer.local_to_world(Point::new(x, y)));
        let area = corners[1..].iter().fold(Rect::from_points(corners[0], corners[0]), |r, p| r.union_pt(*p));
        let width = area.width().round().max(1.0) as u32;
        let height = area.height().round().max(1.0) as u32;
        Ok(composite_visible(&self.document.layers, Point::new(area.x0, area.y0), width, height))
    }

    pub fn export_drawn_area(&self) -> EngineResult<Vec<u8>> {
        let image = self.render_drawn_area()?;
        log::info!("exporting drawn area {}x{}", image.width(), image.height());
        io::encode(&image, ExportFormat::Png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_layers(n: usize) -> (CanvasEngine, Vec<LayerId>) {
        let mut engine = CanvasEngine::default();
        let ids = (0..n)
            .map(|i| {
                let layer = Layer::raster(format!("L{}", i), LayerKind::Drawing, RgbaImage::new(10, 10), 96.0);
                engine.add_layer(layer, LayerPlacement::DocumentCenter, "Add")
            })
            .collect();
        (engine, ids)
    }

    #[test]
    fn update_rejects_kind_mismatch() {
        let (mut engine, ids) = engine_with_layers(1);
        let update = LayerUpdate::Vector(VectorPropertiesUpdate { path_data: Some("M 0,0".into()), ..Default::default() });
        assert!(!engine.update_layer_properties(ids[0], &update));
        let update = LayerUpdate::Raster(LayerPropertiesUpdate { opacity: Some(4.0), scale: Some(-1.0), ..Default::default() });
        assert!(engine.update_layer_properties(ids[0], &update));
        let layer = engine.layer(ids[0]).unwrap();
        assert_eq!(layer.opacity, 1.0);
        assert_eq!(layer.transform.scale, 0.01);
    }

    #[test]
    fn layer_update_from_json() {
        let update: LayerUpdate = serde_json::from_str(r#"{"kind": "vector", "x": 5, "stroke_width": 3}"#).unwrap();
        match update {
            LayerUpdate::Vector(v) => {
                assert_eq!(v.common.x, Some(5.0));
                assert_eq!(v.stroke_width, Some(3.0));
            }
            _ => panic!("expected vector update"),
        }
    }

    #[test]
    fn delete_moves_selection_to_neighbor() {
        let (mut engine, ids) = engine_with_layers(3);
        engine.select_layer(Some(ids[1]));
        assert!(engine.delete_layer(ids[1]));
        assert_eq!(engine.selected_layer_id(), Some(ids[2]));
        engine.select_layer(Some(ids[2]));
        assert!(engine.delete_layer(ids[2]));
        assert_eq!(engine.selected_layer_id(), Some(ids[0]));
        assert!(!engine.delete_layer(ids[2]));
    }

    #[test]
    fn reorder_moves_within_bounds() {
        let (mut engine, ids) = engine_with_layers(3);
        assert!(!engine.reorder(ids[2], LayerOrder::Forward));
        assert!(engine.reorder(ids[0], LayerOrder::Forward));
        assert_eq!(engine.document().index_of(ids[0]), Some(1));
        assert!(engine.reorder(ids[0], LayerOrder::ToIndex(99)));
        assert_eq!(engine.document().index_of(ids[0]), Some(2));
        assert!(engine.reorder(ids[0], LayerOrder::Backward));
        assert_eq!(engine.document().index_of(ids[0]), Some(1));
    }

    #[test]
    fn duplicate_sits_above_with_offset() {
        let (mut engine, ids) = engine_with_layers(2);
        let copy = engine.duplicate_layer(ids[0]).unwrap();
        assert_eq!(engine.document().index_of(copy), Some(1));
        let (src, dup) = (engine.layer(ids[0]).unwrap(), engine.layer(copy).unwrap());
        assert_eq!(dup.name, "L0 copy");
        assert_eq!(dup.transform.x, src.transform.x + 20.0);
        assert_eq!(dup.transform.y, src.transform.y + 20.0);
        assert_ne!(dup.id, src.id);
        assert_eq!(engine.selected_layer_id(), Some(copy));
    }

    #[test]
    fn merge_down_unions_bounds() {
        let mut engine = CanvasEngine::default();
        let red = Layer::raster("bottom", LayerKind::Pattern, RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])), 96.0);
        let blue = Layer::raster("top", LayerKind::Pattern, RgbaImage::from_pixel(10, 10, Rgba([0, 0, 255, 255])), 96.0);
        let bottom = engine.add_layer(red, LayerPlacement::At { x: 5.0, y: 5.0, scale: 1.0 }, "Add");
        let top = engine.add_layer(blue, LayerPlacement::At { x: 15.0, y: 5.0, scale: 1.0 }, "Add");
        assert!(!engine.merge_down(bottom));
        assert!(engine.merge_down(top));
        assert!(engine.layer(top).is_none());
        let merged = engine.layer(bottom).unwrap();
        assert_eq!(merged.surface().unwrap().dimensions(), (20, 10));
        assert_eq!(merged.transform, Transform { x: 10.0, y: 5.0, scale: 1.0, rotation: 0.0 });
        assert_eq!(*merged.surface().unwrap().get_pixel(2, 2), Rgba([255, 0, 0, 255]));
        assert_eq!(*merged.surface().unwrap().get_pixel(17, 2), Rgba([0, 0, 255, 255]));
        assert_eq!(engine.selected_layer_id(), Some(bottom));
    }

    #[test]
    fn folder_visibility_majority_rule() {
        let (mut engine, ids) = engine_with_layers(3);
        let folder = engine.create_folder(Some("F"));
        for id in &ids {
            engine.move_layer_to_folder(*id, Some(folder));
        }
        assert!(engine.toggle_folder_visibility(folder));
        assert!(ids.iter().all(|id| !engine.layer(*id).unwrap().visible));
        engine.update_layer_properties(ids[0], &LayerUpdate::Raster(LayerPropertiesUpdate { visible: Some(true), ..Default::default() }));
        assert!(engine.toggle_folder_visibility(folder));
        assert!(ids.iter().all(|id| engine.layer(*id).unwrap().visible));
    }

    #[test]
    fn delete_folder_keeps_layers() {
        let (mut engine, ids) = engine_with_layers(1);
        let folder = engine.create_folder(None);
        engine.move_layer_to_folder(ids[0], Some(folder));
        assert_eq!(engine.layer(ids[0]).unwrap().folder_id, Some(folder));
        assert!(engine.delete_folder(folder));
        assert!(engine.document().folders.is_empty());
        assert_eq!(engine.layer(ids[0]).unwrap().folder_id, None);
    }

    #[test]
    fn trim_keeps_world_position() {
        let mut engine = CanvasEngine::default();
        let mut surface = RgbaImage::new(10, 10);
        surface.put_pixel(6, 7, Rgba([1, 1, 1, 255]));
        let layer = Layer::raster("L", LayerKind::Drawing, surface, 96.0);
        let id = engine.add_layer(layer, LayerPlacement::At { x: 100.0, y: 100.0, scale: 2.0 }, "Add");
        let before = engine.layer(id).unwrap().local_to_world(Point::new(6.5, 7.5));
        assert!(engine.trim_layer_to_content(id));
        let layer = engine.layer(id).unwrap();
        assert_eq!(layer.surface().unwrap().dimensions(), (1, 1));
        let after = layer.local_to_world(Point::new(0.5, 0.5));
        assert!((before - after).hypot() < 1e-9);
    }

    #[test]
    fn trim_deletes_empty_layer() {
        let (mut engine, ids) = engine_with_layers(1);
        assert!(engine.trim_layer_to_content(ids[0]));
        assert!(engine.layer(ids[0]).is_none());
    }

    #[test]
    fn rasterize_replaces_vector_layer() {
        let mut engine = CanvasEngine::default();
        let vector = Layer::vector("Shape", "M 0,5 L 10,5", LayerMetadata::new(96.0, 10.0, 10.0));
        let below = engine.create_drawing_layer();
        let id = engine.add_layer(vector, LayerPlacement::At { x: 50.0, y: 50.0, scale: 1.0 }, "Add");
        let raster = engine.rasterize_vector_layer(id).unwrap();
        assert!(engine.layer(id).is_none());
        assert_eq!(engine.document().index_of(raster), Some(1));
        assert_eq!(engine.document().index_of(below), Some(0));
        let layer = engine.layer(raster).unwrap();
        assert_eq!(layer.kind, LayerKind::Pattern);
        assert_eq!(layer.surface().unwrap().dimensions(), (20, 20));
        assert_eq!(layer.transform.scale, 0.5);
        assert!(engine.rasterize_vector_layer(below).is_none());
    }

    #[test]
    fn export_layer_decodes_back() {
        let mut engine = CanvasEngine::default();
        let mut img = RgbaImage::from_pixel(6, 4, Rgba([0, 0, 255, 255]));
        img.put_pixel(0, 0, Rgba([255, 0, 0, 128]));
        let id = engine.add_layer(Layer::raster("Photo", LayerKind::Pattern, img.clone(), 96.0), LayerPlacement::DocumentCenter, "Add");
        let bytes = engine.export_layer(id, ExportFormat::Png).unwrap();
        let decoded = io::decode_image(&bytes).unwrap();
        assert_eq!(decoded.image, img);
        assert!(matches!(engine.export_layer(uuid::Uuid::new_v4(), ExportFormat::Png), Err(EngineError::LayerNotFound(_))));
    }

    #[test]
    fn drawn_area_crops_to_drawing_and_flattens() {
        let mut engine = CanvasEngine::default();
        engine.create_blank_canvas(&BlankCanvasSpec { name: None, width: 100.0, height: 100.0, unit: Unit::Px, dpi: 72.0 });
        assert!(matches!(engine.render_drawn_area(), Err(EngineError::NotDrawable(_))));
        let drawing = engine.create_drawing_layer();
        assert!(matches!(engine.render_drawn_area(), Err(EngineError::NothingDrawn(_))));

        if let Some(surface) = engine.document.layer_mut(drawing).and_then(Layer::surface_mut) {
            for y in 20..30 {
                for x in 20..40 {
                    let px = if x < 30 { Rgba([255, 0, 0, 255]) } else { Rgba([0, 0, 0, 0]) };
                    surface.put_pixel(x, y, px);
                }
            }
            surface.put_pixel(39, 29, Rgba([255, 0, 0, 255]));
        }
        let background = engine.document.layers[0].id;
        engine.document.layer_mut(background).unwrap().adjustments.invert = 100.0;

        let area = engine.render_drawn_area().unwrap();
        assert_eq!(area.dimensions(), (20, 10));
        assert_eq!(*area.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        // Undrawn pixels inside the box show the inverted white background.
        assert_eq!(*area.get_pixel(15, 0), Rgba([0, 0, 0, 255]));

        let png = engine.export_drawn_area().unwrap();
        assert_eq!(io::decode_image(&png).unwrap().image, area);
    }

    #[test]
    fn new_layers_are_framed_once_the_canvas_size_is_known() {
        let mut engine = CanvasEngine::default();
        let content = LayerContent::Raster(RasterContent::new(RgbaImage::new(10, 10)));
        let metadata = LayerMetadata::new(96.0, 10.0, 10.0);
        engine.create_layer("Small", LayerKind::Pattern, content.clone(), metadata, LayerPlacement::At { x: 500.0, y: 250.0, scale: 1.0 });
        assert_eq!(engine.viewport(), Viewport::default());

        engine.set_screen_size(800.0, 600.0);
        let metadata = LayerMetadata::new(96.0, 1000.0, 500.0);
        let big = engine.create_layer("Big", LayerKind::Pattern, content, metadata, LayerPlacement::At { x: 500.0, y: 250.0, scale: 1.0 });
        let vp = engine.viewport();
        assert!((vp.zoom - 0.64).abs() < 1e-12);
        assert!((vp.screen_to_world(Point::new(400.0, 300.0)) - Point::new(500.0, 250.0)).hypot() < 1e-9);

        assert!(engine.zoom_to_fit());
        assert!((engine.viewport().zoom - 0.72).abs() < 1e-12);
        assert!(engine.zoom_in(2.0));
        assert!((engine.viewport().zoom - 1.44).abs() < 1e-12);
        assert!(engine.zoom_out(2.0));
        assert!(engine.frame_layer(big));
        assert!(!engine.frame_layer(uuid::Uuid::new_v4()));
    }
}
