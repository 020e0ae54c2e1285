use wasm_bindgen::prelude::*;
use image::RgbaImage;
use kurbo::{Point, Size};
use crate::config::EngineConfig;
use crate::document::Document;
use crate::history::{DocumentSnapshot, HistoryInfo, HistoryStack, LayerHistory, LayerSnapshot};
use crate::layer::Layer;
use crate::selection::SelectionState;
use crate::shapes::ShapeKind;
use crate::types::{LayerId, Tool, Unit, Viewport};
use crate::vector_edit::VectorEditSession;

/// Pixels held by copy, waiting for paste.
#[derive(Clone, Debug)]
pub struct ClipboardImage {
    pub image: RgbaImage,
    pub dpi: f64,
}

#[wasm_bindgen]
pub struct CanvasEngine {
    pub(crate) document: Document,
    pub(crate) selected_layer_id: Option<LayerId>,
    pub(crate) active_tool: Tool,
    pub(crate) viewport: Viewport,
    pub(crate) selection: SelectionState,
    pub(crate) vector_edit: Option<VectorEditSession>,
    pub(crate) layer_history: LayerHistory,
    pub(crate) global_history: HistoryStack<DocumentSnapshot>,
    pub(crate) config: EngineConfig,
    pub(crate) clipboard: Option<ClipboardImage>,
    /// Layer state captured when a multi-step edit (drag, stroke) began.
    pub(crate) gesture: Option<LayerSnapshot>,
    pub(crate) shape_kind: ShapeKind,
    /// Size of the host's canvas element in screen pixels, once known.
    pub(crate) screen_size: Option<Size>,
}

/// Default step for `zoom_in`/`zoom_out`.
pub const ZOOM_STEP: f64 = 1.2;
const FIT_PADDING: f64 = 0.9;
const FRAME_PADDING: f64 = 0.8;

impl Default for CanvasEngine {
    fn default() -> Self {
        Self::with_config(EngineConfig::default())
    }
}

impl CanvasEngine {
    pub fn with_config(mut config: EngineConfig) -> Self {
        config.sanitize();
        let document = Document::new(
            config.default_document_width,
            config.default_document_height,
            config.default_dpi,
            Unit::Px,
        );
        CanvasEngine {
            document,
            selected_layer_id: None,
            active_tool: Tool::Move,
            viewport: Viewport::default(),
            selection: SelectionState::default(),
            vector_edit: None,
            layer_history: LayerHistory::new(config.history_limit),
            global_history: HistoryStack::new(config.history_limit),
            config,
            clipboard: None,
            gesture: None,
            shape_kind: ShapeKind::default(),
            screen_size: None,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, mut config: EngineConfig) {
        config.sanitize();
        self.layer_history.set_limit(config.history_limit);
        self.global_history.set_limit(config.history_limit);
        self.config = config;
    }

    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.config
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.document.layer(id)
    }

    pub fn selected_layer_id(&self) -> Option<LayerId> {
        self.selected_layer_id
    }

    pub fn selected_layer(&self) -> Option<&Layer> {
        self.selected_layer_id.and_then(|id| self.document.layer(id))
    }

    pub fn active_tool(&self) -> Tool {
        self.active_tool
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn vector_session(&self) -> Option<&VectorEditSession> {
        self.vector_edit.as_ref()
    }

    pub fn clipboard(&self) -> Option<&ClipboardImage> {
        self.clipboard.as_ref()
    }

    pub fn layer_history_info(&self, id: LayerId) -> HistoryInfo {
        self.layer_history
            .stack(id)
            .map(HistoryInfo::from)
            .unwrap_or(HistoryInfo { labels: Vec::new(), cursor: None })
    }

    pub fn global_history_info(&self) -> HistoryInfo {
        HistoryInfo::from(&self.global_history)
    }

    /// Selects a layer (or none). Leaving the layer under vector edit ends
    /// the session.
    pub fn select_layer(&mut self, id: Option<LayerId>) -> bool {
        if let Some(id) = id {
            if self.document.layer(id).is_none() {
                return false;
            }
        }
        if self.vector_edit.as_ref().map(|s| Some(s.layer_id) != id).unwrap_or(false) {
            self.exit_vector_edit();
        }
        self.selected_layer_id = id;
        true
    }

    /// Switches tools. Leaving point editing exits the vector session,
    /// entering it on a selected vector layer starts one, and tools that do
    /// not work with selections drop the current one.
    pub fn set_active_tool(&mut self, tool: Tool) {
        if self.active_tool == Tool::DirectSelect && tool != Tool::DirectSelect {
            self.exit_vector_edit();
        }
        self.active_tool = tool;
        if tool == Tool::DirectSelect {
            if let Some(id) = self.selected_layer_id {
                if self.vector_edit.is_none() {
                    self.enter_vector_edit(id);
                }
            }
        }
        if !tool.keeps_selection() {
            self.selection.clear();
        }
        log::debug!("active tool: {:?}", tool);
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        let zoom = if viewport.zoom.is_finite() { viewport.zoom } else { 1.0 };
        self.viewport = Viewport { zoom: zoom.clamp(Viewport::MIN_ZOOM, Viewport::MAX_ZOOM), ..viewport };
    }

    pub fn zoom_at_point(&mut self, factor: f64, screen: Point) {
        if factor.is_finite() && factor > 0.0 {
            self.viewport.zoom_at(factor, screen);
        }
    }

    pub fn set_screen_size(&mut self, width: f64, height: f64) {
        self.screen_size = if width > 0.0 && height > 0.0 { Some(Size::new(width, height)) } else { None };
    }

    pub fn zoom_in(&mut self, factor: f64) -> bool {
        match self.screen_size {
            Some(screen) if factor.is_finite() && factor > 0.0 => {
                self.viewport.zoom_centered(factor, screen);
                true
            }
            _ => false,
        }
    }

    pub fn zoom_out(&mut self, factor: f64) -> bool {
        factor.is_finite() && factor > 0.0 && self.zoom_in(1.0 / factor)
    }

    /// Fits the world bounds of all layers into the canvas.
    pub fn zoom_to_fit(&mut self) -> bool {
        let screen = match self.screen_size {
            Some(s) => s,
            None => return false,
        };
        let bounds = self.document.layers.iter().map(Layer::world_bounds).reduce(|a, b| a.union(b));
        match bounds {
            Some(bounds) => self.viewport.fit_rect(bounds, screen, FIT_PADDING),
            None => false,
        }
    }

    /// Centers one layer in the canvas.
    pub fn frame_layer(&mut self, id: LayerId) -> bool {
        let screen = match self.screen_size {
            Some(s) => s,
            None => return false,
        };
        let bounds = match self.document.layer(id) {
            Some(layer) => layer.world_bounds(),
            None => return false,
        };
        self.viewport.fit_rect(bounds, screen, FRAME_PADDING)
    }

    pub(crate) fn layer_snapshot(&self, id: LayerId) -> Option<LayerSnapshot> {
        self.document.layer(id).map(Layer::snapshot)
    }

    pub(crate) fn document_snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            width: self.document.width,
            height: self.document.height,
            dpi: self.document.dpi,
            unit: self.document.unit,
            layers: self.document.layers.iter().map(Layer::snapshot).collect(),
            folders: self.document.folders.clone(),
            viewport: self.viewport,
            selected_layer_id: self.selected_layer_id,
        }
    }

    /// Replaces the whole document with `snapshot`. Layers that survive keep
    /// their version counters (bumped) so the renderer repaints them.
    pub(crate) fn restore_document(&mut self, snapshot: &DocumentSnapshot) {
        let mut old_layers = std::mem::take(&mut self.document.layers);
        let mut layers = Vec::with_capacity(snapshot.layers.len());
        for snap in &snapshot.layers {
            let restored = match old_layers.iter().position(|l| l.id == snap.id) {
                Some(pos) => {
                    let mut layer = old_layers.swap_remove(pos);
                    if layer.restore(snap) { Some(layer) } else { None }
                }
                None => Layer::from_snapshot(snap),
            };
            match restored {
                Some(layer) => layers.push(layer),
                None => log::warn!("could not restore layer {}", snap.id),
            }
        }
        self.document.width = snapshot.width;
        self.document.height = snapshot.height;
        self.document.dpi = snapshot.dpi;
        self.document.unit = snapshot.unit;
        self.document.layers = layers;
        self.document.folders = snapshot.folders.clone();
        self.document.sync_folders();
        self.viewport = snapshot.viewport;
        self.selected_layer_id = snapshot.selected_layer_id.filter(|id| self.document.layer(*id).is_some());
        self.selection.clear();
        log::info!("restored document with {} layers", self.document.layers.len());
    }

    pub(crate) fn restore_layer(&mut self, snapshot: &LayerSnapshot) -> bool {
        match self.document.layer_mut(snapshot.id) {
            Some(layer) => layer.restore(snapshot),
            None => false,
        }
    }

    /// Appends a per-layer entry if the layer changed since `pre`.
    pub(crate) fn commit_layer_edit(&mut self, pre: LayerSnapshot, label: &str) -> bool {
        let post = match self.layer_snapshot(pre.id) {
            Some(post) => post,
            None => return false,
        };
        let id = pre.id;
        let committed = self.layer_history.stack_mut(id).record(pre, post, label);
        if committed {
            log::debug!("layer {} history: {}", id, label);
        }
        committed
    }

    /// Like `commit_layer_edit`, but folds into a running gesture on the
    /// same layer instead of committing now.
    pub(crate) fn finish_layer_edit(&mut self, pre: LayerSnapshot, label: &str) -> bool {
        if self.gesture.as_ref().map(|g| g.id == pre.id).unwrap_or(false) {
            return false;
        }
        self.commit_layer_edit(pre, label)
    }

    pub(crate) fn commit_global(&mut self, pre: DocumentSnapshot, label: &str) -> bool {
        // View changes since the last entry are folded into it.
        if let Some(current) = self.global_history.current_mut() {
            if current.same_document(&pre) {
                current.viewport = pre.viewport;
                current.selected_layer_id = pre.selected_layer_id;
            }
        }
        let post = self.document_snapshot();
        let committed = self.global_history.record(pre, post, label);
        if committed {
            log::info!("global history: {}", label);
        }
        committed
    }

    /// Starts a multi-step edit on a layer; the intermediate updates are
    /// committed as one entry by `end_layer_gesture`.
    pub fn begin_layer_gesture(&mut self, id: LayerId) -> bool {
        if self.gesture.is_some() {
            self.end_layer_gesture("Edit Layer");
        }
        self.gesture = self.layer_snapshot(id);
        self.gesture.is_some()
    }

    pub fn end_layer_gesture(&mut self, label: &str) -> bool {
        match self.gesture.take() {
            Some(pre) => self.commit_layer_edit(pre, label),
            None => false,
        }
    }

    fn settle_pending_edits(&mut self) {
        self.exit_vector_edit();
        self.end_layer_gesture("Edit Layer");
    }

    pub fn undo_layer(&mut self, id: LayerId) -> bool {
        self.settle_pending_edits();
        let snapshot = match self.layer_history.stack_mut(id).undo() {
            Some(s) => s.clone(),
            None => return false,
        };
        self.restore_layer(&snapshot)
    }

    pub fn redo_layer(&mut self, id: LayerId) -> bool {
        self.settle_pending_edits();
        let snapshot = match self.layer_history.stack_mut(id).redo() {
            Some(s) => s.clone(),
            None => return false,
        };
        self.restore_layer(&snapshot)
    }

    pub fn undo_global(&mut self) -> bool {
        self.settle_pending_edits();
        let snapshot = match self.global_history.undo() {
            Some(s) => s.clone(),
            None => return false,
        };
        self.restore_document(&snapshot);
        true
    }

    pub fn redo_global(&mut self) -> bool {
        self.settle_pending_edits();
        let snapshot = match self.global_history.redo() {
            Some(s) => s.clone(),
            None => return false,
        };
        self.restore_document(&snapshot);
        true
    }

    pub fn revert_layer_history(&mut self, id: LayerId, index: usize) -> bool {
        self.settle_pending_edits();
        let snapshot = match self.layer_history.stack_mut(id).revert_to(index) {
            Some(s) => s.clone(),
            None => return false,
        };
        self.restore_layer(&snapshot)
    }

    pub fn revert_global_history(&mut self, index: usize) -> bool {
        self.settle_pending_edits();
        let snapshot = match self.global_history.revert_to(index) {
            Some(s) => s.clone(),
            None => return false,
        };
        self.restore_document(&snapshot);
        true
    }
}

#[wasm_bindgen]
impl CanvasEngine {
    #[wasm_bindgen(constructor)]
    pub fn new() -> CanvasEngine {
        console_error_panic_hook::set_once();
        CanvasEngine::default()
    }

    /// Per-layer undo when a layer is selected, global undo otherwise.
    pub fn undo(&mut self) -> bool {
        match self.selected_layer_id {
            Some(id) => self.undo_layer(id),
            None => self.undo_global(),
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.selected_layer_id {
            Some(id) => self.redo_layer(id),
            None => self.redo_global(),
        }
    }

    pub fn get_layers_json(&self) -> String {
        let layers: Vec<_> = self.document.layers.iter().map(Layer::summary).collect();
        serde_json::to_string(&layers).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn get_folders_json(&self) -> String {
        serde_json::to_string(&self.document.folders).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn get_document_json(&self) -> String {
        serde_json::json!({
            "width": self.document.width,
            "height": self.document.height,
            "dpi": self.document.dpi,
            "unit": self.document.unit,
            "selected_layer_id": self.selected_layer_id,
            "active_tool": self.active_tool,
            "viewport": self.viewport,
        })
        .to_string()
    }

    pub fn get_selection_json(&self) -> String {
        serde_json::to_string(&self.selection.summary()).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn get_history_json(&self) -> String {
        let layer = self.selected_layer_id.map(|id| self.layer_history_info(id));
        serde_json::json!({ "global": self.global_history_info(), "layer": layer }).to_string()
    }

    pub fn get_layer_rgba(&self, id: &str) -> Option<Vec<u8>> {
        let id = LayerId::parse_str(id).ok()?;
        self.document.layer(id)?.surface().map(|s| s.as_raw().clone())
    }

    pub fn get_layer_width(&self, id: &str) -> u32 {
        LayerId::parse_str(id).ok().and_then(|id| self.document.layer(id)).and_then(|l| l.surface()).map(|s| s.width()).unwrap_or(0)
    }

    pub fn get_layer_height(&self, id: &str) -> u32 {
        LayerId::parse_str(id).ok().and_then(|id| self.document.layer(id)).and_then(|l| l.surface()).map(|s| s.height()).unwrap_or(0)
    }

    pub fn get_layer_version(&self, id: &str) -> f64 {
        LayerId::parse_str(id).ok().and_then(|id| self.document.layer(id)).map(|l| l.version as f64).unwrap_or(0.0)
    }
}
