use serde::Serialize;
use image::{Rgba, RgbaImage};
use kurbo::{BezPath, Point, Rect, Shape};
use crate::engine::{CanvasEngine, ClipboardImage};
use crate::image_ops::flood_select;
use crate::layer::{Layer, LayerContent, RasterContent};
use crate::layer_ops::LayerPlacement;
use crate::tracer::{simplify, Tracer};
use crate::types::{BoundingBox, LayerId, LayerKind, LayerMetadata};

pub const PASTED_LAYER_NAME: &str = "Pasted Selection";

#[derive(Serialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "snake_case")]
pub enum GesturePhase {
    #[default]
    Idle,
    /// Pointer is down and the shape is being dragged out.
    Active,
    /// Shape finished; the host shows the selection menu.
    Committed,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SelectionShape {
    Rectangle { start: Point, end: Point },
    Polygon { points: Vec<Point> },
}

impl SelectionShape {
    /// World-space outline; rectangles become their four corners.
    pub fn outline(&self) -> Vec<Point> {
        match self {
            SelectionShape::Rectangle { start, end } => vec![
                *start,
                Point::new(end.x, start.y),
                *end,
                Point::new(start.x, end.y),
            ],
            SelectionShape::Polygon { points } => points.clone(),
        }
    }

    pub fn is_usable(&self) -> bool {
        match self {
            SelectionShape::Rectangle { start, end } => start.x != end.x && start.y != end.y,
            SelectionShape::Polygon { points } => points.len() >= 3,
        }
    }
}

/// Selection size in world pixels and physical centimeters.
#[derive(Serialize, Clone, Copy, PartialEq, Debug, Default)]
pub struct SelectionDimensions {
    pub width_px: f64,
    pub height_px: f64,
    pub width_cm: f64,
    pub height_cm: f64,
}

impl SelectionDimensions {
    /// `cm = world / layer scale * 2.54 / dpi`; zero without a reference
    /// layer.
    pub fn compute(width: f64, height: f64, layer: Option<&Layer>) -> Self {
        let mut dims = SelectionDimensions { width_px: width, height_px: height, ..Default::default() };
        if let Some(layer) = layer {
            let (dpi, scale) = (layer.metadata.dpi, layer.transform.scale);
            if dpi > 0.0 && scale > 0.0 {
                dims.width_cm = width / scale * 2.54 / dpi;
                dims.height_cm = height / scale * 2.54 / dpi;
            }
        }
        dims
    }
}

/// Pixel mask sized to the source layer's surface.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionMask {
    pub width: u32,
    pub height: u32,
    pub bits: Vec<bool>,
}

impl SelectionMask {
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    pub fn is_subset_of(&self, other: &SelectionMask) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.bits.iter().zip(&other.bits).all(|(a, b)| !*a || *b)
    }

    fn union_with(&mut self, bits: &[bool]) {
        for (a, b) in self.bits.iter_mut().zip(bits) {
            *a |= *b;
        }
    }
}

#[derive(Clone, Debug)]
pub struct MagicWandState {
    pub mask: SelectionMask,
    pub seed_color: Rgba<u8>,
    pub source_layer: LayerId,
    pub tolerance: f64,
    pub contiguous: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SelectionState {
    pub shape: Option<SelectionShape>,
    pub phase: GesturePhase,
    pub bounding_box: Option<BoundingBox>,
    pub dimensions: SelectionDimensions,
    pub magic_wand: Option<MagicWandState>,
}

#[derive(Serialize, Clone, Debug)]
pub struct SelectionSummary {
    pub phase: GesturePhase,
    pub shape: Option<SelectionShape>,
    pub bounding_box: Option<BoundingBox>,
    pub dimensions: SelectionDimensions,
    pub magic_wand: bool,
}

impl SelectionState {
    pub fn clear(&mut self) {
        *self = SelectionState::default();
    }

    /// A finished shape that consumers can act on.
    pub fn is_active(&self) -> bool {
        self.phase != GesturePhase::Active && self.shape.as_ref().map(SelectionShape::is_usable).unwrap_or(false)
    }

    pub fn center(&self) -> Option<Point> {
        self.bounding_box.map(|b| b.center())
    }

    pub fn summary(&self) -> SelectionSummary {
        SelectionSummary {
            phase: self.phase,
            shape: self.shape.clone(),
            bounding_box: self.bounding_box,
            dimensions: self.dimensions,
            magic_wand: self.magic_wand.is_some(),
        }
    }
}

/// Region cut out of a layer, in surface pixels.
struct Extraction {
    image: RgbaImage,
    /// Surface-pixel rectangle the image was taken from.
    area: Rect,
    /// Outline in surface pixels, for clearing the source.
    outline: BezPath,
}

fn surface_scale(layer: &Layer, surface: &RgbaImage) -> (f64, f64) {
    let (w, h) = layer.local_size();
    let sx = if w > 0.0 { surface.width() as f64 / w } else { 1.0 };
    let sy = if h > 0.0 { surface.height() as f64 / h } else { 1.0 };
    (sx, sy)
}

/// Copies the pixels of `layer` inside the world polygon `outline`. The box
/// is clipped to the surface; pixels count as inside when their center is.
fn extract_region(layer: &Layer, outline: &[Point]) -> Option<Extraction> {
    let surface = layer.surface()?;
    let (sx, sy) = surface_scale(layer, surface);
    let local: Vec<Point> = outline
        .iter()
        .map(|p| {
            let l = layer.world_to_local(*p);
            Point::new(l.x * sx, l.y * sy)
        })
        .collect();
    let bounds = BoundingBox::from_points(&local)?.to_rect();
    let area = Rect::new(bounds.x0.floor(), bounds.y0.floor(), bounds.x1.ceil(), bounds.y1.ceil())
        .intersect(Rect::new(0.0, 0.0, surface.width() as f64, surface.height() as f64));
    if area.width() <= 0.0 || area.height() <= 0.0 {
        return None;
    }

    let mut path = BezPath::new();
    for (i, p) in local.iter().enumerate() {
        if i == 0 { path.move_to(*p); } else { path.line_to(*p); }
    }
    path.close_path();

    let (x0, y0) = (area.x0 as u32, area.y0 as u32);
    let mut image = RgbaImage::new(area.width() as u32, area.height() as u32);
    for (x, y, px) in image.enumerate_pixels_mut() {
        let center = Point::new((x0 + x) as f64 + 0.5, (y0 + y) as f64 + 0.5);
        if path.contains(center) {
            *px = *surface.get_pixel(x0 + x, y0 + y);
        }
    }
    Some(Extraction { image, area, outline: path })
}

fn clear_region(surface: &mut RgbaImage, extraction: &Extraction) -> bool {
    let mut changed = false;
    let (x0, y0) = (extraction.area.x0 as u32, extraction.area.y0 as u32);
    for y in 0..extraction.image.height() {
        for x in 0..extraction.image.width() {
            let center = Point::new((x0 + x) as f64 + 0.5, (y0 + y) as f64 + 0.5);
            if extraction.outline.contains(center) {
                let px = surface.get_pixel_mut(x0 + x, y0 + y);
                if px[3] != 0 {
                    *px = Rgba([0, 0, 0, 0]);
                    changed = true;
                }
            }
        }
    }
    changed
}

impl CanvasEngine {
    fn update_dimensions(&mut self, width: f64, height: f64) {
        let dims = SelectionDimensions::compute(width, height, self.selected_layer());
        self.selection.dimensions = dims;
    }

    pub fn start_marquee(&mut self, world: Point) {
        self.selection.clear();
        self.selection.shape = Some(SelectionShape::Rectangle { start: world, end: world });
        self.selection.phase = GesturePhase::Active;
        self.update_marquee(world);
    }

    pub fn update_marquee(&mut self, world: Point) {
        if self.selection.phase != GesturePhase::Active {
            return;
        }
        let start = match self.selection.shape {
            Some(SelectionShape::Rectangle { start, .. }) => start,
            _ => return,
        };
        self.selection.shape = Some(SelectionShape::Rectangle { start, end: world });
        let bbox = BoundingBox::from(Rect::from_points(start, world));
        self.selection.bounding_box = Some(bbox);
        self.update_dimensions(bbox.width, bbox.height);
    }

    /// Finishes the marquee; commits only when both sides are non-zero.
    pub fn end_marquee(&mut self) -> bool {
        if self.selection.phase != GesturePhase::Active {
            return false;
        }
        let usable = matches!(&self.selection.shape, Some(s @ SelectionShape::Rectangle { .. }) if s.is_usable());
        if usable {
            self.selection.phase = GesturePhase::Committed;
        } else {
            self.selection.clear();
        }
        usable
    }

    pub fn start_lasso(&mut self, world: Point) {
        self.selection.clear();
        self.selection.shape = Some(SelectionShape::Polygon { points: vec![world] });
        self.selection.bounding_box = Some(BoundingBox { x: world.x, y: world.y, width: 0.0, height: 0.0 });
        self.selection.phase = GesturePhase::Active;
        self.update_dimensions(0.0, 0.0);
    }

    pub fn update_lasso(&mut self, world: Point) {
        if self.selection.phase != GesturePhase::Active {
            return;
        }
        match &mut self.selection.shape {
            Some(SelectionShape::Polygon { points }) => points.push(world),
            _ => return,
        }
        let bbox = match self.selection.bounding_box {
            Some(mut bbox) => {
                bbox.extend(world);
                bbox
            }
            None => BoundingBox { x: world.x, y: world.y, width: 0.0, height: 0.0 },
        };
        self.selection.bounding_box = Some(bbox);
        self.update_dimensions(bbox.width, bbox.height);
    }

    /// Finishes the lasso; commits when it has at least three points.
    pub fn end_lasso(&mut self) -> bool {
        if self.selection.phase != GesturePhase::Active {
            return false;
        }
        let usable = matches!(&self.selection.shape, Some(s @ SelectionShape::Polygon { .. }) if s.is_usable());
        if usable {
            self.selection.phase = GesturePhase::Committed;
        } else {
            self.selection.clear();
        }
        usable
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Magic wand at a world point on the selected raster layer. With
    /// `accumulate`, the new region is added to the current mask and the
    /// original seed color is kept.
    pub fn magic_wand(&mut self, world: Point, accumulate: bool) -> bool {
        let (id, seed) = {
            let layer = match self.selected_layer() {
                Some(l) => l,
                None => return false,
            };
            let surface = match layer.surface() {
                Some(s) => s,
                None => return false,
            };
            let (sx, sy) = surface_scale(layer, surface);
            let local = layer.world_to_local(world);
            let (px, py) = ((local.x * sx).floor(), (local.y * sy).floor());
            if px < 0.0 || py < 0.0 || px >= surface.width() as f64 || py >= surface.height() as f64 {
                return false;
            }
            (layer.id, (px as u32, py as u32))
        };
        self.magic_wand_at_pixel(id, seed, accumulate)
    }

    /// Magic wand seeded at a surface pixel of `layer_id`.
    pub fn magic_wand_at_pixel(&mut self, layer_id: LayerId, seed: (u32, u32), accumulate: bool) -> bool {
        let wand = self.config.magic_wand.clone();
        let simplify_tolerance = self.config.contour_tolerance;
        let layer = match self.document.layer(layer_id) {
            Some(l) => l,
            None => return false,
        };
        let surface = match layer.surface() {
            Some(s) => s,
            None => return false,
        };
        let (width, height) = surface.dimensions();
        if seed.0 >= width || seed.1 >= height {
            return false;
        }

        let previous = self
            .selection
            .magic_wand
            .take()
            .filter(|s| accumulate && s.source_layer == layer_id && s.mask.width == width && s.mask.height == height);
        let seed_color = previous.as_ref().map(|s| s.seed_color).unwrap_or(*surface.get_pixel(seed.0, seed.1));
        let bits = flood_select(surface, seed, seed_color, wand.tolerance, wand.contiguous);
        let mask = match previous {
            Some(mut prev) => {
                prev.mask.union_with(&bits);
                prev.mask
            }
            None => SelectionMask { width, height, bits },
        };

        let contour = Tracer::new(width, height).trace(&mask.bits);
        if contour.is_empty() {
            if !accumulate {
                self.selection.clear();
            }
            return false;
        }
        let (sx, sy) = surface_scale(layer, surface);
        let world: Vec<Point> = simplify(&contour, simplify_tolerance)
            .into_iter()
            .map(|p| layer.local_to_world(Point::new(p.x / sx, p.y / sy)))
            .collect();
        let bbox = BoundingBox::from_points(&world).unwrap_or_default();
        log::debug!("magic wand selected {} pixels, outline of {} points", mask.count(), world.len());

        self.selection.shape = Some(SelectionShape::Polygon { points: world });
        self.selection.bounding_box = Some(bbox);
        self.selection.phase = GesturePhase::Committed;
        self.selection.magic_wand = Some(MagicWandState {
            mask,
            seed_color,
            source_layer: layer_id,
            tolerance: wand.tolerance,
            contiguous: wand.contiguous,
        });
        self.update_dimensions(bbox.width, bbox.height);
        true
    }

    fn selection_outline(&self) -> Option<Vec<Point>> {
        if !self.selection.is_active() {
            return None;
        }
        self.selection.shape.as_ref().map(SelectionShape::outline)
    }

    /// Copies the selected region of the selected layer to the clipboard.
    pub fn copy_selection(&mut self) -> bool {
        let outline = match self.selection_outline() {
            Some(o) => o,
            None => return false,
        };
        let copied = self.selected_layer().and_then(|layer| {
            extract_region(layer, &outline).map(|ex| ClipboardImage { image: ex.image, dpi: layer.metadata.dpi })
        });
        self.selection.clear();
        match copied {
            Some(clip) => {
                log::debug!("copied {}x{} selection", clip.image.width(), clip.image.height());
                self.clipboard = Some(clip);
                true
            }
            None => false,
        }
    }

    /// Moves the selected region into a new layer placed exactly over it.
    pub fn cutout_selection(&mut self) -> Option<LayerId> {
        self.layer_from_selection(true)
    }

    /// Copies the selected region into a new layer placed exactly over it.
    pub fn duplicate_selection(&mut self) -> Option<LayerId> {
        self.layer_from_selection(false)
    }

    fn layer_from_selection(&mut self, remove_from_source: bool) -> Option<LayerId> {
        let outline = self.selection_outline()?;
        let source_id = self.selected_layer_id?;
        let global_pre = self.document_snapshot();
        let layer_pre = self.layer_snapshot(source_id)?;

        let (extraction, new_layer) = {
            let source = self.document.layer(source_id)?;
            let surface = source.surface()?;
            let (sx, sy) = surface_scale(source, surface);
            let ex = match extract_region(source, &outline) {
                Some(ex) => ex,
                None => {
                    self.selection.clear();
                    return None;
                }
            };
            let local_center = Point::new(ex.area.center().x / sx, ex.area.center().y / sy);
            let suffix = if remove_from_source { "Cutout" } else { "Copy" };
            let mut layer = Layer::new(
                format!("{} {}", source.name, suffix),
                source.kind,
                LayerContent::Raster(RasterContent::new(ex.image.clone())),
                LayerMetadata::new(source.metadata.dpi, ex.area.width(), ex.area.height()),
            );
            layer.transform = source.transform;
            let center = source.local_to_world(local_center);
            layer.transform.x = center.x;
            layer.transform.y = center.y;
            // Surface pixels map to local units through (sx, sy).
            layer.transform.scale = source.transform.scale / sx.max(sy);
            (ex, layer)
        };

        if remove_from_source {
            if let Some(source) = self.document.layer_mut(source_id) {
                let cleared = source.surface_mut().map(|s| clear_region(s, &extraction)).unwrap_or(false);
                if cleared {
                    source.touch();
                }
            }
            self.commit_layer_edit(layer_pre, "Cutout Selection");
        }

        let index = self.document.index_of(source_id).map(|i| i + 1);
        let id = self.insert_layer(new_layer, LayerPlacement::Keep, index);
        self.selection.clear();
        let label = if remove_from_source { "Cutout Selection" } else { "Duplicate Selection" };
        self.commit_global(global_pre, label);
        Some(id)
    }

    /// Pastes the clipboard as a new pattern layer at the document center.
    pub fn paste_selection(&mut self) -> Option<LayerId> {
        let clip = self.clipboard.clone()?;
        let layer = Layer::raster(PASTED_LAYER_NAME, LayerKind::Pattern, clip.image, clip.dpi);
        Some(self.add_layer(layer, LayerPlacement::DocumentCenter, "Paste Selection"))
    }

    pub fn magic_wand_mask(&self) -> Option<&SelectionMask> {
        self.selection.magic_wand.as_ref().map(|w| &w.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_use_layer_dpi_and_scale() {
        let mut layer = Layer::raster("L", LayerKind::Pattern, RgbaImage::new(10, 10), 254.0);
        layer.transform.scale = 2.0;
        let dims = SelectionDimensions::compute(200.0, 100.0, Some(&layer));
        assert!((dims.width_cm - 1.0).abs() < 1e-9);
        assert!((dims.height_cm - 0.5).abs() < 1e-9);
        assert_eq!(SelectionDimensions::compute(5.0, 5.0, None).width_cm, 0.0);
    }

    #[test]
    fn mask_subset() {
        let a = SelectionMask { width: 2, height: 1, bits: vec![true, false] };
        let b = SelectionMask { width: 2, height: 1, bits: vec![true, true] };
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
    }

    #[test]
    fn extraction_clips_to_polygon() {
        let mut layer = Layer::raster("L", LayerKind::Pattern, RgbaImage::from_pixel(10, 10, Rgba([5, 5, 5, 255])), 96.0);
        layer.transform.x = 5.0;
        layer.transform.y = 5.0;
        let triangle = [Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(0.0, 10.0)];
        let ex = extract_region(&layer, &triangle).unwrap();
        assert_eq!(ex.image.dimensions(), (10, 10));
        assert_eq!(ex.image.get_pixel(1, 1)[3], 255);
        assert_eq!(ex.image.get_pixel(9, 9)[3], 0);
    }

    fn engine_with_gray_layer() -> (CanvasEngine, LayerId) {
        let mut engine = CanvasEngine::default();
        let layer = Layer::raster("Photo", LayerKind::Pattern, RgbaImage::from_pixel(10, 10, Rgba([9, 9, 9, 255])), 96.0);
        let id = engine.add_layer(layer, LayerPlacement::At { x: 5.0, y: 5.0, scale: 1.0 }, "Add");
        (engine, id)
    }

    fn marquee(engine: &mut CanvasEngine, from: Point, to: Point) {
        engine.start_marquee(from);
        engine.update_marquee(to);
        assert!(engine.end_marquee());
    }

    #[test]
    fn cutout_moves_pixels_into_a_layer_over_the_selection() {
        let (mut engine, source) = engine_with_gray_layer();
        marquee(&mut engine, Point::new(2.0, 2.0), Point::new(6.0, 6.0));
        let cut = engine.cutout_selection().unwrap();

        let layer = engine.layer(cut).unwrap();
        assert_eq!(layer.name, "Photo Cutout");
        assert_eq!((layer.transform.x, layer.transform.y), (4.0, 4.0));
        let surface = layer.surface().unwrap();
        assert_eq!(surface.dimensions(), (4, 4));
        assert!(surface.pixels().all(|p| *p == Rgba([9, 9, 9, 255])));
        assert_eq!(engine.document().index_of(cut), Some(1));
        assert!(!engine.selection().is_active());

        let src = engine.layer(source).unwrap().surface().unwrap();
        assert_eq!(src.get_pixel(3, 3)[3], 0);
        assert_eq!(*src.get_pixel(7, 7), Rgba([9, 9, 9, 255]));

        assert!(engine.undo_layer(source));
        assert_eq!(*engine.layer(source).unwrap().surface().unwrap().get_pixel(3, 3), Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn duplicate_selection_leaves_source_alone() {
        let (mut engine, source) = engine_with_gray_layer();
        marquee(&mut engine, Point::new(0.0, 0.0), Point::new(5.0, 10.0));
        let copy = engine.duplicate_selection().unwrap();
        assert_eq!(engine.layer(copy).unwrap().surface().unwrap().dimensions(), (5, 10));
        assert_eq!(engine.layer(copy).unwrap().name, "Photo Copy");
        assert!(engine.layer(source).unwrap().surface().unwrap().pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn copy_then_paste_lands_at_document_center() {
        let (mut engine, _) = engine_with_gray_layer();
        assert!(engine.paste_selection().is_none());
        marquee(&mut engine, Point::new(2.0, 2.0), Point::new(6.0, 6.0));
        assert!(engine.copy_selection());
        assert!(!engine.selection().is_active());

        let pasted = engine.paste_selection().unwrap();
        let layer = engine.layer(pasted).unwrap();
        let center = engine.document().center();
        assert_eq!(layer.name, PASTED_LAYER_NAME);
        assert_eq!((layer.transform.x, layer.transform.y), (center.x, center.y));
        assert_eq!(layer.surface(), engine.clipboard().map(|c| &c.image));
        assert!(layer.surface().unwrap().pixels().all(|p| *p == Rgba([9, 9, 9, 255])));
        assert_eq!(engine.global_history_info().labels.last().map(String::as_str), Some("Paste Selection"));
    }

    #[test]
    fn lasso_needs_three_points() {
        let (mut engine, _) = engine_with_gray_layer();
        engine.start_lasso(Point::new(1.0, 1.0));
        engine.update_lasso(Point::new(8.0, 1.0));
        assert!(!engine.end_lasso());
        assert!(!engine.selection().is_active());
        assert!(engine.cutout_selection().is_none());

        engine.start_lasso(Point::new(1.0, 1.0));
        engine.update_lasso(Point::new(8.0, 1.0));
        engine.update_lasso(Point::new(1.0, 8.0));
        assert!(engine.end_lasso());
        assert!(engine.selection().is_active());
    }
}
