use serde::{Serialize, Deserialize};
use image::{GrayImage, Luma};
use kurbo::{Affine, BezPath, Ellipse, Point, Rect, Shape};
use std::f64::consts::PI;
use crate::engine::CanvasEngine;
use crate::image_ops::{apply_coverage, BlendMode};
use crate::types::Tool;

const STAR_SPIKES: usize = 5;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    #[default]
    Rectangle,
    Circle,
    Rhombus,
    Star,
}

impl ShapeKind {
    pub fn name(self) -> &'static str {
        match self {
            ShapeKind::Rectangle => "Rectangle",
            ShapeKind::Circle => "Circle",
            ShapeKind::Rhombus => "Rhombus",
            ShapeKind::Star => "Star",
        }
    }

    /// Closed outline for a drag from `start` to `end`.
    pub fn outline(self, start: Point, end: Point) -> BezPath {
        let rect = Rect::from_points(start, end);
        let center = rect.center();
        match self {
            ShapeKind::Rectangle => rect.to_path(0.1),
            ShapeKind::Circle => Ellipse::from_rect(rect).to_path(0.1),
            ShapeKind::Rhombus => {
                let mut path = BezPath::new();
                path.move_to((center.x, rect.y0));
                path.line_to((rect.x1, center.y));
                path.line_to((center.x, rect.y1));
                path.line_to((rect.x0, center.y));
                path.close_path();
                path
            }
            ShapeKind::Star => {
                // Outer radius spans the longer side; inner is half of it.
                let outer = rect.width().max(rect.height()) / 2.0;
                let inner = outer / 2.0;
                let mut path = BezPath::new();
                for i in 0..STAR_SPIKES * 2 {
                    let angle = i as f64 * PI / STAR_SPIKES as f64 - PI / 2.0;
                    let r = if i % 2 == 0 { outer } else { inner };
                    let p = Point::new(center.x + r * angle.cos(), center.y + r * angle.sin());
                    if i == 0 {
                        path.move_to(p);
                    } else {
                        path.line_to(p);
                    }
                }
                path.close_path();
                path
            }
        }
    }
}

/// Hard-edged coverage of a filled path, sampled at pixel centers.
pub fn fill_coverage(path: &BezPath, width: u32, height: u32) -> GrayImage {
    let mut coverage = GrayImage::new(width, height);
    let bounds = path.bounding_box();
    let x0 = bounds.x0.floor().max(0.0) as u32;
    let y0 = bounds.y0.floor().max(0.0) as u32;
    let x1 = (bounds.x1.ceil().max(0.0) as u32).min(width);
    let y1 = (bounds.y1.ceil().max(0.0) as u32).min(height);
    for y in y0..y1 {
        for x in x0..x1 {
            if path.contains(Point::new(x as f64 + 0.5, y as f64 + 0.5)) {
                coverage.put_pixel(x, y, Luma([255]));
            }
        }
    }
    coverage
}

impl CanvasEngine {
    pub fn shape_kind(&self) -> ShapeKind {
        self.shape_kind
    }

    pub fn set_active_shape_tool(&mut self, kind: ShapeKind) {
        self.set_active_tool(Tool::Shape);
        self.shape_kind = kind;
    }

    /// Fills the current shape spanning `start`..`end` (layer-local) on the
    /// selected raster layer in the primary color.
    pub fn draw_shape(&mut self, start: Point, end: Point) -> bool {
        let id = match self.selected_layer_id {
            Some(id) => id,
            None => return false,
        };
        let kind = self.shape_kind;
        let color = self.config.primary_rgb();
        let pre = match self.layer_snapshot(id) {
            Some(pre) => pre,
            None => return false,
        };
        let changed = match self.document.layer_mut(id) {
            Some(layer) => {
                let (w, h) = layer.local_size();
                let changed = match layer.surface_mut() {
                    Some(surface) => {
                        let mut path = kind.outline(start, end);
                        path.apply_affine(Affine::scale_non_uniform(
                            surface.width() as f64 / w.max(f64::EPSILON),
                            surface.height() as f64 / h.max(f64::EPSILON),
                        ));
                        let coverage = fill_coverage(&path, surface.width(), surface.height());
                        apply_coverage(surface, &coverage, color, 1.0, BlendMode::SourceOver)
                    }
                    None => false,
                };
                if changed {
                    layer.touch();
                }
                changed
            }
            None => false,
        };
        if changed {
            log::debug!("drew {} on {}", kind.name(), id);
            self.finish_layer_edit(pre, &format!("Draw {}", kind.name()));
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use crate::layer::Layer;
    use crate::layer_ops::LayerPlacement;
    use crate::types::LayerKind;

    fn coverage_of(kind: ShapeKind) -> GrayImage {
        fill_coverage(&kind.outline(Point::new(0.0, 0.0), Point::new(20.0, 20.0)), 20, 20)
    }

    fn covered(img: &GrayImage, x: u32, y: u32) -> bool {
        img.get_pixel(x, y)[0] == 255
    }

    #[test]
    fn rectangle_fills_drag_box() {
        let cov = fill_coverage(&ShapeKind::Rectangle.outline(Point::new(8.0, 6.0), Point::new(2.0, 1.0)), 10, 10);
        let count = cov.pixels().filter(|p| p[0] == 255).count();
        assert_eq!(count, 6 * 5);
        assert!(covered(&cov, 2, 1) && covered(&cov, 7, 5));
        assert!(!covered(&cov, 8, 6));
    }

    #[test]
    fn circle_and_rhombus_leave_corners_empty() {
        for kind in [ShapeKind::Circle, ShapeKind::Rhombus] {
            let cov = coverage_of(kind);
            assert!(covered(&cov, 10, 10), "{:?} center", kind);
            assert!(!covered(&cov, 0, 0) && !covered(&cov, 19, 19), "{:?} corners", kind);
        }
    }

    #[test]
    fn star_has_five_spikes() {
        let path = ShapeKind::Star.outline(Point::new(0.0, 0.0), Point::new(20.0, 20.0));
        assert_eq!(path.elements().len(), STAR_SPIKES * 2 + 1);
        let cov = coverage_of(ShapeKind::Star);
        assert!(covered(&cov, 10, 10));
        // Top spike tip is at (10, 0); beside it lies between spikes.
        assert!(covered(&cov, 9, 2) || covered(&cov, 10, 2));
        assert!(!covered(&cov, 3, 3));
    }

    #[test]
    fn draw_shape_records_one_entry() {
        let mut engine = CanvasEngine::default();
        let layer = Layer::raster("Ink", LayerKind::Drawing, RgbaImage::new(20, 20), 96.0);
        let id = engine.add_layer(layer, LayerPlacement::DocumentCenter, "Add");
        engine.set_active_shape_tool(ShapeKind::Rhombus);
        assert_eq!(engine.active_tool(), Tool::Shape);
        assert_eq!(engine.shape_kind(), ShapeKind::Rhombus);

        assert!(engine.draw_shape(Point::new(0.0, 0.0), Point::new(20.0, 20.0)));
        let surface = engine.layer(id).unwrap().surface().unwrap();
        assert_eq!(*surface.get_pixel(10, 10), Rgba([0, 0, 0, 255]));
        assert_eq!(surface.get_pixel(0, 0)[3], 0);
        assert_eq!(engine.layer_history_info(id).labels, vec!["Created".to_string(), "Draw Rhombus".to_string()]);

        assert!(!engine.draw_shape(Point::new(5.0, 5.0), Point::new(5.0, 5.0)));
        assert!(engine.undo());
        assert_eq!(engine.layer(id).unwrap().surface().unwrap().get_pixel(10, 10)[3], 0);
    }
}
