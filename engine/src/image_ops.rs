use image::{GrayImage, Rgba, RgbaImage};
use kurbo::Point;
use std::collections::VecDeque;
use crate::engine::CanvasEngine;
use crate::brush::{plan_brush_stroke, plan_eraser_stroke, rasterize_coverage};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    SourceOver,
    /// Removes destination alpha where the source covers it.
    DestinationOut,
}

/// Straight-alpha source-over of `src` onto `dst`, with `src` alpha scaled
/// by `opacity`.
pub fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>, opacity: f64) {
    let sa = src[3] as f64 / 255.0 * opacity;
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f64 / 255.0;
    let oa = sa + da * (1.0 - sa);
    for c in 0..3 {
        let v = (src[c] as f64 * sa + dst[c] as f64 * da * (1.0 - sa)) / oa;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (oa * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Applies a coverage mask in `color` at `opacity`. Returns whether any
/// pixel changed.
pub fn apply_coverage(surface: &mut RgbaImage, coverage: &GrayImage, color: [u8; 3], opacity: f64, mode: BlendMode) -> bool {
    let mut changed = false;
    for (px, cov) in surface.pixels_mut().zip(coverage.pixels()) {
        if cov[0] == 0 {
            continue;
        }
        let strength = cov[0] as f64 / 255.0 * opacity;
        let before = *px;
        match mode {
            BlendMode::SourceOver => blend_pixel(px, Rgba([color[0], color[1], color[2], 255]), strength),
            BlendMode::DestinationOut => {
                let a = (px[3] as f64 * (1.0 - strength)).round() as u8;
                px[3] = a;
                if a == 0 {
                    *px = Rgba([0, 0, 0, 0]);
                }
            }
        }
        changed |= *px != before;
    }
    changed
}

/// Euclidean distance over all four channels.
pub fn color_distance(a: &Rgba<u8>, b: &Rgba<u8>) -> f64 {
    (0..4)
        .map(|i| {
            let d = a[i] as f64 - b[i] as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

fn seed_pixel(surface: &RgbaImage, seed: Point) -> Option<(u32, u32)> {
    let (x, y) = (seed.x.floor(), seed.y.floor());
    if x < 0.0 || y < 0.0 || x >= surface.width() as f64 || y >= surface.height() as f64 {
        return None;
    }
    Some((x as u32, y as u32))
}

/// 4-connected flood fill from `seed` using an explicit stack. Pixels within
/// `tolerance` of the seed color become `color` at `alpha`. Returns false
/// when the seed is outside the surface or already has the fill value.
pub fn bucket_fill(surface: &mut RgbaImage, seed: Point, color: [u8; 3], alpha: u8, tolerance: f64) -> bool {
    let (sx, sy) = match seed_pixel(surface, seed) {
        Some(p) => p,
        None => return false,
    };
    let start = *surface.get_pixel(sx, sy);
    let fill = Rgba([color[0], color[1], color[2], alpha]);
    if start == fill {
        return false;
    }

    let (width, height) = surface.dimensions();
    let mut visited = vec![false; (width * height) as usize];
    let mut stack = vec![(sx as i64, sy as i64)];
    while let Some((x, y)) = stack.pop() {
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            continue;
        }
        let idx = (y as u32 * width + x as u32) as usize;
        if visited[idx] {
            continue;
        }
        visited[idx] = true;
        let px = surface.get_pixel_mut(x as u32, y as u32);
        if color_distance(px, &start) <= tolerance {
            *px = fill;
            stack.push((x + 1, y));
            stack.push((x - 1, y));
            stack.push((x, y + 1));
            stack.push((x, y - 1));
        }
    }
    true
}

/// Pixel mask of everything matching `target` within `tolerance`. When
/// `contiguous`, only the 4-connected region around `seed` is considered
/// (breadth-first).
pub fn flood_select(surface: &RgbaImage, seed: (u32, u32), target: Rgba<u8>, tolerance: f64, contiguous: bool) -> Vec<bool> {
    let (width, height) = surface.dimensions();
    let mut mask = vec![false; (width * height) as usize];
    if !contiguous {
        for (x, y, px) in surface.enumerate_pixels() {
            if color_distance(px, &target) <= tolerance {
                mask[(y * width + x) as usize] = true;
            }
        }
        return mask;
    }
    if seed.0 >= width || seed.1 >= height {
        return mask;
    }

    let mut visited = vec![false; mask.len()];
    let mut queue = VecDeque::new();
    queue.push_back(seed);
    visited[(seed.1 * width + seed.0) as usize] = true;
    while let Some((x, y)) = queue.pop_front() {
        if color_distance(surface.get_pixel(x, y), &target) > tolerance {
            continue;
        }
        mask[(y * width + x) as usize] = true;
        let neighbors = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbors {
            if nx < width && ny < height {
                let idx = (ny * width + nx) as usize;
                if !visited[idx] {
                    visited[idx] = true;
                    queue.push_back((nx, ny));
                }
            }
        }
    }
    mask
}

impl CanvasEngine {
    /// Brush size in the selected layer's local pixels.
    fn local_size(&self, size: f64, layer_scale: f64) -> f64 {
        size / layer_scale / self.viewport.zoom
    }

    /// Paints a stroke (layer-local points) on the selected raster layer in
    /// the primary color.
    pub fn paint_stroke(&mut self, points: &[Point]) -> bool {
        let id = match self.selected_layer_id {
            Some(id) => id,
            None => return false,
        };
        let brush = self.config.brush.clone();
        let color = self.config.primary_rgb();
        let scale = match self.document.layer(id) {
            Some(l) if l.surface().is_some() => l.transform.scale,
            _ => return false,
        };
        let base_size = self.local_size(brush.size, scale);
        let segments = plan_brush_stroke(points, &brush, base_size);
        if segments.is_empty() {
            return false;
        }

        let pre = self.layer_snapshot(id);
        let changed = match self.document.layer_mut(id) {
            Some(layer) => {
                let changed = match layer.surface_mut() {
                    Some(surface) => {
                        let coverage = rasterize_coverage(&segments, surface.width(), surface.height());
                        apply_coverage(surface, &coverage, color, brush.opacity, BlendMode::SourceOver)
                    }
                    None => false,
                };
                layer.touch();
                changed
            }
            None => false,
        };
        log::debug!("brush stroke on {} ({} segments, changed: {})", id, segments.len(), changed);
        if let Some(pre) = pre {
            self.finish_layer_edit(pre, "Brush");
        }
        changed
    }

    /// Erases along a stroke (layer-local points) on the selected raster
    /// layer.
    pub fn erase_stroke(&mut self, points: &[Point]) -> bool {
        let id = match self.selected_layer_id {
            Some(id) => id,
            None => return false,
        };
        let eraser = self.config.eraser.clone();
        let scale = match self.document.layer(id) {
            Some(l) if l.surface().is_some() => l.transform.scale,
            _ => return false,
        };
        let segments = plan_eraser_stroke(points, self.local_size(eraser.size, scale));
        if segments.is_empty() {
            return false;
        }

        let pre = self.layer_snapshot(id);
        let changed = match self.document.layer_mut(id) {
            Some(layer) => {
                let changed = match layer.surface_mut() {
                    Some(surface) => {
                        let coverage = rasterize_coverage(&segments, surface.width(), surface.height());
                        apply_coverage(surface, &coverage, [0, 0, 0], eraser.opacity, BlendMode::DestinationOut)
                    }
                    None => false,
                };
                layer.touch();
                changed
            }
            None => false,
        };
        if let Some(pre) = pre {
            self.finish_layer_edit(pre, "Eraser");
        }
        changed
    }

    /// Bucket fill at a layer-local point of the selected raster layer.
    pub fn fill_at(&mut self, local: Point) -> bool {
        let id = match self.selected_layer_id {
            Some(id) => id,
            None => return false,
        };
        let color = self.config.primary_rgb();
        let alpha = (255.0 * self.config.brush.opacity).round() as u8;
        let tolerance = self.config.fill_tolerance;
        let pre = match self.layer_snapshot(id) {
            Some(pre) => pre,
            None => return false,
        };
        let changed = match self.document.layer_mut(id) {
            Some(layer) => {
                let filled = layer.surface_mut().map(|s| bucket_fill(s, local, color, alpha, tolerance)).unwrap_or(false);
                if filled {
                    layer.touch();
                }
                filled
            }
            None => false,
        };
        if changed {
            log::debug!("bucket fill on {} at ({}, {})", id, local.x, local.y);
            self.finish_layer_edit(pre, "Fill");
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_uniform_surface() {
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        assert!(bucket_fill(&mut img, Point::new(5.0, 5.0), [0, 0, 0], 255, 30.0));
        assert!(img.pixels().all(|p| *p == Rgba([0, 0, 0, 255])));
    }

    #[test]
    fn fill_respects_tolerance() {
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        img.put_pixel(2, 2, Rgba([250, 255, 255, 255]));
        assert!(bucket_fill(&mut img, Point::new(5.0, 5.0), [0, 0, 0], 255, 0.0));
        assert_eq!(*img.get_pixel(2, 2), Rgba([250, 255, 255, 255]));
        assert_eq!(img.pixels().filter(|p| **p == Rgba([0, 0, 0, 255])).count(), 99);
    }

    #[test]
    fn fill_is_noop_on_same_color() {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        assert!(!bucket_fill(&mut img, Point::new(1.0, 1.0), [0, 0, 0], 255, 30.0));
        assert!(!bucket_fill(&mut img, Point::new(-1.0, 1.0), [9, 9, 9], 255, 30.0));
    }

    #[test]
    fn fill_stops_at_borders() {
        let mut img = RgbaImage::from_pixel(5, 5, Rgba([255, 255, 255, 255]));
        for y in 0..5 {
            img.put_pixel(2, y, Rgba([0, 0, 0, 255]));
        }
        bucket_fill(&mut img, Point::new(0.0, 0.0), [255, 0, 0], 255, 30.0);
        assert_eq!(*img.get_pixel(1, 4), Rgba([255, 0, 0, 255]));
        assert_eq!(*img.get_pixel(3, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn blend_over_transparent_keeps_color() {
        let mut px = Rgba([0, 0, 0, 0]);
        blend_pixel(&mut px, Rgba([200, 100, 50, 255]), 0.5);
        assert_eq!(px, Rgba([200, 100, 50, 128]));
    }

    #[test]
    fn destination_out_clears_alpha() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([10, 20, 30, 255]));
        let mut cov = GrayImage::new(2, 1);
        cov.put_pixel(0, 0, image::Luma([255]));
        assert!(apply_coverage(&mut img, &cov, [0, 0, 0], 1.0, BlendMode::DestinationOut));
        assert_eq!(*img.get_pixel(0, 0), Rgba([0, 0, 0, 0]));
        assert_eq!(*img.get_pixel(1, 0), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn flood_select_contiguous_vs_global() {
        let mut img = RgbaImage::from_pixel(5, 1, Rgba([255, 255, 255, 255]));
        img.put_pixel(2, 0, Rgba([0, 0, 0, 255]));
        let target = Rgba([255, 255, 255, 255]);
        let local = flood_select(&img, (0, 0), target, 10.0, true);
        assert_eq!(local, vec![true, true, false, false, false]);
        let global = flood_select(&img, (0, 0), target, 10.0, false);
        assert_eq!(global, vec![true, true, false, true, true]);
    }

    fn engine_with_raster(size: u32) -> (CanvasEngine, crate::types::LayerId) {
        use crate::layer::Layer;
        use crate::layer_ops::LayerPlacement;
        use crate::types::LayerKind;
        let mut engine = CanvasEngine::default();
        let layer = Layer::raster("Paint", LayerKind::Drawing, RgbaImage::from_pixel(size, size, Rgba([10, 20, 30, 255])), 96.0);
        let id = engine.add_layer(layer, LayerPlacement::DocumentCenter, "Add");
        (engine, id)
    }

    #[test]
    fn eraser_dot_clears_alpha() {
        let (mut engine, id) = engine_with_raster(40);
        assert!(engine.erase_stroke(&[Point::new(10.0, 10.0)]));
        let surface = engine.layer(id).unwrap().surface().unwrap();
        assert_eq!(surface.get_pixel(10, 10)[3], 0);
        assert_eq!(*surface.get_pixel(39, 39), Rgba([10, 20, 30, 255]));
        assert_eq!(engine.layer_history_info(id).labels.last().map(String::as_str), Some("Eraser"));
    }

    #[test]
    fn strokes_bump_version_even_off_surface() {
        let (mut engine, id) = engine_with_raster(10);
        let before = engine.layer(id).unwrap().version;
        let outside = [Point::new(500.0, 500.0), Point::new(600.0, 500.0)];
        assert!(!engine.erase_stroke(&outside));
        assert!(!engine.paint_stroke(&outside));
        assert_eq!(engine.layer(id).unwrap().version, before + 2);
        assert_eq!(engine.layer_history_info(id).labels, vec!["Created".to_string()]);
    }
}
