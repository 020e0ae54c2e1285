use image::{Rgba, RgbaImage};
use kurbo::{PathEl, Point, Vec2};
use crate::brush::{rasterize_coverage, StrokeSegment};
use crate::image_ops::{apply_coverage, blend_pixel, BlendMode};
use crate::layer::Layer;
use crate::path::{to_bez_path, PathPoint};
use crate::types::Adjustments;

/// Scale at which vector layers are stroked for export.
pub const VECTOR_EXPORT_SCALE: f64 = 3.0;

type Matrix3 = [[f64; 3]; 3];

fn apply_matrix(rgb: [f64; 3], m: &Matrix3) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (i, row) in m.iter().enumerate() {
        out[i] = (row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2]).clamp(0.0, 1.0);
    }
    out
}

fn grayscale_matrix(amount: f64) -> Matrix3 {
    let a = 1.0 - amount;
    [
        [0.2126 + 0.7874 * a, 0.7152 - 0.7152 * a, 0.0722 - 0.0722 * a],
        [0.2126 - 0.2126 * a, 0.7152 + 0.2848 * a, 0.0722 - 0.0722 * a],
        [0.2126 - 0.2126 * a, 0.7152 - 0.7152 * a, 0.0722 + 0.9278 * a],
    ]
}

fn sepia_matrix(amount: f64) -> Matrix3 {
    let a = 1.0 - amount;
    [
        [0.393 + 0.607 * a, 0.769 - 0.769 * a, 0.189 - 0.189 * a],
        [0.349 - 0.349 * a, 0.686 + 0.314 * a, 0.168 - 0.168 * a],
        [0.272 - 0.272 * a, 0.534 - 0.534 * a, 0.131 + 0.869 * a],
    ]
}

fn saturate_matrix(s: f64) -> Matrix3 {
    [
        [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
        [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
    ]
}

/// Filter chain in CSS order: grayscale, sepia, saturate, contrast,
/// brightness, invert. Alpha is untouched.
pub fn apply_filters(px: Rgba<u8>, adj: &Adjustments) -> Rgba<u8> {
    if adj.is_identity() {
        return px;
    }
    let mut rgb = [px[0] as f64 / 255.0, px[1] as f64 / 255.0, px[2] as f64 / 255.0];
    if adj.grayscale > 0.0 {
        rgb = apply_matrix(rgb, &grayscale_matrix((adj.grayscale / 100.0).min(1.0)));
    }
    if adj.sepia > 0.0 {
        rgb = apply_matrix(rgb, &sepia_matrix((adj.sepia / 100.0).min(1.0)));
    }
    if adj.saturate != 100.0 {
        rgb = apply_matrix(rgb, &saturate_matrix(adj.saturate / 100.0));
    }
    let contrast = adj.contrast / 100.0;
    let brightness = adj.brightness / 100.0;
    let invert = (adj.invert / 100.0).min(1.0);
    for v in rgb.iter_mut() {
        *v = (*v * contrast + 0.5 - 0.5 * contrast).clamp(0.0, 1.0);
        *v = (*v * brightness).clamp(0.0, 1.0);
        *v = invert + *v * (1.0 - 2.0 * invert);
    }
    Rgba([
        (rgb[0] * 255.0).round() as u8,
        (rgb[1] * 255.0).round() as u8,
        (rgb[2] * 255.0).round() as u8,
        px[3],
    ])
}

/// Nearest-neighbor lookup of a layer-local point. The local box may differ
/// from the surface size; coordinates are rescaled.
pub fn sample_local(layer: &Layer, local: Point) -> Option<Rgba<u8>> {
    let surface = layer.surface()?;
    let (w, h) = layer.local_size();
    if w <= 0.0 || h <= 0.0 || local.x < 0.0 || local.y < 0.0 || local.x >= w || local.y >= h {
        return None;
    }
    let sx = (local.x * surface.width() as f64 / w).floor() as u32;
    let sy = (local.y * surface.height() as f64 / h).floor() as u32;
    if sx >= surface.width() || sy >= surface.height() {
        return None;
    }
    Some(*surface.get_pixel(sx, sy))
}

/// Composites a raster layer at its world transform onto `target`, whose
/// pixel (0, 0) sits at world position `origin`.
pub fn draw_layer_onto(target: &mut RgbaImage, origin: Point, layer: &Layer, opacity: f64) {
    draw_layer(target, origin, layer, opacity, None);
}

fn draw_layer(target: &mut RgbaImage, origin: Point, layer: &Layer, opacity: f64, filters: Option<&Adjustments>) {
    if layer.surface().is_none() {
        return;
    }
    let to_local = layer.local_to_world_affine().inverse();
    for (x, y, px) in target.enumerate_pixels_mut() {
        let world = origin + Vec2::new(x as f64 + 0.5, y as f64 + 0.5);
        if let Some(src) = sample_local(layer, to_local * world) {
            let src = match filters {
                Some(adj) => apply_filters(src, adj),
                None => src,
            };
            blend_pixel(px, src, opacity);
        }
    }
}

/// Flattens the visible raster layers, bottom to top, with their opacity
/// and filter adjustments into a `width` x `height` image whose pixel
/// (0, 0) sits at world position `origin`. Vector layers are skipped.
pub fn composite_visible(layers: &[Layer], origin: Point, width: u32, height: u32) -> RgbaImage {
    let mut out = RgbaImage::new(width.max(1), height.max(1));
    for layer in layers.iter().filter(|l| l.visible) {
        draw_layer(&mut out, origin, layer, layer.opacity, Some(&layer.adjustments));
    }
    out
}

/// Strokes a path onto a transparent `width` x `height` surface, with path
/// coordinates multiplied by `scale`.
pub fn stroke_path(points: &[PathPoint], width: u32, height: u32, scale: f64, stroke_width: f64, color: [u8; 3]) -> RgbaImage {
    let mut bez = to_bez_path(points);
    bez.apply_affine(kurbo::Affine::scale(scale));
    let line_width = stroke_width * scale;

    let mut segments = Vec::new();
    let mut start = None;
    let mut last = None;
    bez.flatten(0.25, |el| match el {
        PathEl::MoveTo(p) => {
            start = Some(p);
            last = Some(p);
        }
        PathEl::LineTo(p) => {
            if let Some(from) = last {
                segments.push(StrokeSegment { from, to: p, width: line_width, blur: 0.0 });
            }
            last = Some(p);
        }
        PathEl::ClosePath => {
            if let (Some(from), Some(to)) = (last, start) {
                segments.push(StrokeSegment { from, to, width: line_width, blur: 0.0 });
            }
            last = start;
        }
        _ => {}
    });

    let mut surface = RgbaImage::new(width.max(1), height.max(1));
    let coverage = rasterize_coverage(&segments, surface.width(), surface.height());
    apply_coverage(&mut surface, &coverage, color, 1.0, BlendMode::SourceOver);
    surface
}

/// Renders a layer for export. Raster layers come out at their world size
/// with rotation, flips and filter adjustments applied; vector layers are
/// stroked at `VECTOR_EXPORT_SCALE` times their world size.
pub fn render_layer_export(layer: &Layer, stroke_color: [u8; 3]) -> Option<RgbaImage> {
    let (w, h) = layer.local_size();
    let scale = layer.transform.scale;
    if let Some(vector) = layer.vector_content() {
        let points = crate::path::parse(&vector.path_data);
        let factor = scale * VECTOR_EXPORT_SCALE;
        let out_w = (w * factor).round().max(1.0) as u32;
        let out_h = (h * factor).round().max(1.0) as u32;
        return Some(stroke_path(&points, out_w, out_h, factor, vector.stroke_width, stroke_color));
    }

    layer.surface()?;
    let out_w = (w * scale).round().max(1.0) as u32;
    let out_h = (h * scale).round().max(1.0) as u32;
    let mut out = RgbaImage::new(out_w, out_h);
    let center = Vec2::new(out_w as f64 / 2.0, out_h as f64 / 2.0);
    let (sin, cos) = (-layer.transform.rotation).sin_cos();
    let flip_x = if layer.adjustments.flip_h { -1.0 } else { 1.0 };
    let flip_y = if layer.adjustments.flip_v { -1.0 } else { 1.0 };
    for (x, y, px) in out.enumerate_pixels_mut() {
        let d = Vec2::new(x as f64 + 0.5, y as f64 + 0.5) - center;
        let r = Vec2::new(d.x * cos - d.y * sin, d.x * sin + d.y * cos);
        let local = Point::new(r.x * flip_x / scale + w / 2.0, r.y * flip_y / scale + h / 2.0);
        if let Some(src) = sample_local(layer, local) {
            *px = apply_filters(src, &layer.adjustments);
        }
    }
    Some(out)
}
