use image::{GrayImage, Luma};
use kurbo::{Point, Rect};
use crate::config::BrushSettings;
use crate::tracer::segment_distance;

/// A round-capped piece of a stroke. `width` is the full line width;
/// `blur` is the softness radius applied around it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeSegment {
    pub from: Point,
    pub to: Point,
    pub width: f64,
    pub blur: f64,
}

impl StrokeSegment {
    pub fn dot(center: Point, radius: f64, blur: f64) -> Self {
        Self { from: center, to: center, width: radius * 2.0, blur }
    }

    fn bounds(&self) -> Rect {
        let pad = self.width / 2.0 + self.blur * 1.5 + 1.0;
        Rect::from_points(self.from, self.to).inflate(pad, pad)
    }
}

/// Thickness multiplier at `progress` (0..1 along the stroke): ramps up
/// over the first `taper` percent, down over the last, clamped to [0.1, 1].
pub fn taper_multiplier(progress: f64, taper: f64) -> f64 {
    let start = taper / 100.0;
    let end = 1.0 - start;
    let mut t = 1.0;
    if progress < start {
        t = progress / start;
    } else if progress > end && start > 0.0 {
        t = (1.0 - progress) / start;
    }
    t.clamp(0.1, 1.0)
}

/// Faster pointer movement (longer segments) gives a thinner line.
pub fn speed_width(base_size: f64, segment_length: f64, sensitivity: f64) -> f64 {
    base_size / (1.0 + segment_length.max(0.1) * sensitivity)
}

/// Lays out a brush stroke in layer-local coordinates. `base_size` is the
/// brush size already divided by layer scale and zoom.
pub fn plan_brush_stroke(points: &[Point], brush: &BrushSettings, base_size: f64) -> Vec<StrokeSegment> {
    let softness = 1.0 - brush.hardness;
    match points {
        [] => Vec::new(),
        [p] => {
            let amount = if brush.taper > 0.0 { (1.0 - brush.taper / 100.0) / 2.0 } else { 1.0 };
            let radius = (base_size / 2.0 * amount).max(0.5);
            vec![StrokeSegment::dot(*p, radius, softness * radius)]
        }
        _ => {
            let total: f64 = points.windows(2).map(|w| (w[1] - w[0]).hypot()).sum();
            let mut travelled = 0.0;
            let mut segments = Vec::with_capacity(points.len() - 1);
            for w in points.windows(2) {
                let length = (w[1] - w[0]).hypot();
                let taper = if total > 0.0 { taper_multiplier(travelled / total, brush.taper) } else { 1.0 };
                let width = (speed_width(base_size, length, brush.sensitivity) * taper).max(0.5);
                segments.push(StrokeSegment { from: w[0], to: w[1], width, blur: softness * width / 2.0 });
                travelled += length;
            }
            segments
        }
    }
}

/// Eraser geometry: constant width, hard edge.
pub fn plan_eraser_stroke(points: &[Point], width: f64) -> Vec<StrokeSegment> {
    match points {
        [] => Vec::new(),
        [p] => vec![StrokeSegment::dot(*p, width / 2.0, 0.0)],
        _ => points.windows(2).map(|w| StrokeSegment { from: w[0], to: w[1], width, blur: 0.0 }).collect(),
    }
}

/// Per-pixel stroke coverage for a `width` x `height` surface. Overlapping
/// segments do not accumulate; each pixel keeps its strongest coverage.
pub fn rasterize_coverage(segments: &[StrokeSegment], width: u32, height: u32) -> GrayImage {
    let mut coverage = GrayImage::new(width, height);
    let surface = Rect::new(0.0, 0.0, width as f64, height as f64);
    for seg in segments {
        let area = seg.bounds().intersect(surface);
        if area.width() <= 0.0 || area.height() <= 0.0 {
            continue;
        }
        let x0 = area.x0.floor() as u32;
        let y0 = area.y0.floor() as u32;
        let x1 = (area.x1.ceil() as u32).min(width);
        let y1 = (area.y1.ceil() as u32).min(height);
        let mut stamp = GrayImage::new(x1 - x0, y1 - y0);
        let radius = seg.width / 2.0;
        for (sx, sy, px) in stamp.enumerate_pixels_mut() {
            let center = Point::new((x0 + sx) as f64 + 0.5, (y0 + sy) as f64 + 0.5);
            let d = segment_distance(center, seg.from, seg.to);
            let c = (radius + 0.5 - d).clamp(0.0, 1.0);
            *px = Luma([(c * 255.0).round() as u8]);
        }
        if seg.blur > 0.0 {
            // Soft halo like a canvas shadow blur: sigma is half the blur radius.
            let halo = image::imageops::blur(&stamp, (seg.blur / 2.0) as f32);
            for (sharp, soft) in stamp.pixels_mut().zip(halo.pixels()) {
                sharp[0] = sharp[0].max(soft[0]);
            }
        }
        for (sx, sy, px) in stamp.enumerate_pixels() {
            let target = coverage.get_pixel_mut(x0 + sx, y0 + sy);
            target[0] = target[0].max(px[0]);
        }
    }
    coverage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taper_ramps_at_both_ends() {
        assert_eq!(taper_multiplier(0.0, 20.0), 0.1);
        assert!((taper_multiplier(0.1, 20.0) - 0.5).abs() < 1e-9);
        assert_eq!(taper_multiplier(0.5, 20.0), 1.0);
        assert!((taper_multiplier(0.9, 20.0) - 0.5).abs() < 1e-9);
        assert_eq!(taper_multiplier(0.3, 0.0), 1.0);
    }

    #[test]
    fn speed_thins_the_line() {
        assert!(speed_width(20.0, 30.0, 0.5) < speed_width(20.0, 2.0, 0.5));
        assert!((speed_width(20.0, 0.0, 0.5) - 20.0 / 1.05).abs() < 1e-9);
    }

    #[test]
    fn single_point_is_a_disc() {
        let brush = BrushSettings { taper: 0.0, ..BrushSettings::default() };
        let segs = plan_brush_stroke(&[Point::new(5.0, 5.0)], &brush, 8.0);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].width, 8.0);
        let tapered = plan_brush_stroke(&[Point::new(5.0, 5.0)], &BrushSettings::default(), 20.0);
        assert!((tapered[0].width - 2.0).abs() < 1e-9);
        let tiny = plan_brush_stroke(&[Point::new(5.0, 5.0)], &BrushSettings::default(), 2.0);
        assert_eq!(tiny[0].width, 1.0);
    }

    #[test]
    fn coverage_is_clipped_to_surface() {
        let segs = plan_eraser_stroke(&[Point::new(-5.0, 2.0), Point::new(3.0, 2.0)], 4.0);
        let cov = rasterize_coverage(&segs, 6, 6);
        assert_eq!(cov.get_pixel(0, 2)[0], 255);
        assert_eq!(cov.get_pixel(5, 5)[0], 0);
    }
}
