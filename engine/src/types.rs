use serde::{Serialize, Deserialize};
use kurbo::{Point, Rect, Size};
use uuid::Uuid;

pub type LayerId = Uuid;
pub type FolderId = Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Background,
    Pattern,
    Drawing,
    Vector,
}

impl LayerKind {
    pub fn is_raster(self) -> bool {
        !matches!(self, LayerKind::Vector)
    }
}

/// World placement of a layer. `x`/`y` is the world-space center of the
/// layer's local box, `rotation` is in radians and `scale` is uniform.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct Transform {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub rotation: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, scale: 1.0, rotation: 0.0 }
    }
}

/// Filter adjustments, percentages as used by CSS filter functions.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct Adjustments {
    pub grayscale: f64,
    pub sepia: f64,
    pub saturate: f64,
    pub contrast: f64,
    pub brightness: f64,
    pub invert: f64,
    pub flip_h: bool,
    pub flip_v: bool,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            grayscale: 0.0,
            sepia: 0.0,
            saturate: 100.0,
            contrast: 100.0,
            brightness: 100.0,
            invert: 0.0,
            flip_h: false,
            flip_v: false,
        }
    }
}

impl Adjustments {
    pub fn is_identity(&self) -> bool {
        *self == Adjustments { flip_h: self.flip_h, flip_v: self.flip_v, ..Adjustments::default() }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug, Default)]
#[serde(default)]
pub struct AdjustmentsUpdate {
    pub grayscale: Option<f64>,
    pub sepia: Option<f64>,
    pub saturate: Option<f64>,
    pub contrast: Option<f64>,
    pub brightness: Option<f64>,
    pub invert: Option<f64>,
    pub flip_h: Option<bool>,
    pub flip_v: Option<bool>,
}

impl AdjustmentsUpdate {
    pub fn apply_to(&self, adj: &mut Adjustments) {
        let percent = |v: Option<f64>| v.filter(|v| v.is_finite()).map(|v| v.max(0.0));
        if let Some(v) = percent(self.grayscale) { adj.grayscale = v.min(100.0); }
        if let Some(v) = percent(self.sepia) { adj.sepia = v.min(100.0); }
        if let Some(v) = percent(self.saturate) { adj.saturate = v; }
        if let Some(v) = percent(self.contrast) { adj.contrast = v; }
        if let Some(v) = percent(self.brightness) { adj.brightness = v; }
        if let Some(v) = percent(self.invert) { adj.invert = v.min(100.0); }
        if let Some(v) = self.flip_h { adj.flip_h = v; }
        if let Some(v) = self.flip_v { adj.flip_v = v; }
    }
}

/// The local, unrotated and unscaled box of a layer.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct LayerMetadata {
    pub dpi: f64,
    pub original_width: f64,
    pub original_height: f64,
}

impl Default for LayerMetadata {
    fn default() -> Self {
        Self { dpi: 96.0, original_width: 0.0, original_height: 0.0 }
    }
}

impl LayerMetadata {
    pub fn new(dpi: f64, original_width: f64, original_height: f64) -> Self {
        Self { dpi, original_width, original_height }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Px,
    Cm,
    In,
}

impl Unit {
    /// Converts a length in this unit to whole pixels at `dpi`.
    pub fn to_pixels(self, value: f64, dpi: f64) -> u32 {
        let px = match self {
            Unit::Px => value.round(),
            Unit::Cm => (value * dpi / 2.54).round(),
            Unit::In => (value * dpi).round(),
        };
        px.max(1.0) as u32
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct Viewport {
    pub pan_x: f64,
    pub pan_y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { pan_x: 0.0, pan_y: 0.0, zoom: 1.0 }
    }
}

impl Viewport {
    pub const MIN_ZOOM: f64 = 0.02;
    pub const MAX_ZOOM: f64 = 10.0;
    /// Framing never zooms in further than this.
    pub const MAX_FIT_ZOOM: f64 = 2.0;

    pub fn screen_to_world(&self, p: Point) -> Point {
        Point::new((p.x - self.pan_x) / self.zoom, (p.y - self.pan_y) / self.zoom)
    }

    /// Zooms by `factor` keeping the world point under `screen` fixed.
    pub fn zoom_at(&mut self, factor: f64, screen: Point) {
        let world = self.screen_to_world(screen);
        let zoom = (self.zoom * factor).clamp(Self::MIN_ZOOM, Self::MAX_ZOOM);
        self.pan_x = screen.x - world.x * zoom;
        self.pan_y = screen.y - world.y * zoom;
        self.zoom = zoom;
    }

    /// Zooms about the middle of a `screen`-sized canvas.
    pub fn zoom_centered(&mut self, factor: f64, screen: Size) {
        self.zoom_at(factor, Point::new(screen.width / 2.0, screen.height / 2.0));
    }

    /// Centers `rect` on the canvas, scaled to take `padding` of it.
    pub fn fit_rect(&mut self, rect: Rect, screen: Size, padding: f64) -> bool {
        if !(rect.width() > 0.0 && rect.height() > 0.0 && screen.width > 0.0 && screen.height > 0.0) {
            return false;
        }
        let zoom = (screen.width * padding / rect.width())
            .min(screen.height * padding / rect.height())
            .clamp(Self::MIN_ZOOM, Self::MAX_FIT_ZOOM);
        let center = rect.center();
        self.zoom = zoom;
        self.pan_x = screen.width / 2.0 - center.x * zoom;
        self.pan_y = screen.height / 2.0 - center.y * zoom;
        true
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    #[default]
    Move,
    Brush,
    Eraser,
    Bucket,
    MagicWand,
    Marquee,
    Lasso,
    DirectSelect,
    Shape,
}

impl Tool {
    pub fn keeps_selection(self) -> bool {
        matches!(self, Tool::Marquee | Tool::Lasso | Tool::MagicWand | Tool::DirectSelect)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum FlipAxis {
    Horizontal,
    Vertical,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug, Default)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut rect = Rect::from_points(*first, *first);
        for p in &points[1..] {
            rect = rect.union_pt(*p);
        }
        Some(rect.into())
    }

    pub fn extend(&mut self, p: Point) {
        *self = self.to_rect().union_pt(p).into();
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

impl From<Rect> for BoundingBox {
    fn from(r: Rect) -> Self {
        Self { x: r.x0, y: r.y0, width: r.width(), height: r.height() }
    }
}

/// Parses `#rrggbb` (leading `#` optional).
pub fn parse_hex_color(hex: &str) -> Option<[u8; 3]> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_conversion_rounds_to_pixels() {
        assert_eq!(Unit::Px.to_pixels(800.0, 72.0), 800);
        assert_eq!(Unit::Px.to_pixels(799.6, 72.0), 800);
        assert_eq!(Unit::Px.to_pixels(0.2, 72.0), 1);
        assert_eq!(Unit::In.to_pixels(2.0, 300.0), 600);
        assert_eq!(Unit::Cm.to_pixels(2.54, 96.0), 96);
    }

    #[test]
    fn hex_colors() {
        assert_eq!(parse_hex_color("#ff8000"), Some([255, 128, 0]));
        assert_eq!(parse_hex_color("00FF00"), Some([0, 255, 0]));
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#gg0000"), None);
    }

    #[test]
    fn zoom_keeps_anchor_fixed() {
        let mut vp = Viewport::default();
        let anchor = Point::new(200.0, 100.0);
        let before = vp.screen_to_world(anchor);
        vp.zoom_at(2.0, anchor);
        let after = vp.screen_to_world(anchor);
        assert!((before - after).hypot() < 1e-9);
        assert_eq!(vp.zoom, 2.0);
        vp.zoom_at(1000.0, anchor);
        assert_eq!(vp.zoom, Viewport::MAX_ZOOM);
    }

    #[test]
    fn fit_rect_centers_content() {
        let mut vp = Viewport::default();
        let screen = Size::new(800.0, 600.0);
        assert!(vp.fit_rect(Rect::new(0.0, 0.0, 400.0, 150.0), screen, 0.8));
        assert_eq!(vp.zoom, 1.6);
        let center = vp.screen_to_world(Point::new(400.0, 300.0));
        assert!((center - Point::new(200.0, 75.0)).hypot() < 1e-9);

        assert!(vp.fit_rect(Rect::new(0.0, 0.0, 10.0, 10.0), screen, 0.9));
        assert_eq!(vp.zoom, Viewport::MAX_FIT_ZOOM);
        assert!(!vp.fit_rect(Rect::new(5.0, 5.0, 5.0, 9.0), screen, 0.9));
    }

    #[test]
    fn centered_zoom_steps() {
        let mut vp = Viewport::default();
        let screen = Size::new(200.0, 100.0);
        let middle = vp.screen_to_world(Point::new(100.0, 50.0));
        vp.zoom_centered(1.2, screen);
        vp.zoom_centered(1.0 / 1.2, screen);
        assert!((vp.zoom - 1.0).abs() < 1e-12);
        assert!((vp.screen_to_world(Point::new(100.0, 50.0)) - middle).hypot() < 1e-9);
    }

    #[test]
    fn bounding_box_from_points() {
        let bb = BoundingBox::from_points(&[Point::new(3.0, 4.0), Point::new(-1.0, 10.0), Point::new(2.0, 0.0)]).unwrap();
        assert_eq!(bb, BoundingBox { x: -1.0, y: 0.0, width: 4.0, height: 10.0 });
        assert!(BoundingBox::from_points(&[]).is_none());
    }
}
