use serde::Serialize;
use image::RgbaImage;
use kurbo::{Affine, Point, Rect};
use uuid::Uuid;
use crate::types::{LayerId, FolderId, LayerKind, Transform, Adjustments, LayerMetadata};
use crate::history::{LayerSnapshot, SnapshotContent, RasterData};

pub const DEFAULT_STROKE_WIDTH: f64 = 2.0;

/// Full-resolution surface plus optional preview proxies. Proxies are
/// dropped whenever the surface changes.
#[derive(Clone, Debug)]
pub struct RasterContent {
    pub surface: RgbaImage,
    pub proxy: Option<RgbaImage>,
    pub low_res_proxy: Option<RgbaImage>,
}

impl RasterContent {
    pub fn new(surface: RgbaImage) -> Self {
        Self { surface, proxy: None, low_res_proxy: None }
    }

    pub fn with_proxies(surface: RgbaImage, proxy: Option<RgbaImage>, low_res_proxy: Option<RgbaImage>) -> Self {
        Self { surface, proxy, low_res_proxy }
    }

    pub fn invalidate_proxies(&mut self) {
        self.proxy = None;
        self.low_res_proxy = None;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VectorContent {
    pub path_data: String,
    pub stroke_width: f64,
}

impl VectorContent {
    pub fn new(path_data: impl Into<String>) -> Self {
        Self { path_data: path_data.into(), stroke_width: DEFAULT_STROKE_WIDTH }
    }
}

#[derive(Clone, Debug)]
pub enum LayerContent {
    Raster(RasterContent),
    Vector(VectorContent),
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub opacity: f64,
    pub transform: Transform,
    pub adjustments: Adjustments,
    pub content: LayerContent,
    pub metadata: LayerMetadata,
    pub version: u64,
    pub folder_id: Option<FolderId>,
}

impl Layer {
    pub fn new(name: impl Into<String>, kind: LayerKind, content: LayerContent, metadata: LayerMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            visible: true,
            opacity: 1.0,
            transform: Transform::default(),
            adjustments: Adjustments::default(),
            content,
            metadata,
            version: 0,
            folder_id: None,
        }
    }

    /// Raster layer whose local box matches the surface size.
    pub fn raster(name: impl Into<String>, kind: LayerKind, surface: RgbaImage, dpi: f64) -> Self {
        let metadata = LayerMetadata::new(dpi, surface.width() as f64, surface.height() as f64);
        Self::new(name, kind, LayerContent::Raster(RasterContent::new(surface)), metadata)
    }

    pub fn vector(name: impl Into<String>, path_data: impl Into<String>, metadata: LayerMetadata) -> Self {
        Self::new(name, LayerKind::Vector, LayerContent::Vector(VectorContent::new(path_data)), metadata)
    }

    pub fn raster_content(&self) -> Option<&RasterContent> {
        match &self.content {
            LayerContent::Raster(r) => Some(r),
            LayerContent::Vector(_) => None,
        }
    }

    pub fn raster_content_mut(&mut self) -> Option<&mut RasterContent> {
        match &mut self.content {
            LayerContent::Raster(r) => Some(r),
            LayerContent::Vector(_) => None,
        }
    }

    pub fn surface(&self) -> Option<&RgbaImage> {
        self.raster_content().map(|r| &r.surface)
    }

    pub fn surface_mut(&mut self) -> Option<&mut RgbaImage> {
        self.raster_content_mut().map(|r| &mut r.surface)
    }

    pub fn vector_content(&self) -> Option<&VectorContent> {
        match &self.content {
            LayerContent::Vector(v) => Some(v),
            LayerContent::Raster(_) => None,
        }
    }

    pub fn vector_content_mut(&mut self) -> Option<&mut VectorContent> {
        match &mut self.content {
            LayerContent::Vector(v) => Some(v),
            LayerContent::Raster(_) => None,
        }
    }

    pub fn local_size(&self) -> (f64, f64) {
        (self.metadata.original_width, self.metadata.original_height)
    }

    /// Local box (origin top-left) to world space: center on the local box,
    /// scale, rotate, then move to the world position.
    pub fn local_to_world_affine(&self) -> Affine {
        let (w, h) = self.local_size();
        let t = &self.transform;
        Affine::translate((t.x, t.y))
            * Affine::rotate(t.rotation)
            * Affine::scale(t.scale)
            * Affine::translate((-w / 2.0, -h / 2.0))
    }

    pub fn local_to_world(&self, p: Point) -> Point {
        self.local_to_world_affine() * p
    }

    pub fn world_to_local(&self, p: Point) -> Point {
        self.local_to_world_affine().inverse() * p
    }

    /// Axis-aligned world box. Rotation is ignored.
    pub fn world_bounds(&self) -> Rect {
        let (w, h) = self.local_size();
        let (hw, hh) = (w * self.transform.scale / 2.0, h * self.transform.scale / 2.0);
        Rect::new(self.transform.x - hw, self.transform.y - hh, self.transform.x + hw, self.transform.y + hh)
    }

    /// Records a content change: bumps the version and drops stale proxies.
    pub fn touch(&mut self) {
        self.version += 1;
        if let Some(raster) = self.raster_content_mut() {
            raster.invalidate_proxies();
        }
    }

    pub fn snapshot(&self) -> LayerSnapshot {
        let content = match &self.content {
            LayerContent::Raster(r) => SnapshotContent::Raster(RasterData::from_image(&r.surface)),
            LayerContent::Vector(v) => SnapshotContent::Vector {
                path_data: v.path_data.clone(),
                stroke_width: v.stroke_width,
            },
        };
        LayerSnapshot {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            visible: self.visible,
            opacity: self.opacity,
            transform: self.transform,
            adjustments: self.adjustments,
            metadata: self.metadata,
            content,
        }
    }

    pub fn from_snapshot(snapshot: &LayerSnapshot) -> Option<Self> {
        let mut layer = Layer::new(
            snapshot.name.clone(),
            snapshot.kind,
            content_from_snapshot(&snapshot.content)?,
            snapshot.metadata,
        );
        layer.id = snapshot.id;
        layer.visible = snapshot.visible;
        layer.opacity = snapshot.opacity;
        layer.transform = snapshot.transform;
        layer.adjustments = snapshot.adjustments;
        layer.version = 1;
        Some(layer)
    }

    /// Replaces the live state with `snapshot`, keeping id and folder.
    pub fn restore(&mut self, snapshot: &LayerSnapshot) -> bool {
        let content = match content_from_snapshot(&snapshot.content) {
            Some(c) => c,
            None => return false,
        };
        self.name = snapshot.name.clone();
        self.kind = snapshot.kind;
        self.visible = snapshot.visible;
        self.opacity = snapshot.opacity;
        self.transform = snapshot.transform;
        self.adjustments = snapshot.adjustments;
        self.metadata = snapshot.metadata;
        self.content = content;
        self.version += 1;
        true
    }

    pub fn summary(&self) -> LayerSummary {
        let (surface_width, surface_height) = self.surface().map(|s| (s.width(), s.height())).unwrap_or((0, 0));
        LayerSummary {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            visible: self.visible,
            opacity: self.opacity,
            transform: self.transform,
            adjustments: self.adjustments,
            metadata: self.metadata,
            version: self.version,
            folder_id: self.folder_id,
            surface_width,
            surface_height,
            path_data: self.vector_content().map(|v| v.path_data.clone()),
            stroke_width: self.vector_content().map(|v| v.stroke_width),
        }
    }
}

fn content_from_snapshot(content: &SnapshotContent) -> Option<LayerContent> {
    Some(match content {
        SnapshotContent::Raster(data) => LayerContent::Raster(RasterContent::new(data.to_image()?)),
        SnapshotContent::Vector { path_data, stroke_width } => LayerContent::Vector(VectorContent {
            path_data: path_data.clone(),
            stroke_width: *stroke_width,
        }),
    })
}

/// Host-facing view of a layer, without pixel data.
#[derive(Serialize, Clone, Debug)]
pub struct LayerSummary {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub opacity: f64,
    pub transform: Transform,
    pub adjustments: Adjustments,
    pub metadata: LayerMetadata,
    pub version: u64,
    pub folder_id: Option<FolderId>,
    pub surface_width: u32,
    pub surface_height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
}
