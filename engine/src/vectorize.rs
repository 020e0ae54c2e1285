use serde::{Serialize, Deserialize};
use kurbo::Point;
use crate::document::Folder;
use crate::engine::CanvasEngine;
use crate::error::{EngineError, EngineResult};
use crate::io;
use crate::layer::Layer;
use crate::layer_ops::LayerPlacement;
use crate::path;
use crate::svg::{self, SvgPaths};
use crate::types::{BoundingBox, LayerId, LayerMetadata, Transform};

/// Body POSTed to the vectorization service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VectorizeRequest {
    pub image_data_url: String,
}

/// One traced shape, with its path relative to `bbox` in source pixels.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ShapeRecord {
    pub path: String,
    pub bbox: BoundingBox,
}

#[derive(Clone, Debug, PartialEq)]
pub enum VectorizeResponse {
    Shapes(Vec<ShapeRecord>),
    Svg(SvgPaths),
}

/// Interprets the service's answer: a JSON array of shape records or a
/// full SVG document.
pub fn parse_response(status: u16, body: &str) -> EngineResult<VectorizeResponse> {
    if !(200..300).contains(&status) {
        return Err(EngineError::ServiceStatus(status));
    }
    let trimmed = body.trim_start();
    if trimmed.starts_with('[') {
        let shapes: Vec<ShapeRecord> =
            serde_json::from_str(trimmed).map_err(|e| EngineError::InvalidResponse(e.to_string()))?;
        if shapes.is_empty() {
            return Err(EngineError::NoShapes);
        }
        return Ok(VectorizeResponse::Shapes(shapes));
    }
    if trimmed.starts_with('<') {
        let paths = svg::parse_svg_paths(trimmed)?;
        if paths.points.is_empty() {
            return Err(EngineError::NoShapes);
        }
        return Ok(VectorizeResponse::Svg(paths));
    }
    Err(EngineError::InvalidResponse("expected a JSON array or an SVG document".into()))
}

impl CanvasEngine {
    /// JSON request body carrying the layer's full-resolution pixels.
    pub fn vectorization_request(&self, id: LayerId) -> EngineResult<String> {
        let layer = self.document.layer(id).ok_or(EngineError::LayerNotFound(id))?;
        let surface = layer.surface().ok_or(EngineError::NotRaster(id))?;
        let request = VectorizeRequest { image_data_url: io::png_data_url(surface)? };
        Ok(serde_json::to_string(&request)?)
    }

    /// Turns a vectorization result into vector layers grouped in a new
    /// "<name> (Vectorized)" folder, placed over the source layer. One
    /// global history entry covers the whole import.
    pub fn apply_vectorization(&mut self, source_id: LayerId, response: VectorizeResponse) -> EngineResult<Vec<LayerId>> {
        let source = self.document.layer(source_id).ok_or(EngineError::LayerNotFound(source_id))?;
        let surface = source.surface().ok_or(EngineError::NotRaster(source_id))?;
        let (w, h) = source.local_size();
        // Service coordinates are surface pixels; the local box may differ.
        let sx = surface.width() as f64 / w.max(f64::EPSILON);
        let sy = surface.height() as f64 / h.max(f64::EPSILON);
        let source_name = source.name.clone();
        let dpi = source.metadata.dpi;

        let place = |bbox: BoundingBox| -> Transform {
            let center = source.local_to_world(Point::new(
                (bbox.x + bbox.width / 2.0) / sx,
                (bbox.y + bbox.height / 2.0) / sy,
            ));
            Transform { x: center.x, y: center.y, scale: source.transform.scale / sx, rotation: source.transform.rotation }
        };

        let mut layers = Vec::new();
        match response {
            VectorizeResponse::Shapes(shapes) => {
                for (i, shape) in shapes.into_iter().enumerate() {
                    let metadata = LayerMetadata::new(dpi, shape.bbox.width.max(1.0), shape.bbox.height.max(1.0));
                    let mut layer = Layer::vector(format!("{} Vector {}", source_name, i + 1), shape.path, metadata);
                    layer.transform = place(shape.bbox);
                    layers.push(layer);
                }
            }
            VectorizeResponse::Svg(paths) => {
                let mut points = paths.points;
                let bounds = path::bounds(&points).ok_or(EngineError::NoShapes)?;
                path::translate(&mut points, -bounds.origin().to_vec2());
                let bbox = BoundingBox::from(bounds);
                let metadata = LayerMetadata::new(dpi, bbox.width.max(1.0), bbox.height.max(1.0));
                let mut layer = Layer::vector(format!("{} Vector", source_name), path::serialize(&points), metadata);
                layer.transform = place(bbox);
                layers.push(layer);
            }
        }
        if layers.is_empty() {
            return Err(EngineError::NoShapes);
        }

        let pre = self.document_snapshot();
        let folder = Folder::new(format!("{} (Vectorized)", source_name));
        let folder_id = folder.id;
        self.document.folders.push(folder);
        let mut ids = Vec::with_capacity(layers.len());
        for layer in layers {
            let id = self.insert_layer(layer, LayerPlacement::Keep, None);
            self.document.attach_layer(id, folder_id);
            ids.push(id);
        }
        log::info!("vectorized {} into {} layers", source_name, ids.len());
        self.commit_global(pre, &format!("Vectorize {}", source_name));
        Ok(ids)
    }
}
