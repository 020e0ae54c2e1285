use thiserror::Error;
use crate::types::LayerId;

/// Failures surfaced to the host. Missing ids and invalid tool states are
/// not errors; the engine treats those as no-ops.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decoded image has no pixels")]
    EmptyImage,
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("invalid data URL")]
    InvalidDataUrl,
    #[error("layer {0} not found")]
    LayerNotFound(LayerId),
    #[error("layer {0} has no raster surface")]
    NotRaster(LayerId),
    #[error("layer {0} is not a vector layer")]
    NotVector(LayerId),
    #[error("no layer is selected")]
    NoSelectedLayer,
    #[error("layer {0} is not a drawing or pattern layer")]
    NotDrawable(LayerId),
    #[error("layer {0} has no drawn content")]
    NothingDrawn(LayerId),
    #[error("vectorization service answered with status {0}")]
    ServiceStatus(u16),
    #[error("invalid vectorization response: {0}")]
    InvalidResponse(String),
    #[error("no shapes were found in the vectorization result")]
    NoShapes,
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
