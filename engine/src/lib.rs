pub mod types;
pub mod error;
pub mod config;
pub mod history;
pub mod layer;
pub mod document;
pub mod engine;
pub mod layer_ops;
pub mod selection;
pub mod vector_edit;
pub mod path;
pub mod tracer;
pub mod brush;
pub mod shapes;
pub mod image_ops;
pub mod render;
pub mod io;
pub mod svg;
pub mod vectorize;
pub mod commands;

pub use engine::CanvasEngine;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use types::*;
