use wasm_bindgen::prelude::*;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use kurbo::Point;
use crate::config::EngineConfig;
use crate::engine::{CanvasEngine, ZOOM_STEP};
use crate::error::{EngineError, EngineResult};
use crate::io::{self, ExportFormat};
use crate::layer::{LayerContent, VectorContent};
use crate::layer_ops::{BlankCanvasSpec, LayerOrder, LayerPlacement, LayerUpdate};
use crate::types::{AdjustmentsUpdate, FlipAxis, FolderId, LayerId, LayerKind, LayerMetadata, Tool, Viewport};
use crate::shapes::ShapeKind;
use crate::vector_edit::PointKind;
use crate::vectorize;

#[derive(Deserialize)]
struct Command {
    action: String,
    #[serde(default)]
    params: Value,
}

#[derive(Deserialize)]
struct IdParams {
    id: LayerId,
}

#[derive(Deserialize)]
struct FolderParams {
    id: FolderId,
}

#[derive(Deserialize)]
struct PointParams {
    x: f64,
    y: f64,
}

impl PointParams {
    fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Deserialize)]
struct StrokeParams {
    points: Vec<Point>,
    /// Points are world coordinates and are mapped into the selected layer.
    #[serde(default)]
    world: bool,
}

fn parse<T: DeserializeOwned>(params: Value) -> EngineResult<T> {
    Ok(serde_json::from_value(params)?)
}

fn done(ok: bool) -> Value {
    json!({ "success": ok })
}

fn created<T: serde::Serialize>(id: Option<T>) -> Value {
    match id {
        Some(id) => json!({ "success": true, "id": id }),
        None => json!({ "success": false }),
    }
}

/// Recursively overlays `patch` onto `base`; non-object values replace.
fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                merge_json(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, patch) => *base = patch,
    }
}

impl CanvasEngine {
    fn stroke_points(&self, params: StrokeParams) -> Vec<Point> {
        match (params.world, self.selected_layer()) {
            (true, Some(layer)) => params.points.iter().map(|p| layer.world_to_local(*p)).collect(),
            _ => params.points,
        }
    }

    /// Applies a partial config object on top of the current one.
    pub fn configure(&mut self, patch: Value) -> EngineResult<()> {
        let mut merged = serde_json::to_value(&self.config)?;
        merge_json(&mut merged, patch);
        let config: EngineConfig = serde_json::from_value(merged)?;
        self.set_config(config);
        Ok(())
    }

    /// Dispatches one host command. Missing ids and invalid states report
    /// `success: false`; malformed parameters are errors.
    pub fn run_command(&mut self, action: &str, params: Value) -> EngineResult<Value> {
        let params = if params.is_null() { json!({}) } else { params };
        let result = match action {
            "create_blank_canvas" => {
                let spec: BlankCanvasSpec = parse(params)?;
                created(Some(self.create_blank_canvas(&spec)))
            }
            "create_drawing_layer" => created(Some(self.create_drawing_layer())),
            "add_vector_layer" => {
                #[derive(Deserialize)]
                struct P {
                    name: String,
                    path_data: String,
                    width: f64,
                    height: f64,
                    #[serde(default)]
                    placement: LayerPlacement,
                }
                let p: P = parse(params)?;
                let content = LayerContent::Vector(VectorContent::new(p.path_data));
                let metadata = LayerMetadata::new(self.document.dpi, p.width.max(1.0), p.height.max(1.0));
                created(Some(self.create_layer(&p.name, LayerKind::Vector, content, metadata, p.placement)))
            }
            "select_layer" => {
                #[derive(Deserialize)]
                struct P {
                    id: Option<LayerId>,
                }
                let p: P = parse(params)?;
                done(self.select_layer(p.id))
            }
            "delete_layer" => done(self.delete_layer(parse::<IdParams>(params)?.id)),
            "duplicate_layer" => created(self.duplicate_layer(parse::<IdParams>(params)?.id)),
            "update_layer_properties" => {
                #[derive(Deserialize)]
                struct P {
                    id: LayerId,
                    update: LayerUpdate,
                }
                let p: P = parse(params)?;
                done(self.update_layer_properties(p.id, &p.update))
            }
            "update_layer_adjustments" => {
                #[derive(Deserialize)]
                struct P {
                    id: LayerId,
                    adjustments: AdjustmentsUpdate,
                }
                let p: P = parse(params)?;
                done(self.update_layer_adjustments(p.id, &p.adjustments))
            }
            "flip_layer" => {
                #[derive(Deserialize)]
                struct P {
                    axis: FlipAxis,
                }
                done(self.flip_layer(parse::<P>(params)?.axis))
            }
            "rotate_layer" => {
                #[derive(Deserialize)]
                struct P {
                    degrees: f64,
                }
                done(self.rotate_layer(parse::<P>(params)?.degrees))
            }
            "reorder_layer" => {
                #[derive(Deserialize)]
                struct P {
                    id: LayerId,
                    order: LayerOrder,
                }
                let p: P = parse(params)?;
                done(self.reorder(p.id, p.order))
            }
            "merge_down" => done(self.merge_down(parse::<IdParams>(params)?.id)),
            "trim_layer" => done(self.trim_layer_to_content(parse::<IdParams>(params)?.id)),
            "rasterize_vector_layer" => created(self.rasterize_vector_layer(parse::<IdParams>(params)?.id)),
            "begin_gesture" => done(self.begin_layer_gesture(parse::<IdParams>(params)?.id)),
            "end_gesture" => {
                #[derive(Deserialize)]
                struct P {
                    #[serde(default)]
                    label: Option<String>,
                }
                let p: P = parse(params)?;
                done(self.end_layer_gesture(p.label.as_deref().unwrap_or("Transform")))
            }

            "create_folder" => {
                #[derive(Deserialize)]
                struct P {
                    #[serde(default)]
                    name: Option<String>,
                }
                let p: P = parse(params)?;
                created(Some(self.create_folder(p.name.as_deref())))
            }
            "rename_folder" => {
                #[derive(Deserialize)]
                struct P {
                    id: FolderId,
                    name: String,
                }
                let p: P = parse(params)?;
                done(self.rename_folder(p.id, &p.name))
            }
            "delete_folder" => done(self.delete_folder(parse::<FolderParams>(params)?.id)),
            "toggle_folder_lock" => done(self.toggle_folder_lock(parse::<FolderParams>(params)?.id)),
            "toggle_folder_open" => done(self.toggle_folder_open(parse::<FolderParams>(params)?.id)),
            "toggle_folder_visibility" => done(self.toggle_folder_visibility(parse::<FolderParams>(params)?.id)),
            "duplicate_folder" => created(self.duplicate_folder(parse::<FolderParams>(params)?.id)),
            "move_layer_to_folder" => {
                #[derive(Deserialize)]
                struct P {
                    layer_id: LayerId,
                    folder_id: Option<FolderId>,
                }
                let p: P = parse(params)?;
                done(self.move_layer_to_folder(p.layer_id, p.folder_id))
            }

            "set_tool" => {
                #[derive(Deserialize)]
                struct P {
                    tool: Tool,
                }
                self.set_active_tool(parse::<P>(params)?.tool);
                done(true)
            }
            "set_viewport" => {
                self.set_viewport(parse::<Viewport>(params)?);
                done(true)
            }
            "zoom_at" => {
                #[derive(Deserialize)]
                struct P {
                    factor: f64,
                    x: f64,
                    y: f64,
                }
                let p: P = parse(params)?;
                self.zoom_at_point(p.factor, Point::new(p.x, p.y));
                done(true)
            }
            "set_screen_size" => {
                #[derive(Deserialize)]
                struct P {
                    width: f64,
                    height: f64,
                }
                let p: P = parse(params)?;
                self.set_screen_size(p.width, p.height);
                done(true)
            }
            "zoom_in" | "zoom_out" => {
                #[derive(Deserialize)]
                struct P {
                    #[serde(default)]
                    factor: Option<f64>,
                }
                let factor = parse::<P>(params)?.factor.unwrap_or(ZOOM_STEP);
                done(if action == "zoom_in" { self.zoom_in(factor) } else { self.zoom_out(factor) })
            }
            "zoom_to_fit" => done(self.zoom_to_fit()),
            "frame_layer" => done(self.frame_layer(parse::<IdParams>(params)?.id)),
            "configure" => {
                self.configure(params)?;
                done(true)
            }
            "set_primary_color" => {
                #[derive(Deserialize)]
                struct P {
                    color: String,
                }
                let color = parse::<P>(params)?.color;
                self.configure(json!({ "primary_color": color }))?;
                done(true)
            }

            "marquee_start" => {
                self.start_marquee(parse::<PointParams>(params)?.point());
                done(true)
            }
            "marquee_update" => {
                self.update_marquee(parse::<PointParams>(params)?.point());
                done(true)
            }
            "marquee_end" => done(self.end_marquee()),
            "lasso_start" => {
                self.start_lasso(parse::<PointParams>(params)?.point());
                done(true)
            }
            "lasso_update" => {
                self.update_lasso(parse::<PointParams>(params)?.point());
                done(true)
            }
            "lasso_end" => done(self.end_lasso()),
            "clear_selection" => {
                self.clear_selection();
                done(true)
            }
            "magic_wand" => {
                #[derive(Deserialize)]
                struct P {
                    x: f64,
                    y: f64,
                    #[serde(default)]
                    accumulate: bool,
                }
                let p: P = parse(params)?;
                done(self.magic_wand(Point::new(p.x, p.y), p.accumulate))
            }
            "copy_selection" => done(self.copy_selection()),
            "cutout_selection" => created(self.cutout_selection()),
            "duplicate_selection" => created(self.duplicate_selection()),
            "paste_selection" => created(self.paste_selection()),

            "paint_stroke" => {
                let points = self.stroke_points(parse(params)?);
                done(self.paint_stroke(&points))
            }
            "erase_stroke" => {
                let points = self.stroke_points(parse(params)?);
                done(self.erase_stroke(&points))
            }
            "fill" => {
                #[derive(Deserialize)]
                struct P {
                    x: f64,
                    y: f64,
                    #[serde(default)]
                    world: bool,
                }
                let p: P = parse(params)?;
                let points = self.stroke_points(StrokeParams { points: vec![Point::new(p.x, p.y)], world: p.world });
                done(points.first().map(|p| self.fill_at(*p)).unwrap_or(false))
            }
            "set_shape_tool" => {
                #[derive(Deserialize)]
                struct P {
                    shape: ShapeKind,
                }
                self.set_active_shape_tool(parse::<P>(params)?.shape);
                done(true)
            }
            "draw_shape" => {
                #[derive(Deserialize)]
                struct P {
                    start: Point,
                    end: Point,
                    #[serde(default)]
                    world: bool,
                }
                let p: P = parse(params)?;
                let points = self.stroke_points(StrokeParams { points: vec![p.start, p.end], world: p.world });
                match points.as_slice() {
                    [start, end] => done(self.draw_shape(*start, *end)),
                    _ => done(false),
                }
            }

            "enter_vector_edit" => done(self.enter_vector_edit(parse::<IdParams>(params)?.id)),
            "exit_vector_edit" => done(self.exit_vector_edit()),
            "begin_point_drag" => {
                #[derive(Deserialize)]
                struct P {
                    index: usize,
                    kind: PointKind,
                }
                let p: P = parse(params)?;
                done(self.begin_point_drag(p.index, p.kind))
            }
            "drag_point" => done(self.drag_point_to(parse::<PointParams>(params)?.point())),
            "end_point_drag" => {
                self.end_point_drag();
                done(true)
            }
            "move_point" | "move_control_point" => {
                #[derive(Deserialize)]
                struct P {
                    index: usize,
                    x: f64,
                    y: f64,
                }
                let p: P = parse(params)?;
                let local = Point::new(p.x, p.y);
                done(if action == "move_point" { self.move_point(p.index, local) } else { self.move_control_point(p.index, local) })
            }
            "add_curve_point" => {
                #[derive(Deserialize)]
                struct P {
                    id: LayerId,
                    index: usize,
                }
                let p: P = parse(params)?;
                done(self.add_curve_point(p.id, p.index))
            }

            "undo" => done(self.undo()),
            "redo" => done(self.redo()),
            "undo_global" => done(self.undo_global()),
            "redo_global" => done(self.redo_global()),
            "revert_layer_history" => {
                #[derive(Deserialize)]
                struct P {
                    id: LayerId,
                    index: usize,
                }
                let p: P = parse(params)?;
                done(self.revert_layer_history(p.id, p.index))
            }
            "revert_global_history" => {
                #[derive(Deserialize)]
                struct P {
                    index: usize,
                }
                done(self.revert_global_history(parse::<P>(params)?.index))
            }
            _ => return Err(EngineError::UnknownAction(action.to_string())),
        };
        Ok(result)
    }
}

fn error_json(e: &EngineError) -> String {
    json!({ "error": e.to_string() }).to_string()
}

#[wasm_bindgen]
impl CanvasEngine {
    /// `{"action": ..., "params": {...}}` in, `{"success": ...}` or
    /// `{"error": ...}` out.
    pub fn execute_command(&mut self, cmd_json: &str) -> String {
        let cmd: Command = match serde_json::from_str(cmd_json) {
            Ok(c) => c,
            Err(e) => return error_json(&EngineError::Json(e)),
        };
        match self.run_command(&cmd.action, cmd.params) {
            Ok(result) => result.to_string(),
            Err(e) => {
                log::warn!("command {} failed: {}", cmd.action, e);
                error_json(&e)
            }
        }
    }

    /// Imports PNG/JPEG bytes as a new layer. `options_json` may carry
    /// `kind` and `placement`.
    pub fn import_image_file(&mut self, name: &str, bytes: &[u8], options_json: &str) -> String {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Options {
            kind: Option<LayerKind>,
            placement: LayerPlacement,
        }
        let options: Options = if options_json.trim().is_empty() {
            Options::default()
        } else {
            match serde_json::from_str(options_json) {
                Ok(o) => o,
                Err(e) => return error_json(&EngineError::Json(e)),
            }
        };
        let kind = options.kind.unwrap_or(LayerKind::Pattern);
        match self.import_image(name, kind, bytes, options.placement) {
            Ok(id) => json!({ "success": true, "id": id }).to_string(),
            Err(e) => error_json(&e),
        }
    }

    /// Renders and encodes a layer; `format_json` is e.g.
    /// `{"format": "jpeg", "quality": 90}`.
    pub fn export_layer_data_url(&self, id: &str, format_json: &str) -> String {
        let result = (|| -> EngineResult<String> {
            let id = LayerId::parse_str(id).map_err(|e| EngineError::InvalidResponse(e.to_string()))?;
            let format: ExportFormat = serde_json::from_str(format_json)?;
            let bytes = self.export_layer(id, format)?;
            Ok(io::bytes_data_url(&bytes, format))
        })();
        match result {
            Ok(url) => json!({ "success": true, "data_url": url }).to_string(),
            Err(e) => error_json(&e),
        }
    }

    /// PNG of all visible layers cropped to the selected layer's drawing.
    pub fn export_drawn_area_data_url(&self) -> String {
        let result = self.export_drawn_area().map(|bytes| io::bytes_data_url(&bytes, ExportFormat::Png));
        match result {
            Ok(url) => json!({ "success": true, "data_url": url }).to_string(),
            Err(e) => error_json(&e),
        }
    }

    /// Request body for the vectorization service.
    pub fn get_vectorization_request(&self, id: &str) -> String {
        let result = LayerId::parse_str(id)
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))
            .and_then(|id| self.vectorization_request(id));
        match result {
            Ok(body) => body,
            Err(e) => error_json(&e),
        }
    }

    pub fn apply_vectorization_response(&mut self, id: &str, status: u16, body: &str) -> String {
        let result = LayerId::parse_str(id)
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))
            .and_then(|id| {
                let response = vectorize::parse_response(status, body)?;
                self.apply_vectorization(id, response)
            });
        match result {
            Ok(ids) => json!({ "success": true, "ids": ids }).to_string(),
            Err(e) => {
                log::warn!("vectorization failed: {}", e);
                error_json(&e)
            }
        }
    }
}
